// ── Remote Chunk Store ─────────────────────────────────────────────────────
//
// Sharded read-through store keyed by lowercase-first-character prefix.
// Serves records the token cache has not yet seen; mirrors new work back to
// a manifest + chunk files for external persistence.
//
// Two sources:
//   - a remote manifest URL (`configure`) with chunk files fetched over
//     HTTP, at most K in parallel (K = min(configured, 6), floor 1)
//   - a local `ChunkRecorder` (`attach_recorder`) whose in-memory chunks
//     stand in when there is no remote
//
// Every ingested record passes through the pruner (hidden/global floor
// overrides apply), and never overwrites a token already cached with
// non-empty adjacency.

use crate::atoms::constants::{
    FALLBACK_CHUNK_PREFIX, KEY_REMOTE_CHUNKS, KEY_REMOTE_META, MANIFEST_VERSION,
    REMOTE_CONCURRENCY_CAP,
};
use crate::atoms::error::{HlsfError, HlsfResult};
use crate::atoms::types::{chunk_prefix, AdjacencyRecord, CacheChunk, Manifest, ManifestChunk};
use crate::engine::cache::{PutOptions, TokenCache};
use crate::engine::http::{attempts_remain, is_retryable_status, retry_delay, shared_client};
use crate::engine::kv::KvStore;
use crate::engine::prune::{limit_record, PruneOptions};
use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Result of a preload pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// Records ingested into the token cache.
    pub loaded: usize,
    /// Requested tokens that were found (including already-cached ones).
    pub hits: usize,
}

/// Remote store metadata snapshot for `/remotestats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RemoteMetadata {
    pub ready: bool,
    pub version: String,
    pub generated_at: String,
    pub source: String,
    pub total_tokens: u32,
    pub total_relationships: u32,
    pub chunk_count: usize,
    pub loaded_chunks: usize,
}

// ═════════════════════════════════════════════════════════════════════════════
// Chunk recorder (local mirror)
// ═════════════════════════════════════════════════════════════════════════════

/// Accumulates locally-generated records into in-memory chunks so they can
/// serve as a manifest source and be exported for external persistence.
#[derive(Default)]
pub struct ChunkRecorder {
    chunks: Mutex<BTreeMap<String, BTreeMap<String, AdjacencyRecord>>>,
}

impl ChunkRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one token's latest state. Idempotent by token.
    pub fn record(&self, record: &AdjacencyRecord) {
        let prefix = chunk_prefix(&record.token);
        self.chunks
            .lock()
            .entry(prefix)
            .or_default()
            .insert(record.token.clone(), record.clone());
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    /// Drop every recorded chunk. Cascades from a cache reset.
    pub fn clear(&self) {
        self.chunks.lock().clear();
    }

    /// Build a chunk file for one prefix, records sorted by token.
    pub fn chunk(&self, prefix: &str) -> Option<CacheChunk> {
        let chunks = self.chunks.lock();
        let records = chunks.get(prefix)?;
        Some(CacheChunk::new(
            prefix,
            records.values().cloned().collect::<Vec<_>>(),
        ))
    }

    /// Derive a manifest over the recorded chunks.
    pub fn manifest(&self) -> Manifest {
        let chunks = self.chunks.lock();
        let mut manifest_chunks = Vec::new();
        let mut total_tokens = 0u32;
        let mut total_relationships = 0u32;
        let mut token_index = Vec::new();
        for (prefix, records) in chunks.iter() {
            manifest_chunks.push(ManifestChunk {
                prefix: prefix.clone(),
                href: format!("chunks/{prefix}.json"),
                token_count: records.len() as u32,
            });
            total_tokens += records.len() as u32;
            for record in records.values() {
                total_relationships += record.total_relationships;
                token_index.push(record.token.clone());
            }
        }
        token_index.sort();
        Manifest {
            version: MANIFEST_VERSION.to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            source: "local-recorder".to_string(),
            total_tokens,
            total_relationships,
            chunk_prefix_length: 1,
            chunks: manifest_chunks,
            token_index_href: "token-index.json".to_string(),
            token_index: Some(token_index),
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Remote chunk store
// ═════════════════════════════════════════════════════════════════════════════

struct RemoteState {
    ready: bool,
    manifest: Option<Manifest>,
    /// URL prefix chunk hrefs resolve against; `None` for recorder mode.
    base_url: Option<String>,
    /// Fetched chunks by prefix.
    chunk_cache: HashMap<String, CacheChunk>,
    /// Tokens already resolved by a preload pass (found or not) — avoids
    /// refetching the same chunk for the same token.
    resolved_tokens: HashSet<String>,
    recorder: Option<Arc<ChunkRecorder>>,
}

pub struct RemoteChunkStore {
    cache: Arc<TokenCache>,
    state: Mutex<RemoteState>,
    /// Effective parallel chunk fetch limit.
    concurrency: Mutex<usize>,
    /// Pruning floor applied at ingest.
    prune_floor: Mutex<f64>,
    /// Edge cap applied at ingest.
    ingest_edge_cap: Mutex<usize>,
}

impl RemoteChunkStore {
    pub fn new(cache: Arc<TokenCache>) -> Self {
        RemoteChunkStore {
            cache,
            state: Mutex::new(RemoteState {
                ready: false,
                manifest: None,
                base_url: None,
                chunk_cache: HashMap::new(),
                resolved_tokens: HashSet::new(),
                recorder: None,
            }),
            concurrency: Mutex::new(4),
            prune_floor: Mutex::new(0.18),
            ingest_edge_cap: Mutex::new(10),
        }
    }

    /// Push the live config knobs down. The dispatcher calls this on every
    /// profile change.
    pub fn apply_config(&self, concurrency: usize, prune_floor: f64, edge_cap: usize) {
        *self.concurrency.lock() = concurrency.min(REMOTE_CONCURRENCY_CAP).max(1);
        *self.prune_floor.lock() = prune_floor;
        *self.ingest_edge_cap.lock() = edge_cap.max(1);
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Fetch and adopt a remote manifest. Refuses to enter the ready state
    /// on a malformed manifest.
    pub async fn configure(&self, manifest_url: &str) -> HlsfResult<RemoteMetadata> {
        let body = fetch_json(manifest_url).await?;
        let manifest: Manifest = serde_json::from_str(&body)
            .map_err(|e| HlsfError::InvalidManifest(format!("{manifest_url}: {e}")))?;
        manifest.validate().map_err(HlsfError::InvalidManifest)?;

        let base_url = manifest_url
            .rsplit_once('/')
            .map(|(base, _)| base.to_string())
            .unwrap_or_default();

        let mut state = self.state.lock();
        state.chunk_cache.clear();
        state.resolved_tokens.clear();
        state.recorder = None;
        state.base_url = Some(base_url);
        state.manifest = Some(manifest);
        state.ready = true;
        info!("[remote] Manifest adopted from {manifest_url}");
        Ok(metadata_of(&state))
    }

    /// Use a local recorder as the manifest source. Applies when there is
    /// no remote URL.
    pub fn attach_recorder(&self, recorder: Arc<ChunkRecorder>) {
        let manifest = recorder.manifest();
        let mut state = self.state.lock();
        state.chunk_cache.clear();
        state.resolved_tokens.clear();
        state.base_url = None;
        state.manifest = Some(manifest);
        state.recorder = Some(recorder);
        state.ready = true;
        info!("[remote] Local recorder attached");
    }

    /// Resolve the chunk prefix for a token against the manifest: exact
    /// prefix, else `_`, else the first manifest prefix.
    fn chunk_for(manifest: &Manifest, token: &str) -> Option<String> {
        let exact = chunk_prefix(token);
        if manifest.chunks.iter().any(|c| c.prefix == exact) {
            return Some(exact);
        }
        if manifest
            .chunks
            .iter()
            .any(|c| c.prefix == FALLBACK_CHUNK_PREFIX)
        {
            return Some(FALLBACK_CHUNK_PREFIX.to_string());
        }
        manifest.chunks.first().map(|c| c.prefix.clone())
    }

    /// Warm the token cache with any of `tokens` the remote store knows.
    pub async fn preload_tokens(&self, tokens: &[String]) -> HlsfResult<PreloadReport> {
        if !self.is_ready() {
            return Ok(PreloadReport::default());
        }

        // Dedup and drop tokens that need no remote work.
        let mut wanted: Vec<String> = Vec::new();
        {
            let state = self.state.lock();
            let mut seen = HashSet::new();
            for token in tokens {
                if !seen.insert(token.clone()) {
                    continue;
                }
                if state.resolved_tokens.contains(token) {
                    continue;
                }
                if self.cache.has_adjacency(token) {
                    continue;
                }
                wanted.push(token.clone());
            }
        }
        if wanted.is_empty() {
            return Ok(self.count_hits(tokens));
        }

        // Partition by resolved prefix.
        let mut by_prefix: BTreeMap<String, Vec<String>> = BTreeMap::new();
        {
            let state = self.state.lock();
            let Some(manifest) = state.manifest.as_ref() else {
                return Ok(PreloadReport::default());
            };
            for token in &wanted {
                if let Some(prefix) = Self::chunk_for(manifest, token) {
                    by_prefix.entry(prefix).or_default().push(token.clone());
                }
            }
        }

        // Load missing chunks, at most K in flight.
        let missing: Vec<String> = {
            let state = self.state.lock();
            by_prefix
                .keys()
                .filter(|p| !state.chunk_cache.contains_key(*p))
                .cloned()
                .collect()
        };
        let concurrency = *self.concurrency.lock();
        for batch in missing.chunks(concurrency.max(1)) {
            let fetches = batch.iter().map(|prefix| self.load_chunk(prefix.clone()));
            for result in join_all(fetches).await {
                match result {
                    Ok(Some(chunk)) => {
                        let mut state = self.state.lock();
                        state.chunk_cache.insert(chunk.prefix.clone(), chunk);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("[remote] Chunk load failed: {e}"),
                }
            }
        }

        // Ingest requested tokens from the now-cached chunks.
        let mut loaded = 0usize;
        let prune_floor = *self.prune_floor.lock();
        let edge_cap = *self.ingest_edge_cap.lock();
        for (prefix, tokens_in_prefix) in &by_prefix {
            let chunk = {
                let state = self.state.lock();
                state.chunk_cache.get(prefix).cloned()
            };
            let Some(chunk) = chunk else { continue };
            for token in tokens_in_prefix {
                let Some(record) = chunk.tokens.iter().find(|r| &r.token == token) else {
                    continue;
                };
                if self.cache.has_adjacency(token) {
                    continue;
                }
                let opts = PruneOptions {
                    edge_cap,
                    priority_tokens: Vec::new(),
                    relationship_budget: None,
                    weight_floor: prune_floor,
                };
                let pruned = limit_record(record, &opts);
                match self.cache.put(token, pruned, PutOptions { defer_reload: true }) {
                    Ok(_) => loaded += 1,
                    Err(e) => warn!("[remote] Ingest failed for {token:?}: {e}"),
                }
            }
        }

        {
            let mut state = self.state.lock();
            for token in &wanted {
                state.resolved_tokens.insert(token.clone());
            }
        }

        let mut report = self.count_hits(tokens);
        report.loaded = loaded;
        debug!(
            "[remote] Preload: {} requested, {} loaded, {} hits",
            tokens.len(),
            report.loaded,
            report.hits
        );
        Ok(report)
    }

    fn count_hits(&self, tokens: &[String]) -> PreloadReport {
        let unique: HashSet<&String> = tokens.iter().collect();
        let hits = unique
            .iter()
            .filter(|t| self.cache.has_adjacency(t))
            .count();
        PreloadReport { loaded: 0, hits }
    }

    /// Load one chunk from the active source.
    async fn load_chunk(&self, prefix: String) -> HlsfResult<Option<CacheChunk>> {
        let (href, base_url, recorder) = {
            let state = self.state.lock();
            let Some(manifest) = state.manifest.as_ref() else {
                return Ok(None);
            };
            let Some(entry) = manifest.chunks.iter().find(|c| c.prefix == prefix) else {
                return Ok(None);
            };
            (
                entry.href.clone(),
                state.base_url.clone(),
                state.recorder.clone(),
            )
        };

        if let Some(recorder) = recorder {
            return Ok(recorder.chunk(&prefix));
        }

        let Some(base) = base_url else {
            return Ok(None);
        };
        let url = format!("{}/{}", base.trim_end_matches('/'), href);
        let body = fetch_json(&url).await?;
        let chunk: CacheChunk = serde_json::from_str(&body)
            .map_err(|e| HlsfError::InvalidChunk(format!("{url}: {e}")))?;
        if chunk.prefix != prefix {
            return Err(HlsfError::InvalidChunk(format!(
                "{url}: prefix {:?} does not match manifest entry {:?}",
                chunk.prefix, prefix
            )));
        }
        Ok(Some(chunk))
    }

    /// Tokens the remote store can currently enumerate: the manifest's
    /// token index when present, else the union of loaded chunks.
    pub fn list_tokens(&self) -> Vec<String> {
        let state = self.state.lock();
        if let Some(manifest) = state.manifest.as_ref() {
            if let Some(index) = manifest.token_index.as_ref() {
                return index.clone();
            }
        }
        let mut tokens: Vec<String> = state
            .chunk_cache
            .values()
            .flat_map(|c| c.tokens.iter().map(|r| r.token.clone()))
            .collect();
        tokens.sort();
        tokens.dedup();
        tokens
    }

    pub fn metadata(&self) -> RemoteMetadata {
        metadata_of(&self.state.lock())
    }

    /// Mirror the active manifest and loaded chunks into the durable store.
    pub fn persist_mirror(&self, store: &dyn KvStore) -> HlsfResult<()> {
        let state = self.state.lock();
        if let Some(manifest) = state.manifest.as_ref() {
            store.set(KEY_REMOTE_META, &serde_json::to_string(manifest)?)?;
        }
        let chunks: Vec<&CacheChunk> = state.chunk_cache.values().collect();
        store.set(KEY_REMOTE_CHUNKS, &serde_json::to_string(&chunks)?)?;
        Ok(())
    }

    /// Restore a previously mirrored manifest + chunks.
    pub fn load_mirror(&self, store: &dyn KvStore) -> HlsfResult<bool> {
        let Some(meta_json) = store.get(KEY_REMOTE_META)? else {
            return Ok(false);
        };
        let manifest: Manifest = serde_json::from_str(&meta_json)
            .map_err(|e| HlsfError::InvalidManifest(format!("mirror: {e}")))?;
        manifest.validate().map_err(HlsfError::InvalidManifest)?;
        let chunks: Vec<CacheChunk> = match store.get(KEY_REMOTE_CHUNKS)? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| HlsfError::InvalidChunk(format!("mirror: {e}")))?,
            None => Vec::new(),
        };
        let mut state = self.state.lock();
        state.chunk_cache = chunks.into_iter().map(|c| (c.prefix.clone(), c)).collect();
        state.resolved_tokens.clear();
        state.base_url = None;
        state.manifest = Some(manifest);
        state.ready = true;
        info!("[remote] Mirror restored from durable store");
        Ok(true)
    }
}

fn metadata_of(state: &RemoteState) -> RemoteMetadata {
    match state.manifest.as_ref() {
        Some(m) => RemoteMetadata {
            ready: state.ready,
            version: m.version.clone(),
            generated_at: m.generated_at.clone(),
            source: m.source.clone(),
            total_tokens: m.total_tokens,
            total_relationships: m.total_relationships,
            chunk_count: m.chunks.len(),
            loaded_chunks: state.chunk_cache.len(),
        },
        None => RemoteMetadata {
            ready: false,
            version: String::new(),
            generated_at: String::new(),
            source: String::new(),
            total_tokens: 0,
            total_relationships: 0,
            chunk_count: 0,
            loaded_chunks: 0,
        },
    }
}

/// Export the entire token cache as a manifest + chunk files for external
/// persistence. Chunks are keyed and sorted deterministically.
pub fn export_manifest(cache: &TokenCache) -> (Manifest, Vec<CacheChunk>) {
    let recorder = ChunkRecorder::new();
    for (_, record) in cache.full_index() {
        recorder.record(&record);
    }
    let manifest = recorder.manifest();
    let chunks = manifest
        .chunks
        .iter()
        .filter_map(|entry| recorder.chunk(&entry.prefix))
        .collect();
    (manifest, chunks)
}

/// GET a URL and return the body text, retrying transient statuses.
async fn fetch_json(url: &str) -> HlsfResult<String> {
    let client = shared_client();
    let mut attempt = 0u32;
    loop {
        let response = client.get(url).send().await?;
        let status = response.status().as_u16();
        if is_retryable_status(status) && attempts_remain(attempt) {
            retry_delay(attempt, None).await;
            attempt += 1;
            continue;
        }
        if status >= 400 {
            return Err(HlsfError::InvalidManifest(format!("{url}: HTTP {status}")));
        }
        return Ok(response.text().await?);
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kv::MemoryKv;

    fn record(token: &str, edges: &[(&str, &str, f64)]) -> AdjacencyRecord {
        let mut r = AdjacencyRecord::empty(token);
        for (rel, neighbor, weight) in edges {
            r.insert_edge(rel, neighbor, *weight);
        }
        r.normalize_lists();
        r
    }

    fn store_with_recorder(records: &[AdjacencyRecord]) -> (Arc<TokenCache>, RemoteChunkStore) {
        let cache = Arc::new(TokenCache::new(Arc::new(MemoryKv::new())));
        let remote = RemoteChunkStore::new(cache.clone());
        let recorder = Arc::new(ChunkRecorder::new());
        for r in records {
            recorder.record(r);
        }
        remote.attach_recorder(recorder);
        (cache, remote)
    }

    #[test]
    fn recorder_builds_sorted_chunks_and_manifest() {
        let recorder = ChunkRecorder::new();
        recorder.record(&record("beta", &[("≡", "x", 0.9)]));
        recorder.record(&record("bravo", &[("≡", "y", 0.8)]));
        recorder.record(&record("alpha", &[("≡", "z", 0.7)]));
        recorder.record(&record("9lives", &[]));
        recorder.record(&record("~odd", &[]));

        let manifest = recorder.manifest();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.total_tokens, 5);
        let prefixes: Vec<&str> = manifest.chunks.iter().map(|c| c.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["9", "_", "a", "b"]);

        let b = recorder.chunk("b").unwrap();
        assert_eq!(b.token_count, 2);
        assert_eq!(b.tokens[0].token, "beta");
        assert_eq!(b.tokens[1].token, "bravo");
    }

    #[tokio::test]
    async fn preload_ingests_through_pruner() {
        let (cache, remote) = store_with_recorder(&[record(
            "alpha",
            &[("≡", "strong", 0.9), ("≡", "weak", 0.05)],
        )]);
        remote.apply_config(4, 0.18, 10);

        let report = remote
            .preload_tokens(&["alpha".to_string(), "alpha".to_string()])
            .await
            .unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.hits, 1);

        let cached = cache.get("alpha").unwrap();
        assert_eq!(cached.edge_weight("≡", "strong"), Some(0.9));
        // below-floor edge pruned at ingest
        assert_eq!(cached.edge_weight("≡", "weak"), None);
    }

    #[tokio::test]
    async fn preload_respects_existing_adjacency() {
        let (cache, remote) = store_with_recorder(&[record("alpha", &[("≡", "remote", 0.9)])]);
        cache
            .put(
                "alpha",
                record("alpha", &[("≡", "local", 0.8)]),
                PutOptions::default(),
            )
            .unwrap();

        let report = remote.preload_tokens(&["alpha".to_string()]).await.unwrap();
        assert_eq!(report.loaded, 0);
        assert_eq!(report.hits, 1);
        let cached = cache.get("alpha").unwrap();
        assert_eq!(cached.edge_weight("≡", "local"), Some(0.8));
        assert_eq!(cached.edge_weight("≡", "remote"), None);
    }

    #[tokio::test]
    async fn unknown_tokens_fall_back_to_underscore_then_first() {
        let (cache, remote) = store_with_recorder(&[
            record("~odd", &[("≡", "x", 0.9)]),
            record("alpha", &[("≡", "y", 0.9)]),
        ]);
        // "Ωmega" prefixes to "_" which exists in the recorder manifest
        let report = remote.preload_tokens(&["Ωmega".to_string()]).await.unwrap();
        assert_eq!(report.loaded, 0);
        assert_eq!(report.hits, 0);
        assert!(!cache.has("Ωmega"));
    }

    #[tokio::test]
    async fn not_ready_preload_is_a_noop() {
        let cache = Arc::new(TokenCache::new(Arc::new(MemoryKv::new())));
        let remote = RemoteChunkStore::new(cache);
        let report = remote.preload_tokens(&["alpha".to_string()]).await.unwrap();
        assert_eq!(report, PreloadReport::default());
        assert!(!remote.is_ready());
    }

    #[test]
    fn metadata_reflects_manifest() {
        let (_cache, remote) = store_with_recorder(&[record("alpha", &[("≡", "x", 0.9)])]);
        let meta = remote.metadata();
        assert!(meta.ready);
        assert_eq!(meta.version, MANIFEST_VERSION);
        assert_eq!(meta.total_tokens, 1);
        assert_eq!(meta.chunk_count, 1);
    }

    #[test]
    fn list_tokens_prefers_manifest_index() {
        let (_cache, remote) = store_with_recorder(&[
            record("beta", &[]),
            record("alpha", &[]),
        ]);
        assert_eq!(remote.list_tokens(), vec!["alpha", "beta"]);
    }

    #[test]
    fn mirror_roundtrip() {
        let (_cache, remote) = store_with_recorder(&[record("alpha", &[("≡", "x", 0.9)])]);
        let kv = MemoryKv::new();
        remote.persist_mirror(&kv).unwrap();

        let cache2 = Arc::new(TokenCache::new(Arc::new(MemoryKv::new())));
        let remote2 = RemoteChunkStore::new(cache2);
        assert!(remote2.load_mirror(&kv).unwrap());
        assert!(remote2.is_ready());
        assert_eq!(remote2.metadata().total_tokens, 1);
    }

    #[test]
    fn export_reproduces_chunk_shape() {
        let cache = Arc::new(TokenCache::new(Arc::new(MemoryKv::new())));
        cache
            .put(
                "alpha",
                record("alpha", &[("≡", "x", 0.9)]),
                PutOptions { defer_reload: true },
            )
            .unwrap();
        cache
            .put(
                "beta",
                record("beta", &[("→", "y", 0.7)]),
                PutOptions { defer_reload: true },
            )
            .unwrap();
        let (manifest, chunks) = export_manifest(&cache);
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.total_tokens, 2);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.token_count == 1));
    }
}
