// ── Token Cache ────────────────────────────────────────────────────────────
//
// Per-token adjacency records, durable through the key/value store, with an
// in-memory overlay that absorbs writes when the durable store runs out of
// quota. The cache is the single writer for record bytes; the fetcher and
// the expander serialize their writes through it.
//
// `put` maintains a global DB snapshot and applies the Global Connection
// Rule: every pair of cached records is linked in both directions by a
// global-connect edge of weight ≥ 0.05. The rule is idempotent — it only
// touches edges that are missing or weaker than the floor.

use crate::atoms::constants::{
    GLOBAL_CONNECT_WEIGHT, KEY_DB_SNAPSHOT, KEY_TOKEN_INDEX, KEY_TOKEN_PREFIX,
};
use crate::atoms::error::{HlsfError, HlsfResult};
use crate::atoms::types::{AdjacencyRecord, DbSnapshot};
use crate::engine::kv::KvStore;
use crate::engine::relations::GLYPH_GLOBAL_CONNECT;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Options for `TokenCache::put`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Skip the snapshot merge and global-connection pass. Bulk ingest sets
    /// this and calls `index_rebuild` once at the end.
    pub defer_reload: bool,
}

pub struct TokenCache {
    store: Arc<dyn KvStore>,
    /// Records that could not reach the durable store, plus nothing else —
    /// reads check here first.
    overlay: Mutex<HashMap<String, AdjacencyRecord>>,
    /// Lazily-loaded mirror of the durable DB snapshot.
    snapshot: Mutex<Option<DbSnapshot>>,
    /// Session cache-hit counter.
    cache_hits: AtomicU64,
    quota_warned: AtomicBool,
}

impl TokenCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        TokenCache {
            store,
            overlay: Mutex::new(HashMap::new()),
            snapshot: Mutex::new(None),
            cache_hits: AtomicU64::new(0),
            quota_warned: AtomicBool::new(false),
        }
    }

    fn record_key(token: &str) -> String {
        format!("{KEY_TOKEN_PREFIX}{}", token.to_lowercase())
    }

    /// Number of cache hits this session.
    pub fn session_cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Fetch a record. Overlay wins over the durable store; decode errors
    /// read as absent. Never fails.
    pub fn get(&self, token: &str) -> Option<AdjacencyRecord> {
        if let Some(record) = self.overlay.lock().get(token) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(record.clone());
        }
        let raw = self.store.get(&Self::record_key(token)).ok().flatten()?;
        match serde_json::from_str::<AdjacencyRecord>(&raw) {
            Ok(record) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                Some(record)
            }
            Err(e) => {
                debug!("[cache] Undecodable record for {token:?}: {e}");
                None
            }
        }
    }

    /// Whether a record exists, without counting a session hit.
    pub fn has(&self, token: &str) -> bool {
        if self.overlay.lock().contains_key(token) {
            return true;
        }
        matches!(self.store.get(&Self::record_key(token)), Ok(Some(_)))
    }

    /// Whether a token is cached with at least one edge. The remote store
    /// consults this before overwriting local work with chunk data.
    pub fn has_adjacency(&self, token: &str) -> bool {
        if let Some(record) = self.overlay.lock().get(token) {
            return record.has_adjacency();
        }
        self.store
            .get(&Self::record_key(token))
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str::<AdjacencyRecord>(&raw).ok())
            .map(|r| r.has_adjacency())
            .unwrap_or(false)
    }

    /// Write a record. Returns whether its adjacency grew relative to the
    /// prior record. Rejects structurally invalid records without mutation;
    /// falls back to the overlay on quota exhaustion.
    pub fn put(
        &self,
        token: &str,
        mut record: AdjacencyRecord,
        opts: PutOptions,
    ) -> HlsfResult<bool> {
        record.normalize_lists();
        record
            .validate()
            .map_err(|e| HlsfError::InvalidToken(format!("{token}: {e}")))?;
        if record.cached_at.is_none() {
            record.cached_at = Some(chrono::Utc::now().to_rfc3339());
        }

        let prior = self.peek(token);
        let grew = match &prior {
            Some(prev) => record.grew_from(prev),
            None => record.has_adjacency(),
        };

        if opts.defer_reload {
            self.persist(token, &record);
            return Ok(grew);
        }

        // Merge into the snapshot and run the global-connection pass.
        let changed = {
            let mut guard = self.snapshot.lock();
            let snapshot = guard.get_or_insert_with(|| self.load_snapshot());
            let changed = apply_global_connection_rule(snapshot, &mut record);
            upsert_snapshot_entry(snapshot, &record);
            self.persist_snapshot(snapshot);
            changed
        };

        self.persist(token, &record);
        for other in changed {
            self.persist(&other.token, &other);
        }
        Ok(grew)
    }

    /// Read without counting a hit (internal).
    fn peek(&self, token: &str) -> Option<AdjacencyRecord> {
        if let Some(record) = self.overlay.lock().get(token) {
            return Some(record.clone());
        }
        let raw = self.store.get(&Self::record_key(token)).ok().flatten()?;
        serde_json::from_str(&raw).ok()
    }

    fn persist(&self, token: &str, record: &AdjacencyRecord) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                warn!("[cache] Serialize failed for {token:?}: {e}");
                return;
            }
        };
        match self.store.set(&Self::record_key(token), &json) {
            Ok(()) => {
                // Durable write supersedes any stale overlay copy.
                self.overlay.lock().remove(token);
            }
            Err(HlsfError::QuotaExceeded) => {
                if !self.quota_warned.swap(true, Ordering::Relaxed) {
                    warn!("[cache] Durable store quota exhausted — keeping new records in memory only");
                }
                self.overlay.lock().insert(token.to_string(), record.clone());
            }
            Err(e) => {
                warn!("[cache] Durable write failed for {token:?}: {e}");
                self.overlay.lock().insert(token.to_string(), record.clone());
            }
        }
    }

    fn load_snapshot(&self) -> DbSnapshot {
        match self.store.get(KEY_DB_SNAPSHOT) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            _ => DbSnapshot::default(),
        }
    }

    fn persist_snapshot(&self, snapshot: &DbSnapshot) {
        if let Ok(json) = serde_json::to_string(snapshot) {
            match self.store.set(KEY_DB_SNAPSHOT, &json) {
                Ok(()) => {}
                Err(HlsfError::QuotaExceeded) => {
                    if !self.quota_warned.swap(true, Ordering::Relaxed) {
                        warn!("[cache] Durable store quota exhausted — snapshot kept in memory only");
                    }
                }
                Err(e) => warn!("[cache] Snapshot persist failed: {e}"),
            }
        }
    }

    /// All cached tokens, optionally filtered by token prefix, ascending.
    pub fn list(&self, prefix: Option<&str>) -> Vec<String> {
        let mut tokens: BTreeSet<String> = self
            .store
            .keys(KEY_TOKEN_PREFIX)
            .unwrap_or_default()
            .into_iter()
            .filter(|k| k.as_str() != KEY_TOKEN_INDEX)
            .filter_map(|k| k.strip_prefix(KEY_TOKEN_PREFIX).map(str::to_string))
            .collect();
        tokens.extend(self.overlay.lock().keys().cloned());
        tokens
            .into_iter()
            .filter(|t| prefix.map_or(true, |p| t.starts_with(p)))
            .collect()
    }

    /// Remove a set of tokens from the overlay, the durable store, and the
    /// snapshot.
    pub fn remove_many(&self, tokens: &[String]) -> HlsfResult<usize> {
        let mut removed = 0usize;
        {
            let mut overlay = self.overlay.lock();
            for token in tokens {
                if overlay.remove(token).is_some() {
                    removed += 1;
                }
            }
        }
        for token in tokens {
            if self.store.get(&Self::record_key(token))?.is_some() {
                removed += 1;
            }
            self.store.remove(&Self::record_key(token))?;
        }
        {
            let mut guard = self.snapshot.lock();
            let snapshot = guard.get_or_insert_with(|| self.load_snapshot());
            let drop: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
            snapshot
                .full_token_data
                .retain(|r| !drop.contains(r.token.as_str()));
            self.persist_snapshot(snapshot);
        }
        Ok(removed)
    }

    /// Drop every cached record, the snapshot, and the index.
    pub fn reset(&self) -> HlsfResult<usize> {
        let tokens = self.list(None);
        let count = tokens.len();
        self.remove_many(&tokens)?;
        self.store.remove(KEY_DB_SNAPSHOT)?;
        self.store.remove(KEY_TOKEN_INDEX)?;
        *self.snapshot.lock() = None;
        Ok(count)
    }

    /// Walk the durable store and emit the sorted token index.
    pub fn index_rebuild(&self) -> HlsfResult<Vec<String>> {
        let tokens = self.list(None);
        let json = serde_json::to_string(&tokens)?;
        if let Err(e) = self.store.set(KEY_TOKEN_INDEX, &json) {
            warn!("[cache] Token index persist failed: {e}");
        }
        Ok(tokens)
    }

    /// Materialize every cached record into a map, overlay included.
    /// The assembler and layout planner consume this as their index.
    pub fn full_index(&self) -> HashMap<String, AdjacencyRecord> {
        let mut index = HashMap::new();
        for token in self.list(None) {
            if let Some(record) = self.peek(&token) {
                index.insert(token, record);
            }
        }
        index
    }
}

/// Ensure bidirectional global-connect edges between `record` and every
/// other snapshot entry. Returns the other records that changed (they need
/// re-persisting). Only missing edges or edges weaker than the floor are
/// touched, which keeps repeated application a no-op.
fn apply_global_connection_rule(
    snapshot: &mut DbSnapshot,
    record: &mut AdjacencyRecord,
) -> Vec<AdjacencyRecord> {
    let mut changed = Vec::new();
    for other in snapshot.full_token_data.iter_mut() {
        if other.token == record.token {
            continue;
        }
        let mut other_changed = false;
        if needs_global_edge(other, &record.token) {
            other.insert_edge(GLYPH_GLOBAL_CONNECT, &record.token, GLOBAL_CONNECT_WEIGHT);
            other.normalize_lists();
            other_changed = true;
        }
        if needs_global_edge(record, &other.token) {
            record.insert_edge(GLYPH_GLOBAL_CONNECT, &other.token, GLOBAL_CONNECT_WEIGHT);
        }
        if other_changed {
            changed.push(other.clone());
        }
    }
    record.normalize_lists();
    changed
}

fn needs_global_edge(record: &AdjacencyRecord, neighbor: &str) -> bool {
    match record.edge_weight(GLYPH_GLOBAL_CONNECT, neighbor) {
        Some(w) => w < GLOBAL_CONNECT_WEIGHT,
        None => true,
    }
}

fn upsert_snapshot_entry(snapshot: &mut DbSnapshot, record: &AdjacencyRecord) {
    match snapshot
        .full_token_data
        .iter_mut()
        .find(|r| r.token == record.token)
    {
        Some(slot) => *slot = record.clone(),
        None => snapshot.full_token_data.push(record.clone()),
    }
    snapshot.full_token_data.sort_by(|a, b| a.token.cmp(&b.token));
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kv::MemoryKv;

    fn cache() -> TokenCache {
        TokenCache::new(Arc::new(MemoryKv::new()))
    }

    fn record(token: &str, edges: &[(&str, &str, f64)]) -> AdjacencyRecord {
        let mut r = AdjacencyRecord::empty(token);
        for (rel, neighbor, weight) in edges {
            r.insert_edge(rel, neighbor, *weight);
        }
        r.normalize_lists();
        r
    }

    #[test]
    fn get_miss_then_hit_counts() {
        let tc = cache();
        assert!(tc.get("alpha").is_none());
        assert_eq!(tc.session_cache_hits(), 0);

        tc.put("alpha", record("alpha", &[("≡", "beta", 0.9)]), PutOptions::default())
            .unwrap();
        let got = tc.get("alpha").unwrap();
        assert_eq!(got.edge_weight("≡", "beta"), Some(0.9));
        assert!(got.cached_at.is_some());
        assert_eq!(tc.session_cache_hits(), 1);
    }

    #[test]
    fn growth_detection() {
        let tc = cache();
        let grew = tc
            .put("alpha", record("alpha", &[("≡", "beta", 0.5)]), PutOptions::default())
            .unwrap();
        assert!(grew);

        // identical write: no growth
        let again = tc.get("alpha").unwrap();
        let grew = tc.put("alpha", again, PutOptions::default()).unwrap();
        assert!(!grew);

        // stronger weight: growth
        let grew = tc
            .put("alpha", record("alpha", &[("≡", "beta", 0.8)]), PutOptions::default())
            .unwrap();
        assert!(grew);
    }

    #[test]
    fn put_get_put_is_stable() {
        let tc = cache();
        tc.put("alpha", record("alpha", &[("≡", "beta", 0.9)]), PutOptions::default())
            .unwrap();
        tc.put("gamma", record("gamma", &[("→", "delta", 0.7)]), PutOptions::default())
            .unwrap();

        let first = tc.get("alpha").unwrap();
        tc.put("alpha", first.clone(), PutOptions::default()).unwrap();
        let second = tc.get("alpha").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn global_connection_rule_links_pairs() {
        let tc = cache();
        tc.put("alpha", record("alpha", &[("≡", "x", 0.9)]), PutOptions::default())
            .unwrap();
        tc.put("gamma", record("gamma", &[("→", "y", 0.7)]), PutOptions::default())
            .unwrap();

        let alpha = tc.get("alpha").unwrap();
        let gamma = tc.get("gamma").unwrap();
        assert_eq!(alpha.edge_weight("∼", "gamma"), Some(GLOBAL_CONNECT_WEIGHT));
        assert_eq!(gamma.edge_weight("∼", "alpha"), Some(GLOBAL_CONNECT_WEIGHT));
    }

    #[test]
    fn global_connection_preserves_stronger_edges() {
        let tc = cache();
        tc.put("alpha", record("alpha", &[("∼", "gamma", 0.9)]), PutOptions::default())
            .unwrap();
        tc.put("gamma", record("gamma", &[("≡", "z", 0.6)]), PutOptions::default())
            .unwrap();
        let alpha = tc.get("alpha").unwrap();
        assert_eq!(alpha.edge_weight("∼", "gamma"), Some(0.9));
    }

    #[test]
    fn stored_records_always_validate() {
        let tc = cache();
        // Malformed input (NaN weight, stale count) is repaired or rejected,
        // never stored broken.
        let mut messy = AdjacencyRecord::empty("alpha");
        messy
            .relationships
            .insert("≡".into(), vec![crate::atoms::types::Edge::new("beta", f64::NAN)]);
        messy.total_relationships = 99;
        let _ = tc.put("alpha", messy, PutOptions::default());
        if let Some(r) = tc.get("alpha") {
            assert!(r.validate().is_ok());
        }
    }

    #[test]
    fn quota_falls_back_to_overlay_once() {
        let tc = TokenCache::new(Arc::new(MemoryKv::with_quota(1)));
        tc.put("alpha", record("alpha", &[("≡", "beta", 0.9)]), PutOptions::default())
            .unwrap();
        // durable store rejected the write; overlay serves it
        let got = tc.get("alpha").unwrap();
        assert_eq!(got.edge_weight("≡", "beta"), Some(0.9));
        assert!(tc.has("alpha"));
    }

    #[test]
    fn list_and_index_rebuild() {
        let tc = cache();
        tc.put("beta", record("beta", &[]), PutOptions::default()).unwrap();
        tc.put("alpha", record("alpha", &[]), PutOptions::default()).unwrap();
        tc.put("bravo", record("bravo", &[]), PutOptions::default()).unwrap();

        assert_eq!(tc.list(None), vec!["alpha", "beta", "bravo"]);
        assert_eq!(tc.list(Some("b")), vec!["beta", "bravo"]);

        let index = tc.index_rebuild().unwrap();
        assert_eq!(index, vec!["alpha", "beta", "bravo"]);
    }

    #[test]
    fn remove_many_cascades_to_snapshot() {
        let tc = cache();
        tc.put("alpha", record("alpha", &[("≡", "x", 0.9)]), PutOptions::default())
            .unwrap();
        tc.put("gamma", record("gamma", &[("≡", "y", 0.9)]), PutOptions::default())
            .unwrap();
        tc.remove_many(&["alpha".to_string()]).unwrap();
        assert!(!tc.has("alpha"));
        assert!(tc.has("gamma"));
        let index = tc.full_index();
        assert!(!index.contains_key("alpha"));
    }

    #[test]
    fn defer_reload_skips_global_connection() {
        let tc = cache();
        tc.put("alpha", record("alpha", &[("≡", "x", 0.9)]), PutOptions::default())
            .unwrap();
        tc.put(
            "gamma",
            record("gamma", &[("→", "y", 0.7)]),
            PutOptions { defer_reload: true },
        )
        .unwrap();
        let gamma = tc.get("gamma").unwrap();
        assert_eq!(gamma.edge_weight("∼", "alpha"), None);
    }
}
