// ── Adjacency Fetcher ──────────────────────────────────────────────────────
//
// Resolves one token to a normalized adjacency record through the state
// machine:
//
//   Cached ──────────────► return cached record (variant-filtered)
//   RemoteWarm ──────────► preload the token's chunk, retry the cache
//   Llm ─────────────────► collaborator call → parse → variant filter
//                          → prune → cache write
//
// Network and parse failures become value records (`offline`, `error`) —
// only cancellation, invalid input, and terminal collaborator errors
// propagate as `Err`. At most one collaborator request is in flight per
// `(token, context-head)`; duplicate callers wait and then hit the cache.

use crate::atoms::constants::{NETWORK_RETRY_BACKOFF_MS, SYMBOL_TOKEN_PREFIX};
use crate::atoms::error::{HlsfError, HlsfResult};
use crate::atoms::types::{normalize_token, AdjacencyRecord};
use crate::engine::cache::{PutOptions, TokenCache};
use crate::engine::cancel::CancelToken;
use crate::engine::config::CoreConfig;
use crate::engine::llm::{is_network_failure, parse_adjacency_response, AdjacencyLlm};
use crate::engine::prune::{limit_record, PruneOptions};
use crate::engine::relations::Relation;
use crate::engine::remote::{ChunkRecorder, RemoteChunkStore};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a record was obtained, alongside the record itself.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub record: AdjacencyRecord,
    /// The record came from the token cache (directly or via remote warm).
    pub cache_hit: bool,
    /// The record came from a collaborator call this fetch.
    pub llm_generated: bool,
}

pub struct AdjacencyFetcher {
    cache: Arc<TokenCache>,
    remote: Arc<RemoteChunkStore>,
    llm: Arc<dyn AdjacencyLlm>,
    config: Arc<RwLock<CoreConfig>>,
    /// Locally-generated work mirrors into this recorder for export.
    recorder: Option<Arc<ChunkRecorder>>,
    /// Memoized is-real-word verdicts for the variant filter.
    validator_memo: Mutex<HashMap<String, bool>>,
    /// Per-(token, context-head) gates: at most one collaborator request in
    /// flight for the same work.
    inflight: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Offline until this instant after a network failure.
    offline_until: Mutex<Option<Instant>>,
}

impl AdjacencyFetcher {
    pub fn new(
        cache: Arc<TokenCache>,
        remote: Arc<RemoteChunkStore>,
        llm: Arc<dyn AdjacencyLlm>,
        config: Arc<RwLock<CoreConfig>>,
        recorder: Option<Arc<ChunkRecorder>>,
    ) -> Self {
        AdjacencyFetcher {
            cache,
            remote,
            llm,
            config,
            recorder,
            validator_memo: Mutex::new(HashMap::new()),
            inflight: tokio::sync::Mutex::new(HashMap::new()),
            offline_until: Mutex::new(None),
        }
    }

    /// Whether the fetcher is inside its post-failure offline window.
    pub fn is_offline(&self) -> bool {
        (*self.offline_until.lock()).is_some_and(|until| Instant::now() < until)
    }

    fn mark_offline(&self) {
        *self.offline_until.lock() =
            Some(Instant::now() + Duration::from_millis(NETWORK_RETRY_BACKOFF_MS));
        warn!(
            "[fetch] Network failure — offline for {}ms",
            NETWORK_RETRY_BACKOFF_MS
        );
    }

    /// Fetch one token's adjacency record.
    pub async fn fetch(
        &self,
        token: &str,
        context: &str,
        cancel: &CancelToken,
    ) -> HlsfResult<FetchOutcome> {
        if cancel.is_cancelled() {
            return Err(HlsfError::Aborted);
        }
        let token = normalize_token(token)
            .ok_or_else(|| HlsfError::invalid_token(format!("empty token {token:?}")))?;

        // Symbol tokens are opaque: empty record, no store traffic.
        if token.starts_with(SYMBOL_TOKEN_PREFIX) {
            return Ok(FetchOutcome {
                record: AdjacencyRecord::empty(token),
                cache_hit: false,
                llm_generated: false,
            });
        }

        // ── Cached ───────────────────────────────────────────────────────
        if let Some(outcome) = self.try_cached(&token).await? {
            return Ok(outcome);
        }

        // ── RemoteWarm ───────────────────────────────────────────────────
        if self.remote.is_ready() {
            self.remote.preload_tokens(&[token.clone()]).await?;
            if let Some(outcome) = self.try_cached(&token).await? {
                return Ok(outcome);
            }
        }

        // ── Llm ──────────────────────────────────────────────────────────
        if self.is_offline() || !self.llm.is_configured() {
            return Ok(FetchOutcome {
                record: AdjacencyRecord::offline(token),
                cache_hit: false,
                llm_generated: false,
            });
        }

        // One in-flight collaborator request per (token, context-head).
        let gate_key = format!("{token}\u{1}{}", context_head(context));
        let gate = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(gate_key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        // A duplicate caller may have populated the cache while we waited.
        if let Some(outcome) = self.try_cached(&token).await? {
            self.release_gate(&gate_key).await;
            return Ok(outcome);
        }
        if cancel.is_cancelled() {
            self.release_gate(&gate_key).await;
            return Err(HlsfError::Aborted);
        }

        let result = self.fetch_from_llm(&token, context, cancel).await;
        self.release_gate(&gate_key).await;
        result
    }

    async fn release_gate(&self, key: &str) {
        self.inflight.lock().await.remove(key);
    }

    /// Cached-state handling: variant-filter the record and rewrite the
    /// cache when the filter removed edges.
    async fn try_cached(&self, token: &str) -> HlsfResult<Option<FetchOutcome>> {
        let Some(mut record) = self.cache.get(token) else {
            return Ok(None);
        };
        if self.variant_filter(&mut record).await {
            record.normalize_lists();
            self.cache
                .put(token, record.clone(), PutOptions::default())?;
            debug!("[fetch] Variant filter rewrote cached {token:?}");
        }
        Ok(Some(FetchOutcome {
            record,
            cache_hit: true,
            llm_generated: false,
        }))
    }

    async fn fetch_from_llm(
        &self,
        token: &str,
        context: &str,
        cancel: &CancelToken,
    ) -> HlsfResult<FetchOutcome> {
        let response = match self.llm.expand_token(token, context).await {
            Ok(text) => text,
            Err(e) if is_network_failure(&e) => {
                self.mark_offline();
                return Ok(FetchOutcome {
                    record: AdjacencyRecord::offline(token),
                    cache_hit: false,
                    llm_generated: false,
                });
            }
            Err(e) => return Err(e),
        };
        if cancel.is_cancelled() {
            return Err(HlsfError::Aborted);
        }

        let mut record = match parse_adjacency_response(token, &response) {
            Ok(record) => record,
            Err(HlsfError::ParseFailed(detail)) => {
                // Stored, counted, never treated as growth.
                warn!("[fetch] Parse failed for {token:?}: {detail}");
                let failed = AdjacencyRecord::parse_failed(token);
                self.cache.put(token, failed.clone(), PutOptions::default())?;
                return Ok(FetchOutcome {
                    record: failed,
                    cache_hit: false,
                    llm_generated: true,
                });
            }
            Err(e) => return Err(e),
        };

        self.variant_filter(&mut record).await;

        let opts = {
            let cfg = self.config.read();
            PruneOptions {
                edge_cap: cfg.max_edges,
                priority_tokens: Vec::new(),
                relationship_budget: cfg.max_relationships,
                weight_floor: cfg.prune_weight_threshold,
            }
        };
        let pruned = limit_record(&record, &opts);

        let grew = self
            .cache
            .put(token, pruned.clone(), PutOptions::default())?;
        if let Some(recorder) = &self.recorder {
            recorder.record(&pruned);
        }
        info!(
            "[fetch] Collaborator expanded {token:?}: {} edges{}",
            pruned.total_relationships,
            if grew { " (grew)" } else { "" }
        );
        Ok(FetchOutcome {
            record: pruned,
            cache_hit: false,
            llm_generated: true,
        })
    }

    /// Drop `≈` (variant) edges whose neighbor the validator rejects.
    /// Verdicts are memoized per neighbor; validator outages fail open.
    /// Returns whether any edge was removed.
    async fn variant_filter(&self, record: &mut AdjacencyRecord) -> bool {
        let variant_keys: Vec<String> = record
            .relationships
            .keys()
            .filter(|k| Relation::normalize(k) == Some(Relation::Variant))
            .cloned()
            .collect();
        if variant_keys.is_empty() {
            return false;
        }

        let mut changed = false;
        for key in variant_keys {
            let Some(list) = record.relationships.get(&key) else {
                continue;
            };
            let neighbors: Vec<String> = list.iter().map(|e| e.neighbor.clone()).collect();
            let mut keep: HashMap<String, bool> = HashMap::new();
            for neighbor in neighbors {
                let verdict = self.real_word_verdict(&neighbor).await;
                keep.insert(neighbor, verdict);
            }
            if let Some(list) = record.relationships.get_mut(&key) {
                let before = list.len();
                list.retain(|e| keep.get(&e.neighbor).copied().unwrap_or(true));
                if list.len() != before {
                    changed = true;
                }
            }
        }
        if changed {
            record.normalize_lists();
        }
        changed
    }

    async fn real_word_verdict(&self, neighbor: &str) -> bool {
        if let Some(verdict) = self.validator_memo.lock().get(neighbor) {
            return *verdict;
        }
        match self.llm.is_real_word(neighbor).await {
            Ok(verdict) => {
                self.validator_memo
                    .lock()
                    .insert(neighbor.to_string(), verdict);
                verdict
            }
            Err(e) => {
                debug!("[fetch] Validator unavailable for {neighbor:?} ({e}); keeping edge");
                true
            }
        }
    }
}

/// The first line of context, truncated to 80 characters — the identity
/// used for in-flight deduplication and synthetic-branch caching.
pub fn context_head(context: &str) -> String {
    let line = context.lines().next().unwrap_or_default();
    line.chars().take(80).collect()
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════
