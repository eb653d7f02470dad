// ── Recursive Expander ─────────────────────────────────────────────────────
//
// Schedules adjacency fetches over a FIFO frontier bounded by depth, node
// cap, edge cap, relationship budget, and seed-spawn limit. Results merge
// into one record map with per-token provenance; connectivity and
// completeness are re-evaluated as the frontier drains.
//
// Per-token failures never abort the run — errors land in provenance and
// the scheduler continues. Cancellation drops the rest of the queue;
// records already fetched stand.
//
// The synthetic branch generator keeps every expanded record at the
// minimum branching factor: missing neighbors come from the collaborator
// (cached per (token, context-head)), or from deterministic Greek-suffixed
// names when the collaborator is unavailable.

use crate::atoms::constants::MAX_EXPANSION_DEPTH;
use crate::atoms::error::{HlsfError, HlsfResult};
use crate::atoms::types::{
    normalize_token, AdjacencyRecord, ExpansionStats, FetchProvenance,
};
use crate::engine::cache::{PutOptions, TokenCache};
use crate::engine::cancel::CancelToken;
use crate::engine::config::CoreConfig;
use crate::engine::fetcher::{context_head, AdjacencyFetcher};
use crate::engine::llm::AdjacencyLlm;
use crate::engine::prune::{limit_record, PruneOptions};
use crate::engine::relations::GLYPH_GLOBAL_CONNECT;
use crate::engine::remote::RemoteChunkStore;
use futures::future::join_all;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Greek suffixes for deterministic synthetic branch names.
const SYNTH_SUFFIXES: [&str; 12] = ["α", "β", "γ", "δ", "ε", "ζ", "η", "θ", "ι", "κ", "λ", "μ"];

/// Per-run expansion inputs.
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    /// Recursion depth; clamped to [0, 8].
    pub depth: u32,
    /// Edge cap handed to the pruner per record.
    pub edges_per_level: usize,
    /// Fetches in flight per batch.
    pub concurrency: usize,
    /// Minimum branching factor; also caps enqueued children per record.
    pub spawn_limit: usize,
    /// Stop as soon as all seeds share a connected component.
    pub stop_when_connected: bool,
    /// With `stop_when_connected`, require the full directed clique instead.
    pub require_complete_graph: bool,
    /// Stage records from the provided DB index before fetching.
    pub prefer_db: bool,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        ExpandOptions {
            depth: 2,
            edges_per_level: 6,
            concurrency: 4,
            spawn_limit: 3,
            stop_when_connected: false,
            require_complete_graph: false,
            prefer_db: false,
        }
    }
}

impl ExpandOptions {
    /// Derive the per-run knobs from the live config.
    pub fn from_config(config: &CoreConfig) -> Self {
        ExpandOptions {
            depth: config.adjacency_recursion_depth,
            edges_per_level: config.adjacency_edges_per_level,
            concurrency: config.remote_chunk_concurrency.max(1),
            spawn_limit: config.adjacency_spawn_limit as usize,
            ..Default::default()
        }
    }
}

/// What an expansion run produced.
#[derive(Debug, Clone, Default)]
pub struct ExpansionResult {
    pub records: BTreeMap<String, AdjacencyRecord>,
    pub provenance: FetchProvenance,
    pub stats: ExpansionStats,
}

pub struct RecursiveExpander {
    fetcher: Arc<AdjacencyFetcher>,
    cache: Arc<TokenCache>,
    remote: Arc<RemoteChunkStore>,
    llm: Arc<dyn AdjacencyLlm>,
    config: Arc<RwLock<CoreConfig>>,
    /// Synthetic branch cache per (token, context-head).
    synth_memo: Mutex<HashMap<String, Vec<String>>>,
}

impl RecursiveExpander {
    pub fn new(
        fetcher: Arc<AdjacencyFetcher>,
        cache: Arc<TokenCache>,
        remote: Arc<RemoteChunkStore>,
        llm: Arc<dyn AdjacencyLlm>,
        config: Arc<RwLock<CoreConfig>>,
    ) -> Self {
        RecursiveExpander {
            fetcher,
            cache,
            remote,
            llm,
            config,
            synth_memo: Mutex::new(HashMap::new()),
        }
    }

    /// Run one expansion over `seeds`.
    pub async fn expand(
        &self,
        seeds: &[String],
        context: &str,
        opts: &ExpandOptions,
        db_index: Option<&HashMap<String, AdjacencyRecord>>,
        cancel: &CancelToken,
    ) -> HlsfResult<ExpansionResult> {
        let seeds: Vec<String> = {
            let mut seen = HashSet::new();
            seeds
                .iter()
                .filter_map(|s| normalize_token(s))
                .filter(|t| seen.insert(t.clone()))
                .collect()
        };
        if seeds.is_empty() {
            return Err(HlsfError::InvalidPrompt("no expansion seeds".into()));
        }

        let depth = opts.depth.min(MAX_EXPANSION_DEPTH);
        let (max_nodes, max_edges, max_relationships) = {
            let cfg = self.config.read();
            (cfg.max_nodes, cfg.max_edges, cfg.max_relationships)
        };

        let mut result = ExpansionResult::default();
        result.stats.seed_count = seeds.len();

        let mut queue: VecDeque<(String, u32)> =
            seeds.iter().map(|s| (s.clone(), depth)).collect();
        let mut queued: HashSet<String> = seeds.iter().cloned().collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut edge_total = 0usize;

        'outer: while !queue.is_empty() {
            if cancel.is_cancelled() {
                result.stats.cancelled = true;
                queue.clear();
                break;
            }
            if self.satisfied(&result.records, &seeds, opts) {
                queue.clear();
                break;
            }
            if result.records.len() >= max_nodes {
                result.stats.budget_exhausted = true;
                queue.clear();
                break;
            }

            // ── Pop a batch of unvisited items ───────────────────────────
            let mut batch: Vec<(String, u32)> = Vec::new();
            while batch.len() < opts.concurrency.max(1) {
                let Some((token, remaining)) = queue.pop_front() else {
                    break;
                };
                if visited.contains(&token) {
                    continue;
                }
                batch.push((token, remaining));
            }
            if batch.is_empty() {
                break;
            }

            // ── Optional DB staging before the fetch ─────────────────────
            if opts.prefer_db {
                for (token, _) in &batch {
                    if self.cache.has(token) {
                        continue;
                    }
                    match db_index.and_then(|idx| idx.get(token)) {
                        Some(record) => {
                            self.cache
                                .put(token, record.clone(), PutOptions { defer_reload: true })
                                .ok();
                        }
                        None => {
                            if self.remote.is_ready() {
                                self.remote.preload_tokens(&[token.clone()]).await.ok();
                            }
                        }
                    }
                }
            }

            // ── Parallel fetch ───────────────────────────────────────────
            let fetches = batch
                .iter()
                .map(|(token, _)| self.fetcher.fetch(token, context, cancel));
            let outcomes = join_all(fetches).await;

            for ((token, remaining), outcome) in batch.into_iter().zip(outcomes) {
                visited.insert(token.clone());
                result.stats.expansions += 1;

                let record = match outcome {
                    Ok(outcome) => {
                        if outcome.record.offline {
                            result.provenance.offline.insert(token.clone());
                        }
                        if outcome.cache_hit {
                            result.provenance.cache_hits.insert(token.clone());
                        }
                        if outcome.llm_generated {
                            result.provenance.llm_generated.insert(token.clone());
                        }
                        if let Some(error) = &outcome.record.error {
                            result
                                .provenance
                                .errors
                                .insert(token.clone(), error.clone());
                        }
                        outcome.record
                    }
                    Err(HlsfError::Aborted) => {
                        result.stats.cancelled = true;
                        queue.clear();
                        break 'outer;
                    }
                    Err(e) => {
                        // Per-token failure: record and continue.
                        result
                            .provenance
                            .errors
                            .insert(token.clone(), e.to_string());
                        let mut failed = AdjacencyRecord::empty(&token);
                        failed.error = Some(e.to_string());
                        result.records.insert(token.clone(), failed);
                        continue;
                    }
                };

                // Per-level prune with seeds as priority tokens, then the
                // minimum-branching pass.
                let prune_opts = {
                    let cfg = self.config.read();
                    PruneOptions {
                        edge_cap: opts.edges_per_level,
                        priority_tokens: seeds.clone(),
                        relationship_budget: max_relationships,
                        weight_floor: cfg.prune_weight_threshold,
                    }
                };
                let mut limited = limit_record(&record, &prune_opts);
                self.ensure_branching(&mut limited, opts.spawn_limit, context, &mut result)
                    .await;

                edge_total += limited.edge_count();
                result.records.insert(token.clone(), limited);

                // ── Frontier growth ──────────────────────────────────────
                if remaining > 0 {
                    let neighbors = ordered_neighbors(&result.records[&token]);
                    let mut spawned = 0usize;
                    for neighbor in neighbors {
                        if spawned >= opts.spawn_limit {
                            break;
                        }
                        if visited.contains(&neighbor) || queued.contains(&neighbor) {
                            continue;
                        }
                        if result.records.len() + queue.len() + 1 > max_nodes {
                            result.stats.budget_exhausted = true;
                            break;
                        }
                        queued.insert(neighbor.clone());
                        queue.push_back((neighbor, remaining - 1));
                        spawned += 1;
                    }
                }

                // ── Budget checks drain the queue ────────────────────────
                let over_relationships =
                    max_relationships.is_some_and(|cap| edge_total as u64 > cap);
                if edge_total > max_edges || over_relationships {
                    result.stats.budget_exhausted = true;
                    queue.clear();
                    break;
                }
            }

            // Cooperative yield between batches — a round never holds the
            // reactor longer than `concurrency` fetches' worth of merging.
            tokio::task::yield_now().await;
        }

        result.stats.visited_tokens = result.records.len();
        result.stats.total_edges = edge_total;
        result.stats.total_relationships = edge_total as u64;
        result.stats.connected = seeds_connected(&result.records, &seeds);
        result.stats.complete_graph = complete_graph(&result.records);
        info!(
            "[expand] {} seeds → {} tokens, {} edges (connected={}, complete={}, exhausted={})",
            result.stats.seed_count,
            result.stats.visited_tokens,
            result.stats.total_edges,
            result.stats.connected,
            result.stats.complete_graph,
            result.stats.budget_exhausted
        );
        Ok(result)
    }

    fn satisfied(
        &self,
        records: &BTreeMap<String, AdjacencyRecord>,
        seeds: &[String],
        opts: &ExpandOptions,
    ) -> bool {
        if records.is_empty() {
            return false;
        }
        if opts.stop_when_connected && opts.require_complete_graph {
            return complete_graph(records);
        }
        if opts.stop_when_connected {
            return seeds_connected(records, seeds);
        }
        false
    }

    /// Pad a record up to the minimum branching factor with synthetic
    /// global-connect neighbors.
    async fn ensure_branching(
        &self,
        record: &mut AdjacencyRecord,
        spawn_limit: usize,
        context: &str,
        result: &mut ExpansionResult,
    ) {
        // Error and offline records keep their shape — padding a failed
        // fetch would hide the failure from provenance consumers.
        if record.error.is_some() || record.offline {
            return;
        }
        let existing: HashSet<String> = record
            .relationships
            .values()
            .flat_map(|list| list.iter().map(|e| e.neighbor.clone()))
            .collect();
        if existing.len() >= spawn_limit {
            return;
        }
        let needed = spawn_limit - existing.len();

        let memo_key = format!("{}\u{1}{}", record.token, context_head(context));
        let cached: Option<Vec<String>> = self.synth_memo.lock().get(&memo_key).cloned();
        let mut names = match cached {
            Some(names) => names,
            None => {
                let names = match self
                    .llm
                    .synthetic_branches(&record.token, context, needed)
                    .await
                {
                    Ok(names) => names,
                    Err(e) => {
                        debug!(
                            "[expand] Synthetic branch generator unavailable for {:?}: {e}",
                            record.token
                        );
                        Vec::new()
                    }
                };
                self.synth_memo.lock().insert(memo_key, names.clone());
                names
            }
        };

        // Deterministic fallback names fill whatever the collaborator
        // did not provide.
        let mut suffix_iter = SYNTH_SUFFIXES.iter();
        while names.len() < needed {
            let Some(suffix) = suffix_iter.next() else { break };
            let name = format!("{} {}", record.token, suffix);
            if !names.contains(&name) {
                names.push(name);
            }
        }

        let weight = self.config.read().prune_weight_threshold;
        let mut added = 0usize;
        for name in names {
            if added >= needed {
                break;
            }
            let Some(name) = normalize_token(&name) else { continue };
            if existing.contains(&name) || name == record.token {
                continue;
            }
            record.insert_edge(GLYPH_GLOBAL_CONNECT, &name, weight);
            result.provenance.synthetic.insert(name);
            added += 1;
        }
        if added > 0 {
            record.normalize_lists();
        }
    }
}

/// Distinct neighbor tokens of a record, strongest edge first, ties by
/// neighbor then relation.
pub fn ordered_neighbors(record: &AdjacencyRecord) -> Vec<String> {
    let mut edges: Vec<(&str, &str, f64)> = record
        .relationships
        .iter()
        .flat_map(|(rel, list)| {
            list.iter()
                .map(move |e| (rel.as_str(), e.neighbor.as_str(), e.weight))
        })
        .collect();
    edges.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
            .then_with(|| a.0.cmp(b.0))
    });
    let mut seen = HashSet::new();
    edges
        .into_iter()
        .filter_map(|(_, neighbor, _)| {
            seen.insert(neighbor.to_string())
                .then(|| neighbor.to_string())
        })
        .collect()
}

/// Undirected adjacency over a record map: every edge links both
/// endpoints, whether or not the neighbor has its own record.
fn undirected_adjacency(
    records: &BTreeMap<String, AdjacencyRecord>,
) -> HashMap<String, HashSet<String>> {
    let mut adjacency: HashMap<String, HashSet<String>> = HashMap::new();
    for (token, record) in records {
        adjacency.entry(token.clone()).or_default();
        for (_, edge) in record.edges() {
            adjacency
                .entry(token.clone())
                .or_default()
                .insert(edge.neighbor.clone());
            adjacency
                .entry(edge.neighbor.clone())
                .or_default()
                .insert(token.clone());
        }
    }
    adjacency
}

/// Whether every seed lies in one connected component of the undirected
/// adjacency.
pub fn seeds_connected(records: &BTreeMap<String, AdjacencyRecord>, seeds: &[String]) -> bool {
    let present: Vec<&String> = seeds.iter().filter(|s| records.contains_key(*s)).collect();
    if present.len() < seeds.len() || present.is_empty() {
        return false;
    }
    if present.len() == 1 {
        return true;
    }
    let adjacency = undirected_adjacency(records);
    let mut reached: HashSet<&str> = HashSet::new();
    let mut stack = vec![present[0].as_str()];
    while let Some(token) = stack.pop() {
        if !reached.insert(token) {
            continue;
        }
        if let Some(neighbors) = adjacency.get(token) {
            for n in neighbors {
                if !reached.contains(n.as_str()) {
                    stack.push(n);
                }
            }
        }
    }
    present.iter().all(|s| reached.contains(s.as_str()))
}

/// Whether the visited set forms a complete directed graph: for every pair
/// `(a, b)` of record tokens, `a` has a direct edge to `b` and `b` has one
/// to `a`, under any relation.
pub fn complete_graph(records: &BTreeMap<String, AdjacencyRecord>) -> bool {
    let tokens: Vec<&String> = records.keys().collect();
    if tokens.len() < 2 {
        return !tokens.is_empty();
    }
    let out_sets: HashMap<&str, HashSet<&str>> = records
        .iter()
        .map(|(token, record)| {
            let outs: HashSet<&str> = record.edges().map(|(_, e)| e.neighbor.as_str()).collect();
            (token.as_str(), outs)
        })
        .collect();
    for a in &tokens {
        for b in &tokens {
            if a == b {
                continue;
            }
            let forward = out_sets
                .get(a.as_str())
                .is_some_and(|s| s.contains(b.as_str()));
            if !forward {
                return false;
            }
        }
    }
    true
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kv::MemoryKv;
    use crate::engine::llm::ScriptedLlm;

    struct Rig {
        cache: Arc<TokenCache>,
        llm: Arc<ScriptedLlm>,
        config: Arc<RwLock<CoreConfig>>,
        expander: RecursiveExpander,
    }

    fn rig() -> Rig {
        let cache = Arc::new(TokenCache::new(Arc::new(MemoryKv::new())));
        let remote = Arc::new(RemoteChunkStore::new(cache.clone()));
        let llm: Arc<ScriptedLlm> = Arc::new(ScriptedLlm::new());
        let config = Arc::new(RwLock::new(CoreConfig::default()));
        let fetcher = Arc::new(AdjacencyFetcher::new(
            cache.clone(),
            remote.clone(),
            llm.clone(),
            config.clone(),
            None,
        ));
        let expander = RecursiveExpander::new(fetcher, cache.clone(), remote, llm.clone(), config.clone());
        Rig {
            cache,
            llm,
            config,
            expander,
        }
    }

    #[tokio::test]
    async fn complete_graph_stop_condition() {
        let rig = rig();
        rig.llm.script_edges("a", &[("∼", "b", 0.9)]);
        rig.llm.script_edges("b", &[("∼", "a", 0.9)]);

        let opts = ExpandOptions {
            depth: 2,
            spawn_limit: 2,
            stop_when_connected: true,
            require_complete_graph: true,
            ..Default::default()
        };
        let result = rig
            .expander
            .expand(
                &["a".to_string(), "b".to_string()],
                "",
                &opts,
                None,
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.stats.seed_count, 2);
        assert_eq!(result.stats.visited_tokens, 2);
        assert_eq!(result.stats.expansions, 2);
        assert!(result.stats.complete_graph);
        assert!(result.stats.connected);
    }

    #[tokio::test]
    async fn node_budget_caps_results() {
        let rig = rig();
        rig.config.write().max_nodes = 3;
        // "x" has no scripted expansion → the branch generator pads it,
        // and its synthetic children fan out in turn.
        let opts = ExpandOptions {
            depth: 4,
            spawn_limit: 2,
            ..Default::default()
        };
        let result = rig
            .expander
            .expand(&["x".to_string()], "", &opts, None, &CancelToken::new())
            .await
            .unwrap();

        assert!(result.stats.visited_tokens <= 3);
        assert!(result.provenance.synthetic.len() >= 2);
        assert!(result.provenance.synthetic.contains("x α"));
        assert!(result.provenance.synthetic.contains("x β"));
        let x = &result.records["x"];
        assert!(x.relationships.contains_key(GLYPH_GLOBAL_CONNECT));
    }

    #[tokio::test]
    async fn synthetic_branches_prefer_collaborator() {
        let rig = rig();
        rig.llm.script_branches("x", &["left", "right"]);
        let opts = ExpandOptions {
            depth: 0,
            spawn_limit: 2,
            ..Default::default()
        };
        let result = rig
            .expander
            .expand(&["x".to_string()], "", &opts, None, &CancelToken::new())
            .await
            .unwrap();
        let x = &result.records["x"];
        assert!(x.edge_weight(GLYPH_GLOBAL_CONNECT, "left").is_some());
        assert!(x.edge_weight(GLYPH_GLOBAL_CONNECT, "right").is_some());
        assert!(result.provenance.synthetic.contains("left"));
    }

    #[tokio::test]
    async fn depth_zero_expands_only_seeds() {
        let rig = rig();
        rig.llm.script_edges("a", &[("≡", "child", 0.9), ("≡", "other", 0.8)]);
        let opts = ExpandOptions {
            depth: 0,
            spawn_limit: 2,
            ..Default::default()
        };
        let result = rig
            .expander
            .expand(&["a".to_string()], "", &opts, None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(result.stats.visited_tokens, 1);
        assert!(!result.records.contains_key("child"));
    }

    #[tokio::test]
    async fn offline_tokens_recorded_in_provenance() {
        let rig = rig();
        rig.llm
            .simulate_network_failure
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let opts = ExpandOptions {
            depth: 1,
            ..Default::default()
        };
        let result = rig
            .expander
            .expand(&["lone".to_string()], "", &opts, None, &CancelToken::new())
            .await
            .unwrap();
        assert!(result.provenance.offline.contains("lone"));
        assert!(result.records["lone"].offline);
        // offline records are not padded with synthetic branches
        assert_eq!(result.records["lone"].edge_count(), 0);
    }

    #[tokio::test]
    async fn cached_seeds_count_as_cache_hits() {
        let rig = rig();
        let mut r = AdjacencyRecord::empty("warm");
        r.insert_edge("≡", "friend", 0.9);
        r.insert_edge("≡", "buddy", 0.8);
        r.insert_edge("≡", "pal", 0.7);
        r.normalize_lists();
        rig.cache.put("warm", r, PutOptions::default()).unwrap();

        let opts = ExpandOptions {
            depth: 0,
            spawn_limit: 2,
            ..Default::default()
        };
        let result = rig
            .expander
            .expand(&["warm".to_string()], "", &opts, None, &CancelToken::new())
            .await
            .unwrap();
        assert!(result.provenance.cache_hits.contains("warm"));
        assert!(result.provenance.llm_generated.is_empty());
    }

    #[tokio::test]
    async fn prefer_db_stages_records() {
        let rig = rig();
        let mut db_index: HashMap<String, AdjacencyRecord> = HashMap::new();
        let mut staged = AdjacencyRecord::empty("staged");
        staged.insert_edge("≡", "one", 0.9);
        staged.insert_edge("≡", "two", 0.8);
        staged.insert_edge("≡", "three", 0.7);
        staged.normalize_lists();
        staged.cached_at = Some("2025-01-01T00:00:00Z".into());
        db_index.insert("staged".to_string(), staged);

        let opts = ExpandOptions {
            depth: 0,
            spawn_limit: 2,
            prefer_db: true,
            ..Default::default()
        };
        let result = rig
            .expander
            .expand(
                &["staged".to_string()],
                "",
                &opts,
                Some(&db_index),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert!(result.provenance.cache_hits.contains("staged"));
        assert_eq!(rig.llm.calls(), 0);
        assert!(rig.cache.has("staged"));
    }

    #[tokio::test]
    async fn cancellation_keeps_partial_results() {
        let rig = rig();
        let cancel = CancelToken::new();
        cancel.cancel();
        let opts = ExpandOptions::default();
        let result = rig
            .expander
            .expand(&["a".to_string()], "", &opts, None, &cancel)
            .await
            .unwrap();
        assert!(result.stats.cancelled);
        assert_eq!(result.stats.visited_tokens, 0);
    }

    #[tokio::test]
    async fn empty_seed_list_rejected() {
        let rig = rig();
        let err = rig
            .expander
            .expand(&[], "", &ExpandOptions::default(), None, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HlsfError::InvalidPrompt(_)));
    }

    #[test]
    fn connectivity_checks() {
        let mut records = BTreeMap::new();
        let mut a = AdjacencyRecord::empty("a");
        a.insert_edge("∼", "b", 0.9);
        a.normalize_lists();
        records.insert("a".to_string(), a);
        records.insert("b".to_string(), AdjacencyRecord::empty("b"));
        records.insert("c".to_string(), AdjacencyRecord::empty("c"));

        assert!(seeds_connected(&records, &["a".into(), "b".into()]));
        assert!(!seeds_connected(&records, &["a".into(), "c".into()]));
        assert!(!seeds_connected(&records, &["a".into(), "missing".into()]));
        assert!(!complete_graph(&records));

        // complete both directions for the pair
        let mut b = AdjacencyRecord::empty("b");
        b.insert_edge("≡", "a", 0.9);
        b.normalize_lists();
        records.insert("b".to_string(), b);
        records.remove("c");
        assert!(complete_graph(&records));
    }

    #[test]
    fn ordered_neighbors_are_deterministic() {
        let mut r = AdjacencyRecord::empty("hub");
        r.insert_edge("≡", "mid", 0.5);
        r.insert_edge("→", "top", 0.9);
        r.insert_edge("←", "mid", 0.7);
        r.normalize_lists();
        assert_eq!(ordered_neighbors(&r), vec!["top", "mid"]);
    }
}
