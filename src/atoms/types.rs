// ── HLSF Atoms: Core Data Model ────────────────────────────────────────────
//
// Shared types for the semantic-field engine. Everything that crosses a
// subsystem boundary or a wire format lives here:
//   - Edge / AdjacencyRecord — the typed weighted out-edge lists
//   - CacheChunk / Manifest  — the sharded remote store format
//   - TokenGraph / EdgeTriple — the run-scope assembled graph
//   - DimensionLayout        — the polar layout consumed by renderers
//   - PromptRecord / SummaryRecord — session memory entries
//   - PerformanceProfile     — user-facing budget knobs
//   - FetchProvenance / ExpansionStats — expansion reporting
//
// Wire names are camelCase to match the external JSON contracts; internal
// field names stay snake_case via serde rename.

use crate::atoms::constants::{SYMBOL_TOKEN_PREFIX, WEIGHT_EPSILON};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

// ═════════════════════════════════════════════════════════════════════════════
// Tokens
// ═════════════════════════════════════════════════════════════════════════════

/// Normalize a raw string into a canonical token: trimmed and lowercased.
/// Returns `None` for empty input. Symbol tokens (`sym:<category>:<body>`)
/// pass through with the body preserved verbatim — their payload is opaque.
pub fn normalize_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with(SYMBOL_TOKEN_PREFIX) {
        return Some(trimmed.to_string());
    }
    Some(trimmed.to_lowercase())
}

/// Whether a token is an opaque symbol token. The fetcher returns an empty
/// record for these without consulting any store or collaborator.
pub fn is_symbol_token(token: &str) -> bool {
    token.starts_with(SYMBOL_TOKEN_PREFIX)
}

/// The chunk prefix a token shards to: its lowercase first character when in
/// `[a-z0-9]`, otherwise `_`. The token cache and the remote store agree on
/// this rule.
pub fn chunk_prefix(token: &str) -> String {
    match token.chars().next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => c.to_string(),
        Some(c) if c.is_ascii_uppercase() => c.to_ascii_lowercase().to_string(),
        _ => "_".to_string(),
    }
}

/// Split a prompt into unique normalized word tokens, preserving first-seen
/// order. Punctuation splits; single characters survive (they are valid
/// tokens, they just shard to their own prefix).
pub fn tokenize_prompt(text: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric() && c != '-' && c != '\'') {
        if let Some(tok) = normalize_token(word) {
            if seen.insert(tok.clone()) {
                out.push(tok);
            }
        }
    }
    out
}

// ═════════════════════════════════════════════════════════════════════════════
// Edges and adjacency records
// ═════════════════════════════════════════════════════════════════════════════

/// A single weighted out-edge. The relationship tag lives in the enclosing
/// map, not on the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Target token (normalized).
    #[serde(rename = "token")]
    pub neighbor: String,
    /// Edge weight in [0, 1].
    pub weight: f64,
}

impl Edge {
    pub fn new(neighbor: impl Into<String>, weight: f64) -> Self {
        Edge {
            neighbor: neighbor.into(),
            weight,
        }
    }
}

/// Typed weighted out-edge lists for one token.
///
/// Invariants (enforced by `validate` and restored by `normalize_lists`):
///   - each relationship list is sorted weight-descending, ties by neighbor
///     string ascending
///   - no `(relation, neighbor)` pair appears twice
///   - every neighbor is trimmed non-empty
///   - `total_relationships` equals the summed list lengths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjacencyRecord {
    pub token: String,
    /// RFC 3339 timestamp set on first cache write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<String>,
    #[serde(default)]
    pub attention_score: f64,
    #[serde(default)]
    pub total_relationships: u32,
    /// Relationship glyph → ordered edge list. BTreeMap keeps serialization
    /// deterministic.
    #[serde(default)]
    pub relationships: BTreeMap<String, Vec<Edge>>,
    /// Set when the fetcher could not reach the collaborator.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub offline: bool,
    /// Set when the collaborator response could not be parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdjacencyRecord {
    /// An empty record for a token — used for symbol tokens and as the
    /// starting point for merges.
    pub fn empty(token: impl Into<String>) -> Self {
        AdjacencyRecord {
            token: token.into(),
            cached_at: None,
            attention_score: 0.0,
            total_relationships: 0,
            relationships: BTreeMap::new(),
            offline: false,
            error: None,
        }
    }

    /// The record returned when the collaborator is unreachable.
    pub fn offline(token: impl Into<String>) -> Self {
        let mut r = Self::empty(token);
        r.offline = true;
        r
    }

    /// The record stored when a collaborator response failed to parse.
    /// Counted, but never treated as adjacency growth.
    pub fn parse_failed(token: impl Into<String>) -> Self {
        let mut r = Self::empty(token);
        r.error = Some("Parse failed".to_string());
        r
    }

    /// Total number of edges across all relationship lists.
    pub fn edge_count(&self) -> usize {
        self.relationships.values().map(Vec::len).sum()
    }

    /// Whether the record carries at least one edge.
    pub fn has_adjacency(&self) -> bool {
        self.relationships.values().any(|v| !v.is_empty())
    }

    /// Iterate `(relation, &Edge)` over every edge.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &Edge)> {
        self.relationships
            .iter()
            .flat_map(|(rel, list)| list.iter().map(move |e| (rel.as_str(), e)))
    }

    /// Insert an edge, deduplicating by `(relation, neighbor)` and keeping
    /// the larger weight. Does not resort; call `normalize_lists` after a
    /// batch of inserts.
    pub fn insert_edge(&mut self, relation: &str, neighbor: &str, weight: f64) {
        let list = self.relationships.entry(relation.to_string()).or_default();
        if let Some(existing) = list.iter_mut().find(|e| e.neighbor == neighbor) {
            if weight > existing.weight {
                existing.weight = weight;
            }
            return;
        }
        list.push(Edge::new(neighbor, weight));
    }

    /// Look up the weight of a specific `(relation, neighbor)` edge.
    pub fn edge_weight(&self, relation: &str, neighbor: &str) -> Option<f64> {
        self.relationships
            .get(relation)?
            .iter()
            .find(|e| e.neighbor == neighbor)
            .map(|e| e.weight)
    }

    /// Restore list invariants: drop empty/duplicate neighbors, sort each
    /// list weight-descending with neighbor-ascending ties, drop now-empty
    /// relations, recount `total_relationships`.
    pub fn normalize_lists(&mut self) {
        for list in self.relationships.values_mut() {
            let mut seen: HashSet<String> = HashSet::new();
            list.retain(|e| {
                let name = e.neighbor.trim();
                !name.is_empty() && e.weight.is_finite() && seen.insert(name.to_string())
            });
            for e in list.iter_mut() {
                e.weight = e.weight.clamp(0.0, 1.0);
            }
            sort_edges(list);
        }
        self.relationships.retain(|_, list| !list.is_empty());
        self.total_relationships = self.edge_count() as u32;
    }

    /// Check the structural invariants without mutating. Returns the first
    /// violation found, if any.
    pub fn validate(&self) -> Result<(), String> {
        let mut total = 0usize;
        for (rel, list) in &self.relationships {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut prev = f64::INFINITY;
            for edge in list {
                if edge.neighbor.trim().is_empty() {
                    return Err(format!("empty neighbor under {rel}"));
                }
                if !edge.weight.is_finite() || edge.weight < 0.0 || edge.weight > 1.0 {
                    return Err(format!(
                        "weight {} out of range under {rel}",
                        edge.weight
                    ));
                }
                if !seen.insert(edge.neighbor.as_str()) {
                    return Err(format!(
                        "duplicate neighbor {} under {rel}",
                        edge.neighbor
                    ));
                }
                if edge.weight > prev + WEIGHT_EPSILON {
                    return Err(format!("weights not monotone under {rel}"));
                }
                prev = edge.weight;
            }
            total += list.len();
        }
        if self.total_relationships as usize != total {
            return Err(format!(
                "totalRelationships {} != counted {}",
                self.total_relationships, total
            ));
        }
        Ok(())
    }

    /// Whether this record's adjacency grew relative to `prev`: some
    /// `(relation, neighbor)` edge is new, or its weight increased by more
    /// than the epsilon.
    pub fn grew_from(&self, prev: &AdjacencyRecord) -> bool {
        for (rel, list) in &self.relationships {
            for edge in list {
                match prev.edge_weight(rel, &edge.neighbor) {
                    None => return true,
                    Some(w) if edge.weight > w + WEIGHT_EPSILON => return true,
                    Some(_) => {}
                }
            }
        }
        false
    }
}

/// Sort an edge list weight-descending, ties by neighbor ascending.
pub fn sort_edges(list: &mut [Edge]) {
    list.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.neighbor.cmp(&b.neighbor))
    });
}

// ═════════════════════════════════════════════════════════════════════════════
// Chunks and manifests
// ═════════════════════════════════════════════════════════════════════════════

/// One shard of the remote store: all records whose token shares a prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheChunk {
    pub prefix: String,
    pub token_count: u32,
    /// Records sorted by token.
    pub tokens: Vec<AdjacencyRecord>,
}

impl CacheChunk {
    pub fn new(prefix: impl Into<String>, mut tokens: Vec<AdjacencyRecord>) -> Self {
        tokens.sort_by(|a, b| a.token.cmp(&b.token));
        CacheChunk {
            prefix: prefix.into(),
            token_count: tokens.len() as u32,
            tokens,
        }
    }
}

/// Manifest entry describing one chunk file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestChunk {
    pub prefix: String,
    pub href: String,
    pub token_count: u32,
}

/// The remote store's top-level index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub generated_at: String,
    #[serde(default)]
    pub source: String,
    pub total_tokens: u32,
    pub total_relationships: u32,
    pub chunk_prefix_length: u32,
    pub chunks: Vec<ManifestChunk>,
    pub token_index_href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_index: Option<Vec<String>>,
}

impl Manifest {
    /// Structural validation: version present, prefix length 1, chunk
    /// prefixes unique and single-character.
    pub fn validate(&self) -> Result<(), String> {
        if self.version.is_empty() {
            return Err("missing version".into());
        }
        if self.chunk_prefix_length != 1 {
            return Err(format!(
                "unsupported chunkPrefixLength {}",
                self.chunk_prefix_length
            ));
        }
        let mut seen = HashSet::new();
        for chunk in &self.chunks {
            if chunk.prefix.chars().count() != 1 {
                return Err(format!("chunk prefix {:?} not length 1", chunk.prefix));
            }
            if !seen.insert(chunk.prefix.clone()) {
                return Err(format!("duplicate chunk prefix {:?}", chunk.prefix));
            }
            if chunk.href.is_empty() {
                return Err(format!("chunk {:?} missing href", chunk.prefix));
            }
        }
        Ok(())
    }
}

/// The durable DB snapshot object the token cache merges into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbSnapshot {
    #[serde(rename = "full_token_data", default)]
    pub full_token_data: Vec<AdjacencyRecord>,
}

// ═════════════════════════════════════════════════════════════════════════════
// Run-scope graph
// ═════════════════════════════════════════════════════════════════════════════

/// A node in the assembled run-scope graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub token: String,
    /// BFS layer at which the node was first reached (anchors are layer 0).
    pub layer: u32,
    /// Number of links touching this node.
    pub degree: u32,
    /// Cluster id assigned by the affinity clusterer; `None` before
    /// clustering runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<usize>,
}

/// A typed directed link. `(from, rtype, to)` is unique within a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeTriple {
    pub from: String,
    pub to: String,
    pub rtype: String,
    pub weight: f64,
    /// Neighbors that lost the per-type cap race but remain attached to
    /// this link for drill-down rendering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hidden_tokens: Vec<String>,
}

/// The run-scope graph produced by the assembler. Ephemeral per command
/// run; only the most recent one is retained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenGraph {
    pub nodes: BTreeMap<String, GraphNode>,
    pub links: Vec<EdgeTriple>,
    pub anchors: Vec<String>,
    /// Symmetric hidden-adjacency map built by the subnet pass.
    #[serde(default)]
    pub hidden_adjacency: BTreeMap<String, Vec<String>>,
    /// Companion uniqueness set for `(from, rtype, to)` — not serialized.
    #[serde(skip)]
    link_keys: HashSet<(String, String, String)>,
}

impl TokenGraph {
    /// Ensure a node exists; keeps the smallest layer seen.
    pub fn ensure_node(&mut self, token: &str, layer: u32) -> &mut GraphNode {
        let node = self
            .nodes
            .entry(token.to_string())
            .or_insert_with(|| GraphNode {
                token: token.to_string(),
                layer,
                degree: 0,
                cluster: None,
            });
        if layer < node.layer {
            node.layer = layer;
        }
        node
    }

    /// Push a link if `(from, rtype, to)` is new. Returns whether the link
    /// was inserted. Degrees update on insertion.
    pub fn push_link(&mut self, link: EdgeTriple) -> bool {
        let key = (link.from.clone(), link.rtype.clone(), link.to.clone());
        if !self.link_keys.insert(key) {
            return false;
        }
        if let Some(n) = self.nodes.get_mut(&link.from) {
            n.degree += 1;
        }
        if let Some(n) = self.nodes.get_mut(&link.to) {
            n.degree += 1;
        }
        self.links.push(link);
        true
    }

    /// Whether a `(from, rtype, to)` triple already exists.
    pub fn has_link(&self, from: &str, rtype: &str, to: &str) -> bool {
        self.link_keys
            .contains(&(from.to_string(), rtype.to_string(), to.to_string()))
    }

    /// Rebuild the uniqueness set after deserialization.
    pub fn rebuild_link_keys(&mut self) {
        self.link_keys = self
            .links
            .iter()
            .map(|l| (l.from.clone(), l.rtype.clone(), l.to.clone()))
            .collect();
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Dimension layout
// ═════════════════════════════════════════════════════════════════════════════

/// Which index a layout run covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutScope {
    /// Entire cached index.
    Db,
    /// Only tokens active in the current session.
    State,
}

/// Polar position assigned to one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPosition {
    /// Angle in radians, normalized to [0, 2π).
    pub angle: f64,
    pub radius: f64,
    pub level: u32,
    #[serde(rename = "cellIndex")]
    pub cell_index: usize,
}

/// One anchor's cell within a level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutCell {
    pub anchor: String,
    pub tokens: Vec<String>,
}

/// One concentric level of the layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutLevel {
    pub cells: Vec<LayoutCell>,
}

/// The deterministic polar layout downstream renderers consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionLayout {
    pub scope: LayoutScope,
    pub dimension: usize,
    pub effective_dimension: usize,
    pub anchors: Vec<String>,
    pub levels: Vec<LayoutLevel>,
    #[serde(rename = "activeAngles")]
    pub active_angles: Vec<f64>,
    pub positions: BTreeMap<String, TokenPosition>,
    #[serde(rename = "maxRadius")]
    pub max_radius: f64,
    #[serde(rename = "levelCount")]
    pub level_count: usize,
    #[serde(rename = "lastLevelComponents")]
    pub last_level_components: usize,
}

// ═════════════════════════════════════════════════════════════════════════════
// Session memory records
// ═════════════════════════════════════════════════════════════════════════════

/// One recorded prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: String,
    pub text: String,
    /// Unique normalized tokens, first-seen order.
    pub tokens: Vec<String>,
    /// Tokens that actually seeded an expansion.
    pub adjacency_seeds: Vec<String>,
    pub timestamp: String,
}

/// One token's pruned contribution inside a summary record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub token: String,
    pub attention: f64,
    pub total_relationships: u32,
    pub relationships: BTreeMap<String, Vec<Edge>>,
}

/// A pruned snapshot of one expansion's adjacency map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub id: String,
    pub label: String,
    pub token_count: u32,
    pub summary: Vec<SummaryEntry>,
    pub updated_at: String,
}

// ═════════════════════════════════════════════════════════════════════════════
// Performance profile
// ═════════════════════════════════════════════════════════════════════════════

/// User-facing budget knobs. The dispatcher derives runtime caps from
/// these; subsystems never read a profile directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    #[serde(rename = "branchingFactor")]
    pub branching_factor: u32,
    #[serde(rename = "maxNodes")]
    pub max_nodes: usize,
    #[serde(rename = "maxEdges")]
    pub max_edges: usize,
    /// `None` means unbounded.
    #[serde(rename = "maxRelationships")]
    pub max_relationships: Option<u64>,
    #[serde(rename = "maxRelationTypes")]
    pub max_relation_types: usize,
    #[serde(rename = "pruneWeightThreshold")]
    pub prune_weight_threshold: f64,
}

// ═════════════════════════════════════════════════════════════════════════════
// Expansion reporting
// ═════════════════════════════════════════════════════════════════════════════

/// Per-token provenance captured during an expansion run. Storage keeps
/// only records; these sets exist for reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchProvenance {
    pub cache_hits: BTreeSet<String>,
    pub llm_generated: BTreeSet<String>,
    pub offline: BTreeSet<String>,
    pub errors: BTreeMap<String, String>,
    pub synthetic: BTreeSet<String>,
}

/// Final state of one recursive expansion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpansionStats {
    #[serde(rename = "seedCount")]
    pub seed_count: usize,
    #[serde(rename = "visitedTokens")]
    pub visited_tokens: usize,
    pub expansions: usize,
    #[serde(rename = "totalEdges")]
    pub total_edges: usize,
    #[serde(rename = "totalRelationships")]
    pub total_relationships: u64,
    pub connected: bool,
    #[serde(rename = "completeGraph")]
    pub complete_graph: bool,
    #[serde(rename = "budgetExhausted")]
    pub budget_exhausted: bool,
    pub cancelled: bool,
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize_token("  Hello "), Some("hello".into()));
        assert_eq!(normalize_token(""), None);
        assert_eq!(normalize_token("   "), None);
        assert_eq!(
            normalize_token("sym:math:Δ"),
            Some("sym:math:Δ".to_string())
        );
    }

    #[test]
    fn chunk_prefix_rule() {
        assert_eq!(chunk_prefix("alpha"), "a");
        assert_eq!(chunk_prefix("Zebra"), "z");
        assert_eq!(chunk_prefix("9lives"), "9");
        assert_eq!(chunk_prefix("Ωmega"), "_");
        assert_eq!(chunk_prefix("~tilde"), "_");
    }

    #[test]
    fn tokenize_dedups_in_order() {
        let toks = tokenize_prompt("The cat, the CAT, and the dog!");
        assert_eq!(toks, vec!["the", "cat", "and", "dog"]);
    }

    #[test]
    fn insert_edge_keeps_max_weight() {
        let mut r = AdjacencyRecord::empty("alpha");
        r.insert_edge("∼", "beta", 0.3);
        r.insert_edge("∼", "beta", 0.7);
        r.insert_edge("∼", "beta", 0.5);
        assert_eq!(r.edge_weight("∼", "beta"), Some(0.7));
        r.normalize_lists();
        assert_eq!(r.total_relationships, 1);
    }

    #[test]
    fn normalize_lists_sorts_and_recounts() {
        let mut r = AdjacencyRecord::empty("alpha");
        r.relationships.insert(
            "≡".into(),
            vec![
                Edge::new("zeta", 0.4),
                Edge::new("beta", 0.9),
                Edge::new("  ", 0.5),
                Edge::new("gamma", 0.9),
            ],
        );
        r.normalize_lists();
        let list = &r.relationships["≡"];
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].neighbor, "beta");
        assert_eq!(list[1].neighbor, "gamma");
        assert_eq!(list[2].neighbor, "zeta");
        assert_eq!(r.total_relationships, 3);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicates_and_bad_weights() {
        let mut r = AdjacencyRecord::empty("alpha");
        r.relationships.insert(
            "≡".into(),
            vec![Edge::new("beta", 0.9), Edge::new("beta", 0.4)],
        );
        r.total_relationships = 2;
        assert!(r.validate().is_err());

        let mut r2 = AdjacencyRecord::empty("alpha");
        r2.relationships
            .insert("≡".into(), vec![Edge::new("beta", -0.1)]);
        r2.total_relationships = 1;
        assert!(r2.validate().is_err());
    }

    #[test]
    fn growth_detection_uses_epsilon() {
        let mut prev = AdjacencyRecord::empty("alpha");
        prev.insert_edge("∼", "beta", 0.5);
        prev.normalize_lists();

        let mut same = prev.clone();
        same.relationships.get_mut("∼").unwrap()[0].weight = 0.5 + 1e-9;
        assert!(!same.grew_from(&prev));

        let mut grown = prev.clone();
        grown.relationships.get_mut("∼").unwrap()[0].weight = 0.6;
        assert!(grown.grew_from(&prev));

        let mut added = prev.clone();
        added.insert_edge("∼", "gamma", 0.2);
        assert!(added.grew_from(&prev));
    }

    #[test]
    fn graph_link_dedup_and_degrees() {
        let mut g = TokenGraph::default();
        g.ensure_node("a", 0);
        g.ensure_node("b", 1);
        let link = EdgeTriple {
            from: "a".into(),
            to: "b".into(),
            rtype: "≡".into(),
            weight: 0.9,
            hidden_tokens: vec![],
        };
        assert!(g.push_link(link.clone()));
        assert!(!g.push_link(link));
        assert_eq!(g.link_count(), 1);
        assert_eq!(g.nodes["a"].degree, 1);
        assert_eq!(g.nodes["b"].degree, 1);
        assert!(g.has_link("a", "≡", "b"));
        assert!(!g.has_link("b", "≡", "a"));
    }

    #[test]
    fn ensure_node_keeps_smallest_layer() {
        let mut g = TokenGraph::default();
        g.ensure_node("a", 3);
        g.ensure_node("a", 1);
        g.ensure_node("a", 2);
        assert_eq!(g.nodes["a"].layer, 1);
    }

    #[test]
    fn manifest_validation() {
        let manifest = Manifest {
            version: "2.1".into(),
            generated_at: "2025-01-01T00:00:00Z".into(),
            source: "test".into(),
            total_tokens: 0,
            total_relationships: 0,
            chunk_prefix_length: 1,
            chunks: vec![ManifestChunk {
                prefix: "a".into(),
                href: "chunks/a.json".into(),
                token_count: 0,
            }],
            token_index_href: "token-index.json".into(),
            token_index: None,
        };
        assert!(manifest.validate().is_ok());

        let mut bad = manifest.clone();
        bad.chunk_prefix_length = 2;
        assert!(bad.validate().is_err());

        let mut dup = manifest;
        dup.chunks.push(ManifestChunk {
            prefix: "a".into(),
            href: "chunks/a2.json".into(),
            token_count: 0,
        });
        assert!(dup.validate().is_err());
    }

    #[test]
    fn record_wire_roundtrip() {
        let mut r = AdjacencyRecord::empty("alpha");
        r.insert_edge("∼", "beta", 0.9);
        r.normalize_lists();
        r.cached_at = Some("2025-01-01T00:00:00Z".into());
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"cached_at\""));
        assert!(json.contains("\"total_relationships\""));
        let back: AdjacencyRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
