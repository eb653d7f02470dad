// ── Graph Assembler ────────────────────────────────────────────────────────
//
// Builds the run-scope graph from a set of anchor tokens and a record
// index: ensure-node + push-link BFS to `floor(depth)` with a fractional
// remainder, `(from, rtype, to)` triple deduplication, then a
// hidden-adjacency subnet over top-priority neighbors repaired into a
// single connected component.
//
// Determinism: identical `(anchors, index, options)` produce bytewise
// identical link lists. Tie-breaks everywhere are weight desc → neighbor
// asc → relation asc; the index is only ever walked through sorted views.

use crate::atoms::constants::{HIDDEN_ADJACENCY_FLOOR, YIELD_EVERY_EXPANSIONS};
use crate::atoms::error::{HlsfError, HlsfResult};
use crate::atoms::types::{AdjacencyRecord, EdgeTriple, TokenGraph};
use crate::engine::cancel::CancelToken;
use crate::engine::config::CoreConfig;
use crate::engine::relations::{priority_of, GLYPH_HIDDEN_ADJACENCY};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Assembly knobs, usually derived from the live config plus per-run flags.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// BFS depth; the fractional part admits boundary targets without
    /// expanding them.
    pub depth: f64,
    /// Strongest relation types kept per record.
    pub relation_type_cap: usize,
    /// Strongest edges kept per kept type.
    pub edges_per_type: usize,
    /// Top neighbors per token in the hidden subnet.
    pub hidden_degree: usize,
    /// BFS depth of the hidden subnet.
    pub hidden_depth: u32,
    /// Seed cap of the hidden subnet.
    pub hidden_cap: usize,
}

impl AssembleOptions {
    pub fn from_config(config: &CoreConfig) -> Self {
        AssembleOptions {
            depth: config.adjacency_recursion_depth as f64,
            relation_type_cap: config.max_relation_types,
            edges_per_type: config.adjacency_edges_per_level,
            hidden_degree: config.hidden_adjacency_degree,
            hidden_depth: config.hidden_adjacency_depth,
            hidden_cap: config.hidden_adjacency_cap,
        }
    }
}

/// What one assembly run produced.
#[derive(Debug, Clone, Default)]
pub struct GraphBuildReport {
    pub graph: TokenGraph,
    /// Boundary-layer targets admitted by a fractional depth remainder.
    pub fractional: BTreeSet<String>,
    /// `expand` invocations performed.
    pub expansions: usize,
    /// Hidden-subnet repair edges inserted.
    pub repairs: usize,
}

/// Assemble the run-scope graph. `session_tokens` seed the hidden subnet
/// alongside the anchors.
pub async fn assemble(
    anchors: &[String],
    index: &HashMap<String, AdjacencyRecord>,
    session_tokens: &[String],
    opts: &AssembleOptions,
    cancel: &CancelToken,
) -> HlsfResult<GraphBuildReport> {
    if anchors.is_empty() {
        return Err(HlsfError::InvalidPrompt("no anchor tokens".into()));
    }

    // Sorted view of the index for all deterministic walks.
    let sorted_keys: Vec<&String> = {
        let mut keys: Vec<&String> = index.keys().collect();
        keys.sort();
        keys
    };

    let mut report = GraphBuildReport::default();
    let depth_floor = opts.depth.max(0.0).floor() as u32;
    let fraction = opts.depth.max(0.0).fract();

    // ── Anchor resolution (case-insensitive, deterministic) ──────────────
    let mut resolved_anchors: Vec<String> = Vec::new();
    for anchor in anchors {
        let lowered = anchor.to_lowercase();
        let resolved = if index.contains_key(&lowered) {
            Some(lowered.clone())
        } else {
            sorted_keys
                .iter()
                .find(|k| k.to_lowercase() == lowered)
                .map(|k| (*k).clone())
        };
        match resolved {
            Some(token) => {
                if !resolved_anchors.contains(&token) {
                    resolved_anchors.push(token);
                }
            }
            None => debug!("[graph] Anchor {anchor:?} not in index; skipped"),
        }
    }
    if resolved_anchors.is_empty() {
        return Err(HlsfError::InvalidPrompt(
            "no anchors resolve against the index".into(),
        ));
    }
    report.graph.anchors = resolved_anchors.clone();

    // ── BFS expansion ────────────────────────────────────────────────────
    let mut queue: VecDeque<QueuedEdge> = VecDeque::new();
    let mut expanded: HashSet<String> = HashSet::new();
    let mut since_yield = 0usize;

    for anchor in &resolved_anchors {
        report.graph.ensure_node(anchor, 0);
    }
    for anchor in resolved_anchors.clone() {
        expand_token(
            &anchor,
            0,
            depth_floor,
            fraction,
            index,
            opts,
            &mut report,
            &mut queue,
        );
        expanded.insert(anchor);
    }

    while let Some(edge) = queue.pop_front() {
        if cancel.is_cancelled() {
            return Err(HlsfError::Aborted);
        }
        if edge.depth > depth_floor {
            continue;
        }
        if !expanded.insert(edge.to.clone()) {
            continue;
        }
        expand_token(
            &edge.to,
            edge.depth,
            depth_floor,
            fraction,
            index,
            opts,
            &mut report,
            &mut queue,
        );
        since_yield += 1;
        if since_yield >= YIELD_EVERY_EXPANSIONS {
            since_yield = 0;
            tokio::task::yield_now().await;
        }
    }

    // ── Hidden-adjacency subnet + repair ─────────────────────────────────
    build_hidden_subnet(index, session_tokens, opts, &mut report);

    info!(
        "[graph] Assembled {} nodes, {} links ({} anchors, {} fractional, {} repairs)",
        report.graph.node_count(),
        report.graph.link_count(),
        report.graph.anchors.len(),
        report.fractional.len(),
        report.repairs
    );
    Ok(report)
}

struct QueuedEdge {
    to: String,
    depth: u32,
}

/// One record's visible matrix: the strongest `relation_type_cap` types,
/// each trimmed to `edges_per_type` items, overflow attached as hidden
/// tokens on the type's strongest link.
#[allow(clippy::too_many_arguments)]
fn expand_token(
    token: &str,
    depth: u32,
    depth_floor: u32,
    fraction: f64,
    index: &HashMap<String, AdjacencyRecord>,
    opts: &AssembleOptions,
    report: &mut GraphBuildReport,
    queue: &mut VecDeque<QueuedEdge>,
) {
    report.expansions += 1;
    let Some(record) = index.get(token) else {
        return;
    };

    // Rank relation types: strongest edge first, relation asc on ties.
    let mut types: Vec<(&String, f64)> = record
        .relationships
        .iter()
        .filter(|(_, list)| !list.is_empty())
        .map(|(rel, list)| {
            let strongest = list
                .iter()
                .map(|e| e.weight)
                .fold(f64::NEG_INFINITY, f64::max);
            (rel, strongest)
        })
        .collect();
    types.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    types.truncate(opts.relation_type_cap.max(1));

    let at_boundary = depth == depth_floor && fraction > 0.0;

    for (relation, _) in types {
        let list = &record.relationships[relation];
        let visible = &list[..list.len().min(opts.edges_per_type.max(1))];
        let hidden: Vec<String> = list
            .iter()
            .skip(visible.len())
            .map(|e| e.neighbor.clone())
            .collect();

        for (position, edge) in visible.iter().enumerate() {
            report.graph.ensure_node(&edge.neighbor, depth + 1);
            let link = EdgeTriple {
                from: token.to_string(),
                to: edge.neighbor.clone(),
                rtype: relation.clone(),
                weight: edge.weight,
                // overflow rides on the type's strongest link
                hidden_tokens: if position == 0 { hidden.clone() } else { Vec::new() },
            };
            report.graph.push_link(link);

            if at_boundary {
                report.fractional.insert(edge.neighbor.clone());
            } else {
                queue.push_back(QueuedEdge {
                    to: edge.neighbor.clone(),
                    depth: depth + 1,
                });
            }
        }
    }
}

/// Build the hidden-adjacency subnet: seed from anchors ∪ session tokens,
/// BFS over the index keeping the top `hidden_degree` neighbors by
/// weight · priority, insert symmetric `⊚` edges, then repair the subnet
/// into one connected component.
fn build_hidden_subnet(
    index: &HashMap<String, AdjacencyRecord>,
    session_tokens: &[String],
    opts: &AssembleOptions,
    report: &mut GraphBuildReport,
) {
    // 1. Seeds: anchors first, then session tokens, dedup, capped.
    let anchor_seeds = report.graph.anchors.clone();
    let mut seeds: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for token in anchor_seeds.iter().chain(session_tokens) {
        let token = token.to_lowercase();
        if index.contains_key(&token) && seen.insert(token.clone()) {
            seeds.push(token);
        }
        if seeds.len() >= opts.hidden_cap.max(1) {
            break;
        }
    }
    if seeds.is_empty() {
        return;
    }

    // 2. BFS keeping top-priority neighbors.
    let mut subnet: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut queue: VecDeque<(String, u32)> = seeds.iter().map(|s| (s.clone(), 0)).collect();
    let mut visited: HashSet<String> = HashSet::new();

    while let Some((token, depth)) = queue.pop_front() {
        if !visited.insert(token.clone()) {
            continue;
        }
        subnet.entry(token.clone()).or_default();
        if depth >= opts.hidden_depth {
            continue;
        }
        let Some(record) = index.get(&token) else {
            continue;
        };

        // Top neighbors by weight · priority; deterministic ties.
        let mut scored: Vec<(String, f64)> = record
            .relationships
            .iter()
            .flat_map(|(rel, list)| {
                let priority = priority_of(rel);
                list.iter()
                    .map(move |e| (e.neighbor.clone(), e.weight * priority))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let mut taken: HashSet<String> = HashSet::new();
        let mut kept = 0usize;
        for (neighbor, score) in scored {
            if kept >= opts.hidden_degree.max(1) {
                break;
            }
            if neighbor == token || !taken.insert(neighbor.clone()) {
                continue;
            }
            if !index.contains_key(&neighbor) {
                continue;
            }
            kept += 1;

            // 3. Symmetric insertion into the subnet + one canonical link.
            let newly_linked = subnet.entry(token.clone()).or_default().insert(neighbor.clone());
            subnet.entry(neighbor.clone()).or_default().insert(token.clone());
            if newly_linked {
                insert_hidden_link(report, &token, &neighbor, score.max(HIDDEN_ADJACENCY_FLOOR));
            }
            queue.push_back((neighbor, depth + 1));
        }
    }

    // 4. Full-connectivity repair over the subnet.
    let components = subnet_components(&subnet);
    if components.len() > 1 {
        let primary_head = components[0][0].clone();
        for secondary in &components[1..] {
            let secondary_head = secondary[0].clone();
            insert_hidden_link(report, &primary_head, &secondary_head, HIDDEN_ADJACENCY_FLOOR);
            subnet
                .entry(primary_head.clone())
                .or_default()
                .insert(secondary_head.clone());
            subnet
                .entry(secondary_head)
                .or_default()
                .insert(primary_head.clone());
            report.repairs += 1;
        }
    }

    // 5. Refresh the graph's symmetric adjacency map.
    report.graph.hidden_adjacency = subnet
        .into_iter()
        .map(|(token, neighbors)| (token, neighbors.into_iter().collect()))
        .collect();
}

fn insert_hidden_link(report: &mut GraphBuildReport, a: &str, b: &str, weight: f64) {
    // preserve BFS layers: new subnet nodes land one layer out from their peer
    let layer_a = report.graph.nodes.get(a).map(|n| n.layer).unwrap_or(1);
    report.graph.ensure_node(a, layer_a);
    let layer_b = report
        .graph
        .nodes
        .get(b)
        .map(|n| n.layer)
        .unwrap_or(layer_a + 1);
    report.graph.ensure_node(b, layer_b);
    report.graph.push_link(EdgeTriple {
        from: a.to_string(),
        to: b.to_string(),
        rtype: GLYPH_HIDDEN_ADJACENCY.to_string(),
        weight: weight.clamp(HIDDEN_ADJACENCY_FLOOR, 1.0),
        hidden_tokens: Vec::new(),
    });
}

/// DFS component decomposition of a symmetric adjacency map. Components
/// are ordered by their smallest token; members sorted ascending.
pub fn subnet_components(subnet: &BTreeMap<String, BTreeSet<String>>) -> Vec<Vec<String>> {
    let mut components: Vec<Vec<String>> = Vec::new();
    let mut assigned: HashSet<&str> = HashSet::new();
    for start in subnet.keys() {
        if assigned.contains(start.as_str()) {
            continue;
        }
        let mut component: Vec<String> = Vec::new();
        let mut stack: Vec<&str> = vec![start];
        while let Some(token) = stack.pop() {
            if !assigned.insert(token) {
                continue;
            }
            component.push(token.to_string());
            if let Some(neighbors) = subnet.get(token) {
                for n in neighbors {
                    if !assigned.contains(n.as_str()) {
                        stack.push(n);
                    }
                }
            }
        }
        component.sort();
        components.push(component);
    }
    components.sort_by(|a, b| a[0].cmp(&b[0]));
    components
}

/// Number of connected components in a graph's hidden-adjacency map.
pub fn hidden_component_count(graph: &TokenGraph) -> usize {
    let subnet: BTreeMap<String, BTreeSet<String>> = graph
        .hidden_adjacency
        .iter()
        .map(|(token, neighbors)| (token.clone(), neighbors.iter().cloned().collect()))
        .collect();
    subnet_components(&subnet).len()
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token: &str, edges: &[(&str, &str, f64)]) -> AdjacencyRecord {
        let mut r = AdjacencyRecord::empty(token);
        for (rel, neighbor, weight) in edges {
            r.insert_edge(rel, neighbor, *weight);
        }
        r.normalize_lists();
        r
    }

    fn index_of(records: Vec<AdjacencyRecord>) -> HashMap<String, AdjacencyRecord> {
        records.into_iter().map(|r| (r.token.clone(), r)).collect()
    }

    fn opts(depth: f64) -> AssembleOptions {
        AssembleOptions {
            depth,
            relation_type_cap: 8,
            edges_per_type: 4,
            hidden_degree: 2,
            hidden_depth: 2,
            hidden_cap: 128,
        }
    }

    #[tokio::test]
    async fn anchors_resolve_case_insensitively() {
        let index = index_of(vec![record("alpha", &[("≡", "beta", 0.9)]), record("beta", &[])]);
        let report = assemble(
            &["ALPHA".to_string()],
            &index,
            &[],
            &opts(1.0),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.graph.anchors, vec!["alpha"]);
        assert!(report.graph.nodes.contains_key("beta"));
        assert_eq!(report.graph.nodes["alpha"].layer, 0);
    }

    #[tokio::test]
    async fn links_are_unique_triples() {
        // both anchors point at the same target under the same relation
        let index = index_of(vec![
            record("a", &[("≡", "shared", 0.9)]),
            record("b", &[("≡", "shared", 0.8)]),
            record("shared", &[("≡", "a", 0.7)]),
        ]);
        let report = assemble(
            &["a".to_string(), "b".to_string()],
            &index,
            &[],
            &opts(2.0),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        let mut keys: Vec<(String, String, String)> = report
            .graph
            .links
            .iter()
            .map(|l| (l.from.clone(), l.rtype.clone(), l.to.clone()))
            .collect();
        let before = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), before);
    }

    #[tokio::test]
    async fn type_and_edge_caps_apply_with_hidden_overflow() {
        let index = index_of(vec![record(
            "hub",
            &[
                ("≡", "s1", 0.9),
                ("≡", "s2", 0.8),
                ("≡", "s3", 0.7),
                ("→", "c1", 0.6),
                ("←", "d1", 0.5),
            ],
        )]);
        let mut options = opts(1.0);
        options.relation_type_cap = 2;
        options.edges_per_type = 2;
        let report = assemble(
            &["hub".to_string()],
            &index,
            &[],
            &options,
            &CancelToken::new(),
        )
        .await
        .unwrap();

        // only the 2 strongest types (≡, →) survive; ← is dropped
        assert!(report.graph.links.iter().any(|l| l.rtype == "≡"));
        assert!(report.graph.links.iter().any(|l| l.rtype == "→"));
        assert!(!report.graph.links.iter().any(|l| l.rtype == "←"));

        // overflow neighbor s3 rides on ≡'s strongest link
        let strongest = report
            .graph
            .links
            .iter()
            .find(|l| l.rtype == "≡" && l.to == "s1")
            .unwrap();
        assert_eq!(strongest.hidden_tokens, vec!["s3"]);
        assert!(!report.graph.nodes.contains_key("s3"));
    }

    #[tokio::test]
    async fn fractional_depth_admits_but_does_not_expand() {
        let index = index_of(vec![
            record("a", &[("≡", "b", 0.9)]),
            record("b", &[("≡", "c", 0.9)]),
            record("c", &[("≡", "d", 0.9)]),
            record("d", &[]),
        ]);
        // depth 1.5: anchor expands, layer-1 expands at the boundary
        // fractionally — its targets appear but are not expanded
        let report = assemble(
            &["a".to_string()],
            &index,
            &[],
            &opts(1.5),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert!(report.graph.nodes.contains_key("c"));
        assert!(report.fractional.contains("c"));
        assert!(!report.graph.nodes.contains_key("d"));

        let integer = assemble(
            &["a".to_string()],
            &index,
            &[],
            &opts(1.0),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert!(integer.fractional.is_empty());
    }

    #[tokio::test]
    async fn hidden_subnet_repair_yields_one_component() {
        // five disconnected pairs
        let mut records = Vec::new();
        for pair in ["p0", "p1", "p2", "p3", "p4"] {
            let left = format!("{pair}l");
            let right = format!("{pair}r");
            records.push(record(&left, &[("≡", &right, 0.9)]));
            records.push(record(&right, &[("≡", &left, 0.9)]));
        }
        let index = index_of(records);
        let anchors: Vec<String> = ["p0l", "p1l", "p2l", "p3l", "p4l"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = assemble(&anchors, &index, &[], &opts(1.0), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(hidden_component_count(&report.graph), 1);
        assert_eq!(report.repairs, 4);
        let repair_links: Vec<&EdgeTriple> = report
            .graph
            .links
            .iter()
            .filter(|l| l.rtype == GLYPH_HIDDEN_ADJACENCY && l.weight == HIDDEN_ADJACENCY_FLOOR)
            .collect();
        // each repair edge appears exactly once at the floor weight
        assert!(repair_links.len() >= 4);
        let mut seen = HashSet::new();
        for link in repair_links {
            assert!(seen.insert((link.from.clone(), link.to.clone())));
        }
    }

    #[tokio::test]
    async fn deterministic_output() {
        let index = index_of(vec![
            record("a", &[("≡", "b", 0.9), ("→", "c", 0.9), ("≈", "d", 0.5)]),
            record("b", &[("≡", "c", 0.8)]),
            record("c", &[("≡", "a", 0.7)]),
            record("d", &[]),
        ]);
        let first = assemble(
            &["a".to_string()],
            &index,
            &["b".to_string()],
            &opts(2.0),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        let second = assemble(
            &["a".to_string()],
            &index,
            &["b".to_string()],
            &opts(2.0),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        let a = serde_json::to_string(&first.graph.links).unwrap();
        let b = serde_json::to_string(&second.graph.links).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn unresolvable_anchors_error() {
        let index = index_of(vec![record("a", &[])]);
        let err = assemble(
            &["missing".to_string()],
            &index,
            &[],
            &opts(1.0),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HlsfError::InvalidPrompt(_)));
    }

    #[test]
    fn component_decomposition() {
        let mut subnet: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        subnet.entry("a".into()).or_default().insert("b".into());
        subnet.entry("b".into()).or_default().insert("a".into());
        subnet.entry("z".into()).or_default();
        let components = subnet_components(&subnet);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], vec!["a", "b"]);
        assert_eq!(components[1], vec!["z"]);
    }
}
