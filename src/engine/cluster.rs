// ── Affinity Clusterer ─────────────────────────────────────────────────────
//
// Label-propagation clustering over a 2-hop neighbor graph using a
// signature-based affinity:
//
//     affinity(a, b) = 0.6 · cosine(a, b) + 0.4 · jaccard(a, b)
//
// where a node's signature is its bag of neighbors (token → summed weight)
// and its neighbor set, both taken over the graph's links undirected.
// Iterations are bounded; every tie-break is deterministic (score desc,
// label asc), so identical graphs cluster identically.

use crate::atoms::types::TokenGraph;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Clustering knobs. Values clamp into the legal ranges on use.
#[derive(Debug, Clone, Copy)]
pub struct ClusterOptions {
    /// Affinity floor below which a neighbor casts no vote. Clamped to
    /// [0.1, 0.8].
    pub threshold: f64,
    /// Maximum label-propagation passes. Clamped to [1, 20].
    pub iterations: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        ClusterOptions {
            threshold: 0.35,
            iterations: 8,
        }
    }
}

impl ClusterOptions {
    fn clamped(self) -> (f64, usize) {
        let threshold = if self.threshold.is_finite() {
            self.threshold.clamp(0.1, 0.8)
        } else {
            0.35
        };
        (threshold, self.iterations.clamp(1, 20))
    }
}

/// One node's clustering signature.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    /// Neighbor token → summed edge weight (all relations, undirected).
    pub bag: BTreeMap<String, f64>,
    /// Neighbor token set.
    pub neighbors: BTreeSet<String>,
}

/// Cosine similarity of two signatures over the token axis.
pub fn cosine(a: &Signature, b: &Signature) -> f64 {
    let mut dot = 0.0;
    for (token, wa) in &a.bag {
        if let Some(wb) = b.bag.get(token) {
            dot += wa * wb;
        }
    }
    let norm_a: f64 = a.bag.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b: f64 = b.bag.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Jaccard overlap of two neighbor sets.
pub fn jaccard(a: &Signature, b: &Signature) -> f64 {
    if a.neighbors.is_empty() && b.neighbors.is_empty() {
        return 0.0;
    }
    let intersection = a.neighbors.intersection(&b.neighbors).count();
    let union = a.neighbors.union(&b.neighbors).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// The blended affinity measure.
pub fn affinity(a: &Signature, b: &Signature) -> f64 {
    0.6 * cosine(a, b) + 0.4 * jaccard(a, b)
}

/// Build per-node signatures from a graph's links, undirected.
pub fn signatures_of(graph: &TokenGraph) -> BTreeMap<String, Signature> {
    let mut signatures: BTreeMap<String, Signature> = graph
        .nodes
        .keys()
        .map(|t| (t.clone(), Signature::default()))
        .collect();
    for link in &graph.links {
        if let Some(sig) = signatures.get_mut(&link.from) {
            *sig.bag.entry(link.to.clone()).or_insert(0.0) += link.weight;
            sig.neighbors.insert(link.to.clone());
        }
        if let Some(sig) = signatures.get_mut(&link.to) {
            *sig.bag.entry(link.from.clone()).or_insert(0.0) += link.weight;
            sig.neighbors.insert(link.from.clone());
        }
    }
    signatures
}

/// Direct + one-hop neighbor map restricted to graph nodes.
fn two_hop_map(graph: &TokenGraph) -> BTreeMap<String, BTreeSet<String>> {
    let mut direct: BTreeMap<String, BTreeSet<String>> = graph
        .nodes
        .keys()
        .map(|t| (t.clone(), BTreeSet::new()))
        .collect();
    for link in &graph.links {
        if !direct.contains_key(&link.from) || !direct.contains_key(&link.to) {
            continue;
        }
        if let Some(set) = direct.get_mut(&link.from) {
            set.insert(link.to.clone());
        }
        if let Some(set) = direct.get_mut(&link.to) {
            set.insert(link.from.clone());
        }
    }
    let mut two_hop = direct.clone();
    for (token, neighbors) in &direct {
        let Some(reach) = two_hop.get_mut(token) else { continue };
        for n in neighbors {
            if let Some(second) = direct.get(n) {
                for s in second {
                    if s != token {
                        reach.insert(s.clone());
                    }
                }
            }
        }
    }
    two_hop
}

/// Run label propagation and write contiguous cluster ids into the graph's
/// nodes. Returns the number of clusters.
pub fn cluster_graph(graph: &mut TokenGraph, opts: &ClusterOptions) -> usize {
    let (threshold, iterations) = opts.clamped();
    let tokens: Vec<String> = graph.nodes.keys().cloned().collect();
    if tokens.is_empty() {
        return 0;
    }

    let signatures = signatures_of(graph);
    let neighbors = two_hop_map(graph);

    // Memoized affinity on the canonical (min, max) key.
    let mut memo: HashMap<(String, String), f64> = HashMap::new();
    let mut affinity_of = |a: &String, b: &String| -> f64 {
        let key = if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        if let Some(v) = memo.get(&key) {
            return *v;
        }
        let value = match (signatures.get(a), signatures.get(b)) {
            (Some(sa), Some(sb)) => affinity(sa, sb),
            _ => 0.0,
        };
        memo.insert(key, value);
        value
    };

    let mut labels: BTreeMap<String, String> =
        tokens.iter().map(|t| (t.clone(), t.clone())).collect();

    for _pass in 0..iterations {
        let mut changed = false;
        for token in &tokens {
            let Some(reach) = neighbors.get(token) else { continue };
            // Sum affinity per candidate label across qualifying neighbors.
            let mut votes: BTreeMap<String, f64> = BTreeMap::new();
            for neighbor in reach {
                if neighbor == token {
                    continue;
                }
                let a = affinity_of(token, neighbor);
                if a < threshold {
                    continue;
                }
                let label = labels
                    .get(neighbor)
                    .cloned()
                    .unwrap_or_else(|| neighbor.clone());
                *votes.entry(label).or_insert(0.0) += a;
            }
            if votes.is_empty() {
                continue;
            }
            // Best label: score desc, label asc (BTreeMap iteration order
            // makes the first max the lexicographically smallest).
            let mut best: Option<(&String, f64)> = None;
            for (label, score) in &votes {
                match best {
                    None => best = Some((label, *score)),
                    Some((_, best_score)) if *score > best_score + f64::EPSILON => {
                        best = Some((label, *score));
                    }
                    _ => {}
                }
            }
            if let Some((label, _)) = best {
                let label = label.clone();
                if labels.get(token) != Some(&label) {
                    labels.insert(token.clone(), label);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    // Compact labels to contiguous ids, ordered by label token.
    let distinct: BTreeSet<&String> = labels.values().collect();
    let id_of: BTreeMap<&String, usize> = distinct
        .into_iter()
        .enumerate()
        .map(|(i, label)| (label, i))
        .collect();
    for (token, label) in &labels {
        if let Some(node) = graph.nodes.get_mut(token) {
            node.cluster = id_of.get(label).copied();
        }
    }
    id_of.len()
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════
