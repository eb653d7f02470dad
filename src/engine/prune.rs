// ── Pruner ─────────────────────────────────────────────────────────────────
//
// Applies weight floors, the per-record edge cap, and the global
// relationship budget to an adjacency record. Every record entering the
// token cache — from the collaborator, from a remote chunk, or from an
// import — passes through here, so the floors hold everywhere.
//
// Selection is two-pass: edges pointing at caller-supplied priority tokens
// win slots first, then the rest fill up to the hard limit. When the record
// itself is a priority token, synthetic global-connect edges guarantee
// reachability to every other priority token.
//
// The operation is deterministic and idempotent: identical inputs yield
// identical output ordering, and pruning a pruned record is a no-op.

use crate::atoms::constants::{
    DEFAULT_PRUNE_FLOOR, HIDDEN_ADJACENCY_FLOOR, PRIORITY_SYNTH_WEIGHT, WEIGHT_EPSILON,
};
use crate::atoms::types::{sort_edges, AdjacencyRecord, Edge};
use crate::engine::relations::{GLYPH_GLOBAL_CONNECT, GLYPH_HIDDEN_ADJACENCY};
use std::collections::{BTreeMap, HashSet};

/// Caller-tunable pruning inputs.
#[derive(Debug, Clone)]
pub struct PruneOptions {
    /// Hard cap on selected edges per record.
    pub edge_cap: usize,
    /// Tokens whose edges win selection slots first; the record gains
    /// synthetic reachability edges to these when it is itself one of them.
    pub priority_tokens: Vec<String>,
    /// Global cap on total edges in the output; `None` = unbounded.
    pub relationship_budget: Option<u64>,
    /// Configured pruning floor; the effective default floor is
    /// `max(weight_floor, 0.18)`.
    pub weight_floor: f64,
}

impl Default for PruneOptions {
    fn default() -> Self {
        PruneOptions {
            edge_cap: 10,
            priority_tokens: Vec::new(),
            relationship_budget: None,
            weight_floor: DEFAULT_PRUNE_FLOOR,
        }
    }
}

impl PruneOptions {
    pub fn with_edge_cap(edge_cap: usize) -> Self {
        PruneOptions {
            edge_cap,
            ..Default::default()
        }
    }
}

/// The weight floor for a relation key. Global-connect edges are exempt
/// (floor 0), hidden-adjacency edges floor at 0.05, everything else floors
/// at `max(configured, 0.18)`.
pub fn floor_for(relation: &str, configured_floor: f64) -> f64 {
    match relation {
        GLYPH_GLOBAL_CONNECT => 0.0,
        GLYPH_HIDDEN_ADJACENCY => HIDDEN_ADJACENCY_FLOOR,
        _ => configured_floor.max(DEFAULT_PRUNE_FLOOR),
    }
}

#[derive(Debug, Clone)]
struct FlatEdge {
    relation: String,
    neighbor: String,
    weight: f64,
    priority: bool,
}

/// A reachability tuple: a synthetic global-connect edge a previous prune
/// pass injected. These never compete for selection slots — otherwise a
/// second prune would evict real edges the first pass kept.
fn is_reachability(edge: &FlatEdge, priors: &HashSet<&str>) -> bool {
    edge.relation == GLYPH_GLOBAL_CONNECT
        && edge.weight <= PRIORITY_SYNTH_WEIGHT + WEIGHT_EPSILON
        && priors.contains(edge.neighbor.as_str())
}

/// Prune one record under the given options. The input is not mutated.
pub fn limit_record(record: &AdjacencyRecord, opts: &PruneOptions) -> AdjacencyRecord {
    let priors: HashSet<&str> = opts
        .priority_tokens
        .iter()
        .map(String::as_str)
        .filter(|t| *t != record.token)
        .collect();

    // 1. Flatten, dropping below-floor / malformed tuples.
    let mut flat: Vec<FlatEdge> = Vec::new();
    for (relation, list) in &record.relationships {
        let floor = floor_for(relation, opts.weight_floor);
        for edge in list {
            let neighbor = edge.neighbor.trim();
            if neighbor.is_empty() || !edge.weight.is_finite() {
                continue;
            }
            let weight = edge.weight.clamp(0.0, 1.0);
            if weight < floor {
                continue;
            }
            flat.push(FlatEdge {
                relation: relation.clone(),
                neighbor: neighbor.to_string(),
                weight,
                priority: priors.contains(neighbor),
            });
        }
    }

    // 2. Sort: weight desc, neighbor asc, relation asc.
    flat.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.neighbor.cmp(&b.neighbor))
            .then_with(|| a.relation.cmp(&b.relation))
    });

    // Dedup (relation, neighbor) keeping the strongest occurrence.
    let mut seen: HashSet<(String, String)> = HashSet::new();
    flat.retain(|e| seen.insert((e.relation.clone(), e.neighbor.clone())));

    // Reachability tuples from earlier passes bypass selection.
    let (reach, candidates): (Vec<FlatEdge>, Vec<FlatEdge>) =
        flat.into_iter().partition(|e| is_reachability(e, &priors));

    // 3. Two-pass selection up to the hard limit.
    let budget = opts.relationship_budget.unwrap_or(u64::MAX);
    let hard_edge_limit = (opts.edge_cap as u64).min(budget / 2) as usize;

    let mut selected: Vec<FlatEdge> = Vec::with_capacity(hard_edge_limit);
    for edge in candidates.iter().filter(|e| e.priority) {
        if selected.len() >= hard_edge_limit {
            break;
        }
        selected.push(edge.clone());
    }
    for edge in candidates.iter().filter(|e| !e.priority) {
        if selected.len() >= hard_edge_limit {
            break;
        }
        selected.push(edge.clone());
    }

    // Carry the reachability tuples forward untouched.
    selected.extend(reach);

    // 4. The record itself being a priority token pulls in every other
    //    priority token through synthetic global-connect edges, inside the
    //    relationship budget.
    if opts
        .priority_tokens
        .iter()
        .any(|t| t.as_str() == record.token)
    {
        let present: HashSet<&str> = selected.iter().map(|e| e.neighbor.as_str()).collect();
        let mut missing: Vec<&str> = priors
            .iter()
            .copied()
            .filter(|t| !present.contains(t))
            .collect();
        missing.sort_unstable();
        for target in missing {
            if (selected.len() as u64) >= budget {
                break;
            }
            selected.push(FlatEdge {
                relation: GLYPH_GLOBAL_CONNECT.to_string(),
                neighbor: target.to_string(),
                weight: PRIORITY_SYNTH_WEIGHT,
                priority: true,
            });
        }
    }

    // Budget enforcement over the whole selection, weakest out first.
    if (selected.len() as u64) > budget {
        selected.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.neighbor.cmp(&b.neighbor))
                .then_with(|| a.relation.cmp(&b.relation))
        });
        selected.truncate(budget as usize);
    }

    // 5. Bucket back, resort each bucket, recount.
    let mut relationships: BTreeMap<String, Vec<Edge>> = BTreeMap::new();
    for edge in selected {
        relationships
            .entry(edge.relation)
            .or_default()
            .push(Edge::new(edge.neighbor, edge.weight));
    }
    for list in relationships.values_mut() {
        sort_edges(list);
    }

    let mut out = AdjacencyRecord {
        token: record.token.clone(),
        cached_at: record.cached_at.clone(),
        attention_score: record.attention_score,
        total_relationships: 0,
        relationships,
        offline: record.offline,
        error: record.error.clone(),
    };
    out.total_relationships = out.edge_count() as u32;
    out
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════
