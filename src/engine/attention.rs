// ── Attention Scorer ───────────────────────────────────────────────────────
//
// Computes the per-record attention score:
//
//     attention = Σ over all edges of (weight · priority(relation))
//                 ─────────────────────────────────────────────────
//                            max(1, edge_count)
//
// rounded to 3 decimals and clamped to [0, 1], with
// `total_relationships` refreshed to the edge count. Idempotent: scoring a
// scored collection changes nothing.

use crate::atoms::types::AdjacencyRecord;
use crate::engine::relations::priority_of;
use std::collections::BTreeMap;

/// Round to 3 decimal places, half away from zero.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Score one record in place. Returns the computed attention.
pub fn score_record(record: &mut AdjacencyRecord) -> f64 {
    let mut weighted_sum = 0.0;
    let mut edge_count = 0usize;
    for (relation, list) in &record.relationships {
        let priority = priority_of(relation);
        for edge in list {
            if edge.weight.is_finite() {
                weighted_sum += edge.weight.clamp(0.0, 1.0) * priority;
            }
            edge_count += 1;
        }
    }
    let attention = round3(weighted_sum / edge_count.max(1) as f64).clamp(0.0, 1.0);
    record.attention_score = attention;
    record.total_relationships = edge_count as u32;
    attention
}

/// Score every record in a collection in place.
pub fn score_all(records: &mut BTreeMap<String, AdjacencyRecord>) {
    for record in records.values_mut() {
        score_record(record);
    }
}
