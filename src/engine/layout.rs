// ── Dimension Layout Planner ───────────────────────────────────────────────
//
// From the (clustered) record index, computes anchors, active angles, level
// packing, and per-token polar positions with scope-aware focus tokens.
// Downstream renderers consume the result verbatim, so every step is
// deterministic: scores tie-break by token ordering, angles derive only
// from index arithmetic, and all collections iterate through sorted views.
//
// Levels:
//   0 — anchors only, evenly placed on the inner circle
//   1 — one cell per anchor: the anchor's strongest cluster members spread
//       across its sector
//   2 — leftovers bucketed into fixed-span sectors (present only when
//       tokens remain)

use crate::atoms::error::{HlsfError, HlsfResult};
use crate::atoms::types::{
    AdjacencyRecord, DimensionLayout, LayoutCell, LayoutLevel, LayoutScope, TokenPosition,
};
use crate::engine::cluster::{cosine, Signature};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::f64::consts::TAU;

/// Radii of the three levels, innermost first.
const LEVEL_RADII: [f64; 3] = [1.0, 2.0, 3.0];
/// Radial spacing between stacked tokens inside a level-2 sector.
const SECTOR_STACK_STEP: f64 = 0.25;
/// Fixed sector count of the leftover level.
const LEFTOVER_SECTORS: usize = 16;

/// Per-run layout inputs.
#[derive(Debug, Clone)]
pub struct LayoutOptions {
    pub scope: LayoutScope,
    /// Tokens that must lead the anchor list (conversation focus).
    pub focus_tokens: Vec<String>,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        LayoutOptions {
            scope: LayoutScope::Db,
            focus_tokens: Vec::new(),
        }
    }
}

/// Normalize an angle into [0, 2π).
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(TAU);
    if a.is_finite() {
        a
    } else {
        0.0
    }
}

/// Plan the layout over `index`, projecting to the session's tokens when
/// scope is `State` (falling back to `Db` on an empty projection).
pub fn plan_layout(
    index: &HashMap<String, AdjacencyRecord>,
    session_tokens: &[String],
    opts: &LayoutOptions,
) -> HlsfResult<DimensionLayout> {
    if index.is_empty() {
        return Err(HlsfError::InvalidPrompt("empty index, nothing to lay out".into()));
    }

    // ── 1. Scope projection ──────────────────────────────────────────────
    let (scope, sub_index) = match opts.scope {
        LayoutScope::Db => (LayoutScope::Db, sorted_view(index, None)),
        LayoutScope::State => {
            let session: HashSet<String> =
                session_tokens.iter().map(|t| t.to_lowercase()).collect();
            let projected = sorted_view(index, Some(&session));
            if projected.is_empty() {
                debug!("[layout] State projection empty; falling back to db scope");
                (LayoutScope::Db, sorted_view(index, None))
            } else {
                (LayoutScope::State, projected)
            }
        }
    };

    // ── 2. Active relation types ─────────────────────────────────────────
    let active_types: BTreeSet<&String> = sub_index
        .iter()
        .flat_map(|(_, r)| {
            r.relationships
                .iter()
                .filter(|(_, list)| !list.is_empty())
                .map(|(rel, _)| rel)
        })
        .collect();

    // ── 3. Dimension ─────────────────────────────────────────────────────
    let focus: Vec<String> = {
        let present: HashSet<&String> = sub_index.iter().map(|&(t, _)| t).collect();
        let mut seen = HashSet::new();
        opts.focus_tokens
            .iter()
            .map(|t| t.to_lowercase())
            .filter(|t| present.contains(t) && seen.insert(t.clone()))
            .collect()
    };
    let mut dimension = 2 * active_types.len();
    if !focus.is_empty() {
        dimension = dimension.max(focus.len());
    }
    dimension = dimension.max(1);

    // ── 4–5. Anchor selection, focus tokens leading ──────────────────────
    let signatures = record_signatures(&sub_index);
    let scored = score_tokens(&sub_index, &signatures);
    let mut anchors: Vec<String> = focus.clone();
    for (token, _) in &scored {
        if anchors.len() >= dimension {
            break;
        }
        if !anchors.contains(token) {
            anchors.push(token.clone());
        }
    }
    let effective_dimension = anchors.len();
    if effective_dimension == 0 {
        return Err(HlsfError::InvalidPrompt("no anchors selectable".into()));
    }

    // ── 6. Cluster every remaining token to its best anchor ──────────────
    let mut cluster_members: BTreeMap<String, Vec<(String, f64)>> =
        anchors.iter().map(|a| (a.clone(), Vec::new())).collect();
    for &(token, _) in &sub_index {
        if anchors.contains(token) {
            continue;
        }
        let sig = signatures.get(token);
        let mut best: Option<(&String, f64)> = None;
        for anchor in &anchors {
            let similarity = match (sig, signatures.get(anchor)) {
                (Some(a), Some(b)) => cosine(a, b),
                _ => 0.0,
            };
            let better = match best {
                None => true,
                Some((_, score)) => similarity > score + f64::EPSILON,
            };
            if better {
                best = Some((anchor, similarity));
            }
        }
        if let Some((anchor, similarity)) = best {
            if let Some(members) = cluster_members.get_mut(anchor) {
                members.push((token.clone(), similarity));
            }
        }
    }
    for members in cluster_members.values_mut() {
        members.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
    }

    // ── 7–8. Level packing and polar placement ───────────────────────────
    let sector_span = TAU / effective_dimension as f64;
    let mut positions: BTreeMap<String, TokenPosition> = BTreeMap::new();
    let mut levels: Vec<LayoutLevel> = Vec::new();
    let mut active_angles: Vec<f64> = Vec::new();
    let mut max_radius: f64 = 0.0;

    // Level 0 — anchors on the inner circle.
    let mut level0 = LayoutLevel { cells: Vec::new() };
    for (cell_index, anchor) in anchors.iter().enumerate() {
        let angle = normalize_angle(cell_index as f64 * sector_span);
        active_angles.push(angle);
        positions.insert(
            anchor.clone(),
            TokenPosition {
                angle,
                radius: LEVEL_RADII[0],
                level: 0,
                cell_index,
            },
        );
        max_radius = max_radius.max(LEVEL_RADII[0]);
        level0.cells.push(LayoutCell {
            anchor: anchor.clone(),
            tokens: vec![anchor.clone()],
        });
    }
    levels.push(level0);

    // Level 1 — per-anchor cells: top-D members spread across the sector.
    let mut leftovers: Vec<String> = Vec::new();
    let mut level1 = LayoutLevel { cells: Vec::new() };
    let mut any_level1 = false;
    for (cell_index, anchor) in anchors.iter().enumerate() {
        let center = normalize_angle(cell_index as f64 * sector_span);
        let members = cluster_members.get(anchor).cloned().unwrap_or_default();
        let (kept, rest) = members.split_at(members.len().min(dimension));
        for (slot, (token, _)) in kept.iter().enumerate() {
            let fraction = (slot + 1) as f64 / (kept.len() + 1) as f64;
            let angle = normalize_angle(center - sector_span / 2.0 + sector_span * fraction);
            positions.insert(
                token.clone(),
                TokenPosition {
                    angle,
                    radius: LEVEL_RADII[1],
                    level: 1,
                    cell_index,
                },
            );
            max_radius = max_radius.max(LEVEL_RADII[1]);
        }
        if !kept.is_empty() {
            any_level1 = true;
        }
        level1.cells.push(LayoutCell {
            anchor: anchor.clone(),
            tokens: kept.iter().map(|(t, _)| t.clone()).collect(),
        });
        leftovers.extend(rest.iter().map(|(t, _)| t.clone()));
    }
    if any_level1 {
        levels.push(level1);
    }

    // Level 2 — leftovers in fixed-span sectors.
    leftovers.sort();
    if !leftovers.is_empty() {
        let span = TAU / LEFTOVER_SECTORS as f64;
        let mut cells: Vec<LayoutCell> = (0..LEFTOVER_SECTORS)
            .map(|_| LayoutCell {
                anchor: String::new(),
                tokens: Vec::new(),
            })
            .collect();
        for (i, token) in leftovers.iter().enumerate() {
            let sector = i % LEFTOVER_SECTORS;
            let slot = i / LEFTOVER_SECTORS;
            let angle = normalize_angle(sector as f64 * span + span / 2.0);
            let radius = LEVEL_RADII[2] + slot as f64 * SECTOR_STACK_STEP;
            positions.insert(
                token.clone(),
                TokenPosition {
                    angle,
                    radius,
                    level: 2,
                    cell_index: sector,
                },
            );
            max_radius = max_radius.max(radius);
            if let Some(cell) = cells.get_mut(sector) {
                cell.tokens.push(token.clone());
            }
        }
        cells.retain(|c| !c.tokens.is_empty());
        levels.push(LayoutLevel { cells });
    }

    let level_count = levels.len();
    let last_level_components = levels.last().map(|l| l.cells.len()).unwrap_or(0);

    info!(
        "[layout] {:?} scope: {} tokens, D={} (effective {}), {} levels, {} cells in last",
        scope,
        positions.len(),
        dimension,
        effective_dimension,
        level_count,
        last_level_components
    );

    Ok(DimensionLayout {
        scope,
        dimension,
        effective_dimension,
        anchors,
        levels,
        active_angles,
        positions,
        max_radius,
        level_count,
        last_level_components,
    })
}

/// Sorted (token, record) view, optionally restricted to a session set.
fn sorted_view<'a>(
    index: &'a HashMap<String, AdjacencyRecord>,
    session: Option<&HashSet<String>>,
) -> Vec<(&'a String, &'a AdjacencyRecord)> {
    let mut view: Vec<(&String, &AdjacencyRecord)> = index
        .iter()
        .filter(|(token, _)| session.map_or(true, |s| s.contains(*token)))
        .collect();
    view.sort_by(|a, b| a.0.cmp(b.0));
    view
}

/// Out-edge signatures per record token.
fn record_signatures(view: &[(&String, &AdjacencyRecord)]) -> HashMap<String, Signature> {
    view.iter()
        .map(|(token, record)| {
            let mut sig = Signature::default();
            for (_, edge) in record.edges() {
                *sig.bag.entry(edge.neighbor.clone()).or_insert(0.0) += edge.weight;
                sig.neighbors.insert(edge.neighbor.clone());
            }
            ((*token).clone(), sig)
        })
        .collect()
}

/// Anchor scores: 0.4·freq + 0.3·out + 0.2·in + 0.1·avgCosineSignature,
/// each component normalized by its maximum; descending, ties by token.
fn score_tokens(
    view: &[(&String, &AdjacencyRecord)],
    signatures: &HashMap<String, Signature>,
) -> Vec<(String, f64)> {
    let mut freq: BTreeMap<&str, f64> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, f64> = BTreeMap::new();
    for (_, record) in view {
        let mut sources_seen: HashSet<&str> = HashSet::new();
        for (_, edge) in record.edges() {
            *freq.entry(edge.neighbor.as_str()).or_insert(0.0) += 1.0;
            if sources_seen.insert(edge.neighbor.as_str()) {
                *in_degree.entry(edge.neighbor.as_str()).or_insert(0.0) += 1.0;
            }
        }
    }

    let tokens: Vec<&String> = view.iter().map(|(t, _)| *t).collect();
    let avg_cos: BTreeMap<&str, f64> = tokens
        .iter()
        .map(|token| {
            let sig = signatures.get(*token);
            let mut sum = 0.0;
            let mut count = 0usize;
            for other in &tokens {
                if other == token {
                    continue;
                }
                if let (Some(a), Some(b)) = (sig, signatures.get(*other)) {
                    sum += cosine(a, b);
                    count += 1;
                }
            }
            (
                token.as_str(),
                if count == 0 { 0.0 } else { sum / count as f64 },
            )
        })
        .collect();

    let max_of = |m: &BTreeMap<&str, f64>| m.values().cloned().fold(0.0_f64, f64::max).max(1.0);
    let max_freq = max_of(&freq);
    let max_in = max_of(&in_degree);
    let max_out = view
        .iter()
        .map(|(_, r)| r.edge_count() as f64)
        .fold(0.0_f64, f64::max)
        .max(1.0);
    let max_cos = max_of(&avg_cos);

    let mut scored: Vec<(String, f64)> = view
        .iter()
        .map(|(token, record)| {
            let f = freq.get(token.as_str()).copied().unwrap_or(0.0) / max_freq;
            let out = record.edge_count() as f64 / max_out;
            let inc = in_degree.get(token.as_str()).copied().unwrap_or(0.0) / max_in;
            let cos = avg_cos.get(token.as_str()).copied().unwrap_or(0.0) / max_cos;
            ((*token).clone(), 0.4 * f + 0.3 * out + 0.2 * inc + 0.1 * cos)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════
