// ── Core Configuration & Performance Profiles ──────────────────────────────
//
// One explicit config struct shared by every subsystem. The command
// dispatcher is the only mutator; the expander, pruner, and assembler
// borrow immutably. Every setter path funnels through `clamp()` so
// out-of-range values can never reach an algorithm.
//
// Named performance profiles bundle the budget knobs the way users think
// about them (low / balanced / high / max); applying one rewrites the
// budget fields and re-clamps.

use crate::atoms::constants::{KEY_CORE_CONFIG, MAX_EXPANSION_DEPTH};
use crate::atoms::error::HlsfResult;
use crate::atoms::types::PerformanceProfile;
use crate::engine::kv::KvStore;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Runtime-modifiable engine configuration. Field ranges are clamped, not
/// rejected — a shell user nudging a knob should land on the nearest legal
/// value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Minimum branching factor enforced per record (≥ 2).
    #[serde(rename = "branchingFactor")]
    pub branching_factor: u32,
    /// Node cap per expansion run (≥ 1).
    #[serde(rename = "maxNodes")]
    pub max_nodes: usize,
    /// Edge cap per expansion run (≥ 2 · branching factor).
    #[serde(rename = "maxEdges")]
    pub max_edges: usize,
    /// Global relationship-instance budget; `None` = unbounded.
    #[serde(rename = "maxRelationships")]
    pub max_relationships: Option<u64>,
    /// Relation types kept per record in assembly (1..=50).
    #[serde(rename = "maxRelationTypes")]
    pub max_relation_types: usize,
    /// Pruning weight floor (0..=1).
    #[serde(rename = "pruneWeightThreshold")]
    pub prune_weight_threshold: f64,
    /// Recursive expansion depth (0..=8).
    #[serde(rename = "adjacencyRecursionDepth")]
    pub adjacency_recursion_depth: u32,
    /// Edges kept per record per expansion level (1..=10).
    #[serde(rename = "adjacencyEdgesPerLevel")]
    pub adjacency_edges_per_level: usize,
    /// Minimum neighbors each expanded record must offer (≥ 2).
    #[serde(rename = "adjacencySpawnLimit")]
    pub adjacency_spawn_limit: u32,
    /// Top neighbors kept per token by the hidden subnet builder.
    #[serde(rename = "hiddenAdjacencyDegree")]
    pub hidden_adjacency_degree: usize,
    /// BFS depth of the hidden subnet builder.
    #[serde(rename = "hiddenAdjacencyDepth")]
    pub hidden_adjacency_depth: u32,
    /// Seed cap of the hidden subnet builder.
    #[serde(rename = "hiddenAdjacencyCap")]
    pub hidden_adjacency_cap: usize,
    /// Parallel chunk fetches in the remote store (1..=6 effective).
    #[serde(rename = "remoteChunkConcurrency")]
    pub remote_chunk_concurrency: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            branching_factor: 4,
            max_nodes: 160,
            max_edges: 512,
            max_relationships: None,
            max_relation_types: 8,
            prune_weight_threshold: 0.18,
            adjacency_recursion_depth: 2,
            adjacency_edges_per_level: 6,
            adjacency_spawn_limit: 3,
            hidden_adjacency_degree: 4,
            hidden_adjacency_depth: 2,
            hidden_adjacency_cap: 128,
            // hardware parallelism, capped at 6 by the remote store
            remote_chunk_concurrency: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
        }
    }
}

impl CoreConfig {
    /// Pull every field back into its legal range.
    pub fn clamp(&mut self) {
        self.branching_factor = self.branching_factor.max(2);
        self.max_nodes = self.max_nodes.max(1);
        self.max_edges = self.max_edges.max(2 * self.branching_factor as usize);
        self.max_relation_types = self.max_relation_types.clamp(1, 50);
        self.prune_weight_threshold = if self.prune_weight_threshold.is_finite() {
            self.prune_weight_threshold.clamp(0.0, 1.0)
        } else {
            0.18
        };
        self.adjacency_recursion_depth = self.adjacency_recursion_depth.min(MAX_EXPANSION_DEPTH);
        self.adjacency_edges_per_level = self.adjacency_edges_per_level.clamp(1, 10);
        self.adjacency_spawn_limit = self.adjacency_spawn_limit.max(2);
        self.hidden_adjacency_degree = self.hidden_adjacency_degree.max(1);
        self.hidden_adjacency_depth = self.hidden_adjacency_depth.max(1);
        self.hidden_adjacency_cap = self.hidden_adjacency_cap.max(1);
        self.remote_chunk_concurrency = self.remote_chunk_concurrency.max(1);
    }

    /// The budget knobs as a profile snapshot.
    pub fn profile(&self) -> PerformanceProfile {
        PerformanceProfile {
            branching_factor: self.branching_factor,
            max_nodes: self.max_nodes,
            max_edges: self.max_edges,
            max_relationships: self.max_relationships,
            max_relation_types: self.max_relation_types,
            prune_weight_threshold: self.prune_weight_threshold,
        }
    }

    /// Apply a performance profile. Only the budget fields change; the
    /// expansion and hidden-subnet knobs keep their values.
    pub fn apply_profile(&mut self, profile: &PerformanceProfile) {
        self.branching_factor = profile.branching_factor;
        self.max_nodes = profile.max_nodes;
        self.max_edges = profile.max_edges;
        self.max_relationships = profile.max_relationships;
        self.max_relation_types = profile.max_relation_types;
        self.prune_weight_threshold = profile.prune_weight_threshold.max(0.0);
        self.clamp();
        // The spawn limit tracks the branching factor unless a user has
        // pushed it higher.
        self.adjacency_spawn_limit = self.adjacency_spawn_limit.max(2).min(self.branching_factor);
        info!(
            "[config] Profile applied: branching={} nodes={} edges={} relationships={:?} types={} floor={}",
            self.branching_factor,
            self.max_nodes,
            self.max_edges,
            self.max_relationships,
            self.max_relation_types,
            self.prune_weight_threshold
        );
    }

    /// Load persisted config, falling back to defaults on absence or decode
    /// failure.
    pub fn load(store: &dyn KvStore) -> Self {
        let mut config = match store.get(KEY_CORE_CONFIG) {
            Ok(Some(json)) => serde_json::from_str::<CoreConfig>(&json).unwrap_or_else(|e| {
                warn!("[config] Persisted config unreadable ({e}); using defaults");
                CoreConfig::default()
            }),
            _ => CoreConfig::default(),
        };
        config.clamp();
        config
    }

    /// Persist the config. Quota failures are logged, not fatal.
    pub fn save(&self, store: &dyn KvStore) -> HlsfResult<()> {
        let json = serde_json::to_string(self)?;
        if let Err(e) = store.set(KEY_CORE_CONFIG, &json) {
            warn!("[config] Persist failed: {e}");
        }
        Ok(())
    }
}

/// Look up a named performance profile. Unknown names return `None`.
pub fn named_profile(name: &str) -> Option<PerformanceProfile> {
    let profile = match name.to_lowercase().as_str() {
        "low" => PerformanceProfile {
            branching_factor: 2,
            max_nodes: 48,
            max_edges: 96,
            max_relationships: Some(400),
            max_relation_types: 4,
            prune_weight_threshold: 0.30,
        },
        "balanced" => PerformanceProfile {
            branching_factor: 3,
            max_nodes: 120,
            max_edges: 360,
            max_relationships: Some(1_200),
            max_relation_types: 6,
            prune_weight_threshold: 0.22,
        },
        "high" => PerformanceProfile {
            branching_factor: 4,
            max_nodes: 240,
            max_edges: 960,
            max_relationships: Some(4_000),
            max_relation_types: 10,
            prune_weight_threshold: 0.18,
        },
        "max" => PerformanceProfile {
            branching_factor: 6,
            max_nodes: 600,
            max_edges: 2_400,
            max_relationships: None,
            max_relation_types: 50,
            prune_weight_threshold: 0.18,
        },
        _ => return None,
    };
    Some(profile)
}

/// Names of the built-in profiles, in escalation order.
pub fn profile_names() -> &'static [&'static str] {
    &["low", "balanced", "high", "max"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kv::MemoryKv;

    #[test]
    fn defaults_are_legal() {
        let mut c = CoreConfig::default();
        let before = c.clone();
        c.clamp();
        assert_eq!(c, before);
    }

    #[test]
    fn clamp_repairs_out_of_range() {
        let mut c = CoreConfig {
            branching_factor: 0,
            max_nodes: 0,
            max_edges: 1,
            max_relation_types: 99,
            prune_weight_threshold: 7.0,
            adjacency_recursion_depth: 40,
            adjacency_edges_per_level: 0,
            adjacency_spawn_limit: 0,
            ..CoreConfig::default()
        };
        c.clamp();
        assert_eq!(c.branching_factor, 2);
        assert_eq!(c.max_nodes, 1);
        assert_eq!(c.max_edges, 4);
        assert_eq!(c.max_relation_types, 50);
        assert_eq!(c.prune_weight_threshold, 1.0);
        assert_eq!(c.adjacency_recursion_depth, MAX_EXPANSION_DEPTH);
        assert_eq!(c.adjacency_edges_per_level, 1);
        assert_eq!(c.adjacency_spawn_limit, 2);
    }

    #[test]
    fn profiles_resolve_and_apply() {
        let mut c = CoreConfig::default();
        let low = named_profile("LOW").unwrap();
        c.apply_profile(&low);
        assert_eq!(c.branching_factor, 2);
        assert_eq!(c.max_nodes, 48);
        assert_eq!(c.max_relationships, Some(400));
        assert!(c.adjacency_spawn_limit <= c.branching_factor);

        assert!(named_profile("turbo").is_none());
        for name in profile_names() {
            assert!(named_profile(name).is_some());
        }
    }

    #[test]
    fn persistence_roundtrip() {
        let store = MemoryKv::new();
        let mut c = CoreConfig::default();
        c.max_nodes = 77;
        c.save(&store).unwrap();
        let loaded = CoreConfig::load(&store);
        assert_eq!(loaded, c);
    }

    #[test]
    fn load_missing_or_corrupt_defaults() {
        let store = MemoryKv::new();
        assert_eq!(CoreConfig::load(&store), CoreConfig::default());
        store.set(KEY_CORE_CONFIG, "{not json").unwrap();
        assert_eq!(CoreConfig::load(&store), CoreConfig::default());
    }
}
