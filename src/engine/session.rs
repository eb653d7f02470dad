// ── Session Memory ─────────────────────────────────────────────────────────
//
// Bounded ring of prompt records plus an insertion-ordered map of
// adjacency summaries. Later expansions read these back as a
// conversation-focus overlay; the layout planner uses the session token
// set for state-scoped runs.
//
// Session memory never mutates the token cache — overlays are merged into
// clones, and summaries hold deep copies pruned to the session floor.

use crate::atoms::constants::{
    KEY_SESSION_MEMORY, SESSION_FOCUS_CAP, SESSION_PROMPT_CAP, SESSION_SUMMARY_CAP,
    SUMMARY_DEFAULT_LIMIT, SUMMARY_EDGES_PER_TOKEN,
};
use crate::atoms::error::HlsfResult;
use crate::atoms::types::{
    sort_edges, AdjacencyRecord, Edge, PromptRecord, SummaryEntry, SummaryRecord,
};
use crate::engine::kv::KvStore;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Options for `record_adjacency_summary`.
#[derive(Debug, Clone, Copy)]
pub struct SummaryOptions {
    /// Top records (by attention) copied into the summary.
    pub limit: usize,
    /// Edge cap per copied record.
    pub edges_per_token: usize,
    /// Session weight floor applied to copied relationships.
    pub weight_floor: f64,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        SummaryOptions {
            limit: SUMMARY_DEFAULT_LIMIT,
            edges_per_token: SUMMARY_EDGES_PER_TOKEN,
            weight_floor: 0.18,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionMemory {
    prompts: VecDeque<PromptRecord>,
    /// Insertion-ordered: updates keep position, new ids append at the tail.
    summaries: Vec<SummaryRecord>,
    last_prompt: Option<String>,
    last_adjacency: Option<String>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Prompts ──────────────────────────────────────────────────────────

    /// Record a prompt; evicts the oldest past the cap.
    pub fn record_prompt(&mut self, id: &str, text: &str, tokens: &[String], seeds: &[String]) {
        let unique = |items: &[String]| -> Vec<String> {
            let mut seen = BTreeSet::new();
            items
                .iter()
                .filter(|t| seen.insert((*t).clone()))
                .cloned()
                .collect()
        };
        self.prompts.push_back(PromptRecord {
            id: id.to_string(),
            text: text.to_string(),
            tokens: unique(tokens),
            adjacency_seeds: unique(seeds),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
        while self.prompts.len() > SESSION_PROMPT_CAP {
            self.prompts.pop_front();
        }
        self.last_prompt = Some(id.to_string());
    }

    pub fn prompts(&self) -> impl Iterator<Item = &PromptRecord> {
        self.prompts.iter()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.len()
    }

    pub fn last_prompt(&self) -> Option<&PromptRecord> {
        let id = self.last_prompt.as_deref()?;
        self.prompts.iter().rev().find(|p| p.id == id)
    }

    // ── Adjacency summaries ──────────────────────────────────────────────

    /// Deep-copy the strongest records of an expansion into a summary.
    pub fn record_adjacency_summary(
        &mut self,
        id: &str,
        adjacency: &BTreeMap<String, AdjacencyRecord>,
        label: &str,
        opts: &SummaryOptions,
    ) {
        // Top entries by attention, ties by token ascending.
        let mut ranked: Vec<&AdjacencyRecord> = adjacency.values().collect();
        ranked.sort_by(|a, b| {
            b.attention_score
                .partial_cmp(&a.attention_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.token.cmp(&b.token))
        });
        ranked.truncate(opts.limit.max(1));

        let summary: Vec<SummaryEntry> = ranked
            .iter()
            .map(|record| {
                let mut relationships: BTreeMap<String, Vec<Edge>> = BTreeMap::new();
                let mut remaining = opts.edges_per_token.max(1);
                for (rel, list) in &record.relationships {
                    if remaining == 0 {
                        break;
                    }
                    let kept: Vec<Edge> = list
                        .iter()
                        .filter(|e| e.weight >= opts.weight_floor)
                        .take(remaining)
                        .cloned()
                        .collect();
                    if kept.is_empty() {
                        continue;
                    }
                    remaining -= kept.len();
                    let mut kept = kept;
                    sort_edges(&mut kept);
                    relationships.insert(rel.clone(), kept);
                }
                SummaryEntry {
                    token: record.token.clone(),
                    attention: record.attention_score,
                    total_relationships: record.total_relationships,
                    relationships,
                }
            })
            .collect();

        let record = SummaryRecord {
            id: id.to_string(),
            label: label.to_string(),
            token_count: summary.len() as u32,
            summary,
            updated_at: chrono::Utc::now().to_rfc3339(),
        };

        match self.summaries.iter_mut().find(|s| s.id == id) {
            Some(slot) => *slot = record,
            None => self.summaries.push(record),
        }
        while self.summaries.len() > SESSION_SUMMARY_CAP {
            self.summaries.remove(0);
        }
        self.last_adjacency = Some(id.to_string());
    }

    pub fn summary_count(&self) -> usize {
        self.summaries.len()
    }

    // ── Conversation overlay ─────────────────────────────────────────────

    /// Merge stored summaries into a clone of `index` and pick up to 12
    /// focus tokens from the latest summary, weighted by attention.
    pub fn apply_conversation_overlay(
        &self,
        index: &HashMap<String, AdjacencyRecord>,
    ) -> (HashMap<String, AdjacencyRecord>, Vec<String>) {
        let mut augmented = index.clone();
        for summary in &self.summaries {
            for entry in &summary.summary {
                let record = augmented
                    .entry(entry.token.clone())
                    .or_insert_with(|| AdjacencyRecord::empty(&entry.token));
                let mut changed = false;
                for (rel, list) in &entry.relationships {
                    for edge in list {
                        if record.edge_weight(rel, &edge.neighbor).is_none() {
                            record.insert_edge(rel, &edge.neighbor, edge.weight);
                            changed = true;
                        }
                    }
                }
                if changed {
                    record.normalize_lists();
                }
            }
        }

        let focus = match self
            .last_adjacency
            .as_deref()
            .and_then(|id| self.summaries.iter().find(|s| s.id == id))
        {
            Some(latest) => {
                let mut entries: Vec<(&String, f64)> = latest
                    .summary
                    .iter()
                    .map(|e| (&e.token, e.attention))
                    .collect();
                entries.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(b.0))
                });
                entries
                    .into_iter()
                    .take(SESSION_FOCUS_CAP)
                    .map(|(t, _)| t.clone())
                    .collect()
            }
            None => Vec::new(),
        };
        (augmented, focus)
    }

    /// Every token the session has touched: prompt tokens, seeds, and
    /// summarized tokens, ascending.
    pub fn session_tokens(&self) -> Vec<String> {
        let mut tokens: BTreeSet<String> = BTreeSet::new();
        for prompt in &self.prompts {
            tokens.extend(prompt.tokens.iter().cloned());
            tokens.extend(prompt.adjacency_seeds.iter().cloned());
        }
        for summary in &self.summaries {
            tokens.extend(summary.summary.iter().map(|e| e.token.clone()));
        }
        tokens.into_iter().collect()
    }

    /// Reset everything.
    pub fn clear(&mut self) {
        self.prompts.clear();
        self.summaries.clear();
        self.last_prompt = None;
        self.last_adjacency = None;
    }

    // ── Persistence (optional flush) ─────────────────────────────────────

    pub fn save(&self, store: &dyn KvStore) -> HlsfResult<()> {
        let json = serde_json::to_string(self)?;
        if let Err(e) = store.set(KEY_SESSION_MEMORY, &json) {
            warn!("[session] Persist failed: {e}");
        }
        Ok(())
    }

    pub fn load(store: &dyn KvStore) -> Self {
        match store.get(KEY_SESSION_MEMORY) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_default(),
            _ => SessionMemory::default(),
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kv::MemoryKv;

    fn record(token: &str, attention: f64, edges: &[(&str, &str, f64)]) -> AdjacencyRecord {
        let mut r = AdjacencyRecord::empty(token);
        for (rel, neighbor, weight) in edges {
            r.insert_edge(rel, neighbor, *weight);
        }
        r.normalize_lists();
        r.attention_score = attention;
        r
    }

    #[test]
    fn prompt_ring_evicts_oldest() {
        let mut sm = SessionMemory::new();
        for i in 0..(SESSION_PROMPT_CAP + 5) {
            sm.record_prompt(&format!("p{i}"), "text", &["tok".into()], &[]);
        }
        assert_eq!(sm.prompt_count(), SESSION_PROMPT_CAP);
        assert_eq!(sm.prompts().next().unwrap().id, "p5");
        assert_eq!(sm.last_prompt().unwrap().id, format!("p{}", SESSION_PROMPT_CAP + 4));
    }

    #[test]
    fn prompt_tokens_are_unique() {
        let mut sm = SessionMemory::new();
        sm.record_prompt(
            "p1",
            "the cat the cat",
            &["the".into(), "cat".into(), "the".into()],
            &["cat".into(), "cat".into()],
        );
        let p = sm.last_prompt().unwrap();
        assert_eq!(p.tokens, vec!["cat", "the"]);
        assert_eq!(p.adjacency_seeds, vec!["cat"]);
    }

    #[test]
    fn summary_keeps_top_by_attention_and_prunes() {
        let mut sm = SessionMemory::new();
        let mut adjacency = BTreeMap::new();
        adjacency.insert(
            "high".to_string(),
            record("high", 0.9, &[("≡", "a", 0.8), ("≡", "weak", 0.05)]),
        );
        adjacency.insert("low".to_string(), record("low", 0.1, &[("≡", "b", 0.5)]));
        adjacency.insert("mid".to_string(), record("mid", 0.5, &[("≡", "c", 0.6)]));

        let opts = SummaryOptions {
            limit: 2,
            edges_per_token: 6,
            weight_floor: 0.18,
        };
        sm.record_adjacency_summary("s1", &adjacency, "run one", &opts);
        assert_eq!(sm.summary_count(), 1);

        let (augmented, focus) = sm.apply_conversation_overlay(&HashMap::new());
        // only the top-2 records made the summary
        assert!(augmented.contains_key("high"));
        assert!(augmented.contains_key("mid"));
        assert!(!augmented.contains_key("low"));
        // the below-floor edge was pruned from the copy
        assert!(augmented["high"].edge_weight("≡", "weak").is_none());
        assert_eq!(focus, vec!["high", "mid"]);
    }

    #[test]
    fn summary_map_is_insertion_ordered_with_cap() {
        let mut sm = SessionMemory::new();
        let adjacency: BTreeMap<String, AdjacencyRecord> =
            [("t".to_string(), record("t", 0.5, &[("≡", "x", 0.5)]))].into();
        for i in 0..(SESSION_SUMMARY_CAP + 3) {
            sm.record_adjacency_summary(&format!("s{i}"), &adjacency, "label", &SummaryOptions::default());
        }
        assert_eq!(sm.summary_count(), SESSION_SUMMARY_CAP);
        // updating an existing id does not grow the map
        sm.record_adjacency_summary(
            &format!("s{}", SESSION_SUMMARY_CAP + 2),
            &adjacency,
            "updated",
            &SummaryOptions::default(),
        );
        assert_eq!(sm.summary_count(), SESSION_SUMMARY_CAP);
    }

    #[test]
    fn overlay_adds_only_missing_edges() {
        let mut sm = SessionMemory::new();
        let mut adjacency = BTreeMap::new();
        adjacency.insert(
            "alpha".to_string(),
            record("alpha", 0.7, &[("≡", "beta", 0.9), ("≡", "gamma", 0.8)]),
        );
        sm.record_adjacency_summary("s1", &adjacency, "run", &SummaryOptions::default());

        let mut index = HashMap::new();
        index.insert(
            "alpha".to_string(),
            record("alpha", 0.0, &[("≡", "beta", 0.4)]),
        );
        let (augmented, _) = sm.apply_conversation_overlay(&index);
        // existing edge untouched, missing edge added
        assert_eq!(augmented["alpha"].edge_weight("≡", "beta"), Some(0.4));
        assert_eq!(augmented["alpha"].edge_weight("≡", "gamma"), Some(0.8));
        // source index not mutated
        assert_eq!(index["alpha"].edge_weight("≡", "gamma"), None);
    }

    #[test]
    fn session_tokens_union() {
        let mut sm = SessionMemory::new();
        sm.record_prompt("p1", "text", &["cat".into()], &["dog".into()]);
        let adjacency: BTreeMap<String, AdjacencyRecord> =
            [("bird".to_string(), record("bird", 0.5, &[]))].into();
        sm.record_adjacency_summary("s1", &adjacency, "run", &SummaryOptions::default());
        assert_eq!(sm.session_tokens(), vec!["bird", "cat", "dog"]);
        sm.clear();
        assert!(sm.session_tokens().is_empty());
    }

    #[test]
    fn persistence_roundtrip() {
        let store = MemoryKv::new();
        let mut sm = SessionMemory::new();
        sm.record_prompt("p1", "hello world", &["hello".into(), "world".into()], &[]);
        sm.save(&store).unwrap();
        let loaded = SessionMemory::load(&store);
        assert_eq!(loaded.prompt_count(), 1);
        assert_eq!(loaded.last_prompt().unwrap().id, "p1");
    }
}
