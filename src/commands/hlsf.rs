// ── /hlsf Command & Prompt Pipeline ────────────────────────────────────────
//
// The dispatcher's main verb. `/hlsf` renders the current index through
// graph assembly → clustering → layout; a bare prompt first runs the
// recursive expander over its tokens, records session memory, then renders
// the same way.
//
// Anchor resolution order: explicit tokens → glyph ledger reverse map →
// conversation focus → default anchors (top tokens by edge count, then
// relation-type count).

use crate::atoms::constants::MAX_EXPANSION_DEPTH;
use crate::atoms::error::{HlsfError, HlsfResult};
use crate::atoms::types::{normalize_token, tokenize_prompt, AdjacencyRecord, LayoutScope};
use crate::engine::attention::{score_all, score_record};
use crate::engine::cache::PutOptions;
use crate::engine::cluster::{cluster_graph, ClusterOptions};
use crate::engine::expand::ExpandOptions;
use crate::engine::graph::{assemble, hidden_component_count, AssembleOptions};
use crate::engine::layout::{plan_layout, LayoutOptions};
use crate::engine::session::SummaryOptions;
use crate::engine::state::EngineState;
use log::info;
use serde_json::json;
use std::collections::HashMap;

/// Default anchor count when nothing else resolves.
const DEFAULT_ANCHOR_CAP: usize = 6;

/// How anchors are chosen for a `/hlsf` run.
#[derive(Debug, Clone, PartialEq)]
pub enum AnchorMode {
    /// Use the conversation's focus tokens.
    Conversation,
    /// Explicit token list from `--[a, b, …]`.
    Tokens(Vec<String>),
    /// Glyphs resolved through the ledger's reverse map.
    Glyphs(Vec<char>),
    /// Fall back to the index's strongest tokens.
    Default,
}

/// Parsed `/hlsf` flags.
#[derive(Debug, Clone)]
pub struct HlsfArgs {
    pub mode: AnchorMode,
    pub depth: Option<f64>,
    /// Relation-type cap; `--types all` lifts it to the full registry.
    pub types: Option<usize>,
    /// Edges-per-type cap; `--ept all` removes it.
    pub ept: Option<usize>,
    pub scope: LayoutScope,
}

impl HlsfArgs {
    pub fn parse(rest: &str) -> Result<Self, String> {
        let mut args = HlsfArgs {
            mode: AnchorMode::Default,
            depth: None,
            types: None,
            ept: None,
            scope: LayoutScope::Db,
        };

        // The bracket group `--[a, b, …]` comes out first; everything else
        // is whitespace-separated flags.
        let mut remaining = rest.to_string();
        if let Some(start) = remaining.find("--[") {
            let Some(end_offset) = remaining[start..].find(']') else {
                return Err("unterminated --[…] group".to_string());
            };
            let end = start + end_offset;
            let contents = remaining[start + 3..end].to_string();
            remaining.replace_range(start..=end, " ");

            let entries: Vec<String> = contents
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if entries.is_empty() {
                return Err("empty --[…] group".to_string());
            }
            let all_glyphs = entries
                .iter()
                .all(|e| e.chars().count() == 1 && !e.chars().all(char::is_alphanumeric));
            args.mode = if all_glyphs {
                AnchorMode::Glyphs(entries.iter().filter_map(|e| e.chars().next()).collect())
            } else {
                AnchorMode::Tokens(
                    entries
                        .iter()
                        .filter_map(|e| normalize_token(e))
                        .collect(),
                )
            };
        }

        let mut flags = remaining.split_whitespace().peekable();
        while let Some(flag) = flags.next() {
            match flag {
                "--conversation" => {
                    if args.mode != AnchorMode::Default {
                        return Err("--conversation conflicts with --[…]".to_string());
                    }
                    args.mode = AnchorMode::Conversation;
                }
                "--depth" => {
                    let value = flags.next().ok_or("--depth needs a value")?;
                    let depth: f64 = value
                        .parse()
                        .map_err(|_| format!("bad depth {value:?}"))?;
                    if !depth.is_finite() || depth < 0.0 {
                        return Err(format!("bad depth {value:?}"));
                    }
                    args.depth = Some(depth.min(MAX_EXPANSION_DEPTH as f64));
                }
                "--types" => {
                    let value = flags.next().ok_or("--types needs a value")?;
                    args.types = Some(parse_cap(value, 50)?);
                }
                "--ept" => {
                    let value = flags.next().ok_or("--ept needs a value")?;
                    args.ept = Some(parse_cap(value, usize::MAX)?);
                }
                "-db" => args.scope = LayoutScope::Db,
                "-run" => args.scope = LayoutScope::State,
                "--scope" => {
                    let value = flags.next().ok_or("--scope needs run|db")?;
                    args.scope = match value {
                        "db" => LayoutScope::Db,
                        "run" => LayoutScope::State,
                        other => return Err(format!("bad scope {other:?}")),
                    };
                }
                other => return Err(format!("unknown flag {other:?}")),
            }
        }
        Ok(args)
    }
}

fn parse_cap(value: &str, all: usize) -> Result<usize, String> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(all);
    }
    value
        .parse::<usize>()
        .map_err(|_| format!("bad cap {value:?}"))
        .and_then(|n| {
            if n == 0 {
                Err("cap must be at least 1".to_string())
            } else {
                Ok(n)
            }
        })
}

/// `/hlsf` — render the current index.
pub async fn run_hlsf(state: &EngineState, args: HlsfArgs) -> HlsfResult<String> {
    bootstrap_remote(state).await;

    let mut index = scored_index(state);
    if index.is_empty() {
        return Err(HlsfError::InvalidPrompt(
            "the token cache is empty — enter a prompt or /loaddb first".into(),
        ));
    }
    let (augmented, focus) = state.session.lock().apply_conversation_overlay(&index);
    index = augmented;

    let anchors = resolve_anchors(state, &args.mode, &index, &focus)?;
    render(state, anchors, &index, focus, &args, None).await
}

/// Bare prompt — tokenize, expand, summarize, then render.
pub async fn run_prompt(state: &EngineState, text: &str) -> HlsfResult<String> {
    let tokens = tokenize_prompt(text);
    if tokens.is_empty() {
        return Err(HlsfError::InvalidPrompt(
            "prompt contains no usable tokens".into(),
        ));
    }
    bootstrap_remote(state).await;

    let prompt_id = uuid::Uuid::new_v4().to_string();
    state
        .session
        .lock()
        .record_prompt(&prompt_id, text, &tokens, &tokens);

    // ── Expansion ────────────────────────────────────────────────────────
    let expand_opts = {
        let config = state.config.read();
        ExpandOptions {
            prefer_db: true,
            ..ExpandOptions::from_config(&config)
        }
    };
    let db_index = state.cache.full_index();
    state.cancel.reset();
    let mut result = state
        .expander
        .expand(&tokens, text, &expand_opts, Some(&db_index), &state.cancel)
        .await?;

    // ── Attention scoring, written back into the cache ───────────────────
    score_all(&mut result.records);
    for record in result.records.values() {
        if record.error.is_none() && !record.offline {
            state
                .cache
                .put(&record.token, record.clone(), PutOptions { defer_reload: true })
                .ok();
        }
    }
    state.cache.index_rebuild()?;

    // ── Session summary ──────────────────────────────────────────────────
    {
        let label: String = text.chars().take(48).collect();
        let summary_opts = SummaryOptions {
            weight_floor: state.config.read().prune_weight_threshold,
            ..SummaryOptions::default()
        };
        state.session.lock().record_adjacency_summary(
            &prompt_id,
            &result.records,
            &label,
            &summary_opts,
        );
        state.session.lock().save(state.store.as_ref())?;
    }
    state.events.info(
        "expand",
        format!(
            "Prompt expanded: {} tokens, {} edges, complete={}",
            result.stats.visited_tokens, result.stats.total_edges, result.stats.complete_graph
        ),
    );

    // ── Render over the refreshed index ──────────────────────────────────
    let index = scored_index(state);
    let (index, focus) = state.session.lock().apply_conversation_overlay(&index);
    let args = HlsfArgs {
        mode: AnchorMode::Tokens(tokens.clone()),
        depth: None,
        types: None,
        ept: None,
        scope: LayoutScope::State,
    };
    let anchors = resolve_anchors(state, &args.mode, &index, &focus)?;
    let provenance = json!({
        "stats": result.stats,
        "provenance": result.provenance,
        "promptId": prompt_id,
    });
    render(state, anchors, &index, focus, &args, Some(provenance)).await
}

/// The shared GA → AC → LP tail, emitting the rendering payload.
async fn render(
    state: &EngineState,
    anchors: Vec<String>,
    index: &HashMap<String, AdjacencyRecord>,
    focus: Vec<String>,
    args: &HlsfArgs,
    expansion: Option<serde_json::Value>,
) -> HlsfResult<String> {
    let session_tokens = state.session.lock().session_tokens();

    let mut assemble_opts = AssembleOptions::from_config(&state.config.read());
    if let Some(depth) = args.depth {
        assemble_opts.depth = depth;
    }
    if let Some(types) = args.types {
        assemble_opts.relation_type_cap = types;
    }
    if let Some(ept) = args.ept {
        assemble_opts.edges_per_type = ept;
    }

    state.cancel.reset();
    let mut report = assemble(&anchors, index, &session_tokens, &assemble_opts, &state.cancel).await?;
    let cluster_count = cluster_graph(&mut report.graph, &ClusterOptions::default());
    let layout = plan_layout(
        index,
        &session_tokens,
        &LayoutOptions {
            scope: args.scope,
            focus_tokens: focus,
        },
    )?;

    let summary = format!(
        "Graph: {} nodes, {} links, {} clusters, {} hidden components",
        report.graph.node_count(),
        report.graph.link_count(),
        cluster_count,
        hidden_component_count(&report.graph),
    );
    info!("[hlsf] {summary}");
    state.events.info("hlsf", summary);

    let mut payload = json!({
        "anchors": &report.graph.anchors,
        "graph": &report.graph,
        "clusters": cluster_count,
        "fractional": &report.fractional,
        "layout": layout,
    });
    if let Some(expansion) = expansion {
        payload["expansion"] = expansion;
    }
    *state.current_graph.lock() = Some(report.graph);
    Ok(serde_json::to_string_pretty(&payload)?)
}

/// Resolve anchors per the mode's precedence.
fn resolve_anchors(
    state: &EngineState,
    mode: &AnchorMode,
    index: &HashMap<String, AdjacencyRecord>,
    focus: &[String],
) -> HlsfResult<Vec<String>> {
    match mode {
        AnchorMode::Tokens(tokens) => {
            if tokens.is_empty() {
                return Err(HlsfError::InvalidPrompt("no anchor tokens given".into()));
            }
            Ok(tokens.clone())
        }
        AnchorMode::Glyphs(glyphs) => {
            let ledger = state.ledger.lock();
            let mut anchors = Vec::new();
            for glyph in glyphs {
                if let Some(token) = ledger.best_token(*glyph, 0.5) {
                    if !anchors.contains(&token.to_string()) {
                        anchors.push(token.to_string());
                    }
                }
            }
            if anchors.is_empty() {
                return Err(HlsfError::InvalidPrompt(
                    "no glyphs resolve through the ledger".into(),
                ));
            }
            Ok(anchors)
        }
        AnchorMode::Conversation => {
            if !focus.is_empty() {
                return Ok(focus.to_vec());
            }
            let session_tokens = state.session.lock().session_tokens();
            let in_index: Vec<String> = session_tokens
                .into_iter()
                .filter(|t| index.contains_key(t))
                .take(DEFAULT_ANCHOR_CAP)
                .collect();
            if in_index.is_empty() {
                Ok(default_anchors(index, DEFAULT_ANCHOR_CAP))
            } else {
                Ok(in_index)
            }
        }
        AnchorMode::Default => Ok(default_anchors(index, DEFAULT_ANCHOR_CAP)),
    }
}

/// Top index tokens by (edge count, relation-type count), ties by token.
pub fn default_anchors(index: &HashMap<String, AdjacencyRecord>, cap: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, usize, usize)> = index
        .iter()
        .map(|(token, record)| (token, record.edge_count(), record.relationships.len()))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| a.0.cmp(b.0))
    });
    ranked
        .into_iter()
        .take(cap.max(1))
        .map(|(token, _, _)| token.clone())
        .collect()
}

/// Attention-scored snapshot of the token cache.
fn scored_index(state: &EngineState) -> HashMap<String, AdjacencyRecord> {
    let mut index = state.cache.full_index();
    for record in index.values_mut() {
        score_record(record);
    }
    index
}

/// Make the remote store usable without an explicit `/loaddb`: restore a
/// mirror, honor a default manifest URL, or fall back to the local
/// recorder.
async fn bootstrap_remote(state: &EngineState) {
    if state.remote.is_ready() {
        return;
    }
    if state.remote.load_mirror(state.store.as_ref()).unwrap_or(false) {
        return;
    }
    if let Ok(url) = std::env::var("HLSF_MANIFEST") {
        if !url.is_empty() {
            match state.remote.configure(&url).await {
                Ok(meta) => {
                    state.events.info(
                        "remote",
                        format!("Bootstrapped manifest from {url} ({} tokens)", meta.total_tokens),
                    );
                    return;
                }
                Err(e) => state.events.warn("remote", format!("Bootstrap failed: {e}")),
            }
        }
    }
    if !state.recorder.is_empty() {
        state.remote.attach_recorder(state.recorder.clone());
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kv::MemoryKv;
    use crate::engine::llm::ScriptedLlm;
    use std::sync::Arc;

    fn test_state() -> (EngineState, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm::new());
        let state = EngineState::new(Arc::new(MemoryKv::new()), llm.clone()).unwrap();
        (state, llm)
    }

    #[test]
    fn parse_token_group() {
        let args = HlsfArgs::parse("--[Dog, cat , bird] --depth 2.5 -run").unwrap();
        assert_eq!(
            args.mode,
            AnchorMode::Tokens(vec!["dog".into(), "cat".into(), "bird".into()])
        );
        assert_eq!(args.depth, Some(2.5));
        assert_eq!(args.scope, LayoutScope::State);
    }

    #[test]
    fn parse_glyph_group_and_caps() {
        let args = HlsfArgs::parse("--[◆, ●] --types all --ept 3").unwrap();
        assert_eq!(args.mode, AnchorMode::Glyphs(vec!['◆', '●']));
        assert_eq!(args.types, Some(50));
        assert_eq!(args.ept, Some(3));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(HlsfArgs::parse("--[unterminated").is_err());
        assert!(HlsfArgs::parse("--depth fast").is_err());
        assert!(HlsfArgs::parse("--types 0").is_err());
        assert!(HlsfArgs::parse("--mystery").is_err());
        assert!(HlsfArgs::parse("--conversation --[a, b]").is_err());
        assert!(HlsfArgs::parse("--[a] --conversation").is_err());
    }

    #[test]
    fn parse_depth_clamps_to_max() {
        let args = HlsfArgs::parse("--depth 99").unwrap();
        assert_eq!(args.depth, Some(MAX_EXPANSION_DEPTH as f64));
    }

    #[tokio::test]
    async fn prompt_pipeline_end_to_end() {
        let (state, llm) = test_state();
        llm.script_edges("garden", &[("⊃", "flower", 0.9), ("⊃", "soil", 0.8)]);
        llm.script_edges("flower", &[("⊂", "garden", 0.9)]);

        let payload = run_prompt(&state, "the garden").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert!(value["graph"]["nodes"].as_object().unwrap().len() >= 2);
        assert!(value["expansion"]["stats"]["visitedTokens"].as_u64().unwrap() >= 2);
        assert!(state.current_graph.lock().is_some());
        assert_eq!(state.session.lock().prompt_count(), 1);
        assert_eq!(state.session.lock().summary_count(), 1);
    }

    #[tokio::test]
    async fn hlsf_requires_a_populated_cache() {
        let (state, _) = test_state();
        let err = run_hlsf(&state, HlsfArgs::parse("").unwrap()).await.unwrap_err();
        assert!(matches!(err, HlsfError::InvalidPrompt(_)));
    }

    #[tokio::test]
    async fn hlsf_renders_after_prompt() {
        let (state, llm) = test_state();
        llm.script_edges("ocean", &[("⊃", "wave", 0.9), ("⊃", "salt", 0.7)]);
        run_prompt(&state, "the ocean").await.unwrap();

        let payload = run_hlsf(&state, HlsfArgs::parse("--[ocean]").unwrap())
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["anchors"][0], "ocean");
        assert!(value["layout"]["positions"].as_object().is_some());
    }

    #[test]
    fn default_anchor_ranking() {
        let mut index = HashMap::new();
        let mut big = AdjacencyRecord::empty("big");
        big.insert_edge("≡", "x", 0.9);
        big.insert_edge("→", "y", 0.8);
        big.normalize_lists();
        index.insert("big".to_string(), big);
        let mut small = AdjacencyRecord::empty("small");
        small.insert_edge("≡", "z", 0.9);
        small.normalize_lists();
        index.insert("small".to_string(), small);

        assert_eq!(default_anchors(&index, 2), vec!["big", "small"]);
    }
}
