// ── /maphidden ─────────────────────────────────────────────────────────────
// Maps the hidden-adjacency subnet over the cached index: seeds from the
// given tokens (or the strongest index tokens), warms them through the
// remote store, assembles the subnet, and reports its components.

use crate::atoms::error::{HlsfError, HlsfResult};
use crate::atoms::types::normalize_token;
use crate::commands::hlsf::default_anchors;
use crate::engine::attention::score_record;
use crate::engine::graph::{assemble, hidden_component_count, AssembleOptions};
use crate::engine::state::EngineState;
use serde_json::json;

#[derive(Debug, Clone)]
struct MapHiddenArgs {
    /// Minimum edge count for a record to participate.
    min_edges: usize,
    depth: Option<u32>,
    degree: Option<usize>,
    cap: Option<usize>,
    concurrency: Option<usize>,
    tokens: Vec<String>,
}

fn parse_args(rest: &str) -> Result<MapHiddenArgs, String> {
    let mut args = MapHiddenArgs {
        min_edges: 0,
        depth: None,
        degree: None,
        cap: None,
        concurrency: None,
        tokens: Vec::new(),
    };
    let mut parts = rest.split_whitespace().peekable();
    while let Some(part) = parts.next() {
        let mut numeric = |name: &str| -> Result<usize, String> {
            let value = parts.next().ok_or(format!("{name} needs a value"))?;
            value
                .parse::<usize>()
                .map_err(|_| format!("bad {name} value {value:?}"))
        };
        match part {
            "--min" => args.min_edges = numeric("--min")?,
            "--depth" => args.depth = Some(numeric("--depth")? as u32),
            "--edges" => args.degree = Some(numeric("--edges")?.max(1)),
            "--limit" => args.cap = Some(numeric("--limit")?.max(1)),
            "--concurrency" => args.concurrency = Some(numeric("--concurrency")?.max(1)),
            token if token.starts_with("--") => {
                return Err(format!("unknown flag {token:?}"));
            }
            token => {
                if let Some(t) = normalize_token(token) {
                    args.tokens.push(t);
                }
            }
        }
    }
    Ok(args)
}

pub async fn map_hidden(state: &EngineState, rest: &str) -> HlsfResult<String> {
    let args = parse_args(rest).map_err(HlsfError::InvalidPrompt)?;

    if let Some(concurrency) = args.concurrency {
        let config = state.config.read();
        state.remote.apply_config(
            concurrency,
            config.prune_weight_threshold,
            config.adjacency_edges_per_level.max(1) * config.max_relation_types.max(1),
        );
    }

    // Warm the requested tokens from the remote store first.
    if !args.tokens.is_empty() && state.remote.is_ready() {
        state.remote.preload_tokens(&args.tokens).await?;
    }

    let mut index = state.cache.full_index();
    for record in index.values_mut() {
        score_record(record);
    }
    index.retain(|_, record| record.edge_count() >= args.min_edges);
    if index.is_empty() {
        return Err(HlsfError::InvalidPrompt(format!(
            "no cached records with at least {} edges",
            args.min_edges
        )));
    }

    let seeds = if args.tokens.is_empty() {
        default_anchors(&index, 8)
    } else {
        args.tokens.clone()
    };

    let options = {
        let config = state.config.read();
        AssembleOptions {
            // anchors only — the subnet does the walking
            depth: 0.0,
            relation_type_cap: config.max_relation_types,
            edges_per_type: config.adjacency_edges_per_level,
            hidden_degree: args.degree.unwrap_or(config.hidden_adjacency_degree),
            hidden_depth: args.depth.unwrap_or(config.hidden_adjacency_depth),
            hidden_cap: args.cap.unwrap_or(config.hidden_adjacency_cap),
        }
    };

    let session_tokens = state.session.lock().session_tokens();
    state.cancel.reset();
    let report = assemble(&seeds, &index, &session_tokens, &options, &state.cancel).await?;

    let components = hidden_component_count(&report.graph);
    let subnet_size = report.graph.hidden_adjacency.len();
    let hidden_links = report
        .graph
        .links
        .iter()
        .filter(|l| l.rtype == crate::engine::relations::GLYPH_HIDDEN_ADJACENCY)
        .count();

    state.events.info(
        "hidden",
        format!(
            "Hidden subnet: {subnet_size} tokens, {hidden_links} links, {components} component(s), {} repair(s)",
            report.repairs
        ),
    );

    let payload = json!({
        "seeds": report.graph.anchors,
        "subnetTokens": subnet_size,
        "hiddenLinks": hidden_links,
        "components": components,
        "repairs": report.repairs,
        "hiddenAdjacency": report.graph.hidden_adjacency,
    });
    Ok(serde_json::to_string_pretty(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cache::PutOptions;
    use crate::engine::kv::MemoryKv;
    use crate::engine::llm::ScriptedLlm;
    use std::sync::Arc;

    fn test_state() -> EngineState {
        EngineState::new(Arc::new(MemoryKv::new()), Arc::new(ScriptedLlm::new())).unwrap()
    }

    fn seed_pairs(state: &EngineState, pairs: &[(&str, &str)]) {
        for (a, b) in pairs {
            let mut ra = crate::atoms::types::AdjacencyRecord::empty(*a);
            ra.insert_edge("≡", b, 0.9);
            ra.normalize_lists();
            let mut rb = crate::atoms::types::AdjacencyRecord::empty(*b);
            rb.insert_edge("≡", a, 0.9);
            rb.normalize_lists();
            state
                .cache
                .put(a, ra, PutOptions { defer_reload: true })
                .unwrap();
            state
                .cache
                .put(b, rb, PutOptions { defer_reload: true })
                .unwrap();
        }
    }

    #[test]
    fn flag_parsing() {
        let args = parse_args("--min 2 --depth 3 --edges 5 --limit 64 alpha BETA").unwrap();
        assert_eq!(args.min_edges, 2);
        assert_eq!(args.depth, Some(3));
        assert_eq!(args.degree, Some(5));
        assert_eq!(args.cap, Some(64));
        assert_eq!(args.tokens, vec!["alpha", "beta"]);
        assert!(parse_args("--min nope").is_err());
        assert!(parse_args("--imaginary 4").is_err());
    }

    #[tokio::test]
    async fn repairs_disconnected_pairs_into_one_component() {
        let state = test_state();
        seed_pairs(&state, &[("ant", "bee"), ("cat", "dog"), ("elk", "fox")]);

        let out = map_hidden(&state, "ant cat elk").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["components"], 1);
        assert!(value["repairs"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn min_filter_rejects_everything() {
        let state = test_state();
        seed_pairs(&state, &[("ant", "bee")]);
        let err = map_hidden(&state, "--min 99").await.unwrap_err();
        assert!(matches!(err, HlsfError::InvalidPrompt(_)));
    }
}
