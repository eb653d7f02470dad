// ── Remote Store Commands ──────────────────────────────────────────────────
// /loaddb <manifest_url> — adopt a remote manifest and mirror it locally
// /remotedir            — list the tokens the remote store can serve
// /remotestats          — manifest metadata and chunk-cache counters

use crate::atoms::error::{HlsfError, HlsfResult};
use crate::engine::state::EngineState;

pub async fn load_db(state: &EngineState, url: &str) -> HlsfResult<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(HlsfError::InvalidManifest("usage: /loaddb <manifest_url>".into()));
    }
    let meta = state.remote.configure(url).await?;
    state.remote.persist_mirror(state.store.as_ref())?;
    state.events.info(
        "remote",
        format!(
            "Manifest loaded: {} tokens across {} chunks",
            meta.total_tokens, meta.chunk_count
        ),
    );
    Ok(format!(
        "Remote store ready: version {}, {} tokens, {} relationships, {} chunks",
        meta.version, meta.total_tokens, meta.total_relationships, meta.chunk_count
    ))
}

pub fn remote_dir(state: &EngineState) -> String {
    if !state.remote.is_ready() {
        return "Remote store not configured — use /loaddb <manifest_url>".to_string();
    }
    let tokens = state.remote.list_tokens();
    if tokens.is_empty() {
        return "Remote store is ready but lists no tokens".to_string();
    }
    let shown = tokens.len().min(200);
    let mut out = format!("{} remote tokens", tokens.len());
    if shown < tokens.len() {
        out.push_str(&format!(" (showing {shown})"));
    }
    out.push('\n');
    out.push_str(&tokens[..shown].join(", "));
    out
}

pub fn remote_stats(state: &EngineState) -> HlsfResult<String> {
    let meta = state.remote.metadata();
    Ok(serde_json::to_string_pretty(&meta)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kv::MemoryKv;
    use crate::engine::llm::ScriptedLlm;
    use crate::engine::remote::ChunkRecorder;
    use std::sync::Arc;

    fn test_state() -> EngineState {
        EngineState::new(Arc::new(MemoryKv::new()), Arc::new(ScriptedLlm::new())).unwrap()
    }

    #[tokio::test]
    async fn loaddb_requires_a_url() {
        let state = test_state();
        assert!(load_db(&state, "  ").await.is_err());
    }

    #[test]
    fn remotedir_reports_unconfigured() {
        let state = test_state();
        assert!(remote_dir(&state).contains("/loaddb"));
    }

    #[test]
    fn remotedir_lists_recorder_tokens() {
        let state = test_state();
        let recorder = Arc::new(ChunkRecorder::new());
        let mut r = crate::atoms::types::AdjacencyRecord::empty("alpha");
        r.insert_edge("≡", "beta", 0.9);
        r.normalize_lists();
        recorder.record(&r);
        state.remote.attach_recorder(recorder);

        let out = remote_dir(&state);
        assert!(out.contains("alpha"));
    }

    #[test]
    fn remotestats_is_json() {
        let state = test_state();
        let out = remote_stats(&state).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["ready"], false);
    }
}
