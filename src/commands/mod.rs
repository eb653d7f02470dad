// ── Command Dispatcher ─────────────────────────────────────────────────────
//
// Resolves slash-commands against the engine state and runs them. Bare
// (non-slash) input is a prompt: it feeds the expansion pipeline directly.
//
// Commands report through the event log and return rendered text; exit
// codes are not part of the contract.

mod hidden;
mod hlsf;
mod remote;

pub use hlsf::{run_hlsf, run_prompt, AnchorMode, HlsfArgs};

use crate::engine::config::{named_profile, profile_names};
use crate::engine::state::EngineState;
use log::info;

/// Dispatch one input line. Returns rendered output or an error message.
pub async fn dispatch(state: &EngineState, line: &str) -> Result<String, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(String::new());
    }
    if !line.starts_with('/') {
        return hlsf::run_prompt(state, line).await.map_err(Into::into);
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    info!("[command] {command} {rest}");

    match command {
        "/hlsf" => {
            let args = hlsf::HlsfArgs::parse(rest)?;
            hlsf::run_hlsf(state, args).await.map_err(Into::into)
        }
        "/loaddb" => remote::load_db(state, rest).await.map_err(Into::into),
        "/remotedir" => Ok(remote::remote_dir(state)),
        "/remotestats" => remote::remote_stats(state).map_err(Into::into),
        "/maphidden" => hidden::map_hidden(state, rest).await.map_err(Into::into),
        "/reset" => reset(state).map_err(Into::into),
        "/profile" => Ok(profile(state, rest)),
        "/stats" => Ok(stats(state)),
        "/events" => Ok(events(state, rest)),
        "/config" => config_text(state).map_err(Into::into),
        "/help" => Ok(help_text()),
        other => Err(format!("Unknown command {other:?} — try /help")),
    }
}

/// `/reset` — drop the token cache, the recorder mirror, and session
/// memory. Config and the glyph ledger survive.
fn reset(state: &EngineState) -> crate::atoms::error::HlsfResult<String> {
    let removed = state.cache.reset()?;
    state.recorder.clear();
    {
        let mut session = state.session.lock();
        session.clear();
        session.save(state.store.as_ref())?;
    }
    *state.current_graph.lock() = None;
    state
        .events
        .info("reset", format!("Cleared {removed} cached tokens"));
    Ok(format!("Reset complete: {removed} cached tokens removed"))
}

/// `/profile [name]` — show or apply a performance profile.
fn profile(state: &EngineState, name: &str) -> String {
    if name.is_empty() {
        let current = state.config.read().profile();
        let known = profile_names().join(", ");
        return format!(
            "Active budgets: {}\nAvailable profiles: {known}",
            serde_json::to_string(&current).unwrap_or_default()
        );
    }
    if named_profile(name).is_none() {
        return format!(
            "Unknown profile {name:?} — available: {}",
            profile_names().join(", ")
        );
    }
    state.apply_profile(name);
    format!("Profile {name:?} applied")
}

/// `/stats` — cache and remote counters.
fn stats(state: &EngineState) -> String {
    let tokens = state.cache.list(None).len();
    let hits = state.cache.session_cache_hits();
    let remote = state.remote.metadata();
    let session = state.session.lock();
    format!(
        "Cached tokens: {tokens}\nSession cache hits: {hits}\nPrompts: {}  Summaries: {}\nRemote ready: {} ({} chunks, {} loaded)",
        session.prompt_count(),
        session.summary_count(),
        remote.ready,
        remote.chunk_count,
        remote.loaded_chunks,
    )
}

/// `/events [n]` — recent event log entries, newest first.
fn events(state: &EngineState, rest: &str) -> String {
    let limit = rest.parse::<usize>().unwrap_or(20);
    let entries = state.events.recent(limit);
    if entries.is_empty() {
        return "No events yet".to_string();
    }
    entries
        .iter()
        .map(|e| format!("{} [{}] {}", e.timestamp, e.source, e.message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `/config` — the live config as JSON.
fn config_text(state: &EngineState) -> crate::atoms::error::HlsfResult<String> {
    let config = state.config.read().clone();
    Ok(serde_json::to_string_pretty(&config)?)
}

fn help_text() -> String {
    [
        "/hlsf [--conversation | --[tokens, …] | --[glyphs, …]] [--depth N] [--types N|all] [--ept N|all] [-db|-run]",
        "/loaddb <manifest_url>",
        "/remotedir",
        "/remotestats",
        "/maphidden [--min N] [--depth N] [--edges N] [--limit N] [--concurrency N] [tokens…]",
        "/reset",
        "/profile [low|balanced|high|max]",
        "/stats",
        "/events [n]",
        "/config",
        "/help",
        "",
        "Bare input is a prompt: it is tokenized, expanded, and rendered.",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kv::MemoryKv;
    use crate::engine::llm::ScriptedLlm;
    use std::sync::Arc;

    fn test_state() -> EngineState {
        EngineState::new(Arc::new(MemoryKv::new()), Arc::new(ScriptedLlm::new())).unwrap()
    }

    #[tokio::test]
    async fn unknown_command_errors() {
        let state = test_state();
        let err = dispatch(&state, "/warp 9").await.unwrap_err();
        assert!(err.contains("/warp"));
    }

    #[tokio::test]
    async fn help_and_stats_render() {
        let state = test_state();
        let help = dispatch(&state, "/help").await.unwrap();
        assert!(help.contains("/hlsf"));
        let stats = dispatch(&state, "/stats").await.unwrap();
        assert!(stats.contains("Cached tokens: 0"));
    }

    #[tokio::test]
    async fn profile_round_trip() {
        let state = test_state();
        let out = dispatch(&state, "/profile low").await.unwrap();
        assert!(out.contains("applied"));
        assert_eq!(state.config.read().max_nodes, 48);
        let listing = dispatch(&state, "/profile").await.unwrap();
        assert!(listing.contains("balanced"));
    }

    #[tokio::test]
    async fn reset_clears_cache_and_session() {
        let state = test_state();
        let out = dispatch(&state, "the cat sat").await.unwrap();
        assert!(!out.is_empty());
        assert!(!state.cache.list(None).is_empty());

        dispatch(&state, "/reset").await.unwrap();
        assert!(state.cache.list(None).is_empty());
        assert_eq!(state.session.lock().prompt_count(), 0);
        assert!(state.current_graph.lock().is_none());
    }

    #[tokio::test]
    async fn events_accumulate() {
        let state = test_state();
        dispatch(&state, "/reset").await.unwrap();
        let events = dispatch(&state, "/events").await.unwrap();
        assert!(events.contains("[reset]"));
    }
}
