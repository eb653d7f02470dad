// engine/state.rs — Shared engine state and construction wiring.
// Canonical home for EngineState: one struct owning every subsystem, built
// once at startup and borrowed by the command layer.

use crate::atoms::error::HlsfResult;
use crate::atoms::types::TokenGraph;
use crate::engine::cache::TokenCache;
use crate::engine::cancel::CancelToken;
use crate::engine::config::{named_profile, CoreConfig};
use crate::engine::events::EventLog;
use crate::engine::fetcher::AdjacencyFetcher;
use crate::engine::expand::RecursiveExpander;
use crate::engine::glyphs::GlyphLedger;
use crate::engine::kv::{default_db_path, KvStore, SqliteKv};
use crate::engine::llm::{AdjacencyLlm, HttpLlm, LlmConfig};
use crate::engine::remote::{ChunkRecorder, RemoteChunkStore};
use crate::engine::session::SessionMemory;
use log::info;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;

/// Engine state shared across the command layer.
pub struct EngineState {
    pub store: Arc<dyn KvStore>,
    pub cache: Arc<TokenCache>,
    pub remote: Arc<RemoteChunkStore>,
    pub recorder: Arc<ChunkRecorder>,
    pub llm: Arc<dyn AdjacencyLlm>,
    pub fetcher: Arc<AdjacencyFetcher>,
    pub expander: Arc<RecursiveExpander>,
    pub config: Arc<RwLock<CoreConfig>>,
    pub session: Mutex<SessionMemory>,
    pub ledger: Mutex<GlyphLedger>,
    pub events: EventLog,
    /// Cancel handle for the active long-running command.
    pub cancel: CancelToken,
    /// The most recent run-scope graph; replaced per command run.
    pub current_graph: Mutex<Option<TokenGraph>>,
}

impl EngineState {
    /// Wire every subsystem over the given store and collaborator.
    pub fn new(store: Arc<dyn KvStore>, llm: Arc<dyn AdjacencyLlm>) -> HlsfResult<Self> {
        let config = Arc::new(RwLock::new(CoreConfig::load(store.as_ref())));
        let cache = Arc::new(TokenCache::new(store.clone()));
        let remote = Arc::new(RemoteChunkStore::new(cache.clone()));
        let recorder = Arc::new(ChunkRecorder::new());
        let fetcher = Arc::new(AdjacencyFetcher::new(
            cache.clone(),
            remote.clone(),
            llm.clone(),
            config.clone(),
            Some(recorder.clone()),
        ));
        let expander = Arc::new(RecursiveExpander::new(
            fetcher.clone(),
            cache.clone(),
            remote.clone(),
            llm.clone(),
            config.clone(),
        ));
        let session = Mutex::new(SessionMemory::load(store.as_ref()));
        let ledger = Mutex::new(GlyphLedger::load(store.as_ref()));

        let state = EngineState {
            store,
            cache,
            remote,
            recorder,
            llm,
            fetcher,
            expander,
            config,
            session,
            ledger,
            events: EventLog::new(),
            cancel: CancelToken::new(),
            current_graph: Mutex::new(None),
        };
        state.push_config();
        Ok(state)
    }

    /// Open the default on-disk store and the environment-configured
    /// collaborator.
    pub fn open_default() -> HlsfResult<Self> {
        Self::open_at(&default_db_path())
    }

    /// Open a store at a specific path.
    pub fn open_at(path: &Path) -> HlsfResult<Self> {
        let store: Arc<dyn KvStore> = Arc::new(SqliteKv::open(path)?);
        let llm: Arc<dyn AdjacencyLlm> = Arc::new(HttpLlm::new(LlmConfig::from_env()));
        info!("[engine] State initialized over {:?}", path);
        Self::new(store, llm)
    }

    /// Apply a named performance profile and fan the derived caps out to
    /// every subsystem. Returns false for unknown names.
    pub fn apply_profile(&self, name: &str) -> bool {
        let Some(profile) = named_profile(name) else {
            return false;
        };
        {
            let mut config = self.config.write();
            config.apply_profile(&profile);
            config.save(self.store.as_ref()).ok();
        }
        self.push_config();
        self.events
            .info("config", format!("Profile {name:?} applied"));
        true
    }

    /// Push the live config's derived caps into subsystems that keep their
    /// own copies.
    pub fn push_config(&self) {
        let config = self.config.read();
        self.remote.apply_config(
            config.remote_chunk_concurrency,
            config.prune_weight_threshold,
            config.adjacency_edges_per_level.max(1) * config.max_relation_types.max(1),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kv::MemoryKv;
    use crate::engine::llm::ScriptedLlm;

    pub(crate) fn test_state() -> EngineState {
        EngineState::new(Arc::new(MemoryKv::new()), Arc::new(ScriptedLlm::new())).unwrap()
    }

    #[test]
    fn state_wires_up() {
        let state = test_state();
        assert!(!state.remote.is_ready());
        assert_eq!(state.cache.session_cache_hits(), 0);
        assert!(state.current_graph.lock().is_none());
    }

    #[test]
    fn profile_application_persists() {
        let state = test_state();
        assert!(state.apply_profile("low"));
        assert!(!state.apply_profile("warp"));
        assert_eq!(state.config.read().max_nodes, 48);
        // reload from the same store sees the persisted profile
        let reloaded = CoreConfig::load(state.store.as_ref());
        assert_eq!(reloaded.max_nodes, 48);
    }
}
