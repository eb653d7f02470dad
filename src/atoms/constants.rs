// ── HLSF Atoms: Constants ──────────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic strings,
// makes auditing easier, and keeps every layer's code self-documenting.

// ── Durable store keys ─────────────────────────────────────────────────────
// The key/value contract with external persistence. Changing any of these
// would orphan existing caches — treat as stable identifiers.
pub const KEY_TOKEN_PREFIX: &str = "hlsf_token_";
pub const KEY_TOKEN_INDEX: &str = "hlsf_token_index";
pub const KEY_DB_SNAPSHOT: &str = "hlsf_db_snapshot";
pub const KEY_REMOTE_CHUNKS: &str = "HLSF_REMOTE_DB_CHUNKS_V1";
pub const KEY_REMOTE_META: &str = "HLSF_REMOTE_DB_META_V1";
pub const KEY_GLYPH_LEDGER: &str = "hlsf_glyph_ledger";
pub const KEY_CORE_CONFIG: &str = "hlsf_core_config";
pub const KEY_SESSION_MEMORY: &str = "hlsf_session_memory";

// ── Fetcher retry / offline behaviour ──────────────────────────────────────
// Used by the adjacency fetcher's retry loop. 429 responses back off
// base·2^attempt; network failures flip the offline flag for the
// backoff window so a flapping link doesn't hammer the collaborator.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 500;
pub const NETWORK_RETRY_BACKOFF_MS: u64 = 5_000;

// ── Expansion limits ───────────────────────────────────────────────────────
/// Hard ceiling on recursive expansion depth, independent of config.
pub const MAX_EXPANSION_DEPTH: u32 = 8;
/// Cooperative yield cadence inside expansion/assembly loops.
pub const YIELD_EVERY_EXPANSIONS: usize = 1_000;

// ── Weight floors ──────────────────────────────────────────────────────────
/// Floor applied to hidden-adjacency edges; also the repair-edge weight.
pub const HIDDEN_ADJACENCY_FLOOR: f64 = 0.05;
/// Weight of global-connect edges injected by the snapshot merge rule.
pub const GLOBAL_CONNECT_WEIGHT: f64 = 0.05;
/// Weight of synthetic global-connect edges injected by the pruner for
/// priority tokens.
pub const PRIORITY_SYNTH_WEIGHT: f64 = 0.001;
/// Default pruning floor when no per-relation override applies.
pub const DEFAULT_PRUNE_FLOOR: f64 = 0.18;
/// Two weights within this epsilon are the same weight; adjacency "growth"
/// requires an increase strictly greater than this.
pub const WEIGHT_EPSILON: f64 = 1e-6;

// ── Session memory bounds ──────────────────────────────────────────────────
pub const SESSION_PROMPT_CAP: usize = 100;
pub const SESSION_SUMMARY_CAP: usize = 50;
pub const SESSION_FOCUS_CAP: usize = 12;
pub const SUMMARY_DEFAULT_LIMIT: usize = 20;
pub const SUMMARY_EDGES_PER_TOKEN: usize = 6;

// ── Hidden-adjacency subnet defaults ───────────────────────────────────────
pub const HIDDEN_SEED_CAP: usize = 128;
pub const HIDDEN_ATTENTION_PER_TOKEN: usize = 4;
pub const HIDDEN_DEPTH_DEFAULT: u32 = 2;

// ── Remote chunk store ─────────────────────────────────────────────────────
/// Upper bound on parallel chunk fetches regardless of configuration.
pub const REMOTE_CONCURRENCY_CAP: usize = 6;
/// Prefix used for tokens whose first char is outside `[a-z0-9]`.
pub const FALLBACK_CHUNK_PREFIX: &str = "_";
/// Manifest schema version this engine reads and emits.
pub const MANIFEST_VERSION: &str = "2.1";

// ── Event log ──────────────────────────────────────────────────────────────
/// Ring-buffer capacity of the command event log.
pub const EVENT_LOG_CAPACITY: usize = 500;

// ── Symbol tokens ──────────────────────────────────────────────────────────
/// Prefix marking opaque symbol tokens; the fetcher returns an empty record
/// for these without consulting any store or collaborator.
pub const SYMBOL_TOKEN_PREFIX: &str = "sym:";
