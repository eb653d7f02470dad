// ── HLSF Atoms: Error Types ────────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, Store, Remote, Llm…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `HlsfError` → `String` conversion is provided via `Display` so that
//     command boundaries (`Result<T, String>`) can call `.map_err(|e|
//     e.to_string())` without boilerplate.
//   • Fetch-level network and parse failures are NOT errors — the fetcher
//     swallows them into value records (`offline`, `error` fields). Only
//     conditions that must stop the caller live here.
//   • No variant carries secret material (API keys) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum HlsfError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite failure in the durable key/value store.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Input token rejected before any side effect.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Input prompt rejected before any side effect.
    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    /// Collaborator response not interpretable as an adjacency record.
    #[error("Parse failed: {0}")]
    ParseFailed(String),

    /// The durable store refused a write for lack of space.
    #[error("Quota exceeded in durable store")]
    QuotaExceeded,

    /// Operation observed its cancel handle.
    #[error("Aborted")]
    Aborted,

    /// Remote manifest missing required fields or structurally unsound.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Remote chunk file malformed or inconsistent with its manifest entry.
    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    /// A node/edge/relationship budget drained the expansion queue.
    #[error("Budget exhausted: {0}")]
    BudgetExhausted(String),

    /// LLM collaborator API-level failure (non-secret detail only).
    #[error("Llm error: {0}")]
    Llm(String),

    /// Engine configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl HlsfError {
    /// Create an LLM collaborator error.
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create an invalid-token error.
    pub fn invalid_token(token: impl Into<String>) -> Self {
        Self::InvalidToken(token.into())
    }

    /// Create a manifest error.
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest(message.into())
    }
}

// ── Migration bridge: String → HlsfError ───────────────────────────────────
// Allows `?` on helpers still returning `Result<T, String>` inside functions
// that return `HlsfResult<T>`.

impl From<String> for HlsfError {
    fn from(s: String) -> Self {
        HlsfError::Other(s)
    }
}

impl From<&str> for HlsfError {
    fn from(s: &str) -> Self {
        HlsfError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
/// At command boundaries, convert with `.map_err(HlsfError::into)`.
pub type HlsfResult<T> = Result<T, HlsfError>;

// ── Conversion: HlsfError → String ─────────────────────────────────────────
// Lets command functions return `Result<T, String>` directly.

impl From<HlsfError> for String {
    fn from(e: HlsfError) -> Self {
        e.to_string()
    }
}
