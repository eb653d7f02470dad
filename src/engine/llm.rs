// ── Adjacency Collaborator (LLM client) ────────────────────────────────────
//
// The external language-model collaborator behind the adjacency fetcher.
// Implements the `AdjacencyLlm` golden trait; all request assembly, status
// handling, and response-shape tolerance lives here.
//
// The wire contract is loose by design: the response body is free-form text
// that MUST contain a JSON object
//
//     { "token": "...", "relationships": { "<glyph>": [{"token","weight"}] } }
//
// The engine parses the first balanced `{…}` substring and discards the
// rest. Validator calls return `{ "token": "...", "is_real_word": bool }`.

use crate::atoms::error::{HlsfError, HlsfResult};
use crate::atoms::types::AdjacencyRecord;
use crate::engine::http::{
    attempts_remain, is_auth_status, is_retryable_status, parse_retry_after, retry_delay,
    shared_client, CircuitBreaker,
};
use crate::engine::relations::{catalog_lines, Relation};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Circuit breaker shared across all collaborator requests.
static LLM_CIRCUIT: LazyLock<CircuitBreaker> = LazyLock::new(|| CircuitBreaker::new(5, 60));

// ── Golden trait ───────────────────────────────────────────────────────────

/// The collaborator seam. The HTTP implementation talks to a chat-style
/// API; the scripted implementation backs tests and offline development.
#[async_trait]
pub trait AdjacencyLlm: Send + Sync {
    /// Free-form response text expected to contain an adjacency JSON object.
    async fn expand_token(&self, token: &str, context: &str) -> HlsfResult<String>;

    /// Whether `token` is a real word. Backs the variant filter.
    async fn is_real_word(&self, token: &str) -> HlsfResult<bool>;

    /// Up to `needed` synthetic neighbor names for a under-branched token.
    async fn synthetic_branches(
        &self,
        token: &str,
        context: &str,
        needed: usize,
    ) -> HlsfResult<Vec<String>>;

    /// Whether credentials are present. Unconfigured collaborators put the
    /// fetcher straight into offline mode.
    fn is_configured(&self) -> bool {
        true
    }
}

// ── Response parsing (pure) ────────────────────────────────────────────────

/// Extract the first balanced `{…}` substring, respecting JSON strings and
/// escapes. Returns `None` when no balanced object exists.
pub fn extract_first_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a collaborator expansion response into a record for `token`.
/// Relation keys are normalized to their canonical glyphs; spellings
/// outside the 50-relation registry are dropped. Non-finite or
/// out-of-range weights are clamped by normalization.
pub fn parse_adjacency_response(token: &str, text: &str) -> HlsfResult<AdjacencyRecord> {
    let raw = extract_first_json(text)
        .ok_or_else(|| HlsfError::ParseFailed(format!("no JSON object for {token:?}")))?;
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| HlsfError::ParseFailed(format!("{token:?}: {e}")))?;

    let mut record = AdjacencyRecord::empty(token);
    let Some(rels) = value.get("relationships").and_then(Value::as_object) else {
        return Err(HlsfError::ParseFailed(format!(
            "{token:?}: missing relationships object"
        )));
    };
    for (key, list) in rels {
        let Some(relation) = Relation::normalize(key) else {
            debug!("[llm] Dropping unknown relation key {key:?} for {token:?}");
            continue;
        };
        let Some(entries) = list.as_array() else {
            continue;
        };
        for entry in entries {
            let neighbor = entry
                .get("token")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim();
            if neighbor.is_empty() {
                continue;
            }
            let weight = entry.get("weight").and_then(Value::as_f64).unwrap_or(0.0);
            if !weight.is_finite() {
                continue;
            }
            record.insert_edge(relation.glyph(), &neighbor.to_lowercase(), weight);
        }
    }
    record.normalize_lists();
    Ok(record)
}

/// The fixed system prompt describing the 50 relationship glyphs and the
/// required response shape.
pub fn expansion_system_prompt() -> String {
    let mut prompt = String::from(
        "You map a word to its semantic neighbors. Use ONLY these relationship \
         glyphs (glyph — meaning (priority)):\n",
    );
    for line in catalog_lines() {
        prompt.push_str("  ");
        prompt.push_str(&line);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nRespond with a single JSON object:\n\
         {\"token\": \"<word>\", \"relationships\": {\"<glyph>\": \
         [{\"token\": \"<neighbor>\", \"weight\": 0.0}]}}\n\
         Weights are in [0,1]. 3 to 8 neighbors per relevant glyph. \
         No commentary outside the JSON.",
    );
    prompt
}

// ── HTTP implementation ────────────────────────────────────────────────────

/// Connection settings for the chat-style collaborator endpoint.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl LlmConfig {
    /// Read settings from the environment: `HLSF_LLM_URL`, `HLSF_LLM_KEY`,
    /// `HLSF_LLM_MODEL`.
    pub fn from_env() -> Self {
        LlmConfig {
            base_url: std::env::var("HLSF_LLM_URL").unwrap_or_default(),
            api_key: std::env::var("HLSF_LLM_KEY").unwrap_or_default(),
            model: std::env::var("HLSF_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.is_empty()
    }
}

/// Chat-completions collaborator client.
pub struct HttpLlm {
    client: Client,
    config: LlmConfig,
}

impl HttpLlm {
    pub fn new(config: LlmConfig) -> Self {
        HttpLlm {
            client: shared_client(),
            config,
        }
    }

    /// POST one chat request and return the assistant text. Retries
    /// transient statuses with backoff; 401/403 are terminal.
    async fn chat(&self, system: &str, user: &str) -> HlsfResult<String> {
        LLM_CIRCUIT.check().map_err(HlsfError::Llm)?;

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let mut attempt = 0u32;
        loop {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    LLM_CIRCUIT.record_failure();
                    return Err(HlsfError::Network(e));
                }
            };

            let status = response.status().as_u16();
            if is_auth_status(status) {
                LLM_CIRCUIT.record_failure();
                return Err(HlsfError::Llm(format!(
                    "collaborator rejected credentials (HTTP {status})"
                )));
            }
            if is_retryable_status(status) {
                LLM_CIRCUIT.record_failure();
                if !attempts_remain(attempt) {
                    return Err(HlsfError::Llm(format!(
                        "collaborator unavailable after retries (HTTP {status})"
                    )));
                }
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let waited = retry_delay(attempt, retry_after).await;
                debug!("[llm] HTTP {status}, retried after {waited:?} (attempt {attempt})");
                attempt += 1;
                continue;
            }
            if status >= 400 {
                LLM_CIRCUIT.record_failure();
                return Err(HlsfError::Llm(format!("collaborator HTTP {status}")));
            }

            LLM_CIRCUIT.record_success();
            let body: Value = response.json().await?;
            // OpenAI-compatible shape first; otherwise fall back to the raw
            // body so free-form collaborators still work.
            let text = body["choices"][0]["message"]["content"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            return Ok(text);
        }
    }
}

#[async_trait]
impl AdjacencyLlm for HttpLlm {
    async fn expand_token(&self, token: &str, context: &str) -> HlsfResult<String> {
        let user = if context.is_empty() {
            format!("Map the word: {token}")
        } else {
            format!("Context: {context}\n\nMap the word: {token}")
        };
        self.chat(&expansion_system_prompt(), &user).await
    }

    async fn is_real_word(&self, token: &str) -> HlsfResult<bool> {
        let system = "You verify dictionary words. Respond with a single JSON \
                      object: {\"token\": \"<word>\", \"is_real_word\": true|false}";
        let text = self.chat(system, token).await?;
        let raw = extract_first_json(&text)
            .ok_or_else(|| HlsfError::ParseFailed(format!("validator response for {token:?}")))?;
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| HlsfError::ParseFailed(format!("validator {token:?}: {e}")))?;
        Ok(value
            .get("is_real_word")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn synthetic_branches(
        &self,
        token: &str,
        context: &str,
        needed: usize,
    ) -> HlsfResult<Vec<String>> {
        let system = "You invent plausible semantic neighbors for a word. Respond \
                      with a single JSON object: {\"token\": \"<word>\", \
                      \"branches\": [\"<neighbor>\", ...]}";
        let user = if context.is_empty() {
            format!("Give {needed} neighbors for: {token}")
        } else {
            format!("Context: {context}\nGive {needed} neighbors for: {token}")
        };
        let text = self.chat(system, &user).await?;
        let raw = extract_first_json(&text)
            .ok_or_else(|| HlsfError::ParseFailed(format!("branches response for {token:?}")))?;
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| HlsfError::ParseFailed(format!("branches {token:?}: {e}")))?;
        let branches = value
            .get("branches")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .take(needed)
                    .collect()
            })
            .unwrap_or_default();
        Ok(branches)
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

// ── Scripted implementation ────────────────────────────────────────────────

/// Deterministic collaborator for tests and offline development: canned
/// responses keyed by token. Missing entries read as network failures when
/// `simulate_network_failure` is set, otherwise as empty expansions.
#[derive(Default)]
pub struct ScriptedLlm {
    expansions: parking_lot::Mutex<HashMap<String, String>>,
    real_words: parking_lot::Mutex<HashMap<String, bool>>,
    branches: parking_lot::Mutex<HashMap<String, Vec<String>>>,
    pub simulate_network_failure: std::sync::atomic::AtomicBool,
    call_count: std::sync::atomic::AtomicU64,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a raw expansion response for a token.
    pub fn script_expansion(&self, token: &str, response_text: impl Into<String>) {
        self.expansions
            .lock()
            .insert(token.to_string(), response_text.into());
    }

    /// Script an expansion from edge tuples, producing well-formed JSON.
    pub fn script_edges(&self, token: &str, edges: &[(&str, &str, f64)]) {
        let mut rels: serde_json::Map<String, Value> = serde_json::Map::new();
        for (rel, neighbor, weight) in edges {
            let entry = rels
                .entry(rel.to_string())
                .or_insert_with(|| Value::Array(vec![]));
            if let Value::Array(arr) = entry {
                arr.push(json!({"token": neighbor, "weight": weight}));
            }
        }
        let body = json!({"token": token, "relationships": Value::Object(rels)});
        self.script_expansion(token, body.to_string());
    }

    pub fn script_real_word(&self, token: &str, verdict: bool) {
        self.real_words.lock().insert(token.to_string(), verdict);
    }

    pub fn script_branches(&self, token: &str, branches: &[&str]) {
        self.branches.lock().insert(
            token.to_string(),
            branches.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Total collaborator calls observed (all three operations).
    pub fn calls(&self) -> u64 {
        self.call_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn fail(&self) -> bool {
        self.simulate_network_failure
            .load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait]
impl AdjacencyLlm for ScriptedLlm {
    async fn expand_token(&self, token: &str, _context: &str) -> HlsfResult<String> {
        self.call_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if self.fail() {
            return Err(HlsfError::Llm("Network error: scripted outage".into()));
        }
        match self.expansions.lock().get(token) {
            Some(text) => Ok(text.clone()),
            None => Ok(json!({"token": token, "relationships": {}}).to_string()),
        }
    }

    async fn is_real_word(&self, token: &str) -> HlsfResult<bool> {
        self.call_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if self.fail() {
            return Err(HlsfError::Llm("Network error: scripted outage".into()));
        }
        Ok(self.real_words.lock().get(token).copied().unwrap_or(true))
    }

    async fn synthetic_branches(
        &self,
        token: &str,
        _context: &str,
        needed: usize,
    ) -> HlsfResult<Vec<String>> {
        self.call_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if self.fail() {
            return Err(HlsfError::Llm("Network error: scripted outage".into()));
        }
        Ok(self
            .branches
            .lock()
            .get(token)
            .map(|v| v.iter().take(needed).cloned().collect())
            .unwrap_or_default())
    }
}

/// Whether an error message marks a network-level outage — the signal that
/// flips the fetcher into offline mode.
pub fn is_network_failure(error: &HlsfError) -> bool {
    match error {
        HlsfError::Network(_) => true,
        HlsfError::Llm(msg) => {
            msg.contains("Network error") || msg.contains("Failed to fetch")
        }
        _ => false,
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_balanced_object() {
        assert_eq!(extract_first_json("{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(
            extract_first_json("noise before {\"a\":{\"b\":2}} and after {\"c\":3}"),
            Some("{\"a\":{\"b\":2}}")
        );
        assert_eq!(
            extract_first_json("{\"s\":\"has } brace\"}"),
            Some("{\"s\":\"has } brace\"}")
        );
        assert_eq!(
            extract_first_json("{\"s\":\"esc \\\" } quote\"}"),
            Some("{\"s\":\"esc \\\" } quote\"}")
        );
        assert_eq!(extract_first_json("no object here"), None);
        assert_eq!(extract_first_json("{unterminated"), None);
    }

    #[test]
    fn parses_wire_shape() {
        let text = r#"Sure! Here you go:
            {"token": "color", "relationships": {"≈": [
                {"token": "Colour", "weight": 0.9},
                {"token": "foo", "weight": 0.8}
            ], "≡": [{"token": "hue", "weight": 0.85}]}}"#;
        let record = parse_adjacency_response("color", text).unwrap();
        assert_eq!(record.token, "color");
        assert_eq!(record.edge_weight("≈", "colour"), Some(0.9));
        assert_eq!(record.edge_weight("≡", "hue"), Some(0.85));
        assert_eq!(record.total_relationships, 3);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn parse_drops_unknown_relations_and_blanks() {
        let text = r#"{"token": "x", "relationships": {
            "☄☄": [{"token": "y", "weight": 0.9}],
            "≡": [{"token": "  ", "weight": 0.9}, {"token": "z", "weight": 2.5}]
        }}"#;
        let record = parse_adjacency_response("x", text).unwrap();
        assert!(record.relationships.get("☄☄").is_none());
        // out-of-range weight clamps to 1.0 rather than vanishing
        assert_eq!(record.edge_weight("≡", "z"), Some(1.0));
        assert_eq!(record.total_relationships, 1);
    }

    #[test]
    fn parse_failure_is_tagged() {
        let err = parse_adjacency_response("x", "no json at all").unwrap_err();
        assert!(matches!(err, HlsfError::ParseFailed(_)));
        let err = parse_adjacency_response("x", "{\"token\":\"x\"}").unwrap_err();
        assert!(matches!(err, HlsfError::ParseFailed(_)));
    }

    #[test]
    fn system_prompt_covers_all_relations() {
        let prompt = expansion_system_prompt();
        for rel in Relation::all() {
            assert!(
                prompt.contains(rel.glyph()),
                "prompt missing glyph {}",
                rel.glyph()
            );
        }
        assert!(prompt.contains("relationships"));
    }

    #[test]
    fn network_failure_detection() {
        assert!(is_network_failure(&HlsfError::Llm(
            "Network error: scripted outage".into()
        )));
        assert!(is_network_failure(&HlsfError::Llm("Failed to fetch".into())));
        assert!(!is_network_failure(&HlsfError::Llm("HTTP 500".into())));
        assert!(!is_network_failure(&HlsfError::ParseFailed("x".into())));
    }

    #[tokio::test]
    async fn scripted_llm_round_trip() {
        let llm = ScriptedLlm::new();
        llm.script_edges("alpha", &[("≡", "beta", 0.9)]);
        llm.script_real_word("foo", false);
        llm.script_branches("alpha", &["one", "two", "three"]);

        let text = llm.expand_token("alpha", "").await.unwrap();
        let record = parse_adjacency_response("alpha", &text).unwrap();
        assert_eq!(record.edge_weight("≡", "beta"), Some(0.9));

        assert!(!llm.is_real_word("foo").await.unwrap());
        assert!(llm.is_real_word("unscripted").await.unwrap());

        let branches = llm.synthetic_branches("alpha", "", 2).await.unwrap();
        assert_eq!(branches, vec!["one", "two"]);
        assert_eq!(llm.calls(), 4);
    }

    #[test]
    fn unconfigured_env_reads_unconfigured() {
        let config = LlmConfig {
            base_url: String::new(),
            api_key: String::new(),
            model: "m".into(),
        };
        assert!(!config.is_configured());
        assert!(!HttpLlm::new(config).is_configured());
    }
}
