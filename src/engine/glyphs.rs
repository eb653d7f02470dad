// ── Glyph Ledger ───────────────────────────────────────────────────────────
//
// Deterministic token→glyph assignment derived from a complex coordinate:
//
//     c = m · e^{iφ},  m = attention_score ∈ [0,1],
//     φ = (hash32(token) mod 360) · π/180
//
// mapped into a fixed ordered glyph library by
//
//     index = (⌊m·7⌋·10 + ⌊φ·10/(2π)⌋) mod |library|
//
// A persistent weighted many-to-one reverse map records every
// (glyph, token, weight) observation; `best_token` inverts a glyph at a
// target weight. Symbolic encrypt/decrypt run over this ledger and report
// coverage percentages; they sit outside the engine's correctness-critical
// path.

use crate::atoms::constants::KEY_GLYPH_LEDGER;
use crate::atoms::error::HlsfResult;
use crate::atoms::types::AdjacencyRecord;
use crate::engine::kv::KvStore;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::{PI, TAU};

/// The fixed ordered glyph library. Disjoint from the relation glyphs so
/// encoded text can never be mistaken for relationship keys.
const GLYPH_LIBRARY: [char; 64] = [
    '◆', '◇', '●', '○', '■', '□', '▲', '△', '▼', '▽', '★', '☆', '◈', '◉', '◎', '◍',
    '◐', '◑', '◒', '◓', '◔', '◕', '◖', '◗', '⬟', '⬠', '⬡', '⬢', '⬣', '⌁', '⌇', '⌬',
    '⍟', '⍉', '⍊', '⍋', '⍌', '⍍', '⍎', '⍏', '⍐', '⍑', '⍒', '⍓', '⍔', '⍕', '⍖', '⍗',
    '⊞', '⊟', '⊠', '⊡', '⋄', '⋇', '⋈', '⋉', '⋊', '⋋', '⋌', '⟐', '⟑', '⟒', '⟓', '⟔',
];

/// Weights closer than this are the same ledger observation.
const LEDGER_WEIGHT_EPSILON: f64 = 1e-9;

/// FNV-1a 32-bit mix over the token bytes.
pub fn hash32(token: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in token.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

/// The token's phase angle in radians, in [0, 2π).
pub fn phase_of(token: &str) -> f64 {
    f64::from(hash32(token) % 360) * PI / 180.0
}

/// Map a (magnitude, phase) coordinate to its library glyph.
pub fn glyph_for(token: &str, magnitude: f64) -> char {
    let m = if magnitude.is_finite() {
        magnitude.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let phase = phase_of(token);
    let row = (m * 7.0).floor() as usize;
    let column = (phase * 10.0 / TAU).floor() as usize;
    GLYPH_LIBRARY[(row * 10 + column) % GLYPH_LIBRARY.len()]
}

/// One reverse-map observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub token: String,
    /// Magnitude at observation time.
    pub w: f64,
    /// RFC 3339 observation timestamp.
    pub t: String,
}

/// Encrypt/decrypt outcome with its coverage percentage.
#[derive(Debug, Clone, Serialize)]
pub struct CodecResult {
    pub output: String,
    /// Percentage of input units the ledger could account for, 0..=100.
    pub coverage: f64,
}

/// The persistent weighted many-to-one reverse map.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GlyphLedger {
    map: BTreeMap<String, Vec<LedgerEntry>>,
}

impl GlyphLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn glyph_count(&self) -> usize {
        self.map.len()
    }

    pub fn observation_count(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    /// Record one (glyph, token, weight) observation. Idempotent: an entry
    /// with the same token and weight is left untouched.
    pub fn observe(&mut self, glyph: char, token: &str, w: f64) {
        let entries = self.map.entry(glyph.to_string()).or_default();
        if entries
            .iter()
            .any(|e| e.token == token && (e.w - w).abs() < LEDGER_WEIGHT_EPSILON)
        {
            return;
        }
        entries.push(LedgerEntry {
            token: token.to_string(),
            w,
            t: chrono::Utc::now().to_rfc3339(),
        });
    }

    /// The recorded token whose weight is closest to `w`; ties go to the
    /// most recent observation.
    pub fn best_token(&self, glyph: char, w: f64) -> Option<&str> {
        let entries = self.map.get(&glyph.to_string())?;
        let mut best: Option<&LedgerEntry> = None;
        for entry in entries {
            let replace = match best {
                None => true,
                Some(current) => {
                    let delta_new = (entry.w - w).abs();
                    let delta_cur = (current.w - w).abs();
                    delta_new + LEDGER_WEIGHT_EPSILON < delta_cur
                        || ((delta_new - delta_cur).abs() <= LEDGER_WEIGHT_EPSILON
                            && entry.t >= current.t)
                }
            };
            if replace {
                best = Some(entry);
            }
        }
        best.map(|e| e.token.as_str())
    }

    /// Encode a text against the record index: each token becomes its
    /// glyph, and the observation lands in the ledger so `decrypt` can
    /// invert it. Coverage is the percentage of tokens present in the
    /// index.
    pub fn encrypt(
        &mut self,
        text: &str,
        index: &HashMap<String, AdjacencyRecord>,
    ) -> CodecResult {
        let tokens = tokenize_words(text);
        if tokens.is_empty() {
            return CodecResult {
                output: String::new(),
                coverage: 0.0,
            };
        }
        let mut output = String::new();
        let mut covered = 0usize;
        for token in &tokens {
            let magnitude = index
                .get(token)
                .map(|r| r.attention_score.clamp(0.0, 1.0))
                .unwrap_or(0.0);
            if index.contains_key(token) {
                covered += 1;
            }
            let glyph = glyph_for(token, magnitude);
            self.observe(glyph, token, magnitude);
            output.push(glyph);
        }
        CodecResult {
            output,
            coverage: covered as f64 * 100.0 / tokens.len() as f64,
        }
    }

    /// Decode a glyph string back into tokens via the reverse map.
    /// Unknown glyphs become `?`; coverage is the percentage resolved.
    pub fn decrypt(&self, glyphs: &str) -> CodecResult {
        let total = glyphs.chars().count();
        if total == 0 {
            return CodecResult {
                output: String::new(),
                coverage: 0.0,
            };
        }
        let mut words: Vec<String> = Vec::new();
        let mut covered = 0usize;
        for glyph in glyphs.chars() {
            match self.best_token(glyph, 0.5) {
                Some(token) => {
                    covered += 1;
                    words.push(token.to_string());
                }
                None => words.push("?".to_string()),
            }
        }
        CodecResult {
            output: words.join(" "),
            coverage: covered as f64 * 100.0 / total as f64,
        }
    }

    // ── Persistence ──────────────────────────────────────────────────────

    pub fn save(&self, store: &dyn KvStore) -> HlsfResult<()> {
        let json = serde_json::to_string(self)?;
        if let Err(e) = store.set(KEY_GLYPH_LEDGER, &json) {
            warn!("[glyphs] Persist failed: {e}");
        }
        Ok(())
    }

    pub fn load(store: &dyn KvStore) -> Self {
        match store.get(KEY_GLYPH_LEDGER) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_default(),
            _ => GlyphLedger::default(),
        }
    }
}

/// Word tokenization for the codec path — same normalization as prompt
/// tokenization but duplicates are kept (each word encodes separately).
fn tokenize_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '-' && c != '\'')
        .filter(|w| !w.trim().is_empty())
        .map(|w| w.trim().to_lowercase())
        .collect()
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════
