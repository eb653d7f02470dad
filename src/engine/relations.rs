// ── Relation Registry ──────────────────────────────────────────────────────
//
// The canonical set of 50 semantic relationship types. Each relation has a
// glyph (the wire key used in adjacency records), an English display name,
// and a priority multiplier in (0, 1] consumed by the attention scorer.
//
// Two distinguished synthetic relations:
//   - `⊚` hidden adjacency — used only by the assembler's hidden subnet;
//     weight floor 0.05
//   - `∼` global connect — injected by the cache's snapshot merge rule and
//     by the pruner to guarantee reachability; weight 0.05
//
// The glyph list is explicit and stable. Alphabetical-by-name ordering is
// for UI summaries only, never for semantics.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Glyph of the hidden-adjacency relation.
pub const GLYPH_HIDDEN_ADJACENCY: &str = "⊚";
/// Glyph of the global-connect relation.
pub const GLYPH_GLOBAL_CONNECT: &str = "∼";
/// Glyph of the variant relation — its edges pass the is-real-word filter.
pub const GLYPH_VARIANT: &str = "≈";

/// Priority assumed for relation keys outside the canonical set.
pub const UNKNOWN_RELATION_PRIORITY: f64 = 0.3;

/// One of the 50 canonical semantic relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Synonym,
    Variant,
    Antonym,
    PartOf,
    Contains,
    MemberOf,
    HasMember,
    Hypernym,
    Hyponym,
    Causes,
    CausedBy,
    Implies,
    ImpliedBy,
    Entails,
    EntailedBy,
    CorrelatesWith,
    CombinesWith,
    Opposes,
    TransformsInto,
    Excludes,
    Parallels,
    OrthogonalTo,
    Precedes,
    Follows,
    DerivedFrom,
    Derives,
    AssociatesWith,
    Therefore,
    Because,
    Possibly,
    Necessarily,
    LocatedIn,
    Locates,
    Exemplifies,
    ExemplifiedBy,
    UsedFor,
    Uses,
    MadeOf,
    MaterialFor,
    Complements,
    MeasuredBy,
    Symbolizes,
    InstanceOf,
    HasInstance,
    Attracts,
    Repels,
    ConflictsWith,
    Affirms,
    HiddenAdjacency,
    GlobalConnect,
}

/// (relation, glyph, english name, priority) — the single source of truth.
/// Order here is the registry's stable order.
const TABLE: [(Relation, &str, &str, f64); 50] = [
    (Relation::Synonym, "≡", "synonym", 0.95),
    (Relation::Variant, "≈", "variant", 0.50),
    (Relation::Antonym, "≠", "antonym", 0.90),
    (Relation::PartOf, "⊂", "part of", 0.85),
    (Relation::Contains, "⊃", "contains", 0.85),
    (Relation::MemberOf, "∈", "member of", 0.80),
    (Relation::HasMember, "∋", "has member", 0.80),
    (Relation::Hypernym, "↑", "hypernym", 0.90),
    (Relation::Hyponym, "↓", "hyponym", 0.90),
    (Relation::Causes, "→", "causes", 0.95),
    (Relation::CausedBy, "←", "caused by", 0.90),
    (Relation::Implies, "⇒", "implies", 0.85),
    (Relation::ImpliedBy, "⇐", "implied by", 0.80),
    (Relation::Entails, "⊢", "entails", 0.75),
    (Relation::EntailedBy, "⊣", "entailed by", 0.70),
    (Relation::CorrelatesWith, "∝", "correlates with", 0.70),
    (Relation::CombinesWith, "⊕", "combines with", 0.65),
    (Relation::Opposes, "⊖", "opposes", 0.70),
    (Relation::TransformsInto, "⊗", "transforms into", 0.75),
    (Relation::Excludes, "⊘", "excludes", 0.60),
    (Relation::Parallels, "∥", "parallels", 0.60),
    (Relation::OrthogonalTo, "⊥", "orthogonal to", 0.55),
    (Relation::Precedes, "≺", "precedes", 0.80),
    (Relation::Follows, "≻", "follows", 0.80),
    (Relation::DerivedFrom, "◁", "derived from", 0.75),
    (Relation::Derives, "▷", "derives", 0.75),
    (Relation::AssociatesWith, "⋈", "associates with", 0.65),
    (Relation::Therefore, "∴", "therefore", 0.60),
    (Relation::Because, "∵", "because", 0.60),
    (Relation::Possibly, "◇", "possibly", 0.40),
    (Relation::Necessarily, "□", "necessarily", 0.50),
    (Relation::LocatedIn, "⌂", "located in", 0.70),
    (Relation::Locates, "⌖", "locates", 0.65),
    (Relation::Exemplifies, "✦", "exemplifies", 0.70),
    (Relation::ExemplifiedBy, "✧", "exemplified by", 0.65),
    (Relation::UsedFor, "⚒", "used for", 0.75),
    (Relation::Uses, "⚙", "uses", 0.75),
    (Relation::MadeOf, "☷", "made of", 0.70),
    (Relation::MaterialFor, "☵", "material for", 0.60),
    (Relation::Complements, "☯", "complements", 0.65),
    (Relation::MeasuredBy, "⚖", "measured by", 0.55),
    (Relation::Symbolizes, "⌘", "symbolizes", 0.60),
    (Relation::InstanceOf, "♁", "instance of", 0.85),
    (Relation::HasInstance, "♃", "has instance", 0.80),
    (Relation::Attracts, "☊", "attracts", 0.50),
    (Relation::Repels, "☋", "repels", 0.50),
    (Relation::ConflictsWith, "✕", "conflicts with", 0.70),
    (Relation::Affirms, "✓", "affirms", 0.60),
    (Relation::HiddenAdjacency, "⊚", "hidden adjacency", 0.30),
    (Relation::GlobalConnect, "∼", "global connect", 0.20),
];

/// Extra accepted spellings beyond glyph / english phrase. Kebab-case forms
/// cover the config/CLI surface; the ASCII tilde covers hand-typed input.
static ALIASES: LazyLock<HashMap<&'static str, Relation>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Relation> = HashMap::new();
    m.insert("hidden-adjacency", Relation::HiddenAdjacency);
    m.insert("global-connect", Relation::GlobalConnect);
    m.insert("~", Relation::GlobalConnect);
    m.insert("is-a", Relation::InstanceOf);
    m.insert("kind-of", Relation::Hypernym);
    m.insert("part-of", Relation::PartOf);
    m.insert("member-of", Relation::MemberOf);
    m.insert("caused-by", Relation::CausedBy);
    m.insert("same-as", Relation::Synonym);
    m.insert("opposite-of", Relation::Antonym);
    m
});

static BY_GLYPH: LazyLock<HashMap<&'static str, Relation>> = LazyLock::new(|| {
    TABLE.iter().map(|&(rel, glyph, _, _)| (glyph, rel)).collect()
});

static BY_ENGLISH: LazyLock<HashMap<&'static str, Relation>> = LazyLock::new(|| {
    TABLE.iter().map(|&(rel, _, name, _)| (name, rel)).collect()
});

impl Relation {
    /// All 50 relations in stable registry order.
    pub fn all() -> impl Iterator<Item = Relation> {
        TABLE.iter().map(|&(rel, _, _, _)| rel)
    }

    /// The relation's wire glyph.
    pub fn glyph(self) -> &'static str {
        TABLE
            .iter()
            .find(|&&(rel, _, _, _)| rel == self)
            .map(|&(_, glyph, _, _)| glyph)
            .unwrap_or("?")
    }

    /// The relation's English display name.
    pub fn english(self) -> &'static str {
        TABLE
            .iter()
            .find(|&&(rel, _, _, _)| rel == self)
            .map(|&(_, _, name, _)| name)
            .unwrap_or("unknown")
    }

    /// The relation's priority multiplier in (0, 1].
    pub fn priority(self) -> f64 {
        TABLE
            .iter()
            .find(|&&(rel, _, _, _)| rel == self)
            .map(|&(_, _, _, p)| p)
            .unwrap_or(UNKNOWN_RELATION_PRIORITY)
    }

    /// Exact glyph lookup.
    pub fn from_glyph(glyph: &str) -> Option<Relation> {
        BY_GLYPH.get(glyph).copied()
    }

    /// Normalize a raw relation spelling. Accepts the glyph alone, a
    /// `"glyph english"` pair, the English phrase, or a registered alias.
    /// Returns `None` for anything outside the registry.
    pub fn normalize(raw: &str) -> Option<Relation> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(rel) = BY_GLYPH.get(trimmed) {
            return Some(*rel);
        }
        // "glyph english" — first whitespace-separated piece is the glyph
        if let Some((head, _rest)) = trimmed.split_once(char::is_whitespace) {
            if let Some(rel) = BY_GLYPH.get(head) {
                return Some(*rel);
            }
        }
        let lowered = trimmed.to_lowercase();
        if let Some(rel) = BY_ENGLISH.get(lowered.as_str()) {
            return Some(*rel);
        }
        ALIASES.get(lowered.as_str()).copied()
    }
}

/// Priority for a raw relation key as it appears in a record. Unknown keys
/// score the default 0.3.
pub fn priority_of(key: &str) -> f64 {
    Relation::normalize(key)
        .map(Relation::priority)
        .unwrap_or(UNKNOWN_RELATION_PRIORITY)
}

/// `"glyph — english (priority)"` lines for every relation, in registry
/// order. The collaborator system prompt and `/help` both render this.
pub fn catalog_lines() -> Vec<String> {
    TABLE
        .iter()
        .map(|&(_, glyph, name, p)| format!("{glyph} — {name} ({p:.2})"))
        .collect()
}

/// Relations sorted alphabetically by English name. UI summaries only.
pub fn alphabetical() -> Vec<Relation> {
    let mut rels: Vec<Relation> = Relation::all().collect();
    rels.sort_by_key(|r| r.english());
    rels
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_has_fifty_unique_glyphs() {
        let glyphs: HashSet<&str> = Relation::all().map(|r| r.glyph()).collect();
        assert_eq!(glyphs.len(), 50);
        let names: HashSet<&str> = Relation::all().map(|r| r.english()).collect();
        assert_eq!(names.len(), 50);
    }

    #[test]
    fn priorities_in_unit_interval() {
        for rel in Relation::all() {
            let p = rel.priority();
            assert!(p > 0.0 && p <= 1.0, "{:?} priority {} out of range", rel, p);
        }
    }

    #[test]
    fn distinguished_relations() {
        assert_eq!(Relation::HiddenAdjacency.glyph(), GLYPH_HIDDEN_ADJACENCY);
        assert_eq!(Relation::GlobalConnect.glyph(), GLYPH_GLOBAL_CONNECT);
        assert_eq!(Relation::Variant.glyph(), GLYPH_VARIANT);
    }

    #[test]
    fn normalize_accepts_all_spellings() {
        assert_eq!(Relation::normalize("≡"), Some(Relation::Synonym));
        assert_eq!(Relation::normalize("≡ synonym"), Some(Relation::Synonym));
        assert_eq!(Relation::normalize("synonym"), Some(Relation::Synonym));
        assert_eq!(Relation::normalize("SYNONYM"), Some(Relation::Synonym));
        assert_eq!(
            Relation::normalize("hidden-adjacency"),
            Some(Relation::HiddenAdjacency)
        );
        assert_eq!(Relation::normalize("~"), Some(Relation::GlobalConnect));
        assert_eq!(Relation::normalize("caused by"), Some(Relation::CausedBy));
        assert_eq!(Relation::normalize("not-a-relation"), None);
        assert_eq!(Relation::normalize(""), None);
    }

    #[test]
    fn unknown_priority_defaults() {
        assert!((priority_of("☄") - UNKNOWN_RELATION_PRIORITY).abs() < f64::EPSILON);
        assert!((priority_of("∼") - 0.20).abs() < f64::EPSILON);
    }

    #[test]
    fn alphabetical_is_for_display_only() {
        let alpha = alphabetical();
        assert_eq!(alpha.len(), 50);
        let names: Vec<&str> = alpha.iter().map(|r| r.english()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        // stable registry order differs from alphabetical
        let first_registry = Relation::all().next().unwrap();
        assert_eq!(first_registry, Relation::Synonym);
    }

    #[test]
    fn catalog_lists_every_relation() {
        let lines = catalog_lines();
        assert_eq!(lines.len(), 50);
        assert!(lines[0].starts_with("≡"));
        assert!(lines.iter().any(|l| l.contains("global connect")));
    }
}
