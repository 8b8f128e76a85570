//! Party-name normalization, matching and identity clustering.
//!
//! Recorded party names are inconsistent across instruments: "SMITH JOHN
//! JR", "John Smith", "JOHN SMITH REVOCABLE TRUST". The [`NameMatcher`]
//! classifies how two names relate, first hit wins:
//!
//! 1. exact after normalization → [`LinkType::Exact`], confidence 1.0
//! 2. one side is a trust whose base name matches the other →
//!    [`LinkType::TrustTransfer`], fixed confidence
//! 3. soft token-Jaccard similarity at or above the threshold →
//!    [`LinkType::SpellingVariation`], confidence = similarity
//! 4. two multi-word names sharing a first or last token →
//!    [`LinkType::NameChange`], low fixed confidence
//!
//! Rule 4 is a best-effort signal only. Callers that need a confident
//! link (chain linking, completeness) use [`NameMatcher::is_same_party`],
//! which ignores it.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::disjoint::DisjointSet;
use crate::fuzzy::soft_jaccard;
use crate::models::{EntityType, LinkType, LinkedIdentity};

pub const DEFAULT_NAME_THRESHOLD: f64 = 0.85;
pub const TRUST_TRANSFER_CONFIDENCE: f64 = 0.9;
pub const NAME_CHANGE_CONFIDENCE: f64 = 0.3;

/// Names that can never drive a useful name search.
const BUILTIN_GENERIC_NAMES: &[&str] = &[
    "UNKNOWN",
    "UNKNOWN TENANT",
    "UNKNOWN TENANTS",
    "UNKNOWN SPOUSE",
    "UNKNOWN HEIRS",
    "UNKNOWN PARTIES",
    "ALL UNKNOWN PARTIES",
    "TENANT",
    "OCCUPANT",
    "OCCUPANTS",
    "JOHN DOE",
    "JANE DOE",
    "PUBLIC",
    "HEIRS",
    "STATE OF FLORIDA",
    "CLERK OF COURT",
    "CLERK OF THE CIRCUIT COURT",
    "MORTGAGE ELECTRONIC REGISTRATION SYSTEMS",
    "MERS",
];

const NAME_SUFFIXES: &[&str] = &[
    "JR", "SR", "II", "III", "IV", "LLC", "INC", "CORP", "CO", "LTD", "LP", "LLP", "PA", "PLLC",
    "NA", "ESQ", "MD",
];

const NAME_PREFIXES: &[&str] = &["MR", "MRS", "MS", "DR", "HON", "REV"];

/// Tokens dropped after ET: ET AL, ET UX, ET VIR.
const ET_FOLLOWERS: &[&str] = &["AL", "UX", "VIR"];

const TRUST_MARKERS: &[&str] = &["TRUST", "TRUSTEE", "TRUSTEES", "TTEE", "TTEES", "TR", "TRS"];

/// Tokens stripped from a trust name to get the settlor's name.
const TRUST_NOISE: &[&str] = &[
    "TRUST", "TRUSTEE", "TRUSTEES", "TTEE", "TTEES", "TR", "TRS", "REVOCABLE", "IRREVOCABLE",
    "LIVING", "FAMILY", "AS", "OF", "THE", "DATED", "DTD", "UA", "UAD", "AGREEMENT", "AND",
];

const BANK_MARKERS: &[&str] = &[
    "BANK", "BANCORP", "SAVINGS", "CREDIT", "MORTGAGE", "LENDING", "FINANCIAL", "FEDERAL",
    "MERS", "FUNDING",
];

const LLC_MARKERS: &[&str] = &[
    "LLC", "INC", "CORP", "CORPORATION", "COMPANY", "CO", "LTD", "LP", "LLP", "PLLC", "PA",
    "HOLDINGS", "PARTNERS", "PARTNERSHIP", "ASSOCIATION", "ASSN", "HOMES", "BUILDERS",
    "DEVELOPMENT", "PROPERTIES", "INVESTMENTS", "GROUP",
];

/// Uppercased tokens with punctuation removed, in original order.
fn raw_tokens(name: &str) -> Vec<String> {
    let cleaned: String = name
        .to_uppercase()
        .chars()
        .filter_map(|c| match c {
            '\'' | '.' => None,
            c if c.is_ascii_alphanumeric() => Some(c),
            _ => Some(' '),
        })
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

/// Normalized token list: suffixes, honorifics and ET AL forms removed,
/// sorted alphabetically.
pub fn normalized_tokens(name: &str) -> Vec<String> {
    let tokens = raw_tokens(name);
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut skip_next = false;
    for (i, tok) in tokens.iter().enumerate() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if tok == "ET" && tokens.get(i + 1).is_some_and(|n| ET_FOLLOWERS.contains(&n.as_str())) {
            skip_next = true;
            continue;
        }
        if tok == "ETAL" || tok == "ETUX" || tok == "ETVIR" {
            continue;
        }
        if NAME_SUFFIXES.contains(&tok.as_str()) || NAME_PREFIXES.contains(&tok.as_str()) {
            continue;
        }
        out.push(tok.clone());
    }
    out.sort();
    out
}

/// Canonical comparison form. Order-independent: "SMITH JOHN" and "JOHN
/// SMITH" normalize identically.
pub fn normalize(name: &str) -> String {
    normalized_tokens(name).join(" ")
}

pub fn is_trust(name: &str) -> bool {
    raw_tokens(name)
        .iter()
        .any(|t| TRUST_MARKERS.contains(&t.as_str()))
}

/// The settlor/beneficiary name inside a trust name, normalized.
pub fn trust_base_name(name: &str) -> String {
    normalized_tokens(name)
        .into_iter()
        .filter(|t| !TRUST_NOISE.contains(&t.as_str()) && !t.chars().all(|c| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn entity_type(name: &str) -> EntityType {
    let tokens = raw_tokens(name);
    let has = |markers: &[&str]| tokens.iter().any(|t| markers.contains(&t.as_str()));
    if has(BANK_MARKERS) {
        EntityType::Bank
    } else if has(TRUST_MARKERS) {
        EntityType::Trust
    } else if has(LLC_MARKERS) {
        EntityType::Llc
    } else {
        EntityType::Individual
    }
}

/// How two names relate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameMatch {
    pub is_match: bool,
    pub link_type: Option<LinkType>,
    pub confidence: f64,
    pub canonical_name: Option<String>,
}

impl NameMatch {
    fn none() -> Self {
        Self {
            is_match: false,
            link_type: None,
            confidence: 0.0,
            canonical_name: None,
        }
    }

    fn linked(link_type: LinkType, confidence: f64, canonical: &str) -> Self {
        Self {
            is_match: true,
            link_type: Some(link_type),
            confidence,
            canonical_name: Some(canonical.trim().to_uppercase()),
        }
    }

    fn strength(&self) -> u8 {
        match self.link_type {
            Some(LinkType::Exact) => 4,
            Some(LinkType::TrustTransfer) => 3,
            Some(LinkType::SpellingVariation) => 2,
            Some(LinkType::NameChange) => 1,
            None => 0,
        }
    }

    /// A link strong enough to join two chain periods.
    pub fn is_confident(&self) -> bool {
        self.is_match && self.link_type != Some(LinkType::NameChange)
    }
}

/// Name matcher configured with a similarity threshold and a generic-name
/// dictionary.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    threshold: f64,
    generic: HashSet<String>,
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_THRESHOLD)
    }
}

impl NameMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            generic: BUILTIN_GENERIC_NAMES.iter().map(|n| normalize(n)).collect(),
        }
    }

    /// Extend the generic-name dictionary.
    pub fn with_generic_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.generic
            .extend(names.into_iter().map(|n| normalize(n.as_ref())));
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// True for dictionary names and for names that normalize to nothing.
    pub fn is_generic(&self, name: &str) -> bool {
        let norm = normalize(name);
        norm.is_empty()
            || self.generic.contains(&norm)
            || raw_tokens(name).first().is_some_and(|t| t == "UNKNOWN")
    }

    pub fn match_names(&self, a: &str, b: &str) -> NameMatch {
        let ta = normalized_tokens(a);
        let tb = normalized_tokens(b);
        if ta.is_empty() || tb.is_empty() {
            return NameMatch::none();
        }

        if ta == tb {
            return NameMatch::linked(LinkType::Exact, 1.0, a);
        }

        if let Some(m) = self.match_trust(a, b) {
            return m;
        }

        let ra: Vec<&str> = ta.iter().map(String::as_str).collect();
        let rb: Vec<&str> = tb.iter().map(String::as_str).collect();
        let similarity = soft_jaccard(&ra, &rb);
        if similarity >= self.threshold {
            return NameMatch::linked(LinkType::SpellingVariation, similarity, a);
        }

        if ta.len() >= 2 && tb.len() >= 2 {
            let ends_a = [ta.first(), ta.last()];
            let ends_b = [tb.first(), tb.last()];
            if ends_a.iter().any(|e| ends_b.contains(e)) {
                return NameMatch::linked(LinkType::NameChange, NAME_CHANGE_CONFIDENCE, a);
            }
        }

        NameMatch::none()
    }

    fn match_trust(&self, a: &str, b: &str) -> Option<NameMatch> {
        let (trust, other) = match (is_trust(a), is_trust(b)) {
            (true, false) => (a, b),
            (false, true) => (b, a),
            (true, true) => {
                let (ba, bb) = (trust_base_name(a), trust_base_name(b));
                return (!ba.is_empty() && ba == bb)
                    .then(|| NameMatch::linked(LinkType::TrustTransfer, TRUST_TRANSFER_CONFIDENCE, a));
            }
            (false, false) => return None,
        };
        let base = trust_base_name(trust);
        if base.is_empty() {
            return None;
        }
        let other_norm = normalized_tokens(other);
        let base_tokens: Vec<&str> = base.split_whitespace().collect();
        let other_tokens: Vec<&str> = other_norm.iter().map(String::as_str).collect();
        let same = base_tokens == other_tokens
            || soft_jaccard(&base_tokens, &other_tokens) >= self.threshold;
        same.then(|| NameMatch::linked(LinkType::TrustTransfer, TRUST_TRANSFER_CONFIDENCE, other))
    }

    /// Confident link between two names (name-change heuristics excluded).
    pub fn is_same_party(&self, a: &str, b: &str) -> bool {
        self.match_names(a, b).is_confident()
    }

    /// Strongest relation between any name on one side and any on the
    /// other.
    pub fn best_match<A, B>(&self, left: &[A], right: &[B]) -> NameMatch
    where
        A: AsRef<str>,
        B: AsRef<str>,
    {
        let mut best = NameMatch::none();
        for a in left {
            for b in right {
                let m = self.match_names(a.as_ref(), b.as_ref());
                if (m.strength(), m.confidence) > (best.strength(), best.confidence) {
                    best = m;
                }
            }
        }
        best
    }

    /// Group spelling variants into identities with a union-find pass.
    ///
    /// Names are deduplicated by normalized form first; only clusters with
    /// two or more distinct members become identities. The first member
    /// seen is the canonical name, and confidence is the weakest pairwise
    /// link that joined the cluster.
    pub fn cluster<S: AsRef<str>>(&self, property: &str, names: &[S]) -> Vec<LinkedIdentity> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut distinct: Vec<String> = Vec::new();
        for name in names {
            let raw = name.as_ref().trim().to_uppercase();
            let norm = normalize(&raw);
            if norm.is_empty() || self.is_generic(&raw) {
                continue;
            }
            if seen.insert(norm) {
                distinct.push(raw);
            }
        }

        let mut ds: DisjointSet<usize> = DisjointSet::new();
        let mut edges: Vec<(usize, f64)> = Vec::new();
        for i in 0..distinct.len() {
            ds.insert(i);
        }
        for i in 0..distinct.len() {
            for j in (i + 1)..distinct.len() {
                let m = self.match_names(&distinct[i], &distinct[j]);
                if m.link_type == Some(LinkType::SpellingVariation) {
                    ds.union(i, j);
                    edges.push((i, m.confidence));
                }
            }
        }

        let mut weakest: HashMap<usize, f64> = HashMap::new();
        for (i, confidence) in edges {
            if let Some(root) = ds.find(&i) {
                let slot = weakest.entry(root).or_insert(1.0);
                *slot = slot.min(confidence);
            }
        }

        ds.groups()
            .into_iter()
            .filter(|g| g.len() >= 2)
            .map(|group| {
                let root = ds.find(&group[0]).unwrap_or(group[0]);
                let members: Vec<String> = group.iter().map(|&i| distinct[i].clone()).collect();
                let canonical = members[0].clone();
                LinkedIdentity {
                    id: Uuid::new_v4().to_string(),
                    property: property.to_string(),
                    entity_type: entity_type(&canonical),
                    canonical_name: canonical,
                    link_type: LinkType::SpellingVariation,
                    confidence: weakest.get(&root).copied().unwrap_or(1.0),
                    members,
                }
            })
            .collect()
    }
}
