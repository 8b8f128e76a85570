//! Legal-description parser, search-term generator and fuzzy matcher.
//!
//! Recorded legal descriptions are free text written by many hands: "LOT
//! 198 BLOCK 3 TUSCANY SUBDIVISION AT TAMPA PALMS", "L 4 B 8 TOUCHSTONE PH
//! 2", "PT L 1-3 B 100 MAP OF PORT TAMPA CITY". This module turns that text
//! into a [`ParsedLegalDescription`], expands it into ordered search terms
//! for the public index, and decides whether two descriptions name the same
//! parcel.
//!
//! # Parsing
//!
//! Token extraction (lots, block, unit, phase, section/township/range, plat
//! book/page) runs first. The subdivision name is then found by layered
//! heuristics, first hit wins:
//!
//! 1. A segment containing an explicit suffix word (SUBDIVISION, ESTATES, …).
//! 2. The single meaningful segment left after removing extracted tokens.
//! 3. Text preceding the first lot/block token.
//! 4. Text following the last lot/block token, up to a stop phrase.
//!
//! Later layers are deliberately less precise. Every field defaults to
//! empty; an absent field means "cannot confirm", never "does not match".
//!
//! # Matching
//!
//! Lots, block, unit, phase, section/township/range and plat book/page must
//! agree exactly whenever both sides state them; any disagreement is an
//! immediate non-match. Subdivision names are compared with a token-set
//! ratio after numeral and abbreviation normalization. A lot/block agreement
//! with no comparable subdivision fact is not a match: lot 4 block 8 exists
//! in hundreds of subdivisions.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::fuzzy::token_set_ratio;
use crate::models::Operator;

static LOT_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:LOTS?|LT|L)\s*(\d+[A-Z]?)\s*(?:-|THRU|THROUGH|TO)\s*(\d+[A-Z]?)\b").unwrap()
});
static LOT_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:LOTS?|LT|L)\s*(\d+[A-Z]?(?:\s*(?:,|&|AND)\s*\d+[A-Z]?)*)\b").unwrap()
});
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:BLOCK|BLK)\s*|B\s+)(\d+[A-Z]?|[A-Z]{1,2})\b").unwrap()
});
static UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bUNIT\s*(?:NO\.?\s*)?(\d+-[0-9A-Z]+|\d+[A-Z]?|[A-Z]\d*)\b").unwrap()
});
static PHASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:PHASE|PH)\s*(\d+[A-Z]?|[IVX]+|ONE|TWO|THREE|FOUR|FIVE|SIX|SEVEN|EIGHT|NINE|TEN)\b",
    )
    .unwrap()
});
static STR_COMPACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})-(\d{1,2})-(\d{1,2})\b").unwrap());
static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:SECTION|SECT|SEC)\s*(\d{1,2})\b").unwrap());
static TOWNSHIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:TOWNSHIP|TWP|T)\s*(\d{1,2})\s*(?:SOUTH|NORTH|S|N)?\b").unwrap()
});
static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:RANGE|RNG|R)\s*(\d{1,2})\s*(?:EAST|WEST|E|W)?\b").unwrap()
});
static PLAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:PLAT\s+(?:BOOK|BK)|P\.?\s?B\.?|PB)\s*(\d+)\s*,?\s*(?:PAGES?|PGS?\.?|P\.?)\s*(\d+)",
    )
    .unwrap()
});
static PARTIAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:PT|PART|PORTION|PORT)\s+(?:OF\s+)?(?:LOTS?|LT|L)\b").unwrap()
});
static STOP_PHRASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:ACCORDING\s+TO|AS\s+RECORDED|AS\s+PER|PER\s+PLAT|RECORDED\s+IN|OF\s+THE\s+PUBLIC\s+RECORDS|PUBLIC\s+RECORDS|PLAT\s+BOOK|LESS|EXCEPT|TOGETHER\s+WITH|SUBJECT\s+TO|LYING|BEING|MORE\s+PARTICULARLY|AS\s+DESC|A/K/A|AKA|COUNTY)\b",
    )
    .unwrap()
});
static LEADING_NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:THAT|ALL|PART|PORTION|THE|OF|AND|IN|&|AT|ON)\s+)+").unwrap()
});

/// Words that mark the end of a subdivision name.
const SUFFIX_WORDS: &[&str] = &[
    "SUBDIVISION", "SUBDIV", "SUBD", "SUB", "ESTATES", "ESTS", "HEIGHTS", "HTS", "ACRES",
    "PARK", "MANOR", "VILLAGE", "VILLAS", "GARDENS", "GDNS", "PLACE", "TOWNHOMES",
    "TOWNHOUSES", "CONDOMINIUM", "CONDO", "ADDITION", "ADDN", "ADD", "ISLES", "LAKES",
    "POINTE", "RESERVE", "CROSSING", "RIDGE", "PRESERVE", "PLANTATION", "SHORES", "HILLS",
    "OAKS", "TRACE", "COVE", "LANDING", "COLONY", "REPLAT",
];

/// Tokens with no identifying value on their own.
const NOISE_WORDS: &[&str] = &[
    "OF", "THE", "AND", "IN", "A", "AN", "AT", "ON", "TO", "BY", "FT", "FEET", "FOOT", "N", "S",
    "E", "W", "NE", "NW", "SE", "SW", "NORTH", "SOUTH", "EAST", "WEST", "NLY", "SLY", "ELY",
    "WLY", "THEREOF", "&",
];

/// Single tokens that would return unusably broad result sets.
const GENERIC_TERM_WORDS: &[&str] = &[
    "LOT", "LOTS", "BLOCK", "BLK", "SECTION", "SEC", "UNIT", "PHASE", "PH", "TRACT", "PARCEL",
    "THE", "OF", "AND", "NORTH", "SOUTH", "EAST", "WEST", "FT", "FEET", "SUBDIVISION", "SUB",
    "ESTATES", "ADDITION", "PLAT", "MAP", "CITY", "TOWN", "REVISED", "REV",
];

/// Block values the block pattern can pick up from ordinary words.
const BLOCK_STOP_VALUES: &[&str] = &["OF", "IN", "AT", "TO", "ON", "OR", "AS", "BY", "AN"];

/// Longest raw-text prefix used when nothing structured could be parsed.
const RAW_PREFIX_CHARS: usize = 40;

/// Largest numeric lot range expanded into individual lots.
const MAX_LOT_RANGE: u32 = 25;

/// Structured view of a legal description. Derived on demand, never
/// mutated after parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedLegalDescription {
    pub subdivision: Option<String>,
    pub lots: Vec<String>,
    pub block: Option<String>,
    pub unit: Option<String>,
    pub phase: Option<String>,
    pub section: Option<String>,
    pub township: Option<String>,
    pub range: Option<String>,
    pub plat_book: Option<String>,
    pub plat_page: Option<String>,
    /// "PT L 1-3": the parcel is a portion of the listed lots.
    pub partial_lot: bool,
}

impl ParsedLegalDescription {
    /// True when nothing at all could be recognized.
    pub fn is_empty(&self) -> bool {
        self.subdivision.is_none()
            && self.lots.is_empty()
            && self.block.is_none()
            && self.unit.is_none()
            && self.phase.is_none()
            && self.section.is_none()
            && self.plat_book.is_none()
    }

    pub fn has_lot_or_block(&self) -> bool {
        !self.lots.is_empty() || self.block.is_some()
    }
}

/// Byte span of an extracted token in the normalized text.
type Span = (usize, usize);

/// Parse raw legal text. Never fails; unrecognized input yields an empty
/// result.
pub fn parse(raw: &str) -> ParsedLegalDescription {
    let text = normalize_text(raw);
    let mut parsed = ParsedLegalDescription::default();
    if text.is_empty() {
        return parsed;
    }

    let mut spans: Vec<Span> = Vec::new();
    let mut lot_block_spans: Vec<Span> = Vec::new();

    if let Some(m) = PARTIAL_RE.find(&text) {
        parsed.partial_lot = true;
        // Only the "PT OF" prefix; the lot token itself is matched below.
        let prefix_end = text[m.start()..m.end()]
            .rfind(|c: char| c.is_whitespace())
            .map(|i| m.start() + i)
            .unwrap_or(m.end());
        spans.push((m.start(), prefix_end));
    }

    if let Some(caps) = PLAT_RE.captures(&text) {
        parsed.plat_book = Some(normalize_identifier(&caps[1]));
        parsed.plat_page = Some(normalize_identifier(&caps[2]));
        spans.push(span_of(&caps));
    }

    for caps in LOT_RANGE_RE.captures_iter(&text) {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
        for lot in expand_lot_range(&caps[1], &caps[2]) {
            push_unique(&mut parsed.lots, lot);
        }
        spans.push(whole);
        lot_block_spans.push(whole);
    }

    for caps in LOT_LIST_RE.captures_iter(&text) {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
        if overlaps(&spans, whole) {
            continue;
        }
        for lot in split_lot_list(&caps[1]) {
            push_unique(&mut parsed.lots, lot);
        }
        spans.push(whole);
        lot_block_spans.push(whole);
    }

    for caps in BLOCK_RE.captures_iter(&text) {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
        let value = &caps[1];
        if BLOCK_STOP_VALUES.contains(&value) || overlaps(&spans, whole) {
            continue;
        }
        if parsed.block.is_none() {
            parsed.block = Some(normalize_identifier(value));
        }
        spans.push(whole);
        lot_block_spans.push(whole);
    }

    if let Some(caps) = UNIT_RE.captures(&text) {
        parsed.unit = Some(normalize_identifier(&caps[1]));
        spans.push(span_of(&caps));
    }

    if let Some(caps) = PHASE_RE.captures(&text) {
        parsed.phase = Some(normalize_numeral(&caps[1]));
        spans.push(span_of(&caps));
    }

    extract_section_township_range(&text, &mut parsed, &mut spans);

    parsed.subdivision = find_subdivision(&text, &spans, &lot_block_spans);
    parsed
}

fn span_of(caps: &regex::Captures<'_>) -> Span {
    caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default()
}

fn extract_section_township_range(
    text: &str,
    parsed: &mut ParsedLegalDescription,
    spans: &mut Vec<Span>,
) {
    if let Some(caps) = STR_COMPACT_RE.captures(text) {
        let whole = span_of(&caps);
        if !overlaps(spans, whole) {
            parsed.section = Some(normalize_identifier(&caps[1]));
            parsed.township = Some(normalize_identifier(&caps[2]));
            parsed.range = Some(normalize_identifier(&caps[3]));
            spans.push(whole);
            return;
        }
    }

    // Narrative form only counts when at least two of the three parts are
    // present; a lone "SECTION 2" is usually part of a subdivision name.
    let section = SECTION_RE.captures(text);
    let township = TOWNSHIP_RE.captures(text);
    let range = RANGE_RE.captures(text);
    let present = [section.is_some(), township.is_some(), range.is_some()]
        .iter()
        .filter(|p| **p)
        .count();
    if present < 2 {
        return;
    }
    if let Some(caps) = section {
        parsed.section = Some(normalize_identifier(&caps[1]));
        spans.push(span_of(&caps));
    }
    if let Some(caps) = township {
        parsed.township = Some(normalize_identifier(&caps[1]));
        spans.push(span_of(&caps));
    }
    if let Some(caps) = range {
        parsed.range = Some(normalize_identifier(&caps[1]));
        spans.push(span_of(&caps));
    }
}

fn find_subdivision(text: &str, spans: &[Span], lot_block_spans: &[Span]) -> Option<String> {
    let residual = blank_spans(text, spans);
    let segments: Vec<String> = residual
        .split(['|', ','])
        .map(|s| clean_candidate(s))
        .filter(|s| !s.is_empty())
        .collect();

    suffix_layer(&segments)
        .or_else(|| (!spans.is_empty()).then(|| remainder_layer(&segments)).flatten())
        .or_else(|| preceding_layer(text, lot_block_spans))
        .or_else(|| following_layer(text, spans, lot_block_spans))
}

/// Layer 1: a segment carrying an explicit subdivision suffix word.
fn suffix_layer(segments: &[String]) -> Option<String> {
    segments
        .iter()
        .find(|seg| seg.split_whitespace().any(|w| SUFFIX_WORDS.contains(&w)))
        .cloned()
}

/// Layer 2: exactly one meaningful segment left after token removal. Only
/// tried when some token was extracted at all.
fn remainder_layer(segments: &[String]) -> Option<String> {
    let meaningful: Vec<&String> = segments.iter().filter(|s| is_meaningful(s)).collect();
    match meaningful.as_slice() {
        [only] => Some((*only).clone()),
        _ => None,
    }
}

/// Layer 3: text before the first lot/block token.
fn preceding_layer(text: &str, lot_block_spans: &[Span]) -> Option<String> {
    let first = lot_block_spans.iter().map(|s| s.0).min()?;
    let candidate = clean_candidate(&text[..first]);
    is_meaningful(&candidate).then_some(candidate)
}

/// Layer 4: text after the last lot/block token, up to a stop phrase.
fn following_layer(text: &str, spans: &[Span], lot_block_spans: &[Span]) -> Option<String> {
    let last = lot_block_spans.iter().map(|s| s.1).max()?;
    let tail = blank_spans(text, spans);
    let tail = tail.get(last..)?;
    let candidate = clean_candidate(tail.split('|').find(|s| is_meaningful(&clean_candidate(s)))?);
    is_meaningful(&candidate).then_some(candidate)
}

/// Replace extracted token spans with a segment delimiter. The input is
/// ASCII after [`normalize_text`], so byte offsets are preserved.
fn blank_spans(text: &str, spans: &[Span]) -> String {
    text.char_indices()
        .map(|(i, c)| {
            if spans.iter().any(|&(s, e)| i >= s && i < e) {
                '|'
            } else {
                c
            }
        })
        .collect()
}

/// Truncate at a stop phrase, strip leading connector words and trailing
/// noise, collapse whitespace.
fn clean_candidate(segment: &str) -> String {
    let mut s = segment.trim().to_string();
    if let Some(m) = STOP_PHRASE_RE.find(&s) {
        s.truncate(m.start());
    }
    let s = LEADING_NOISE_RE.replace(s.trim(), "").to_string();
    let mut words: Vec<&str> = s
        .split_whitespace()
        .filter(|w| !w.chars().all(|c| c == '-' || c == '.' || c == '&'))
        .collect();
    while let Some(last) = words.last() {
        if NOISE_WORDS.contains(last) {
            words.pop();
        } else {
            break;
        }
    }
    words.join(" ")
}

fn is_meaningful(candidate: &str) -> bool {
    candidate.split_whitespace().any(|w| {
        !NOISE_WORDS.contains(&w) && w.chars().filter(|c| c.is_ascii_alphabetic()).count() >= 3
    })
}

fn overlaps(spans: &[Span], candidate: Span) -> bool {
    spans
        .iter()
        .any(|&(s, e)| candidate.0 < e && s < candidate.1)
}

fn push_unique(lots: &mut Vec<String>, lot: String) {
    if !lots.contains(&lot) {
        lots.push(lot);
    }
}

fn expand_lot_range(start: &str, end: &str) -> Vec<String> {
    let (a, b) = (normalize_identifier(start), normalize_identifier(end));
    match (a.parse::<u32>(), b.parse::<u32>()) {
        (Ok(x), Ok(y)) if x <= y && y - x <= MAX_LOT_RANGE => (x..=y).map(|n| n.to_string()).collect(),
        _ => vec![a, b],
    }
}

fn split_lot_list(list: &str) -> Vec<String> {
    list.replace('&', ",")
        .replace(" AND ", ",")
        .split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "AND")
        .map(normalize_identifier)
        .collect()
}

/// Uppercase, drop leading zeros from numeric identifiers.
fn normalize_identifier(value: &str) -> String {
    let v = value.trim().to_uppercase();
    let digits_end = v.find(|c: char| !c.is_ascii_digit()).unwrap_or(v.len());
    if digits_end == 0 {
        return v;
    }
    let (num, rest) = v.split_at(digits_end);
    let trimmed = num.trim_start_matches('0');
    let num = if trimmed.is_empty() { "0" } else { trimmed };
    format!("{}{}", num, rest)
}

/// Uppercase, turn punctuation that never carries meaning (and anything
/// non-ASCII) into spaces, collapse whitespace.
fn normalize_text(raw: &str) -> String {
    let upper: String = raw
        .to_uppercase()
        .chars()
        .map(|c| match c {
            ';' | ':' | '(' | ')' | '"' => ' ',
            c if !c.is_ascii() || c.is_ascii_control() => ' ',
            c => c,
        })
        .collect();
    upper.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Roman numerals, number words and ordinals to digits. Anything else is
/// returned uppercased and unchanged.
pub fn normalize_numeral(token: &str) -> String {
    let t = token.trim().to_uppercase();
    let word = match t.as_str() {
        "ONE" | "FIRST" | "1ST" => Some(1),
        "TWO" | "SECOND" | "2ND" => Some(2),
        "THREE" | "THIRD" | "3RD" => Some(3),
        "FOUR" | "FOURTH" | "4TH" => Some(4),
        "FIVE" | "FIFTH" | "5TH" => Some(5),
        "SIX" | "SIXTH" | "6TH" => Some(6),
        "SEVEN" | "SEVENTH" | "7TH" => Some(7),
        "EIGHT" | "EIGHTH" | "8TH" => Some(8),
        "NINE" | "NINTH" | "9TH" => Some(9),
        "TEN" | "TENTH" | "10TH" => Some(10),
        "ELEVEN" => Some(11),
        "TWELVE" => Some(12),
        _ => None,
    };
    if let Some(n) = word {
        return n.to_string();
    }
    if let Some(n) = roman_value(&t) {
        return n.to_string();
    }
    normalize_identifier(&t)
}

fn roman_value(token: &str) -> Option<u32> {
    if token.is_empty() || !token.chars().all(|c| matches!(c, 'I' | 'V' | 'X')) {
        return None;
    }
    let value = |c: char| match c {
        'I' => 1,
        'V' => 5,
        _ => 10,
    };
    let chars: Vec<i32> = token.chars().map(value).collect();
    let mut total = 0i32;
    for (i, v) in chars.iter().enumerate() {
        match chars.get(i + 1) {
            Some(next) if next > v => total -= v,
            _ => total += v,
        }
    }
    (1..=30).contains(&total).then_some(total as u32)
}

/// Canonical comparison form of a subdivision name: abbreviations
/// expanded, numerals converted to digits, filler words dropped.
pub fn normalize_subdivision(name: &str) -> String {
    let cleaned: String = name
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .filter(|w| !matches!(*w, "THE" | "A" | "AN" | "OF" | "AND"))
        .map(|w| match w {
            "PH" => "PHASE".to_string(),
            "SEC" | "SECT" => "SECTION".to_string(),
            "SUB" | "SUBD" | "SUBDIV" => "SUBDIVISION".to_string(),
            "ESTS" | "EST" => "ESTATES".to_string(),
            "HTS" => "HEIGHTS".to_string(),
            "GDNS" => "GARDENS".to_string(),
            "ADD" | "ADDN" => "ADDITION".to_string(),
            "CONDO" => "CONDOMINIUM".to_string(),
            "TWNHMS" => "TOWNHOMES".to_string(),
            "REV" => "REVISED".to_string(),
            "MT" => "MOUNT".to_string(),
            other => normalize_numeral(other),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ═══════════════════════════════════════════════════════════════════════
// Search-term permutations
// ═══════════════════════════════════════════════════════════════════════

/// One candidate search term for the public index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegalTerm {
    /// Term text; wildcard terms end in `*`.
    pub term: String,
    pub wildcard: bool,
}

impl LegalTerm {
    fn exact(term: String) -> Self {
        Self { term, wildcard: false }
    }

    fn prefix(term: &str) -> Self {
        Self {
            term: format!("{}*", term.trim_end_matches('*').trim()),
            wildcard: true,
        }
    }

    pub fn operator(&self) -> Operator {
        if self.wildcard {
            Operator::Begins
        } else {
            Operator::Equals
        }
    }
}

/// Expand a parsed description into ordered search terms.
///
/// Exact terms come before wildcard terms; within each group the most
/// specific (lot + block + full subdivision) come first and bare
/// subdivision prefixes last, longest prefix first. Overly generic single
/// tokens are dropped. When nothing structured was parsed, a raw-text
/// prefix is the only term.
pub fn generate_permutations(
    parsed: &ParsedLegalDescription,
    raw: &str,
    max_count: usize,
) -> Vec<LegalTerm> {
    let mut exact: Vec<LegalTerm> = Vec::new();
    let mut wildcard: Vec<LegalTerm> = Vec::new();

    if let Some(sub) = parsed.subdivision.as_deref() {
        let sub_words: Vec<&str> = sub.split_whitespace().collect();
        let lot_forms = lot_forms(&parsed.lots);
        let mut sub_variants: Vec<String> = Vec::new();
        if let Some(phase) = parsed.phase.as_deref() {
            sub_variants.push(format!("{} PH {}", sub, phase));
            sub_variants.push(format!("{} PHASE {}", sub, phase));
        }
        sub_variants.push(sub.to_string());

        for variant in &sub_variants {
            match (lot_forms.is_empty(), parsed.block.as_deref()) {
                (false, Some(block)) => {
                    for lot in &lot_forms {
                        if parsed.partial_lot {
                            exact.push(LegalTerm::exact(format!("PT L {} B {} {}", lot, block, variant)));
                        }
                        exact.push(LegalTerm::exact(format!("L {} B {} {}", lot, block, variant)));
                    }
                }
                (false, None) => {
                    for lot in &lot_forms {
                        exact.push(LegalTerm::exact(format!("L {} {}", lot, variant)));
                    }
                }
                (true, Some(block)) => {
                    exact.push(LegalTerm::exact(format!("B {} {}", block, variant)));
                }
                (true, None) => {}
            }
        }
        if let (Some(lot), Some(block)) = (parsed.lots.first(), parsed.block.as_deref()) {
            exact.push(LegalTerm::exact(format!("LOT {} BLOCK {} {}", lot, block, sub)));
        }

        if let (Some(lot), Some(block)) = (lot_forms.first(), parsed.block.as_deref()) {
            for k in prefix_lengths(&sub_words) {
                wildcard.push(LegalTerm::prefix(&format!(
                    "L {} B {} {}",
                    lot,
                    block,
                    sub_words[..k].join(" ")
                )));
            }
        }
        wildcard.push(LegalTerm::prefix(sub));
        for k in prefix_lengths(&sub_words) {
            wildcard.push(LegalTerm::prefix(&sub_words[..k].join(" ")));
        }
    }

    let mut terms: Vec<LegalTerm> = exact.into_iter().chain(wildcard).collect();
    if terms.is_empty() {
        if let Some(prefix) = raw_prefix(raw) {
            terms.push(LegalTerm::prefix(&prefix));
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    terms
        .into_iter()
        .filter(|t| !is_generic_term(&t.term))
        .filter(|t| seen.insert(t.term.clone()))
        .take(max_count)
        .collect()
}

/// Proper word-prefix lengths, longest first, skipping prefixes that end
/// on a connector word.
fn prefix_lengths(words: &[&str]) -> Vec<usize> {
    (1..words.len())
        .rev()
        .filter(|&k| !NOISE_WORDS.contains(&words[k - 1]))
        .collect()
}

/// Lot renderings: a consecutive run as "1-3" first, then each lot.
fn lot_forms(lots: &[String]) -> Vec<String> {
    let mut forms = Vec::new();
    if lots.len() > 1 {
        let nums: Vec<u32> = lots.iter().filter_map(|l| l.parse().ok()).collect();
        let consecutive = nums.len() == lots.len() && nums.windows(2).all(|w| w[1] == w[0] + 1);
        if consecutive {
            forms.push(format!("{}-{}", lots[0], lots[lots.len() - 1]));
        }
    }
    forms.extend(lots.iter().cloned());
    forms
}

fn raw_prefix(raw: &str) -> Option<String> {
    let text = normalize_text(raw);
    if text.is_empty() {
        return None;
    }
    let mut out = String::new();
    for word in text.split_whitespace() {
        if !out.is_empty() && out.len() + 1 + word.len() > RAW_PREFIX_CHARS {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.len() > RAW_PREFIX_CHARS {
        out = out.chars().take(RAW_PREFIX_CHARS).collect();
    }
    Some(out)
}

/// A term whose only token is a year, a bare number, a stop word or too
/// short to narrow anything.
pub fn is_generic_term(term: &str) -> bool {
    let core = term.trim_end_matches('*').trim();
    let tokens: Vec<&str> = core.split_whitespace().collect();
    match tokens.as_slice() {
        [] => true,
        [only] => {
            let all_digits = only.chars().all(|c| c.is_ascii_digit());
            all_digits
                || only.len() < 3
                || GENERIC_TERM_WORDS.contains(only)
                || NOISE_WORDS.contains(only)
        }
        _ => tokens
            .iter()
            .all(|t| NOISE_WORDS.contains(t) || GENERIC_TERM_WORDS.contains(t) || t.chars().all(|c| c.is_ascii_digit())),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Matching
// ═══════════════════════════════════════════════════════════════════════

/// Outcome of comparing two legal descriptions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegalMatch {
    pub is_match: bool,
    pub confidence: f64,
    pub reason: String,
    /// Lots and/or block were stated on both sides and agreed.
    pub lot_block_agreed: bool,
}

impl LegalMatch {
    fn reject(confidence: f64, reason: String) -> Self {
        Self {
            is_match: false,
            confidence,
            reason,
            lot_block_agreed: false,
        }
    }
}

/// Parse and compare two raw descriptions.
pub fn match_text(a: &str, b: &str, threshold: f64) -> LegalMatch {
    match_legal(&parse(a), &parse(b), threshold)
}

/// Component-wise comparison. Every component testable on both sides must
/// agree; any exact-component mismatch short-circuits with confidence 0.
///
/// Lot numbers compare as exact tokens ("40" never equals "4"). A lot list
/// agrees when it contains one of the other side's lots: a single instrument
/// conveying "LOTS 4 AND 5" covers the parcel on lot 4, and a portion of a
/// lot range ("PT L 1-3") is still recorded against each lot in it.
pub fn match_legal(
    a: &ParsedLegalDescription,
    b: &ParsedLegalDescription,
    threshold: f64,
) -> LegalMatch {
    let mut scores: Vec<f64> = Vec::new();
    let mut agreed: Vec<&'static str> = Vec::new();
    let mut lot_block = false;

    if !a.lots.is_empty() && !b.lots.is_empty() {
        if !a.lots.iter().any(|l| b.lots.contains(l)) {
            return LegalMatch::reject(
                0.0,
                format!("lot mismatch: {} vs {}", a.lots.join(","), b.lots.join(",")),
            );
        }
        scores.push(1.0);
        agreed.push("lot");
        lot_block = true;
    }

    let exact_fields: [(&'static str, &Option<String>, &Option<String>); 6] = [
        ("block", &a.block, &b.block),
        ("unit", &a.unit, &b.unit),
        ("phase", &a.phase, &b.phase),
        ("section", &a.section, &b.section),
        ("township", &a.township, &b.township),
        ("range", &a.range, &b.range),
    ];
    for (label, left, right) in exact_fields {
        if let (Some(l), Some(r)) = (left, right) {
            if l != r {
                return LegalMatch::reject(0.0, format!("{} mismatch: {} vs {}", label, l, r));
            }
            scores.push(1.0);
            agreed.push(label);
            if label == "block" {
                lot_block = true;
            }
        }
    }

    let mut subdivision_fact = false;
    if let (Some(lb), Some(lp), Some(rb), Some(rp)) =
        (&a.plat_book, &a.plat_page, &b.plat_book, &b.plat_page)
    {
        if lb != rb || lp != rp {
            return LegalMatch::reject(
                0.0,
                format!("plat mismatch: {}/{} vs {}/{}", lb, lp, rb, rp),
            );
        }
        scores.push(1.0);
        agreed.push("plat");
        subdivision_fact = true;
    }

    if let (Some(sa), Some(sb)) = (&a.subdivision, &b.subdivision) {
        let ratio = token_set_ratio(&normalize_subdivision(sa), &normalize_subdivision(sb));
        if ratio < threshold {
            return LegalMatch::reject(
                ratio,
                format!("subdivision mismatch ({:.2}): {} vs {}", ratio, sa, sb),
            );
        }
        scores.push(ratio);
        agreed.push("subdivision");
        subdivision_fact = true;
    }

    if scores.is_empty() {
        return LegalMatch::reject(0.0, "no comparable components".to_string());
    }

    if lot_block && !subdivision_fact {
        return LegalMatch {
            is_match: false,
            confidence: 0.5,
            reason: "lot/block agree but no subdivision fact to confirm".to_string(),
            lot_block_agreed: true,
        };
    }

    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let (confidence, reason) = if lot_block {
        (mean, format!("matched on {}", agreed.join(", ")))
    } else {
        (mean * 0.7, format!("matched on {} only", agreed.join(", ")))
    };
    LegalMatch {
        is_match: true,
        confidence,
        reason,
        lot_block_agreed: lot_block,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lot_block_subdivision() {
        let p = parse("LOT 198 BLOCK 3 TUSCANY SUBDIVISION AT TAMPA PALMS");
        assert_eq!(p.lots, vec!["198"]);
        assert_eq!(p.block.as_deref(), Some("3"));
        assert_eq!(p.subdivision.as_deref(), Some("TUSCANY SUBDIVISION AT TAMPA PALMS"));
    }

    #[test]
    fn parses_abbreviated_form_with_phase() {
        let p = parse("L 4 B 8 TOUCHSTONE PH 2");
        assert_eq!(p.lots, vec!["4"]);
        assert_eq!(p.block.as_deref(), Some("8"));
        assert_eq!(p.phase.as_deref(), Some("2"));
        assert_eq!(p.subdivision.as_deref(), Some("TOUCHSTONE"));
    }

    #[test]
    fn parses_multi_lot_list() {
        let p = parse("LOTS 1, 2 AND 3 BLOCK A OAK PARK");
        assert_eq!(p.lots, vec!["1", "2", "3"]);
        assert_eq!(p.block.as_deref(), Some("A"));
        assert_eq!(p.subdivision.as_deref(), Some("OAK PARK"));
    }

    #[test]
    fn parses_partial_lot_range() {
        let p = parse("PT L 1-3 B 100 MAP OF PORT TAMPA CITY");
        assert!(p.partial_lot);
        assert_eq!(p.lots, vec!["1", "2", "3"]);
        assert_eq!(p.block.as_deref(), Some("100"));
        assert_eq!(p.subdivision.as_deref(), Some("MAP OF PORT TAMPA CITY"));
    }

    #[test]
    fn parses_compact_section_township_range() {
        let p = parse("THE N 100 FT OF THE S 1/2 OF 11-30-20");
        assert_eq!(p.section.as_deref(), Some("11"));
        assert_eq!(p.township.as_deref(), Some("30"));
        assert_eq!(p.range.as_deref(), Some("20"));
    }

    #[test]
    fn parses_narrative_section_township_range() {
        let p = parse("THAT PART OF SECTION 12 TOWNSHIP 28 SOUTH RANGE 18 EAST");
        assert_eq!(p.section.as_deref(), Some("12"));
        assert_eq!(p.township.as_deref(), Some("28"));
        assert_eq!(p.range.as_deref(), Some("18"));
    }

    #[test]
    fn lone_section_stays_in_subdivision_name() {
        let p = parse("LOT 7 BLOCK 2 TAMPA PALMS SECTION 2");
        assert!(p.section.is_none());
        assert_eq!(p.subdivision.as_deref(), Some("TAMPA PALMS SECTION 2"));
    }

    #[test]
    fn parses_plat_book_page_and_stops_subdivision() {
        let p = parse("LOT 5 BLOCK 2 HERITAGE ISLES ACCORDING TO THE PLAT THEREOF PB 82 PG 21");
        assert_eq!(p.plat_book.as_deref(), Some("82"));
        assert_eq!(p.plat_page.as_deref(), Some("21"));
        assert_eq!(p.subdivision.as_deref(), Some("HERITAGE ISLES"));
    }

    #[test]
    fn subdivision_before_lot_block_is_found() {
        let p = parse("CARROLLWOOD VILLAGE, LOT 12 BLOCK 4");
        assert_eq!(p.subdivision.as_deref(), Some("CARROLLWOOD VILLAGE"));
        let p = parse("BAYSHORE BEAUTIFUL LOT 12 BLOCK 4");
        assert_eq!(p.subdivision.as_deref(), Some("BAYSHORE BEAUTIFUL"));
    }

    #[test]
    fn malformed_input_yields_empty_result() {
        assert!(parse("").is_empty());
        assert!(parse("   ;;; ").is_empty());
        let p = parse("12 34 56");
        assert!(p.subdivision.is_none());
        assert!(p.lots.is_empty());
    }

    #[test]
    fn numerals_normalize() {
        assert_eq!(normalize_numeral("II"), "2");
        assert_eq!(normalize_numeral("IV"), "4");
        assert_eq!(normalize_numeral("THREE"), "3");
        assert_eq!(normalize_numeral("007"), "7");
        assert_eq!(
            normalize_subdivision("Touchstone Ph II"),
            normalize_subdivision("TOUCHSTONE PHASE 2")
        );
    }

    #[test]
    fn lot_mismatch_is_a_hard_stop() {
        let m = match_text("L 4 B 8 TOUCHSTONE PH 2", "L 5 B 8 TOUCHSTONE PH 2", 0.8);
        assert!(!m.is_match);
        assert_eq!(m.confidence, 0.0);
    }

    #[test]
    fn lot_40_never_matches_lot_4() {
        let m = match_text(
            "LOT 40 BLOCK 1 HERITAGE ISLES PHASE 1",
            "LOT 4 BLOCK 1 HERITAGE ISLES PHASE 1",
            0.8,
        );
        assert!(!m.is_match);
    }

    #[test]
    fn multi_lot_instrument_covers_each_listed_lot() {
        let m = match_text("LOT 4 BLOCK 8 TOUCHSTONE", "LOTS 4 AND 5 BLOCK 8 TOUCHSTONE", 0.8);
        assert!(m.is_match, "{}", m.reason);
        assert!(m.lot_block_agreed);

        let m = match_text("LOT 40 BLOCK 8 TOUCHSTONE", "LOTS 4 AND 5 BLOCK 8 TOUCHSTONE", 0.8);
        assert!(!m.is_match);
    }

    #[test]
    fn abbreviations_and_numerals_match() {
        let m = match_text("L 4 B 8 TOUCHSTONE PH II", "LOT 4 BLOCK 8 TOUCHSTONE PHASE 2", 0.8);
        assert!(m.is_match, "{}", m.reason);
        assert!(m.lot_block_agreed);
        assert!(m.confidence > 0.9);
    }

    #[test]
    fn lot_block_without_subdivision_is_not_confident() {
        let a = ParsedLegalDescription {
            lots: vec!["4".into()],
            block: Some("8".into()),
            ..Default::default()
        };
        let b = parse("LOT 4 BLOCK 8 TOUCHSTONE");
        let m = match_legal(&a, &b, 0.8);
        assert!(!m.is_match);
        assert!(m.lot_block_agreed);
    }

    #[test]
    fn different_subdivisions_do_not_match() {
        let m = match_text("LOT 4 BLOCK 8 TOUCHSTONE", "LOT 4 BLOCK 8 HERITAGE ISLES", 0.8);
        assert!(!m.is_match);
    }

    #[test]
    fn nothing_comparable_is_not_a_match() {
        let m = match_text("LOT 4 BLOCK 8 TOUCHSTONE", "", 0.8);
        assert!(!m.is_match);
        assert_eq!(m.reason, "no comparable components");
    }

    #[test]
    fn permutations_put_exact_before_wildcard() {
        let raw = "LOT 198 BLOCK 3 TUSCANY SUBDIVISION AT TAMPA PALMS";
        let terms = generate_permutations(&parse(raw), raw, 50);
        let first_wild = terms.iter().position(|t| t.wildcard).unwrap();
        assert!(terms[..first_wild].iter().all(|t| !t.wildcard));
        assert!(terms[first_wild..].iter().all(|t| t.wildcard));
        assert_eq!(terms[0].term, "L 198 B 3 TUSCANY SUBDIVISION AT TAMPA PALMS");
        assert_eq!(terms[0].operator(), Operator::Equals);
    }

    #[test]
    fn permutations_order_prefixes_longest_first() {
        let raw = "LOT 198 BLOCK 3 TUSCANY SUBDIVISION AT TAMPA PALMS";
        let terms = generate_permutations(&parse(raw), raw, 50);
        let bare: Vec<&str> = terms
            .iter()
            .filter(|t| t.wildcard && !t.term.starts_with("L "))
            .map(|t| t.term.as_str())
            .collect();
        assert_eq!(
            bare,
            vec![
                "TUSCANY SUBDIVISION AT TAMPA PALMS*",
                "TUSCANY SUBDIVISION AT TAMPA*",
                "TUSCANY SUBDIVISION*",
                "TUSCANY*",
            ]
        );
    }

    #[test]
    fn permutations_are_deterministic_and_capped() {
        let raw = "L 4 B 8 TOUCHSTONE PH 2";
        let a = generate_permutations(&parse(raw), raw, 4);
        let b = generate_permutations(&parse(raw), raw, 4);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert_eq!(a[0].term, "L 4 B 8 TOUCHSTONE PH 2");
        assert_eq!(a[1].term, "L 4 B 8 TOUCHSTONE PHASE 2");
    }

    #[test]
    fn permutations_handle_multi_and_partial_lots() {
        let raw = "PT L 1-3 B 100 MAP OF PORT TAMPA CITY";
        let terms = generate_permutations(&parse(raw), raw, 50);
        assert_eq!(terms[0].term, "PT L 1-3 B 100 MAP OF PORT TAMPA CITY");
        assert_eq!(terms[1].term, "L 1-3 B 100 MAP OF PORT TAMPA CITY");
        assert!(terms.iter().any(|t| t.term == "L 2 B 100 MAP OF PORT TAMPA CITY"));
    }

    #[test]
    fn permutations_drop_generic_tokens() {
        let raw = "LOT 4 BLOCK 8 MAP OF 2005";
        let terms = generate_permutations(&parse(raw), raw, 50);
        assert!(terms.iter().all(|t| !is_generic_term(&t.term)));
        assert!(!terms.iter().any(|t| t.term == "MAP*"));
        assert!(is_generic_term("2005*"));
        assert!(is_generic_term("LOT"));
        assert!(is_generic_term("SECTION*"));
        assert!(!is_generic_term("TUSCANY*"));
    }

    #[test]
    fn unparseable_text_falls_back_to_raw_prefix() {
        let raw = "COMMENCING AT THE NORTHWEST CORNER OF THE SOUTHEAST QUARTER RUN THENCE";
        let terms = generate_permutations(&parse(raw), raw, 10);
        assert_eq!(terms.len(), 1);
        assert!(terms[0].wildcard);
        assert!(terms[0].term.len() <= RAW_PREFIX_CHARS + 1);
        assert!(terms[0].term.starts_with("COMMENCING AT THE"));
    }
}
