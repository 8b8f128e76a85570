//! Instrument-number and book/page references embedded in free text.
//!
//! Legal descriptions and document remarks often cite the instrument they
//! correct, assign or release ("CLK #2019437669", "OR BK 1234 PG 567").
//! Each citation is a new search vector and, for satisfactions and
//! assignments, the most reliable link to the encumbrance they touch.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::BookPage;

static INSTRUMENT_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:\b(?:CLK|CLERK|INSTR|INST|INSTRUMENT|DOC|DOCUMENT|CFN|FILE)\b\.?\s*(?:NO\.?|NUMBER|NUM)?\s*#?\s*|#\s*)(\d{6,12})\b",
    )
    .unwrap()
});

static BOOK_PAGE_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:(?:OR|O\.\s?R\.|OFFICIAL\s+RECORDS?)\s*)?(?:BOOK|BK)\.?\s*(\d{1,6})\s*,?\s*(?:PAGES?|PGS?|P)\.?\s*(\d{1,6})\b",
    )
    .unwrap()
});

/// Instrument numbers cited in `text`, in order of appearance, deduplicated.
pub fn instrument_references(text: &str) -> Vec<String> {
    let upper = text.to_uppercase();
    let mut out: Vec<String> = Vec::new();
    for caps in INSTRUMENT_REF_RE.captures_iter(&upper) {
        let number = caps[1].to_string();
        if !out.contains(&number) {
            out.push(number);
        }
    }
    out
}

/// Official-records book/page citations in `text`. Plat book citations are
/// skipped; they identify the subdivision, not an instrument.
pub fn book_page_references(text: &str) -> Vec<BookPage> {
    let upper = text.to_uppercase();
    let mut out: Vec<BookPage> = Vec::new();
    for caps in BOOK_PAGE_REF_RE.captures_iter(&upper) {
        let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
        if upper[..start].trim_end().ends_with("PLAT") {
            continue;
        }
        let bp = BookPage {
            book: caps[1].trim_start_matches('0').to_string(),
            page: caps[2].trim_start_matches('0').to_string(),
        };
        if !bp.book.is_empty() && !bp.page.is_empty() && !out.contains(&bp) {
            out.push(bp);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_clerk_and_hash_references() {
        let refs = instrument_references("CORRECTIVE DEED RE CLK #2019437669; SEE ALSO INSTR NO. 2018001234 and #2019437669");
        assert_eq!(refs, vec!["2019437669", "2018001234"]);
    }

    #[test]
    fn ignores_short_numbers() {
        assert!(instrument_references("LOT 4 #12").is_empty());
    }

    #[test]
    fn finds_official_records_book_page() {
        let refs = book_page_references("MTG RECORDED IN OR BK 1234 PG 567");
        assert_eq!(
            refs,
            vec![BookPage {
                book: "1234".into(),
                page: "567".into()
            }]
        );
    }

    #[test]
    fn skips_plat_book_citations() {
        assert!(book_page_references("AS RECORDED IN PLAT BOOK 82 PAGE 21").is_empty());
    }
}
