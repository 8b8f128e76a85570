//! Chain completeness test and gap detection.
//!
//! A chain is complete when transfer documents alone cover the statutory
//! marketable-title period, or when it runs unbroken from an anchor (the
//! plat, or failing that the earliest document of any kind) to the
//! independently known current owner.

use chrono::NaiveDate;

use crate::chain::ChainSettings;
use crate::models::{ChainGap, DocType, Document, GapType};
use crate::names::NameMatcher;

const DAYS_PER_YEAR: f64 = 365.25;

pub fn years_between(from: NaiveDate, to: NaiveDate) -> f64 {
    (to - from).num_days().max(0) as f64 / DAYS_PER_YEAR
}

/// Grantor and grantee are the same entity (e.g. a deed into one's own
/// trust).
pub fn is_self_transfer(doc: &Document, names: &NameMatcher) -> bool {
    !doc.party_one.is_empty()
        && !doc.party_two.is_empty()
        && names.best_match(&doc.party_one, &doc.party_two).is_confident()
}

/// Dated, non-self transfer documents ordered by recording date, then
/// instrument number.
pub fn ordered_transfers<'a>(documents: &'a [Document], names: &NameMatcher) -> Vec<&'a Document> {
    let mut transfers: Vec<&Document> = documents
        .iter()
        .filter(|d| d.doc_type.is_transfer() && d.recording_date.is_some())
        .filter(|d| !is_self_transfer(d, names))
        .collect();
    transfers.sort_by(|a, b| {
        a.recording_date
            .cmp(&b.recording_date)
            .then_with(|| a.instrument_number.cmp(&b.instrument_number))
    });
    transfers
}

/// Earliest plat document, falling back to the earliest dated document.
pub fn anchor_date(documents: &[Document]) -> Option<NaiveDate> {
    documents
        .iter()
        .filter(|d| d.doc_type == DocType::Plat)
        .filter_map(|d| d.recording_date)
        .min()
        .or_else(|| documents.iter().filter_map(|d| d.recording_date).min())
}

fn links(prev: &Document, next: &Document, names: &NameMatcher) -> bool {
    names.best_match(&prev.party_two, &next.party_one).is_confident()
}

fn owner_matches(last: &Document, owner: &str, names: &NameMatcher) -> bool {
    names.best_match(&last.party_two, &[owner]).is_confident()
}

/// Days from the anchor to the first transfer; negative spans (a plat
/// recorded after the first deed) count as zero.
fn anchor_span(anchor: NaiveDate, first: NaiveDate) -> i64 {
    (first - anchor).num_days().max(0)
}

pub fn is_complete(
    documents: &[Document],
    current_owner: Option<&str>,
    names: &NameMatcher,
    settings: &ChainSettings,
    today: NaiveDate,
) -> bool {
    let transfers = ordered_transfers(documents, names);
    let (Some(first), Some(last)) = (transfers.first(), transfers.last()) else {
        return false;
    };
    let Some(first_date) = first.recording_date else {
        return false;
    };

    if years_between(first_date, today) >= settings.mrta_years {
        return true;
    }

    let Some(anchor) = anchor_date(documents) else {
        return false;
    };
    if anchor_span(anchor, first_date) > settings.anchor_gap_days {
        return false;
    }
    if !transfers.windows(2).all(|w| links(w[0], w[1], names)) {
        return false;
    }
    current_owner.is_some_and(|owner| owner_matches(last, owner, names))
}

/// Every break in the chain, each with the names expected to bridge it.
pub fn find_gaps(
    documents: &[Document],
    current_owner: Option<&str>,
    names: &NameMatcher,
    settings: &ChainSettings,
    today: NaiveDate,
) -> Vec<ChainGap> {
    let transfers = ordered_transfers(documents, names);
    let anchor = anchor_date(documents);
    let owner = current_owner.map(|o| o.trim().to_uppercase()).filter(|o| !o.is_empty());
    let mut gaps = Vec::new();

    let (Some(first), Some(last)) = (transfers.first(), transfers.last()) else {
        gaps.push(ChainGap {
            gap_type: GapType::ToCurrentOwner,
            start_date: anchor,
            end_date: Some(today),
            expected_grantor: None,
            expected_grantee: owner,
            days: anchor.map(|a| (today - a).num_days()),
        });
        return gaps;
    };

    if let (Some(anchor), Some(first_date)) = (anchor, first.recording_date) {
        let span = anchor_span(anchor, first_date);
        if span > settings.anchor_gap_days {
            gaps.push(ChainGap {
                gap_type: GapType::AnchorToFirstDeed,
                start_date: Some(anchor),
                end_date: Some(first_date),
                expected_grantor: None,
                expected_grantee: first.party_one.first().cloned(),
                days: Some(span),
            });
        }
    }

    for pair in transfers.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if links(prev, next, names) {
            continue;
        }
        gaps.push(ChainGap {
            gap_type: GapType::OwnershipGap,
            start_date: prev.recording_date,
            end_date: next.recording_date,
            expected_grantor: prev.party_two.first().cloned(),
            expected_grantee: next.party_one.first().cloned(),
            days: match (prev.recording_date, next.recording_date) {
                (Some(a), Some(b)) => Some((b - a).num_days()),
                _ => None,
            },
        });
    }

    if let Some(owner) = owner {
        if !owner_matches(last, &owner, names) {
            gaps.push(ChainGap {
                gap_type: GapType::ToCurrentOwner,
                start_date: last.recording_date,
                end_date: Some(today),
                expected_grantor: last.party_two.first().cloned(),
                expected_grantee: Some(owner),
                days: last.recording_date.map(|d| (today - d).num_days()),
            });
        }
    }

    gaps
}
