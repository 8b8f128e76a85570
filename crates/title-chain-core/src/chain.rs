//! Chain builder: accepted documents → ownership timeline.
//!
//! Transfers become [`OwnershipPeriod`]s linked by party-name matching;
//! mortgages, liens, judgments and lis pendens become [`Encumbrance`]s
//! attached to the period whose `[acquisition, disposition)` interval
//! contains their recording date. Assignments and satisfactions update the
//! encumbrance they cite, or failing a citation, the nearest earlier open
//! encumbrance held by the same creditor.

use chrono::NaiveDate;
use serde::Serialize;

use crate::completeness::{self, years_between};
use crate::models::{
    ChainGap, DocType, Document, Encumbrance, LinkStatus, LinkType, OwnershipPeriod,
};
use crate::names::NameMatcher;
use crate::refs;

/// Confidence multiplier for a period whose predecessor does not match.
const GAP_CONFIDENCE_FACTOR: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct ChainSettings {
    /// Marketable-title threshold in years.
    pub mrta_years: f64,
    /// Maximum days between the anchor and the first transfer.
    pub anchor_gap_days: i64,
    /// Ownership shorter than this is flagged.
    pub short_period_days: i64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            mrta_years: 30.0,
            anchor_gap_days: 730,
            short_period_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainResult {
    pub property: String,
    pub periods: Vec<OwnershipPeriod>,
    pub encumbrances: Vec<Encumbrance>,
    pub total_years: f64,
    pub is_complete: bool,
    pub gaps: Vec<ChainGap>,
    pub issues: Vec<String>,
}

impl ChainResult {
    pub fn unsatisfied_count(&self) -> usize {
        self.encumbrances.iter().filter(|e| !e.is_satisfied).count()
    }

    pub fn link_gap_count(&self) -> usize {
        self.periods
            .iter()
            .filter(|p| p.link_status == LinkStatus::Gap)
            .count()
    }
}

/// Build the chain for one property.
pub fn build(
    property: &str,
    documents: &[Document],
    current_owner: Option<&str>,
    names: &NameMatcher,
    settings: &ChainSettings,
    today: NaiveDate,
) -> ChainResult {
    let mut issues: Vec<String> = Vec::new();

    let undated = documents
        .iter()
        .filter(|d| d.doc_type.is_transfer() && d.recording_date.is_none())
        .count();
    if undated > 0 {
        issues.push(format!("{} transfer document(s) without a recording date", undated));
    }

    let transfers = completeness::ordered_transfers(documents, names);
    let periods = build_periods(&transfers, names, today, &mut issues);

    let mut ordered: Vec<&Document> = documents.iter().collect();
    ordered.sort_by(|a, b| {
        a.recording_date
            .cmp(&b.recording_date)
            .then_with(|| a.instrument_number.cmp(&b.instrument_number))
    });

    let mut encumbrances: Vec<Encumbrance> = ordered
        .iter()
        .filter(|d| d.doc_type.is_encumbrance())
        .map(|d| new_encumbrance(d, &periods))
        .collect();

    for doc in ordered.iter().filter(|d| d.doc_type == DocType::Assignment) {
        if let Some(i) = find_target(&encumbrances, doc, names, false) {
            for assignee in &doc.party_two {
                if !encumbrances[i].assignees.contains(assignee) {
                    encumbrances[i].assignees.push(assignee.clone());
                }
            }
        }
    }

    for doc in ordered.iter().filter(|d| d.doc_type == DocType::Satisfaction) {
        match find_target(&encumbrances, doc, names, true) {
            Some(i) => {
                let e = &mut encumbrances[i];
                e.is_satisfied = true;
                e.satisfaction_date = doc.recording_date;
                e.satisfaction_instrument = Some(doc.instrument_number.clone());
            }
            None => issues.push(format!(
                "satisfaction {} matches no open encumbrance",
                doc.instrument_number
            )),
        }
    }

    for e in encumbrances.iter().filter(|e| e.period_index.is_none()) {
        issues.push(format!(
            "{} {} recorded outside any ownership period",
            e.encumbrance_type, e.instrument_number
        ));
    }

    let total_years = periods
        .first()
        .map(|p| years_between(p.acquisition_date, today))
        .unwrap_or(0.0);
    let is_complete = completeness::is_complete(documents, current_owner, names, settings, today);
    let gaps = completeness::find_gaps(documents, current_owner, names, settings, today);

    let gap_links = periods.iter().filter(|p| p.link_status == LinkStatus::Gap).count();
    if gap_links > 0 {
        issues.push(format!("{} gap(s) in chain of title", gap_links));
    }
    let unsatisfied = encumbrances.iter().filter(|e| !e.is_satisfied).count();
    if unsatisfied > 0 {
        issues.push(format!("{} unsatisfied encumbrance(s)", unsatisfied));
    }
    for p in &periods {
        if let Some(end) = p.disposition_date {
            let days = (end - p.acquisition_date).num_days();
            if days < settings.short_period_days {
                issues.push(format!("short ownership period: {} held {} days", p.owner, days));
            }
        }
    }

    ChainResult {
        property: property.to_string(),
        periods,
        encumbrances,
        total_years,
        is_complete,
        gaps,
        issues,
    }
}

fn build_periods(
    transfers: &[&Document],
    names: &NameMatcher,
    today: NaiveDate,
    issues: &mut Vec<String>,
) -> Vec<OwnershipPeriod> {
    let mut periods: Vec<OwnershipPeriod> = Vec::with_capacity(transfers.len());
    for (i, doc) in transfers.iter().enumerate() {
        let Some(acquired) = doc.recording_date else {
            continue;
        };
        let disposition = transfers.get(i + 1).and_then(|next| next.recording_date);

        let (link_status, confidence) = match i.checked_sub(1).map(|p| transfers[p]) {
            None => (LinkStatus::Root, 1.0),
            Some(prev) => {
                let m = names.best_match(&prev.party_two, &doc.party_one);
                if m.is_confident() {
                    (LinkStatus::Linked, m.confidence)
                } else {
                    if m.link_type == Some(LinkType::NameChange) {
                        issues.push(format!(
                            "possible name change: {} -> {}",
                            prev.grantees(),
                            doc.grantors()
                        ));
                    }
                    (LinkStatus::Gap, m.confidence * GAP_CONFIDENCE_FACTOR)
                }
            }
        };

        periods.push(OwnershipPeriod {
            owner: doc.grantees(),
            acquired_from: doc.grantors(),
            acquisition_date: acquired,
            disposition_date: disposition,
            acquisition_instrument: doc.instrument_number.clone(),
            acquisition_doc_type: if doc.raw_doc_type.is_empty() {
                doc.doc_type.as_str().to_uppercase()
            } else {
                doc.raw_doc_type.clone()
            },
            acquisition_price: doc.consideration,
            link_status,
            confidence,
            years_covered: years_between(acquired, disposition.unwrap_or(today)),
        });
    }
    periods
}

fn new_encumbrance(doc: &Document, periods: &[OwnershipPeriod]) -> Encumbrance {
    Encumbrance {
        encumbrance_type: doc.doc_type,
        creditor: doc.grantees(),
        debtor: doc.grantors(),
        amount: doc.consideration,
        instrument_number: doc.instrument_number.clone(),
        book_page: doc.book_page(),
        recording_date: doc.recording_date,
        period_index: doc.recording_date.and_then(|d| containing_period(periods, d)),
        assignees: Vec::new(),
        is_satisfied: false,
        satisfaction_date: None,
        satisfaction_instrument: None,
        survival_status: None,
    }
}

/// The period whose `[acquisition, disposition)` interval holds `date`;
/// the last period is open-ended.
fn containing_period(periods: &[OwnershipPeriod], date: NaiveDate) -> Option<usize> {
    periods.iter().position(|p| {
        date >= p.acquisition_date && p.disposition_date.is_none_or(|end| date < end)
    })
}

/// Encumbrance an assignment or satisfaction refers to: an explicit
/// instrument or book/page citation first, then the nearest earlier
/// encumbrance whose creditor or an assignee matches one of the document's
/// parties.
fn find_target(
    encumbrances: &[Encumbrance],
    doc: &Document,
    names: &NameMatcher,
    open_only: bool,
) -> Option<usize> {
    let eligible = |e: &Encumbrance| !(open_only && e.is_satisfied);

    if let Some(text) = doc.legal_description.as_deref() {
        for instrument in refs::instrument_references(text) {
            if let Some(i) = encumbrances
                .iter()
                .position(|e| eligible(e) && e.instrument_number == instrument)
            {
                return Some(i);
            }
        }
        for bp in refs::book_page_references(text) {
            let cited = format!("{}/{}", bp.book, bp.page);
            if let Some(i) = encumbrances
                .iter()
                .position(|e| eligible(e) && e.book_page.as_deref() == Some(cited.as_str()))
            {
                return Some(i);
            }
        }
    }

    let parties: Vec<&String> = doc.party_one.iter().chain(doc.party_two.iter()).collect();
    encumbrances
        .iter()
        .enumerate()
        .filter(|(_, e)| eligible(e))
        .filter(|(_, e)| match (e.recording_date, doc.recording_date) {
            (Some(rec), Some(on)) => rec <= on,
            _ => true,
        })
        .filter(|(_, e)| {
            let mut holders: Vec<&str> = e.creditor.split("; ").collect();
            holders.extend(e.assignees.iter().map(String::as_str));
            names.best_match(&parties, &holders).is_confident()
        })
        .max_by_key(|(i, e)| (e.recording_date, *i))
        .map(|(i, _)| i)
}
