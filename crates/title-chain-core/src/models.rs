//! Core data models used throughout Title Chain.
//!
//! These types represent the search intents, recorded documents, identity
//! clusters and chain-of-title output that flow through the discovery
//! pipeline. Enumerations carry a stable snake_case text form used both for
//! serde and for the SQLite columns.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum from a
/// single table of `Variant => "text"` pairs.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => bail!("unknown {}: '{}'", stringify!($name), other),
                }
            }
        }
    };
}

// ═══════════════════════════════════════════════════════════════════════
// Search intents
// ═══════════════════════════════════════════════════════════════════════

/// The search vector a task uses against the external index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Legal,
    Name,
    Instrument,
    Case,
    BookPage,
    Plat,
}

text_enum!(SearchType {
    Legal => "legal",
    Name => "name",
    Instrument => "instrument",
    Case => "case",
    BookPage => "book_page",
    Plat => "plat",
});

/// How the provider compares the term against its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    Begins,
    Contains,
}

text_enum!(Operator {
    Equals => "equals",
    Begins => "begins",
    Contains => "contains",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RateLimited,
    /// Cancelled as a redundant permutation; never executed.
    Exhausted,
}

text_enum!(TaskStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
    RateLimited => "rate_limited",
    Exhausted => "exhausted",
});

/// A search intent as submitted to the queue, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSearchTask {
    pub property: String,
    pub search_type: SearchType,
    pub term: String,
    pub operator: Operator,
    /// Lower runs sooner.
    pub priority: i32,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Which seed fact, document or gap produced this vector.
    pub provenance: Option<String>,
}

impl NewSearchTask {
    pub fn new(
        property: &str,
        search_type: SearchType,
        term: &str,
        operator: Operator,
        priority: i32,
    ) -> Self {
        Self {
            property: property.to_string(),
            search_type,
            term: term.trim().to_string(),
            operator,
            priority,
            date_from: None,
            date_to: None,
            provenance: None,
        }
    }

    pub fn with_dates(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = Some(provenance.into());
        self
    }
}

/// A persisted search intent. Unique per (property, type, term, operator).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchTask {
    pub id: i64,
    pub property: String,
    pub search_type: SearchType,
    pub term: String,
    pub operator: Operator,
    pub priority: i32,
    pub status: TaskStatus,
    pub attempts: u32,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub provenance: Option<String>,
    pub result_count: Option<u32>,
    pub new_document_count: Option<u32>,
    pub last_error: Option<String>,
    /// Earliest time a rate-limited task may run again.
    pub next_eligible_at: Option<DateTime<Utc>>,
    /// Insertion order; breaks priority ties FIFO.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchTask {
    /// Materialize a queued task from its intent.
    pub fn from_new(id: i64, seq: i64, task: &NewSearchTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            property: task.property.clone(),
            search_type: task.search_type,
            term: task.term.clone(),
            operator: task.operator,
            priority: task.priority,
            status: TaskStatus::Pending,
            attempts: 0,
            date_from: task.date_from,
            date_to: task.date_to,
            provenance: task.provenance.clone(),
            result_count: None,
            new_document_count: None,
            last_error: None,
            next_eligible_at: None,
            seq,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn query(&self) -> SearchQuery {
        SearchQuery {
            search_type: self.search_type,
            term: self.term.clone(),
            operator: self.operator,
            date_from: self.date_from,
            date_to: self.date_to,
        }
    }

    pub fn provenance_label(&self) -> &str {
        self.provenance.as_deref().unwrap_or("unknown")
    }
}

/// What the engine asks the external provider for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(rename = "type")]
    pub search_type: SearchType,
    pub term: String,
    pub operator: Operator,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
}

// ═══════════════════════════════════════════════════════════════════════
// Records and documents
// ═══════════════════════════════════════════════════════════════════════

/// Canonical document classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Deed,
    Mortgage,
    Lien,
    Judgment,
    LisPendens,
    Satisfaction,
    Assignment,
    Plat,
    Other,
}

text_enum!(DocType {
    Deed => "deed",
    Mortgage => "mortgage",
    Lien => "lien",
    Judgment => "judgment",
    LisPendens => "lis_pendens",
    Satisfaction => "satisfaction",
    Assignment => "assignment",
    Plat => "plat",
    Other => "other",
});

impl DocType {
    /// Classify a raw index document-type label.
    ///
    /// Order matters: "SATISFACTION OF MORTGAGE" and "ASSIGNMENT OF
    /// MORTGAGE" must not fall through to `Mortgage`.
    pub fn classify(raw: &str) -> DocType {
        let upper = raw.trim().to_uppercase();
        if let Ok(canonical) = upper.to_lowercase().parse::<DocType>() {
            return canonical;
        }
        let code = upper.trim_matches(|c| c == '(' || c == ')');
        let has = |needle: &str| upper.contains(needle);

        if has("SATISF") || has("RELEASE") || has("DISCHARGE") || code == "SAT" {
            DocType::Satisfaction
        } else if has("ASSIGN") || code == "ASG" {
            DocType::Assignment
        } else if has("LIS PENDENS") || code == "LP" {
            DocType::LisPendens
        } else if has("JUDG") || code == "JUD" {
            DocType::Judgment
        } else if has("LIEN") || code == "LN" {
            DocType::Lien
        } else if has("MORTGAGE") || has("MTG") || code == "MTG" {
            DocType::Mortgage
        } else if has("DEED")
            || has("CERTIFICATE OF TITLE")
            || matches!(code, "D" | "WD" | "QCD" | "TD" | "CT")
        {
            DocType::Deed
        } else if has("PLAT") || code == "PL" {
            DocType::Plat
        } else {
            DocType::Other
        }
    }

    /// Documents that move ownership and build ownership periods.
    pub fn is_transfer(&self) -> bool {
        matches!(self, DocType::Deed)
    }

    /// Documents that attach a claim to an ownership period.
    pub fn is_encumbrance(&self) -> bool {
        matches!(
            self,
            DocType::Mortgage | DocType::Lien | DocType::Judgment | DocType::LisPendens
        )
    }

    /// Paired deed/mortgage instruments are usually recorded back to back;
    /// standalone filings are not.
    pub fn has_adjacent_instruments(&self) -> bool {
        matches!(self, DocType::Deed | DocType::Mortgage)
    }
}

/// One raw result row from the external search provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    #[serde(default)]
    pub instrument_number: Option<String>,
    #[serde(default)]
    pub record_date: Option<NaiveDate>,
    /// Canonical type when the provider already classified the row.
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub raw_doc_type: String,
    #[serde(default)]
    pub party_one: Vec<String>,
    #[serde(default)]
    pub party_two: Vec<String>,
    #[serde(default)]
    pub book: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub legal_description: Option<String>,
    #[serde(default)]
    pub consideration: Option<f64>,
}

impl ProviderRecord {
    /// Dedup key: the instrument number, or the book/page pair for older
    /// records indexed without one.
    pub fn dedup_key(&self) -> Option<String> {
        if let Some(instr) = self.instrument_number.as_deref() {
            let instr = instr.trim();
            if !instr.is_empty() {
                return Some(instr.to_string());
            }
        }
        match (self.book.as_deref(), self.page.as_deref()) {
            (Some(b), Some(p)) if !b.trim().is_empty() && !p.trim().is_empty() => {
                Some(format!("BK{}PG{}", b.trim(), p.trim()))
            }
            _ => None,
        }
    }

    pub fn classify(&self) -> DocType {
        match self.doc_type.as_deref() {
            Some(t) if !t.trim().is_empty() => DocType::classify(t),
            _ => DocType::classify(&self.raw_doc_type),
        }
    }

    pub fn has_legal_text(&self) -> bool {
        self.legal_description
            .as_deref()
            .is_some_and(|l| !l.trim().is_empty())
    }

    /// All party names on the record, grantor role first.
    pub fn parties(&self) -> impl Iterator<Item = &String> {
        self.party_one.iter().chain(self.party_two.iter())
    }
}

/// A recorded instrument accepted into a property's record set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub property: String,
    pub doc_type: DocType,
    pub raw_doc_type: String,
    /// Unique per property; the dedup key across all search vectors.
    pub instrument_number: String,
    pub recording_date: Option<NaiveDate>,
    pub book: Option<String>,
    pub page: Option<String>,
    /// Grantor role.
    pub party_one: Vec<String>,
    /// Grantee role.
    pub party_two: Vec<String>,
    pub legal_description: Option<String>,
    pub consideration: Option<f64>,
    /// The search task that first surfaced this document.
    pub source_task_id: Option<i64>,
}

impl Document {
    /// Normalize a provider row into a document. Returns `None` when the row
    /// has no usable dedup key.
    pub fn from_record(property: &str, record: &ProviderRecord, task_id: Option<i64>) -> Option<Self> {
        let instrument_number = record.dedup_key()?;
        let clean = |names: &[String]| -> Vec<String> {
            names
                .iter()
                .map(|n| n.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|n| !n.is_empty())
                .collect()
        };
        Some(Self {
            property: property.to_string(),
            doc_type: record.classify(),
            raw_doc_type: record.raw_doc_type.trim().to_string(),
            instrument_number,
            recording_date: record.record_date,
            book: record.book.clone(),
            page: record.page.clone(),
            party_one: clean(&record.party_one),
            party_two: clean(&record.party_two),
            legal_description: record
                .legal_description
                .as_ref()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            consideration: record.consideration,
            source_task_id: task_id,
        })
    }

    /// SHA-256 over the fields a re-discovery may change (OCR backfill of
    /// parties, corrected legal text). Used to tell updates from no-ops.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.instrument_number.as_bytes());
        hasher.update(self.doc_type.as_str().as_bytes());
        hasher.update(self.raw_doc_type.as_bytes());
        if let Some(d) = self.recording_date {
            hasher.update(d.to_string().as_bytes());
        }
        for field in [&self.book, &self.page, &self.legal_description] {
            hasher.update([0u8]);
            if let Some(v) = field {
                hasher.update(v.as_bytes());
            }
        }
        for name in self.party_one.iter() {
            hasher.update(b"1:");
            hasher.update(name.as_bytes());
        }
        for name in self.party_two.iter() {
            hasher.update(b"2:");
            hasher.update(name.as_bytes());
        }
        if let Some(c) = self.consideration {
            hasher.update(c.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn grantors(&self) -> String {
        self.party_one.join("; ")
    }

    pub fn grantees(&self) -> String {
        self.party_two.join("; ")
    }

    /// Book/page as a display reference, when both are known.
    pub fn book_page(&self) -> Option<String> {
        match (&self.book, &self.page) {
            (Some(b), Some(p)) => Some(format!("{}/{}", b, p)),
            _ => None,
        }
    }
}

/// Result of writing a document to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

// ═══════════════════════════════════════════════════════════════════════
// Identities
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Individual,
    Trust,
    Llc,
    Bank,
}

text_enum!(EntityType {
    Individual => "individual",
    Trust => "trust",
    Llc => "llc",
    Bank => "bank",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Exact,
    TrustTransfer,
    SpellingVariation,
    NameChange,
}

text_enum!(LinkType {
    Exact => "exact",
    TrustTransfer => "trust_transfer",
    SpellingVariation => "spelling_variation",
    NameChange => "name_change",
});

/// A cluster of party-name strings judged to be one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedIdentity {
    pub id: String,
    pub property: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub link_type: LinkType,
    pub confidence: f64,
    /// Every member name, canonical name first.
    pub members: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Seed facts
// ═══════════════════════════════════════════════════════════════════════

/// How far a legal description's source can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalTier {
    /// Taken from a recorded instrument already tied to the parcel.
    Verified,
    /// From the appraiser/assessor record.
    Primary,
    /// Bulk-imported roll text; often truncated or abbreviated.
    BulkImport,
}

text_enum!(LegalTier {
    Verified => "verified",
    Primary => "primary",
    BulkImport => "bulk_import",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedLegal {
    pub text: String,
    #[serde(default = "default_tier")]
    pub tier: LegalTier,
}

fn default_tier() -> LegalTier {
    LegalTier::Primary
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedParty {
    pub name: String,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookPage {
    pub book: String,
    pub page: String,
}

impl BookPage {
    pub fn term(&self) -> String {
        format!("{}/{}", self.book.trim(), self.page.trim())
    }
}

/// Everything known about a property before discovery starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedFacts {
    pub property: String,
    #[serde(default)]
    pub plat_book_page: Option<BookPage>,
    #[serde(default)]
    pub sale_book_page: Option<BookPage>,
    #[serde(default)]
    pub sale_instrument: Option<String>,
    #[serde(default)]
    pub legal_descriptions: Vec<SeedLegal>,
    #[serde(default)]
    pub case_number: Option<String>,
    #[serde(default)]
    pub parties: Vec<SeedParty>,
    #[serde(default)]
    pub current_owner: Option<String>,
}

impl SeedFacts {
    /// The most trusted legal description, if any.
    pub fn reference_legal(&self) -> Option<&str> {
        self.legal_descriptions
            .iter()
            .filter(|l| !l.text.trim().is_empty())
            .min_by_key(|l| l.tier)
            .map(|l| l.text.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Chain of title
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Root,
    Linked,
    Gap,
}

text_enum!(LinkStatus {
    Root => "root",
    Linked => "linked",
    Gap => "gap",
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnershipPeriod {
    pub owner: String,
    pub acquired_from: String,
    pub acquisition_date: NaiveDate,
    /// `None` while the period is open (current owner).
    pub disposition_date: Option<NaiveDate>,
    pub acquisition_instrument: String,
    pub acquisition_doc_type: String,
    pub acquisition_price: Option<f64>,
    pub link_status: LinkStatus,
    pub confidence: f64,
    pub years_covered: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Encumbrance {
    pub encumbrance_type: DocType,
    pub creditor: String,
    pub debtor: String,
    pub amount: Option<f64>,
    pub instrument_number: String,
    pub book_page: Option<String>,
    pub recording_date: Option<NaiveDate>,
    /// Index into the chain's periods; `None` if recorded before the chain.
    pub period_index: Option<usize>,
    /// Assignees of record, oldest first.
    pub assignees: Vec<String>,
    pub is_satisfied: bool,
    pub satisfaction_date: Option<NaiveDate>,
    pub satisfaction_instrument: Option<String>,
    /// Set downstream by lien-survival analysis; never by the chain builder.
    pub survival_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapType {
    AnchorToFirstDeed,
    OwnershipGap,
    ToCurrentOwner,
}

text_enum!(GapType {
    AnchorToFirstDeed => "anchor_to_first_deed",
    OwnershipGap => "ownership_gap",
    ToCurrentOwner => "to_current_owner",
});

/// A break in the chain, with the two names expected to bridge it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainGap {
    pub gap_type: GapType,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub expected_grantor: Option<String>,
    pub expected_grantee: Option<String>,
    pub days: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_satisfaction_before_mortgage() {
        assert_eq!(DocType::classify("SATISFACTION OF MORTGAGE"), DocType::Satisfaction);
        assert_eq!(DocType::classify("ASSIGNMENT OF MORTGAGE"), DocType::Assignment);
        assert_eq!(DocType::classify("MORTGAGE"), DocType::Mortgage);
        assert_eq!(DocType::classify("RELEASE OF LIEN"), DocType::Satisfaction);
    }

    #[test]
    fn classify_index_codes() {
        assert_eq!(DocType::classify("(D)"), DocType::Deed);
        assert_eq!(DocType::classify("WD"), DocType::Deed);
        assert_eq!(DocType::classify("(LP)"), DocType::LisPendens);
        assert_eq!(DocType::classify("CERTIFICATE OF TITLE"), DocType::Deed);
        assert_eq!(DocType::classify("lis_pendens"), DocType::LisPendens);
        assert_eq!(DocType::classify("NOTICE OF COMMENCEMENT"), DocType::Other);
    }

    #[test]
    fn adjacent_instruments_only_for_paired_types() {
        assert!(DocType::Deed.has_adjacent_instruments());
        assert!(DocType::Mortgage.has_adjacent_instruments());
        assert!(!DocType::Judgment.has_adjacent_instruments());
        assert!(!DocType::Lien.has_adjacent_instruments());
        assert!(!DocType::LisPendens.has_adjacent_instruments());
    }

    #[test]
    fn dedup_key_falls_back_to_book_page() {
        let rec = ProviderRecord {
            book: Some("1234".into()),
            page: Some("56".into()),
            ..Default::default()
        };
        assert_eq!(rec.dedup_key().as_deref(), Some("BK1234PG56"));
        assert_eq!(ProviderRecord::default().dedup_key(), None);
    }

    #[test]
    fn text_enums_round_trip_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::RateLimited,
            TaskStatus::Exhausted,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<SearchType>().is_err());
    }

    #[test]
    fn content_hash_changes_when_parties_backfilled() {
        let rec = ProviderRecord {
            instrument_number: Some("2019000001".into()),
            raw_doc_type: "DEED".into(),
            ..Default::default()
        };
        let bare = Document::from_record("F1", &rec, None).unwrap();
        let mut filled = bare.clone();
        filled.party_two.push("SMITH JOHN".into());
        assert_ne!(bare.content_hash(), filled.content_hash());
    }

    #[test]
    fn reference_legal_prefers_most_trusted_tier() {
        let seed = SeedFacts {
            property: "F1".into(),
            legal_descriptions: vec![
                SeedLegal { text: "BULK TEXT".into(), tier: LegalTier::BulkImport },
                SeedLegal { text: "VERIFIED TEXT".into(), tier: LegalTier::Verified },
            ],
            ..Default::default()
        };
        assert_eq!(seed.reference_legal(), Some("VERIFIED TEXT"));
    }
}
