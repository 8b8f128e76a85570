//! Iterative title discovery.
//!
//! One run per property: seed the search queue from known facts, then pull
//! one task at a time, execute it against the provider, filter the results
//! down to records that belong to this parcel, store them and mine each new
//! document for further search vectors. The run ends when the chain is
//! complete, a budget is spent or the queue runs dry; an incomplete run gets
//! a bounded number of gap passes that queue targeted name searches for the
//! missing links.
//!
//! Within a property everything is sequential: each result must be visible
//! to the queue before the next vector is chosen. Different properties run
//! concurrently through [`discover_many`], sharing the store and the
//! provider gate.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use title_chain_core::chain::{self, ChainSettings};
use title_chain_core::completeness;
use title_chain_core::legal::{self, ParsedLegalDescription};
use title_chain_core::models::{
    ChainGap, DocType, Document, LegalTier, NewSearchTask, Operator, ProviderRecord,
    SearchTask, SearchType, SeedFacts, TaskStatus, UpsertOutcome,
};
use title_chain_core::names::NameMatcher;
use title_chain_core::queue::{priority, QueueSettings, SearchQueue};
use title_chain_core::refs;
use title_chain_core::store::Store;

use crate::config::Config;
use crate::gate::ProviderGate;
use crate::provider::SearchProvider;

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub max_iterations: usize,
    pub max_documents: usize,
    pub gap_passes: usize,
    /// Extra iterations granted per gap pass.
    pub gap_iterations: usize,
    /// N in the `instrument ± N` adjacent searches.
    pub adjacent_span: u64,
    pub legal_threshold: f64,
    pub max_permutations: usize,
    pub chain: ChainSettings,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_documents: 250,
            gap_passes: 2,
            gap_iterations: 15,
            adjacent_span: 2,
            legal_threshold: 0.80,
            max_permutations: 12,
            chain: ChainSettings::default(),
        }
    }
}

impl DiscoverySettings {
    pub fn from_config(config: &Config) -> Self {
        let d = &config.discovery;
        Self {
            max_iterations: d.max_iterations,
            max_documents: d.max_documents,
            gap_passes: d.gap_passes,
            gap_iterations: d.gap_iterations,
            adjacent_span: d.adjacent_span,
            legal_threshold: d.legal_threshold,
            max_permutations: d.max_permutations,
            chain: config.chain_settings(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppedReason {
    Complete,
    Exhausted,
    MaxIterations,
    MaxDocuments,
    Error,
}

impl StoppedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoppedReason::Complete => "complete",
            StoppedReason::Exhausted => "exhausted",
            StoppedReason::MaxIterations => "max_iterations",
            StoppedReason::MaxDocuments => "max_documents",
            StoppedReason::Error => "error",
        }
    }
}

impl fmt::Display for StoppedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    pub property: String,
    pub iterations: usize,
    pub documents_found: usize,
    pub chain_years: f64,
    pub is_complete: bool,
    pub stopped_reason: StoppedReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub gaps: Vec<ChainGap>,
    pub issues: Vec<String>,
}

impl DiscoveryResult {
    fn failed(property: &str, message: String) -> Self {
        Self {
            property: property.to_string(),
            iterations: 0,
            documents_found: 0,
            chain_years: 0.0,
            is_complete: false,
            stopped_reason: StoppedReason::Error,
            error: Some(message),
            gaps: Vec::new(),
            issues: Vec::new(),
        }
    }
}

/// What the identity filter knows about the property.
struct RunState {
    reference: Option<ParsedLegalDescription>,
    known_parties: Vec<String>,
}

impl RunState {
    fn new(seed: &SeedFacts, names: &NameMatcher) -> Self {
        let reference = seed
            .reference_legal()
            .map(legal::parse)
            .filter(|p| !p.is_empty());
        let mut state = Self {
            reference,
            known_parties: Vec::new(),
        };
        let seeded = seed
            .parties
            .iter()
            .map(|p| p.name.as_str())
            .chain(seed.current_owner.as_deref());
        for name in seeded {
            state.know(name, names);
        }
        state
    }

    fn know(&mut self, name: &str, names: &NameMatcher) {
        let name = name.trim().to_uppercase();
        if !names.is_generic(&name) && !self.known_parties.contains(&name) {
            self.known_parties.push(name);
        }
    }

    fn learn(&mut self, doc: &Document, names: &NameMatcher) {
        for name in doc.party_one.iter().chain(doc.party_two.iter()) {
            self.know(name, names);
        }
    }

    fn knows_any<'a>(&self, mut parties: impl Iterator<Item = &'a String>, names: &NameMatcher) -> bool {
        parties.any(|p| {
            !names.is_generic(p) && self.known_parties.iter().any(|k| names.is_same_party(p, k))
        })
    }
}

/// `instrument ± 1..=span`, keeping the zero-padded width. Non-numeric
/// instrument numbers have no neighbours.
pub fn adjacent_instruments(instrument: &str, span: u64) -> Vec<String> {
    let trimmed = instrument.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Vec::new();
    }
    let Ok(number) = trimmed.parse::<u64>() else {
        return Vec::new();
    };
    let width = trimmed.len();
    let mut out = Vec::new();
    for d in 1..=span {
        if let Some(next) = number.checked_add(d) {
            out.push(format!("{:0width$}", next, width = width));
        }
        if let Some(prev) = number.checked_sub(d) {
            out.push(format!("{:0width$}", prev, width = width));
        }
    }
    out
}

pub struct DiscoveryEngine {
    store: Arc<dyn Store>,
    queue: SearchQueue,
    provider: Arc<dyn SearchProvider>,
    gate: Arc<dyn ProviderGate>,
    names: NameMatcher,
    settings: DiscoverySettings,
    today: Option<NaiveDate>,
}

impl DiscoveryEngine {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn SearchProvider>,
        gate: Arc<dyn ProviderGate>,
        names: NameMatcher,
        queue_settings: QueueSettings,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            queue: SearchQueue::new(store.clone(), queue_settings),
            store,
            provider,
            gate,
            names,
            settings,
            today: None,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn Store>,
        provider: Arc<dyn SearchProvider>,
        gate: Arc<dyn ProviderGate>,
    ) -> Self {
        Self::new(
            store,
            provider,
            gate,
            config.name_matcher(),
            config.queue_settings(),
            DiscoverySettings::from_config(config),
        )
    }

    /// Pin the date used for coverage math.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn queue(&self) -> &SearchQueue {
        &self.queue
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    pub async fn run(&self, seed: &SeedFacts) -> Result<DiscoveryResult> {
        let property = seed.property.as_str();
        let current_owner = seed.current_owner.as_deref();

        let mut state = RunState::new(seed, &self.names);
        for doc in self.store.documents_for_property(property).await? {
            state.learn(&doc, &self.names);
        }

        let requeued = self.queue.requeue_interrupted(property, Utc::now()).await?;
        if requeued > 0 {
            info!(property, requeued, "requeued searches left in progress by an earlier run");
        }
        let seeded = self.seed_queue(seed).await?;
        info!(property, seeded, "discovery started");

        let mut iterations = 0usize;
        let mut budget = self.settings.max_iterations;
        let mut passes = 0usize;
        let stopped_reason = loop {
            let reason = self
                .drive(property, current_owner, &mut state, &mut iterations, budget)
                .await?;
            if matches!(reason, StoppedReason::Complete | StoppedReason::MaxDocuments)
                || passes >= self.settings.gap_passes
            {
                break reason;
            }
            passes += 1;
            let queued = self.seed_gaps(property, current_owner).await?;
            if queued == 0 {
                break reason;
            }
            info!(property, pass = passes, queued, "gap pass queued name searches");
            budget = iterations + self.settings.gap_iterations;
        };

        let documents = self.store.documents_for_property(property).await?;
        self.cluster_identities(seed, &documents).await?;

        let chain = chain::build(
            property,
            &documents,
            current_owner,
            &self.names,
            &self.settings.chain,
            self.today(),
        );

        info!(
            property,
            iterations,
            documents = documents.len(),
            years = chain.total_years,
            complete = chain.is_complete,
            stopped = %stopped_reason,
            "discovery finished"
        );

        Ok(DiscoveryResult {
            property: property.to_string(),
            iterations,
            documents_found: documents.len(),
            chain_years: chain.total_years,
            is_complete: chain.is_complete,
            stopped_reason,
            error: None,
            gaps: chain.gaps,
            issues: chain.issues,
        })
    }

    /// Run tasks until a stop condition holds.
    async fn drive(
        &self,
        property: &str,
        current_owner: Option<&str>,
        state: &mut RunState,
        iterations: &mut usize,
        budget: usize,
    ) -> Result<StoppedReason> {
        loop {
            let documents = self.store.documents_for_property(property).await?;
            if completeness::is_complete(
                &documents,
                current_owner,
                &self.names,
                &self.settings.chain,
                self.today(),
            ) {
                return Ok(StoppedReason::Complete);
            }
            if documents.len() >= self.settings.max_documents {
                return Ok(StoppedReason::MaxDocuments);
            }
            if *iterations >= budget {
                return Ok(StoppedReason::MaxIterations);
            }

            let Some(task) = self.queue.next_ready(property, Utc::now()).await? else {
                match self.queue.earliest_backoff(property).await? {
                    Some(at) => {
                        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        debug!(property, wait_ms = wait.as_millis() as u64, "waiting for backoff");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    None => return Ok(StoppedReason::Exhausted),
                }
            };

            *iterations += 1;
            self.execute(property, state, task).await?;
        }
    }

    async fn execute(&self, property: &str, state: &mut RunState, mut task: SearchTask) -> Result<()> {
        self.queue.mark_in_progress(&mut task, Utc::now()).await?;
        let outcome = self.settle(property, state, &mut task).await;
        if let Err(e) = &outcome {
            if task.status == TaskStatus::InProgress {
                warn!(property, task_id = task.id, error = %e, "search interrupted; requeueing");
                if let Err(revert) = self.queue.mark_pending(&mut task, Utc::now()).await {
                    warn!(property, task_id = task.id, error = %revert, "could not requeue search");
                }
            }
        }
        outcome
    }

    /// Run one in-progress task to a terminal or backoff state.
    async fn settle(&self, property: &str, state: &mut RunState, task: &mut SearchTask) -> Result<()> {
        let outcome = {
            let _permit = self.gate.acquire().await?;
            self.provider.search(&task.query()).await
        };

        let records = match outcome {
            Ok(records) => records,
            Err(err) if err.is_transient() => {
                let status = self
                    .queue
                    .mark_rate_limited(task, &err.to_string(), Utc::now())
                    .await?;
                if status == TaskStatus::Failed {
                    warn!(
                        property,
                        task_id = task.id,
                        provenance = task.provenance_label(),
                        attempts = task.attempts,
                        error = %err,
                        "search abandoned after repeated provider errors"
                    );
                } else {
                    debug!(property, task_id = task.id, error = %err, "search rate limited");
                }
                return Ok(());
            }
            Err(err) => {
                warn!(
                    property,
                    task_id = task.id,
                    search_type = %task.search_type,
                    term = %task.term,
                    provenance = task.provenance_label(),
                    error = %err,
                    "search failed"
                );
                self.queue.mark_failed(task, &err.to_string(), Utc::now()).await?;
                return Ok(());
            }
        };

        let mut touched: Vec<Document> = Vec::new();
        let mut inserted = 0u32;
        let mut rejected = 0usize;
        for record in &records {
            if !self.belongs(record, state) {
                rejected += 1;
                continue;
            }
            let Some(doc) = Document::from_record(property, record, Some(task.id)) else {
                rejected += 1;
                continue;
            };
            match self.store.upsert_document(&doc).await? {
                UpsertOutcome::Inserted => {
                    inserted += 1;
                    state.learn(&doc, &self.names);
                    touched.push(doc);
                }
                UpsertOutcome::Updated => {
                    state.learn(&doc, &self.names);
                    touched.push(doc);
                }
                UpsertOutcome::Unchanged => {}
            }
        }
        if rejected > 0 {
            debug!(property, task_id = task.id, rejected, "identity filter dropped records");
        }

        self.queue
            .mark_completed(task, records.len() as u32, inserted, Utc::now())
            .await?;
        info!(
            property,
            task_id = task.id,
            search_type = %task.search_type,
            term = %task.term,
            results = records.len(),
            new_documents = inserted,
            "search completed"
        );

        if inserted > 0 && task.search_type == SearchType::Legal {
            let cancelled = self
                .queue
                .cancel_pending(property, SearchType::Legal, Utc::now())
                .await?;
            if cancelled > 0 {
                debug!(property, cancelled, "cancelled redundant legal permutations");
            }
        }

        for doc in &touched {
            self.extract_vectors(doc).await?;
        }
        Ok(())
    }

    /// Property-identity filter.
    ///
    /// A record with legal text is judged on that text alone whenever the
    /// property has a reference legal description:
    ///
    /// | reference  | record     | accepted when                           |
    /// |------------|------------|-----------------------------------------|
    /// | lot/block  | lot/block  | lots and block agree, subdivision fuzzy |
    /// | lot/block  | neither    | the record is the plat and matches      |
    /// | neither    | lot/block  | never                                   |
    /// | neither    | neither    | unit/STR/subdivision match              |
    ///
    /// Only a record without legal text (or a property without a reference)
    /// falls back to a party already known for this property.
    fn belongs(&self, record: &ProviderRecord, state: &RunState) -> bool {
        if let (true, Some(reference)) = (record.has_legal_text(), state.reference.as_ref()) {
            let parsed = legal::parse(record.legal_description.as_deref().unwrap_or_default());
            let m = legal::match_legal(reference, &parsed, self.settings.legal_threshold);
            return match (reference.has_lot_or_block(), parsed.has_lot_or_block()) {
                (true, true) => m.is_match && m.lot_block_agreed,
                (true, false) => record.classify() == DocType::Plat && m.is_match,
                (false, true) => false,
                (false, false) => m.is_match,
            };
        }
        state.knows_any(record.parties(), &self.names)
    }

    /// Queue the seed facts, exact lookups first. Returns the number of
    /// tasks accepted.
    async fn seed_queue(&self, seed: &SeedFacts) -> Result<usize> {
        let property = seed.property.as_str();
        let now = Utc::now();
        let mut accepted = 0usize;

        let mut exact: Vec<NewSearchTask> = Vec::new();
        if let Some(bp) = &seed.plat_book_page {
            exact.push(
                NewSearchTask::new(property, SearchType::Plat, &bp.term(), Operator::Equals, priority::EXACT_LOOKUP)
                    .with_provenance("seed plat book/page"),
            );
        }
        if let Some(bp) = &seed.sale_book_page {
            exact.push(
                NewSearchTask::new(property, SearchType::BookPage, &bp.term(), Operator::Equals, priority::EXACT_LOOKUP)
                    .with_provenance("seed sale book/page"),
            );
        }
        if let Some(instrument) = &seed.sale_instrument {
            exact.push(
                NewSearchTask::new(property, SearchType::Instrument, instrument, Operator::Equals, priority::EXACT_LOOKUP)
                    .with_provenance("seed sale instrument"),
            );
        }
        if let Some(case) = &seed.case_number {
            exact.push(
                NewSearchTask::new(property, SearchType::Case, case, Operator::Equals, priority::EXACT_LOOKUP)
                    .with_provenance("seed case number"),
            );
        }
        for task in exact {
            if self.queue.enqueue(task, now).await?.is_accepted() {
                accepted += 1;
            }
        }

        let mut legals: Vec<_> = seed.legal_descriptions.iter().collect();
        legals.sort_by_key(|l| l.tier);
        for legal_desc in legals {
            let base = match legal_desc.tier {
                LegalTier::Verified | LegalTier::Primary => priority::TRUSTED_LEGAL,
                LegalTier::BulkImport => priority::BULK_LEGAL,
            };
            let outcomes = self
                .queue
                .enqueue_legal_description(
                    property,
                    &legal_desc.text,
                    base,
                    self.settings.max_permutations,
                    &format!("seed legal ({})", legal_desc.tier),
                    now,
                )
                .await?;
            accepted += outcomes.iter().filter(|o| o.is_accepted()).count();
        }

        for party in &seed.parties {
            let outcome = self
                .queue
                .enqueue_name(
                    &self.names,
                    property,
                    &party.name,
                    Operator::Begins,
                    priority::SEED_NAME,
                    party.date_from,
                    party.date_to,
                    "seed party",
                    now,
                )
                .await?;
            if outcome.is_accepted() {
                accepted += 1;
            }
        }
        if let Some(owner) = &seed.current_owner {
            let outcome = self
                .queue
                .enqueue_name(
                    &self.names,
                    property,
                    owner,
                    Operator::Begins,
                    priority::SEED_NAME,
                    None,
                    None,
                    "seed current owner",
                    now,
                )
                .await?;
            if outcome.is_accepted() {
                accepted += 1;
            }
        }

        Ok(accepted)
    }

    /// Mine one accepted document for new search vectors.
    async fn extract_vectors(&self, doc: &Document) -> Result<usize> {
        let property = doc.property.as_str();
        let instrument = doc.instrument_number.as_str();
        let now = Utc::now();
        let mut accepted = 0usize;

        if let Some(text) = doc.legal_description.as_deref() {
            let outcomes = self
                .queue
                .enqueue_legal_description(
                    property,
                    text,
                    priority::DOCUMENT_LEGAL,
                    self.settings.max_permutations,
                    &format!("document {} legal", instrument),
                    now,
                )
                .await?;
            accepted += outcomes.iter().filter(|o| o.is_accepted()).count();

            for cited in refs::instrument_references(text) {
                if cited == instrument {
                    continue;
                }
                let task = NewSearchTask::new(
                    property,
                    SearchType::Instrument,
                    &cited,
                    Operator::Equals,
                    priority::TEXT_REFERENCE,
                )
                .with_provenance(format!("document {} cites instrument", instrument));
                if self.queue.enqueue(task, now).await?.is_accepted() {
                    accepted += 1;
                }
            }

            let own = doc.book_page();
            for cited in refs::book_page_references(text) {
                let term = cited.term();
                if own.as_deref() == Some(term.as_str()) {
                    continue;
                }
                let task = NewSearchTask::new(
                    property,
                    SearchType::BookPage,
                    &term,
                    Operator::Equals,
                    priority::TEXT_REFERENCE,
                )
                .with_provenance(format!("document {} cites book/page", instrument));
                if self.queue.enqueue(task, now).await?.is_accepted() {
                    accepted += 1;
                }
            }
        }

        // Grantors owned before this document; grantees after it.
        for name in &doc.party_one {
            let outcome = self
                .queue
                .enqueue_name(
                    &self.names,
                    property,
                    name,
                    Operator::Begins,
                    priority::DOCUMENT_NAME,
                    None,
                    doc.recording_date,
                    &format!("document {} grantor", instrument),
                    now,
                )
                .await?;
            if outcome.is_accepted() {
                accepted += 1;
            }
        }
        for name in &doc.party_two {
            let outcome = self
                .queue
                .enqueue_name(
                    &self.names,
                    property,
                    name,
                    Operator::Begins,
                    priority::DOCUMENT_NAME,
                    doc.recording_date,
                    None,
                    &format!("document {} grantee", instrument),
                    now,
                )
                .await?;
            if outcome.is_accepted() {
                accepted += 1;
            }
        }

        if doc.doc_type.has_adjacent_instruments() {
            for neighbour in adjacent_instruments(instrument, self.settings.adjacent_span) {
                let task = NewSearchTask::new(
                    property,
                    SearchType::Instrument,
                    &neighbour,
                    Operator::Equals,
                    priority::ADJACENT_INSTRUMENT,
                )
                .with_provenance(format!("adjacent to {}", instrument));
                if self.queue.enqueue(task, now).await?.is_accepted() {
                    accepted += 1;
                }
            }
        }

        if accepted > 0 {
            debug!(property, instrument, queued = accepted, "extracted search vectors");
        }
        Ok(accepted)
    }

    /// Queue date-bounded name searches for every gap's expected names.
    async fn seed_gaps(&self, property: &str, current_owner: Option<&str>) -> Result<usize> {
        let documents = self.store.documents_for_property(property).await?;
        let gaps = completeness::find_gaps(
            &documents,
            current_owner,
            &self.names,
            &self.settings.chain,
            self.today(),
        );
        let now = Utc::now();
        let mut accepted = 0usize;
        for gap in &gaps {
            let provenance = format!("gap {}", gap.gap_type);
            for name in [gap.expected_grantor.as_deref(), gap.expected_grantee.as_deref()]
                .into_iter()
                .flatten()
            {
                let outcome = self
                    .queue
                    .enqueue_name(
                        &self.names,
                        property,
                        name,
                        Operator::Contains,
                        priority::GAP_NAME,
                        gap.start_date,
                        gap.end_date,
                        &provenance,
                        now,
                    )
                    .await?;
                if outcome.is_accepted() {
                    accepted += 1;
                }
            }
        }
        Ok(accepted)
    }

    async fn cluster_identities(&self, seed: &SeedFacts, documents: &[Document]) -> Result<()> {
        let mut all: Vec<&str> = Vec::new();
        for doc in documents {
            all.extend(doc.party_one.iter().map(String::as_str));
            all.extend(doc.party_two.iter().map(String::as_str));
        }
        all.extend(seed.parties.iter().map(|p| p.name.as_str()));
        all.extend(seed.current_owner.as_deref());

        let identities = self.names.cluster(&seed.property, &all);
        debug!(property = %seed.property, identities = identities.len(), "clustered party names");
        self.store.replace_identities(&seed.property, &identities).await
    }
}

/// Run many properties concurrently, at most `pool_size` at a time.
///
/// Results come back in input order. A property whose run fails gets a
/// result with `stopped_reason = error`; the others are unaffected.
pub async fn discover_many(
    engine: Arc<DiscoveryEngine>,
    seeds: Vec<SeedFacts>,
    pool_size: usize,
) -> Vec<DiscoveryResult> {
    let limiter = Arc::new(Semaphore::new(pool_size.max(1)));
    let properties: Vec<String> = seeds.iter().map(|s| s.property.clone()).collect();
    let mut set = JoinSet::new();

    for (index, seed) in seeds.into_iter().enumerate() {
        let engine = engine.clone();
        let limiter = limiter.clone();
        set.spawn(async move {
            let _slot = limiter.acquire_owned().await;
            let result = match engine.run(&seed).await {
                Ok(result) => result,
                Err(e) => {
                    error!(property = %seed.property, error = %e, "discovery failed");
                    DiscoveryResult::failed(&seed.property, format!("{:#}", e))
                }
            };
            (index, result)
        });
    }

    let mut results: Vec<Option<DiscoveryResult>> = vec![None; properties.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => error!(error = %e, "discovery worker panicked"),
        }
    }

    results
        .into_iter()
        .zip(properties)
        .map(|(result, property)| {
            result.unwrap_or_else(|| DiscoveryResult::failed(&property, "worker panicked".to_string()))
        })
        .collect()
}
