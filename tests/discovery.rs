//! Engine tests against the in-memory store and a scripted records index.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use title_chain::discovery::{discover_many, DiscoveryEngine, DiscoverySettings, StoppedReason};
use title_chain::gate::OpenGate;
use title_chain::provider::{ProviderError, SearchProvider};
use title_chain_core::models::{
    Document, LinkedIdentity, NewSearchTask, Operator, ProviderRecord, SearchQuery, SearchTask,
    SearchType, SeedFacts, SeedLegal, SeedParty, TaskStatus, UpsertOutcome,
};
use title_chain_core::names::NameMatcher;
use title_chain_core::queue::QueueSettings;
use title_chain_core::store::memory::InMemoryStore;
use title_chain_core::store::Store;

const TUSCANY: &str = "LOT 198 BLOCK 3 TUSCANY SUBDIVISION AT TAMPA PALMS";
const TUSCANY_FIRST_TERM: &str = "L 198 B 3 TUSCANY SUBDIVISION AT TAMPA PALMS";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn today() -> NaiveDate {
    date(2025, 6, 1)
}

fn record(
    instrument: &str,
    raw_type: &str,
    on: NaiveDate,
    grantor: &str,
    grantee: &str,
    legal: Option<&str>,
) -> ProviderRecord {
    ProviderRecord {
        instrument_number: Some(instrument.to_string()),
        record_date: Some(on),
        raw_doc_type: raw_type.to_string(),
        party_one: vec![grantor.to_string()],
        party_two: vec![grantee.to_string()],
        legal_description: legal.map(str::to_string),
        ..Default::default()
    }
}

// ============ Scripted provider ============

enum Reply {
    Records(Vec<ProviderRecord>),
    /// Fail transiently this many times, then answer.
    FlakyThen(usize, Vec<ProviderRecord>),
    Permanent(&'static str),
}

struct Rule {
    search_type: SearchType,
    /// `None` answers every term of the type.
    term: Option<String>,
    operator: Option<Operator>,
    reply: Reply,
}

#[derive(Default)]
struct ScriptedProvider {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<SearchQuery>>,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self::default()
    }

    fn on(self, search_type: SearchType, term: &str, reply: Reply) -> Self {
        self.push(search_type, Some(term.to_string()), None, reply)
    }

    fn on_op(self, search_type: SearchType, term: &str, operator: Operator, reply: Reply) -> Self {
        self.push(search_type, Some(term.to_string()), Some(operator), reply)
    }

    fn on_any(self, search_type: SearchType, reply: Reply) -> Self {
        self.push(search_type, None, None, reply)
    }

    fn push(self, search_type: SearchType, term: Option<String>, operator: Option<Operator>, reply: Reply) -> Self {
        self.rules.lock().unwrap().push(Rule {
            search_type,
            term,
            operator,
            reply,
        });
        self
    }

    fn calls(&self) -> Vec<SearchQuery> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, search_type: SearchType, term: &str) -> usize {
        self.calls()
            .iter()
            .filter(|q| q.search_type == search_type && q.term == term)
            .count()
    }
}

#[async_trait]
impl SearchProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<ProviderRecord>, ProviderError> {
        self.calls.lock().unwrap().push(query.clone());
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.iter_mut().find(|r| {
            r.search_type == query.search_type
                && r.term.as_deref().is_none_or(|t| t == query.term)
                && r.operator.is_none_or(|o| o == query.operator)
        });
        match rule.map(|r| &mut r.reply) {
            None => Ok(Vec::new()),
            Some(Reply::Records(records)) => Ok(records.clone()),
            Some(Reply::FlakyThen(remaining, records)) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Err(ProviderError::transient("HTTP 429: slow down"))
                } else {
                    Ok(records.clone())
                }
            }
            Some(Reply::Permanent(message)) => Err(ProviderError::permanent(*message)),
        }
    }
}

fn engine(
    store: Arc<dyn Store>,
    provider: Arc<ScriptedProvider>,
    queue: QueueSettings,
    settings: DiscoverySettings,
) -> DiscoveryEngine {
    DiscoveryEngine::new(
        store,
        provider,
        Arc::new(OpenGate),
        NameMatcher::default(),
        queue,
        settings,
    )
    .with_today(today())
}

fn tuscany_seed() -> SeedFacts {
    SeedFacts {
        property: "A1234567890".to_string(),
        legal_descriptions: vec![SeedLegal {
            text: TUSCANY.to_string(),
            tier: title_chain_core::models::LegalTier::Primary,
        }],
        current_owner: Some("MARY JONES".to_string()),
        ..Default::default()
    }
}

fn tuscany_records() -> Vec<ProviderRecord> {
    let mut deed = record(
        "2018100200",
        "WARRANTY DEED",
        date(2018, 10, 2),
        "JOHN SMITH",
        "MARY JONES",
        Some(TUSCANY),
    );
    deed.consideration = Some(350_000.0);
    let mortgage = record(
        "2018100201",
        "MORTGAGE",
        date(2018, 10, 2),
        "MARY JONES",
        "WELLS FARGO BANK NA",
        Some(TUSCANY),
    );
    let neighbour = record(
        "2019000555",
        "WARRANTY DEED",
        date(2019, 2, 14),
        "TAMPA PALMS HOMES LLC",
        "ROBERT KING",
        Some("LOT 19 BLOCK 3 TUSCANY SUBDIVISION AT TAMPA PALMS"),
    );
    vec![deed, mortgage, neighbour]
}

fn task<'a>(tasks: &'a [SearchTask], search_type: SearchType, term: &str) -> Option<&'a SearchTask> {
    tasks
        .iter()
        .find(|t| t.search_type == search_type && t.term == term)
}

// ============ Tests ============

#[tokio::test]
async fn discovers_tuscany_chain_from_legal_description() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Legal,
        TUSCANY_FIRST_TERM,
        Reply::Records(tuscany_records()),
    ));
    let engine = engine(
        store.clone(),
        provider.clone(),
        QueueSettings::default(),
        DiscoverySettings::default(),
    );

    let result = engine.run(&tuscany_seed()).await.unwrap();

    assert_eq!(result.stopped_reason, StoppedReason::Complete);
    assert!(result.is_complete);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.documents_found, 2, "lot 19 must be filtered out");
    assert!(result.chain_years > 6.0 && result.chain_years < 7.0);
    assert!(result.gaps.is_empty());

    let docs = store.documents_for_property("A1234567890").await.unwrap();
    assert!(docs.iter().all(|d| d.instrument_number != "2019000555"));

    let chain = title_chain_core::chain::build(
        "A1234567890",
        &docs,
        Some("MARY JONES"),
        &NameMatcher::default(),
        &Default::default(),
        today(),
    );
    assert_eq!(chain.periods.len(), 1);
    assert_eq!(chain.periods[0].owner, "MARY JONES");
    assert_eq!(chain.periods[0].acquired_from, "JOHN SMITH");
    assert_eq!(chain.periods[0].acquisition_date, date(2018, 10, 2));
    assert_eq!(chain.encumbrances.len(), 1);
    assert_eq!(chain.encumbrances[0].period_index, Some(0));
    assert_eq!(chain.encumbrances[0].creditor, "WELLS FARGO BANK NA");

    // The first permutation found documents, so the rest were cancelled.
    let tasks = store.tasks_for_property("A1234567890").await.unwrap();
    assert!(tasks
        .iter()
        .filter(|t| t.search_type == SearchType::Legal && t.term != TUSCANY_FIRST_TERM)
        .all(|t| t.status == TaskStatus::Exhausted));
    let first = task(&tasks, SearchType::Legal, TUSCANY_FIRST_TERM).unwrap();
    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(first.result_count, Some(3));
    assert_eq!(first.new_document_count, Some(2));
}

#[tokio::test]
async fn thirty_plus_years_of_transfers_is_complete_without_a_plat() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Name,
        "HAROLD OLDHAM",
        Reply::Records(vec![record(
            "1993004411",
            "WARRANTY DEED",
            date(1993, 1, 15),
            "FIRST SETTLER",
            "HAROLD OLDHAM",
            None,
        )]),
    ));
    let engine = engine(
        store.clone(),
        provider,
        QueueSettings::default(),
        DiscoverySettings::default(),
    );
    let seed = SeedFacts {
        property: "M1".to_string(),
        parties: vec![SeedParty {
            name: "Harold  Oldham".to_string(),
            date_from: None,
            date_to: None,
        }],
        ..Default::default()
    };

    let result = engine.run(&seed).await.unwrap();

    assert!(result.is_complete);
    assert_eq!(result.stopped_reason, StoppedReason::Complete);
    assert!(result.chain_years >= 32.0);
}

#[tokio::test]
async fn gap_pass_searches_expected_names_inside_the_gap() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(
        ScriptedProvider::new()
            .on(
                SearchType::Name,
                "ALICE BROWN",
                Reply::Records(vec![record(
                    "2000000100",
                    "WARRANTY DEED",
                    date(2000, 1, 10),
                    "ALICE BROWN",
                    "BOB GREEN",
                    None,
                )]),
            )
            .on(
                SearchType::Name,
                "DAVID BLACK",
                Reply::Records(vec![record(
                    "2010000500",
                    "WARRANTY DEED",
                    date(2010, 8, 20),
                    "CAROL WHITE",
                    "DAVID BLACK",
                    None,
                )]),
            )
            .on_op(
                SearchType::Name,
                "BOB GREEN",
                Operator::Contains,
                Reply::Records(vec![record(
                    "2005000300",
                    "QUIT CLAIM DEED",
                    date(2005, 4, 5),
                    "BOB GREEN",
                    "CAROL WHITE",
                    None,
                )]),
            ),
    );
    let engine = engine(
        store.clone(),
        provider.clone(),
        QueueSettings::default(),
        DiscoverySettings::default(),
    );
    let seed = SeedFacts {
        property: "G1".to_string(),
        parties: vec![SeedParty {
            name: "ALICE BROWN".to_string(),
            date_from: None,
            date_to: None,
        }],
        current_owner: Some("DAVID BLACK".to_string()),
        ..Default::default()
    };

    let result = engine.run(&seed).await.unwrap();

    assert!(result.is_complete, "gaps left: {:?}", result.gaps);
    assert_eq!(result.stopped_reason, StoppedReason::Complete);
    assert_eq!(result.documents_found, 3);

    let gap_search = provider
        .calls()
        .into_iter()
        .find(|q| q.term == "BOB GREEN" && q.operator == Operator::Contains)
        .expect("gap search for the grantee of the earlier deed");
    assert_eq!(gap_search.date_from, Some(date(2000, 1, 10)));
    assert_eq!(gap_search.date_to, Some(date(2010, 8, 20)));

    let tasks = store.tasks_for_property("G1").await.unwrap();
    let gap_task = tasks
        .iter()
        .find(|t| t.term == "BOB GREEN" && t.operator == Operator::Contains)
        .unwrap();
    assert_eq!(gap_task.provenance.as_deref(), Some("gap ownership_gap"));
}

#[tokio::test]
async fn only_deeds_and_mortgages_spawn_adjacent_instrument_searches() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Name,
        "PAT DOE",
        Reply::Records(vec![
            record(
                "2019000300",
                "FINAL JUDGMENT",
                date(2019, 6, 1),
                "ACME CREDIT LLC",
                "PAT DOE",
                None,
            ),
            record(
                "2015000700",
                "WARRANTY DEED",
                date(2015, 3, 9),
                "SAM ROE",
                "PAT DOE",
                None,
            ),
        ]),
    ));
    let settings = DiscoverySettings {
        max_iterations: 1,
        gap_passes: 0,
        ..Default::default()
    };
    let engine = engine(store.clone(), provider, QueueSettings::default(), settings);
    let seed = SeedFacts {
        property: "J1".to_string(),
        parties: vec![SeedParty {
            name: "PAT DOE".to_string(),
            date_from: None,
            date_to: None,
        }],
        ..Default::default()
    };

    let result = engine.run(&seed).await.unwrap();
    assert_eq!(result.iterations, 1);
    assert_eq!(result.stopped_reason, StoppedReason::MaxIterations);

    let tasks = store.tasks_for_property("J1").await.unwrap();
    for neighbour in ["2015000701", "2015000699", "2015000702", "2015000698"] {
        let t = task(&tasks, SearchType::Instrument, neighbour).expect("deed neighbour queued");
        assert_eq!(t.provenance.as_deref(), Some("adjacent to 2015000700"));
    }
    assert!(tasks
        .iter()
        .filter(|t| t.search_type == SearchType::Instrument)
        .all(|t| !t.term.starts_with("20190003")));
}

#[tokio::test]
async fn lot_40_is_never_accepted_for_lot_4() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new().on_any(
        SearchType::Legal,
        Reply::Records(vec![
            record(
                "2012000040",
                "WARRANTY DEED",
                date(2012, 1, 5),
                "HERITAGE BUILDERS INC",
                "NORA FORTY",
                Some("LOT 40 BLOCK 1 HERITAGE ISLES PHASE 1"),
            ),
            record(
                "2012000004",
                "WARRANTY DEED",
                date(2012, 2, 7),
                "HERITAGE BUILDERS INC",
                "FRED FOUR",
                Some("LOT 4 BLOCK 1 HERITAGE ISLES PHASE 1"),
            ),
        ]),
    ));
    let settings = DiscoverySettings {
        max_iterations: 5,
        gap_passes: 0,
        ..Default::default()
    };
    let engine = engine(store.clone(), provider, QueueSettings::default(), settings);
    let seed = SeedFacts {
        property: "H4".to_string(),
        legal_descriptions: vec![SeedLegal {
            text: "LOT 4 BLOCK 1 HERITAGE ISLES PHASE 1".to_string(),
            tier: title_chain_core::models::LegalTier::Verified,
        }],
        ..Default::default()
    };

    engine.run(&seed).await.unwrap();

    let docs = store.documents_for_property("H4").await.unwrap();
    let instruments: Vec<&str> = docs.iter().map(|d| d.instrument_number.as_str()).collect();
    assert_eq!(instruments, vec!["2012000004"]);
}

#[tokio::test]
async fn legal_text_decides_and_parties_only_vouch_for_bare_records() {
    let store = Arc::new(InMemoryStore::new());
    let heritage = "LOT 4 BLOCK 1 HERITAGE ISLES PHASE 1";
    let provider = Arc::new(ScriptedProvider::new().on_any(
        SearchType::Legal,
        Reply::Records(vec![
            record(
                "2012000004",
                "WARRANTY DEED",
                date(2012, 2, 7),
                "HERITAGE BUILDERS INC",
                "FRED FOUR",
                Some(heritage),
            ),
            // No legal text, known party: accepted.
            record("2012000005", "MORTGAGE", date(2012, 2, 7), "FRED FOUR", "HARBOR LENDING LLC", None),
            // No legal text, nobody we know: rejected.
            record("2013000777", "WARRANTY DEED", date(2013, 5, 1), "STAN GREY", "OLGA GREY", None),
            // Known party, but the legal text describes another parcel.
            record(
                "2014000123",
                "WARRANTY DEED",
                date(2014, 9, 3),
                "FRED FOUR",
                "ANN WEST",
                Some("THE N 100 FT OF THE S 1/2 OF 11-30-20"),
            ),
        ]),
    ));
    let settings = DiscoverySettings {
        max_iterations: 5,
        gap_passes: 0,
        ..Default::default()
    };
    let engine = engine(store.clone(), provider, QueueSettings::default(), settings);
    let seed = SeedFacts {
        property: "H4".to_string(),
        legal_descriptions: vec![SeedLegal {
            text: heritage.to_string(),
            tier: title_chain_core::models::LegalTier::Verified,
        }],
        current_owner: Some("FRED FOUR".to_string()),
        ..Default::default()
    };

    engine.run(&seed).await.unwrap();

    let docs = store.documents_for_property("H4").await.unwrap();
    let mut instruments: Vec<&str> = docs.iter().map(|d| d.instrument_number.as_str()).collect();
    instruments.sort();
    assert_eq!(instruments, vec!["2012000004", "2012000005"]);
}

#[tokio::test]
async fn known_owner_on_another_parcel_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let mut records = tuscany_records();
    records.push(record(
        "2020004410",
        "WARRANTY DEED",
        date(2020, 3, 12),
        "MARY JONES",
        "PAUL WHITE",
        Some("UNIT 1203 BAYSHORE TOWERS CONDOMINIUM"),
    ));
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Legal,
        TUSCANY_FIRST_TERM,
        Reply::Records(records),
    ));
    let engine = engine(
        store.clone(),
        provider,
        QueueSettings::default(),
        DiscoverySettings::default(),
    );

    let result = engine.run(&tuscany_seed()).await.unwrap();

    assert_eq!(result.documents_found, 2);
    let docs = store.documents_for_property("A1234567890").await.unwrap();
    assert!(docs.iter().all(|d| d.instrument_number != "2020004410"));
    assert!(docs.iter().all(|d| !d.party_two.contains(&"PAUL WHITE".to_string())));
}

#[tokio::test]
async fn generic_party_names_never_reach_the_provider() {
    let store = Arc::new(InMemoryStore::new());
    let mut lis_pendens = record(
        "2021000900",
        "LIS PENDENS",
        date(2021, 4, 2),
        "OAK LENDING LLC",
        "MARY JONES",
        Some(TUSCANY),
    );
    lis_pendens.party_two.push("UNKNOWN TENANT".to_string());
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Legal,
        TUSCANY_FIRST_TERM,
        Reply::Records(vec![lis_pendens]),
    ));
    let engine = engine(
        store.clone(),
        provider.clone(),
        QueueSettings::default(),
        DiscoverySettings::default(),
    );

    let result = engine.run(&tuscany_seed()).await.unwrap();

    assert!(!result.is_complete);
    assert!(provider.calls_for(SearchType::Name, "OAK LENDING LLC") >= 1);
    assert!(provider.calls().iter().all(|q| q.term != "UNKNOWN TENANT"));
    let tasks = store.tasks_for_property("A1234567890").await.unwrap();
    assert!(tasks.iter().all(|t| t.term != "UNKNOWN TENANT"));
}

#[tokio::test]
async fn rerunning_a_property_does_not_requeue_or_duplicate() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Legal,
        TUSCANY_FIRST_TERM,
        Reply::Records(tuscany_records()),
    ));
    let engine = engine(
        store.clone(),
        provider.clone(),
        QueueSettings::default(),
        DiscoverySettings::default(),
    );

    let first = engine.run(&tuscany_seed()).await.unwrap();
    let tasks_after_first = store.task_count("A1234567890").await.unwrap();

    let second = engine.run(&tuscany_seed()).await.unwrap();

    assert_eq!(store.task_count("A1234567890").await.unwrap(), tasks_after_first);
    assert_eq!(second.documents_found, first.documents_found);
    assert_eq!(second.iterations, 0);
    assert_eq!(second.stopped_reason, StoppedReason::Complete);
    assert_eq!(provider.calls_for(SearchType::Legal, TUSCANY_FIRST_TERM), 1);
}

#[tokio::test]
async fn transient_errors_back_off_and_retry() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Legal,
        TUSCANY_FIRST_TERM,
        Reply::FlakyThen(1, tuscany_records()),
    ));
    let queue = QueueSettings {
        backoff: chrono::Duration::zero(),
        ..Default::default()
    };
    let engine = engine(store.clone(), provider.clone(), queue, DiscoverySettings::default());

    let result = engine.run(&tuscany_seed()).await.unwrap();

    assert!(result.is_complete);
    assert_eq!(provider.calls_for(SearchType::Legal, TUSCANY_FIRST_TERM), 2);

    let tasks = store.tasks_for_property("A1234567890").await.unwrap();
    let retried = task(&tasks, SearchType::Legal, TUSCANY_FIRST_TERM).unwrap();
    assert_eq!(retried.status, TaskStatus::Completed);
    assert_eq!(retried.attempts, 1);
    assert!(retried.last_error.is_none());
}

#[tokio::test]
async fn repeated_transient_errors_fail_the_task() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Legal,
        TUSCANY_FIRST_TERM,
        Reply::FlakyThen(usize::MAX, Vec::new()),
    ));
    let queue = QueueSettings {
        backoff: chrono::Duration::zero(),
        max_attempts: 3,
        ..Default::default()
    };
    let engine = engine(store.clone(), provider.clone(), queue, DiscoverySettings::default());

    let result = engine.run(&tuscany_seed()).await.unwrap();

    assert!(!result.is_complete);
    assert_eq!(provider.calls_for(SearchType::Legal, TUSCANY_FIRST_TERM), 3);
    let tasks = store.tasks_for_property("A1234567890").await.unwrap();
    let t = task(&tasks, SearchType::Legal, TUSCANY_FIRST_TERM).unwrap();
    assert_eq!(t.status, TaskStatus::Failed);
    assert_eq!(t.attempts, 3);
}

#[tokio::test]
async fn permanent_errors_fail_once_and_discovery_continues() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(
        ScriptedProvider::new()
            .on(
                SearchType::Legal,
                TUSCANY_FIRST_TERM,
                Reply::Permanent("HTTP 400: malformed legal term"),
            )
            .on(SearchType::Name, "MARY JONES", Reply::Records(tuscany_records())),
    );
    let engine = engine(
        store.clone(),
        provider.clone(),
        QueueSettings::default(),
        DiscoverySettings::default(),
    );

    let result = engine.run(&tuscany_seed()).await.unwrap();

    assert!(result.is_complete);
    assert_eq!(provider.calls_for(SearchType::Legal, TUSCANY_FIRST_TERM), 1);
    let tasks = store.tasks_for_property("A1234567890").await.unwrap();
    let failed = task(&tasks, SearchType::Legal, TUSCANY_FIRST_TERM).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("malformed legal term")));
}

// ============ Multi-property runs ============

/// Delegates to an in-memory store but fails every read for one property,
/// and optionally the next few document writes for any property.
struct FailingStore {
    inner: InMemoryStore,
    broken: String,
    upsert_failures: AtomicUsize,
}

impl FailingStore {
    fn new(broken: &str) -> Self {
        Self {
            inner: InMemoryStore::new(),
            broken: broken.to_string(),
            upsert_failures: AtomicUsize::new(0),
        }
    }

    fn failing_upserts(self, count: usize) -> Self {
        self.upsert_failures.store(count, Ordering::SeqCst);
        self
    }

    fn check(&self, property: &str) -> Result<()> {
        if property == self.broken {
            anyhow::bail!("disk I/O error for {}", property);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn upsert_document(&self, doc: &Document) -> Result<UpsertOutcome> {
        self.check(&doc.property)?;
        let failing = self
            .upsert_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("disk full writing {}", doc.instrument_number);
        }
        self.inner.upsert_document(doc).await
    }

    async fn documents_for_property(&self, property: &str) -> Result<Vec<Document>> {
        self.check(property)?;
        self.inner.documents_for_property(property).await
    }

    async fn document_count(&self, property: &str) -> Result<usize> {
        self.check(property)?;
        self.inner.document_count(property).await
    }

    async fn insert_task(&self, task: &NewSearchTask, now: DateTime<Utc>) -> Result<Option<SearchTask>> {
        self.check(&task.property)?;
        self.inner.insert_task(task, now).await
    }

    async fn task_count(&self, property: &str) -> Result<usize> {
        self.inner.task_count(property).await
    }

    async fn tasks_for_property(&self, property: &str) -> Result<Vec<SearchTask>> {
        self.inner.tasks_for_property(property).await
    }

    async fn get_task(&self, id: i64) -> Result<Option<SearchTask>> {
        self.inner.get_task(id).await
    }

    async fn update_task(&self, task: &SearchTask) -> Result<()> {
        self.inner.update_task(task).await
    }

    async fn cancel_pending(&self, property: &str, search_type: SearchType, now: DateTime<Utc>) -> Result<u64> {
        self.inner.cancel_pending(property, search_type, now).await
    }

    async fn reset_queue(&self, property: &str) -> Result<u64> {
        self.inner.reset_queue(property).await
    }

    async fn replace_identities(&self, property: &str, identities: &[LinkedIdentity]) -> Result<()> {
        self.inner.replace_identities(property, identities).await
    }

    async fn identities_for_property(&self, property: &str) -> Result<Vec<LinkedIdentity>> {
        self.inner.identities_for_property(property).await
    }
}

#[tokio::test]
async fn store_error_mid_search_puts_the_task_back_in_line() {
    let store = Arc::new(FailingStore::new("BROKEN").failing_upserts(1));
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Legal,
        TUSCANY_FIRST_TERM,
        Reply::Records(tuscany_records()),
    ));
    let engine = engine(
        store.clone(),
        provider.clone(),
        QueueSettings::default(),
        DiscoverySettings::default(),
    );

    let err = engine.run(&tuscany_seed()).await.unwrap_err();
    assert!(format!("{:#}", err).contains("disk full"));

    let tasks = store.tasks_for_property("A1234567890").await.unwrap();
    let interrupted = task(&tasks, SearchType::Legal, TUSCANY_FIRST_TERM).unwrap();
    assert_eq!(interrupted.status, TaskStatus::Pending);
    assert_eq!(interrupted.attempts, 0);

    let result = engine.run(&tuscany_seed()).await.unwrap();
    assert!(result.is_complete);
    assert_eq!(result.documents_found, 2);
    assert_eq!(provider.calls_for(SearchType::Legal, TUSCANY_FIRST_TERM), 2);
}

#[tokio::test]
async fn searches_left_in_progress_are_picked_up_again() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Legal,
        TUSCANY_FIRST_TERM,
        Reply::Records(tuscany_records()),
    ));
    let engine = engine(
        store.clone(),
        provider.clone(),
        QueueSettings::default(),
        DiscoverySettings::default(),
    );

    // A run that died after claiming the search.
    let now = Utc::now();
    let claimed = NewSearchTask::new("A1234567890", SearchType::Legal, TUSCANY_FIRST_TERM, Operator::Equals, 10);
    engine.queue().enqueue(claimed, now).await.unwrap();
    let mut stuck = engine.queue().next_ready("A1234567890", now).await.unwrap().unwrap();
    engine.queue().mark_in_progress(&mut stuck, now).await.unwrap();

    let result = engine.run(&tuscany_seed()).await.unwrap();

    assert!(result.is_complete);
    assert_eq!(provider.calls_for(SearchType::Legal, TUSCANY_FIRST_TERM), 1);
    let t = store.get_task(stuck.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Completed);
}

#[tokio::test]
async fn one_failing_property_does_not_stop_the_others() {
    let store = Arc::new(FailingStore::new("BROKEN"));
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Legal,
        TUSCANY_FIRST_TERM,
        Reply::Records(tuscany_records()),
    ));
    let engine = Arc::new(engine(
        store.clone(),
        provider,
        QueueSettings::default(),
        DiscoverySettings::default(),
    ));

    let broken = SeedFacts {
        property: "BROKEN".to_string(),
        ..tuscany_seed()
    };
    let results = discover_many(engine, vec![broken, tuscany_seed()], 2).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].property, "BROKEN");
    assert_eq!(results[0].stopped_reason, StoppedReason::Error);
    assert!(results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("disk I/O error")));
    assert_eq!(results[1].property, "A1234567890");
    assert!(results[1].is_complete);
    assert_eq!(results[1].documents_found, 2);
}

#[tokio::test]
async fn parallel_properties_keep_their_records_apart() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new().on(
        SearchType::Legal,
        TUSCANY_FIRST_TERM,
        Reply::Records(tuscany_records()),
    ));
    let engine = Arc::new(engine(
        store.clone(),
        provider,
        QueueSettings::default(),
        DiscoverySettings::default(),
    ));

    let seeds: Vec<SeedFacts> = ["P1", "P2", "P3"]
        .iter()
        .map(|p| SeedFacts {
            property: p.to_string(),
            ..tuscany_seed()
        })
        .collect();
    let results = discover_many(engine, seeds, 2).await;

    let by_property: HashMap<&str, usize> = results
        .iter()
        .map(|r| (r.property.as_str(), r.documents_found))
        .collect();
    assert_eq!(by_property.len(), 3);
    for p in ["P1", "P2", "P3"] {
        assert_eq!(by_property[p], 2);
        let docs = store.documents_for_property(p).await.unwrap();
        assert!(docs.iter().all(|d| d.property == p));
    }
}
