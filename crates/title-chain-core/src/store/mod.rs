//! Storage abstraction for Title Chain.
//!
//! The [`Store`] trait covers everything the search queue and the discovery
//! loop persist: accepted documents, queued search tasks and identity
//! clusters. Backends are pluggable: SQLite in the application crate,
//! [`memory::InMemoryStore`] for tests.
//!
//! Every operation is scoped to one property key, so concurrent runs for
//! different properties never touch the same rows.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Document, LinkedIdentity, NewSearchTask, SearchTask, SearchType, UpsertOutcome};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Insert or update a document by instrument number |
/// | [`documents_for_property`](Store::documents_for_property) | All accepted documents, insertion order |
/// | [`insert_task`](Store::insert_task) | Queue a task unless its dedup key exists |
/// | [`update_task`](Store::update_task) | Persist a task's state transition |
/// | [`cancel_pending`](Store::cancel_pending) | Exhaust pending tasks of one type |
/// | [`reset_queue`](Store::reset_queue) | Delete every task for a property |
/// | [`replace_identities`](Store::replace_identities) | Swap in a fresh identity clustering |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a document keyed by (property, instrument number).
    ///
    /// An existing row with the same content hash is left alone. The
    /// originating task of the first sighting is preserved on update.
    async fn upsert_document(&self, doc: &Document) -> Result<UpsertOutcome>;

    async fn documents_for_property(&self, property: &str) -> Result<Vec<Document>>;

    async fn document_count(&self, property: &str) -> Result<usize>;

    /// Insert a task. Returns `None` when (property, type, term, operator)
    /// is already queued, whatever its status.
    async fn insert_task(&self, task: &NewSearchTask, now: DateTime<Utc>) -> Result<Option<SearchTask>>;

    async fn task_count(&self, property: &str) -> Result<usize>;

    /// All tasks for a property in insertion order.
    async fn tasks_for_property(&self, property: &str) -> Result<Vec<SearchTask>>;

    async fn get_task(&self, id: i64) -> Result<Option<SearchTask>>;

    /// Overwrite the mutable state of an existing task.
    async fn update_task(&self, task: &SearchTask) -> Result<()>;

    /// Mark every pending task of `search_type` for the property as
    /// exhausted. Returns the number of tasks changed.
    async fn cancel_pending(
        &self,
        property: &str,
        search_type: SearchType,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Delete every task for the property. Returns the number deleted.
    async fn reset_queue(&self, property: &str) -> Result<u64>;

    /// Replace the property's identity clusters in one step.
    async fn replace_identities(&self, property: &str, identities: &[LinkedIdentity]) -> Result<()>;

    async fn identities_for_property(&self, property: &str) -> Result<Vec<LinkedIdentity>>;
}
