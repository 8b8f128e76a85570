//! In-memory [`Store`] implementation for tests and offline runs.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Task ids and insertion sequence
//! numbers come from one shared counter, mirroring SQLite's rowid.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Document, LinkedIdentity, NewSearchTask, SearchTask, SearchType, TaskStatus, UpsertOutcome,
};

use super::Store;

struct StoredDoc {
    doc: Document,
    hash: String,
}

/// In-memory store for tests.
pub struct InMemoryStore {
    docs: RwLock<Vec<StoredDoc>>,
    tasks: RwLock<Vec<SearchTask>>,
    identities: RwLock<Vec<LinkedIdentity>>,
    next_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
            tasks: RwLock::new(Vec::new()),
            identities: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<UpsertOutcome> {
        let hash = doc.content_hash();
        let mut docs = self.docs.write().unwrap();
        if let Some(existing) = docs.iter_mut().find(|d| {
            d.doc.property == doc.property && d.doc.instrument_number == doc.instrument_number
        }) {
            if existing.hash == hash {
                return Ok(UpsertOutcome::Unchanged);
            }
            let source_task_id = existing.doc.source_task_id.or(doc.source_task_id);
            existing.doc = Document {
                source_task_id,
                ..doc.clone()
            };
            existing.hash = hash;
            return Ok(UpsertOutcome::Updated);
        }
        docs.push(StoredDoc {
            doc: doc.clone(),
            hash,
        });
        Ok(UpsertOutcome::Inserted)
    }

    async fn documents_for_property(&self, property: &str) -> Result<Vec<Document>> {
        let docs = self.docs.read().unwrap();
        Ok(docs
            .iter()
            .filter(|d| d.doc.property == property)
            .map(|d| d.doc.clone())
            .collect())
    }

    async fn document_count(&self, property: &str) -> Result<usize> {
        let docs = self.docs.read().unwrap();
        Ok(docs.iter().filter(|d| d.doc.property == property).count())
    }

    async fn insert_task(&self, task: &NewSearchTask, now: DateTime<Utc>) -> Result<Option<SearchTask>> {
        let mut tasks = self.tasks.write().unwrap();
        let duplicate = tasks.iter().any(|t| {
            t.property == task.property
                && t.search_type == task.search_type
                && t.term == task.term
                && t.operator == task.operator
        });
        if duplicate {
            return Ok(None);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = SearchTask::from_new(id, id, task, now);
        tasks.push(stored.clone());
        Ok(Some(stored))
    }

    async fn task_count(&self, property: &str) -> Result<usize> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks.iter().filter(|t| t.property == property).count())
    }

    async fn tasks_for_property(&self, property: &str) -> Result<Vec<SearchTask>> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks
            .iter()
            .filter(|t| t.property == property)
            .cloned()
            .collect())
    }

    async fn get_task(&self, id: i64) -> Result<Option<SearchTask>> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn update_task(&self, task: &SearchTask) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap();
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => bail!("search task {} not found", task.id),
        }
    }

    async fn cancel_pending(
        &self,
        property: &str,
        search_type: SearchType,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tasks = self.tasks.write().unwrap();
        let mut changed = 0;
        for t in tasks.iter_mut().filter(|t| {
            t.property == property && t.search_type == search_type && t.status == TaskStatus::Pending
        }) {
            t.status = TaskStatus::Exhausted;
            t.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn reset_queue(&self, property: &str) -> Result<u64> {
        let mut tasks = self.tasks.write().unwrap();
        let before = tasks.len();
        tasks.retain(|t| t.property != property);
        Ok((before - tasks.len()) as u64)
    }

    async fn replace_identities(&self, property: &str, identities: &[LinkedIdentity]) -> Result<()> {
        let mut stored = self.identities.write().unwrap();
        stored.retain(|i| i.property != property);
        stored.extend(identities.iter().cloned());
        Ok(())
    }

    async fn identities_for_property(&self, property: &str) -> Result<Vec<LinkedIdentity>> {
        let stored = self.identities.read().unwrap();
        Ok(stored
            .iter()
            .filter(|i| i.property == property)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocType, Operator};

    fn deed(instrument: &str, grantee: &str) -> Document {
        Document {
            property: "P1".into(),
            doc_type: DocType::Deed,
            raw_doc_type: "DEED".into(),
            instrument_number: instrument.into(),
            recording_date: None,
            book: None,
            page: None,
            party_one: vec!["SELLER".into()],
            party_two: vec![grantee.into()],
            legal_description: None,
            consideration: None,
            source_task_id: Some(7),
        }
    }

    #[tokio::test]
    async fn upsert_reports_insert_update_unchanged() {
        let store = InMemoryStore::new();
        assert_eq!(store.upsert_document(&deed("1", "BUYER")).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_document(&deed("1", "BUYER")).await.unwrap(), UpsertOutcome::Unchanged);

        let mut backfilled = deed("1", "BUYER ONE");
        backfilled.source_task_id = Some(99);
        assert_eq!(store.upsert_document(&backfilled).await.unwrap(), UpsertOutcome::Updated);

        let docs = store.documents_for_property("P1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].party_two, vec!["BUYER ONE"]);
        assert_eq!(docs[0].source_task_id, Some(7));
    }

    #[tokio::test]
    async fn duplicate_task_is_not_inserted() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let task = NewSearchTask::new("P1", SearchType::Name, "JOHN SMITH", Operator::Begins, 40);
        assert!(store.insert_task(&task, now).await.unwrap().is_some());
        assert!(store.insert_task(&task, now).await.unwrap().is_none());
        let other = NewSearchTask::new("P2", SearchType::Name, "JOHN SMITH", Operator::Begins, 40);
        assert!(store.insert_task(&other, now).await.unwrap().is_some());
        assert_eq!(store.task_count("P1").await.unwrap(), 1);
        assert_eq!(store.reset_queue("P1").await.unwrap(), 1);
        assert_eq!(store.task_count("P2").await.unwrap(), 1);
    }
}
