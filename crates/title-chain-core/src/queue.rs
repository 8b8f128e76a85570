//! Prioritized, deduplicated search queue with retry/backoff state.
//!
//! One task exists per (property, type, term, operator); re-deriving the
//! same vector from another document is a no-op. Lower priority numbers run
//! sooner, ties broken by insertion order.
//!
//! State machine:
//!
//! ```text
//! pending ──► in_progress ──► completed
//!  ▲  ▲             │
//!  │  │             ├──► failed          (permanent error, or attempts exhausted)
//!  │  │             ├──► rate_limited    (transient error, attempts < max)
//!  │  │             │          │
//!  │  └─────────────┘          │         (run aborted before the task settled)
//!  └──── next_ready ◄──────────┘         (only once the backoff has elapsed)
//!
//! pending ──► exhausted                  (cancel_pending short-circuit)
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::legal::{self, ParsedLegalDescription};
use crate::models::{NewSearchTask, Operator, SearchTask, SearchType, TaskStatus};
use crate::names::NameMatcher;
use crate::store::Store;

/// Seeding and extraction priorities. Exact lookups have no false
/// positives and run first; name searches are the broadest and run last.
pub mod priority {
    pub const EXACT_LOOKUP: i32 = 1;
    pub const TEXT_REFERENCE: i32 = 5;
    pub const TRUSTED_LEGAL: i32 = 10;
    pub const ADJACENT_INSTRUMENT: i32 = 15;
    pub const DOCUMENT_LEGAL: i32 = 20;
    pub const BULK_LEGAL: i32 = 30;
    pub const GAP_NAME: i32 = 35;
    pub const DOCUMENT_NAME: i32 = 40;
    pub const SEED_NAME: i32 = 50;
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Per-property cap on queued tasks of any status.
    pub max_queue_size: usize,
    pub max_attempts: u32,
    /// Fixed delay before a rate-limited task is eligible again.
    pub backoff: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 400,
            max_attempts: 3,
            backoff: Duration::seconds(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted(i64),
    Duplicate,
    LimitReached,
    /// Empty term or generic party name; nothing worth searching for.
    Skipped,
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted(_))
    }
}

/// Task counts by status for one property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub property: String,
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

impl QueueSummary {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// The next task to run: the best pending task, else a rate-limited task
/// whose backoff has elapsed. "Best" is lowest priority, then oldest.
pub fn select_next_ready(tasks: &[SearchTask], now: DateTime<Utc>) -> Option<&SearchTask> {
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .min_by_key(|t| (t.priority, t.seq))
        .or_else(|| {
            tasks
                .iter()
                .filter(|t| t.status == TaskStatus::RateLimited)
                .filter(|t| t.next_eligible_at.is_none_or(|at| at <= now))
                .min_by_key(|t| (t.priority, t.seq))
        })
}

/// Search queue over an abstract [`Store`].
pub struct SearchQueue {
    store: Arc<dyn Store>,
    settings: QueueSettings,
    /// Properties already warned about hitting the size cap.
    limit_warned: Mutex<HashSet<String>>,
}

impl SearchQueue {
    pub fn new(store: Arc<dyn Store>, settings: QueueSettings) -> Self {
        Self {
            store,
            settings,
            limit_warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn enqueue(&self, task: NewSearchTask, now: DateTime<Utc>) -> Result<EnqueueOutcome> {
        if task.term.is_empty() {
            return Ok(EnqueueOutcome::Skipped);
        }
        if self.store.task_count(&task.property).await? >= self.settings.max_queue_size {
            self.warn_limit_once(&task.property);
            return Ok(EnqueueOutcome::LimitReached);
        }
        match self.store.insert_task(&task, now).await? {
            Some(stored) => {
                tracing::debug!(
                    property = %stored.property,
                    task_id = stored.id,
                    search_type = %stored.search_type,
                    term = %stored.term,
                    priority = stored.priority,
                    "queued search"
                );
                Ok(EnqueueOutcome::Accepted(stored.id))
            }
            None => Ok(EnqueueOutcome::Duplicate),
        }
    }

    fn warn_limit_once(&self, property: &str) {
        let mut warned = self.limit_warned.lock().unwrap_or_else(|e| e.into_inner());
        if warned.insert(property.to_string()) {
            tracing::warn!(
                property = %property,
                max_queue_size = self.settings.max_queue_size,
                "search queue limit reached; further vectors are dropped"
            );
        }
    }

    /// Expand a raw legal description into permutation tasks. Exact terms
    /// run with `equals`, wildcard terms with `begins`; priority grows with
    /// the term index so the most specific term runs first.
    pub async fn enqueue_legal_description(
        &self,
        property: &str,
        raw: &str,
        base_priority: i32,
        max_permutations: usize,
        provenance: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<EnqueueOutcome>> {
        let parsed: ParsedLegalDescription = legal::parse(raw);
        let terms = legal::generate_permutations(&parsed, raw, max_permutations);
        let mut outcomes = Vec::with_capacity(terms.len());
        for (i, term) in terms.iter().enumerate() {
            let task = NewSearchTask::new(
                property,
                SearchType::Legal,
                &term.term,
                term.operator(),
                base_priority + i as i32,
            )
            .with_provenance(provenance);
            outcomes.push(self.enqueue(task, now).await?);
        }
        Ok(outcomes)
    }

    /// Queue a date-bounded name search. Generic names ("UNKNOWN TENANT")
    /// would match half the index and are never queued.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue_name(
        &self,
        names: &NameMatcher,
        property: &str,
        name: &str,
        operator: Operator,
        priority: i32,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
        provenance: &str,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        if names.is_generic(name) {
            tracing::debug!(property = %property, name = %name, "skipping generic party name");
            return Ok(EnqueueOutcome::Skipped);
        }
        let term = name.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        let task = NewSearchTask::new(property, SearchType::Name, &term, operator, priority)
            .with_dates(date_from, date_to)
            .with_provenance(provenance);
        self.enqueue(task, now).await
    }

    /// Pull the next runnable task. A rate-limited task chosen here moves
    /// back to `pending`; that is the only way out of `rate_limited`.
    pub async fn next_ready(&self, property: &str, now: DateTime<Utc>) -> Result<Option<SearchTask>> {
        let tasks = self.store.tasks_for_property(property).await?;
        let Some(task) = select_next_ready(&tasks, now) else {
            return Ok(None);
        };
        let mut task = task.clone();
        if task.status == TaskStatus::RateLimited {
            task.status = TaskStatus::Pending;
            task.next_eligible_at = None;
            task.updated_at = now;
            self.store.update_task(&task).await?;
        }
        Ok(Some(task))
    }

    /// Earliest backoff expiry among rate-limited tasks, if any.
    pub async fn earliest_backoff(&self, property: &str) -> Result<Option<DateTime<Utc>>> {
        let tasks = self.store.tasks_for_property(property).await?;
        Ok(tasks
            .iter()
            .filter(|t| t.status == TaskStatus::RateLimited)
            .filter_map(|t| t.next_eligible_at)
            .min())
    }

    pub async fn mark_in_progress(&self, task: &mut SearchTask, now: DateTime<Utc>) -> Result<()> {
        task.status = TaskStatus::InProgress;
        task.updated_at = now;
        self.store.update_task(task).await
    }

    /// Put a task that never settled back in line. No attempt is counted:
    /// the provider answer, if any, was never recorded.
    pub async fn mark_pending(&self, task: &mut SearchTask, now: DateTime<Utc>) -> Result<()> {
        task.status = TaskStatus::Pending;
        task.next_eligible_at = None;
        task.updated_at = now;
        self.store.update_task(task).await
    }

    /// Requeue tasks a previous run left `in_progress` (crash, interrupt,
    /// store error). Returns how many were requeued.
    pub async fn requeue_interrupted(&self, property: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut requeued = 0usize;
        for mut task in self.store.tasks_for_property(property).await? {
            if task.status == TaskStatus::InProgress {
                self.mark_pending(&mut task, now).await?;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    pub async fn mark_completed(
        &self,
        task: &mut SearchTask,
        result_count: u32,
        new_document_count: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        task.status = TaskStatus::Completed;
        task.result_count = Some(result_count);
        task.new_document_count = Some(new_document_count);
        task.last_error = None;
        task.updated_at = now;
        self.store.update_task(task).await
    }

    /// Permanent failure. Terminal for this task.
    pub async fn mark_failed(&self, task: &mut SearchTask, error: &str, now: DateTime<Utc>) -> Result<()> {
        task.status = TaskStatus::Failed;
        task.attempts += 1;
        task.last_error = Some(error.to_string());
        task.next_eligible_at = None;
        task.updated_at = now;
        self.store.update_task(task).await
    }

    /// Transient failure: count the attempt and back off, or fail the task
    /// once it has used up its attempts. Returns the resulting status.
    pub async fn mark_rate_limited(
        &self,
        task: &mut SearchTask,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskStatus> {
        task.attempts += 1;
        task.last_error = Some(error.to_string());
        task.updated_at = now;
        if task.attempts >= self.settings.max_attempts {
            task.status = TaskStatus::Failed;
            task.next_eligible_at = None;
        } else {
            task.status = TaskStatus::RateLimited;
            task.next_eligible_at = Some(now + self.settings.backoff);
        }
        self.store.update_task(task).await?;
        Ok(task.status)
    }

    pub async fn cancel_pending(
        &self,
        property: &str,
        search_type: SearchType,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.store.cancel_pending(property, search_type, now).await
    }

    /// Delete every task for the property and re-arm the size-cap warning.
    pub async fn reset(&self, property: &str) -> Result<u64> {
        let deleted = self.store.reset_queue(property).await?;
        self.limit_warned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(property);
        Ok(deleted)
    }

    pub async fn summary(&self, property: &str) -> Result<QueueSummary> {
        let tasks = self.store.tasks_for_property(property).await?;
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for t in &tasks {
            *by_status.entry(t.status.as_str().to_string()).or_default() += 1;
        }
        Ok(QueueSummary {
            property: property.to_string(),
            total: tasks.len(),
            by_status,
        })
    }
}
