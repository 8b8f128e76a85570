//! SQLite-backed [`Store`] implementation.
//!
//! Dates are stored as ISO `YYYY-MM-DD` text, timestamps as Unix
//! milliseconds and party-name lists as JSON arrays. Every statement is
//! scoped by property, and multi-statement writes run in one transaction,
//! so concurrent property runs never interleave on the same rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use title_chain_core::models::{
    Document, LinkedIdentity, NewSearchTask, SearchTask, SearchType, TaskStatus, UpsertOutcome,
};
use title_chain_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn date_to_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn text_to_date(text: Option<String>) -> Result<Option<NaiveDate>> {
    text.map(|t| {
        NaiveDate::parse_from_str(&t, "%Y-%m-%d").with_context(|| format!("bad stored date: {}", t))
    })
    .transpose()
}

fn millis_to_time(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn names_to_json(names: &[String]) -> Result<String> {
    Ok(serde_json::to_string(names)?)
}

fn json_to_names(json: &str) -> Result<Vec<String>> {
    serde_json::from_str(json).with_context(|| "bad stored party list")
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let doc_type: String = row.get("doc_type");
    let party_one: String = row.get("party_one");
    let party_two: String = row.get("party_two");
    Ok(Document {
        property: row.get("property"),
        doc_type: doc_type.parse()?,
        raw_doc_type: row.get("raw_doc_type"),
        instrument_number: row.get("instrument_number"),
        recording_date: text_to_date(row.get("recording_date"))?,
        book: row.get("book"),
        page: row.get("page"),
        party_one: json_to_names(&party_one)?,
        party_two: json_to_names(&party_two)?,
        legal_description: row.get("legal_description"),
        consideration: row.get("consideration"),
        source_task_id: row.get("source_task_id"),
    })
}

fn task_from_row(row: &SqliteRow) -> Result<SearchTask> {
    let search_type: String = row.get("search_type");
    let operator: String = row.get("operator");
    let status: String = row.get("status");
    let attempts: i64 = row.get("attempts");
    let result_count: Option<i64> = row.get("result_count");
    let new_document_count: Option<i64> = row.get("new_document_count");
    let next_eligible_at: Option<i64> = row.get("next_eligible_at");
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");
    let id: i64 = row.get("id");
    Ok(SearchTask {
        id,
        property: row.get("property"),
        search_type: search_type.parse()?,
        term: row.get("term"),
        operator: operator.parse()?,
        priority: row.get("priority"),
        status: status.parse()?,
        attempts: attempts.max(0) as u32,
        date_from: text_to_date(row.get("date_from"))?,
        date_to: text_to_date(row.get("date_to"))?,
        provenance: row.get("provenance"),
        result_count: result_count.map(|c| c.max(0) as u32),
        new_document_count: new_document_count.map(|c| c.max(0) as u32),
        last_error: row.get("last_error"),
        next_eligible_at: next_eligible_at.map(millis_to_time),
        seq: id,
        created_at: millis_to_time(created_at),
        updated_at: millis_to_time(updated_at),
    })
}

const TASK_COLUMNS: &str = "id, property, search_type, term, operator, priority, status, attempts, \
     date_from, date_to, provenance, result_count, new_document_count, last_error, \
     next_eligible_at, created_at, updated_at";

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> Result<UpsertOutcome> {
        let hash = doc.content_hash();
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT content_hash FROM documents WHERE property = ? AND instrument_number = ?",
        )
        .bind(&doc.property)
        .bind(&doc.instrument_number)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            Some(row) if row.get::<String, _>("content_hash") == hash => UpsertOutcome::Unchanged,
            Some(_) => {
                sqlx::query(
                    r#"
                    UPDATE documents SET
                        doc_type = ?, raw_doc_type = ?, recording_date = ?, book = ?, page = ?,
                        party_one = ?, party_two = ?, legal_description = ?, consideration = ?,
                        source_task_id = COALESCE(source_task_id, ?),
                        content_hash = ?, updated_at = ?
                    WHERE property = ? AND instrument_number = ?
                    "#,
                )
                .bind(doc.doc_type.as_str())
                .bind(&doc.raw_doc_type)
                .bind(date_to_text(doc.recording_date))
                .bind(&doc.book)
                .bind(&doc.page)
                .bind(names_to_json(&doc.party_one)?)
                .bind(names_to_json(&doc.party_two)?)
                .bind(&doc.legal_description)
                .bind(doc.consideration)
                .bind(doc.source_task_id)
                .bind(&hash)
                .bind(now)
                .bind(&doc.property)
                .bind(&doc.instrument_number)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Updated
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO documents (property, instrument_number, doc_type, raw_doc_type,
                                           recording_date, book, page, party_one, party_two,
                                           legal_description, consideration, source_task_id,
                                           content_hash, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&doc.property)
                .bind(&doc.instrument_number)
                .bind(doc.doc_type.as_str())
                .bind(&doc.raw_doc_type)
                .bind(date_to_text(doc.recording_date))
                .bind(&doc.book)
                .bind(&doc.page)
                .bind(names_to_json(&doc.party_one)?)
                .bind(names_to_json(&doc.party_two)?)
                .bind(&doc.legal_description)
                .bind(doc.consideration)
                .bind(doc.source_task_id)
                .bind(&hash)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Inserted
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn documents_for_property(&self, property: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE property = ? ORDER BY id")
            .bind(property)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn document_count(&self, property: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE property = ?")
            .bind(property)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn insert_task(&self, task: &NewSearchTask, now: DateTime<Utc>) -> Result<Option<SearchTask>> {
        let ts = now.timestamp_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO search_tasks (property, search_type, term, operator, priority, status,
                                      attempts, date_from, date_to, provenance,
                                      created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?, ?, ?)
            ON CONFLICT(property, search_type, term, operator) DO NOTHING
            "#,
        )
        .bind(&task.property)
        .bind(task.search_type.as_str())
        .bind(&task.term)
        .bind(task.operator.as_str())
        .bind(task.priority)
        .bind(date_to_text(task.date_from))
        .bind(date_to_text(task.date_to))
        .bind(&task.provenance)
        .bind(ts)
        .bind(ts)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let id = result.last_insert_rowid();
        // Round-trip through millisecond storage so callers see what a reload sees.
        Ok(Some(SearchTask::from_new(id, id, task, millis_to_time(ts))))
    }

    async fn task_count(&self, property: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_tasks WHERE property = ?")
            .bind(property)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn tasks_for_property(&self, property: &str) -> Result<Vec<SearchTask>> {
        let sql = format!(
            "SELECT {} FROM search_tasks WHERE property = ? ORDER BY id",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(property).fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn get_task(&self, id: i64) -> Result<Option<SearchTask>> {
        let sql = format!("SELECT {} FROM search_tasks WHERE id = ?", TASK_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn update_task(&self, task: &SearchTask) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE search_tasks SET
                priority = ?, status = ?, attempts = ?, result_count = ?,
                new_document_count = ?, last_error = ?, next_eligible_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(task.priority)
        .bind(task.status.as_str())
        .bind(task.attempts as i64)
        .bind(task.result_count.map(i64::from))
        .bind(task.new_document_count.map(i64::from))
        .bind(&task.last_error)
        .bind(task.next_eligible_at.map(|t| t.timestamp_millis()))
        .bind(task.updated_at.timestamp_millis())
        .bind(task.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("search task {} not found", task.id);
        }
        Ok(())
    }

    async fn cancel_pending(
        &self,
        property: &str,
        search_type: SearchType,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE search_tasks SET status = ?, updated_at = ? \
             WHERE property = ? AND search_type = ? AND status = ?",
        )
        .bind(TaskStatus::Exhausted.as_str())
        .bind(now.timestamp_millis())
        .bind(property)
        .bind(search_type.as_str())
        .bind(TaskStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reset_queue(&self, property: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM search_tasks WHERE property = ?")
            .bind(property)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace_identities(&self, property: &str, identities: &[LinkedIdentity]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM identity_members WHERE identity_id IN (SELECT id FROM identities WHERE property = ?)",
        )
        .bind(property)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM identities WHERE property = ?")
            .bind(property)
            .execute(&mut *tx)
            .await?;

        for identity in identities {
            sqlx::query(
                "INSERT INTO identities (id, property, canonical_name, entity_type, link_type, confidence) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&identity.id)
            .bind(property)
            .bind(&identity.canonical_name)
            .bind(identity.entity_type.as_str())
            .bind(identity.link_type.as_str())
            .bind(identity.confidence)
            .execute(&mut *tx)
            .await?;

            for (position, name) in identity.members.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO identity_members (identity_id, position, name) VALUES (?, ?, ?)",
                )
                .bind(&identity.id)
                .bind(position as i64)
                .bind(name)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn identities_for_property(&self, property: &str) -> Result<Vec<LinkedIdentity>> {
        let rows = sqlx::query(
            "SELECT id, canonical_name, entity_type, link_type, confidence \
             FROM identities WHERE property = ? ORDER BY rowid",
        )
        .bind(property)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let entity_type: String = row.get("entity_type");
            let link_type: String = row.get("link_type");
            let members: Vec<String> = sqlx::query_scalar(
                "SELECT name FROM identity_members WHERE identity_id = ? ORDER BY position",
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await?;
            out.push(LinkedIdentity {
                id,
                property: property.to_string(),
                canonical_name: row.get("canonical_name"),
                entity_type: entity_type.parse()?,
                link_type: link_type.parse()?,
                confidence: row.get("confidence"),
                members,
            });
        }
        Ok(out)
    }
}
