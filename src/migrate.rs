use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create every table and index. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Accepted documents, one row per instrument per property
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            property TEXT NOT NULL,
            instrument_number TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            raw_doc_type TEXT NOT NULL DEFAULT '',
            recording_date TEXT,
            book TEXT,
            page TEXT,
            party_one TEXT NOT NULL DEFAULT '[]',
            party_two TEXT NOT NULL DEFAULT '[]',
            legal_description TEXT,
            consideration REAL,
            source_task_id INTEGER,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(property, instrument_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Search queue; the rowid doubles as the FIFO sequence
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            property TEXT NOT NULL,
            search_type TEXT NOT NULL,
            term TEXT NOT NULL,
            operator TEXT NOT NULL,
            priority INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            date_from TEXT,
            date_to TEXT,
            provenance TEXT,
            result_count INTEGER,
            new_document_count INTEGER,
            last_error TEXT,
            next_eligible_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(property, search_type, term, operator)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Identity clusters
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identities (
            id TEXT PRIMARY KEY,
            property TEXT NOT NULL,
            canonical_name TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            link_type TEXT NOT NULL,
            confidence REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identity_members (
            identity_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            PRIMARY KEY (identity_id, position),
            FOREIGN KEY (identity_id) REFERENCES identities(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_property ON documents(property)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_ready ON search_tasks(property, status, priority, id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_identities_property ON identities(property)")
        .execute(pool)
        .await?;

    Ok(())
}
