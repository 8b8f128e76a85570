//! Database statistics for `tchain stats`.
//!
//! A quick look at what discovery has gathered so far: document, search and
//! identity totals plus a per-property breakdown of the search queue.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

struct PropertyStats {
    property: String,
    documents: i64,
    tasks: i64,
    pending: i64,
    completed: i64,
    failed: i64,
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let total_tasks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_tasks")
        .fetch_one(&pool)
        .await?;
    let total_identities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM identities")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Title Chain Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", total_docs);
    println!("  Searches:    {}", total_tasks);
    println!("  Identities:  {}", total_identities);

    let rows = sqlx::query(
        r#"
        SELECT
            p.property,
            (SELECT COUNT(*) FROM documents d WHERE d.property = p.property) AS documents,
            (SELECT COUNT(*) FROM search_tasks t WHERE t.property = p.property) AS tasks,
            (SELECT COUNT(*) FROM search_tasks t
                WHERE t.property = p.property AND t.status IN ('pending', 'rate_limited')) AS pending,
            (SELECT COUNT(*) FROM search_tasks t
                WHERE t.property = p.property AND t.status = 'completed') AS completed,
            (SELECT COUNT(*) FROM search_tasks t
                WHERE t.property = p.property AND t.status = 'failed') AS failed
        FROM (
            SELECT property FROM documents
            UNION
            SELECT property FROM search_tasks
        ) p
        ORDER BY p.property
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let stats: Vec<PropertyStats> = rows
        .iter()
        .map(|row| PropertyStats {
            property: row.get("property"),
            documents: row.get("documents"),
            tasks: row.get("tasks"),
            pending: row.get("pending"),
            completed: row.get("completed"),
            failed: row.get("failed"),
        })
        .collect();

    if !stats.is_empty() {
        println!();
        println!("  By property:");
        println!(
            "  {:<24} {:>6} {:>6} {:>8} {:>10} {:>7}",
            "PROPERTY", "DOCS", "TASKS", "PENDING", "COMPLETED", "FAILED"
        );
        println!("  {}", "-".repeat(66));
        for s in &stats {
            println!(
                "  {:<24} {:>6} {:>6} {:>8} {:>10} {:>7}",
                s.property, s.documents, s.tasks, s.pending, s.completed, s.failed
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
