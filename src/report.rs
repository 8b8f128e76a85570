//! Chain, queue and document reports for `tchain chain`, `tchain queue`
//! and `tchain documents`.
//!
//! Text output is a fixed-width table on stdout; `--json` prints the same
//! data pretty-printed with `serde_json`.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

use title_chain_core::chain::{self, ChainResult};
use title_chain_core::models::{Document, LinkedIdentity, SearchTask};
use title_chain_core::queue::{QueueSummary, SearchQueue};
use title_chain_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::discovery::DiscoveryResult;
use crate::sqlite_store::SqliteStore;

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn date_or_dash(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Clip to `width` characters for table cells.
fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
        out.push('~');
        out
    }
}

async fn open_store(config: &Config) -> Result<SqliteStore> {
    Ok(SqliteStore::new(db::connect(config).await?))
}

// ============ Chain ============

pub async fn run_chain(config: &Config, property: &str, owner: Option<&str>, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let documents = store.documents_for_property(property).await?;
    if documents.is_empty() {
        anyhow::bail!("No documents stored for property '{}'", property);
    }
    let result = chain::build(
        property,
        &documents,
        owner,
        &config.name_matcher(),
        &config.chain_settings(),
        chrono::Utc::now().date_naive(),
    );
    let identities = store.identities_for_property(property).await?;

    if json {
        #[derive(Serialize)]
        struct ChainReport<'a> {
            chain: &'a ChainResult,
            identities: &'a [LinkedIdentity],
        }
        print_json(&ChainReport {
            chain: &result,
            identities: &identities,
        })?;
    } else {
        print_chain(&result);
        print_identities(&identities);
    }

    store.pool().close().await;
    Ok(())
}

pub fn print_chain(result: &ChainResult) {
    println!("Chain of Title: {}", result.property);
    println!("{}", "=".repeat(16 + result.property.len()));
    println!();
    println!("  Years covered: {:.1}", result.total_years);
    println!("  Complete:      {}", if result.is_complete { "yes" } else { "no" });

    println!();
    println!("  Ownership:");
    println!(
        "  {:<28} {:<28} {:<10} {:<12} {:<6} {:>4}",
        "OWNER", "FROM", "ACQUIRED", "INSTRUMENT", "LINK", "CONF"
    );
    println!("  {}", "-".repeat(94));
    for p in &result.periods {
        println!(
            "  {:<28} {:<28} {:<10} {:<12} {:<6} {:>4.2}",
            clip(&p.owner, 28),
            clip(&p.acquired_from, 28),
            p.acquisition_date,
            clip(&p.acquisition_instrument, 12),
            p.link_status.as_str(),
            p.confidence
        );
    }

    if !result.encumbrances.is_empty() {
        println!();
        println!("  Encumbrances:");
        println!(
            "  {:<12} {:<28} {:<10} {:<12} {:<24}",
            "TYPE", "CREDITOR", "RECORDED", "INSTRUMENT", "STATUS"
        );
        println!("  {}", "-".repeat(90));
        for e in &result.encumbrances {
            let status = if e.is_satisfied {
                format!("satisfied {}", date_or_dash(e.satisfaction_date))
            } else {
                "open".to_string()
            };
            let creditor = match e.assignees.last() {
                Some(assignee) => format!("{} (assigned {})", e.creditor, assignee),
                None => e.creditor.clone(),
            };
            println!(
                "  {:<12} {:<28} {:<10} {:<12} {:<24}",
                e.encumbrance_type.as_str(),
                clip(&creditor, 28),
                date_or_dash(e.recording_date),
                clip(&e.instrument_number, 12),
                status
            );
        }
    }

    if !result.gaps.is_empty() {
        println!();
        println!("  Gaps:");
        for g in &result.gaps {
            println!(
                "   - {} {} to {}: expected {} -> {}",
                g.gap_type,
                date_or_dash(g.start_date),
                date_or_dash(g.end_date),
                g.expected_grantor.as_deref().unwrap_or("?"),
                g.expected_grantee.as_deref().unwrap_or("?")
            );
        }
    }

    if !result.issues.is_empty() {
        println!();
        println!("  Issues:");
        for issue in &result.issues {
            println!("   - {}", issue);
        }
    }
    println!();
}

fn print_identities(identities: &[LinkedIdentity]) {
    if identities.is_empty() {
        return;
    }
    println!("  Linked identities:");
    for identity in identities {
        println!(
            "   - {} [{}, {}, {:.2}]: {}",
            identity.canonical_name,
            identity.entity_type,
            identity.link_type,
            identity.confidence,
            identity.members.join(" | ")
        );
    }
    println!();
}

// ============ Discovery ============

pub fn print_discovery(results: &[DiscoveryResult]) {
    println!(
        "{:<20} {:>5} {:>5} {:>6} {:<8} {:<14}",
        "PROPERTY", "ITER", "DOCS", "YEARS", "COMPLETE", "STOPPED"
    );
    println!("{}", "-".repeat(63));
    for r in results {
        println!(
            "{:<20} {:>5} {:>5} {:>6.1} {:<8} {:<14}",
            clip(&r.property, 20),
            r.iterations,
            r.documents_found,
            r.chain_years,
            if r.is_complete { "yes" } else { "no" },
            r.stopped_reason.as_str()
        );
    }

    for r in results {
        if r.error.is_none() && r.gaps.is_empty() && r.issues.is_empty() {
            continue;
        }
        println!();
        println!("{}:", r.property);
        if let Some(err) = &r.error {
            println!("  error: {}", err);
        }
        for g in &r.gaps {
            println!(
                "  gap {} {} to {}",
                g.gap_type,
                date_or_dash(g.start_date),
                date_or_dash(g.end_date)
            );
        }
        for issue in &r.issues {
            println!("  issue: {}", issue);
        }
    }
}

pub fn print_discovery_json(results: &[DiscoveryResult]) -> Result<()> {
    print_json(results)
}

// ============ Queue ============

pub async fn run_queue_status(config: &Config, property: &str, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let queue = SearchQueue::new(Arc::new(SqliteStore::new(pool.clone())), config.queue_settings());
    let summary = queue.summary(property).await?;
    let tasks = queue.store().tasks_for_property(property).await?;

    if json {
        #[derive(Serialize)]
        struct QueueReport<'a> {
            summary: &'a QueueSummary,
            tasks: &'a [SearchTask],
        }
        print_json(&QueueReport {
            summary: &summary,
            tasks: &tasks,
        })?;
    } else {
        print_queue(&summary, &tasks);
    }

    pool.close().await;
    Ok(())
}

pub async fn run_queue_reset(config: &Config, property: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let queue = SearchQueue::new(Arc::new(SqliteStore::new(pool.clone())), config.queue_settings());
    let deleted = queue.reset(property).await?;
    println!("Removed {} queued search(es) for {}.", deleted, property);
    pool.close().await;
    Ok(())
}

pub fn print_queue(summary: &QueueSummary, tasks: &[SearchTask]) {
    println!("Search queue: {} ({} task(s))", summary.property, summary.total);
    for (status, count) in &summary.by_status {
        println!("  {:<14} {:>5}", status, count);
    }
    if tasks.is_empty() {
        return;
    }
    println!();
    println!(
        "  {:>5} {:>4} {:<12} {:<10} {:<40} {:<12} {:>7}",
        "ID", "PRI", "TYPE", "OPERATOR", "TERM", "STATUS", "RESULTS"
    );
    println!("  {}", "-".repeat(97));
    for t in tasks {
        println!(
            "  {:>5} {:>4} {:<12} {:<10} {:<40} {:<12} {:>7}",
            t.id,
            t.priority,
            t.search_type.as_str(),
            t.operator.as_str(),
            clip(&t.term, 40),
            t.status.as_str(),
            t.result_count.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
        );
    }
}

// ============ Documents ============

pub async fn run_documents(config: &Config, property: &str, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let documents = store.documents_for_property(property).await?;
    if json {
        print_json(&documents)?;
    } else {
        print_documents(property, &documents);
    }
    store.pool().close().await;
    Ok(())
}

pub fn print_documents(property: &str, documents: &[Document]) {
    println!("Documents: {} ({})", property, documents.len());
    if documents.is_empty() {
        return;
    }
    println!(
        "  {:<12} {:<12} {:<10} {:<28} {:<28}",
        "INSTRUMENT", "TYPE", "RECORDED", "GRANTOR", "GRANTEE"
    );
    println!("  {}", "-".repeat(94));
    for d in documents {
        println!(
            "  {:<12} {:<12} {:<10} {:<28} {:<28}",
            clip(&d.instrument_number, 12),
            d.doc_type.as_str(),
            date_or_dash(d.recording_date),
            clip(&d.grantors(), 28),
            clip(&d.grantees(), 28)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_marks_truncation() {
        assert_eq!(clip("SHORT", 10), "SHORT");
        assert_eq!(clip("ABCDEFGHIJKL", 5), "ABCD~");
    }
}
