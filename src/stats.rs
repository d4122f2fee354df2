//! Store statistics and health overview.
//!
//! Provides a quick summary of what has been ingested: vocabulary, link
//! catalog and capture counts, the covered capture date range, and captures
//! whose link was never catalogued. Used by `speedmap stats`.

use anyhow::Result;
use sqlx::{Row, SqliteConnection};
use std::path::Path;

use crate::db::Store;
use crate::schema;

/// Counts gathered from one store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub tokens: i64,
    pub links: i64,
    pub captures: i64,
    pub snapshots: i64,
    pub first_capture: Option<String>,
    pub last_capture: Option<String>,
    /// Captures whose link is not in the link table.
    pub uncatalogued_captures: i64,
    pub links_by_region: Vec<(String, i64)>,
}

pub async fn collect(conn: &mut SqliteConnection) -> Result<StoreStats> {
    let tokens: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM token")
        .fetch_one(&mut *conn)
        .await?;

    let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM link")
        .fetch_one(&mut *conn)
        .await?;

    let summary = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS captures,
            COUNT(DISTINCT captured_at) AS snapshots,
            MIN(captured_at) AS first_capture,
            MAX(captured_at) AS last_capture
        FROM capture
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    let uncatalogued_captures: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM capture c
        LEFT JOIN link l ON l.start_id = c.link_start AND l.end_id = c.link_end
        WHERE l.start_id IS NULL
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    let region_rows = sqlx::query(
        r#"
        SELECT t.label AS region, COUNT(l.start_id) AS link_count
        FROM token t
        JOIN link l ON l.region = t.code
        GROUP BY t.code
        ORDER BY t.code
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(StoreStats {
        tokens,
        links,
        captures: summary.get("captures"),
        snapshots: summary.get("snapshots"),
        first_capture: summary.get("first_capture"),
        last_capture: summary.get("last_capture"),
        uncatalogued_captures,
        links_by_region: region_rows
            .iter()
            .map(|r| (r.get("region"), r.get("link_count")))
            .collect(),
    })
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(store_path: &Path) -> Result<()> {
    if !store_path.exists() {
        anyhow::bail!(
            "Store does not exist: {}. Run `speedmap init` first.",
            store_path.display()
        );
    }

    let store = Store::open(store_path).await?;
    let mut conn = store.pool().acquire().await?;
    let missing = schema::missing_tables(&mut conn).await?;
    if !missing.is_empty() {
        drop(conn);
        store.close().await;
        anyhow::bail!(
            "Store has no schema (missing tables: {}): {}. Run `speedmap init` first.",
            missing.join(", "),
            store_path.display()
        );
    }
    let stats = collect(&mut conn).await?;
    drop(conn);
    store.close().await;

    let size = std::fs::metadata(store_path).map(|m| m.len()).unwrap_or(0);

    println!("speedmap — store stats");
    println!("======================");
    println!();
    println!("  Store:       {}", store_path.display());
    println!("  Size:        {}", format_bytes(size));
    println!();
    println!("  Tokens:      {}", stats.tokens);
    println!("  Links:       {}", stats.links);
    println!("  Captures:    {}", stats.captures);
    println!("  Snapshots:   {}", stats.snapshots);
    if let (Some(first), Some(last)) = (&stats.first_capture, &stats.last_capture) {
        println!("  Range:       {} .. {}", first, last);
    }
    if stats.uncatalogued_captures > 0 {
        println!("  Uncatalogued captures: {}", stats.uncatalogued_captures);
    }

    if !stats.links_by_region.is_empty() {
        println!();
        println!("  By region:");
        for (region, count) in &stats.links_by_region {
            println!("    {:<4} {}", region, count);
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
