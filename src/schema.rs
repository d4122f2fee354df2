//! Schema creation and vocabulary seeding.
//!
//! All functions take a plain connection so they run inside whatever
//! transaction the caller holds.

use sqlx::{Row, SqliteConnection};
use std::path::Path;

use crate::db::Store;
use crate::error::{IngestError, Result};
use crate::vocab::{code_list, Token, TokenKind};

const TABLES: [&str; 3] = ["token", "link", "capture"];

/// Creates the `token`, `link` and `capture` tables when absent and seeds the
/// vocabulary into an empty `token` table. Safe to run on every start.
pub async fn ensure_schema(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS token (
            code INTEGER NOT NULL PRIMARY KEY,
            label TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    let token_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM token")
        .fetch_one(&mut *conn)
        .await?;
    if token_count == 0 {
        for token in Token::ALL {
            sqlx::query("INSERT INTO token (code, label) VALUES (?, ?)")
                .bind(token.code())
                .bind(token.label())
                .execute(&mut *conn)
                .await?;
        }
        log::info!("seeded {} vocabulary tokens", Token::ALL.len());
    }

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS link (
            start_id INTEGER NOT NULL,
            end_id INTEGER NOT NULL,
            region INTEGER NOT NULL CHECK (region IN ({})),
            road_type INTEGER NOT NULL CHECK (road_type IN ({})),
            PRIMARY KEY (start_id, end_id)
        )
        "#,
        code_list(TokenKind::Region),
        code_list(TokenKind::RoadType),
    ))
    .execute(&mut *conn)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS capture (
            link_start INTEGER NOT NULL,
            link_end INTEGER NOT NULL,
            saturation INTEGER NOT NULL CHECK (saturation IN ({})),
            speed REAL NOT NULL,
            captured_at TEXT NOT NULL,
            PRIMARY KEY (link_start, link_end, captured_at),
            FOREIGN KEY (link_start, link_end) REFERENCES link (start_id, end_id)
        )
        "#,
        code_list(TokenKind::SaturationLevel),
    ))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Checks that the persisted vocabulary is exactly the built-in one.
pub async fn verify_vocabulary(conn: &mut SqliteConnection) -> Result<()> {
    let rows = sqlx::query("SELECT code, label FROM token ORDER BY code")
        .fetch_all(&mut *conn)
        .await?;

    if rows.len() != Token::ALL.len() {
        return Err(IngestError::SchemaViolation(format!(
            "token table holds {} rows, expected {}",
            rows.len(),
            Token::ALL.len()
        )));
    }

    for row in rows {
        let code: i64 = row.get("code");
        let label: String = row.get("label");
        match Token::from_code(code) {
            Some(token) if token.label() == label => {}
            Some(token) => {
                return Err(IngestError::SchemaViolation(format!(
                    "token {} is stored as {:?}, expected {:?}",
                    code,
                    label,
                    token.label()
                )))
            }
            None => {
                return Err(IngestError::SchemaViolation(format!(
                    "token table holds unknown code {} ({:?})",
                    code, label
                )))
            }
        }
    }

    Ok(())
}

/// Creates the store and its schema, then verifies the vocabulary.
pub async fn run_init(store_path: &Path) -> Result<()> {
    let store = Store::open(store_path).await?;
    let mut tx = store.begin().await?;
    ensure_schema(&mut tx).await?;
    verify_vocabulary(&mut tx).await?;
    tx.commit().await?;
    store.close().await;
    Ok(())
}

/// Tables of the schema that are absent from the store. Read-only.
pub async fn missing_tables(conn: &mut SqliteConnection) -> Result<Vec<&'static str>> {
    let present: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&mut *conn)
            .await?;
    Ok(TABLES
        .into_iter()
        .filter(|t| !present.iter().any(|p| p.as_str() == *t))
        .collect())
}

pub async fn is_link_table_populated(conn: &mut SqliteConnection) -> Result<bool> {
    let populated: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM link)")
        .fetch_one(&mut *conn)
        .await?;
    Ok(populated)
}
