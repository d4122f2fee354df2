//! Ingestion pass orchestration.
//!
//! A pass moves through `Start → SchemaReady → Parsing → Writing` once per
//! document and ends `Committed` or `Failed`. Everything it writes shares one
//! transaction; each document gets its own savepoint so a rejected document
//! can be discarded on its own when `continue_on_error` is set.
//!
//! Links are only catalogued while the link table is empty. That decision is
//! taken once per document, before it is parsed, and travels with it as
//! [`DocumentContext::populate_links`].

use sqlx::error::ErrorKind;
use sqlx::{Connection, SqliteConnection};
use std::path::Path;

use crate::db::Store;
use crate::error::{IngestError, Result};
use crate::logging::DUPLICATES_TARGET;
use crate::models::{Capture, CaptureOutcome, CaptureRecord, LinkAttributes, LinkKey};
use crate::parser::parse_document;
use crate::schema;
use crate::source::DocumentSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Start,
    SchemaReady,
    Parsing,
    Writing,
    Committed,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    /// Roll back a failing document and keep going instead of failing the pass.
    pub continue_on_error: bool,
}

/// Per-document decisions, fixed before the document is parsed.
#[derive(Debug, Clone, Copy)]
pub struct DocumentContext {
    pub populate_links: bool,
}

/// What a document contributed to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentStats {
    pub records: u64,
    pub links_inserted: u64,
    pub captures_inserted: u64,
    pub duplicate_captures: u64,
}

#[derive(Debug)]
pub struct DocumentFailure {
    pub origin: String,
    pub error: IngestError,
}

#[derive(Debug)]
pub struct PassReport {
    pub state: PassState,
    pub documents_seen: u64,
    pub documents_ingested: u64,
    pub totals: DocumentStats,
    /// Documents skipped under `continue_on_error`.
    pub failures: Vec<DocumentFailure>,
}

impl PassReport {
    fn new() -> Self {
        Self {
            state: PassState::Start,
            documents_seen: 0,
            documents_ingested: 0,
            totals: DocumentStats::default(),
            failures: Vec::new(),
        }
    }

    fn advance(&mut self, state: PassState) {
        log::debug!("pass state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn absorb(&mut self, stats: &DocumentStats) {
        self.documents_ingested += 1;
        self.totals.records += stats.records;
        self.totals.links_inserted += stats.links_inserted;
        self.totals.captures_inserted += stats.captures_inserted;
        self.totals.duplicate_captures += stats.duplicate_captures;
    }

    /// Exit code of the first skipped document, if any.
    pub fn exit_code(&self) -> u8 {
        self.failures.first().map_or(0, |f| f.error.exit_code())
    }
}

/// Runs one pass of `source` into the store at `store_path`.
///
/// The source is enumerated before the store is opened: a source with
/// nothing to offer fails with [`IngestError::EmptyImport`] and leaves the
/// store untouched.
pub async fn run_pass(
    store_path: &Path,
    source: &dyn DocumentSource,
    options: &PassOptions,
) -> Result<PassReport> {
    let mut report = PassReport::new();

    let origins = source.locate().await?;
    if origins.is_empty() {
        return Err(IngestError::EmptyImport(source.describe()));
    }
    log::info!(
        "pass started: {} document(s) from {}",
        origins.len(),
        source.describe()
    );

    let store = Store::open(store_path).await?;
    let result = run_in_store(&store, source, &origins, options, &mut report).await;
    store.close().await;

    match result {
        Ok(()) => {
            log::info!(
                "pass committed: {}/{} document(s), {} link(s), {} capture(s), {} duplicate(s)",
                report.documents_ingested,
                report.documents_seen,
                report.totals.links_inserted,
                report.totals.captures_inserted,
                report.totals.duplicate_captures
            );
            Ok(report)
        }
        Err(e) => {
            report.advance(PassState::Failed);
            log::warn!("pass rolled back");
            Err(e)
        }
    }
}

async fn run_in_store(
    store: &Store,
    source: &dyn DocumentSource,
    origins: &[String],
    options: &PassOptions,
    report: &mut PassReport,
) -> Result<()> {
    let mut tx = store.begin().await?;

    schema::ensure_schema(&mut tx).await?;
    schema::verify_vocabulary(&mut tx).await?;
    report.advance(PassState::SchemaReady);

    for origin in origins {
        report.documents_seen += 1;
        log::debug!("Importing: {}", origin);

        let mut doc_tx = Connection::begin(&mut *tx).await?;
        let outcome = ingest_document(&mut doc_tx, source, origin, report).await;
        match outcome {
            Ok(stats) => {
                doc_tx.commit().await?;
                report.absorb(&stats);
            }
            Err(e) if options.continue_on_error && !matches!(e, IngestError::Store(_)) => {
                doc_tx.rollback().await?;
                log::error!("{}: {} (document skipped)", origin, e);
                report.failures.push(DocumentFailure {
                    origin: origin.clone(),
                    error: e,
                });
            }
            Err(e) => {
                log::error!("{}: {}", origin, e);
                if let Err(rb) = doc_tx.rollback().await {
                    log::warn!("rollback of {} failed: {}", origin, rb);
                }
                if let Err(rb) = tx.rollback().await {
                    log::warn!("rollback of pass failed: {}", rb);
                }
                return Err(e);
            }
        }
    }

    tx.commit().await?;
    report.advance(PassState::Committed);
    Ok(())
}

async fn ingest_document(
    conn: &mut SqliteConnection,
    source: &dyn DocumentSource,
    origin: &str,
    report: &mut PassReport,
) -> Result<DocumentStats> {
    let bytes = source.read(origin).await?;

    let ctx = DocumentContext {
        populate_links: !schema::is_link_table_populated(conn).await?,
    };

    report.advance(PassState::Parsing);
    let records = parse_document(&bytes, ctx.populate_links)?;
    log::debug!(
        "{}: parsed {} record(s), populate_links={}",
        origin,
        records.len(),
        ctx.populate_links
    );

    report.advance(PassState::Writing);
    write_records(conn, records, ctx).await
}

/// Writes parsed records. Duplicate captures are logged and counted; any
/// other rejection aborts the document.
pub async fn write_records(
    conn: &mut SqliteConnection,
    records: impl IntoIterator<Item = CaptureRecord>,
    ctx: DocumentContext,
) -> Result<DocumentStats> {
    let mut stats = DocumentStats::default();

    for record in records {
        stats.records += 1;

        if ctx.populate_links {
            if let Some(attrs) = record.new_link {
                insert_link(conn, record.link(), attrs).await?;
                stats.links_inserted += 1;
            }
        }

        match insert_capture(conn, &record.capture).await? {
            CaptureOutcome::Inserted => stats.captures_inserted += 1,
            CaptureOutcome::Duplicate => stats.duplicate_captures += 1,
        }
    }

    Ok(stats)
}

pub async fn insert_link(
    conn: &mut SqliteConnection,
    link: LinkKey,
    attrs: LinkAttributes,
) -> Result<()> {
    let result = sqlx::query(
        "INSERT INTO link (start_id, end_id, region, road_type) VALUES (?, ?, ?, ?)",
    )
    .bind(link.start)
    .bind(link.end)
    .bind(attrs.region.code())
    .bind(attrs.road_type.code())
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) => match constraint_kind(&e) {
            Some(ErrorKind::UniqueViolation) => Err(IngestError::DuplicateLink {
                start: link.start,
                end: link.end,
            }),
            Some(ErrorKind::CheckViolation) => Err(IngestError::SchemaViolation(format!(
                "link {} rejected (region {}, road type {}): {}",
                link,
                attrs.region,
                attrs.road_type,
                e
            ))),
            _ => Err(e.into()),
        },
    }
}

/// Appends a capture. A primary-key collision is reported as
/// [`CaptureOutcome::Duplicate`] and logged with the full row.
pub async fn insert_capture(
    conn: &mut SqliteConnection,
    capture: &Capture,
) -> Result<CaptureOutcome> {
    let result = sqlx::query(
        "INSERT INTO capture (link_start, link_end, saturation, speed, captured_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(capture.link.start)
    .bind(capture.link.end)
    .bind(capture.saturation.code())
    .bind(capture.speed)
    .bind(&capture.captured_at)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(CaptureOutcome::Inserted),
        Err(e) => match constraint_kind(&e) {
            Some(ErrorKind::UniqueViolation) => {
                log::error!(
                    target: DUPLICATES_TARGET,
                    "duplicate capture rejected: {} {}",
                    e,
                    capture
                );
                Ok(CaptureOutcome::Duplicate)
            }
            Some(ErrorKind::CheckViolation) => Err(IngestError::SchemaViolation(format!(
                "capture {} rejected: {}",
                capture, e
            ))),
            _ => Err(e.into()),
        },
    }
}

fn constraint_kind(e: &sqlx::Error) -> Option<ErrorKind> {
    e.as_database_error().map(|db| db.kind())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::Token;
    use tempfile::TempDir;

    fn capture(start: i64, end: i64, date: &str) -> Capture {
        Capture {
            link: LinkKey { start, end },
            saturation: Token::TrafficAverage,
            speed: 31.0,
            captured_at: date.to_string(),
        }
    }

    async fn open() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(&tmp.path().join("store.sqlite")).await.unwrap();
        let mut conn = store.pool().acquire().await.unwrap();
        schema::ensure_schema(&mut conn).await.unwrap();
        drop(conn);
        (tmp, store)
    }

    #[tokio::test]
    async fn test_duplicate_capture_is_an_outcome_not_an_error() {
        let (_tmp, store) = open().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let c = capture(1, 2, "2020-01-01T00:00:00");
        assert_eq!(
            insert_capture(&mut conn, &c).await.unwrap(),
            CaptureOutcome::Inserted
        );
        assert_eq!(
            insert_capture(&mut conn, &c).await.unwrap(),
            CaptureOutcome::Duplicate
        );

        let other_time = capture(1, 2, "2020-01-01T00:05:00");
        assert_eq!(
            insert_capture(&mut conn, &other_time).await.unwrap(),
            CaptureOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn test_link_inserted_twice_is_fatal() {
        let (_tmp, store) = open().await;
        let mut conn = store.pool().acquire().await.unwrap();
        let key = LinkKey { start: 1, end: 2 };
        let attrs = LinkAttributes {
            region: Token::Tm,
            road_type: Token::UrbanRoad,
        };

        insert_link(&mut conn, key, attrs).await.unwrap();
        assert!(matches!(
            insert_link(&mut conn, key, attrs).await,
            Err(IngestError::DuplicateLink { start: 1, end: 2 })
        ));
    }

    #[tokio::test]
    async fn test_out_of_partition_codes_are_schema_violations() {
        let (_tmp, store) = open().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let wrong_road_type = LinkAttributes {
            region: Token::Hk,
            road_type: Token::Kowloon,
        };
        assert!(matches!(
            insert_link(&mut conn, LinkKey { start: 1, end: 2 }, wrong_road_type).await,
            Err(IngestError::SchemaViolation(_))
        ));

        let mut wrong_saturation = capture(1, 2, "d");
        wrong_saturation.saturation = Token::MajorRoute;
        assert!(matches!(
            insert_capture(&mut conn, &wrong_saturation).await,
            Err(IngestError::SchemaViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_write_records_skips_links_when_not_populating() {
        let (_tmp, store) = open().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let record = CaptureRecord {
            new_link: Some(LinkAttributes {
                region: Token::Hk,
                road_type: Token::MajorRoute,
            }),
            capture: capture(5, 6, "d"),
        };
        let stats = write_records(
            &mut conn,
            vec![record],
            DocumentContext {
                populate_links: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(stats.links_inserted, 0);
        assert_eq!(stats.captures_inserted, 1);
        assert!(!schema::is_link_table_populated(&mut conn).await.unwrap());
    }
}
