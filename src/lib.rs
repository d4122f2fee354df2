//! # speedmap
//!
//! Ingests periodic traffic speed-map snapshots, published as XML, into a
//! SQLite store.
//!
//! Each snapshot lists road links with their region, road type, saturation
//! level, speed and capture time. The link catalog is filled from the first
//! snapshot seen; every snapshot then appends one capture per link, keyed by
//! link and capture time, so re-ingesting a snapshot is harmless.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │   Source    │──▶│   Parser    │──▶│   Ingest     │──▶│  SQLite  │
//! │  URL / FS   │   │ XML → rows  │   │  pass + tx   │   │ 3 tables │
//! └─────────────┘   └─────────────┘   └──────┬───────┘   └──────────┘
//!                                            ▼
//!                                     ┌──────────────┐
//!                                     │  Rotating    │
//!                                     │  gzip log    │
//!                                     └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`vocab`] | Closed token vocabulary |
//! | [`models`] | Core data types |
//! | [`parser`] | Speed-map XML parsing |
//! | [`db`] | Store connection and pass transaction |
//! | [`schema`] | Table creation and vocabulary seeding |
//! | [`source`] | URL, file and directory sources |
//! | [`ingest`] | Pass orchestration and writes |
//! | [`stats`] | Store summary |
//! | [`logging`] | Size-capped log file with gzip archives |
//! | [`error`] | Error taxonomy and exit codes |

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod parser;
pub mod schema;
pub mod source;
pub mod stats;
pub mod vocab;
