//! Core data models used throughout the pipeline.
//!
//! These types represent the normalized records that flow from the parser
//! into the store, and the outcomes the engine reports back.

use std::fmt;

use crate::vocab::Token;

/// Primary key of a directed road segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub start: i64,
    pub end: i64,
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Attributes used when a record creates its link row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAttributes {
    pub region: Token,
    pub road_type: Token,
}

/// One timestamped observation of a link.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub link: LinkKey,
    pub saturation: Token,
    pub speed: f64,
    /// `CAPTURE_DATE` exactly as published.
    pub captured_at: String,
}

impl fmt::Display for Capture {
    /// Renders the full row as written to the store.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}, {:?})",
            self.link.start,
            self.link.end,
            self.saturation.code(),
            self.speed,
            self.captured_at
        )
    }
}

/// A normalized record emitted by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    /// Present only when the document may create link rows.
    pub new_link: Option<LinkAttributes>,
    pub capture: Capture,
}

impl CaptureRecord {
    pub fn link(&self) -> LinkKey {
        self.capture.link
    }
}

/// Result of attempting to append one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Inserted,
    /// A capture with the same link and timestamp already exists.
    Duplicate,
}
