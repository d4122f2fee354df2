//! Speed-map XML parsing.
//!
//! A document is a root element holding a flat list of record elements. Each
//! record carries its fields as direct children in the feed namespace:
//!
//! ```text
//! <jtis_speedlist xmlns="http://data.one.gov.hk/td">
//!   <jtis_speedmap>
//!     <LINK_ID>3001-30011</LINK_ID>
//!     <REGION>K</REGION>
//!     <ROAD_TYPE>MAJOR ROUTE</ROAD_TYPE>
//!     <ROAD_SATURATION_LEVEL>TRAFFIC GOOD</ROAD_SATURATION_LEVEL>
//!     <TRAFFIC_SPEED>45</TRAFFIC_SPEED>
//!     <CAPTURE_DATE>2020-01-01T00:00:00</CAPTURE_DATE>
//!   </jtis_speedmap>
//! </jtis_speedlist>
//! ```
//!
//! Parsing is all-or-nothing: the first bad record fails the document and no
//! records are handed out.

use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;

use crate::error::{IngestError, Result};
use crate::models::{Capture, CaptureRecord, LinkAttributes, LinkKey};
use crate::vocab::Token;

/// Namespace every record field must be bound to.
pub const FEED_NAMESPACE: &[u8] = b"http://data.one.gov.hk/td";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    LinkId,
    Region,
    RoadType,
    SaturationLevel,
    Speed,
    CaptureDate,
}

impl Field {
    const COUNT: usize = 6;

    fn from_local_name(name: &[u8]) -> Option<Field> {
        match name {
            b"LINK_ID" => Some(Field::LinkId),
            b"REGION" => Some(Field::Region),
            b"ROAD_TYPE" => Some(Field::RoadType),
            b"ROAD_SATURATION_LEVEL" => Some(Field::SaturationLevel),
            b"TRAFFIC_SPEED" => Some(Field::Speed),
            b"CAPTURE_DATE" => Some(Field::CaptureDate),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Field::LinkId => "LINK_ID",
            Field::Region => "REGION",
            Field::RoadType => "ROAD_TYPE",
            Field::SaturationLevel => "ROAD_SATURATION_LEVEL",
            Field::Speed => "TRAFFIC_SPEED",
            Field::CaptureDate => "CAPTURE_DATE",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Field texts of one record element. The first occurrence of a field wins.
#[derive(Debug, Default)]
struct RawRecord {
    values: [Option<String>; Field::COUNT],
}

impl RawRecord {
    /// Marks `field` as present; returns false if it was already seen.
    fn open(&mut self, field: Field) -> bool {
        let slot = &mut self.values[field.slot()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(String::new());
        true
    }

    fn append(&mut self, field: Field, text: &str) {
        if let Some(value) = self.values[field.slot()].as_mut() {
            value.push_str(text);
        }
    }

    fn required(&self, field: Field, index: usize) -> Result<&str> {
        match self.values[field.slot()].as_deref() {
            Some(value) if !value.is_empty() => Ok(value),
            Some(_) => Err(IngestError::MalformedRecord {
                index,
                reason: format!("{} is empty", field.name()),
            }),
            None => Err(IngestError::MalformedRecord {
                index,
                reason: format!("{} is missing", field.name()),
            }),
        }
    }

    fn token(&self, field: Field, index: usize) -> Result<Token> {
        let label = self.required(field, index)?;
        Token::from_label(label).ok_or_else(|| IngestError::UnknownToken {
            index,
            field: field.name(),
            value: label.to_string(),
        })
    }
}

/// The records of one document, handed out once.
#[derive(Debug, Default)]
pub struct ParsedDocument {
    records: Vec<CaptureRecord>,
}

impl ParsedDocument {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl IntoIterator for ParsedDocument {
    type Item = CaptureRecord;
    type IntoIter = std::vec::IntoIter<CaptureRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// Parses one speed-map document.
///
/// `populate_links` decides whether `REGION` and `ROAD_TYPE` are resolved
/// into [`LinkAttributes`]. When false those fields are not required.
pub fn parse_document(bytes: &[u8], populate_links: bool) -> Result<ParsedDocument> {
    let mut reader = NsReader::from_reader(bytes);
    let mut buf = Vec::new();

    let mut depth = 0usize;
    let mut saw_root = false;
    let mut current: Option<RawRecord> = None;
    let mut active: Option<Field> = None;
    let mut records = Vec::new();

    loop {
        let (ns, event) = reader
            .read_resolved_event_into(&mut buf)
            .map_err(|e| IngestError::MalformedDocument(e.to_string()))?;
        let in_feed = matches!(ns, ResolveResult::Bound(Namespace(n)) if n == FEED_NAMESPACE);

        match event {
            Event::Start(e) => {
                if depth == 0 && saw_root {
                    return Err(trailing_content());
                }
                depth += 1;
                match depth {
                    1 => saw_root = true,
                    2 => current = Some(RawRecord::default()),
                    3 => {
                        active = None;
                        if let (true, Some(field), Some(raw)) = (
                            in_feed,
                            Field::from_local_name(e.local_name().as_ref()),
                            current.as_mut(),
                        ) {
                            if raw.open(field) {
                                active = Some(field);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => match depth + 1 {
                1 if saw_root => return Err(trailing_content()),
                1 => saw_root = true,
                2 => {
                    let index = records.len();
                    records.push(normalize(RawRecord::default(), index, populate_links)?);
                }
                3 => {
                    if let (true, Some(field), Some(raw)) = (
                        in_feed,
                        Field::from_local_name(e.local_name().as_ref()),
                        current.as_mut(),
                    ) {
                        raw.open(field);
                    }
                }
                _ => {}
            },
            Event::Text(t) if depth == 0 => {
                if !is_blank(&t) {
                    return Err(IngestError::MalformedDocument(
                        "text outside the root element".to_string(),
                    ));
                }
            }
            Event::CData(_) if depth == 0 => {
                return Err(IngestError::MalformedDocument(
                    "text outside the root element".to_string(),
                ));
            }
            Event::Text(t) if depth == 3 => {
                if let (Some(field), Some(raw)) = (active, current.as_mut()) {
                    let text = t
                        .unescape()
                        .map_err(|e| IngestError::MalformedDocument(e.to_string()))?;
                    raw.append(field, &text);
                }
            }
            Event::CData(c) if depth == 3 => {
                if let (Some(field), Some(raw)) = (active, current.as_mut()) {
                    let inner = c.into_inner();
                    let text = std::str::from_utf8(&inner)
                        .map_err(|e| IngestError::MalformedDocument(e.to_string()))?;
                    raw.append(field, text);
                }
            }
            Event::End(_) => {
                match depth {
                    3 => active = None,
                    2 => {
                        if let Some(raw) = current.take() {
                            let index = records.len();
                            records.push(normalize(raw, index, populate_links)?);
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(IngestError::MalformedDocument(
            "document has no root element".to_string(),
        ));
    }
    if depth != 0 {
        return Err(IngestError::MalformedDocument(
            "document ends inside an open element".to_string(),
        ));
    }

    Ok(ParsedDocument { records })
}

fn trailing_content() -> IngestError {
    IngestError::MalformedDocument("content after the root element".to_string())
}

/// Whitespace, or the byte-order mark some publishers prepend.
fn is_blank(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes)
        .map(|s| s.chars().all(|c| c.is_whitespace() || c == '\u{feff}'))
        .unwrap_or(false)
}

fn normalize(raw: RawRecord, index: usize, populate_links: bool) -> Result<CaptureRecord> {
    let link = parse_link_id(raw.required(Field::LinkId, index)?, index)?;

    let new_link = if populate_links {
        Some(LinkAttributes {
            region: raw.token(Field::Region, index)?,
            road_type: raw.token(Field::RoadType, index)?,
        })
    } else {
        None
    };

    let saturation = raw.token(Field::SaturationLevel, index)?;
    let speed = parse_speed(raw.required(Field::Speed, index)?, index)?;
    let captured_at = raw.required(Field::CaptureDate, index)?.to_string();

    Ok(CaptureRecord {
        new_link,
        capture: Capture {
            link,
            saturation,
            speed,
            captured_at,
        },
    })
}

/// Parses `"<start>-<end>"`.
fn parse_link_id(value: &str, index: usize) -> Result<LinkKey> {
    let malformed = || IngestError::MalformedRecord {
        index,
        reason: format!("LINK_ID {:?} is not <start>-<end>", value),
    };

    let parts: Vec<&str> = value.split('-').collect();
    let [start, end] = parts.as_slice() else {
        return Err(malformed());
    };
    let start = start.trim().parse::<i64>().map_err(|_| malformed())?;
    let end = end.trim().parse::<i64>().map_err(|_| malformed())?;
    Ok(LinkKey { start, end })
}

fn parse_speed(value: &str, index: usize) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(speed) if speed.is_finite() => Ok(speed),
        _ => Err(IngestError::MalformedRecord {
            index,
            reason: format!("TRAFFIC_SPEED {:?} is not a finite number", value),
        }),
    }
}
