/**
 * EXIF record and capture-time resolution
 *
 * Resolution order:
 * 1. SubSecDateTimeOriginal (sub-second precision, offset honored if present)
 * 2. CreateDate + TimeZone (whole seconds, plus 0-999ms of jitter)
 * 3. Unresolved
 */

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime};
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const SOURCE_FILE: &str = "SourceFile";
pub const FILE_SIZE: &str = "FileSize";
pub const SUBSEC_DATE_TIME_ORIGINAL: &str = "SubSecDateTimeOriginal";
pub const CREATE_DATE: &str = "CreateDate";
pub const TIME_ZONE: &str = "TimeZone";

const SUBSEC_FORMAT_WITH_OFFSET: &str = "%Y:%m:%d %H:%M:%S%.f%:z";
const SUBSEC_FORMAT: &str = "%Y:%m:%d %H:%M:%S%.f";
const CREATE_DATE_FORMAT_WITH_OFFSET: &str = "%Y:%m:%d %H:%M:%S%:z";
const CREATE_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Upper bound (exclusive) of the jitter added to whole-second timestamps.
pub const JITTER_MS: u32 = 1000;

/// One object of the JSON array exiftool prints for `-json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, Value>,
}

impl RawRecord {
    /// String value of a field. Numbers are stringified; empty strings,
    /// nulls, arrays and objects count as absent.
    pub fn field(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn source_file(&self) -> Option<String> {
        self.field(SOURCE_FILE)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The handful of fields the organizer cares about, for dry-run output
    /// and log lines.
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            source_file: self.field(SOURCE_FILE),
            file_size: self.field(FILE_SIZE),
            sub_sec_date_time_original: self.field(SUBSEC_DATE_TIME_ORIGINAL),
            create_date: self.field(CREATE_DATE),
            time_zone: self.field(TIME_ZONE),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for RawRecord
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_sec_date_time_original: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl fmt::Display for RecordSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// Taken verbatim from `SubSecDateTimeOriginal`.
    SubSecond,
    /// Built from `CreateDate` and `TimeZone` with `jitter_ms` added.
    CreateDate { jitter_ms: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTime {
    pub timestamp: DateTime<FixedOffset>,
    pub source: CaptureSource,
}

impl CaptureTime {
    pub fn jitter_ms(&self) -> u32 {
        match self.source {
            CaptureSource::SubSecond => 0,
            CaptureSource::CreateDate { jitter_ms } => jitter_ms,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unable to fetch file creation time")]
    NoTimestamp,
    #[error("unable to parse {field} {value:?}: {source}")]
    Malformed {
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampResolver;

impl TimestampResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, record: &RawRecord) -> Result<CaptureTime, ResolveError> {
        self.resolve_with(record, &mut rand::rng())
    }

    /// Same as [`resolve`](Self::resolve) with a caller-supplied jitter source.
    pub fn resolve_with<R: Rng + ?Sized>(
        &self,
        record: &RawRecord,
        rng: &mut R,
    ) -> Result<CaptureTime, ResolveError> {
        if let Some(value) = record.field(SUBSEC_DATE_TIME_ORIGINAL) {
            let timestamp = parse_subsec(&value).map_err(|source| ResolveError::Malformed {
                field: SUBSEC_DATE_TIME_ORIGINAL,
                value,
                source,
            })?;
            return Ok(CaptureTime {
                timestamp,
                source: CaptureSource::SubSecond,
            });
        }

        if let Some(create_date) = record.field(CREATE_DATE) {
            let time_zone = record.field(TIME_ZONE);
            let timestamp = parse_create_date(&create_date, time_zone.as_deref()).map_err(
                |source| ResolveError::Malformed {
                    field: CREATE_DATE,
                    value: format!("{}{}", create_date, time_zone.unwrap_or_default()),
                    source,
                },
            )?;
            let jitter_ms = rng.random_range(0..JITTER_MS);
            debug!("CreateDate {} with {}ms jitter", timestamp, jitter_ms);
            return Ok(CaptureTime {
                timestamp: timestamp + Duration::milliseconds(i64::from(jitter_ms)),
                source: CaptureSource::CreateDate { jitter_ms },
            });
        }

        Err(ResolveError::NoTimestamp)
    }
}

fn parse_subsec(value: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    match DateTime::parse_from_str(value, SUBSEC_FORMAT_WITH_OFFSET) {
        Ok(dt) => Ok(dt),
        Err(offset_err) => NaiveDateTime::parse_from_str(value, SUBSEC_FORMAT)
            .map(|naive| naive.and_utc().fixed_offset())
            .map_err(|_| offset_err),
    }
}

fn parse_create_date(
    create_date: &str,
    time_zone: Option<&str>,
) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    match time_zone {
        Some(tz) => DateTime::parse_from_str(
            &format!("{}{}", create_date, tz),
            CREATE_DATE_FORMAT_WITH_OFFSET,
        ),
        None => NaiveDateTime::parse_from_str(create_date, CREATE_DATE_FORMAT)
            .map(|naive| naive.and_utc().fixed_offset()),
    }
}
