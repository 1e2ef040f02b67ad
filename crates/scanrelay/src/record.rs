//! Scan records as written to the daily log.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column headers of every daily log, in order.
pub const HEADER: [&str; 3] = ["Barcode", "Timestamp", "Status"];

/// Wall-clock format of the Timestamp column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome tag stored alongside each barcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    /// Terminated by enter and passed the shape check.
    Success,
    /// Terminated by enter but too short.
    Invalid,
    /// Finalized by the idle timeout without an enter.
    Timeout,
    /// First record of a log recreated after corruption.
    Recovered,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Success => "SUCCESS",
            ScanStatus::Invalid => "INVALID",
            ScanStatus::Timeout => "TIMEOUT",
            ScanStatus::Recovered => "RECOVERED",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a daily log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    #[serde(rename = "Barcode")]
    pub barcode: String,
    #[serde(rename = "Timestamp", with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "Status")]
    pub status: ScanStatus,
}

impl ScanRecord {
    pub fn new(barcode: impl Into<String>, timestamp: NaiveDateTime, status: ScanStatus) -> Self {
        Self {
            barcode: barcode.into(),
            timestamp,
            status,
        }
    }

    /// Record stamped at `at`, truncated to whole seconds.
    pub fn stamped(barcode: impl Into<String>, at: NaiveDateTime, status: ScanStatus) -> Self {
        let timestamp = at.with_nanosecond(0).unwrap_or(at);
        Self::new(barcode, timestamp, status)
    }
}

mod timestamp_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn status_tags_match_column_values() {
        assert_eq!(ScanStatus::Success.to_string(), "SUCCESS");
        assert_eq!(ScanStatus::Recovered.as_str(), "RECOVERED");
        let parsed: ScanStatus = serde_json::from_str("\"TIMEOUT\"").unwrap();
        assert_eq!(parsed, ScanStatus::Timeout);
    }

    #[test]
    fn stamped_drops_subsecond_precision() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_milli_opt(7, 5, 1, 750)
            .unwrap();
        let record = ScanRecord::stamped("ABC123", at, ScanStatus::Success);
        assert_eq!(record.timestamp.nanosecond(), 0);
        assert_eq!(record.timestamp.second(), 1);
    }

    #[test]
    fn record_serializes_as_csv_row() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(7, 5, 1)
            .unwrap();
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .serialize(ScanRecord::new("A B", ts, ScanStatus::Invalid))
            .unwrap();
        let out = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(out, "A B,2024-03-09 07:05:01,INVALID\n");
    }
}
