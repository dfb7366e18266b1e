use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error_handling::types::StorageError;

/// Formats a timestamp with fixed precision so that text ordering in the
/// database matches chronological ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

pub fn parse_optional_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, StorageError> {
    raw.map(parse_timestamp).transpose()
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Corrupt(e.to_string()))
}

/// Decodes a JSON column; `column` names the field in the error message.
pub fn from_json<T: DeserializeOwned>(raw: &str, column: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Corrupt(format!("{}: {}", column, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_timestamp_text_order_matches_time_order() {
        let earlier = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let later = earlier + Duration::milliseconds(1500);
        let (a, b) = (format_timestamp(earlier), format_timestamp(later));
        assert!(a < b);
        assert_eq!(a.len(), b.len());
        assert_eq!(parse_timestamp(&b).unwrap(), later);
    }

    #[test]
    fn test_corrupt_values_are_reported() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(StorageError::Corrupt(_))
        ));
        assert!(from_json::<Vec<String>>("{not json", "tags").is_err());
        assert_eq!(parse_optional_timestamp(None).unwrap(), None);
    }
}
