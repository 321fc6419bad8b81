//! PostgreSQL backend.
//!
//! Rows are read as `to_jsonb(table.*)` so one code path serves every
//! entity; timestamps are converted to epoch milliseconds on the way out.

mod feed;
mod pool;
mod store;

pub use feed::*;
pub use pool::*;
pub use store::*;

use serde_json::{json, Value};

/// Columns holding timestamps.
const TIMESTAMP_COLUMNS: [&str; 2] = ["created_at", "updated_at"];

/// Convert RFC 3339 timestamp columns of a row to epoch milliseconds.
/// Columns already holding numbers are left alone.
pub fn normalize_row(row: &mut Value) {
    let Some(obj) = row.as_object_mut() else {
        return;
    };
    for column in TIMESTAMP_COLUMNS {
        let millis = obj
            .get(column)
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.timestamp_millis());
        if let Some(millis) = millis {
            obj.insert(column.to_string(), json!(millis));
        }
    }
}

/// Whether `name` is safe to splice into SQL as a column identifier.
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_become_millis() {
        let mut row = json!({
            "id": "c1",
            "created_at": "2024-02-01T10:00:00.250+00:00",
            "updated_at": null,
        });
        normalize_row(&mut row);
        assert_eq!(row["created_at"], json!(1_706_781_600_250i64));
        assert_eq!(row["updated_at"], Value::Null);
    }

    #[test]
    fn numeric_timestamps_are_kept() {
        let mut row = json!({"created_at": 42});
        normalize_row(&mut row);
        assert_eq!(row["created_at"], json!(42));
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("artwork_id"));
        assert!(!is_identifier("id; drop table likes"));
        assert!(!is_identifier("1col"));
        assert!(!is_identifier(""));
    }
}
