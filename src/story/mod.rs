pub mod context;
pub mod emotion;
pub mod history;
pub mod lifecycle;
pub mod memory;
pub mod names;
pub mod registry;
pub mod relations;
pub mod scene;
pub mod stats;
pub mod types;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_MICROS: AtomicI64 = AtomicI64::new(0);

/// Current time as fixed-width RFC 3339 (microseconds, `Z`), so that string
/// ordering in SQL matches chronological ordering. Strictly increasing within
/// a process: two calls in the same microsecond yield distinct values.
pub fn timestamp() -> String {
    let now = Utc::now().timestamp_micros();
    let mut last = LAST_MICROS.load(Ordering::Relaxed);
    let micros = loop {
        let next = now.max(last + 1);
        match LAST_MICROS.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break next,
            Err(actual) => last = actual,
        }
    };
    DateTime::<Utc>::from_timestamp_micros(micros)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Time-sortable identifier for every story row.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Write an entry to the story_log audit table.
pub(crate) fn write_story_log(
    conn: &Connection,
    operation: &str,
    subject_id: &str,
    details: Option<&serde_json::Value>,
) -> rusqlite::Result<()> {
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO story_log (operation, subject_id, details, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![operation, subject_id, details_json, timestamp()],
    )?;
    Ok(())
}

/// Wrap a column decoding failure so it surfaces as a rusqlite error.
pub(crate) fn conversion_error(
    column: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_fixed_width_and_ordered() {
        let a = timestamp();
        let b = timestamp();
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert!(a.ends_with('Z'));
    }
}
