use jiff::Timestamp;
use raindrop_core::{Result, StorageError, TimeUnit};

/// Timestamps are stored as milliseconds since the Unix epoch.
pub(crate) fn timestamp_from_millis(column: &str, value: i64) -> Result<Timestamp> {
    Timestamp::from_millisecond(value).map_err(|e| {
        StorageError::InvalidData(format!("invalid {column} timestamp '{value}': {e}"))
    })
}

pub(crate) fn time_unit_from_code(value: i64) -> Result<TimeUnit> {
    TimeUnit::from_code(value)
        .ok_or_else(|| StorageError::InvalidData(format!("invalid time_unit code '{value}'")))
}

pub(crate) fn check_range(begin_id: i64, end_id: i64) -> Result<()> {
    if end_id < begin_id {
        return Err(StorageError::InvalidRange {
            begin: begin_id,
            end: end_id,
        });
    }
    Ok(())
}
