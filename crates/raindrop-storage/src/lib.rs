//! Slot store backends.
//!
//! [`MySqlSlotStore`] and [`PostgresSlotStore`] persist the worker table in a
//! shared database. [`InMemorySlotStore`] keeps it in process memory for
//! tests and single-instance deployments.

mod convert;
pub mod error;
pub mod memory;
pub mod mysql;
pub mod postgres;

pub use memory::InMemorySlotStore;
pub use mysql::MySqlSlotStore;
pub use postgres::PostgresSlotStore;
pub use raindrop_core::{Result, SlotStore, StorageError, TimeUnit, WorkerSlot};

/// Table used when no name is configured.
pub const DEFAULT_TABLE_NAME: &str = "raindrop_worker";

/// Index names are `idx_{table}_heartbeat_time`, 19 characters longer than
/// the table name, and must stay within PostgreSQL's 63 character limit.
pub const MAX_TABLE_NAME_LEN: usize = 44;

/// Checks that `name` is safe to splice into SQL as an identifier.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*`, at most [`MAX_TABLE_NAME_LEN`]
/// characters.
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_head || !valid_tail || name.len() > MAX_TABLE_NAME_LEN {
        return Err(StorageError::InvalidData(format!(
            "invalid table name '{name}': expected [A-Za-z_][A-Za-z0-9_]{{0,43}}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_table_name(DEFAULT_TABLE_NAME).is_ok());
        assert!(validate_table_name("_worker2").is_ok());
        assert!(validate_table_name(&"a".repeat(MAX_TABLE_NAME_LEN)).is_ok());
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2worker").is_err());
        assert!(validate_table_name("worker; DROP TABLE x").is_err());
        assert!(validate_table_name("work-er").is_err());
        assert!(validate_table_name(&"a".repeat(MAX_TABLE_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn index_names_fit_identifier_limits() {
        let longest = "t".repeat(MAX_TABLE_NAME_LEN);
        for ddl in [
            include_str!("../ddl/mysql/raindrop_worker.sql"),
            include_str!("../ddl/postgres/raindrop_worker.sql"),
        ] {
            let ddl = ddl.replace("{table}", &longest);
            for name in ddl
                .split(|c| c == '`' || c == '"')
                .filter(|word| word.starts_with("idx_") || word.starts_with("pk_"))
            {
                // 63 for PostgreSQL, 64 for MySQL
                assert!(name.len() <= 63, "identifier {name} is too long");
            }
        }
    }
}
