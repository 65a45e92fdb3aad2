//! Disposable database servers for integration tests.

mod config;
pub mod error;
pub mod mysql;
pub mod postgres;

pub use config::DatabaseConfig;
pub use error::{Result, TestInfraError};
pub use mysql::MySqlServer;
pub use postgres::PostgresServer;
