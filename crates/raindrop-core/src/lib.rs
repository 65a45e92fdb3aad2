//! Core types and traits for the Raindrop ID generator.
//!
//! This crate provides the shared vocabulary used by the ID encoder, the
//! worker lease manager and the storage backends: the time granularity of a
//! tick, the persisted worker slot record and the store contract that every
//! backend implements.

pub mod error;
pub mod slot;
pub mod store;
pub mod time_unit;

pub use error::{Result, StorageError};
pub use slot::WorkerSlot;
pub use store::SlotStore;
pub use time_unit::TimeUnit;
