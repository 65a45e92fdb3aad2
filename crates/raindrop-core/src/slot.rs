use crate::time_unit::TimeUnit;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A persisted worker slot.
///
/// The `id` is the worker id embedded in every ID minted by the process that
/// currently leases the slot. Ownership is proven by a recent
/// `heartbeat_time` and defended by `version`: every mutation is a
/// compare-and-swap on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSlot {
    pub id: i64,
    /// Identity of the leasing process, empty for a never-leased slot.
    pub owner_code: String,
    pub time_unit: TimeUnit,
    pub heartbeat_time: Timestamp,
    pub create_time: Timestamp,
    pub update_time: Timestamp,
    pub version: i64,
    pub deleted: bool,
}

impl WorkerSlot {
    /// Returns a never-leased slot as written by provisioning.
    pub fn provisioned(id: i64, now: Timestamp) -> Self {
        Self {
            id,
            owner_code: String::new(),
            time_unit: TimeUnit::default(),
            heartbeat_time: Timestamp::UNIX_EPOCH,
            create_time: now,
            update_time: now,
            version: 1,
            deleted: false,
        }
    }

    /// Whether the slot can be handed out when heartbeats older than
    /// `heartbeat_before` are considered dead.
    pub fn is_free(&self, heartbeat_before: Timestamp) -> bool {
        !self.deleted && self.heartbeat_time < heartbeat_before
    }
}
