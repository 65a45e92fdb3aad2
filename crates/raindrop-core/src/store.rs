use crate::error::Result;
use crate::slot::WorkerSlot;
use crate::time_unit::TimeUnit;
use async_trait::async_trait;
use jiff::Timestamp;

/// Access to the shared worker slot table.
///
/// Every mutation is an optimistic compare-and-swap on `version`: an update
/// applies only when exactly one row with the given `id` and
/// `expected_version` exists. A non-applied update is reported as
/// `Ok(None)`, never as an error, so callers can tell a lost race apart from
/// a broken backend.
#[async_trait]
pub trait SlotStore: Send + Sync + 'static {
    /// Returns the store's current time.
    async fn now(&self) -> Result<Timestamp>;

    /// Checks whether the slot table has been created.
    async fn table_exists(&self) -> Result<bool>;

    /// Creates the slot table if needed and inserts one row per id in
    /// `begin_id..=end_id` in a single transaction.
    async fn provision_slots(&self, begin_id: i64, end_id: i64) -> Result<()>;

    /// Finds the lowest-id live slot last leased by `owner_code`.
    async fn find_slot_by_owner(&self, owner_code: &str) -> Result<Option<WorkerSlot>>;

    /// Lists live slots whose heartbeat is older than `heartbeat_before`,
    /// oldest heartbeat first.
    async fn find_free_slots(&self, heartbeat_before: Timestamp) -> Result<Vec<WorkerSlot>>;

    /// Hands slot `id` to `owner_code` if its version is still
    /// `expected_version`.
    async fn activate_slot(
        &self,
        id: i64,
        owner_code: &str,
        time_unit: TimeUnit,
        expected_version: i64,
    ) -> Result<Option<WorkerSlot>>;

    /// Refreshes the heartbeat of slot `id` if its version is still
    /// `expected_version`.
    async fn renew_slot(&self, id: i64, expected_version: i64) -> Result<Option<WorkerSlot>>;

    /// Point lookup of a live slot.
    async fn get_slot(&self, id: i64) -> Result<Option<WorkerSlot>>;
}
