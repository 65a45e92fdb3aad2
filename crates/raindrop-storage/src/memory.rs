use crate::convert::check_range;
use async_trait::async_trait;
use dashmap::DashMap;
use jiff::{SignedDuration, Timestamp};
use raindrop_core::{Result, SlotStore, StorageError, TimeUnit, WorkerSlot};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Slot store kept in process memory.
///
/// Every mutation is a compare-and-swap on the slot version under the
/// entry's shard lock, so concurrent leasers behave as they would against a
/// database. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemorySlotStore {
    slots: DashMap<i64, WorkerSlot>,
    provisioned: AtomicBool,
    unavailable: AtomicBool,
    clock_skew: SignedDuration,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `now()` runs `skew` ahead of the local clock.
    pub fn with_clock_skew(skew: SignedDuration) -> Self {
        Self {
            clock_skew: skew,
            ..Self::default()
        }
    }

    /// Makes every subsequent call fail with [`StorageError::Unavailable`]
    /// until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Overwrites a slot's heartbeat without touching its version.
    pub fn set_heartbeat(&self, id: i64, heartbeat_time: Timestamp) -> bool {
        self.slots
            .get_mut(&id)
            .map(|mut slot| slot.heartbeat_time = heartbeat_time)
            .is_some()
    }

    /// Bumps a slot's version as if another process had written it.
    pub fn bump_version(&self, id: i64) -> bool {
        self.slots
            .get_mut(&id)
            .map(|mut slot| slot.version += 1)
            .is_some()
    }

    pub fn mark_deleted(&self, id: i64) -> bool {
        self.slots
            .get_mut(&id)
            .map(|mut slot| slot.deleted = true)
            .is_some()
    }

    /// Snapshot of every slot ordered by id, deleted ones included.
    pub fn slots(&self) -> Vec<WorkerSlot> {
        let mut slots: Vec<WorkerSlot> = self.slots.iter().map(|e| e.value().clone()).collect();
        slots.sort_by_key(|slot| slot.id);
        slots
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StorageError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }

    fn local_now(&self) -> Timestamp {
        Timestamp::now() + self.clock_skew
    }

    fn compare_and_update(
        &self,
        id: i64,
        expected_version: i64,
        update: impl FnOnce(&mut WorkerSlot),
    ) -> Option<WorkerSlot> {
        let mut slot = self.slots.get_mut(&id)?;
        if slot.deleted || slot.version != expected_version {
            return None;
        }
        update(&mut slot);
        slot.version += 1;
        Some(slot.clone())
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn now(&self) -> Result<Timestamp> {
        self.ensure_available()?;
        Ok(self.local_now())
    }

    async fn table_exists(&self) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.provisioned.load(Ordering::Acquire))
    }

    async fn provision_slots(&self, begin_id: i64, end_id: i64) -> Result<()> {
        self.ensure_available()?;
        check_range(begin_id, end_id)?;
        if self.provisioned.swap(true, Ordering::AcqRel) {
            info!("worker slots already provisioned");
            return Ok(());
        }

        let now = Timestamp::now();
        for id in begin_id..=end_id {
            self.slots
                .entry(id)
                .or_insert_with(|| WorkerSlot::provisioned(id, now));
        }
        info!(begin_id, end_id, "provisioned worker slots");
        Ok(())
    }

    async fn find_slot_by_owner(&self, owner_code: &str) -> Result<Option<WorkerSlot>> {
        self.ensure_available()?;
        Ok(self
            .slots
            .iter()
            .filter(|e| !e.deleted && e.owner_code == owner_code)
            .map(|e| e.value().clone())
            .min_by_key(|slot| slot.id))
    }

    async fn find_free_slots(&self, heartbeat_before: Timestamp) -> Result<Vec<WorkerSlot>> {
        self.ensure_available()?;
        let mut free: Vec<WorkerSlot> = self
            .slots
            .iter()
            .filter(|e| e.is_free(heartbeat_before))
            .map(|e| e.value().clone())
            .collect();
        free.sort_by_key(|slot| (slot.heartbeat_time, slot.id));
        Ok(free)
    }

    async fn activate_slot(
        &self,
        id: i64,
        owner_code: &str,
        time_unit: TimeUnit,
        expected_version: i64,
    ) -> Result<Option<WorkerSlot>> {
        self.ensure_available()?;
        let now = Timestamp::now();
        Ok(self.compare_and_update(id, expected_version, |slot| {
            slot.owner_code = owner_code.to_string();
            slot.time_unit = time_unit;
            slot.heartbeat_time = now;
            slot.update_time = now;
        }))
    }

    async fn renew_slot(&self, id: i64, expected_version: i64) -> Result<Option<WorkerSlot>> {
        self.ensure_available()?;
        let now = Timestamp::now();
        Ok(self.compare_and_update(id, expected_version, |slot| {
            slot.heartbeat_time = now;
            slot.update_time = now;
        }))
    }

    async fn get_slot(&self, id: i64) -> Result<Option<WorkerSlot>> {
        self.ensure_available()?;
        Ok(self
            .slots
            .get(&id)
            .filter(|slot| !slot.deleted)
            .map(|slot| slot.value().clone()))
    }
}
