use crate::error::{RaindropError, Result};
use crate::identity::NodeIdentity;
use jiff::{SignedDuration, Timestamp};
use raindrop_core::{SlotStore, WorkerSlot};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Number of missed heartbeats after which a slot counts as abandoned.
pub const MISSED_HEARTBEATS: u32 = 4;

/// How a [`SlotLeaser`] picks and defends slots.
#[derive(Debug, Clone)]
pub struct LeasePolicy {
    pub heartbeat_interval: Duration,
    pub prefer_own_slot: bool,
    /// Slot ids the encoder can represent. Candidates outside are skipped.
    pub worker_ids: RangeInclusive<i64>,
}

/// Leases worker slots from a [`SlotStore`] with optimistic version checks.
#[derive(Clone)]
pub struct SlotLeaser {
    store: Arc<dyn SlotStore>,
    policy: LeasePolicy,
}

impl SlotLeaser {
    pub fn new(store: Arc<dyn SlotStore>, policy: LeasePolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn SlotStore> {
        &self.store
    }

    pub fn policy(&self) -> &LeasePolicy {
        &self.policy
    }

    /// Heartbeats strictly older than the returned instant mark a free slot.
    pub fn free_before(&self, now: Timestamp, identity: &NodeIdentity) -> Timestamp {
        let missed = self
            .policy
            .heartbeat_interval
            .saturating_mul(MISSED_HEARTBEATS);
        let missed = SignedDuration::try_from(missed).unwrap_or(SignedDuration::MAX);
        let window = missed.saturating_add(identity.time_unit().lease_grace());
        now.checked_sub(window).unwrap_or(Timestamp::MIN)
    }

    /// Leases a slot for `identity`.
    ///
    /// With `prefer_own_slot` and a millisecond or second unit, the slot
    /// already carrying this identity is tried first. Otherwise, or when
    /// that fails, free slots are tried oldest heartbeat first until one
    /// activation goes through.
    pub async fn acquire(&self, identity: &NodeIdentity) -> Result<WorkerSlot> {
        let owner_code = identity.owner_code();

        if self.policy.prefer_own_slot && identity.time_unit().is_fine_grained() {
            if let Some(own) = self.store.find_slot_by_owner(&owner_code).await? {
                if let Some(slot) = self.try_activate(&own, identity, &owner_code).await? {
                    info!(worker_id = slot.id, owner_code = %owner_code, "reclaimed own worker slot");
                    return Ok(slot);
                }
            }
        }

        let cutoff = self.free_before(Timestamp::now(), identity);
        let candidates = self.store.find_free_slots(cutoff).await?;
        debug!(candidates = candidates.len(), %cutoff, "looking for a free worker slot");

        for candidate in &candidates {
            if !self.policy.worker_ids.contains(&candidate.id) {
                warn!(
                    worker_id = candidate.id,
                    range = ?self.policy.worker_ids,
                    "skipping slot outside the representable worker id range"
                );
                continue;
            }
            if let Some(slot) = self.try_activate(candidate, identity, &owner_code).await? {
                info!(
                    worker_id = slot.id,
                    version = slot.version,
                    owner_code = %owner_code,
                    "leased worker slot"
                );
                return Ok(slot);
            }
        }

        Err(RaindropError::NoSlotAvailable)
    }

    async fn try_activate(
        &self,
        candidate: &WorkerSlot,
        identity: &NodeIdentity,
        owner_code: &str,
    ) -> Result<Option<WorkerSlot>> {
        let activated = self
            .store
            .activate_slot(
                candidate.id,
                owner_code,
                identity.time_unit(),
                candidate.version,
            )
            .await?;
        if activated.is_none() {
            debug!(
                worker_id = candidate.id,
                version = candidate.version,
                "lost the race for worker slot"
            );
        }
        Ok(activated)
    }

    /// Refreshes the heartbeat of `slot`.
    ///
    /// `Ok(None)` means the slot changed under us and was not renewed.
    pub async fn renew(&self, slot: &WorkerSlot) -> Result<Option<WorkerSlot>> {
        Ok(self.store.renew_slot(slot.id, slot.version).await?)
    }
}
