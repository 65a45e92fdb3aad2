use crate::config::RaindropConfig;
use crate::error::{RaindropError, Result};
use crate::heartbeat::{Heartbeat, HeartbeatStats};
use crate::identity::NodeIdentity;
use crate::lease::{LeasePolicy, SlotLeaser};
use jiff::{SignedDuration, Timestamp};
use parking_lot::{Mutex, RwLock};
use raindrop_core::{SlotStore, TimeUnit, WorkerSlot};
use raindrop_flake::{Clock, EncoderSettings, IdEncoder, IdParts, SystemClock, TickCell, TickDriver};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A running ID generator bound to one leased worker slot.
///
/// Owns the lease, the tick driver, the encoder and the heartbeat loop.
/// Dropping it stops both background loops; [`Raindrop::shutdown`] does the
/// same and also waits for them.
pub struct Raindrop {
    config: RaindropConfig,
    identity: NodeIdentity,
    encoder: IdEncoder,
    slot: Arc<RwLock<WorkerSlot>>,
    token: CancellationToken,
    driver: Mutex<Option<TickDriver>>,
    heartbeat: Mutex<Option<Heartbeat>>,
    heartbeat_stats: Arc<HeartbeatStats>,
}

impl Raindrop {
    /// Starts a generator against `store` using the system clock.
    pub async fn initialize(config: RaindropConfig, store: Arc<dyn SlotStore>) -> Result<Self> {
        Self::initialize_with_clock(config, store, SystemClock).await
    }

    /// Starts a generator whose ticks follow `clock`.
    ///
    /// Fails on an invalid configuration, an epoch ahead of `clock`, an
    /// unreachable store, a clock skew beyond `max_clock_skew` or when no
    /// slot is free.
    pub async fn initialize_with_clock<C: Clock>(
        config: RaindropConfig,
        store: Arc<dyn SlotStore>,
        clock: C,
    ) -> Result<Self> {
        config.validate_at(clock.now())?;
        let layout = config.layout()?;
        let identity = NodeIdentity::detect(config.host_ip, config.service_port, config.time_unit)?;

        check_clock_skew(store.as_ref(), &clock, &config).await?;

        if !store.table_exists().await? {
            store
                .provision_slots(config.min_worker_id, config.max_worker_id)
                .await?;
        }

        let leaser = SlotLeaser::new(
            Arc::clone(&store),
            LeasePolicy {
                heartbeat_interval: config.heartbeat_interval,
                prefer_own_slot: config.prefer_own_slot,
                worker_ids: 0..=layout.max_worker_id(),
            },
        );
        let slot = leaser.acquire(&identity).await?;

        let token = CancellationToken::new();
        let cell = TickCell::default();
        let driver = TickDriver::start(
            clock,
            config.start_time,
            config.time_unit,
            cell.clone(),
            token.child_token(),
        )?;

        let encoder = IdEncoder::new(
            EncoderSettings::builder()
                .layout(layout)
                .worker_id(slot.id)
                .time_unit(config.time_unit)
                .reserved_value(config.reserved_value)
                .max_namespaces(config.max_namespaces)
                .build(),
            cell,
        )?
        .with_cancellation(token.child_token());

        info!(
            worker_id = slot.id,
            owner_code = %identity,
            time_unit = %config.time_unit,
            timestamp_bits = layout.timestamp_bits(),
            worker_id_bits = layout.worker_id_bits(),
            sequence_bits = layout.sequence_bits(),
            reserved_bits = layout.reserved_bits(),
            start_time = %config.start_time,
            "raindrop initialized"
        );

        let slot = Arc::new(RwLock::new(slot));
        let heartbeat = Heartbeat::spawn(
            leaser,
            Arc::clone(&slot),
            config.heartbeat_interval,
            token.child_token(),
        );
        let heartbeat_stats = Arc::clone(heartbeat.stats());

        Ok(Self {
            config,
            identity,
            encoder,
            slot,
            token,
            driver: Mutex::new(Some(driver)),
            heartbeat: Mutex::new(Some(heartbeat)),
            heartbeat_stats,
        })
    }

    /// Next ID of the global namespace.
    pub fn new_id(&self) -> Result<i64> {
        self.ensure_running()?;
        Ok(self.encoder.next_id()?)
    }

    /// Next ID of the namespace `code`. Different codes are independent ID
    /// spaces and may return equal values.
    ///
    /// A code beyond `max_namespaces` distinct ones is refused.
    pub fn new_id_for(&self, code: &str) -> Result<i64> {
        self.ensure_running()?;
        Ok(self.encoder.next_id_for(code)?)
    }

    /// Splits an ID minted by this generator's layout.
    pub fn decode(&self, id: i64) -> IdParts {
        self.encoder.decode(id)
    }

    /// Wall-clock start of the tick `parts` was minted in.
    pub fn timestamp_of(&self, parts: &IdParts) -> Option<Timestamp> {
        parts.timestamp(self.config.start_time, self.config.time_unit)
    }

    pub fn worker_id(&self) -> i64 {
        self.encoder.worker_id()
    }

    /// Latest known state of the leased slot.
    pub fn worker_slot(&self) -> WorkerSlot {
        self.slot.read().clone()
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn config(&self) -> &RaindropConfig {
        &self.config
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.config.time_unit
    }

    pub fn current_tick(&self) -> i64 {
        self.encoder.current_tick()
    }

    pub fn heartbeat_stats(&self) -> &HeartbeatStats {
        &self.heartbeat_stats
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stops the tick driver and the heartbeat loop and waits for both.
    ///
    /// IDs requested afterwards fail with [`RaindropError::Stopped`]. The
    /// slot is not released; it frees up once its heartbeat ages out.
    pub async fn shutdown(&self) {
        self.token.cancel();

        let driver = self.driver.lock().take();
        if let Some(mut driver) = driver {
            driver.stop();
        }
        let heartbeat = self.heartbeat.lock().take();
        if let Some(mut heartbeat) = heartbeat {
            heartbeat.stop().await;
        }
        info!(worker_id = self.worker_id(), "raindrop stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(RaindropError::Stopped);
        }
        Ok(())
    }
}

impl Drop for Raindrop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn check_clock_skew<C: Clock>(
    store: &dyn SlotStore,
    clock: &C,
    config: &RaindropConfig,
) -> Result<()> {
    let store_now = store.now().await?;
    let skew = store_now.duration_since(clock.now());
    let max_skew = SignedDuration::try_from(config.max_clock_skew)
        .map_err(|e| RaindropError::Configuration(format!("invalid max_clock_skew: {e}")))?;

    if skew.abs() > max_skew {
        return Err(RaindropError::ClockSkew { skew, max_skew });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use raindrop_flake::ManualClock;
    use raindrop_storage::InMemorySlotStore;
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn config(port: u16) -> RaindropConfig {
        RaindropConfig::builder()
            .service_port(port)
            .host_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .build()
    }

    #[tokio::test]
    async fn provisions_and_mints_ids() {
        let store = Arc::new(InMemorySlotStore::new());
        let raindrop = Raindrop::initialize(config(8080), store.clone()).await.unwrap();

        assert_eq!(store.slots().len(), 15);
        let slot = raindrop.worker_slot();
        assert_eq!(slot.id, raindrop.worker_id());
        assert_eq!(slot.owner_code, raindrop.identity().owner_code());

        let first = raindrop.new_id().unwrap();
        let second = raindrop.new_id().unwrap();
        assert!(second > first);

        let parts = raindrop.decode(first);
        assert_eq!(parts.worker_id, slot.id);
        assert_eq!(parts.reserved, 0);

        raindrop.shutdown().await;
    }

    #[tokio::test]
    async fn first_ids_match_reference_layout() {
        let start = Timestamp::now() - SignedDuration::from_hours(1);
        let clock = ManualClock::new(start);
        // align the store clock with the manual clock
        let store = Arc::new(InMemorySlotStore::with_clock_skew(
            start.duration_since(Timestamp::now()),
        ));
        store.provision_slots(10, 10).await.unwrap();

        let config = RaindropConfig::builder()
            .service_port(8080)
            .host_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .start_time(start)
            .timestamp_bits(31)
            .build();
        let raindrop = Raindrop::initialize_with_clock(config, store, clock)
            .await
            .unwrap();

        assert_eq!(raindrop.worker_id(), 10);
        assert_eq!(raindrop.new_id().unwrap(), 10 << 28);
        assert_eq!(raindrop.new_id().unwrap(), (10 << 28) | 1);
        raindrop.shutdown().await;
    }

    #[tokio::test]
    async fn namespaces_are_independent() {
        let store = Arc::new(InMemorySlotStore::new());
        let raindrop = Raindrop::initialize(config(8080), store).await.unwrap();

        let a: Vec<i64> = (0..50).map(|_| raindrop.new_id_for("a").unwrap()).collect();
        let b: Vec<i64> = (0..50).map(|_| raindrop.new_id_for("b").unwrap()).collect();
        assert_eq!(a.iter().collect::<HashSet<_>>().len(), 50);
        assert_eq!(b.iter().collect::<HashSet<_>>().len(), 50);
        raindrop.shutdown().await;
    }

    #[tokio::test]
    async fn instances_lease_distinct_slots() {
        let store: Arc<dyn SlotStore> = Arc::new(InMemorySlotStore::new());
        let one = Raindrop::initialize(config(1), Arc::clone(&store)).await.unwrap();
        let two = Raindrop::initialize(config(2), Arc::clone(&store)).await.unwrap();
        assert_ne!(one.worker_id(), two.worker_id());
        one.shutdown().await;
        two.shutdown().await;
    }

    #[tokio::test]
    async fn runs_out_of_slots() {
        let store: Arc<dyn SlotStore> = Arc::new(InMemorySlotStore::new());
        let narrow = |port| {
            RaindropConfig::builder()
                .service_port(port)
                .host_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .max_worker_id(2)
                .build()
        };

        let one = Raindrop::initialize(narrow(1), Arc::clone(&store)).await.unwrap();
        let two = Raindrop::initialize(narrow(2), Arc::clone(&store)).await.unwrap();
        let three = Raindrop::initialize(narrow(3), Arc::clone(&store)).await;
        assert!(matches!(three, Err(RaindropError::NoSlotAvailable)));
        one.shutdown().await;
        two.shutdown().await;
    }

    #[tokio::test]
    async fn rejects_clock_skew() {
        let store = Arc::new(InMemorySlotStore::with_clock_skew(SignedDuration::from_secs(
            120,
        )));
        let result = Raindrop::initialize(config(8080), store.clone()).await;
        assert!(matches!(result, Err(RaindropError::ClockSkew { .. })));
        // nothing is provisioned when startup fails early
        assert!(store.slots().is_empty());
    }

    #[tokio::test]
    async fn rejects_invalid_configuration_before_io() {
        let store = Arc::new(InMemorySlotStore::new());
        store.set_unavailable(true);
        let result = Raindrop::initialize(
            RaindropConfig::builder().service_port(0).build(),
            store,
        )
        .await;
        assert!(matches!(result, Err(RaindropError::Configuration(_))));
    }

    #[tokio::test]
    async fn unreachable_store_fails_startup() {
        let store = Arc::new(InMemorySlotStore::new());
        store.set_unavailable(true);
        let result = Raindrop::initialize(config(8080), store).await;
        assert!(matches!(result, Err(RaindropError::Storage(_))));
    }

    #[tokio::test]
    async fn shutdown_stops_minting() {
        let store = Arc::new(InMemorySlotStore::new());
        let raindrop = Raindrop::initialize(config(8080), store).await.unwrap();
        raindrop.shutdown().await;

        assert!(!raindrop.is_running());
        assert!(matches!(raindrop.new_id(), Err(RaindropError::Stopped)));
        assert!(matches!(
            raindrop.new_id_for("x"),
            Err(RaindropError::Stopped)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_releases_callers_waiting_on_an_exhausted_tick() {
        let start = Timestamp::now() - SignedDuration::from_hours(1);
        let clock = ManualClock::new(start);
        let store = Arc::new(InMemorySlotStore::with_clock_skew(
            start.duration_since(Timestamp::now()),
        ));
        // 63 - 40 - 10 - 1 - 5 leaves 7 sequence bits
        let config = RaindropConfig::builder()
            .service_port(8080)
            .host_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .start_time(start)
            .timestamp_bits(40)
            .worker_id_bits(10)
            .reserved_bits(5)
            .build();
        let raindrop = Arc::new(
            Raindrop::initialize_with_clock(config, store, clock.clone())
                .await
                .unwrap(),
        );

        for _ in 0..128 {
            raindrop.new_id().unwrap();
        }
        let waiter = {
            let raindrop = Arc::clone(&raindrop);
            tokio::task::spawn_blocking(move || raindrop.new_id())
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        raindrop.shutdown().await;
        clock.advance(SignedDuration::from_secs(10));

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should return after shutdown")
            .unwrap();
        assert!(matches!(result, Err(RaindropError::Stopped)));
    }

    #[tokio::test]
    async fn future_start_time_is_a_clock_error() {
        let store = Arc::new(InMemorySlotStore::new());
        let config = RaindropConfig::builder()
            .service_port(8080)
            .host_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .start_time(Timestamp::now() + SignedDuration::from_hours(1))
            .build();

        let result = Raindrop::initialize(config, store.clone()).await;
        let err = result.err().unwrap();
        assert!(err.is_clock_error());
        assert!(matches!(err, RaindropError::EpochAhead { .. }));
        assert!(store.slots().is_empty());
    }

    #[tokio::test]
    async fn refuses_codes_beyond_the_namespace_limit() {
        let store = Arc::new(InMemorySlotStore::new());
        let config = RaindropConfig::builder()
            .service_port(8080)
            .host_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .max_namespaces(3)
            .build();
        let raindrop = Raindrop::initialize(config, store).await.unwrap();

        for code in ["a", "b", "c"] {
            raindrop.new_id_for(code).unwrap();
        }
        assert!(matches!(
            raindrop.new_id_for("d"),
            Err(RaindropError::Flake(raindrop_flake::Error::TooManyNamespaces { max: 3 }))
        ));
        raindrop.new_id_for("a").unwrap();
        raindrop.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn heartbeat_keeps_the_slot_fresh() {
        let store = Arc::new(InMemorySlotStore::new());
        let config = RaindropConfig::builder()
            .service_port(8080)
            .host_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .heartbeat_interval(Duration::from_millis(50))
            .build();
        let raindrop = Raindrop::initialize(config, store.clone()).await.unwrap();
        let leased = raindrop.worker_slot();

        awaitility::at_most(Duration::from_secs(5))
            .poll_interval(Duration::from_millis(10))
            .until(|| raindrop.heartbeat_stats().renewals() >= 2);

        let current = raindrop.worker_slot();
        assert!(current.version >= leased.version + 2);
        assert!(current.heartbeat_time >= leased.heartbeat_time);
        raindrop.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_get_distinct_ids() {
        let store = Arc::new(InMemorySlotStore::new());
        let config = RaindropConfig::builder()
            .service_port(8080)
            .host_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .time_unit(TimeUnit::Millisecond)
            .build();
        let raindrop = Arc::new(Raindrop::initialize(config, store).await.unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let raindrop = Arc::clone(&raindrop);
                tokio::task::spawn_blocking(move || {
                    (0..5_000)
                        .map(|_| raindrop.new_id().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 20_000);
        raindrop.shutdown().await;
    }
}
