use crate::clock::Clock;
use crate::error::{Error, Result};
use jiff::Timestamp;
use raindrop_core::TimeUnit;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// The most recently published tick, shared between the driver and the
/// encoder. Reads never block.
#[derive(Debug, Clone, Default)]
pub struct TickCell(Arc<AtomicI64>);

impl TickCell {
    pub fn new(tick: i64) -> Self {
        Self(Arc::new(AtomicI64::new(tick)))
    }

    pub fn load(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn store(&self, tick: i64) {
        self.0.store(tick, Ordering::Release);
    }
}

/// Whole time units elapsed between `epoch` and `now`, rounded down.
///
/// Negative when `now` is before `epoch`.
pub fn tick_at(now: Timestamp, epoch: Timestamp, unit: TimeUnit) -> i64 {
    (now.as_millisecond() - epoch.as_millisecond()).div_euclid(unit.unit_millis())
}

/// Background thread that keeps a [`TickCell`] in step with a [`Clock`].
///
/// The driver runs on its own OS thread rather than an async task so that a
/// caller spinning on sequence exhaustion can never starve it.
pub struct TickDriver {
    cell: TickCell,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TickDriver {
    /// Publishes the current tick, then keeps republishing it every
    /// [`TickDriver::interval`] until `token` is cancelled.
    ///
    /// Refuses to start while the clock is still before `epoch`.
    pub fn start<C: Clock>(
        clock: C,
        epoch: Timestamp,
        unit: TimeUnit,
        cell: TickCell,
        token: CancellationToken,
    ) -> Result<Self> {
        let now = clock.now();
        if now < epoch {
            return Err(Error::EpochAhead { epoch, now });
        }
        publish(&clock, epoch, unit, &cell);

        let interval = Self::interval(unit);
        let thread_cell = cell.clone();
        let thread_token = token.clone();
        let handle = std::thread::Builder::new()
            .name("raindrop-tick".to_string())
            .spawn(move || {
                debug!(unit = %unit, ?interval, "tick driver started");
                while !thread_token.is_cancelled() {
                    std::thread::park_timeout(interval);
                    if thread_token.is_cancelled() {
                        break;
                    }
                    publish(&clock, epoch, unit, &thread_cell);
                }
                debug!("tick driver stopped");
            })
            .map_err(|e| Error::DriverSpawn(e.to_string()))?;

        Ok(Self {
            cell,
            token,
            handle: Some(handle),
        })
    }

    /// How often the driver recomputes the tick.
    pub fn interval(unit: TimeUnit) -> Duration {
        match unit {
            TimeUnit::Millisecond => Duration::from_millis(1),
            _ => Duration::from_secs(1),
        }
    }

    pub fn cell(&self) -> &TickCell {
        &self.cell
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancels the driver and waits for its thread to exit.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("tick driver thread panicked");
            }
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn publish<C: Clock>(clock: &C, epoch: Timestamp, unit: TimeUnit, cell: &TickCell) {
    let now = clock.now();
    let tick = tick_at(now, epoch, unit);
    if tick < 0 {
        // Keep the last good tick; the encoder never sees a pre-epoch value.
        error!(%now, %epoch, "clock is before the configured epoch");
        return;
    }
    cell.store(tick);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use jiff::SignedDuration;

    fn epoch() -> Timestamp {
        Timestamp::from_second(1_700_000_000).unwrap()
    }

    fn wait_for(cell: &TickCell, expected: i64) {
        for _ in 0..2_000 {
            if cell.load() == expected {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("tick never reached {expected}, last seen {}", cell.load());
    }

    #[test]
    fn tick_rounds_down_per_unit() {
        let now = epoch() + SignedDuration::from_millis(90_061_001);
        assert_eq!(tick_at(now, epoch(), TimeUnit::Millisecond), 90_061_001);
        assert_eq!(tick_at(now, epoch(), TimeUnit::Second), 90_061);
        assert_eq!(tick_at(now, epoch(), TimeUnit::Minute), 1_501);
        assert_eq!(tick_at(now, epoch(), TimeUnit::Hour), 25);
        assert_eq!(tick_at(now, epoch(), TimeUnit::Day), 1);
    }

    #[test]
    fn tick_before_epoch_is_negative() {
        let now = epoch() - SignedDuration::from_millis(1);
        assert_eq!(tick_at(now, epoch(), TimeUnit::Second), -1);
    }

    #[test]
    fn start_publishes_synchronously() {
        let clock = ManualClock::new(epoch() + SignedDuration::from_millis(42));
        let cell = TickCell::default();
        let mut driver = TickDriver::start(
            clock,
            epoch(),
            TimeUnit::Millisecond,
            cell.clone(),
            CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(cell.load(), 42);
        assert!(driver.is_running());
        driver.stop();
        assert!(!driver.is_running());
    }

    #[test]
    fn refuses_future_epoch() {
        let now = epoch() - SignedDuration::from_secs(1);
        let result = TickDriver::start(
            ManualClock::new(now),
            epoch(),
            TimeUnit::Second,
            TickCell::default(),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::EpochAhead { .. })));
    }

    #[test]
    fn driver_follows_the_clock_both_ways() {
        let clock = ManualClock::new(epoch() + SignedDuration::from_millis(100));
        let cell = TickCell::default();
        let _driver = TickDriver::start(
            clock.clone(),
            epoch(),
            TimeUnit::Millisecond,
            cell.clone(),
            CancellationToken::new(),
        )
        .unwrap();

        clock.advance(SignedDuration::from_millis(5));
        wait_for(&cell, 105);

        clock.advance(SignedDuration::from_millis(-7));
        wait_for(&cell, 98);
    }

    #[test]
    fn pre_epoch_clock_keeps_last_tick() {
        let clock = ManualClock::new(epoch() + SignedDuration::from_millis(10));
        let cell = TickCell::default();
        let _driver = TickDriver::start(
            clock.clone(),
            epoch(),
            TimeUnit::Millisecond,
            cell.clone(),
            CancellationToken::new(),
        )
        .unwrap();

        clock.set(epoch() - SignedDuration::from_secs(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cell.load(), 10);
    }

    #[test]
    fn cancelling_the_token_stops_the_thread() {
        let token = CancellationToken::new();
        let driver = TickDriver::start(
            ManualClock::new(epoch()),
            epoch(),
            TimeUnit::Second,
            TickCell::default(),
            token.clone(),
        )
        .unwrap();

        token.cancel();
        // a second-unit driver parks for up to one interval before noticing
        for _ in 0..200 {
            if !driver.is_running() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("tick driver still running after cancellation");
    }
}
