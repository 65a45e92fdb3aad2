use crate::error::{Error, Result};
use crate::layout::{BitLayout, IdParts};
use crate::tick::TickCell;
use dashmap::DashMap;
use parking_lot::Mutex;
use raindrop_core::TimeUnit;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use typed_builder::TypedBuilder;

/// Busy-spins allowed while waiting out a millisecond tick before falling
/// back to short sleeps.
const MAX_SPINS: u32 = 10_000;
const SPIN_BACKOFF: Duration = Duration::from_micros(100);
const SECOND_POLL: Duration = Duration::from_millis(10);
/// A wait for the next tick gives up after this many time units, and never
/// sooner than [`MIN_TICK_WAIT`].
const MAX_WAIT_UNITS: u64 = 3;
const MIN_TICK_WAIT: Duration = Duration::from_secs(1);

pub const DEFAULT_MAX_NAMESPACES: usize = 1024;

/// Configures an [`IdEncoder`].
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct EncoderSettings {
    pub layout: BitLayout,
    /// The leased worker slot id.
    pub worker_id: i64,
    pub time_unit: TimeUnit,
    /// Constant stamped into the reserved low bits of every ID.
    #[builder(default)]
    pub reserved_value: i64,
    /// Upper bound on distinct per-code namespaces.
    #[builder(default = DEFAULT_MAX_NAMESPACES)]
    pub max_namespaces: usize,
}

#[derive(Debug, Default)]
struct SequenceState {
    last_tick: Option<i64>,
    /// Time-back flag the namespace used at `last_tick`.
    time_back: i64,
    sequence: i64,
}

/// Mints IDs from the published tick and a leased worker id.
///
/// The global namespace and every per-code namespace own an independent
/// sequence behind their own lock. All namespaces share the worker id, the
/// tick and the time-back flag.
#[derive(Debug)]
pub struct IdEncoder {
    layout: BitLayout,
    worker_id: i64,
    time_unit: TimeUnit,
    reserved_value: i64,
    max_namespaces: usize,
    tick: TickCell,
    token: CancellationToken,
    time_back: AtomicI64,
    global: Mutex<SequenceState>,
    namespaces: DashMap<String, Arc<Mutex<SequenceState>>>,
    namespace_count: AtomicUsize,
}

impl IdEncoder {
    pub fn new(settings: EncoderSettings, tick: TickCell) -> Result<Self> {
        let layout = settings.layout;
        if settings.worker_id < 0 || settings.worker_id > layout.max_worker_id() {
            return Err(Error::InvalidWorkerId {
                worker_id: settings.worker_id,
                max_worker_id: layout.max_worker_id(),
            });
        }
        if settings.reserved_value < 0 || settings.reserved_value > layout.max_reserved_value() {
            return Err(Error::ReservedValueTooLarge {
                value: settings.reserved_value,
                reserved_bits: layout.reserved_bits(),
            });
        }

        Ok(Self {
            layout,
            worker_id: settings.worker_id,
            time_unit: settings.time_unit,
            reserved_value: settings.reserved_value,
            max_namespaces: settings.max_namespaces,
            tick,
            token: CancellationToken::new(),
            time_back: AtomicI64::new(0),
            global: Mutex::new(SequenceState::default()),
            namespaces: DashMap::new(),
            namespace_count: AtomicUsize::new(0),
        })
    }

    /// Makes callers waiting for the next tick give up with
    /// [`Error::Stopped`] once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Generates the next ID of the global namespace.
    pub fn next_id(&self) -> Result<i64> {
        let mut state = self.global.lock();
        self.generate(&mut state)
    }

    /// Generates the next ID of the namespace `code`.
    ///
    /// IDs of different codes are only unique within their own code.
    pub fn next_id_for(&self, code: &str) -> Result<i64> {
        let namespace = self.namespace(code)?;
        let mut state = namespace.lock();
        self.generate(&mut state)
    }

    pub fn layout(&self) -> &BitLayout {
        &self.layout
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// The tick the encoder currently reads.
    pub fn current_tick(&self) -> i64 {
        self.tick.load()
    }

    /// Current value of the shared clock-backward flag.
    pub fn time_back(&self) -> i64 {
        self.time_back.load(Ordering::Acquire)
    }

    /// Number of per-code namespaces created so far.
    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    pub fn decode(&self, id: i64) -> IdParts {
        self.layout.decode(id)
    }

    fn namespace(&self, code: &str) -> Result<Arc<Mutex<SequenceState>>> {
        if let Some(existing) = self.namespaces.get(code) {
            return Ok(Arc::clone(existing.value()));
        }
        // `entry` holds the shard lock, so racing callers share one state.
        match self.namespaces.entry(code.to_owned()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let max = self.max_namespaces;
                self.namespace_count
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                        (count < max).then_some(count + 1)
                    })
                    .map_err(|_| Error::TooManyNamespaces { max })?;
                Ok(Arc::clone(entry.insert(Arc::default()).value()))
            }
        }
    }

    fn generate(&self, state: &mut SequenceState) -> Result<i64> {
        let mut tick = self.tick.load();
        if tick < 0 {
            return Err(Error::ClockBeforeEpoch { tick });
        }

        let time_back = match state.last_tick {
            Some(last) if last > tick => {
                state.sequence = 0;
                self.flip_time_back(state.time_back, last, tick)
            }
            Some(last) if last == tick => {
                if state.sequence < self.layout.max_sequence() {
                    state.sequence += 1;
                } else {
                    trace!(tick, "sequence exhausted, waiting for the next tick");
                    tick = self.wait_next_tick(last)?;
                    state.sequence = 0;
                }
                if tick == last {
                    state.time_back
                } else {
                    self.time_back.load(Ordering::Acquire)
                }
            }
            _ => {
                state.sequence = 0;
                self.time_back.load(Ordering::Acquire)
            }
        };

        if tick > self.layout.max_tick() {
            return Err(Error::OverTimeLimit {
                tick,
                max_tick: self.layout.max_tick(),
            });
        }

        if state.last_tick != Some(tick) {
            state.last_tick = Some(tick);
        }
        state.time_back = time_back;

        Ok(self.layout.compose(IdParts {
            tick,
            worker_id: self.worker_id,
            time_back,
            sequence: state.sequence,
            reserved: self.reserved_value,
        }))
    }

    /// Toggles the shared flag away from the value the namespace last used.
    ///
    /// If another namespace already toggled it for the same regression the
    /// flag is adopted as-is, so the flag flips once per regression rather
    /// than once per namespace.
    fn flip_time_back(&self, used: i64, last_tick: i64, tick: i64) -> i64 {
        let flipped = used ^ 1;
        match self.time_back.compare_exchange(
            used,
            flipped,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                warn!(
                    worker_id = self.worker_id,
                    last_tick,
                    tick,
                    time_back = flipped,
                    "clock moved backwards, toggled time-back flag"
                );
            }
            Err(current) => {
                trace!(last_tick, tick, time_back = current, "time-back flag already toggled");
            }
        }
        flipped
    }

    /// Waits until the published tick moves past `last`.
    ///
    /// Gives up with [`Error::Stopped`] when the encoder is cancelled and with
    /// [`Error::SequenceExhausted`] when the tick does not advance in time.
    fn wait_next_tick(&self, last: i64) -> Result<i64> {
        let (poll, mut spins_left) = match self.time_unit {
            TimeUnit::Millisecond => (SPIN_BACKOFF, MAX_SPINS),
            TimeUnit::Second => (SECOND_POLL, 0),
            TimeUnit::Minute | TimeUnit::Hour | TimeUnit::Day => {
                return Err(Error::SequenceExhausted { tick: last });
            }
        };
        let deadline = Instant::now() + max_tick_wait(self.time_unit);

        loop {
            let tick = self.tick.load();
            if tick > last {
                return Ok(tick);
            }
            if self.token.is_cancelled() {
                return Err(Error::Stopped);
            }
            if Instant::now() >= deadline {
                warn!(
                    worker_id = self.worker_id,
                    tick = last,
                    "tick did not advance while the sequence was exhausted"
                );
                return Err(Error::SequenceExhausted { tick: last });
            }
            if spins_left > 0 {
                spins_left -= 1;
                std::hint::spin_loop();
            } else {
                std::thread::sleep(poll);
            }
        }
    }
}

fn max_tick_wait(unit: TimeUnit) -> Duration {
    let unit_millis = u64::try_from(unit.unit_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(unit_millis.saturating_mul(MAX_WAIT_UNITS)).max(MIN_TICK_WAIT)
}
