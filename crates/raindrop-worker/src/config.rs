use crate::error::{RaindropError, Result};
use jiff::Timestamp;
use raindrop_core::TimeUnit;
use raindrop_flake::encoder::DEFAULT_MAX_NAMESPACES;
use raindrop_flake::layout::MAX_RESERVED_BITS;
use raindrop_flake::BitLayout;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// 2023-01-01T00:00:00Z
pub const DEFAULT_START_TIME: Timestamp = Timestamp::constant(1_672_531_200, 0);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(30);
pub const WORKER_ID_BITS_RANGE: RangeInclusive<u8> = 4..=10;

/// Settings of one Raindrop generator.
///
/// Every field has a default; [`RaindropConfig::validate`] checks the
/// combination before any I/O happens.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RaindropConfig {
    /// Port of the hosting service, part of the node identity.
    pub service_port: u16,

    #[builder(default)]
    pub time_unit: TimeUnit,

    /// Epoch the timestamp field counts from.
    #[builder(default = DEFAULT_START_TIME)]
    pub start_time: Timestamp,

    /// Width of the timestamp field. Defaults per time unit.
    #[builder(default, setter(strip_option))]
    pub timestamp_bits: Option<u8>,

    #[builder(default = 4)]
    pub worker_id_bits: u8,

    /// Lowest worker id provisioned in an empty store.
    #[builder(default = 1)]
    pub min_worker_id: i64,

    /// Highest worker id provisioned in an empty store.
    #[builder(default = 15)]
    pub max_worker_id: i64,

    #[builder(default)]
    pub reserved_bits: u8,

    /// Constant stamped into the reserved bits of every ID.
    #[builder(default)]
    pub reserved_value: i64,

    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL)]
    pub heartbeat_interval: Duration,

    /// Largest tolerated gap between the local and the store clock at startup.
    #[builder(default = DEFAULT_MAX_CLOCK_SKEW)]
    pub max_clock_skew: Duration,

    /// Try to take back the slot this node held before a restart. Only
    /// honoured for millisecond and second units.
    #[builder(default)]
    pub prefer_own_slot: bool,

    /// Most distinct codes [`crate::Raindrop::new_id_for`] accepts.
    #[builder(default = DEFAULT_MAX_NAMESPACES)]
    pub max_namespaces: usize,

    /// Address used in the node identity instead of the detected one.
    #[builder(default, setter(strip_option))]
    pub host_ip: Option<IpAddr>,
}

impl RaindropConfig {
    /// Timestamp width after applying the per-unit default.
    pub fn timestamp_bits(&self) -> u8 {
        self.timestamp_bits
            .unwrap_or_else(|| self.time_unit.default_timestamp_bits())
    }

    pub fn worker_id_range(&self) -> RangeInclusive<i64> {
        self.min_worker_id..=self.max_worker_id
    }

    /// Plans the bit layout of the configured field widths.
    pub fn layout(&self) -> Result<BitLayout> {
        BitLayout::plan(
            self.timestamp_bits(),
            self.worker_id_bits,
            self.reserved_bits,
        )
        .map_err(|e| invalid(e.to_string()))
    }

    /// Checks the configuration against the current time.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(Timestamp::now())
    }

    /// Checks the configuration as if the current time were `now`.
    pub fn validate_at(&self, now: Timestamp) -> Result<()> {
        if self.service_port == 0 {
            return Err(invalid("service_port must be between 1 and 65535"));
        }

        let timestamp_bits = self.timestamp_bits();
        let allowed = self.time_unit.timestamp_bits_range();
        if !allowed.contains(&timestamp_bits) {
            return Err(invalid(format!(
                "timestamp_bits {timestamp_bits} out of range {}..={} for time unit {}",
                allowed.start(),
                allowed.end(),
                self.time_unit
            )));
        }

        if !WORKER_ID_BITS_RANGE.contains(&self.worker_id_bits) {
            return Err(invalid(format!(
                "worker_id_bits {} out of range {}..={}",
                self.worker_id_bits,
                WORKER_ID_BITS_RANGE.start(),
                WORKER_ID_BITS_RANGE.end()
            )));
        }

        let worker_id_limit = (1_i64 << self.worker_id_bits) - 1;
        if self.min_worker_id < 1
            || self.min_worker_id > self.max_worker_id
            || self.max_worker_id > worker_id_limit
        {
            return Err(invalid(format!(
                "worker id range {}..={} must satisfy 1 <= min <= max <= {worker_id_limit}",
                self.min_worker_id, self.max_worker_id
            )));
        }

        if self.reserved_bits > MAX_RESERVED_BITS {
            return Err(invalid(format!(
                "reserved_bits {} out of range 0..={MAX_RESERVED_BITS}",
                self.reserved_bits
            )));
        }
        let reserved_limit = 1_i64 << self.reserved_bits;
        if self.reserved_value < 0 || self.reserved_value >= reserved_limit {
            return Err(invalid(format!(
                "reserved_value {} does not fit in {} bits",
                self.reserved_value, self.reserved_bits
            )));
        }

        self.layout()?;

        if self.heartbeat_interval.is_zero() {
            return Err(invalid("heartbeat_interval must be positive"));
        }

        if self.max_namespaces == 0 {
            return Err(invalid("max_namespaces must be positive"));
        }

        if self.start_time > now {
            return Err(RaindropError::EpochAhead {
                start_time: self.start_time,
                now,
            });
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> RaindropError {
    RaindropError::Configuration(message.into())
}
