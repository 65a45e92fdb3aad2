use jiff::Timestamp;
use thiserror::Error;

/// Errors returned by bit-layout planning, the tick driver and ID encoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error(
        "no bits left for the sequence: timestamp_bits={timestamp_bits}, \
         worker_id_bits={worker_id_bits}, reserved_bits={reserved_bits}"
    )]
    NoSequenceBits {
        timestamp_bits: u8,
        worker_id_bits: u8,
        reserved_bits: u8,
    },
    #[error("{field} must be at least one bit wide")]
    EmptyField { field: &'static str },
    #[error("invalid reserved bit length {reserved_bits}; expected 0..={max}")]
    ReservedBitsOutOfRange { reserved_bits: u8, max: u8 },
    #[error("reserved value {value} does not fit in {reserved_bits} bits")]
    ReservedValueTooLarge { value: i64, reserved_bits: u8 },
    #[error("invalid worker id {worker_id}; expected 0..={max_worker_id}")]
    InvalidWorkerId { worker_id: i64, max_worker_id: i64 },
    #[error("epoch is ahead of current clock time: epoch={epoch}, now={now}")]
    EpochAhead { epoch: Timestamp, now: Timestamp },
    #[error("current tick {tick} is before the epoch")]
    ClockBeforeEpoch { tick: i64 },
    #[error("tick {tick} exceeds the timestamp field (max {max_tick})")]
    OverTimeLimit { tick: i64, max_tick: i64 },
    #[error("sequence exhausted for tick {tick}; retry on the next tick")]
    SequenceExhausted { tick: i64 },
    #[error("namespace limit of {max} codes reached")]
    TooManyNamespaces { max: usize },
    #[error("encoder stopped while waiting for the next tick")]
    Stopped,
    #[error("failed to start tick driver: {0}")]
    DriverSpawn(String),
}

pub type Result<T> = std::result::Result<T, Error>;
