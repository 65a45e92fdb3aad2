use jiff::{SignedDuration, Timestamp};
use raindrop_core::StorageError;
use thiserror::Error;

/// Errors surfaced by [`crate::Raindrop`] at startup and while minting IDs.
#[derive(Debug, Error)]
pub enum RaindropError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("clock skew between local and store clocks is {skew}, allowed {max_skew}")]
    ClockSkew {
        skew: SignedDuration,
        max_skew: SignedDuration,
    },

    /// The configured epoch lies ahead of the local clock.
    #[error("start_time {start_time} is after the current time {now}")]
    EpochAhead { start_time: Timestamp, now: Timestamp },

    #[error("no free worker slot available")]
    NoSlotAvailable,

    #[error("failed to determine node identity: {0}")]
    Identity(String),

    #[error("raindrop has been shut down")]
    Stopped,

    #[error("storage operation failed: {0}")]
    Storage(
        #[from]
        #[source]
        StorageError,
    ),

    #[error(transparent)]
    Flake(raindrop_flake::Error),
}

impl From<raindrop_flake::Error> for RaindropError {
    fn from(error: raindrop_flake::Error) -> Self {
        match error {
            raindrop_flake::Error::Stopped => RaindropError::Stopped,
            raindrop_flake::Error::EpochAhead { epoch, now } => RaindropError::EpochAhead {
                start_time: epoch,
                now,
            },
            other => RaindropError::Flake(other),
        }
    }
}

impl RaindropError {
    /// Whether this is a disagreement between clocks rather than a bad setting.
    pub fn is_clock_error(&self) -> bool {
        matches!(
            self,
            RaindropError::ClockSkew { .. } | RaindropError::EpochAhead { .. }
        )
    }

    /// Whether calling again later can succeed without any intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            RaindropError::Flake(raindrop_flake::Error::SequenceExhausted { .. }) => true,
            RaindropError::Storage(StorageError::Timeout(_) | StorageError::Unavailable(_)) => {
                true
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RaindropError>;
