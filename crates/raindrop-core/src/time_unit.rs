use jiff::SignedDuration;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Granularity of one tick of the ID timestamp field.
///
/// The numeric codes are persisted in the worker table, so they must never
/// be renumbered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// One tick per millisecond. Subject to leap-second adjustments.
    Millisecond = 1,
    /// One tick per second.
    #[default]
    Second = 2,
    Minute = 3,
    Hour = 4,
    Day = 5,
}

impl TimeUnit {
    /// Returns the code stored in the `time_unit` column.
    pub const fn code(self) -> i16 {
        self as i16
    }

    /// Looks up a unit from its persisted code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Millisecond),
            2 => Some(Self::Second),
            3 => Some(Self::Minute),
            4 => Some(Self::Hour),
            5 => Some(Self::Day),
            _ => None,
        }
    }

    /// Length of one tick in milliseconds.
    pub const fn unit_millis(self) -> i64 {
        match self {
            Self::Millisecond => 1,
            Self::Second => 1_000,
            Self::Minute => 60_000,
            Self::Hour => 3_600_000,
            Self::Day => 86_400_000,
        }
    }

    /// Whether sequence exhaustion can be waited out and whether a process
    /// may reclaim the slot it previously held.
    pub const fn is_fine_grained(self) -> bool {
        matches!(self, Self::Millisecond | Self::Second)
    }

    /// Accepted widths of the timestamp field for this unit.
    pub fn timestamp_bits_range(self) -> RangeInclusive<u8> {
        match self {
            Self::Millisecond => 41..=50,
            Self::Second => 31..=40,
            Self::Minute => 25..=34,
            Self::Hour => 19..=28,
            Self::Day => 15..=24,
        }
    }

    /// Default width of the timestamp field for this unit.
    ///
    /// | unit | bits | span |
    /// |------|------|------|
    /// | ms   | 41   | ~69.7 years |
    /// | s    | 33   | ~272.3 years |
    /// | min  | 27   | ~255.3 years |
    /// | h    | 21   | ~239.4 years |
    /// | d    | 17   | ~359 years |
    pub const fn default_timestamp_bits(self) -> u8 {
        match self {
            Self::Millisecond => 41,
            Self::Second => 33,
            Self::Minute => 27,
            Self::Hour => 21,
            Self::Day => 17,
        }
    }

    /// Extra age a heartbeat must have before a slot leased under a coarse
    /// unit is considered free.
    pub const fn lease_grace(self) -> SignedDuration {
        match self {
            Self::Millisecond | Self::Second => SignedDuration::ZERO,
            Self::Minute => SignedDuration::from_mins(1),
            Self::Hour => SignedDuration::from_hours(1),
            Self::Day => SignedDuration::from_hours(24),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Millisecond => "millisecond",
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl Display for TimeUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ms" | "millisecond" => Ok(Self::Millisecond),
            "s" | "second" => Ok(Self::Second),
            "min" | "minute" => Ok(Self::Minute),
            "h" | "hour" => Ok(Self::Hour),
            "d" | "day" => Ok(Self::Day),
            other => Err(format!("unknown time unit: '{other}'")),
        }
    }
}
