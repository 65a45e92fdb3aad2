use crate::error::{Error, Result};
use jiff::{SignedDuration, Timestamp};
use raindrop_core::TimeUnit;
use serde::Serialize;

/// Bits available in a non-negative `i64`.
pub const USABLE_BITS: u8 = 63;
/// Width of the clock-backward flag.
pub const TIME_BACK_BITS: u8 = 1;
/// Widest reserved field a layout may carry.
pub const MAX_RESERVED_BITS: u8 = 5;

/// Field widths and shift offsets of a Raindrop ID.
///
/// From the most significant usable bit down:
///
/// ```text
/// | timestamp | worker id | time-back | sequence | reserved |
/// ```
///
/// The sequence takes whatever the other fields leave of the 63 usable bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitLayout {
    timestamp_bits: u8,
    worker_id_bits: u8,
    sequence_bits: u8,
    reserved_bits: u8,
    sequence_shift: u8,
    time_back_shift: u8,
    worker_id_shift: u8,
    timestamp_shift: u8,
    max_sequence: i64,
}

/// The fields packed into one ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct IdParts {
    /// Ticks elapsed since the epoch.
    pub tick: i64,
    pub worker_id: i64,
    pub time_back: i64,
    pub sequence: i64,
    pub reserved: i64,
}

impl IdParts {
    /// Recovers the start of the tick this ID was minted in.
    pub fn timestamp(&self, epoch: Timestamp, unit: TimeUnit) -> Option<Timestamp> {
        let elapsed_ms = self.tick.checked_mul(unit.unit_millis())?;
        epoch
            .checked_add(SignedDuration::from_millis(elapsed_ms))
            .ok()
    }
}

const fn mask(bits: u8) -> i64 {
    (1_i64 << bits) - 1
}

impl BitLayout {
    /// Derives shift offsets and the per-tick sequence capacity.
    pub fn plan(timestamp_bits: u8, worker_id_bits: u8, reserved_bits: u8) -> Result<Self> {
        if timestamp_bits == 0 {
            return Err(Error::EmptyField {
                field: "timestamp",
            });
        }
        if worker_id_bits == 0 {
            return Err(Error::EmptyField { field: "worker id" });
        }
        if reserved_bits > MAX_RESERVED_BITS {
            return Err(Error::ReservedBitsOutOfRange {
                reserved_bits,
                max: MAX_RESERVED_BITS,
            });
        }

        let taken = timestamp_bits as i16
            + worker_id_bits as i16
            + TIME_BACK_BITS as i16
            + reserved_bits as i16;
        let sequence_bits = USABLE_BITS as i16 - taken;
        if sequence_bits < 1 {
            return Err(Error::NoSequenceBits {
                timestamp_bits,
                worker_id_bits,
                reserved_bits,
            });
        }
        let sequence_bits = sequence_bits as u8;

        let sequence_shift = reserved_bits;
        let time_back_shift = reserved_bits + sequence_bits;
        let worker_id_shift = time_back_shift + TIME_BACK_BITS;
        let timestamp_shift = worker_id_shift + worker_id_bits;

        Ok(Self {
            timestamp_bits,
            worker_id_bits,
            sequence_bits,
            reserved_bits,
            sequence_shift,
            time_back_shift,
            worker_id_shift,
            timestamp_shift,
            max_sequence: mask(sequence_bits),
        })
    }

    pub fn timestamp_bits(&self) -> u8 {
        self.timestamp_bits
    }

    pub fn worker_id_bits(&self) -> u8 {
        self.worker_id_bits
    }

    pub fn sequence_bits(&self) -> u8 {
        self.sequence_bits
    }

    pub fn reserved_bits(&self) -> u8 {
        self.reserved_bits
    }

    /// The reserved field always sits at bit 0.
    pub fn reserved_shift(&self) -> u8 {
        0
    }

    pub fn sequence_shift(&self) -> u8 {
        self.sequence_shift
    }

    pub fn time_back_shift(&self) -> u8 {
        self.time_back_shift
    }

    pub fn worker_id_shift(&self) -> u8 {
        self.worker_id_shift
    }

    pub fn timestamp_shift(&self) -> u8 {
        self.timestamp_shift
    }

    /// Largest sequence value a single tick can hand out.
    pub fn max_sequence(&self) -> i64 {
        self.max_sequence
    }

    pub fn max_tick(&self) -> i64 {
        mask(self.timestamp_bits)
    }

    pub fn max_worker_id(&self) -> i64 {
        mask(self.worker_id_bits)
    }

    pub fn max_reserved_value(&self) -> i64 {
        mask(self.reserved_bits)
    }

    /// Packs `parts` into an ID.
    ///
    /// Fields wider than their slot are truncated; callers validate ranges
    /// beforehand.
    pub fn compose(&self, parts: IdParts) -> i64 {
        ((parts.tick & self.max_tick()) << self.timestamp_shift)
            | ((parts.worker_id & self.max_worker_id()) << self.worker_id_shift)
            | ((parts.time_back & 1) << self.time_back_shift)
            | ((parts.sequence & self.max_sequence) << self.sequence_shift)
            | (parts.reserved & self.max_reserved_value())
    }

    /// Splits an ID minted under this layout back into its fields.
    pub fn decode(&self, id: i64) -> IdParts {
        IdParts {
            tick: (id >> self.timestamp_shift) & self.max_tick(),
            worker_id: (id >> self.worker_id_shift) & self.max_worker_id(),
            time_back: (id >> self.time_back_shift) & 1,
            sequence: (id >> self.sequence_shift) & self.max_sequence,
            reserved: id & self.max_reserved_value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_second_layout() {
        let layout = BitLayout::plan(31, 4, 0).unwrap();
        assert_eq!(layout.sequence_bits(), 27);
        assert_eq!(layout.reserved_shift(), 0);
        assert_eq!(layout.sequence_shift(), 0);
        assert_eq!(layout.time_back_shift(), 27);
        assert_eq!(layout.worker_id_shift(), 28);
        assert_eq!(layout.timestamp_shift(), 32);
        assert_eq!(layout.max_sequence(), (1 << 27) - 1);
    }

    #[test]
    fn reserved_bits_push_everything_up() {
        let layout = BitLayout::plan(41, 10, 3).unwrap();
        assert_eq!(layout.sequence_bits(), 8);
        assert_eq!(layout.sequence_shift(), 3);
        assert_eq!(layout.time_back_shift(), 11);
        assert_eq!(layout.worker_id_shift(), 12);
        assert_eq!(layout.timestamp_shift(), 22);
        assert_eq!(layout.timestamp_shift() + layout.timestamp_bits(), USABLE_BITS);
    }

    #[test]
    fn planning_is_deterministic() {
        assert_eq!(
            BitLayout::plan(33, 6, 2).unwrap(),
            BitLayout::plan(33, 6, 2).unwrap()
        );
    }

    #[test]
    fn rejects_layout_without_sequence_bits() {
        assert_eq!(
            BitLayout::plan(50, 10, 2),
            Err(Error::NoSequenceBits {
                timestamp_bits: 50,
                worker_id_bits: 10,
                reserved_bits: 2,
            })
        );
        assert!(BitLayout::plan(50, 10, 1).is_ok());
    }

    #[test]
    fn rejects_wide_reserved_field() {
        assert_eq!(
            BitLayout::plan(31, 4, 6),
            Err(Error::ReservedBitsOutOfRange {
                reserved_bits: 6,
                max: MAX_RESERVED_BITS,
            })
        );
    }

    #[test]
    fn rejects_empty_fields() {
        assert!(matches!(
            BitLayout::plan(0, 4, 0),
            Err(Error::EmptyField { .. })
        ));
        assert!(matches!(
            BitLayout::plan(31, 0, 0),
            Err(Error::EmptyField { .. })
        ));
    }

    #[test]
    fn compose_matches_reference_values() {
        let layout = BitLayout::plan(31, 4, 0).unwrap();
        let first = IdParts {
            tick: 0,
            worker_id: 10,
            time_back: 0,
            sequence: 0,
            reserved: 0,
        };
        assert_eq!(layout.compose(first), 10 << 28);
        let second = IdParts {
            sequence: 1,
            ..first
        };
        assert_eq!(layout.compose(second), (10 << 28) | 1);
    }

    #[test]
    fn decode_recovers_every_field() {
        for (ts, wid, res) in [(31, 4, 0), (41, 10, 5), (50, 10, 1), (17, 6, 3)] {
            let layout = BitLayout::plan(ts, wid, res).unwrap();
            let parts = IdParts {
                tick: layout.max_tick() - 7,
                worker_id: layout.max_worker_id() / 2 + 1,
                time_back: 1,
                sequence: layout.max_sequence(),
                reserved: layout.max_reserved_value(),
            };
            let id = layout.compose(parts);
            assert!(id >= 0);
            assert_eq!(layout.decode(id), parts);
        }
    }

    #[test]
    fn parts_map_back_to_wall_clock() {
        let epoch = Timestamp::from_second(1_600_000_000).unwrap();
        let parts = IdParts {
            tick: 90,
            worker_id: 1,
            time_back: 0,
            sequence: 0,
            reserved: 0,
        };
        assert_eq!(
            parts.timestamp(epoch, TimeUnit::Minute),
            Some(Timestamp::from_second(1_600_005_400).unwrap())
        );
    }
}
