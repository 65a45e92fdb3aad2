//! Raindrop ID encoding.
//!
//! An ID packs, from the most significant usable bit down, the ticks elapsed
//! since a configured epoch, the leased worker id, a clock-backward flag, a
//! per-tick sequence and a constant reserved field. This crate plans the bit
//! layout, keeps the current tick published from a background thread and
//! mints IDs from it. It never talks to the slot store.

mod clock;
pub mod encoder;
pub mod error;
pub mod layout;
pub mod tick;

pub use clock::{Clock, ManualClock, SystemClock};
pub use encoder::{EncoderSettings, IdEncoder};
pub use error::Error;
pub use layout::{BitLayout, IdParts};
pub use tick::{TickCell, TickDriver};
