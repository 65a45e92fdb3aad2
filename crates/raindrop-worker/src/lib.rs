//! Distributed Raindrop ID generation.
//!
//! A [`Raindrop`] leases a worker slot from a shared [`SlotStore`], keeps it
//! alive with a heartbeat and mints 63-bit IDs embedding that slot's id.
//!
//! ```no_run
//! # async fn run(store: std::sync::Arc<dyn raindrop_worker::SlotStore>) -> raindrop_worker::Result<()> {
//! use raindrop_worker::{Raindrop, RaindropConfig};
//!
//! let config = RaindropConfig::builder().service_port(8080).build();
//! let raindrop = Raindrop::initialize(config, store).await?;
//! let id = raindrop.new_id()?;
//! let order_id = raindrop.new_id_for("order")?;
//! raindrop.shutdown().await;
//! # let _ = (id, order_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod lease;
mod raindrop;

pub use config::RaindropConfig;
pub use error::{RaindropError, Result};
pub use heartbeat::{Heartbeat, HeartbeatStats};
pub use identity::NodeIdentity;
pub use lease::{LeasePolicy, SlotLeaser};
pub use raindrop::Raindrop;
pub use raindrop_core::{SlotStore, TimeUnit, WorkerSlot};
pub use raindrop_flake::IdParts;
