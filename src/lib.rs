//! A lock-free concurrent hash map with cooperative resizing (`CMap`),
//! plus a SIMD group-probed single-threaded variant (`DenseMap`) and a
//! Robin Hood-hashed single-threaded variant (`RobinhoodMap`).
//!
//! `CMap` is safe to share across threads behind an `Arc` and call through
//! `&self`: any thread that observes a table over its load threshold
//! allocates the next table and starts migrating into it, and any other
//! thread that subsequently touches the old table helps move a chunk of it
//! before doing its own work. There is no dedicated resizer and no thread
//! ever blocks waiting for a migration to finish.
//!
//! `DenseMap` and `RobinhoodMap` trade that cooperative-resize machinery
//! for raw single-threaded throughput: `DenseMap` scans 16-slot
//! control-byte groups with 128-bit SIMD compares (falls back to returning
//! [`error::MapError::HardwareUnsupported`] on targets without it);
//! `RobinhoodMap` keeps probe-sequence lengths bounded with classic Robin
//! Hood displacement.

mod concurrent;
mod config;
mod dense;
mod error;
mod hash;
mod index;
mod probe;
mod secondary;

pub use concurrent::{CMap, Iter};
pub use config::MapConfig;
pub use dense::DenseMap;
pub use error::{MapError, Result};
pub use secondary::RobinhoodMap;
