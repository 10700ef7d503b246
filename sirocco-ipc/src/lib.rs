//! # Sirocco IPC
//!
//! Wait-free communication primitives for the Sirocco engine:
//!
//! - [`spsc`] — single-producer/single-consumer power-of-two ring with
//!   batched reserve/commit and peek/advance
//! - [`mpmc`] — bounded multi-producer/multi-consumer queue using per-cell
//!   sequence numbers
//! - [`log`] — memory-mapped persistent log of fixed-size records with a
//!   separate metadata header and tailing readers
//! - [`snapshot`] — seqlock-based per-instrument market snapshot, in-heap
//!   or in a named shared-memory region
//!
//! # Safety
//!
//! This crate contains unsafe code for lock-free operations and raw memory
//! mapping. Every unsafe block documents the invariant it relies on.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod log;
pub mod mpmc;
pub mod snapshot;
pub mod spsc;

pub use log::{LogReader, LogWriter, PlainRecord};
pub use mpmc::MpmcQueue;
pub use snapshot::{LocalSnapshot, MarketSnapshot, ShmSnapshot};
pub use spsc::{Consumer, Producer, SpscRing};
