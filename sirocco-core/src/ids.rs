//! Client-id and order-ref generation.
//!
//! Two id spaces live here:
//!
//! - The internal **client id**: an 18-digit decimal `YYMMDDHHMMSS NN SSSS`
//!   (NN = node id mod 100, SSSS = per-process sequence mod 10000) packed
//!   into a `u64`. The packing stays below `u64::MAX` for years before
//!   2084; uniqueness is per process per second-window, which is what the
//!   order hub needs within a trading session.
//! - The counter-visible **order ref**: a plain 32-bit counter formatted as
//!   a zero-padded 12-digit decimal string, advanced monotonically and
//!   never regressed, so refs survive a counter reporting `MaxOrderRef`
//!   from an earlier session.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Datelike, Local, Timelike};

/// Generator for client ids and order refs.
#[derive(Debug)]
pub struct OrderIdGenerator {
    node_id: u32,
    sequence: AtomicU32,
    ref_sequence: AtomicU32,
}

impl OrderIdGenerator {
    /// Creates a generator for the given node id (10 bits kept).
    #[must_use]
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id: node_id & 0x3FF,
            sequence: AtomicU32::new(0),
            ref_sequence: AtomicU32::new(1),
        }
    }

    /// Returns the next client id.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        let now = Local::now();
        let time_part = u64::from(now.year() as u32 % 100) * 10_000_000_000
            + u64::from(now.month()) * 100_000_000
            + u64::from(now.day()) * 1_000_000
            + u64::from(now.hour()) * 10_000
            + u64::from(now.minute()) * 100
            + u64::from(now.second());

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 10_000;

        time_part * 1_000_000 + u64::from(self.node_id % 100) * 10_000 + u64::from(seq)
    }

    /// Mints the next counter-visible order ref (12 decimal digits).
    #[must_use]
    pub fn next_order_ref(&self) -> String {
        let seq = self.ref_sequence.fetch_add(1, Ordering::Relaxed);
        format!("{seq:012}")
    }

    /// Advances the ref counter to at least `floor`, never decreasing it.
    pub fn advance_ref_floor(&self, floor: u32) {
        let mut current = self.ref_sequence.load(Ordering::Relaxed);
        while floor > current {
            match self.ref_sequence.compare_exchange_weak(
                current,
                floor,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Current ref counter value (next ref to be minted).
    #[must_use]
    pub fn current_ref(&self) -> u32 {
        self.ref_sequence.load(Ordering::Relaxed)
    }
}
