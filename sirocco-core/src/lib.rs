//! # Sirocco Core
//!
//! Core types and in-process plumbing for the Sirocco market-data and
//! order-flow engine.
//!
//! This crate provides:
//! - Fixed-layout protocol records (`TickRecord`, `CandleRecord`) shared with
//!   the persistence and shared-memory layers
//! - Order-flow message types (requests, returns, positions, accounts)
//! - The fixed-topic synchronous [`bus::EventBus`]
//! - The process-wide [`symbols::SymbolRegistry`]
//! - Client-id and order-ref generation ([`ids::OrderIdGenerator`])
//! - Error types and configuration loading

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Protocol records and order-flow message types.
pub mod data;

/// Error types and handling.
pub mod error;

/// Configuration types and loading.
pub mod config;

/// Fixed-topic synchronous event bus.
pub mod bus;

/// Process-wide instrument registry.
pub mod symbols;

/// Client-id and order-ref generation.
pub mod ids;

pub use error::{Result, SiroccoError};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bus::{Event, EventBus, Topic};
    pub use crate::data::*;
    pub use crate::error::{Result, SiroccoError};
    pub use crate::ids::OrderIdGenerator;
    pub use crate::symbols::SymbolRegistry;
}
