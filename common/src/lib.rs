//! RateMesh Common Types
//!
//! This crate contains the shared types used across the RateMesh engine:
//! currency codes and pairs, exchange identifiers, bid/ask quotes, and
//! the diagnostic values exchanged between components.

pub mod currency;
pub mod quote;
pub mod time;

pub use currency::*;
pub use quote::*;
pub use time::*;
