//! Foundational low-level utilities shared across Strata crates.
//!
//! Provides time and digest helpers used by delivery-identifier synthesis and
//! timestamp bookkeeping.

pub mod digest_utils;
pub mod time_utils;

pub use digest_utils::short_payload_hash;
pub use time_utils::current_unix_timestamp_ms;
