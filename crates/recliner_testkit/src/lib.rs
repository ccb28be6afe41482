//! # Recliner Testkit
//!
//! Test utilities for Recliner.
//!
//! This crate provides:
//! - Test fixtures: temporary instances, in memory or on disk
//! - Property-based test generators using proptest
//! - A replication harness pairing a local instance with a loopback remote
//!
//! ## Usage
//!
//! ```rust
//! use recliner_codec::value;
//! use recliner_testkit::prelude::*;
//!
//! with_temp_db(|db| {
//!     db.put("a", value!({"n": 1}), None).unwrap();
//!     assert!(db.get("a").unwrap().is_some());
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;

#[cfg(test)]
mod properties;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
