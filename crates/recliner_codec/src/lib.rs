//! # Recliner Codec
//!
//! The value model shared by every Recliner crate.
//!
//! This crate provides:
//! - [`Value`], a JSON sum type with an insertion-ordered [`Map`]
//! - the collation used for sorting and index keys ([`compare`],
//!   [`SortComparator`])
//! - JSON conversion through serde, and CBOR framing helpers
//!
//! ## Usage
//!
//! ```
//! use recliner_codec::{compare, from_json_str, value};
//! use std::cmp::Ordering;
//!
//! let a = from_json_str(r#"{"name": "alice"}"#).unwrap();
//! let b = value!({"name": "Bob"});
//! assert_eq!(compare(&a, &b), Ordering::Less);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod compare;
mod error;
mod json;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use compare::{
    compare, compare_opt, compare_strings, SortComparator, SortDirection, SortField,
};
pub use error::{CodecError, CodecResult};
pub use json::{
    from_json_slice, from_json_str, from_value, to_json_string, to_json_vec, to_value,
};
pub use value::{Map, Value};

#[doc(hidden)]
pub use serde_json as __json;
