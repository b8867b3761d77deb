#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod error;
mod index_table;

/// A hash map keyed through a chained index.
///
/// This module provides a `HashMap` that wraps the `HashTable` and provides
/// a standard key-value map interface with configurable hashers.
pub mod hash_map;

pub mod hash_policy;

pub mod hash_table;

/// A hash set keyed through a chained index.
///
/// This module provides a `HashSet` that wraps the `HashTable` and provides
/// a standard set interface with configurable hashers.
pub mod hash_set;

pub use error::TryReserveError;
pub use hash_map::Entry;
pub use hash_map::HashMap;
pub use hash_set::HashSet;
pub use hash_table::HashTable;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// Hasher builder used when none is named.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// Hasher builder used when none is named.
        pub type DefaultHashBuilder = std::collections::hash_map::RandomState;
    } else {
        /// Hasher builder used when none is named.
        ///
        /// Without `foldhash` or `std` there is no source of random seeds, so
        /// this falls back to an unkeyed multiplicative hasher.
        pub type DefaultHashBuilder = hash_policy::BuildFibonacciHasher;
    }
}
