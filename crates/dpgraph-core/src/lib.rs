#![forbid(unsafe_code)]
//! dpgraph-core: shared vocabulary for the dpgraph workspace.
//!
//! Strongly-typed ids, shapes and dtypes, the dense tensor kernel, value
//! bounds with interval arithmetic, privacy configuration, the budget-ledger
//! trait, stable hashing and the publish receipt. No IO, no randomness, no
//! logging; the lazy, dp and remote crates build on top of this one.

pub mod bounds;
pub mod budget;
pub mod config;
pub mod dtype;
pub mod error;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod receipt;
pub mod shape;
pub mod tensor;

pub use error::{Error, Result};

/// Library version, stamped into publish receipts.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
