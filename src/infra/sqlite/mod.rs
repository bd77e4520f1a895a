//! SQLite implementations
//!
//! A file-backed tenant store for single-node deployments and tests.

mod store;

pub use store::*;
