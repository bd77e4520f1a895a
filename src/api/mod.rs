//! HTTP API layer
//!
//! Structured errors plus the REST routes served behind the tenant
//! resolution middleware.

pub mod error;
pub mod handlers;
mod rest;
pub mod types;

pub use error::*;
pub use rest::*;
