//! PostgreSQL implementations
//!
//! The shared tenant directory and the per-tenant store used in production.

mod directory;
mod store;

pub use directory::*;
pub use store::*;
