//! REST API handlers organized by concern.

pub mod admin;
pub mod health;
pub mod store;
pub mod writes;

pub use admin::*;
pub use health::*;
pub use store::*;
pub use writes::*;
