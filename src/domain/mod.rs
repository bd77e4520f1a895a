//! Domain models for the tenancy core
//!
//! Tenants and their store locators, the canonical schema shape, reconciliation
//! reports and fast-ack write requests.

mod report;
mod schema;
mod tenant;
mod write;

pub use report::*;
pub use schema::*;
pub use tenant::*;
pub use write::*;
