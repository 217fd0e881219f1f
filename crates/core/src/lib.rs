//! Small utilities shared across the gateway crates that don't deserve their own crate.

pub mod bow;
pub mod tokio_metrics;

pub use bow::OwnedOrBorrowed;
