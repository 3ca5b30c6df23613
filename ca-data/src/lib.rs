//! ca-data library interface
//!
//! Synthetic data generation and data validation for the analytics
//! database, shared by the `ca-data` binary and its tests.

pub mod generate;
pub mod validate;
