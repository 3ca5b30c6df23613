//! # Customer Analyzer Common Library
//!
//! Shared code for the customer analytics services:
//! - Database schema, models and queries
//! - Feature extraction from user activity
//! - Configuration loading and root folder resolution
//! - Timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod time;

pub use error::{Error, Result};
