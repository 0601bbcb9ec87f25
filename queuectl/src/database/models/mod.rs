//! Database models for queuectl.
//!
//! These models map directly to the database schema.

pub mod config;
pub mod job;

pub use config::*;
pub use job::*;
