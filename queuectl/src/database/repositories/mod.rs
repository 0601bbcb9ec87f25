//! Repository layer for database access.
//!
//! This module implements the Repository Pattern to abstract all database interactions,
//! creating a clean and maintainable data access layer.

pub mod config;
pub mod job;

pub use config::*;
pub use job::*;
