//! queuectl library crate.
//!
//! A durable job queue on a single SQLite file: producers enqueue shell
//! commands, any number of worker processes claim and run them, and failed
//! jobs are retried with exponential backoff until they land in the
//! dead-letter queue.

pub mod cli;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod logging;
pub mod queue;
pub mod supervisor;

pub use context::AppContext;
pub use error::{Error, Result};
