//! Runtime configuration.
//!
//! Settings live in the `config` table so that every worker process reads
//! the value most recently committed by an operator.

mod service;

pub use service::{ConfigService, QueueSettings};
