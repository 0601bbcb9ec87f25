//! Command-line interface.

mod args;
mod commands;

pub use args::{Args, Commands, ConfigCommand, DlqCommand, ListArgs, WorkerCommand};
pub use commands::execute;
