//! CLI command implementations

pub mod error;
pub mod tasks;

pub use error::CliError;
pub use tasks::{Cli, Commands, OutputFormat};
