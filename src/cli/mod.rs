//! CLI argument parsing and the run command

pub mod error;
pub mod run;

pub use error::CliError;
pub use run::Cli;
