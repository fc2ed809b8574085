//! Command-line surface: argument parsing and command handlers.

pub mod arg_parser;
pub mod cli;

pub use arg_parser::{Cli, Commands, CommonArgs, RunArgs};
pub use cli::{handle_run, handle_status};
