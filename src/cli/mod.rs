//! Command line interface module
//!
//! Argument parsing lives in [`args`]; [`runner`] loads configuration and
//! dispatches each subcommand to the image manager.

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::Runner;
