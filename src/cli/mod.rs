//! Command-line front end for the container driver
//!
//! This module contains argument parsing and the mode resolution consumed by
//! the `fn-agent` binary.

pub mod args;

pub use args::{Args, Commands, ExecutionMode, RunConfig};
