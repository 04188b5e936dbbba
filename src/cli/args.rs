//! Command line argument parsing
//!
//! Subcommands:
//! - `run`: Drive one task through the full container lifecycle
//! - `spec`: Print the translated container creation spec without contacting the daemon

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Run(RunConfig),
    Spec(RunConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub task: PathBuf,
    pub config_override: Option<PathBuf>,
    pub verbose: bool,
}

#[derive(Debug, Parser)]
#[command(name = "fn-agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs function tasks in isolated, resource-limited containers")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Authenticate, pull if needed, create, run and remove the task container
    Run {
        /// Task descriptor (TOML)
        #[arg(short = 't', long = "task")]
        task: PathBuf,
        /// Driver configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Print the container creation spec for a task as JSON
    Spec {
        /// Task descriptor (TOML)
        #[arg(short = 't', long = "task")]
        task: PathBuf,
        /// Driver configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run { task, config }) => Ok(ExecutionMode::Run(RunConfig {
                task: task.clone(),
                config_override: config.clone(),
                verbose: self.verbose,
            })),
            Some(Commands::Spec { task, config }) => Ok(ExecutionMode::Spec(RunConfig {
                task: task.clone(),
                config_override: config.clone(),
                verbose: self.verbose,
            })),
            None => Err(
                "No command specified. Use 'fn-agent --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command() {
        let args = Args::try_parse_from([
            "fn-agent", "run", "--task", "task.toml", "--config", "driver.toml", "-v",
        ])
        .unwrap();

        match args.mode().unwrap() {
            ExecutionMode::Run(config) => {
                assert_eq!(config.task, PathBuf::from("task.toml"));
                assert_eq!(config.config_override, Some(PathBuf::from("driver.toml")));
                assert!(config.verbose);
            }
            other => panic!("Expected Run mode, got {other:?}"),
        }
    }

    #[test]
    fn test_spec_command_without_config() {
        let args = Args::try_parse_from(["fn-agent", "spec", "-t", "task.toml"]).unwrap();

        assert_eq!(
            args.mode().unwrap(),
            ExecutionMode::Spec(RunConfig {
                task: PathBuf::from("task.toml"),
                config_override: None,
                verbose: false,
            })
        );
    }

    #[test]
    fn test_no_command() {
        let args = Args {
            verbose: false,
            command: None,
        };
        assert!(args.mode().is_err());
    }

    #[test]
    fn test_task_is_required() {
        assert!(Args::try_parse_from(["fn-agent", "run"]).is_err());
    }
}
