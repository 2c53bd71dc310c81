//! Shared command line arguments.

use clap::{ArgAction, Args};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// The log configuration.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Logging")]
pub struct LogArgs {
    /// Set the minimum log level.
    ///
    /// -v      Errors
    /// -vv     Warnings
    /// -vvv    Info
    /// -vvvv   Debug
    /// -vvvvv  Traces (warning: very verbose!)
    ///
    /// RUST_LOG takes precedence when set.
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        default_value_t = 3,
        verbatim_doc_comment
    )]
    pub verbosity: u8,

    /// Silence all log output.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbosity")]
    pub quiet: bool,

    /// Write logs as JSON lines.
    #[arg(long = "log.json", global = true)]
    pub json: bool,
}

impl LogArgs {
    /// The level selected by `-v` and `-q`.
    pub fn directive(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::OFF;
        }
        match self.verbosity {
            0 => LevelFilter::OFF,
            1 => LevelFilter::ERROR,
            2 => LevelFilter::WARN,
            3 => LevelFilter::INFO,
            4 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Install the global subscriber.
    pub fn init_tracing(&self) -> eyre::Result<()> {
        let filter =
            EnvFilter::builder().with_default_directive(self.directive().into()).from_env_lossy();
        let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
        let res = if self.json { builder.json().try_init() } else { builder.try_init() };
        res.map_err(|e| eyre::eyre!("failed to install log subscriber: {e}"))
    }
}
