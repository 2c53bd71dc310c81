//! CLI definition and entrypoint to executable
use crate::{args::LogArgs, config::ConfigArgs, node::NodeCommand};
use clap::{Parser, Subcommand};
use cw_config::{default_datadir, KeyConfig, WorkerConfig};
use cw_types::Notifier;
use std::{ffi::OsString, path::PathBuf};
use tokio::{runtime::Builder, task::JoinHandle};
use tracing::{info_span, Instrument as _};

/// The main worker cli interface.
///
/// This is the entrypoint to the executable.
#[derive(Debug, Parser)]
#[command(author, version, about = "Confidential computing worker", long_about = None)]
pub struct Cli {
    /// The command to run
    #[clap(subcommand)]
    pub command: Commands,

    /// The path to the data dir for the worker config, wallet key and results.
    ///
    /// Defaults to the OS-specific data directory:
    ///
    /// - Linux: `$XDG_DATA_HOME/compute-worker/` or `$HOME/.local/share/compute-worker/`
    /// - Windows: `{FOLDERID_RoamingAppData}/compute-worker/`
    /// - macOS: `$HOME/Library/Application Support/compute-worker/`
    #[arg(long, value_name = "DATA_DIR", verbatim_doc_comment, global = true)]
    pub datadir: Option<PathBuf>,

    /// The log configuration.
    #[clap(flatten)]
    pub logs: LogArgs,
}

impl Cli {
    /// Parsers only the default CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parsers only the default CLI arguments from the given iterator
    pub fn try_parse_args_from<I, T>(itr: I) -> Result<Self, clap::error::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Cli::try_parse_from(itr)
    }

    /// Execute the configured cli command.
    ///
    /// The `launcher` starts the worker for the [NodeCommand] and returns
    /// its entry task. The worker stops once the returned `Notifier` is
    /// notified.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use cw_cli::cli::Cli;
    /// use cw_node::launch_node;
    ///
    /// if let Err(err) = Cli::parse_args().run(launch_node) {
    ///     eprintln!("Error: {err:?}");
    ///     std::process::exit(1);
    /// }
    /// ```
    pub fn run<L>(mut self, launcher: L) -> eyre::Result<()>
    where
        L: FnOnce(WorkerConfig, KeyConfig, Notifier) -> JoinHandle<eyre::Result<()>>,
    {
        let datadir = self.datadir.take().unwrap_or_else(default_datadir);

        match self.command {
            Commands::Config(command) => command.execute(datadir),
            Commands::Node(command) => {
                let runtime = Builder::new_multi_thread()
                    .thread_name("compute-worker")
                    .enable_io()
                    .enable_time()
                    .build()?;

                runtime.block_on(async move {
                    self.logs.init_tracing()?;
                    // key for the lifetime of the app
                    let key_config = KeyConfig::read_config(&datadir)?;
                    let span = info_span!(target: "worker::cli", "worker", wallet = %key_config.address());
                    command.execute(datadir, key_config, launcher).instrument(span).await
                })
            }
        }
    }
}

/// Commands to be executed
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write or inspect the worker configuration.
    #[command(name = "config")]
    Config(ConfigArgs),

    /// Start the worker
    #[command(name = "node")]
    Node(Box<NodeCommand>),
}
