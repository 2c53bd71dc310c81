//! Config command to write or inspect the worker configuration.

use clap::{Args, Subcommand};
use cw_config::{WorkerConfig, WorkerDirs as _};
use eyre::{eyre, WrapErr as _};
use std::path::PathBuf;

/// Manage the worker configuration file.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

/// Subcommand to write defaults or print the resolved configuration.
#[derive(Debug, Clone, Subcommand)]
pub enum ConfigSubcommand {
    /// Write the default configuration to `<datadir>/worker.yaml`.
    #[command(name = "init")]
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Print the configuration the node would run with.
    #[command(name = "show")]
    Show,
}

impl ConfigArgs {
    /// Execute command
    pub fn execute(&self, datadir: PathBuf) -> eyre::Result<()> {
        match &self.command {
            ConfigSubcommand::Init { force } => {
                let path = datadir.config_path();
                if path.exists() && !force {
                    return Err(eyre!(
                        "{} already exists, pass --force to overwrite",
                        path.display()
                    ));
                }
                WorkerConfig::default()
                    .write_to_path(&path)
                    .wrap_err("failed to write default config")?;
                println!("config written to {}", path.display());
            }
            ConfigSubcommand::Show => {
                let config = WorkerConfig::load_or_default(&datadir)?;
                print!("{}", config.to_yaml()?);
            }
        }
        Ok(())
    }
}
