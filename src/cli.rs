use clap::{Parser, Subcommand};

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Field;
use crate::notify::Console;
use crate::store::{ConfigStore, TomlFile};
use crate::trigger::Trigger;

#[derive(Parser)]
#[command(version, about = "One-way sync of a local vault to a backup host over rsync")]
pub struct Cmdline {
    /// Settings file to use instead of the platform default
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Copy the vault to the backup host
    Sync {
        /// Validate settings and print the command without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or edit settings
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    Show,
    Set {
        field: Field,
        value: String,
    },
    /// Print where settings are stored
    Path,
}

/// Run a parsed command line; `Ok(false)` when a sync was requested and did not succeed
pub async fn invoke(cmdline: Cmdline) -> anyhow::Result<bool> {
    let backend = match cmdline.config {
        Some(path) => TomlFile::new(path),
        None => TomlFile::default_location()?,
    };

    let store = Arc::new(ConfigStore::open(backend));

    match cmdline.command {
        Command::Sync { dry_run } => {
            let trigger = Trigger::new(store, Arc::new(Console));

            let triggered = if dry_run {
                trigger.dry_run()
            } else {
                trigger.on_triggered_until(interrupted()).await
            };

            Ok(triggered.is_success())
        }

        Command::Config(ConfigCommand::Show) => {
            println!("{}", store.snapshot());
            Ok(true)
        }

        Command::Config(ConfigCommand::Set { field, value }) => {
            store.set(field, value)?;
            Ok(true)
        }

        Command::Config(ConfigCommand::Path) => {
            println!("{}", store.location());
            Ok(true)
        }
    }
}

/// Resolves on Ctrl-C; never resolves if the signal can't be listened for
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("unable to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
