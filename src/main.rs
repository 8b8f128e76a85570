//! # Title Chain CLI (`tchain`)
//!
//! ## Usage
//!
//! ```bash
//! tchain --config ./config/tchain.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tchain init` | Create the SQLite database and run schema migrations |
//! | `tchain discover <seed>...` | Run iterative discovery for one or more properties |
//! | `tchain chain <property>` | Rebuild and print the chain of title from stored documents |
//! | `tchain queue status <property>` | Show the search queue for a property |
//! | `tchain queue reset <property>` | Drop every queued search for a property |
//! | `tchain documents <property>` | List stored documents |
//! | `tchain stats` | Database overview |
//!
//! ## Examples
//!
//! ```bash
//! tchain init
//! tchain discover seeds/A1234567890.toml seeds/B2222.toml
//! tchain chain A1234567890 --owner "MARY JONES"
//! tchain queue status A1234567890 --json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use title_chain::{config, discover_cmd, logging, migrate, report, stats};

/// Title Chain: iterative chain-of-title discovery against a public
/// records index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tchain.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tchain",
    about = "Title Chain: iterative chain-of-title discovery against a public records index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tchain.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Discover documents for the properties described by seed files.
    ///
    /// Properties run concurrently up to `discovery.pool_size`; all of them
    /// share one throttled connection to the records index.
    Discover {
        /// Seed files (`.toml` or `.json`), one property each.
        #[arg(required = true)]
        seeds: Vec<PathBuf>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Build the chain of title from documents already stored.
    Chain {
        property: String,

        /// Current owner, used to check that the last deed reaches them.
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Inspect or reset a property's search queue.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// List the documents stored for a property.
    Documents {
        property: String,

        #[arg(long)]
        json: bool,
    },

    /// Show database statistics.
    Stats,
}

#[derive(Subcommand)]
enum QueueAction {
    /// Per-status counts and every task.
    Status {
        property: String,

        #[arg(long)]
        json: bool,
    },
    /// Delete every task for the property.
    Reset { property: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Discover { seeds, json } => {
            discover_cmd::run_discover(&cfg, &seeds, json).await?;
        }
        Commands::Chain {
            property,
            owner,
            json,
        } => {
            report::run_chain(&cfg, &property, owner.as_deref(), json).await?;
        }
        Commands::Queue { action } => match action {
            QueueAction::Status { property, json } => {
                report::run_queue_status(&cfg, &property, json).await?;
            }
            QueueAction::Reset { property } => {
                report::run_queue_reset(&cfg, &property).await?;
            }
        },
        Commands::Documents { property, json } => {
            report::run_documents(&cfg, &property, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
