//! Meal planner CLI
//!
//! Command-line tools for the backup subsystem.
//!
//! # Commands
//!
//! - `serve` - Run the HTTP backup server
//! - `info` - Display collection statistics
//! - `export` - Write a dump script or JSON export
//! - `check` - Check a backup version for compatibility
//! - `exec` - Run a script file in the sandbox
//! - `token` - Mint a bearer token

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Meal planner backup and administration tools.
#[derive(Parser)]
#[command(name = "mealplan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON snapshot file holding the database
    #[arg(global = true, short, long, env = "MEALPLAN_DATA")]
    data: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP backup server
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Token signing secret
        #[arg(long, hide_env_values = true, env = "MEALPLAN_AUTH_SECRET")]
        secret: Option<String>,

        /// Hide internal error details from responses
        #[arg(long)]
        production: bool,
    },

    /// Display collection statistics
    Info {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a dump script or JSON export
    Export {
        /// Export format (mongodb, json)
        #[arg(short, long, default_value = "mongodb")]
        format: String,

        /// Collections to export, comma separated (default: all)
        #[arg(short, long, value_delimiter = ',')]
        collections: Vec<String>,

        /// Include index definitions
        #[arg(short, long)]
        include_indexes: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a backup version for compatibility
    Check {
        /// Version recorded in the backup
        #[arg(short, long)]
        backup_version: String,

        /// Backup file whose metadata lists collection schemas
        #[arg(short, long)]
        metadata: Option<PathBuf>,
    },

    /// Run a script file in the sandbox
    Exec {
        /// Script to run
        script: PathBuf,

        /// Write changes back to the snapshot file
        #[arg(short, long)]
        save: bool,

        /// Maximum evaluation steps (default: unlimited)
        #[arg(long)]
        step_limit: Option<u64>,
    },

    /// Mint a bearer token
    Token {
        /// Role (admin, user)
        #[arg(short, long, default_value = "admin")]
        role: String,

        /// Token signing secret
        #[arg(long, hide_env_values = true, env = "MEALPLAN_AUTH_SECRET")]
        secret: String,

        /// User id (default: random)
        #[arg(short, long)]
        user: Option<Uuid>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so exports can be piped from stdout.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let data = cli.data.as_deref();
    match cli.command {
        Commands::Serve {
            bind,
            secret,
            production,
        } => {
            commands::serve::run(data, bind, secret, production)?;
        }
        Commands::Info { format } => {
            commands::info::run(data, &format)?;
        }
        Commands::Export {
            format,
            collections,
            include_indexes,
            output,
        } => {
            commands::export::run(data, &format, collections, include_indexes, output.as_deref())?;
        }
        Commands::Check {
            backup_version,
            metadata,
        } => {
            commands::check::run(&backup_version, metadata.as_deref())?;
        }
        Commands::Exec {
            script,
            save,
            step_limit,
        } => {
            commands::exec::run(data, &script, save, step_limit)?;
        }
        Commands::Token { role, secret, user } => {
            commands::token::run(&role, &secret, user)?;
        }
    }

    Ok(())
}
