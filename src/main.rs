//! # Main — CLI Entry Point
//!
//! Ops tool for squares pools backed by PostgreSQL. Routes subcommands to
//! the engine: pool and grid management, square claims, number draws, and
//! the audit trail.
//!
//! ## Subcommands
//!
//! `migrate` applies the bundled schema. `create-pool`, `show-pool`,
//! `grids`, `lock`, and `unlock` manage pools (addressed by token).
//! `board`, `claim`, `unclaim`, `rename`, `set-state`, `draw`, and `logs`
//! work on grids and their squares.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection.
//! - `--user` / `--guest`: the acting identity (registered user id or
//!   guest uuid). Mutations require one.
//! - `--admin`: act with administrator rights.
//! - `LOG_FORMAT=json`: JSON logs instead of human-readable output.

mod cli;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "gridstake", about = "Manage squares pools: claims, draws, and audit trails")]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Act as this registered user id
    #[arg(long)]
    user: Option<i64>,

    /// Act as this guest uuid
    #[arg(long)]
    guest: Option<Uuid>,

    /// Act with administrator rights
    #[arg(long)]
    admin: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the bundled schema.sql to the database
    Migrate,
    /// Create a pool with its first grid
    CreatePool {
        /// Pool name
        #[arg(long)]
        name: String,
        /// Grid kind: std100 or std25
        #[arg(long, default_value = "std100")]
        kind: String,
        /// Opaque join-password hash to store (hash it upstream)
        #[arg(long, default_value = "")]
        join_password_hash: String,
    },
    /// Show a pool and its grids
    ShowPool {
        /// Pool token
        token: String,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List a pool's grids
    Grids {
        /// Pool token
        token: String,
    },
    /// Print a grid's board: draw numbers, claims, annotations
    Board {
        /// Grid id
        #[arg(long)]
        grid: i64,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Claim a square
    Claim {
        /// Grid id
        #[arg(long)]
        grid: i64,
        /// Square position, 0-based
        #[arg(long)]
        square: i32,
        /// Claimant name to record
        #[arg(long)]
        name: String,
    },
    /// Release a square the acting identity owns
    Unclaim {
        /// Grid id
        #[arg(long)]
        grid: i64,
        /// Square position, 0-based
        #[arg(long)]
        square: i32,
    },
    /// Change the claimant name on a square (admin)
    Rename {
        /// Grid id
        #[arg(long)]
        grid: i64,
        /// Square position, 0-based
        #[arg(long)]
        square: i32,
        /// New claimant name
        #[arg(long)]
        name: String,
    },
    /// Set a square's state (admin)
    SetState {
        /// Grid id
        #[arg(long)]
        grid: i64,
        /// Square position, 0-based
        #[arg(long)]
        square: i32,
        /// Target state: unclaimed, claimed, paid-unconfirmed, paid-confirmed
        #[arg(long)]
        state: String,
        /// Note for the audit entry
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Draw the grid's numbers (admin, one-time)
    Draw {
        /// Grid id
        #[arg(long)]
        grid: i64,
    },
    /// Show audit log entries, newest first (admin)
    Logs {
        /// Grid id
        #[arg(long)]
        grid: i64,
        /// Restrict to one square position
        #[arg(long)]
        square: Option<i32>,
        /// Entries to skip
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Entries per page
        #[arg(long, default_value_t = 25)]
        limit: i64,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Lock a pool against participant changes (admin)
    Lock {
        /// Pool token
        token: String,
        /// Lock at this time instead of now (RFC 3339)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Unlock a pool (admin)
    Unlock {
        /// Pool token
        token: String,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Structured logging: LOG_FORMAT=json for machines, human-readable otherwise
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt().json().with_target(false).init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    cli::run(&cli)
}
