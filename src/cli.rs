//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Resolves the
//! acting identity from the global flags, connects the Postgres-backed
//! engine, and renders operation results as plain lines on stdout.

use anyhow::{anyhow, Context, Result};
use gridstake::store::annotation_icon;
use gridstake::{Actor, Engine, GridKind, Identity, Page, PgStore, SquareState};

use super::{Cli, Commands};

pub fn run(cli: &Cli) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(dispatch(cli))
}

async fn dispatch(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Migrate => {
            let db = pg_store(cli).await?;
            db.apply_schema(include_str!("../schema.sql")).await?;
            println!("schema applied");
            Ok(())
        }
        Commands::CreatePool { name, kind, join_password_hash } => {
            let owner = cli
                .user
                .ok_or_else(|| anyhow!("--user is required to create a pool"))?;
            let kind = parse_kind(kind)?;
            let engine = engine(cli).await?;
            let pool = engine.create_pool(owner, name, kind, join_password_hash).await?;
            println!("pool {} created: token {}", pool.id, pool.token);
            Ok(())
        }
        Commands::ShowPool { token, json } => {
            let engine = engine(cli).await?;
            let pool = engine.pool_by_token(token).await?;
            let grids = engine.grids_for_pool(pool.id, Page::new(0, 25)).await?;
            if *json {
                let doc = serde_json::json!({ "pool": pool, "grids": grids.items });
                println!("{}", serde_json::to_string_pretty(&doc)?);
                return Ok(());
            }
            println!("pool {}  {}", pool.id, pool.name);
            println!("token: {}", pool.token);
            println!("kind for new grids: {}", pool.grid_kind.as_str());
            match pool.locks_at {
                Some(at) if pool.is_locked() => println!("locked since {}", at),
                Some(at) => println!("locks at {}", at),
                None => println!("unlocked"),
            }
            println!("grids ({}):", grids.total);
            for grid in grids.items {
                print_grid_line(&grid);
            }
            Ok(())
        }
        Commands::Grids { token } => {
            let engine = engine(cli).await?;
            let pool = engine.pool_by_token(token).await?;
            let grids = engine.grids_for_pool(pool.id, Page::new(0, 25)).await?;
            println!("{} grids", grids.total);
            for grid in grids.items {
                print_grid_line(&grid);
            }
            Ok(())
        }
        Commands::Board { grid, json } => {
            let engine = engine(cli).await?;
            let board = engine.grid_by_id(*grid).await?;
            let squares = engine.squares_for_grid(*grid).await?;
            let annotations = engine.annotations_for_grid(*grid).await?;
            if *json {
                let doc = serde_json::json!({
                    "grid": board,
                    "squares": squares,
                    "annotations": annotations,
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
                return Ok(());
            }
            println!("{}  ({})", board.name, board.kind.description());
            match &board.draw {
                Some(draw) => {
                    println!("home numbers: {}", fmt_numbers(&draw.home_numbers));
                    println!("away numbers: {}", fmt_numbers(&draw.away_numbers));
                }
                None => println!("numbers not drawn yet"),
            }
            let claimed = squares
                .iter()
                .filter(|s| s.state != SquareState::Unclaimed)
                .count();
            println!("{} of {} squares claimed", claimed, squares.len());
            for square in &squares {
                let annotation = annotations.iter().find(|a| a.square_id == square.square_id);
                if square.state == SquareState::Unclaimed && annotation.is_none() {
                    continue;
                }
                let marker = annotation
                    .map(|a| {
                        format!(
                            "  [{}] {}",
                            annotation_icon(a.icon).unwrap_or("?"),
                            a.annotation
                        )
                    })
                    .unwrap_or_default();
                println!(
                    "{:>3}  {:<17} {}{}",
                    square.square_id,
                    square.state.as_str(),
                    square.claimant,
                    marker
                );
            }
            Ok(())
        }
        Commands::Claim { grid, square, name } => {
            let actor = actor_from(cli)?;
            let engine = engine(cli).await?;
            let saved = engine.claim(*grid, *square, name, &actor).await?;
            println!("square {} claimed by {}", saved.square_id, saved.claimant);
            Ok(())
        }
        Commands::Unclaim { grid, square } => {
            let actor = actor_from(cli)?;
            let engine = engine(cli).await?;
            let saved = engine.unclaim(*grid, *square, &actor).await?;
            println!("square {} unclaimed", saved.square_id);
            Ok(())
        }
        Commands::Rename { grid, square, name } => {
            let actor = actor_from(cli)?;
            let engine = engine(cli).await?;
            let saved = engine.rename(*grid, *square, name, &actor).await?;
            println!("square {} renamed to {}", saved.square_id, saved.claimant);
            Ok(())
        }
        Commands::SetState { grid, square, state, note } => {
            let actor = actor_from(cli)?;
            let state = SquareState::parse(state).ok_or_else(|| {
                anyhow!(
                    "unknown state `{state}` (unclaimed, claimed, paid-unconfirmed, paid-confirmed)"
                )
            })?;
            let engine = engine(cli).await?;
            let saved = engine.set_state(*grid, *square, state, note, &actor).await?;
            println!("square {} set to {}", saved.square_id, saved.state.as_str());
            Ok(())
        }
        Commands::Draw { grid } => {
            let actor = actor_from(cli)?;
            let engine = engine(cli).await?;
            let saved = engine.draw_numbers(*grid, &actor).await?;
            let draw = saved.draw.context("draw missing after save")?;
            println!("home numbers: {}", fmt_numbers(&draw.home_numbers));
            println!("away numbers: {}", fmt_numbers(&draw.away_numbers));
            Ok(())
        }
        Commands::Logs { grid, square, offset, limit, json } => {
            let actor = actor_from(cli)?;
            let engine = engine(cli).await?;
            let page = Page::new(*offset, *limit);
            let logs = match square {
                Some(square) => engine.square_logs(*grid, *square, page, &actor).await?,
                None => engine.grid_logs(*grid, page, &actor).await?,
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&logs)?);
                return Ok(());
            }
            println!("{} entries total", logs.total);
            for entry in logs.items {
                let actor_name = entry
                    .actor
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>6}  {}  sq {:>3}  {:<17} {:<20} {}  {}",
                    entry.id,
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.square_id,
                    entry.state.as_str(),
                    entry.claimant,
                    actor_name,
                    entry.note
                );
            }
            Ok(())
        }
        Commands::Lock { token, at } => {
            let actor = actor_from(cli)?;
            let engine = engine(cli).await?;
            let pool = engine.pool_by_token(token).await?;
            let saved = engine.lock_pool(pool.id, *at, &actor).await?;
            match saved.locks_at {
                Some(at) if saved.is_locked() => println!("pool {} locked since {}", saved.token, at),
                Some(at) => println!("pool {} locks at {}", saved.token, at),
                None => println!("pool {} unlocked", saved.token),
            }
            Ok(())
        }
        Commands::Unlock { token } => {
            let actor = actor_from(cli)?;
            let engine = engine(cli).await?;
            let pool = engine.pool_by_token(token).await?;
            let saved = engine.unlock_pool(pool.id, &actor).await?;
            println!("pool {} unlocked", saved.token);
            Ok(())
        }
    }
}

/// Resolve the acting identity from the global flags. Runs before any
/// database connection so identity mistakes fail fast.
fn actor_from(cli: &Cli) -> Result<Actor> {
    let identity = match (cli.user, cli.guest) {
        (Some(_), Some(_)) => return Err(anyhow!("--user and --guest are mutually exclusive")),
        (Some(id), None) => Identity::User(id),
        (None, Some(id)) => Identity::Guest(id),
        (None, None) => {
            return Err(anyhow!(
                "an acting identity is required: set --user <id> or --guest <uuid>"
            ))
        }
    };
    Ok(if cli.admin {
        Actor::admin(identity)
    } else {
        match identity {
            Identity::User(id) => Actor::user(id),
            Identity::Guest(id) => Actor::guest(id),
        }
    })
}

async fn pg_store(cli: &Cli) -> Result<PgStore> {
    let database_url = cli
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow!("DATABASE_URL is required (set via --database-url or env)"))?;
    PgStore::connect(database_url)
        .await
        .context("failed to connect to PostgreSQL")
}

async fn engine(cli: &Cli) -> Result<Engine> {
    Ok(Engine::new(pg_store(cli).await?))
}

fn parse_kind(kind: &str) -> Result<GridKind> {
    GridKind::parse(kind).ok_or_else(|| anyhow!("unknown grid kind `{kind}` (std100, std25)"))
}

fn fmt_numbers(numbers: &[u8]) -> String {
    numbers
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_grid_line(grid: &gridstake::Grid) {
    let drawn = if grid.draw.is_some() { ", drawn" } else { "" };
    println!("  {}  {} ({}{})", grid.id, grid.name, grid.kind.as_str(), drawn);
}
