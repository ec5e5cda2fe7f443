//! # Store — Persistence Seam and Model Types
//!
//! Two backends implement [`Store`]: [`PgStore`] (sqlx/PostgreSQL, the
//! production path) and [`MemStore`] (single-mutex maps for tests and
//! embedded previews).
//!
//! ## Tables
//!
//! - `pools`: share token, owner, grid kind for future grids, lock timestamp
//! - `grids`: ordered per pool, board settings, the draw once it happens
//! - `squares`: one row per position, with the claim state and a version
//! - `square_logs`: append-only audit trail
//! - `grid_annotations`: admin overlay notes, one per square
//!
//! ## Write guards
//!
//! `save_square` is the heart of the concurrency story: the caller names a
//! [`WriteGuard`] and the backend evaluates it atomically with the row
//! update and the audit append. All three commit or none do, so a lost race
//! leaves no trace. Backends without native conditional writes must
//! serialize access instead; `MemStore` holds one lock across the check and
//! the write.

pub mod memory;
pub mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::draw::Draw;
use crate::error::Result;
use crate::identity::Identity;
use crate::state::SquareState;

// ── Pools ───────────────────────────────────────────────────────

/// A squares pool: the container players join by share token.
#[derive(Clone, Debug, Serialize)]
pub struct Pool {
    pub id: i64,
    pub token: String,
    pub user_id: i64,
    pub name: String,
    /// Kind used for grids created from now on; existing grids keep theirs.
    pub grid_kind: GridKind,
    /// Opaque; hashing and verification happen upstream.
    #[serde(skip)]
    pub join_password_hash: String,
    pub locks_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Pool {
    /// A pool is locked once `locks_at` arrives. A future timestamp is a
    /// scheduled lock and leaves the pool open until then.
    pub fn is_locked(&self) -> bool {
        self.locked_as_of(Utc::now())
    }

    pub fn locked_as_of(&self, at: DateTime<Utc>) -> bool {
        matches!(self.locks_at, Some(t) if t <= at)
    }
}

/// Input for pool creation. The store creates the first grid and its full
/// set of unclaimed squares in the same transaction.
#[derive(Clone, Debug)]
pub struct NewPool {
    pub token: String,
    pub user_id: i64,
    pub name: String,
    pub grid_kind: GridKind,
    pub join_password_hash: String,
}

// ── Grids ───────────────────────────────────────────────────────

/// Board layouts a pool can use for its grids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridKind {
    Std25,
    Std100,
}

impl GridKind {
    pub const ALL: [GridKind; 2] = [GridKind::Std100, GridKind::Std25];

    pub fn square_count(&self) -> i32 {
        match self {
            GridKind::Std25 => 25,
            GridKind::Std100 => 100,
        }
    }

    /// Digits drawn per axis: one permutation of `0..axis_len`.
    pub fn axis_len(&self) -> u8 {
        match self {
            GridKind::Std25 => 5,
            GridKind::Std100 => 10,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            GridKind::Std25 => "Standard, 25 squares",
            GridKind::Std100 => "Standard, 100 squares",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GridKind::Std25 => "std25",
            GridKind::Std100 => "std100",
        }
    }

    pub fn parse(s: &str) -> Option<GridKind> {
        match s {
            "std25" => Some(GridKind::Std25),
            "std100" => Some(GridKind::Std100),
            _ => None,
        }
    }
}

/// One board within a pool.
#[derive(Clone, Debug, Serialize)]
pub struct Grid {
    pub id: i64,
    pub pool_id: i64,
    /// Position within the pool's grid list.
    pub ord: i32,
    pub name: String,
    /// Fixed at creation; the pool's kind only governs future grids.
    pub kind: GridKind,
    pub event_date: Option<DateTime<Utc>>,
    pub home_team_name: Option<String>,
    pub home_team_color_1: Option<String>,
    pub home_team_color_2: Option<String>,
    pub away_team_name: Option<String>,
    pub away_team_color_1: Option<String>,
    pub away_team_color_2: Option<String>,
    pub notes: Option<String>,
    pub draw: Option<Draw>,
    pub drawn_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

// ── Squares ─────────────────────────────────────────────────────

/// One claimable position on a grid. `square_id` is the 0-based position,
/// `0..kind.square_count()`.
#[derive(Clone, Debug, Serialize)]
pub struct Square {
    pub grid_id: i64,
    pub square_id: i32,
    pub state: SquareState,
    pub claimant: String,
    pub owner: Option<Identity>,
    /// Bumped on every successful write; admin edits guard on it.
    pub version: i64,
    pub modified_at: DateTime<Utc>,
}

/// Condition a square write asserts at commit time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteGuard {
    /// The square must still be unclaimed (participant claims).
    MustBeUnclaimed,
    /// The square must still be claimed by this identity (unclaims).
    MustBeOwnedBy(Identity),
    /// The square's version must match what the caller read (admin edits).
    MustMatchVersion(i64),
}

/// The full image a square write applies, plus its audit entry.
#[derive(Clone, Debug)]
pub struct SquareWrite {
    pub grid_id: i64,
    pub square_id: i32,
    pub state: SquareState,
    pub claimant: String,
    pub owner: Option<Identity>,
    pub guard: WriteGuard,
    pub log: LogEntry,
}

/// Audit entry appended atomically with a square write.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub state: SquareState,
    pub claimant: String,
    pub actor: Option<Identity>,
    pub note: String,
    pub remote_addr: Option<String>,
}

/// One audit trail row.
#[derive(Clone, Debug, Serialize)]
pub struct SquareLog {
    pub id: i64,
    pub grid_id: i64,
    pub square_id: i32,
    pub state: SquareState,
    pub claimant: String,
    pub actor: Option<Identity>,
    pub note: String,
    pub remote_addr: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Annotations ─────────────────────────────────────────────────

/// Admin overlay note on one square of a grid.
#[derive(Clone, Debug, Serialize)]
pub struct Annotation {
    pub grid_id: i64,
    pub square_id: i32,
    pub annotation: String,
    pub icon: i16,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Icon table for annotations: stored id to font-awesome name.
pub const ANNOTATION_ICONS: [(i16, &str); 10] = [
    (0, "trophy"),
    (1, "dollar-sign"),
    (2, "money-bill"),
    (3, "exclamation-circle"),
    (4, "dice"),
    (5, "arrow-alt-circle-right"),
    (6, "football-ball"),
    (7, "bookmark"),
    (8, "award"),
    (9, "bomb"),
];

/// Font-awesome name for a stored icon id, if the id is valid.
pub fn annotation_icon(icon: i16) -> Option<&'static str> {
    ANNOTATION_ICONS
        .iter()
        .find(|(id, _)| *id == icon)
        .map(|(_, name)| *name)
}

// ── Pagination ──────────────────────────────────────────────────

/// Offset pagination as callers supply it. The engine clamps it before it
/// reaches a backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(offset: i64, limit: i64) -> Page {
        Page { offset, limit }
    }

    /// Negative offsets floor at zero; a non-positive limit takes the
    /// default; the limit caps at `max`.
    pub fn clamp(self, default: i64, max: i64) -> Page {
        Page {
            offset: self.offset.max(0),
            limit: if self.limit <= 0 { default } else { self.limit.min(max) },
        }
    }
}

/// One page of results plus the unpaged total.
#[derive(Clone, Debug, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
}

// ── The trait ───────────────────────────────────────────────────

/// Persistence operations the engine needs.
///
/// Contracts every backend honors:
///
/// - `insert_pool` and `insert_grid` create the grid's squares atomically
///   with the grid itself.
/// - `save_square` evaluates the guard, updates the row, bumps the version,
///   and appends the audit entry as one atomic unit. A guard miss maps to
///   `AlreadyClaimed` (claim guard) or `StaleState` (the others) and writes
///   nothing.
/// - `save_draw` persists the draw only when none exists; a miss maps to
///   `AlreadyDrawn` and keeps the stored draw unchanged.
/// - `update_grid` replaces board settings only and never touches the draw.
/// - `delete_grid` refuses to remove a pool's last grid (`LastGrid`),
///   serialized per pool so concurrent deletes cannot empty it.
/// - Log queries return entries newest first.
#[async_trait]
pub trait Store: Send + Sync {
    // Pools
    async fn insert_pool(&self, new_pool: NewPool) -> Result<Pool>;
    async fn pool_by_id(&self, id: i64) -> Result<Option<Pool>>;
    async fn pool_by_token(&self, token: &str) -> Result<Option<Pool>>;
    async fn token_in_use(&self, token: &str) -> Result<bool>;
    async fn pools_owned_by(&self, user_id: i64, page: Page) -> Result<Paged<Pool>>;
    async fn update_pool(&self, pool: &Pool) -> Result<Pool>;

    // Grids
    async fn insert_grid(&self, pool_id: i64, name: &str, kind: GridKind) -> Result<Grid>;
    async fn grid_by_id(&self, id: i64) -> Result<Option<Grid>>;
    async fn grids_for_pool(&self, pool_id: i64, page: Page) -> Result<Paged<Grid>>;
    async fn update_grid(&self, grid: &Grid) -> Result<Grid>;
    async fn delete_grid(&self, pool_id: i64, grid_id: i64) -> Result<()>;
    async fn set_grid_order(&self, pool_id: i64, grid_ids: &[i64]) -> Result<()>;
    async fn save_draw(&self, grid_id: i64, draw: &Draw) -> Result<Grid>;

    // Squares
    async fn square(&self, grid_id: i64, square_id: i32) -> Result<Option<Square>>;
    async fn squares_for_grid(&self, grid_id: i64) -> Result<Vec<Square>>;
    async fn save_square(&self, write: SquareWrite) -> Result<Square>;

    // Audit trail
    async fn square_logs(&self, grid_id: i64, square_id: i32, page: Page)
        -> Result<Paged<SquareLog>>;
    async fn grid_logs(&self, grid_id: i64, page: Page) -> Result<Paged<SquareLog>>;

    // Annotations
    async fn upsert_annotation(
        &self,
        grid_id: i64,
        square_id: i32,
        annotation: &str,
        icon: i16,
    ) -> Result<Annotation>;
    async fn delete_annotation(&self, grid_id: i64, square_id: i32) -> Result<()>;
    async fn annotations_for_grid(&self, grid_id: i64) -> Result<Vec<Annotation>>;
}
