//! PostgreSQL store — conditional writes and transactional audit appends.
//!
//! Every square write runs as a guard-specific `UPDATE ... WHERE ... RETURNING`
//! plus the audit `INSERT` in one transaction, so the guard check, the row
//! image, and the log entry commit or vanish together. Draws use the same
//! conditional-update shape (`WHERE home_numbers IS NULL`) to admit exactly
//! one writer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{
    Annotation, Grid, GridKind, NewPool, Page, Paged, Pool, Square, SquareLog, SquareWrite, Store,
    WriteGuard,
};
use crate::draw::Draw;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::state::SquareState;

// ── Row types ───────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct PoolRow {
    id: i64,
    token: String,
    user_id: i64,
    name: String,
    grid_kind: String,
    join_password_hash: String,
    locks_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl PoolRow {
    fn into_pool(self) -> Result<Pool> {
        let grid_kind =
            GridKind::parse(&self.grid_kind).ok_or_else(|| decode_err("grid_kind", &self.grid_kind))?;
        Ok(Pool {
            id: self.id,
            token: self.token,
            user_id: self.user_id,
            name: self.name,
            grid_kind,
            join_password_hash: self.join_password_hash,
            locks_at: self.locks_at,
            created_at: self.created_at,
            modified_at: self.modified_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GridRow {
    id: i64,
    pool_id: i64,
    ord: i32,
    name: String,
    kind: String,
    event_date: Option<DateTime<Utc>>,
    home_team_name: Option<String>,
    home_team_color_1: Option<String>,
    home_team_color_2: Option<String>,
    away_team_name: Option<String>,
    away_team_color_1: Option<String>,
    away_team_color_2: Option<String>,
    notes: Option<String>,
    home_numbers: Option<Vec<i16>>,
    away_numbers: Option<Vec<i16>>,
    drawn_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl GridRow {
    fn into_grid(self) -> Result<Grid> {
        let kind = GridKind::parse(&self.kind).ok_or_else(|| decode_err("kind", &self.kind))?;
        let draw = match (self.home_numbers, self.away_numbers) {
            (Some(home), Some(away)) => Some(Draw {
                home_numbers: home.into_iter().map(|n| n as u8).collect(),
                away_numbers: away.into_iter().map(|n| n as u8).collect(),
            }),
            _ => None,
        };
        Ok(Grid {
            id: self.id,
            pool_id: self.pool_id,
            ord: self.ord,
            name: self.name,
            kind,
            event_date: self.event_date,
            home_team_name: self.home_team_name,
            home_team_color_1: self.home_team_color_1,
            home_team_color_2: self.home_team_color_2,
            away_team_name: self.away_team_name,
            away_team_color_1: self.away_team_color_1,
            away_team_color_2: self.away_team_color_2,
            notes: self.notes,
            draw,
            drawn_at: self.drawn_at,
            created_at: self.created_at,
            modified_at: self.modified_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SquareRow {
    grid_id: i64,
    square_id: i32,
    state: String,
    claimant: String,
    user_id: Option<i64>,
    guest_id: Option<Uuid>,
    version: i64,
    modified_at: DateTime<Utc>,
}

impl SquareRow {
    fn into_square(self) -> Result<Square> {
        let state =
            SquareState::parse(&self.state).ok_or_else(|| decode_err("state", &self.state))?;
        Ok(Square {
            grid_id: self.grid_id,
            square_id: self.square_id,
            state,
            claimant: self.claimant,
            owner: owner_from(self.user_id, self.guest_id),
            version: self.version,
            modified_at: self.modified_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    grid_id: i64,
    square_id: i32,
    state: String,
    claimant: String,
    user_id: Option<i64>,
    guest_id: Option<Uuid>,
    note: String,
    remote_addr: Option<String>,
    created_at: DateTime<Utc>,
}

impl LogRow {
    fn into_log(self) -> Result<SquareLog> {
        let state =
            SquareState::parse(&self.state).ok_or_else(|| decode_err("state", &self.state))?;
        Ok(SquareLog {
            id: self.id,
            grid_id: self.grid_id,
            square_id: self.square_id,
            state,
            claimant: self.claimant,
            actor: owner_from(self.user_id, self.guest_id),
            note: self.note,
            remote_addr: self.remote_addr,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AnnotationRow {
    grid_id: i64,
    square_id: i32,
    annotation: String,
    icon: i16,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl AnnotationRow {
    fn into_annotation(self) -> Annotation {
        Annotation {
            grid_id: self.grid_id,
            square_id: self.square_id,
            annotation: self.annotation,
            icon: self.icon,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

/// Identities split across a (user_id, guest_id) column pair; exactly one
/// side is set for an owned square, neither for an unclaimed one.
fn owner_parts(owner: Option<Identity>) -> (Option<i64>, Option<Uuid>) {
    match owner {
        Some(Identity::User(id)) => (Some(id), None),
        Some(Identity::Guest(id)) => (None, Some(id)),
        None => (None, None),
    }
}

fn owner_from(user_id: Option<i64>, guest_id: Option<Uuid>) -> Option<Identity> {
    match (user_id, guest_id) {
        (Some(id), _) => Some(Identity::User(id)),
        (None, Some(id)) => Some(Identity::Guest(id)),
        (None, None) => None,
    }
}

fn decode_err(column: &str, value: &str) -> Error {
    Error::Storage(sqlx::Error::Decode(
        format!("unknown {} value: {}", column, value).into(),
    ))
}

const POOL_COLUMNS: &str =
    "id, token, user_id, name, grid_kind, join_password_hash, locks_at, created_at, modified_at";

const GRID_COLUMNS: &str = "id, pool_id, ord, name, kind, event_date, \
     home_team_name, home_team_color_1, home_team_color_2, \
     away_team_name, away_team_color_1, away_team_color_2, \
     notes, home_numbers, away_numbers, drawn_at, created_at, modified_at";

const SQUARE_COLUMNS: &str =
    "grid_id, square_id, state, claimant, user_id, guest_id, version, modified_at";

const LOG_COLUMNS: &str =
    "id, grid_id, square_id, state, claimant, user_id, guest_id, note, remote_addr, created_at";

/// Insert a grid at the end of the pool's ordering and seed its full set of
/// unclaimed squares. Runs inside the caller's transaction.
async fn insert_grid_tx(
    tx: &mut Transaction<'_, Postgres>,
    pool_id: i64,
    name: &str,
    kind: GridKind,
) -> Result<GridRow> {
    let sql = format!(
        "INSERT INTO grids (pool_id, ord, name, kind)
         VALUES ($1, (SELECT COALESCE(MAX(ord) + 1, 0) FROM grids WHERE pool_id = $1), $2, $3)
         RETURNING {}",
        GRID_COLUMNS
    );
    let row = sqlx::query_as::<_, GridRow>(&sql)
        .bind(pool_id)
        .bind(name)
        .bind(kind.as_str())
        .fetch_one(&mut **tx)
        .await?;
    sqlx::query(
        "INSERT INTO squares (grid_id, square_id)
         SELECT $1, gs FROM generate_series(0, $2) AS gs",
    )
    .bind(row.id)
    .bind(kind.square_count() - 1)
    .execute(&mut **tx)
    .await?;
    Ok(row)
}

// ── Store struct and connection ─────────────────────────────────

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to PostgreSQL using the provided database URL.
    pub async fn connect(database_url: &str) -> Result<PgStore> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(PgStore { pool })
    }

    pub fn from_pool(pool: PgPool) -> PgStore {
        PgStore { pool }
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check: execute `SELECT 1` to verify database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Apply a multi-statement DDL script, e.g. the bundled `schema.sql`.
    pub async fn apply_schema(&self, schema: &str) -> Result<()> {
        sqlx::raw_sql(schema).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    // ── Pools ───────────────────────────────────────────────────

    async fn insert_pool(&self, new_pool: NewPool) -> Result<Pool> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "INSERT INTO pools (token, user_id, name, grid_kind, join_password_hash)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            POOL_COLUMNS
        );
        let row = sqlx::query_as::<_, PoolRow>(&sql)
            .bind(&new_pool.token)
            .bind(new_pool.user_id)
            .bind(&new_pool.name)
            .bind(new_pool.grid_kind.as_str())
            .bind(&new_pool.join_password_hash)
            .fetch_one(&mut *tx)
            .await?;
        insert_grid_tx(&mut tx, row.id, &new_pool.name, new_pool.grid_kind).await?;
        tx.commit().await?;
        row.into_pool()
    }

    async fn pool_by_id(&self, id: i64) -> Result<Option<Pool>> {
        let sql = format!("SELECT {} FROM pools WHERE id = $1", POOL_COLUMNS);
        let row = sqlx::query_as::<_, PoolRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PoolRow::into_pool).transpose()
    }

    async fn pool_by_token(&self, token: &str) -> Result<Option<Pool>> {
        let sql = format!("SELECT {} FROM pools WHERE token = $1", POOL_COLUMNS);
        let row = sqlx::query_as::<_, PoolRow>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PoolRow::into_pool).transpose()
    }

    async fn token_in_use(&self, token: &str) -> Result<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM pools WHERE token = $1)")
                .bind(token)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn pools_owned_by(&self, user_id: i64, page: Page) -> Result<Paged<Pool>> {
        let sql = format!(
            "SELECT {} FROM pools WHERE user_id = $1 ORDER BY id DESC LIMIT $2 OFFSET $3",
            POOL_COLUMNS
        );
        let rows = sqlx::query_as::<_, PoolRow>(&sql)
            .bind(user_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pools WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        let items = rows.into_iter().map(PoolRow::into_pool).collect::<Result<Vec<_>>>()?;
        Ok(Paged { items, total })
    }

    async fn update_pool(&self, pool: &Pool) -> Result<Pool> {
        let sql = format!(
            "UPDATE pools
             SET name = $2, grid_kind = $3, join_password_hash = $4, locks_at = $5,
                 modified_at = NOW()
             WHERE id = $1
             RETURNING {}",
            POOL_COLUMNS
        );
        let row = sqlx::query_as::<_, PoolRow>(&sql)
            .bind(pool.id)
            .bind(&pool.name)
            .bind(pool.grid_kind.as_str())
            .bind(&pool.join_password_hash)
            .bind(pool.locks_at)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(Error::NotFound("pool"))?.into_pool()
    }

    // ── Grids ───────────────────────────────────────────────────

    async fn insert_grid(&self, pool_id: i64, name: &str, kind: GridKind) -> Result<Grid> {
        let mut tx = self.pool.begin().await?;
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM pools WHERE id = $1)")
                .bind(pool_id)
                .fetch_one(&mut *tx)
                .await?;
        if !exists {
            return Err(Error::NotFound("pool"));
        }
        let row = insert_grid_tx(&mut tx, pool_id, name, kind).await?;
        tx.commit().await?;
        row.into_grid()
    }

    async fn grid_by_id(&self, id: i64) -> Result<Option<Grid>> {
        let sql = format!("SELECT {} FROM grids WHERE id = $1", GRID_COLUMNS);
        let row = sqlx::query_as::<_, GridRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(GridRow::into_grid).transpose()
    }

    async fn grids_for_pool(&self, pool_id: i64, page: Page) -> Result<Paged<Grid>> {
        let sql = format!(
            "SELECT {} FROM grids WHERE pool_id = $1 ORDER BY ord, id LIMIT $2 OFFSET $3",
            GRID_COLUMNS
        );
        let rows = sqlx::query_as::<_, GridRow>(&sql)
            .bind(pool_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM grids WHERE pool_id = $1")
            .bind(pool_id)
            .fetch_one(&self.pool)
            .await?;
        let items = rows.into_iter().map(GridRow::into_grid).collect::<Result<Vec<_>>>()?;
        Ok(Paged { items, total })
    }

    async fn update_grid(&self, grid: &Grid) -> Result<Grid> {
        // Board settings only; the draw columns are owned by save_draw.
        let sql = format!(
            "UPDATE grids
             SET name = $2, event_date = $3,
                 home_team_name = $4, home_team_color_1 = $5, home_team_color_2 = $6,
                 away_team_name = $7, away_team_color_1 = $8, away_team_color_2 = $9,
                 notes = $10, modified_at = NOW()
             WHERE id = $1
             RETURNING {}",
            GRID_COLUMNS
        );
        let row = sqlx::query_as::<_, GridRow>(&sql)
            .bind(grid.id)
            .bind(&grid.name)
            .bind(grid.event_date)
            .bind(&grid.home_team_name)
            .bind(&grid.home_team_color_1)
            .bind(&grid.home_team_color_2)
            .bind(&grid.away_team_name)
            .bind(&grid.away_team_color_1)
            .bind(&grid.away_team_color_2)
            .bind(&grid.notes)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(Error::NotFound("grid"))?.into_grid()
    }

    async fn delete_grid(&self, pool_id: i64, grid_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        // Row lock on the pool serializes deletes so two of them cannot
        // both see count = 2 and empty the pool together.
        let locked = sqlx::query_scalar::<_, i64>("SELECT id FROM pools WHERE id = $1 FOR UPDATE")
            .bind(pool_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(Error::NotFound("pool"));
        }
        let owned = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM grids WHERE id = $1 AND pool_id = $2)",
        )
        .bind(grid_id)
        .bind(pool_id)
        .fetch_one(&mut *tx)
        .await?;
        if !owned {
            return Err(Error::NotFound("grid"));
        }
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM grids WHERE pool_id = $1")
            .bind(pool_id)
            .fetch_one(&mut *tx)
            .await?;
        if count <= 1 {
            return Err(Error::LastGrid);
        }
        sqlx::query("DELETE FROM grids WHERE id = $1")
            .bind(grid_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_grid_order(&self, pool_id: i64, grid_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (ord, grid_id) in grid_ids.iter().enumerate() {
            let updated = sqlx::query(
                "UPDATE grids SET ord = $3, modified_at = NOW() WHERE id = $1 AND pool_id = $2",
            )
            .bind(grid_id)
            .bind(pool_id)
            .bind(ord as i32)
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(Error::field("grids", "grid does not belong to this pool"));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn save_draw(&self, grid_id: i64, draw: &Draw) -> Result<Grid> {
        let home: Vec<i16> = draw.home_numbers.iter().map(|n| *n as i16).collect();
        let away: Vec<i16> = draw.away_numbers.iter().map(|n| *n as i16).collect();
        let sql = format!(
            "UPDATE grids
             SET home_numbers = $2, away_numbers = $3, drawn_at = NOW(), modified_at = NOW()
             WHERE id = $1 AND home_numbers IS NULL
             RETURNING {}",
            GRID_COLUMNS
        );
        let row = sqlx::query_as::<_, GridRow>(&sql)
            .bind(grid_id)
            .bind(&home)
            .bind(&away)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row.into_grid(),
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM grids WHERE id = $1)",
                )
                .bind(grid_id)
                .fetch_one(&self.pool)
                .await?;
                if exists {
                    Err(Error::AlreadyDrawn)
                } else {
                    Err(Error::NotFound("grid"))
                }
            }
        }
    }

    // ── Squares ─────────────────────────────────────────────────

    async fn square(&self, grid_id: i64, square_id: i32) -> Result<Option<Square>> {
        let sql = format!(
            "SELECT {} FROM squares WHERE grid_id = $1 AND square_id = $2",
            SQUARE_COLUMNS
        );
        let row = sqlx::query_as::<_, SquareRow>(&sql)
            .bind(grid_id)
            .bind(square_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SquareRow::into_square).transpose()
    }

    async fn squares_for_grid(&self, grid_id: i64) -> Result<Vec<Square>> {
        let sql = format!(
            "SELECT {} FROM squares WHERE grid_id = $1 ORDER BY square_id",
            SQUARE_COLUMNS
        );
        let rows = sqlx::query_as::<_, SquareRow>(&sql)
            .bind(grid_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SquareRow::into_square).collect()
    }

    async fn save_square(&self, write: SquareWrite) -> Result<Square> {
        let (user_id, guest_id) = owner_parts(write.owner);
        let mut tx = self.pool.begin().await?;
        let row = match write.guard {
            WriteGuard::MustBeUnclaimed => {
                let sql = format!(
                    "UPDATE squares
                     SET state = $3, claimant = $4, user_id = $5, guest_id = $6,
                         version = version + 1, modified_at = NOW()
                     WHERE grid_id = $1 AND square_id = $2 AND state = 'unclaimed'
                     RETURNING {}",
                    SQUARE_COLUMNS
                );
                sqlx::query_as::<_, SquareRow>(&sql)
                    .bind(write.grid_id)
                    .bind(write.square_id)
                    .bind(write.state.as_str())
                    .bind(&write.claimant)
                    .bind(user_id)
                    .bind(guest_id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            WriteGuard::MustBeOwnedBy(identity) => {
                let (owner_user, owner_guest) = owner_parts(Some(identity));
                let sql = format!(
                    "UPDATE squares
                     SET state = $3, claimant = $4, user_id = $5, guest_id = $6,
                         version = version + 1, modified_at = NOW()
                     WHERE grid_id = $1 AND square_id = $2 AND state <> 'unclaimed'
                       AND (user_id = $7 OR guest_id = $8)
                     RETURNING {}",
                    SQUARE_COLUMNS
                );
                sqlx::query_as::<_, SquareRow>(&sql)
                    .bind(write.grid_id)
                    .bind(write.square_id)
                    .bind(write.state.as_str())
                    .bind(&write.claimant)
                    .bind(user_id)
                    .bind(guest_id)
                    .bind(owner_user)
                    .bind(owner_guest)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            WriteGuard::MustMatchVersion(version) => {
                let sql = format!(
                    "UPDATE squares
                     SET state = $3, claimant = $4, user_id = $5, guest_id = $6,
                         version = version + 1, modified_at = NOW()
                     WHERE grid_id = $1 AND square_id = $2 AND version = $7
                     RETURNING {}",
                    SQUARE_COLUMNS
                );
                sqlx::query_as::<_, SquareRow>(&sql)
                    .bind(write.grid_id)
                    .bind(write.square_id)
                    .bind(write.state.as_str())
                    .bind(&write.claimant)
                    .bind(user_id)
                    .bind(guest_id)
                    .bind(version)
                    .fetch_optional(&mut *tx)
                    .await?
            }
        };
        let Some(row) = row else {
            // Zero rows means the guard missed or the square does not exist.
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM squares WHERE grid_id = $1 AND square_id = $2)",
            )
            .bind(write.grid_id)
            .bind(write.square_id)
            .fetch_one(&mut *tx)
            .await?;
            return Err(if !exists {
                Error::NotFound("square")
            } else {
                match write.guard {
                    WriteGuard::MustBeUnclaimed => Error::AlreadyClaimed,
                    WriteGuard::MustBeOwnedBy(_) | WriteGuard::MustMatchVersion(_) => {
                        Error::StaleState
                    }
                }
            });
        };
        let (log_user, log_guest) = owner_parts(write.log.actor);
        sqlx::query(
            "INSERT INTO square_logs (grid_id, square_id, state, claimant, user_id, guest_id, note, remote_addr)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(write.grid_id)
        .bind(write.square_id)
        .bind(write.log.state.as_str())
        .bind(&write.log.claimant)
        .bind(log_user)
        .bind(log_guest)
        .bind(&write.log.note)
        .bind(write.log.remote_addr.as_deref())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        row.into_square()
    }

    // ── Audit trail ─────────────────────────────────────────────

    async fn square_logs(
        &self,
        grid_id: i64,
        square_id: i32,
        page: Page,
    ) -> Result<Paged<SquareLog>> {
        let sql = format!(
            "SELECT {} FROM square_logs WHERE grid_id = $1 AND square_id = $2
             ORDER BY id DESC LIMIT $3 OFFSET $4",
            LOG_COLUMNS
        );
        let rows = sqlx::query_as::<_, LogRow>(&sql)
            .bind(grid_id)
            .bind(square_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM square_logs WHERE grid_id = $1 AND square_id = $2",
        )
        .bind(grid_id)
        .bind(square_id)
        .fetch_one(&self.pool)
        .await?;
        let items = rows.into_iter().map(LogRow::into_log).collect::<Result<Vec<_>>>()?;
        Ok(Paged { items, total })
    }

    async fn grid_logs(&self, grid_id: i64, page: Page) -> Result<Paged<SquareLog>> {
        let sql = format!(
            "SELECT {} FROM square_logs WHERE grid_id = $1 ORDER BY id DESC LIMIT $2 OFFSET $3",
            LOG_COLUMNS
        );
        let rows = sqlx::query_as::<_, LogRow>(&sql)
            .bind(grid_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        let total =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM square_logs WHERE grid_id = $1")
                .bind(grid_id)
                .fetch_one(&self.pool)
                .await?;
        let items = rows.into_iter().map(LogRow::into_log).collect::<Result<Vec<_>>>()?;
        Ok(Paged { items, total })
    }

    // ── Annotations ─────────────────────────────────────────────

    async fn upsert_annotation(
        &self,
        grid_id: i64,
        square_id: i32,
        annotation: &str,
        icon: i16,
    ) -> Result<Annotation> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM grids WHERE id = $1)")
                .bind(grid_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(Error::NotFound("grid"));
        }
        let row = sqlx::query_as::<_, AnnotationRow>(
            "INSERT INTO grid_annotations (grid_id, square_id, annotation, icon)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (grid_id, square_id)
             DO UPDATE SET annotation = EXCLUDED.annotation, icon = EXCLUDED.icon,
                           modified_at = NOW()
             RETURNING grid_id, square_id, annotation, icon, created_at, modified_at",
        )
        .bind(grid_id)
        .bind(square_id)
        .bind(annotation)
        .bind(icon)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_annotation())
    }

    async fn delete_annotation(&self, grid_id: i64, square_id: i32) -> Result<()> {
        sqlx::query("DELETE FROM grid_annotations WHERE grid_id = $1 AND square_id = $2")
            .bind(grid_id)
            .bind(square_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn annotations_for_grid(&self, grid_id: i64) -> Result<Vec<Annotation>> {
        let rows = sqlx::query_as::<_, AnnotationRow>(
            "SELECT grid_id, square_id, annotation, icon, created_at, modified_at
             FROM grid_annotations WHERE grid_id = $1 ORDER BY square_id",
        )
        .bind(grid_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AnnotationRow::into_annotation).collect())
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_round_trips_through_column_pair() {
        let user = Some(Identity::User(42));
        let (u, g) = owner_parts(user);
        assert_eq!((u, g), (Some(42), None));
        assert_eq!(owner_from(u, g), user);

        let guest = Some(Identity::Guest(Uuid::from_u128(7)));
        let (u, g) = owner_parts(guest);
        assert_eq!(owner_from(u, g), guest);

        assert_eq!(owner_from(None, None), None);
    }

    #[test]
    fn grid_row_requires_both_axes_for_a_draw() {
        let row = |home: Option<Vec<i16>>, away: Option<Vec<i16>>| GridRow {
            id: 1,
            pool_id: 1,
            ord: 0,
            name: "Grid".into(),
            kind: "std100".into(),
            event_date: None,
            home_team_name: None,
            home_team_color_1: None,
            home_team_color_2: None,
            away_team_name: None,
            away_team_color_1: None,
            away_team_color_2: None,
            notes: None,
            home_numbers: home,
            away_numbers: away,
            drawn_at: None,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        };

        let grid = row(Some(vec![0, 1, 2]), Some(vec![2, 1, 0])).into_grid().unwrap();
        let draw = grid.draw.unwrap();
        assert_eq!(draw.home_numbers, vec![0, 1, 2]);
        assert_eq!(draw.away_numbers, vec![2, 1, 0]);

        assert!(row(Some(vec![0]), None).into_grid().unwrap().draw.is_none());
        assert!(row(None, None).into_grid().unwrap().draw.is_none());
    }

    #[test]
    fn unknown_enum_strings_surface_as_storage_errors() {
        let row = SquareRow {
            grid_id: 1,
            square_id: 0,
            state: "pending".into(),
            claimant: String::new(),
            user_id: None,
            guest_id: None,
            version: 1,
            modified_at: Utc::now(),
        };
        assert!(matches!(row.into_square(), Err(Error::Storage(_))));
    }
}
