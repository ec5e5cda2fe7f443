//! # Engine — Claim Orchestration
//!
//! The operation surface of the crate. Each method validates its input,
//! loads the current rows, plans the transition with the pure logic in
//! [`crate::state`], and commits through the [`Store`] guard. Correctness
//! never depends on what the engine observed before the write: the guard
//! carried by each plan re-asserts the precondition at commit time, so a
//! racing request loses cleanly with `AlreadyClaimed` or `StaleState`.
//!
//! ## Locking
//!
//! Participant mutations check the pool lock before planning; admins
//! bypass it. The lock is a precondition, not a guard: a pool locking
//! mid-flight does not invalidate an in-flight write.
//!
//! ## Auth
//!
//! Admin-ness arrives on the [`Actor`] with every call. Square transitions
//! carry their admin checks inside the planner; everything else is gated
//! here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::{Configuration, GridKindInfo, Limits};
use crate::draw::{mint_token, Draw};
use crate::error::{Error, Result, ValidationErrors};
use crate::identity::Actor;
use crate::state::{self, Plan, SquareState};
use crate::store::{
    annotation_icon, Annotation, Grid, GridKind, LogEntry, NewPool, Page, Paged, Pool, Square,
    SquareLog, SquareWrite, Store,
};
use crate::validate;

/// Rounds of token generation before pool creation gives up.
const TOKEN_MINT_ATTEMPTS: usize = 5;

/// Full board settings for a grid. `update_grid` replaces them as a unit;
/// `None` or an empty string clears the field.
#[derive(Clone, Debug, Default)]
pub struct GridSettings {
    pub name: String,
    pub event_date: Option<DateTime<Utc>>,
    pub home_team_name: Option<String>,
    pub home_team_color_1: Option<String>,
    pub home_team_color_2: Option<String>,
    pub away_team_name: Option<String>,
    pub away_team_color_1: Option<String>,
    pub away_team_color_2: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    limits: Limits,
}

impl Engine {
    pub fn new<S>(store: S) -> Engine
    where
        S: Store + 'static,
    {
        Engine::with_limits(store, Limits::default())
    }

    pub fn with_limits<S>(store: S, limits: Limits) -> Engine
    where
        S: Store + 'static,
    {
        Engine { store: Arc::new(store), limits }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Static facts for building forms and pickers. Pure data, no I/O.
    pub fn configuration(&self) -> Configuration {
        Configuration {
            limits: self.limits.clone(),
            square_states: SquareState::ALL.to_vec(),
            grid_kinds: GridKind::ALL
                .iter()
                .map(|kind| GridKindInfo {
                    kind: *kind,
                    squares: kind.square_count(),
                    description: kind.description(),
                })
                .collect(),
        }
    }

    // ── Pools ───────────────────────────────────────────────────

    /// Create a pool, its first grid (named after the pool), and that
    /// grid's full set of unclaimed squares, atomically.
    pub async fn create_pool(
        &self,
        owner: i64,
        name: &str,
        kind: GridKind,
        join_password_hash: &str,
    ) -> Result<Pool> {
        let mut errors = ValidationErrors::new();
        let name = validate::printable(&mut errors, "name", name);
        validate::not_empty(&mut errors, "name", &name);
        validate::max_length(&mut errors, "name", &name, self.limits.name_max_len);
        errors.into_result()?;

        let mut token = mint_token();
        let mut attempts = 1;
        while self.store.token_in_use(&token).await? {
            if attempts >= TOKEN_MINT_ATTEMPTS {
                return Err(Error::field("token", "could not generate a unique token"));
            }
            token = mint_token();
            attempts += 1;
        }

        let pool = self
            .store
            .insert_pool(NewPool {
                token,
                user_id: owner,
                name,
                grid_kind: kind,
                join_password_hash: join_password_hash.to_string(),
            })
            .await?;
        info!(pool = pool.id, token = %pool.token, owner, "pool created");
        Ok(pool)
    }

    pub async fn pool_by_id(&self, pool_id: i64) -> Result<Pool> {
        self.pool(pool_id).await
    }

    pub async fn pool_by_token(&self, token: &str) -> Result<Pool> {
        self.store
            .pool_by_token(token)
            .await?
            .ok_or(Error::NotFound("pool"))
    }

    pub async fn pools_owned_by(&self, user_id: i64, page: Page) -> Result<Paged<Pool>> {
        let page = page.clamp(self.limits.pool_default_per_page, self.limits.pool_max_per_page);
        self.store.pools_owned_by(user_id, page).await
    }

    pub async fn rename_pool(&self, pool_id: i64, name: &str, actor: &Actor) -> Result<Pool> {
        let mut errors = ValidationErrors::new();
        let name = validate::printable(&mut errors, "name", name);
        validate::not_empty(&mut errors, "name", &name);
        validate::max_length(&mut errors, "name", &name, self.limits.name_max_len);
        errors.into_result()?;

        let mut pool = self.admin_pool(pool_id, actor).await?;
        pool.name = name;
        let saved = self.store.update_pool(&pool).await?;
        info!(pool = pool_id, name = %saved.name, "pool renamed");
        Ok(saved)
    }

    /// Store a new join-password hash. Hashing and verification are the
    /// embedding application's job; the hash is opaque here.
    pub async fn set_join_password(
        &self,
        pool_id: i64,
        hash: &str,
        actor: &Actor,
    ) -> Result<Pool> {
        let mut pool = self.admin_pool(pool_id, actor).await?;
        pool.join_password_hash = hash.to_string();
        let saved = self.store.update_pool(&pool).await?;
        info!(pool = pool_id, "join password changed");
        Ok(saved)
    }

    /// Change the kind used for grids created from now on. Existing grids
    /// keep the kind they were created with.
    pub async fn set_grid_kind(&self, pool_id: i64, kind: GridKind, actor: &Actor) -> Result<Pool> {
        let mut pool = self.admin_pool(pool_id, actor).await?;
        pool.grid_kind = kind;
        let saved = self.store.update_pool(&pool).await?;
        info!(pool = pool_id, kind = kind.as_str(), "grid kind changed");
        Ok(saved)
    }

    /// Lock the pool now, or at `at` when given (a future timestamp is a
    /// scheduled lock). Locked pools refuse participant mutations.
    pub async fn lock_pool(
        &self,
        pool_id: i64,
        at: Option<DateTime<Utc>>,
        actor: &Actor,
    ) -> Result<Pool> {
        let mut pool = self.admin_pool(pool_id, actor).await?;
        let at = at.unwrap_or_else(Utc::now);
        pool.locks_at = Some(at);
        let saved = self.store.update_pool(&pool).await?;
        info!(pool = pool_id, locks_at = %at, "pool locked");
        Ok(saved)
    }

    pub async fn unlock_pool(&self, pool_id: i64, actor: &Actor) -> Result<Pool> {
        let mut pool = self.admin_pool(pool_id, actor).await?;
        pool.locks_at = None;
        let saved = self.store.update_pool(&pool).await?;
        info!(pool = pool_id, "pool unlocked");
        Ok(saved)
    }

    /// Reorder the pool's grids to match `grid_ids`. Ids not belonging to
    /// the pool fail validation and nothing moves.
    pub async fn reorder_grids(
        &self,
        pool_id: i64,
        grid_ids: &[i64],
        actor: &Actor,
    ) -> Result<()> {
        self.admin_pool(pool_id, actor).await?;
        self.store.set_grid_order(pool_id, grid_ids).await?;
        info!(pool = pool_id, grids = grid_ids.len(), "grids reordered");
        Ok(())
    }

    // ── Grids ───────────────────────────────────────────────────

    /// Append a grid of the pool's current kind, named after the pool,
    /// with its squares, atomically.
    pub async fn create_grid(&self, pool_id: i64, actor: &Actor) -> Result<Grid> {
        let pool = self.admin_pool(pool_id, actor).await?;
        let grid = self.store.insert_grid(pool_id, &pool.name, pool.grid_kind).await?;
        info!(pool = pool_id, grid = grid.id, kind = grid.kind.as_str(), "grid created");
        Ok(grid)
    }

    pub async fn grid_by_id(&self, grid_id: i64) -> Result<Grid> {
        self.grid(grid_id).await
    }

    pub async fn grids_for_pool(&self, pool_id: i64, page: Page) -> Result<Paged<Grid>> {
        self.pool(pool_id).await?;
        let page = page.clamp(self.limits.grid_default_per_page, self.limits.grid_max_per_page);
        self.store.grids_for_pool(pool_id, page).await
    }

    /// Replace a grid's board settings. The draw is untouched.
    pub async fn update_grid(
        &self,
        grid_id: i64,
        settings: GridSettings,
        actor: &Actor,
    ) -> Result<Grid> {
        self.require_admin(actor)?;

        let mut errors = ValidationErrors::new();
        let name = validate::printable(&mut errors, "name", &settings.name);
        validate::not_empty(&mut errors, "name", &name);
        validate::max_length(&mut errors, "name", &name, self.limits.name_max_len);
        let home_team_name = optional_text(
            &mut errors,
            "home_team_name",
            settings.home_team_name.as_deref(),
            self.limits.team_name_max_len,
        );
        let away_team_name = optional_text(
            &mut errors,
            "away_team_name",
            settings.away_team_name.as_deref(),
            self.limits.team_name_max_len,
        );
        let home_team_color_1 =
            optional_color(&mut errors, "home_team_color_1", settings.home_team_color_1.as_deref());
        let home_team_color_2 =
            optional_color(&mut errors, "home_team_color_2", settings.home_team_color_2.as_deref());
        let away_team_color_1 =
            optional_color(&mut errors, "away_team_color_1", settings.away_team_color_1.as_deref());
        let away_team_color_2 =
            optional_color(&mut errors, "away_team_color_2", settings.away_team_color_2.as_deref());
        let notes = settings.notes.as_deref().map(|value| {
            let value = validate::printable_with_newline(&mut errors, "notes", value);
            validate::max_length(&mut errors, "notes", &value, self.limits.notes_max_len);
            value
        });
        errors.into_result()?;

        let mut grid = self.grid(grid_id).await?;
        grid.name = name;
        grid.event_date = settings.event_date;
        grid.home_team_name = home_team_name;
        grid.home_team_color_1 = home_team_color_1;
        grid.home_team_color_2 = home_team_color_2;
        grid.away_team_name = away_team_name;
        grid.away_team_color_1 = away_team_color_1;
        grid.away_team_color_2 = away_team_color_2;
        grid.notes = notes.filter(|n| !n.is_empty());
        let saved = self.store.update_grid(&grid).await?;
        info!(grid = grid_id, "grid settings updated");
        Ok(saved)
    }

    /// Delete a grid. The pool always keeps at least one grid; deleting
    /// the last one fails with `LastGrid`.
    pub async fn delete_grid(&self, pool_id: i64, grid_id: i64, actor: &Actor) -> Result<()> {
        self.admin_pool(pool_id, actor).await?;
        self.store.delete_grid(pool_id, grid_id).await?;
        info!(pool = pool_id, grid = grid_id, "grid deleted");
        Ok(())
    }

    pub async fn squares_for_grid(&self, grid_id: i64) -> Result<Vec<Square>> {
        self.grid(grid_id).await?;
        self.store.squares_for_grid(grid_id).await
    }

    pub async fn square(&self, grid_id: i64, square_id: i32) -> Result<Square> {
        self.store
            .square(grid_id, square_id)
            .await?
            .ok_or(Error::NotFound("square"))
    }

    // ── Square state machine ────────────────────────────────────

    /// Claim an unclaimed square for the acting identity.
    pub async fn claim(
        &self,
        grid_id: i64,
        square_id: i32,
        claimant: &str,
        actor: &Actor,
    ) -> Result<Square> {
        let mut errors = ValidationErrors::new();
        let claimant = validate::printable(&mut errors, "claimant", claimant);
        validate::contains_word_char(&mut errors, "claimant", &claimant);
        validate::max_length(&mut errors, "claimant", &claimant, self.limits.claimant_max_len);
        errors.into_result()?;

        let grid = self.grid(grid_id).await?;
        self.check_unlocked(&grid, actor).await?;
        let square = self.square(grid_id, square_id).await?;
        let plan = state::plan_claim(&square, &claimant, actor)?;
        let saved = self.save(plan, &square, actor).await?;
        info!(
            grid = grid_id,
            square = square_id,
            claimant = %saved.claimant,
            actor = %actor.identity,
            "square claimed"
        );
        Ok(saved)
    }

    /// Release a square the acting identity owns.
    pub async fn unclaim(&self, grid_id: i64, square_id: i32, actor: &Actor) -> Result<Square> {
        let grid = self.grid(grid_id).await?;
        self.check_unlocked(&grid, actor).await?;
        let square = self.square(grid_id, square_id).await?;
        let plan = state::plan_unclaim(&square, actor)?;
        let saved = self.save(plan, &square, actor).await?;
        info!(grid = grid_id, square = square_id, actor = %actor.identity, "square unclaimed");
        Ok(saved)
    }

    /// Change the claimant name on a claimed square. Admin only.
    pub async fn rename(
        &self,
        grid_id: i64,
        square_id: i32,
        new_claimant: &str,
        actor: &Actor,
    ) -> Result<Square> {
        let mut errors = ValidationErrors::new();
        let new_claimant = validate::printable(&mut errors, "claimant", new_claimant);
        validate::contains_word_char(&mut errors, "claimant", &new_claimant);
        validate::max_length(&mut errors, "claimant", &new_claimant, self.limits.claimant_max_len);
        errors.into_result()?;

        self.grid(grid_id).await?;
        let square = self.square(grid_id, square_id).await?;
        let plan = state::plan_rename(&square, &new_claimant, actor)?;
        let saved = self.save(plan, &square, actor).await?;
        info!(grid = grid_id, square = square_id, claimant = %saved.claimant, "claimant renamed");
        Ok(saved)
    }

    /// Move a square to any configured state. Admin only. The note is
    /// recorded verbatim on the audit entry.
    pub async fn set_state(
        &self,
        grid_id: i64,
        square_id: i32,
        new_state: SquareState,
        note: &str,
        actor: &Actor,
    ) -> Result<Square> {
        let mut errors = ValidationErrors::new();
        let note = validate::printable_with_newline(&mut errors, "note", note);
        validate::max_length(&mut errors, "note", &note, self.limits.notes_max_len);
        errors.into_result()?;

        self.grid(grid_id).await?;
        let square = self.square(grid_id, square_id).await?;
        let plan = state::plan_set_state(&square, new_state, &note, actor)?;
        let saved = self.save(plan, &square, actor).await?;
        info!(
            grid = grid_id,
            square = square_id,
            state = %saved.state,
            actor = %actor.identity,
            "square state set"
        );
        Ok(saved)
    }

    // ── Draw engine ─────────────────────────────────────────────

    /// Draw one random permutation of `0..axis_len` per axis and persist
    /// it. Exactly one concurrent caller wins; the draw never changes
    /// afterwards.
    pub async fn draw_numbers(&self, grid_id: i64, actor: &Actor) -> Result<Grid> {
        self.require_admin(actor)?;
        let grid = self.grid(grid_id).await?;
        if grid.draw.is_some() {
            return Err(Error::AlreadyDrawn);
        }
        let draw = Draw::generate(grid.kind.axis_len());
        match self.store.save_draw(grid_id, &draw).await {
            Ok(saved) => {
                info!(grid = grid_id, kind = grid.kind.as_str(), "numbers drawn");
                Ok(saved)
            }
            Err(Error::AlreadyDrawn) => {
                warn!(grid = grid_id, "draw lost its race");
                Err(Error::AlreadyDrawn)
            }
            Err(err) => {
                if matches!(err, Error::Storage(_)) {
                    error!(grid = grid_id, error = %err, "storage failure saving draw");
                }
                Err(err)
            }
        }
    }

    // ── Audit trail ─────────────────────────────────────────────

    /// Audit entries for one square, newest first. Admin only.
    pub async fn square_logs(
        &self,
        grid_id: i64,
        square_id: i32,
        page: Page,
        actor: &Actor,
    ) -> Result<Paged<SquareLog>> {
        self.require_admin(actor)?;
        self.square(grid_id, square_id).await?;
        let page = page.clamp(self.limits.log_default_per_page, self.limits.log_max_per_page);
        self.store.square_logs(grid_id, square_id, page).await
    }

    /// Audit entries for a whole grid, newest first. Admin only.
    pub async fn grid_logs(
        &self,
        grid_id: i64,
        page: Page,
        actor: &Actor,
    ) -> Result<Paged<SquareLog>> {
        self.require_admin(actor)?;
        self.grid(grid_id).await?;
        let page = page.clamp(self.limits.log_default_per_page, self.limits.log_max_per_page);
        self.store.grid_logs(grid_id, page).await
    }

    // ── Annotations ─────────────────────────────────────────────

    /// Set or replace the overlay annotation on a square. Admin only.
    pub async fn set_annotation(
        &self,
        grid_id: i64,
        square_id: i32,
        text: &str,
        icon: i16,
        actor: &Actor,
    ) -> Result<Annotation> {
        self.require_admin(actor)?;

        let mut errors = ValidationErrors::new();
        let text = validate::printable(&mut errors, "annotation", text);
        validate::not_empty(&mut errors, "annotation", &text);
        validate::max_length(&mut errors, "annotation", &text, self.limits.annotation_max_len);
        if annotation_icon(icon).is_none() {
            errors.add("icon", "must be a valid icon");
        }
        errors.into_result()?;

        let grid = self.grid(grid_id).await?;
        if square_id < 0 || square_id >= grid.kind.square_count() {
            return Err(Error::NotFound("square"));
        }
        let saved = self.store.upsert_annotation(grid_id, square_id, &text, icon).await?;
        info!(grid = grid_id, square = square_id, icon, "annotation set");
        Ok(saved)
    }

    /// Remove the annotation from a square, if any. Admin only.
    pub async fn clear_annotation(
        &self,
        grid_id: i64,
        square_id: i32,
        actor: &Actor,
    ) -> Result<()> {
        self.require_admin(actor)?;
        self.store.delete_annotation(grid_id, square_id).await?;
        info!(grid = grid_id, square = square_id, "annotation cleared");
        Ok(())
    }

    pub async fn annotations_for_grid(&self, grid_id: i64) -> Result<Vec<Annotation>> {
        self.grid(grid_id).await?;
        self.store.annotations_for_grid(grid_id).await
    }

    // ── Internals ───────────────────────────────────────────────

    fn require_admin(&self, actor: &Actor) -> Result<()> {
        if actor.admin {
            return Ok(());
        }
        warn!(actor = %actor.identity, "admin action refused");
        Err(Error::Forbidden("administrator required"))
    }

    async fn pool(&self, pool_id: i64) -> Result<Pool> {
        self.store.pool_by_id(pool_id).await?.ok_or(Error::NotFound("pool"))
    }

    async fn admin_pool(&self, pool_id: i64, actor: &Actor) -> Result<Pool> {
        self.require_admin(actor)?;
        self.pool(pool_id).await
    }

    async fn grid(&self, grid_id: i64) -> Result<Grid> {
        self.store.grid_by_id(grid_id).await?.ok_or(Error::NotFound("grid"))
    }

    async fn check_unlocked(&self, grid: &Grid, actor: &Actor) -> Result<()> {
        if actor.admin {
            return Ok(());
        }
        let pool = self.pool(grid.pool_id).await?;
        if pool.is_locked() {
            warn!(pool = pool.id, grid = grid.id, actor = %actor.identity, "pool is locked");
            return Err(Error::Forbidden("pool is locked"));
        }
        Ok(())
    }

    /// Commit a planned square write together with its audit entry.
    async fn save(&self, plan: Plan, square: &Square, actor: &Actor) -> Result<Square> {
        let write = SquareWrite {
            grid_id: square.grid_id,
            square_id: square.square_id,
            state: plan.state,
            claimant: plan.claimant,
            owner: plan.owner,
            guard: plan.guard,
            log: LogEntry {
                state: plan.state,
                claimant: plan.log_claimant,
                actor: Some(actor.identity),
                note: plan.note,
                remote_addr: actor.remote_addr.clone(),
            },
        };
        match self.store.save_square(write).await {
            Ok(saved) => Ok(saved),
            Err(err) => {
                match &err {
                    Error::AlreadyClaimed | Error::StaleState => {
                        warn!(
                            grid = square.grid_id,
                            square = square.square_id,
                            error = %err,
                            "square write lost its guard"
                        );
                    }
                    Error::Storage(_) => {
                        error!(
                            grid = square.grid_id,
                            square = square.square_id,
                            error = %err,
                            "storage failure saving square"
                        );
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }
}

fn optional_text(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&str>,
    max: usize,
) -> Option<String> {
    let value = value?;
    let value = validate::printable(errors, field, value);
    validate::max_length(errors, field, &value, max);
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn optional_color(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&str>,
) -> Option<String> {
    let value = value?;
    let value = validate::color(errors, field, value);
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
