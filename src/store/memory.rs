//! In-memory store backed by a single mutex.
//!
//! Serves the test suites and embedded previews. One lock over the whole
//! state gives the same write-guard guarantee the Postgres backend gets
//! from transactional conditional updates: guard check, row write, and log
//! append all happen while the lock is held.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{
    Annotation, Grid, GridKind, NewPool, Page, Paged, Pool, Square, SquareLog, SquareWrite, Store,
    WriteGuard,
};
use crate::draw::Draw;
use crate::error::{Error, Result};
use crate::state::SquareState;

#[derive(Default)]
struct State {
    pools: HashMap<i64, Pool>,
    grids: HashMap<i64, Grid>,
    squares: HashMap<(i64, i32), Square>,
    logs: Vec<SquareLog>,
    annotations: HashMap<(i64, i32), Annotation>,
    next_pool_id: i64,
    next_grid_id: i64,
    next_log_id: i64,
}

pub struct MemStore {
    state: Mutex<State>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore { state: Mutex::new(State::default()) }
    }
}

impl Default for MemStore {
    fn default() -> MemStore {
        MemStore::new()
    }
}

/// Create a grid with its full set of unclaimed squares. Callers hold the
/// state lock, which is what makes the creation atomic.
fn add_grid(state: &mut State, pool_id: i64, name: &str, kind: GridKind) -> Grid {
    let now = Utc::now();
    state.next_grid_id += 1;
    let ord = state
        .grids
        .values()
        .filter(|g| g.pool_id == pool_id)
        .map(|g| g.ord)
        .max()
        .map_or(0, |m| m + 1);
    let grid = Grid {
        id: state.next_grid_id,
        pool_id,
        ord,
        name: name.to_string(),
        kind,
        event_date: None,
        home_team_name: None,
        home_team_color_1: None,
        home_team_color_2: None,
        away_team_name: None,
        away_team_color_1: None,
        away_team_color_2: None,
        notes: None,
        draw: None,
        drawn_at: None,
        created_at: now,
        modified_at: now,
    };
    state.grids.insert(grid.id, grid.clone());
    for square_id in 0..kind.square_count() {
        state.squares.insert(
            (grid.id, square_id),
            Square {
                grid_id: grid.id,
                square_id,
                state: SquareState::Unclaimed,
                claimant: String::new(),
                owner: None,
                version: 1,
                modified_at: now,
            },
        );
    }
    grid
}

fn page_slice<T: Clone>(items: Vec<T>, page: Page) -> Paged<T> {
    let total = items.len() as i64;
    let offset = page.offset.max(0) as usize;
    let limit = page.limit.max(0) as usize;
    let items = items.into_iter().skip(offset).take(limit).collect();
    Paged { items, total }
}

#[async_trait]
impl Store for MemStore {
    // ── Pools ───────────────────────────────────────────────────

    async fn insert_pool(&self, new_pool: NewPool) -> Result<Pool> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        state.next_pool_id += 1;
        let pool = Pool {
            id: state.next_pool_id,
            token: new_pool.token,
            user_id: new_pool.user_id,
            name: new_pool.name,
            grid_kind: new_pool.grid_kind,
            join_password_hash: new_pool.join_password_hash,
            locks_at: None,
            created_at: now,
            modified_at: now,
        };
        state.pools.insert(pool.id, pool.clone());
        add_grid(&mut state, pool.id, &pool.name, pool.grid_kind);
        Ok(pool)
    }

    async fn pool_by_id(&self, id: i64) -> Result<Option<Pool>> {
        Ok(self.state.lock().unwrap().pools.get(&id).cloned())
    }

    async fn pool_by_token(&self, token: &str) -> Result<Option<Pool>> {
        let state = self.state.lock().unwrap();
        Ok(state.pools.values().find(|p| p.token == token).cloned())
    }

    async fn token_in_use(&self, token: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.pools.values().any(|p| p.token == token))
    }

    async fn pools_owned_by(&self, user_id: i64, page: Page) -> Result<Paged<Pool>> {
        let state = self.state.lock().unwrap();
        let mut pools: Vec<Pool> =
            state.pools.values().filter(|p| p.user_id == user_id).cloned().collect();
        pools.sort_by_key(|p| std::cmp::Reverse(p.id));
        Ok(page_slice(pools, page))
    }

    async fn update_pool(&self, pool: &Pool) -> Result<Pool> {
        let mut state = self.state.lock().unwrap();
        let stored = state.pools.get_mut(&pool.id).ok_or(Error::NotFound("pool"))?;
        stored.name = pool.name.clone();
        stored.grid_kind = pool.grid_kind;
        stored.join_password_hash = pool.join_password_hash.clone();
        stored.locks_at = pool.locks_at;
        stored.modified_at = Utc::now();
        Ok(stored.clone())
    }

    // ── Grids ───────────────────────────────────────────────────

    async fn insert_grid(&self, pool_id: i64, name: &str, kind: GridKind) -> Result<Grid> {
        let mut state = self.state.lock().unwrap();
        if !state.pools.contains_key(&pool_id) {
            return Err(Error::NotFound("pool"));
        }
        Ok(add_grid(&mut state, pool_id, name, kind))
    }

    async fn grid_by_id(&self, id: i64) -> Result<Option<Grid>> {
        Ok(self.state.lock().unwrap().grids.get(&id).cloned())
    }

    async fn grids_for_pool(&self, pool_id: i64, page: Page) -> Result<Paged<Grid>> {
        let state = self.state.lock().unwrap();
        let mut grids: Vec<Grid> =
            state.grids.values().filter(|g| g.pool_id == pool_id).cloned().collect();
        grids.sort_by_key(|g| (g.ord, g.id));
        Ok(page_slice(grids, page))
    }

    async fn update_grid(&self, grid: &Grid) -> Result<Grid> {
        let mut state = self.state.lock().unwrap();
        let stored = state.grids.get_mut(&grid.id).ok_or(Error::NotFound("grid"))?;
        // Board settings only; the draw is owned by save_draw.
        stored.name = grid.name.clone();
        stored.event_date = grid.event_date;
        stored.home_team_name = grid.home_team_name.clone();
        stored.home_team_color_1 = grid.home_team_color_1.clone();
        stored.home_team_color_2 = grid.home_team_color_2.clone();
        stored.away_team_name = grid.away_team_name.clone();
        stored.away_team_color_1 = grid.away_team_color_1.clone();
        stored.away_team_color_2 = grid.away_team_color_2.clone();
        stored.notes = grid.notes.clone();
        stored.modified_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_grid(&self, pool_id: i64, grid_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.grids.get(&grid_id) {
            Some(grid) if grid.pool_id == pool_id => {}
            _ => return Err(Error::NotFound("grid")),
        }
        let remaining = state.grids.values().filter(|g| g.pool_id == pool_id).count();
        if remaining <= 1 {
            return Err(Error::LastGrid);
        }
        state.grids.remove(&grid_id);
        state.squares.retain(|(g, _), _| *g != grid_id);
        state.annotations.retain(|(g, _), _| *g != grid_id);
        state.logs.retain(|log| log.grid_id != grid_id);
        Ok(())
    }

    async fn set_grid_order(&self, pool_id: i64, grid_ids: &[i64]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for id in grid_ids {
            match state.grids.get(id) {
                Some(grid) if grid.pool_id == pool_id => {}
                _ => return Err(Error::field("grids", "grid does not belong to this pool")),
            }
        }
        for (ord, id) in grid_ids.iter().enumerate() {
            if let Some(grid) = state.grids.get_mut(id) {
                grid.ord = ord as i32;
                grid.modified_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn save_draw(&self, grid_id: i64, draw: &Draw) -> Result<Grid> {
        let mut state = self.state.lock().unwrap();
        let grid = state.grids.get_mut(&grid_id).ok_or(Error::NotFound("grid"))?;
        if grid.draw.is_some() {
            return Err(Error::AlreadyDrawn);
        }
        let now = Utc::now();
        grid.draw = Some(draw.clone());
        grid.drawn_at = Some(now);
        grid.modified_at = now;
        Ok(grid.clone())
    }

    // ── Squares ─────────────────────────────────────────────────

    async fn square(&self, grid_id: i64, square_id: i32) -> Result<Option<Square>> {
        Ok(self.state.lock().unwrap().squares.get(&(grid_id, square_id)).cloned())
    }

    async fn squares_for_grid(&self, grid_id: i64) -> Result<Vec<Square>> {
        let state = self.state.lock().unwrap();
        let mut squares: Vec<Square> =
            state.squares.values().filter(|s| s.grid_id == grid_id).cloned().collect();
        squares.sort_by_key(|s| s.square_id);
        Ok(squares)
    }

    async fn save_square(&self, write: SquareWrite) -> Result<Square> {
        let mut state = self.state.lock().unwrap();
        let key = (write.grid_id, write.square_id);
        let saved = {
            let square = state.squares.get_mut(&key).ok_or(Error::NotFound("square"))?;
            let guard_holds = match write.guard {
                WriteGuard::MustBeUnclaimed => square.state == SquareState::Unclaimed,
                WriteGuard::MustBeOwnedBy(identity) => {
                    square.state != SquareState::Unclaimed && square.owner == Some(identity)
                }
                WriteGuard::MustMatchVersion(version) => square.version == version,
            };
            if !guard_holds {
                return Err(match write.guard {
                    WriteGuard::MustBeUnclaimed => Error::AlreadyClaimed,
                    WriteGuard::MustBeOwnedBy(_) | WriteGuard::MustMatchVersion(_) => {
                        Error::StaleState
                    }
                });
            }
            square.state = write.state;
            square.claimant = write.claimant.clone();
            square.owner = write.owner;
            square.version += 1;
            square.modified_at = Utc::now();
            square.clone()
        };
        state.next_log_id += 1;
        let log_id = state.next_log_id;
        state.logs.push(SquareLog {
            id: log_id,
            grid_id: write.grid_id,
            square_id: write.square_id,
            state: write.log.state,
            claimant: write.log.claimant,
            actor: write.log.actor,
            note: write.log.note,
            remote_addr: write.log.remote_addr,
            created_at: Utc::now(),
        });
        Ok(saved)
    }

    // ── Audit trail ─────────────────────────────────────────────

    async fn square_logs(
        &self,
        grid_id: i64,
        square_id: i32,
        page: Page,
    ) -> Result<Paged<SquareLog>> {
        let state = self.state.lock().unwrap();
        let mut logs: Vec<SquareLog> = state
            .logs
            .iter()
            .filter(|log| log.grid_id == grid_id && log.square_id == square_id)
            .cloned()
            .collect();
        logs.sort_by_key(|log| std::cmp::Reverse(log.id));
        Ok(page_slice(logs, page))
    }

    async fn grid_logs(&self, grid_id: i64, page: Page) -> Result<Paged<SquareLog>> {
        let state = self.state.lock().unwrap();
        let mut logs: Vec<SquareLog> =
            state.logs.iter().filter(|log| log.grid_id == grid_id).cloned().collect();
        logs.sort_by_key(|log| std::cmp::Reverse(log.id));
        Ok(page_slice(logs, page))
    }

    // ── Annotations ─────────────────────────────────────────────

    async fn upsert_annotation(
        &self,
        grid_id: i64,
        square_id: i32,
        annotation: &str,
        icon: i16,
    ) -> Result<Annotation> {
        let mut state = self.state.lock().unwrap();
        if !state.grids.contains_key(&grid_id) {
            return Err(Error::NotFound("grid"));
        }
        let now = Utc::now();
        let entry = state
            .annotations
            .entry((grid_id, square_id))
            .and_modify(|a| {
                a.annotation = annotation.to_string();
                a.icon = icon;
                a.modified_at = now;
            })
            .or_insert_with(|| Annotation {
                grid_id,
                square_id,
                annotation: annotation.to_string(),
                icon,
                created_at: now,
                modified_at: now,
            });
        Ok(entry.clone())
    }

    async fn delete_annotation(&self, grid_id: i64, square_id: i32) -> Result<()> {
        self.state.lock().unwrap().annotations.remove(&(grid_id, square_id));
        Ok(())
    }

    async fn annotations_for_grid(&self, grid_id: i64) -> Result<Vec<Annotation>> {
        let state = self.state.lock().unwrap();
        let mut annotations: Vec<Annotation> =
            state.annotations.values().filter(|a| a.grid_id == grid_id).cloned().collect();
        annotations.sort_by_key(|a| a.square_id);
        Ok(annotations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::store::LogEntry;

    fn new_pool() -> NewPool {
        NewPool {
            token: "Ab3_x9-Z".to_string(),
            user_id: 1,
            name: "Office Pool".to_string(),
            grid_kind: GridKind::Std100,
            join_password_hash: String::new(),
        }
    }

    async fn store_with_grid() -> (MemStore, i64) {
        let store = MemStore::new();
        let pool = store.insert_pool(new_pool()).await.unwrap();
        let grids = store.grids_for_pool(pool.id, Page::new(0, 10)).await.unwrap();
        (store, grids.items[0].id)
    }

    fn claim_write(grid_id: i64, square_id: i32, claimant: &str, user: i64) -> SquareWrite {
        SquareWrite {
            grid_id,
            square_id,
            state: SquareState::Claimed,
            claimant: claimant.to_string(),
            owner: Some(Identity::User(user)),
            guard: WriteGuard::MustBeUnclaimed,
            log: LogEntry {
                state: SquareState::Claimed,
                claimant: claimant.to_string(),
                actor: Some(Identity::User(user)),
                note: "user: initial claim".to_string(),
                remote_addr: None,
            },
        }
    }

    #[tokio::test]
    async fn pool_creation_seeds_a_full_board() {
        let (store, grid_id) = store_with_grid().await;
        let squares = store.squares_for_grid(grid_id).await.unwrap();
        assert_eq!(squares.len(), 100);
        assert!(squares
            .iter()
            .all(|s| s.state == SquareState::Unclaimed && s.claimant.is_empty() && s.version == 1));
        let grid = store.grid_by_id(grid_id).await.unwrap().unwrap();
        assert_eq!(grid.name, "Office Pool");
        assert_eq!(grid.kind, GridKind::Std100);
    }

    #[tokio::test]
    async fn claim_guard_admits_exactly_one_writer() {
        let (store, grid_id) = store_with_grid().await;
        store.save_square(claim_write(grid_id, 15, "Alice", 1)).await.unwrap();

        let err = store.save_square(claim_write(grid_id, 15, "Bob", 2)).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyClaimed));

        let square = store.square(grid_id, 15).await.unwrap().unwrap();
        assert_eq!(square.claimant, "Alice");
        assert_eq!(square.version, 2);
    }

    #[tokio::test]
    async fn failed_guard_appends_no_log() {
        let (store, grid_id) = store_with_grid().await;
        store.save_square(claim_write(grid_id, 15, "Alice", 1)).await.unwrap();
        let _ = store.save_square(claim_write(grid_id, 15, "Bob", 2)).await;

        let logs = store.square_logs(grid_id, 15, Page::new(0, 100)).await.unwrap();
        assert_eq!(logs.total, 1);
        assert_eq!(logs.items[0].claimant, "Alice");
    }

    #[tokio::test]
    async fn version_guard_rejects_stale_writers() {
        let (store, grid_id) = store_with_grid().await;
        store.save_square(claim_write(grid_id, 15, "Alice", 1)).await.unwrap();

        let square = store.square(grid_id, 15).await.unwrap().unwrap();
        let mut write = claim_write(grid_id, 15, "Alicia", 1);
        write.guard = WriteGuard::MustMatchVersion(square.version);
        store.save_square(write).await.unwrap();

        // Same observed version again: the first write already bumped it.
        let mut stale = claim_write(grid_id, 15, "Alyce", 1);
        stale.guard = WriteGuard::MustMatchVersion(square.version);
        let err = store.save_square(stale).await.unwrap_err();
        assert!(matches!(err, Error::StaleState));
    }

    #[tokio::test]
    async fn ownership_guard_checks_identity_and_state() {
        let (store, grid_id) = store_with_grid().await;
        store.save_square(claim_write(grid_id, 15, "Alice", 1)).await.unwrap();

        let mut unclaim = claim_write(grid_id, 15, "", 1);
        unclaim.state = SquareState::Unclaimed;
        unclaim.owner = None;
        unclaim.guard = WriteGuard::MustBeOwnedBy(Identity::User(2));
        assert!(matches!(store.save_square(unclaim).await, Err(Error::StaleState)));

        let mut unclaim = claim_write(grid_id, 15, "", 1);
        unclaim.state = SquareState::Unclaimed;
        unclaim.owner = None;
        unclaim.guard = WriteGuard::MustBeOwnedBy(Identity::User(1));
        let square = store.save_square(unclaim).await.unwrap();
        assert_eq!(square.state, SquareState::Unclaimed);
        assert!(square.owner.is_none());
    }

    #[tokio::test]
    async fn missing_square_is_not_found() {
        let (store, grid_id) = store_with_grid().await;
        let err = store.save_square(claim_write(grid_id, 400, "Alice", 1)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound("square")));
    }

    #[tokio::test]
    async fn draw_saves_once() {
        let (store, grid_id) = store_with_grid().await;
        let draw = Draw::generate(10);
        let grid = store.save_draw(grid_id, &draw).await.unwrap();
        assert_eq!(grid.draw.as_ref(), Some(&draw));
        assert!(grid.drawn_at.is_some());

        let err = store.save_draw(grid_id, &Draw::generate(10)).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyDrawn));
        let grid = store.grid_by_id(grid_id).await.unwrap().unwrap();
        assert_eq!(grid.draw, Some(draw));
    }

    #[tokio::test]
    async fn update_grid_never_touches_the_draw() {
        let (store, grid_id) = store_with_grid().await;
        let draw = Draw::generate(10);
        store.save_draw(grid_id, &draw).await.unwrap();

        let mut grid = store.grid_by_id(grid_id).await.unwrap().unwrap();
        grid.name = "Sunday Board".to_string();
        grid.draw = None;
        grid.drawn_at = None;
        let updated = store.update_grid(&grid).await.unwrap();
        assert_eq!(updated.name, "Sunday Board");
        assert_eq!(updated.draw, Some(draw));
    }

    #[tokio::test]
    async fn last_grid_cannot_be_deleted() {
        let (store, grid_id) = store_with_grid().await;
        let pool_id = store.grid_by_id(grid_id).await.unwrap().unwrap().pool_id;
        assert!(matches!(store.delete_grid(pool_id, grid_id).await, Err(Error::LastGrid)));

        let second = store.insert_grid(pool_id, "Second", GridKind::Std25).await.unwrap();
        store.delete_grid(pool_id, grid_id).await.unwrap();
        assert!(store.grid_by_id(grid_id).await.unwrap().is_none());
        assert!(store.squares_for_grid(grid_id).await.unwrap().is_empty());
        assert!(store.grid_by_id(second.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn grid_order_follows_the_given_ids() {
        let (store, first) = store_with_grid().await;
        let pool_id = store.grid_by_id(first).await.unwrap().unwrap().pool_id;
        let second = store.insert_grid(pool_id, "Second", GridKind::Std100).await.unwrap();

        store.set_grid_order(pool_id, &[second.id, first]).await.unwrap();
        let grids = store.grids_for_pool(pool_id, Page::new(0, 10)).await.unwrap();
        assert_eq!(grids.items[0].id, second.id);
        assert_eq!(grids.items[1].id, first);

        let err = store.set_grid_order(pool_id, &[9999]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn annotations_upsert_and_clear() {
        let (store, grid_id) = store_with_grid().await;
        let a = store.upsert_annotation(grid_id, 3, "winner Q1", 0).await.unwrap();
        assert_eq!(a.icon, 0);
        let b = store.upsert_annotation(grid_id, 3, "winner Q1 and Q2", 8).await.unwrap();
        assert_eq!(b.icon, 8);
        assert_eq!(b.created_at, a.created_at);

        assert_eq!(store.annotations_for_grid(grid_id).await.unwrap().len(), 1);
        store.delete_annotation(grid_id, 3).await.unwrap();
        store.delete_annotation(grid_id, 3).await.unwrap();
        assert!(store.annotations_for_grid(grid_id).await.unwrap().is_empty());
    }
}
