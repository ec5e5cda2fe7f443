//! Limits and the static configuration surface.
//!
//! `Limits` carries the tunable bounds: maximum field lengths and pagination
//! caps. The defaults match the hosted service. `Configuration` packages the
//! limits together with the valid square states and grid kinds so callers
//! can build forms and pickers without hard-coding engine facts.

use serde::Serialize;

use crate::state::SquareState;
use crate::store::GridKind;

/// Tunable bounds for validation and pagination.
#[derive(Clone, Debug, Serialize)]
pub struct Limits {
    pub name_max_len: usize,
    pub claimant_max_len: usize,
    pub team_name_max_len: usize,
    pub notes_max_len: usize,
    pub annotation_max_len: usize,
    /// Informational for signup forms; hashing itself happens upstream.
    pub min_join_password_len: usize,
    pub log_default_per_page: i64,
    pub log_max_per_page: i64,
    pub grid_default_per_page: i64,
    pub grid_max_per_page: i64,
    pub pool_default_per_page: i64,
    pub pool_max_per_page: i64,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            name_max_len: 50,
            claimant_max_len: 50,
            team_name_max_len: 50,
            notes_max_len: 500,
            annotation_max_len: 100,
            min_join_password_len: 6,
            log_default_per_page: 100,
            log_max_per_page: 100,
            grid_default_per_page: 10,
            grid_max_per_page: 25,
            pool_default_per_page: 10,
            pool_max_per_page: 25,
        }
    }
}

/// Static facts a caller needs to render forms: limits, the square states an
/// admin can set, and the grid kinds a pool can use.
#[derive(Clone, Debug, Serialize)]
pub struct Configuration {
    pub limits: Limits,
    pub square_states: Vec<SquareState>,
    pub grid_kinds: Vec<GridKindInfo>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GridKindInfo {
    pub kind: GridKind,
    pub squares: i32,
    pub description: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_hosted_service() {
        let limits = Limits::default();
        assert_eq!(limits.name_max_len, 50);
        assert_eq!(limits.notes_max_len, 500);
        assert_eq!(limits.team_name_max_len, 50);
        assert_eq!(limits.min_join_password_len, 6);
        assert_eq!(limits.log_max_per_page, 100);
        assert_eq!(limits.grid_default_per_page, 10);
        assert_eq!(limits.grid_max_per_page, 25);
    }
}
