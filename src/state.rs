//! # Square Lifecycle — States and Transition Planning
//!
//! A square is `Unclaimed` until a participant claims it; admins then move
//! it through the payment states or back. Planning is pure: given the square
//! as the caller read it and the requested action, produce the write to
//! attempt (row image, concurrency guard, audit note) or the typed error.
//!
//! | Action   | Who         | Legal from            | Guard              |
//! |----------|-------------|-----------------------|--------------------|
//! | Claim    | participant | `Unclaimed`           | still unclaimed    |
//! | Unclaim  | owner       | any claimed state     | still owned by them|
//! | Rename   | admin       | any claimed state     | version unchanged  |
//! | SetState | admin       | any state             | version unchanged  |
//!
//! Two invariants hold after every successful write: a square is `Unclaimed`
//! exactly when its claimant is empty and its owner is absent, and the row
//! version strictly increases. The planner never consults pool locks; the
//! caller checks that precondition before planning, and correctness under
//! concurrency comes from the guard evaluated at write time, not from the
//! plan.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::Actor;
use crate::store::{Square, WriteGuard};

/// Lifecycle state of a grid square.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SquareState {
    Unclaimed,
    Claimed,
    PaidUnconfirmed,
    PaidConfirmed,
}

impl SquareState {
    /// Every state an admin may set, in display order.
    pub const ALL: [SquareState; 4] = [
        SquareState::Unclaimed,
        SquareState::Claimed,
        SquareState::PaidUnconfirmed,
        SquareState::PaidConfirmed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SquareState::Unclaimed => "unclaimed",
            SquareState::Claimed => "claimed",
            SquareState::PaidUnconfirmed => "paid-unconfirmed",
            SquareState::PaidConfirmed => "paid-confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<SquareState> {
        match s {
            "unclaimed" => Some(SquareState::Unclaimed),
            "claimed" => Some(SquareState::Claimed),
            "paid-unconfirmed" => Some(SquareState::PaidUnconfirmed),
            "paid-confirmed" => Some(SquareState::PaidConfirmed),
            _ => None,
        }
    }

    /// Any state that carries a claimant.
    pub fn is_claimed_family(&self) -> bool {
        !matches!(self, SquareState::Unclaimed)
    }
}

impl std::fmt::Display for SquareState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A planned square write: the row image to store, the guard that must hold
/// at write time, and the audit entry to append with it.
#[derive(Clone, Debug)]
pub struct Plan {
    pub state: SquareState,
    pub claimant: String,
    pub owner: Option<crate::identity::Identity>,
    pub guard: WriteGuard,
    pub note: String,
    /// Claimant snapshot for the audit entry. Removal actions record the
    /// name being removed; everything else records the resulting name.
    pub log_claimant: String,
}

/// Plan a participant claim. Legal only from `Unclaimed`.
///
/// The claimant string must already be validated; planning only decides
/// transition legality.
pub fn plan_claim(square: &Square, claimant: &str, actor: &Actor) -> Result<Plan> {
    if square.state != SquareState::Unclaimed {
        return Err(Error::AlreadyClaimed);
    }
    Ok(Plan {
        state: SquareState::Claimed,
        claimant: claimant.to_string(),
        owner: Some(actor.identity),
        guard: WriteGuard::MustBeUnclaimed,
        note: "user: initial claim".to_string(),
        log_claimant: claimant.to_string(),
    })
}

/// Plan a participant unclaim. Legal only for the square's owner.
pub fn plan_unclaim(square: &Square, actor: &Actor) -> Result<Plan> {
    if square.owner != Some(actor.identity) {
        return Err(Error::Forbidden("only the claimant can unclaim a square"));
    }
    Ok(Plan {
        state: SquareState::Unclaimed,
        claimant: String::new(),
        owner: None,
        guard: WriteGuard::MustBeOwnedBy(actor.identity),
        note: format!("user: `{}` unclaimed", square.claimant),
        log_claimant: square.claimant.clone(),
    })
}

/// Plan an admin rename. The new name must differ from the current one, and
/// the square must have a claimant to rename.
pub fn plan_rename(square: &Square, new_claimant: &str, actor: &Actor) -> Result<Plan> {
    if !actor.admin {
        return Err(Error::Forbidden("administrator required"));
    }
    if square.state == SquareState::Unclaimed {
        return Err(Error::field("claimant", "square has no claimant"));
    }
    if new_claimant == square.claimant {
        return Err(Error::field("claimant", "must be a different name"));
    }
    Ok(Plan {
        state: square.state,
        claimant: new_claimant.to_string(),
        owner: square.owner,
        guard: WriteGuard::MustMatchVersion(square.version),
        note: format!("admin: changed claimant from {}", square.claimant),
        log_claimant: new_claimant.to_string(),
    })
}

/// Plan an admin state change. Any state is reachable from any other; moving
/// to `Unclaimed` clears the claimant and owner, and a claimed-family state
/// requires an existing claimant.
pub fn plan_set_state(
    square: &Square,
    new_state: SquareState,
    note: &str,
    actor: &Actor,
) -> Result<Plan> {
    if !actor.admin {
        return Err(Error::Forbidden("administrator required"));
    }
    if new_state.is_claimed_family() && square.claimant.is_empty() {
        return Err(Error::field("state", "square has no claimant"));
    }
    let (claimant, owner) = if new_state == SquareState::Unclaimed {
        (String::new(), None)
    } else {
        (square.claimant.clone(), square.owner)
    };
    Ok(Plan {
        state: new_state,
        claimant,
        owner,
        guard: WriteGuard::MustMatchVersion(square.version),
        note: note.to_string(),
        log_claimant: square.claimant.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use chrono::Utc;

    fn square(state: SquareState, claimant: &str, owner: Option<Identity>) -> Square {
        Square {
            grid_id: 1,
            square_id: 15,
            state,
            claimant: claimant.to_string(),
            owner,
            version: 3,
            modified_at: Utc::now(),
        }
    }

    fn unclaimed() -> Square {
        square(SquareState::Unclaimed, "", None)
    }

    fn claimed_by_alice() -> Square {
        square(SquareState::Claimed, "Alice", Some(Identity::User(1)))
    }

    #[test]
    fn state_strings_round_trip() {
        for state in SquareState::ALL {
            assert_eq!(SquareState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SquareState::parse("paid"), None);
    }

    #[test]
    fn claim_only_from_unclaimed() {
        let actor = Actor::user(1);
        let plan = plan_claim(&unclaimed(), "Alice", &actor).unwrap();
        assert_eq!(plan.state, SquareState::Claimed);
        assert_eq!(plan.claimant, "Alice");
        assert_eq!(plan.owner, Some(Identity::User(1)));
        assert_eq!(plan.guard, WriteGuard::MustBeUnclaimed);
        assert_eq!(plan.note, "user: initial claim");

        let err = plan_claim(&claimed_by_alice(), "Bob", &Actor::user(2)).unwrap_err();
        assert!(matches!(err, Error::AlreadyClaimed));
    }

    #[test]
    fn unclaim_requires_ownership() {
        let plan = plan_unclaim(&claimed_by_alice(), &Actor::user(1)).unwrap();
        assert_eq!(plan.state, SquareState::Unclaimed);
        assert!(plan.claimant.is_empty());
        assert_eq!(plan.owner, None);
        assert_eq!(plan.guard, WriteGuard::MustBeOwnedBy(Identity::User(1)));
        assert_eq!(plan.note, "user: `Alice` unclaimed");
        assert_eq!(plan.log_claimant, "Alice");

        assert!(matches!(
            plan_unclaim(&claimed_by_alice(), &Actor::user(2)),
            Err(Error::Forbidden(_))
        ));
        // An unclaimed square has no owner, so nobody can unclaim it.
        assert!(matches!(
            plan_unclaim(&unclaimed(), &Actor::user(1)),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn guests_own_their_squares() {
        let guest = uuid::Uuid::new_v4();
        let sq = square(SquareState::Claimed, "Drop-in", Some(Identity::Guest(guest)));
        assert!(plan_unclaim(&sq, &Actor::guest(guest)).is_ok());
        assert!(plan_unclaim(&sq, &Actor::guest(uuid::Uuid::new_v4())).is_err());
        assert!(plan_unclaim(&sq, &Actor::user(1)).is_err());
    }

    #[test]
    fn rename_is_admin_only_and_must_differ() {
        let admin = Actor::admin(Identity::User(99));
        let plan = plan_rename(&claimed_by_alice(), "Alicia", &admin).unwrap();
        assert_eq!(plan.state, SquareState::Claimed);
        assert_eq!(plan.claimant, "Alicia");
        assert_eq!(plan.owner, Some(Identity::User(1)));
        assert_eq!(plan.guard, WriteGuard::MustMatchVersion(3));
        assert_eq!(plan.note, "admin: changed claimant from Alice");

        assert!(matches!(
            plan_rename(&claimed_by_alice(), "Alicia", &Actor::user(1)),
            Err(Error::Forbidden(_))
        ));
        let same = plan_rename(&claimed_by_alice(), "Alice", &admin).unwrap_err();
        match same {
            Error::Validation(errors) => {
                assert_eq!(errors.field("claimant"), &["must be a different name".to_string()]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(plan_rename(&unclaimed(), "Alice", &admin).is_err());
    }

    #[test]
    fn set_state_reaches_any_state_and_clears_on_unclaim() {
        let admin = Actor::admin(Identity::User(99));

        let plan =
            plan_set_state(&claimed_by_alice(), SquareState::PaidConfirmed, "cash", &admin)
                .unwrap();
        assert_eq!(plan.state, SquareState::PaidConfirmed);
        assert_eq!(plan.claimant, "Alice");
        assert_eq!(plan.owner, Some(Identity::User(1)));
        assert_eq!(plan.note, "cash");
        assert_eq!(plan.log_claimant, "Alice");

        // Skipping intermediate states is legal for admins.
        let paid = square(SquareState::PaidConfirmed, "Alice", Some(Identity::User(1)));
        assert!(plan_set_state(&paid, SquareState::Claimed, "", &admin).is_ok());

        let cleared = plan_set_state(&paid, SquareState::Unclaimed, "no-show", &admin).unwrap();
        assert!(cleared.claimant.is_empty());
        assert_eq!(cleared.owner, None);
        assert_eq!(cleared.log_claimant, "Alice");
    }

    #[test]
    fn set_state_rejects_claimed_family_without_claimant() {
        let admin = Actor::admin(Identity::User(99));
        let err = plan_set_state(&unclaimed(), SquareState::Claimed, "", &admin).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert!(plan_set_state(&unclaimed(), SquareState::Unclaimed, "", &admin).is_ok());
        assert!(matches!(
            plan_set_state(&claimed_by_alice(), SquareState::PaidConfirmed, "", &Actor::user(1)),
            Err(Error::Forbidden(_))
        ));
    }
}
