//! Property-based tests for gridstake's pure primitives.
//!
//! These tests use the `proptest` framework to verify invariants hold
//! across thousands of randomly generated inputs. Unlike example-based
//! tests that check specific known values, property tests express
//! universal truths that must hold for all valid inputs, making them
//! excellent at finding edge cases.
//!
//! # Prerequisites
//!
//! - No database or network access required.
//! - These tests are purely computational and always run.
//!
//! # How to run
//!
//! ```bash
//! # Run all property tests:
//! cargo test --test property_tests
//!
//! # Run a specific property:
//! cargo test --test property_tests prop_permutation_is_a_bijection
//!
//! # Increase case count for thorough testing (default is 256):
//! PROPTEST_CASES=10000 cargo test --test property_tests
//! ```
//!
//! # Testing strategy
//!
//! Properties are organized by module:
//! - **Draw module**: the shuffled axes are true permutations for every
//!   seed and axis length
//! - **Pagination**: clamping always yields an in-range page
//! - **Validators**: total over arbitrary strings, with verdicts that
//!   match their documented rules
//! - **State planner**: every planned write upholds the claimant
//!   invariant
//!
//! Each property is named `prop_<function>_<invariant>` for clarity. The
//! `proptest!` macro generates the test harness, input strategies, and
//! shrinking logic automatically.
//!
//! # References
//!
//! - proptest: <https://proptest-rs.github.io/proptest/>

use chrono::Utc;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use gridstake::draw::permutation;
use gridstake::state::{plan_claim, plan_set_state};
use gridstake::store::WriteGuard;
use gridstake::{Actor, Draw, Identity, Page, Square, SquareState, ValidationErrors};

// == Draw Properties ===========================================================
// The draw assigns digits to rows and columns by shuffling 0..axis_len. If
// the shuffle ever dropped or duplicated a digit, payouts would be decided
// on a corrupt board, so bijectivity must hold for every RNG state.
// ==============================================================================

proptest! {
    /// For any seed and axis length, the shuffled axis is a permutation
    /// of `0..len`: sorting it recovers the identity.
    #[test]
    fn prop_permutation_is_a_bijection(seed in any::<u64>(), len in 1u8..=20) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut axis = permutation(&mut rng, len);
        prop_assert_eq!(axis.len(), len as usize);
        axis.sort_unstable();
        prop_assert_eq!(axis, (0..len).collect::<Vec<u8>>());
    }

    /// `Draw::generate` fills both axes at the requested length, each a
    /// valid permutation.
    #[test]
    fn prop_generate_fills_both_axes(len in 1u8..=10) {
        let draw = Draw::generate(len);
        for axis in [draw.home_numbers, draw.away_numbers] {
            let mut sorted = axis;
            sorted.sort_unstable();
            prop_assert_eq!(sorted, (0..len).collect::<Vec<u8>>());
        }
    }
}

// == Pagination Properties =====================================================
// Page::clamp runs on every list endpoint before a backend sees the page,
// so it must map arbitrary caller input into a sane window.
// ==============================================================================

proptest! {
    /// Clamping yields `offset >= 0` and `1 <= limit <= max`, takes the
    /// default for non-positive limits, and otherwise preserves the
    /// caller's limit up to the cap.
    #[test]
    fn prop_page_clamp_stays_in_range(
        offset in any::<i64>(),
        limit in any::<i64>(),
        default in 1i64..=100,
        extra in 0i64..=900,
    ) {
        let max = default + extra;
        let page = Page::new(offset, limit).clamp(default, max);

        prop_assert!(page.offset >= 0);
        prop_assert!(page.limit >= 1);
        prop_assert!(page.limit <= max);
        if offset >= 0 {
            prop_assert_eq!(page.offset, offset);
        }
        if limit <= 0 {
            prop_assert_eq!(page.limit, default);
        } else {
            prop_assert_eq!(page.limit, limit.min(max));
        }
    }
}

// == Validator Properties ======================================================
// Validators face raw user input, so they must never panic and must agree
// with their documented rules on any string, printable or not.
// ==============================================================================

proptest! {
    /// `printable` always returns the trimmed value and flags exactly the
    /// strings whose trimmed form contains a control character.
    #[test]
    fn prop_printable_trims_and_flags_control_chars(value in any::<String>()) {
        let mut errors = ValidationErrors::new();
        let out = gridstake::validate::printable(&mut errors, "field", &value);
        prop_assert_eq!(&out, value.trim());
        let has_control = out.chars().any(|c| c.is_control());
        prop_assert_eq!(!errors.is_empty(), has_control);
    }

    /// The multi-line variant admits `\n`, `\r`, and `\t` but nothing else
    /// from the control range.
    #[test]
    fn prop_printable_with_newline_admits_line_breaks(value in any::<String>()) {
        let mut errors = ValidationErrors::new();
        let out = gridstake::validate::printable_with_newline(&mut errors, "field", &value);
        let has_bad_control =
            out.chars().any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'));
        prop_assert_eq!(!errors.is_empty(), has_bad_control);
    }

    /// `max_length` counts characters, not bytes: a string of `n`
    /// multi-byte characters passes exactly when `n <= max`.
    #[test]
    fn prop_max_length_counts_characters(n in 0usize..200, max in 0usize..200) {
        let value = "é".repeat(n);
        let mut errors = ValidationErrors::new();
        gridstake::validate::max_length(&mut errors, "field", &value, max);
        prop_assert_eq!(!errors.is_empty(), n > max);
    }
}

// == State Planner Properties ==================================================
// Whatever an admin does to a square, the planned row image must uphold the
// claimant invariant: unclaimed rows carry no claimant and no owner, and
// claimed-family rows keep both.
// ==============================================================================

fn claimed_square(state: SquareState, version: i64) -> Square {
    Square {
        grid_id: 1,
        square_id: 0,
        state,
        claimant: "Alice".to_string(),
        owner: Some(Identity::User(1)),
        version,
        modified_at: Utc::now(),
    }
}

fn any_state() -> impl Strategy<Value = SquareState> {
    prop::sample::select(SquareState::ALL.to_vec())
}

fn claimed_family_state() -> impl Strategy<Value = SquareState> {
    any_state().prop_filter("claimed family", |s| s.is_claimed_family())
}

proptest! {
    /// `plan_set_state` clears the claimant and owner exactly when the
    /// target state is `Unclaimed`, and always guards on the version the
    /// planner read.
    #[test]
    fn prop_plan_set_state_upholds_the_claimant_invariant(
        from in claimed_family_state(),
        to in any_state(),
        version in 1i64..1000,
    ) {
        let square = claimed_square(from, version);
        let plan = plan_set_state(&square, to, "note", &Actor::admin(Identity::User(9))).unwrap();

        prop_assert_eq!(plan.state, to);
        prop_assert_eq!(plan.guard, WriteGuard::MustMatchVersion(version));
        if to == SquareState::Unclaimed {
            prop_assert!(plan.claimant.is_empty());
            prop_assert!(plan.owner.is_none());
        } else {
            prop_assert_eq!(plan.claimant, "Alice");
            prop_assert_eq!(plan.owner, Some(Identity::User(1)));
        }
    }

    /// A claim can only be planned against a still-unclaimed row, no
    /// matter which claimed-family state the square is in now.
    #[test]
    fn prop_plan_claim_rejects_every_claimed_state(
        state in claimed_family_state(),
        version in 1i64..1000,
    ) {
        let square = claimed_square(state, version);
        let result = plan_claim(&square, "Bob", &Actor::user(2));
        prop_assert!(matches!(result, Err(gridstake::Error::AlreadyClaimed)));
    }
}
