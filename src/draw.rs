//! # Draw — One-Time Random Number Assignment
//!
//! Axis numbers come from a Fisher-Yates shuffle driven by the operating
//! system's entropy source, one independent permutation of `0..axis_len`
//! per axis. A draw happens at most once per grid: the engine persists the
//! result behind a draw-absent storage guard, so concurrent draws produce
//! exactly one winner and there is no re-roll.
//!
//! Pool share tokens are minted here too, from the same entropy source:
//! 6 random bytes, URL-safe base64, always 8 characters.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Digits assigned to a grid's axes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub home_numbers: Vec<u8>,
    pub away_numbers: Vec<u8>,
}

impl Draw {
    /// Draw fresh axis numbers from OS entropy.
    pub fn generate(axis_len: u8) -> Draw {
        Draw {
            home_numbers: permutation(&mut OsRng, axis_len),
            away_numbers: permutation(&mut OsRng, axis_len),
        }
    }
}

/// A uniformly random permutation of `0..len`.
pub fn permutation<R: Rng + ?Sized>(rng: &mut R, len: u8) -> Vec<u8> {
    let mut numbers: Vec<u8> = (0..len).collect();
    numbers.shuffle(rng);
    numbers
}

/// Length of pool share tokens.
pub const TOKEN_LEN: usize = 8;

/// Mint a URL-safe pool share token.
pub fn mint_token() -> String {
    let mut raw = [0u8; 6];
    OsRng.fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}
