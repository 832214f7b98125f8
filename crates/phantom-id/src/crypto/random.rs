//! Seed material for new accounts, drawn from the OS entropy source.

use rand::rngs::OsRng;
use rand::RngCore;

/// Length of an account seed in bytes.
pub const SEED_LEN: usize = 32;

/// Draw a fresh account seed.
pub fn account_seed() -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);
    seed
}
