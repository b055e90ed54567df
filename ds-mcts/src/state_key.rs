//! Canonical structural key for `DialogueState` dedup.

use ds_core::{DialogueState, Role};

/// A stable structural digest over (turns, query, depth).
///
/// This is intentionally independent of `std::hash` randomization and of any
/// serialization mechanism: fields are folded in a fixed order with explicit
/// length prefixes, so equal states always produce equal keys. Dedup only,
/// not security.
pub type StateKey = u128;

const FNV_OFFSET: u128 = 0x6c62272e07bb014262b821756295c58d;
const FNV_PRIME: u128 = 0x0000000001000000000000000000013b;

struct Fnv128(u128);

impl Fnv128 {
    fn new() -> Self {
        Self(FNV_OFFSET)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u128;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }
}

pub fn state_key(s: &DialogueState) -> StateKey {
    // Layout, in order:
    // - turn count
    // - per turn: role tag byte, text length, text bytes
    // - query length, query bytes
    // - depth
    let mut h = Fnv128::new();
    h.write_u64(s.turns.len() as u64);
    for t in &s.turns {
        let tag: u8 = match t.role {
            Role::User => 0,
            Role::Assistant => 1,
        };
        h.write(&[tag]);
        h.write_u64(t.text.len() as u64);
        h.write(t.text.as_bytes());
    }
    h.write_u64(s.query.len() as u64);
    h.write(s.query.as_bytes());
    h.write_u64(s.depth as u64);
    h.0
}
