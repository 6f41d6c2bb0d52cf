//! Command Hashing
//!
//! Stats rows are keyed by a 64-bit hash of the RECORD payload: the argument
//! count followed by every length-prefixed argument, exactly as received. The
//! hash is the djb2 recurrence (`h = h * 33 + byte`) with its usual seed, with
//! bytes taken as unsigned so the result is the same on every platform.

/// Initial hasher state.
pub const HASH_SEED: u64 = 0x1505;

/// Incremental 64-bit hasher over byte sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHasher {
    state: u64,
}

impl Default for CommandHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHasher {
    /// Starts from the hash seed.
    pub fn new() -> Self {
        Self { state: HASH_SEED }
    }

    /// Mixes in one byte: `h * 33 + byte`.
    #[inline]
    pub fn add_byte(self, byte: u8) -> Self {
        let h = self.state;
        Self {
            state: (h << 5).wrapping_add(h).wrapping_add(u64::from(byte)),
        }
    }

    /// Mixes in every byte of `bytes`.
    pub fn add_bytes(self, bytes: &[u8]) -> Self {
        bytes.iter().fold(self, |h, &b| h.add_byte(b))
    }

    /// Returns the hash of everything added so far.
    pub fn finish(self) -> u64 {
        self.state
    }
}

/// Hashes a complete RECORD payload.
pub fn command_hash(payload: &[u8]) -> u64 {
    CommandHasher::new().add_bytes(payload).finish()
}
