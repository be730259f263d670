//! Fixed-width 32-bit ARM enumeration.
//!
//! Only two condition nibbles are walked: `AL` (0b1110) and the
//! unconditional/extended space (0b1111). The other fourteen conditions only
//! change the predicate field, not the shape of the instruction.

use crate::Isa;
use super::{canonicalize_plain, EpochPolicy, IsaStrategy};

/// Size of the walked index space: 28 payload bits times two condition nibbles.
const INDEX_END: u32 = 0x2000_0000;

const PAYLOAD_MASK: u32 = 0x0fff_ffff;
const NIBBLE_SELECT: u32 = 0x1000_0000;
const COND_ALWAYS: u32 = 0xe000_0000;
const COND_EXTENDED: u32 = 0xf000_0000;

#[derive(Debug, Clone)]
pub struct Arm32Strategy {
    index: u32,
    policy: EpochPolicy,
}

impl Arm32Strategy {
    pub fn new() -> Self {
        Self {
            index: 0,
            policy: EpochPolicy::Global,
        }
    }

    /// Instruction word for position `index` of the walk.
    pub fn word_at(index: u32) -> u32 {
        let payload = index & PAYLOAD_MASK;
        if index & NIBBLE_SELECT == 0 {
            payload | COND_ALWAYS
        } else {
            payload | COND_EXTENDED
        }
    }
}

impl Default for Arm32Strategy {
    fn default() -> Self {
        Self::new()
    }
}

impl IsaStrategy for Arm32Strategy {
    fn isa(&self) -> Isa {
        Isa::Arm
    }

    fn probe_len(&self) -> usize {
        4
    }

    fn ramp_start(&self) -> u8 {
        0
    }

    fn next_candidate(&mut self) -> Option<Vec<u8>> {
        if self.index >= INDEX_END {
            return None;
        }
        let word = Self::word_at(self.index);
        self.index += 1;
        Some(word.to_le_bytes().to_vec())
    }

    fn epoch_policy(&self) -> EpochPolicy {
        self.policy
    }

    fn set_epoch_policy(&mut self, policy: EpochPolicy) {
        self.policy = policy;
    }

    fn canonicalize(&self, raw: &str, bytes: &[u8]) -> Option<String> {
        canonicalize_plain(raw, bytes)
    }

    fn progress_interval(&self) -> u64 {
        10_000
    }
}
