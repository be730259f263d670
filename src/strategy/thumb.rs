//! Compact 16/32-bit Thumb enumeration.
//!
//! Every halfword is tried on its own, padded with an all-ones second
//! halfword. Halfwords whose top five bits are `0b11101`, `0b11110` or
//! `0b11111` start a 32-bit encoding, so the full second halfword is walked
//! under each of them.

use crate::Isa;
use super::{canonicalize_plain, EpochPolicy, IsaStrategy};

const HALFWORD_END: u32 = 0x1_0000;
const NARROW_PADDING: u32 = 0xffff_0000;

/// Returns true if `halfword` is the first half of a 32-bit encoding.
pub fn is_wide_prefix(halfword: u16) -> bool {
    matches!(halfword >> 11, 0x1d | 0x1e | 0x1f)
}

#[derive(Debug, Clone)]
pub struct ThumbStrategy {
    first: u32,
    second: u32,
    policy: EpochPolicy,
}

impl ThumbStrategy {
    pub fn new() -> Self {
        Self {
            first: 0,
            second: 0,
            policy: EpochPolicy::MnemonicChange,
        }
    }

    fn next_word(&mut self) -> Option<u32> {
        if self.first >= HALFWORD_END {
            return None;
        }
        let first = self.first;
        if is_wide_prefix(first as u16) {
            let word = first | (self.second << 16);
            self.second += 1;
            if self.second >= HALFWORD_END {
                self.second = 0;
                self.first += 1;
            }
            Some(word)
        } else {
            self.first += 1;
            Some(first | NARROW_PADDING)
        }
    }
}

impl Default for ThumbStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl IsaStrategy for ThumbStrategy {
    fn isa(&self) -> Isa {
        Isa::Thumb
    }

    fn probe_len(&self) -> usize {
        4
    }

    fn ramp_start(&self) -> u8 {
        0
    }

    fn next_candidate(&mut self) -> Option<Vec<u8>> {
        self.next_word().map(|word| word.to_le_bytes().to_vec())
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
}
