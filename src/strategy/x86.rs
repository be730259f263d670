//! Byte-oriented x86 enumeration.
//!
//! The first three candidate bytes are walked depth first, each over
//! `0x10..=0xFF` followed by `0x00..=0x0F`; the remaining probe bytes keep the
//! filler ramp. Once the oracle says an instruction is shorter than three
//! bytes, the deeper byte positions cannot change it and are skipped.

use crate::canon::Canonicalizer;
use crate::filter;
use crate::Isa;
use super::{ramp, EpochPolicy, IsaStrategy};

/// Number of enumerated leading byte positions.
const DEPTH: usize = 3;

/// Bytes written per candidate.
const PROBE_LEN: usize = 16;

const RAMP_START: u8 = 0x10;

/// Byte value at walk position `i` (0..256).
fn byte_at(i: u16) -> u8 {
    ((0x10 + i) & 0xff) as u8
}

#[derive(Debug, Clone)]
pub struct X86Strategy {
    cursor: [u16; DEPTH],
    /// Position that advances on the next call
    advance: usize,
    started: bool,
    done: bool,
    filler: Vec<u8>,
    policy: EpochPolicy,
}

impl X86Strategy {
    pub fn new() -> Self {
        Self {
            cursor: [0; DEPTH],
            advance: DEPTH - 1,
            started: false,
            done: false,
            filler: ramp(RAMP_START, PROBE_LEN),
            policy: EpochPolicy::LeadByteChange,
        }
    }

    /// Move to the next value at `position`, resetting deeper positions.
    fn step(&mut self, position: usize) {
        let mut pos = position;
        for deeper in &mut self.cursor[pos + 1..] {
            *deeper = 0;
        }
        loop {
            self.cursor[pos] += 1;
            if self.cursor[pos] < 256 {
                return;
            }
            self.cursor[pos] = 0;
            if pos == 0 {
                self.done = true;
                return;
            }
            pos -= 1;
        }
    }
}

impl Default for X86Strategy {
    fn default() -> Self {
        Self::new()
    }
}

impl IsaStrategy for X86Strategy {
    fn isa(&self) -> Isa {
        Isa::X86
    }

    fn probe_len(&self) -> usize {
        PROBE_LEN
    }

    fn ramp_start(&self) -> u8 {
        RAMP_START
    }

    fn next_candidate(&mut self) -> Option<Vec<u8>> {
        if self.started {
            self.step(self.advance);
        }
        self.started = true;
        self.advance = DEPTH - 1;
        if self.done {
            return None;
        }

        let mut candidate = self.filler.clone();
        for (slot, &i) in candidate.iter_mut().zip(self.cursor.iter()) {
            *slot = byte_at(i);
        }
        Some(candidate)
    }

    fn observe(&mut self, consumed: usize) {
        // consumed length 1 fixes only the first byte, 2 the first two
        self.advance = match consumed {
            1 => 0,
            2 => 1,
            _ => DEPTH - 1,
        };
    }

    fn epoch_policy(&self) -> EpochPolicy {
        self.policy
    }

    fn set_epoch_policy(&mut self, policy: EpochPolicy) {
        self.policy = policy;
    }

    fn canonicalize(&self, raw: &str, bytes: &[u8]) -> Option<String> {
        Canonicalizer::X86.apply(raw, bytes)
    }

    fn is_invalid(&self, bytes: &[u8]) -> bool {
        filter::is_invalid(bytes)
    }
}
