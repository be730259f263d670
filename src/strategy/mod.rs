//! Instruction-space enumeration strategies

use std::fmt;

use clap::ValueEnum;
use serde::Serialize;

use crate::canon::Canonicalizer;
use crate::Isa;

pub mod arm32;
pub mod thumb;
pub mod x86;

pub use self::arm32::Arm32Strategy;
pub use self::thumb::ThumbStrategy;
pub use self::x86::X86Strategy;

/// What the epoch policy gets to see about one decoded candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step<'a> {
    /// First byte of the candidate encoding
    pub lead: u8,
    /// Mnemonic the oracle reported
    pub mnemonic: &'a str,
}

/// When the uniqueness epoch is cleared.
#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EpochPolicy {
    /// One epoch for the whole run
    Global,
    /// New epoch whenever the decoded mnemonic changes
    MnemonicChange,
    /// New epoch whenever the first candidate byte changes
    LeadByteChange,
}

impl EpochPolicy {
    /// Returns true if `curr` starts a new epoch after `prev`.
    pub fn is_boundary(self, prev: &Step<'_>, curr: &Step<'_>) -> bool {
        match self {
            EpochPolicy::Global => false,
            EpochPolicy::MnemonicChange => prev.mnemonic != curr.mnemonic,
            EpochPolicy::LeadByteChange => prev.lead != curr.lead,
        }
    }
}

impl fmt::Display for EpochPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochPolicy::Global => write!(f, "global"),
            EpochPolicy::MnemonicChange => write!(f, "mnemonic-change"),
            EpochPolicy::LeadByteChange => write!(f, "lead-byte-change"),
        }
    }
}

/// Per-ISA enumeration behaviour.
///
/// A strategy owns the iteration order over the candidate space; the
/// [`Enumerator`](crate::enumerator::Enumerator) owns everything else.
pub trait IsaStrategy {
    /// ISA being enumerated
    fn isa(&self) -> Isa;

    /// Number of bytes written to the probe for every candidate.
    fn probe_len(&self) -> usize;

    /// First value of the filler ramp written to the probe before the run.
    fn ramp_start(&self) -> u8;

    /// Next candidate encoding (exactly [`probe_len`](Self::probe_len) bytes),
    /// or `None` once the space is exhausted.
    fn next_candidate(&mut self) -> Option<Vec<u8>>;

    /// Consumed length the oracle reported for the last candidate.
    fn observe(&mut self, _consumed: usize) {}

    /// Reset policy in effect for this run.
    fn epoch_policy(&self) -> EpochPolicy;

    fn set_epoch_policy(&mut self, policy: EpochPolicy);

    fn epoch_boundary(&self, prev: &Step<'_>, curr: &Step<'_>) -> bool {
        self.epoch_policy().is_boundary(prev, curr)
    }

    /// Canonical text, `None` when nothing is left after the rules ran.
    fn canonicalize(&self, raw: &str, bytes: &[u8]) -> Option<String>;

    /// Encodings excluded from the corpus even though they decode.
    fn is_invalid(&self, _bytes: &[u8]) -> bool {
        false
    }

    /// Accepted-entry interval between progress log lines.
    fn progress_interval(&self) -> u64 {
        1000
    }
}

/// Ascending filler bytes `start, start + 1, ...` (wrapping).
pub fn ramp(start: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| start.wrapping_add(i as u8)).collect()
}

/// The three strategies behind one enum so callers can pick by ISA.
#[derive(Debug)]
pub enum Strategy {
    Arm(Arm32Strategy),
    Thumb(ThumbStrategy),
    X86(X86Strategy),
}

impl Strategy {
    /// Strategy with its default epoch policy
    pub fn for_isa(isa: Isa) -> Self {
        match isa {
            Isa::Arm => Strategy::Arm(Arm32Strategy::new()),
            Isa::Thumb => Strategy::Thumb(ThumbStrategy::new()),
            Isa::X86 => Strategy::X86(X86Strategy::new()),
        }
    }

    /// Replace the default epoch policy
    pub fn with_epoch_policy(mut self, policy: EpochPolicy) -> Self {
        self.set_epoch_policy(policy);
        self
    }

    /// Epoch policy a fresh strategy for `isa` starts with
    pub fn default_epoch_policy(isa: Isa) -> EpochPolicy {
        Self::for_isa(isa).epoch_policy()
    }

    fn inner(&self) -> &dyn IsaStrategy {
        match self {
            Strategy::Arm(s) => s,
            Strategy::Thumb(s) => s,
            Strategy::X86(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn IsaStrategy {
        match self {
            Strategy::Arm(s) => s,
            Strategy::Thumb(s) => s,
            Strategy::X86(s) => s,
        }
    }
}

impl IsaStrategy for Strategy {
    fn isa(&self) -> Isa {
        self.inner().isa()
    }

    fn probe_len(&self) -> usize {
        self.inner().probe_len()
    }

    fn ramp_start(&self) -> u8 {
        self.inner().ramp_start()
    }

    fn next_candidate(&mut self) -> Option<Vec<u8>> {
        self.inner_mut().next_candidate()
    }

    fn observe(&mut self, consumed: usize) {
        self.inner_mut().observe(consumed)
    }

    fn epoch_policy(&self) -> EpochPolicy {
        self.inner().epoch_policy()
    }

    fn set_epoch_policy(&mut self, policy: EpochPolicy) {
        self.inner_mut().set_epoch_policy(policy)
    }

    fn epoch_boundary(&self, prev: &Step<'_>, curr: &Step<'_>) -> bool {
        self.inner().epoch_boundary(prev, curr)
    }

    fn canonicalize(&self, raw: &str, bytes: &[u8]) -> Option<String> {
        self.inner().canonicalize(raw, bytes)
    }

    fn is_invalid(&self, bytes: &[u8]) -> bool {
        self.inner().is_invalid(bytes)
    }

    fn progress_interval(&self) -> u64 {
        self.inner().progress_interval()
    }
}

/// Shared canonicalization for the fixed and compact ARM encodings.
pub(crate) fn canonicalize_plain(raw: &str, bytes: &[u8]) -> Option<String> {
    Canonicalizer::Plain.apply(raw, bytes)
}
