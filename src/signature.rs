//! Structural signatures and uniqueness epochs.
//!
//! Two instructions share a signature when they differ only in numeric
//! operands (addresses, displacements, immediates, branch targets). One
//! example per signature per epoch is enough for the corpus.

use std::collections::HashSet;
use std::fmt;

use crate::{DecodedInstruction, MAX_OPERANDS};

/// Stand-in for collapsed numeric operand text.
pub const PLACEHOLDER: &str = "-1";

/// Dedup key for one instruction shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the structural signature of `insn`: `mnemonic|op0|op1|op2`.
///
/// Register and other operands are kept verbatim, every numeric kind is
/// replaced by [`PLACEHOLDER`]. Absent slots are empty.
pub fn classify(insn: &DecodedInstruction) -> Signature {
    let mut key = insn.mnemonic.clone();
    for slot in 0..MAX_OPERANDS {
        key.push('|');
        match insn.operand(slot) {
            Some(op) if op.kind.is_numeric() => key.push_str(PLACEHOLDER),
            Some(op) => push_shape(&mut key, &op.text),
            None => {}
        }
    }
    Signature(key)
}

/// Append operand text, collapsing an immediate shift amount
/// (`r2, lsl #3` becomes `r2, lsl #-1`).
fn push_shape(key: &mut String, text: &str) {
    match text.split_once(", ") {
        Some((register, shift)) if !register.contains('[') && shift.contains('#') => {
            let (op, _) = shift.split_once('#').unwrap_or((shift, ""));
            key.push_str(register);
            key.push_str(", ");
            key.push_str(op);
            key.push('#');
            key.push_str(PLACEHOLDER);
        }
        _ => key.push_str(text),
    }
}

/// Signatures seen since the last reset.
#[derive(Debug, Default)]
pub struct Epoch {
    seen: HashSet<Signature>,
    resets: u64,
}

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `signature`; returns true if it was not present yet.
    pub fn is_new(&mut self, signature: Signature) -> bool {
        self.seen.insert(signature)
    }

    pub fn contains(&self, signature: &Signature) -> bool {
        self.seen.contains(signature)
    }

    /// Start a new epoch.
    pub fn clear(&mut self) {
        self.seen.clear();
        self.resets += 1;
    }

    /// Number of signatures in the current epoch
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// How many times the epoch has been cleared
    pub fn resets(&self) -> u64 {
        self.resets
    }
}
