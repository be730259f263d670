//! Exhaustive instruction-space enumeration for building decoder reference corpora.
//!
//! An [`Enumerator`](enumerator::Enumerator) walks the candidate encodings of one
//! instruction set, asks a trusted external decoder (the [`Oracle`]) what each
//! candidate means, reduces the answer to a stable canonical text, drops
//! structurally duplicate shapes and writes the survivors as a flat
//! `(bytes, text)` corpus.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::fs::File;
//! use opcode_corpus::{
//!     decoder::CapstoneOracle,
//!     enumerator::{Enumerator, GeneratorConfig},
//!     format::{CorpusFormat, CorpusWriter},
//!     strategy::Strategy,
//!     Isa,
//! };
//!
//! let config = GeneratorConfig::new(Isa::Thumb);
//! let mut oracle = CapstoneOracle::for_isa(Isa::Thumb, config.probe_address, 4).unwrap();
//! let mut strategy = Strategy::for_isa(Isa::Thumb);
//! let mut corpus = CorpusWriter::new(File::create("thumb-opcodes.txt").unwrap(), CorpusFormat::Text);
//!
//! let stats = Enumerator::new(config, &mut oracle, &mut strategy)
//!     .run(&mut corpus)
//!     .unwrap();
//! println!("{} instructions written", stats.accepted);
//! ```

pub mod canon;
pub mod decoder;
pub mod enumerator;
pub mod filter;
pub mod format;
pub mod signature;
pub mod strategy;
#[cfg(test)]
mod large_tests;

use std::fmt;

use clap::ValueEnum;
use serde::Serialize;

/// Represents an address in the oracle's probe memory
pub type Address = u64;

/// Maximum number of operand slots the oracle reports per instruction.
pub const MAX_OPERANDS: usize = 3;

/// Instruction-set families the generator can enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Isa {
    /// 32-bit fixed-width ARM (A32)
    Arm,
    /// Compact 16/32-bit Thumb
    Thumb,
    /// Byte-oriented variable-length x86 (32-bit mode)
    X86,
}

impl Isa {
    /// Largest instruction the ISA can encode, in bytes.
    pub fn max_instruction_len(self) -> usize {
        match self {
            Isa::Arm | Isa::Thumb => 4,
            Isa::X86 => 15,
        }
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isa::Arm => write!(f, "ARM"),
            Isa::Thumb => write!(f, "Thumb"),
            Isa::X86 => write!(f, "x86-32"),
        }
    }
}

/// Operand classification reported by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// General purpose or special register
    Register,
    /// Memory reference carrying an absolute address or displacement
    Memory,
    /// Immediate value
    Immediate,
    /// Near (relative) code reference
    Near,
    /// Far (absolute segment:offset) code reference
    Far,
    /// Anything else: register-indirect phrases, fixed operands, ...
    Other,
}

impl OperandKind {
    /// True for kinds whose text is numeric and collapses to a placeholder
    /// when building a structural signature.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            OperandKind::Memory | OperandKind::Immediate | OperandKind::Near | OperandKind::Far
        )
    }
}

/// One operand descriptor as reported by the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    pub text: String,
}

impl Operand {
    pub fn new(kind: OperandKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// One oracle answer for the bytes at the probe address.
///
/// A `length` of zero means the oracle could not decode anything there.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedInstruction {
    /// Number of probe bytes the instruction consumed
    pub length: usize,
    /// Instruction mnemonic (e.g., "mov", "add")
    pub mnemonic: String,
    /// Up to [`MAX_OPERANDS`] operand descriptors, in order
    pub operands: Vec<Operand>,
    /// Full disassembly text exactly as the oracle printed it
    pub text: String,
}

impl DecodedInstruction {
    /// The "no valid instruction" answer.
    pub fn undecodable() -> Self {
        Self::default()
    }

    /// Returns true if the oracle recognised an instruction.
    pub fn is_valid(&self) -> bool {
        self.length != 0
    }

    /// Operand in slot `index`, if present.
    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// The trusted external decoder.
///
/// Bytes are first patched into a probe memory region, then decoded in place.
/// Implementations are free to keep that region between calls; callers always
/// patch a full probe-length window before decoding.
pub trait Oracle {
    /// Overwrite probe memory starting at `address`.
    fn patch_bytes(&mut self, address: Address, bytes: &[u8]);

    /// Decode one instruction at `address`.
    fn decode(&mut self, address: Address) -> DecodedInstruction;
}

impl<O: Oracle + ?Sized> Oracle for &mut O {
    fn patch_bytes(&mut self, address: Address, bytes: &[u8]) {
        (**self).patch_bytes(address, bytes)
    }

    fn decode(&mut self, address: Address) -> DecodedInstruction {
        (**self).decode(address)
    }
}

/// Error type for corpus generation
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    /// Oracle could not be constructed
    #[error("Oracle error: {0}")]
    OracleError(String),

    /// I/O error while writing the corpus or trace
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Alternative corpus encoding failed
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Run summary could not be serialized
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}
