//! Capstone-backed decode oracle.

use std::fmt;

use capstone::arch::arm::{ArchMode as ArmMode, ArmOperandType};
use capstone::arch::x86::{ArchMode as X86Mode, ArchSyntax as X86Syntax, X86OperandType};
use capstone::arch::ArchOperand;
use capstone::prelude::{BuildsCapstone, BuildsCapstoneSyntax};
use capstone::Capstone;

use crate::{Address, CorpusError, DecodedInstruction, Isa, Oracle, Operand, OperandKind, MAX_OPERANDS};

/// Errors that can occur while building an oracle
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// Capstone error
    #[error("Capstone error: {0}")]
    CapstoneError(#[from] capstone::Error),
}

impl From<DecoderError> for CorpusError {
    fn from(e: DecoderError) -> Self {
        CorpusError::OracleError(e.to_string())
    }
}

/// Probe memory plus a Capstone handle for one ISA.
///
/// The probe region is a fixed-size window starting at `base`; patches that
/// fall outside it are truncated.
pub struct CapstoneOracle {
    isa: Isa,
    cs: Capstone,
    base: Address,
    memory: Vec<u8>,
}

impl CapstoneOracle {
    /// Create an oracle whose probe window is `probe_len` bytes at `base`.
    pub fn for_isa(isa: Isa, base: Address, probe_len: usize) -> Result<Self, DecoderError> {
        let cs = match isa {
            Isa::X86 => Self::build_x86_32()?,
            Isa::Arm => Self::build_arm()?,
            Isa::Thumb => Self::build_thumb()?,
        };
        Ok(Self {
            isa,
            cs,
            base,
            memory: vec![0; probe_len],
        })
    }

    /// Build an x86 32-bit decoder printing MASM-style literals (`1234h`)
    pub fn build_x86_32() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new()
            .x86()
            .mode(X86Mode::Mode32)
            .syntax(X86Syntax::Masm)
            .detail(true)
            .build()?)
    }

    /// Build an ARM (ARM mode) decoder
    pub fn build_arm() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new()
            .arm()
            .mode(ArmMode::Arm)
            .detail(true)
            .build()?)
    }

    /// Build an ARM (Thumb mode) decoder
    pub fn build_thumb() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new()
            .arm()
            .mode(ArmMode::Thumb)
            .detail(true)
            .build()?)
    }

    /// ISA this oracle decodes
    pub fn isa(&self) -> Isa {
        self.isa
    }

    /// Current contents of the probe window
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn operand_kinds(&self, insn: &capstone::Insn<'_>, mnemonic: &str) -> Vec<OperandKind> {
        let detail = match self.cs.insn_detail(insn) {
            Ok(detail) => detail,
            Err(e) => {
                log::debug!("no operand detail for {}: {}", mnemonic, e);
                return Vec::new();
            }
        };
        let branch = is_branch(self.isa, mnemonic);
        let far = is_far_transfer(mnemonic);

        detail
            .arch_detail()
            .operands()
            .into_iter()
            .map(|op| match op {
                ArchOperand::X86Operand(op) => match op.op_type {
                    X86OperandType::Reg(_) => OperandKind::Register,
                    X86OperandType::Mem(mem) if mem.disp() == 0 && mem.base().0 != 0 => {
                        OperandKind::Other
                    }
                    X86OperandType::Mem(_) => OperandKind::Memory,
                    X86OperandType::Imm(_) if far => OperandKind::Far,
                    X86OperandType::Imm(_) if branch => OperandKind::Near,
                    X86OperandType::Imm(_) => OperandKind::Immediate,
                    _ => OperandKind::Other,
                },
                ArchOperand::ArmOperand(op) => match op.op_type {
                    ArmOperandType::Reg(_) => OperandKind::Register,
                    ArmOperandType::Mem(mem) if mem.disp() == 0 => OperandKind::Other,
                    ArmOperandType::Mem(_) => OperandKind::Memory,
                    ArmOperandType::Imm(_) if branch => OperandKind::Near,
                    ArmOperandType::Imm(_) => OperandKind::Immediate,
                    _ => OperandKind::Other,
                },
                _ => OperandKind::Other,
            })
            .collect()
    }
}

impl fmt::Display for CapstoneOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapstoneOracle::{}", self.isa)
    }
}

impl Oracle for CapstoneOracle {
    fn patch_bytes(&mut self, address: Address, bytes: &[u8]) {
        let Some(offset) = address.checked_sub(self.base) else {
            return;
        };
        let offset = offset as usize;
        if offset >= self.memory.len() {
            return;
        }
        let n = bytes.len().min(self.memory.len() - offset);
        self.memory[offset..offset + n].copy_from_slice(&bytes[..n]);
    }

    fn decode(&mut self, address: Address) -> DecodedInstruction {
        let offset = match address.checked_sub(self.base) {
            Some(offset) if (offset as usize) < self.memory.len() => offset as usize,
            _ => return DecodedInstruction::undecodable(),
        };

        let insns = match self.cs.disasm_count(&self.memory[offset..], address, 1) {
            Ok(insns) => insns,
            Err(_) => return DecodedInstruction::undecodable(),
        };
        let Some(insn) = insns.iter().next() else {
            return DecodedInstruction::undecodable();
        };
        if insn.address() != address {
            return DecodedInstruction::undecodable();
        }

        let mnemonic = insn.mnemonic().unwrap_or("").to_string();
        let op_str = insn.op_str().unwrap_or("").trim().to_string();
        let kinds = self.operand_kinds(&insn, &mnemonic);
        let pieces = split_operands(&op_str);
        let pieces = match self.isa {
            Isa::Arm | Isa::Thumb => attach_shifts(pieces),
            Isa::X86 if is_far_transfer(&mnemonic) => join_far_target(pieces),
            Isa::X86 => pieces,
        };
        let operands = pieces
            .into_iter()
            .take(MAX_OPERANDS)
            .enumerate()
            .map(|(i, text)| Operand::new(kinds.get(i).copied().unwrap_or(OperandKind::Other), text))
            .collect();

        let text = if op_str.is_empty() {
            mnemonic.clone()
        } else {
            format!("{} {}", mnemonic, op_str)
        };

        DecodedInstruction {
            length: insn.bytes().len(),
            mnemonic,
            operands,
            text,
        }
    }
}

/// Split an operand string at top-level commas.
///
/// Commas nested in `[...]` or `{...}` (memory expressions, register lists)
/// do not separate operands.
pub fn split_operands(op_str: &str) -> Vec<String> {
    let mut operands = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for c in op_str.chars() {
        match c {
            '[' | '{' | '(' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' | ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                operands.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        operands.push(current.trim().to_string());
    }
    operands
}

/// ARM shift operators that trail a register operand.
const SHIFT_OPERATORS: [&str; 5] = ["lsl", "lsr", "asr", "ror", "rrx"];

fn is_shift(piece: &str) -> bool {
    let op = piece.split_whitespace().next().unwrap_or("");
    SHIFT_OPERATORS.contains(&op.to_lowercase().as_str())
}

/// Fold a trailing shift (`lsl #3`, `lsl r3`, `rrx`) into the register
/// operand it applies to.
///
/// Capstone reports a shifted register as one operand while its text
/// separates the shift with a comma.
pub fn attach_shifts(pieces: Vec<String>) -> Vec<String> {
    let mut operands: Vec<String> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        match operands.last_mut() {
            Some(register) if is_shift(&piece) => {
                register.push_str(", ");
                register.push_str(&piece);
            }
            _ => operands.push(piece),
        }
    }
    operands
}

/// `1817h, 16151413h` becomes the single far target `1817h:16151413h`.
pub fn join_far_target(pieces: Vec<String>) -> Vec<String> {
    match pieces.as_slice() {
        [segment, offset] => vec![format!("{}:{}", segment, offset)],
        _ => pieces,
    }
}

/// Returns true if the mnemonic names a relative control transfer
fn is_branch(isa: Isa, mnemonic: &str) -> bool {
    let m = mnemonic.to_lowercase();
    match isa {
        Isa::X86 => {
            m.starts_with('j') || m == "call" || m.starts_with("loop") || m == "jecxz"
        }
        Isa::Arm | Isa::Thumb => {
            let base = m.split('.').next().unwrap_or("");
            base == "b"
                || base == "bl"
                || base == "blx"
                || base == "cbz"
                || base == "cbnz"
                || (base.len() == 3 && base.starts_with('b') && is_condition(&base[1..]))
                || (base.len() == 4 && base.starts_with("bl") && is_condition(&base[2..]))
        }
    }
}

fn is_condition(suffix: &str) -> bool {
    matches!(
        suffix,
        "eq" | "ne" | "cs" | "hs" | "cc" | "lo" | "mi" | "pl" | "vs" | "vc" | "hi" | "ls" | "ge"
            | "lt" | "gt" | "le" | "al"
    )
}

fn is_far_transfer(mnemonic: &str) -> bool {
    matches!(mnemonic.to_lowercase().as_str(), "ljmp" | "lcall")
}
