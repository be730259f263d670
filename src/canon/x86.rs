//! Byte-oriented (x86) rewrite pipeline.
//!
//! The rules are order sensitive and run exactly in this order on the operand
//! part of the text (the mnemonic is split off first):
//!
//! 1. operand-less instructions only get the mnemonic renamed
//! 2. [`strip_small`]
//! 3. [`rewrite_offset_register`]
//! 4. [`rewrite_segments`]
//! 5. [`rename_vector_keyword`]
//! 6. [`strip_hex_suffix`]
//! 7. [`bracket_pointer`]
//! 8. [`strip_far_pointer`], then [`join_far_operands`]
//! 9. [`rename_mnemonic`]

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::prepare;
use crate::decoder::split_operands;

/// Mnemonic spellings folded onto one canonical form.
const MNEMONIC_RENAMES: &[(&str, &str)] = &[
    ("retn", "ret"),
    ("retnw", "ret"),
    ("iretw", "iret"),
    ("retfw", "retf"),
    ("pushfw", "pushf"),
    ("popfw", "popf"),
    ("pushaw", "pusha"),
    ("popaw", "popa"),
    ("enterw", "enter"),
    ("leavew", "leave"),
    ("cmova", "cmovnbe"),
    ("cmovg", "cmovnle"),
    ("cmovge", "cmovnl"),
];

/// Half registers whose names end in `h`.
const HALF_REGISTERS: [&str; 4] = ["ah", "bh", "ch", "dh"];

/// Prefixes that do not change which segment a memory operand uses.
const NEUTRAL_PREFIXES: [u8; 5] = [0x66, 0x67, 0xf0, 0xf2, 0xf3];

/// Segment-override prefixes.
const SEGMENT_PREFIXES: [u8; 6] = [0x26, 0x2e, 0x36, 0x3e, 0x64, 0x65];

const DS_PREFIX: u8 = 0x3e;

static OFFSET_REGISTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([0-9][0-9a-fA-F]*)[hH]\s*\[([^\]]+)\]").expect("invalid offset pattern")
});

static SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(es|ds|cs|fs|gs|ss):").expect("invalid segment pattern"));

static SEGMENT_ABSOLUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(es|ds|cs|fs|gs|ss):([0-9][0-9a-fA-F]*[hH])").expect("invalid segment pattern")
});

static HEX_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([0-9][0-9a-fA-F]*)[hH]\b").expect("invalid hex pattern")
});

static POINTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(byte|word|dword|qword|oword|fword)\s+ptr\s+([0-9][0-9a-fA-F]*)\b")
        .expect("invalid pointer pattern")
});

static SEGMENT_POINTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(byte|word|dword|qword|oword|fword)\s+ptr\s+(es|ds|cs|fs|gs|ss):([0-9][0-9a-fA-F]*)\b",
    )
    .expect("invalid pointer pattern")
});

/// Capstone's bracketed absolute operand, `dword ptr [401000]`.
static BRACKETED_POINTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(byte|word|dword|qword|oword|fword|tbyte)\s+ptr\s+\[([0-9][0-9a-fA-F]*)\]")
        .expect("invalid pointer pattern")
});

/// `dword ptr ds:[1234]`
static BRACKETED_SEGMENT_POINTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(byte|word|dword|qword|oword|fword|tbyte)\s+ptr\s+((?:es|ds|cs|fs|gs|ss):\[[0-9][0-9a-fA-F]*\])",
    )
    .expect("invalid pointer pattern")
});

/// `dword ptr ds:[1234h]` printed without a `0x3E` prefix.
static SPURIOUS_DS_POINTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:byte|word|dword|qword|xmmword|fword|tbyte)\s+ptr\s+ds:\[([0-9][0-9a-fA-F]*[hH])\]",
    )
    .expect("invalid pointer pattern")
});

static REGISTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:e?[abcd]x|[abcd][lh]|e?(?:si|di|sp|bp)|[cdefgs]s|x?mm[0-7]|st\([0-7]\)|st|[cd]r[0-7])$")
        .expect("invalid register pattern")
});

static FAR_OPERANDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9][0-9a-fA-F]*),\s*([0-9][0-9a-fA-F]*)$").expect("invalid far pattern")
});

static FAR_POINTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfar\s+ptr\s+([0-9a-fA-F]+:[0-9a-fA-F]+)").expect("invalid far pointer pattern")
});

/// Run the full pipeline over raw oracle text.
pub fn canonicalize(raw: &str, bytes: &[u8]) -> String {
    let text = prepare(raw);
    let Some((opcode, rest)) = text.split_once(' ') else {
        return rename_mnemonic(&text).to_string();
    };

    let rest = strip_small(rest);
    let rest = rewrite_offset_register(&rest);
    let rest = rewrite_segments(bytes, opcode, &rest);
    let rest = rename_vector_keyword(&rest);
    let rest = strip_hex_suffix(&rest);
    let rest = bracket_pointer(&rest);
    let rest = strip_far_pointer(&rest);
    let rest = join_far_operands(opcode, &rest);

    format!("{} {}", rename_mnemonic(opcode), rest)
}

/// Map alternate mnemonic spellings to their canonical form.
pub fn rename_mnemonic(opcode: &str) -> &str {
    MNEMONIC_RENAMES
        .iter()
        .find(|(from, _)| *from == opcode)
        .map(|(_, to)| *to)
        .unwrap_or(opcode)
}

/// Drop the `small` size qualifier.
pub fn strip_small(rest: &str) -> String {
    rest.replace("small ", "")
}

/// `6050403h[eax]` becomes `[eax+06050403]`.
pub fn rewrite_offset_register(rest: &str) -> String {
    OFFSET_REGISTER
        .replace_all(rest, |caps: &Captures<'_>| {
            let Ok(offset) = u64::from_str_radix(&caps[1], 16) else {
                return caps[0].to_string();
            };
            let base: String = caps[2].chars().filter(|c| !c.is_whitespace()).collect();
            format!("[{}+{:08x}]", base, offset)
        })
        .into_owned()
}

/// Returns true if the instruction carries a real `ds` override.
///
/// Only the leading run of legacy prefixes is inspected; an `0x3E` byte inside
/// the opcode, ModRM or immediate is not a prefix.
pub fn has_ds_override(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .take_while(|&&b| NEUTRAL_PREFIXES.contains(&b) || SEGMENT_PREFIXES.contains(&b))
        .any(|&b| b == DS_PREFIX)
}

/// Normalize segment annotations on absolute operands.
///
/// `lea` never cares about segments: an absolute `seg:1234h` becomes
/// `[1234h]`, and when there is none every segment token is dropped. For
/// other mnemonics a `ds:` the oracle prints without a `0x3E` prefix is
/// spurious and disappears; any genuine override is kept as `seg:[offset]`.
pub fn rewrite_segments(bytes: &[u8], opcode: &str, rest: &str) -> String {
    if opcode.eq_ignore_ascii_case("lea") {
        if SEGMENT_ABSOLUTE.is_match(rest) {
            return SEGMENT_ABSOLUTE.replace_all(rest, "[$2]").into_owned();
        }
        return SEGMENT.replace_all(rest, "").into_owned();
    }

    let genuine = has_ds_override(bytes);
    let rest = if genuine {
        rest.to_string()
    } else {
        SPURIOUS_DS_POINTER.replace_all(rest, "$1").into_owned()
    };
    let rest = SEGMENT_ABSOLUTE
        .replace_all(&rest, |caps: &Captures<'_>| {
            if &caps[1] == "ds" && !genuine {
                caps[2].to_string()
            } else {
                format!("{}:[{}]", &caps[1], &caps[2])
            }
        })
        .into_owned();

    if genuine {
        rest
    } else {
        rest.replace("ds:", "")
    }
}

/// `xmmword` is spelled `oword` in the corpus.
pub fn rename_vector_keyword(rest: &str) -> String {
    rest.replace("xmmword", "oword")
}

/// Drop the `h` suffix from hexadecimal literals, leaving `ah`..`dh` alone.
pub fn strip_hex_suffix(rest: &str) -> String {
    HEX_LITERAL
        .replace_all(rest, |caps: &Captures<'_>| {
            if HALF_REGISTERS.contains(&&caps[0]) {
                caps[0].to_string()
            } else {
                caps[1].to_string()
            }
        })
        .into_owned()
}

/// `dword ptr 401000` becomes `dword [401000]`, `dword ptr es:10` becomes
/// `dword es:[10]`.
///
/// Capstone's bracketed forms land on the same grammar: `dword ptr [401000]`
/// becomes `dword [401000]`. A segmented `dword ptr ds:[1234]` loses its size
/// when a register operand already fixes it (`mov eax, ds:[1234]`).
pub fn bracket_pointer(rest: &str) -> String {
    let sized_by_register = has_register_operand(rest);
    let rest = POINTER.replace_all(rest, "$1 [$2]");
    let rest = SEGMENT_POINTER.replace_all(&rest, "$1 $2:[$3]");
    let rest = BRACKETED_POINTER.replace_all(&rest, "$1 [$2]");
    BRACKETED_SEGMENT_POINTER
        .replace_all(&rest, |caps: &Captures<'_>| {
            if sized_by_register {
                caps[2].to_string()
            } else {
                format!("{} {}", &caps[1], &caps[2])
            }
        })
        .into_owned()
}

/// Returns true if any operand is a bare register name.
pub fn has_register_operand(rest: &str) -> bool {
    split_operands(rest)
        .iter()
        .any(|op| REGISTER.is_match(&op.to_lowercase()))
}

/// `lcall 1817, 16151413` becomes `lcall 1817:16151413`, the form `ljmp`
/// already has.
pub fn join_far_operands(opcode: &str, rest: &str) -> String {
    if !matches!(opcode, "lcall" | "ljmp") {
        return rest.to_string();
    }
    FAR_OPERANDS.replace(rest, "$1:$2").into_owned()
}

/// `far ptr 1817:16151413` becomes `1817:16151413`.
pub fn strip_far_pointer(rest: &str) -> String {
    FAR_POINTER.replace_all(rest, "$1").into_owned()
}
