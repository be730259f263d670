//! Canonicalization of oracle disassembly text.
//!
//! Every ISA shares the same preamble (drop the oracle's trailing comment,
//! trim, collapse whitespace). The byte-oriented ISA then runs an ordered
//! rewrite pipeline, see [`x86`].

pub mod x86;

use std::sync::LazyLock;

use regex::Regex;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("invalid whitespace pattern"));

/// Rule sets, one per ISA family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonicalizer {
    /// Whitespace collapsing only (ARM, Thumb)
    Plain,
    /// Ordered byte-oriented pipeline
    X86,
}

impl Canonicalizer {
    /// Canonical text for `raw`, or `None` when the rules leave nothing.
    ///
    /// `bytes` are the instruction bytes the oracle consumed; some rules
    /// inspect them (prefix detection).
    pub fn apply(self, raw: &str, bytes: &[u8]) -> Option<String> {
        let text = match self {
            Canonicalizer::Plain => prepare(raw),
            Canonicalizer::X86 => x86::canonicalize(raw, bytes),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Shared preamble: strip a `;` comment, trim and collapse whitespace.
pub fn prepare(raw: &str) -> String {
    let code = match raw.find(';') {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    collapse_whitespace(code.trim())
}

/// Collapse runs of spaces and tabs into a single space.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").into_owned()
}
