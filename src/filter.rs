//! Encodings the x86 oracle mis-decodes or that must not appear in a corpus.

/// Segment-override prefixes skipped before matching the blocklist.
const SEGMENT_PREFIXES: [u8; 6] = [0x26, 0x2e, 0x36, 0x3e, 0x64, 0x65];

/// Two-byte `0F xx` opcodes that are undefined or decoded inconsistently.
const BLOCKED_0F: [u8; 5] = [0x19, 0x24, 0x26, 0xa6, 0xa7];

/// Returns true if `insn` (the consumed instruction bytes) must be skipped.
pub fn is_invalid(insn: &[u8]) -> bool {
    let k = insn
        .iter()
        .take_while(|&&b| SEGMENT_PREFIXES.contains(&b))
        .count();
    // prefixes with no opcode behind them
    let Some(&b) = insn.get(k) else {
        return true;
    };
    if b == 0xd6 {
        // setalc
        return true;
    }
    let Some(&b2) = insn.get(k + 1) else {
        return false;
    };
    match (b, b2) {
        (0x0f, op) if BLOCKED_0F.contains(&op) => true,
        // VxD call
        (0xcd, 0x20) => true,
        (0x0f, 0x0d) => insn.get(k + 2).map_or(true, |&modrm| modrm == 0x13),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0x0f, 0x19, 0xc0])]
    #[case(&[0x0f, 0x24, 0xc0])]
    #[case(&[0x0f, 0xa6, 0xc0])]
    #[case(&[0xcd, 0x20, 0x00, 0x00, 0x00, 0x00])]
    #[case(&[0xd6, 0x10])]
    #[case(&[0x2e, 0x0f, 0xa7, 0xc0])]
    #[case(&[0x0f, 0x0d, 0x13])]
    #[case(&[0x0f, 0x0d])]
    #[case(&[0x3e, 0x64])]
    #[case(&[0x26])]
    fn test_blocked(#[case] insn: &[u8]) {
        assert!(is_invalid(insn));
    }

    #[rstest]
    #[case(&[0x01, 0xd8])]
    #[case(&[0xcd, 0x21])]
    #[case(&[0x0f, 0x0d, 0x08])]
    #[case(&[0x3e, 0x8b, 0x00])]
    fn test_allowed(#[case] insn: &[u8]) {
        assert!(!is_invalid(insn));
    }

    #[test]
    fn test_single_byte_instructions() {
        assert!(!is_invalid(&[0x90]));
        assert!(!is_invalid(&[0x3e, 0xc3]));
        assert!(is_invalid(&[0xd6]));
        assert!(is_invalid(&[]));
    }
}
