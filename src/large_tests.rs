//! End-to-end runs of the whole pipeline.
//!
//! Most tests drive the [`Enumerator`] with a [`ScriptedOracle`] so every
//! disposition is known in advance. The `capstone_*` tests run the real
//! oracle over a bounded prefix of the candidate space.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::decoder::split_operands;
use crate::{Address, DecodedInstruction, Operand, OperandKind, Oracle};

/// In-memory oracle answering from a fixed table.
///
/// The entry with the longest byte pattern matching the start of the probe
/// memory wins; anything unscripted is undecodable.
pub(crate) struct ScriptedOracle {
    base: Address,
    memory: Vec<u8>,
    script: Vec<(Vec<u8>, DecodedInstruction)>,
}

impl ScriptedOracle {
    pub(crate) fn new(base: Address, probe_len: usize) -> Self {
        Self {
            base,
            memory: vec![0; probe_len],
            script: Vec::new(),
        }
    }

    /// Script `bytes` to decode as `text`, consuming exactly those bytes.
    pub(crate) fn with(self, bytes: &[u8], text: &str, kinds: &[OperandKind]) -> Self {
        self.with_length(bytes, bytes.len(), text, kinds)
    }

    pub(crate) fn with_length(
        mut self,
        bytes: &[u8],
        length: usize,
        text: &str,
        kinds: &[OperandKind],
    ) -> Self {
        let (mnemonic, op_str) = text.split_once(' ').unwrap_or((text, ""));
        let operands = split_operands(op_str)
            .into_iter()
            .zip(kinds)
            .map(|(text, &kind)| Operand::new(kind, text))
            .collect();
        let insn = DecodedInstruction {
            length,
            mnemonic: mnemonic.to_string(),
            operands,
            text: text.to_string(),
        };
        self.script.push((bytes.to_vec(), insn));
        self
    }

    pub(crate) fn memory(&self) -> &[u8] {
        &self.memory
    }
}

impl Oracle for ScriptedOracle {
    fn patch_bytes(&mut self, address: Address, bytes: &[u8]) {
        let offset = (address - self.base) as usize;
        let n = bytes.len().min(self.memory.len().saturating_sub(offset));
        self.memory[offset..offset + n].copy_from_slice(&bytes[..n]);
    }

    fn decode(&mut self, address: Address) -> DecodedInstruction {
        let window = &self.memory[(address - self.base) as usize..];
        self.script
            .iter()
            .filter(|(bytes, _)| window.starts_with(bytes))
            .max_by_key(|(bytes, _)| bytes.len())
            .map(|(_, insn)| insn.clone())
            .unwrap_or_else(DecodedInstruction::undecodable)
    }
}

/// Write target that stays readable after a writer took ownership of it.
#[derive(Clone, Default)]
pub(crate) struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use rstest::rstest;

    use crate::decoder::CapstoneOracle;
    use crate::enumerator::{Disposition, Enumerator, GeneratorConfig, RunStats};
    use crate::format::{CorpusFormat, CorpusWriter, RunSummary, Skip, TraceLog};
    use crate::strategy::{EpochPolicy, IsaStrategy, Strategy, ThumbStrategy, X86Strategy};
    use crate::{filter, Isa};

    use crate::OperandKind::{Immediate, Register};

    const BASE: Address = 0x1000;

    /// Eight Thumb halfwords: two `movs` shapes, a `lsls` pair, `movs` again.
    fn thumb_oracle() -> ScriptedOracle {
        ScriptedOracle::new(BASE, 4)
            .with(&[0x00, 0x00], "movs r0, r0", &[Register, Register])
            .with(&[0x01, 0x00], "movs r1, r0", &[Register, Register])
            .with(&[0x03, 0x00], "lsls r0, r0, #1", &[Register, Register, Immediate])
            .with(&[0x04, 0x00], "lsls r0, r0, #2", &[Register, Register, Immediate])
            .with(&[0x05, 0x00], "movs r0, r0", &[Register, Register])
            .with(&[0x06, 0x00], "movs r0, r0", &[Register, Register])
    }

    fn thumb_corpus(policy: EpochPolicy) -> (String, RunStats) {
        let out = SharedBuf::default();
        let mut oracle = thumb_oracle();
        let mut strategy = ThumbStrategy::new();
        let config = GeneratorConfig::new(Isa::Thumb)
            .with_epoch_policy(policy)
            .with_limit(8);
        let mut corpus = CorpusWriter::new(out.clone(), CorpusFormat::Text);
        let stats = Enumerator::new(config, &mut oracle, &mut strategy)
            .run(&mut corpus)
            .unwrap();
        (out.contents(), stats)
    }

    #[test]
    fn test_thumb_mnemonic_epochs() {
        let (corpus, stats) = thumb_corpus(EpochPolicy::MnemonicChange);
        assert_eq!(
            corpus,
            "0000 movs r0, r0\n0100 movs r1, r0\n0300 lsls r0, r0, #1\n0500 movs r0, r0\n"
        );
        assert_eq!(stats.candidates, 8);
        assert_eq!(stats.accepted, 4);
        assert_eq!(stats.duplicates, 2);
        assert_eq!(stats.undecodable, 2);
        assert_eq!(stats.epochs, 3);
    }

    #[test]
    fn test_thumb_global_epoch() {
        let (corpus, stats) = thumb_corpus(EpochPolicy::Global);
        assert_eq!(
            corpus,
            "0000 movs r0, r0\n0100 movs r1, r0\n0300 lsls r0, r0, #1\n"
        );
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.duplicates, 3);
        assert_eq!(stats.epochs, 1);
    }

    #[test]
    fn test_every_candidate_is_accounted_for() {
        let (_, stats) = thumb_corpus(EpochPolicy::MnemonicChange);
        assert_eq!(
            stats.candidates,
            stats.accepted + stats.duplicates + stats.undecodable + stats.invalid + stats.empty
        );
    }

    #[test]
    fn test_run_is_deterministic() {
        let first = thumb_corpus(EpochPolicy::MnemonicChange);
        let second = thumb_corpus(EpochPolicy::MnemonicChange);
        assert_eq!(first, second);
    }

    #[test]
    fn test_x86_trace_records_every_candidate() {
        let trace = SharedBuf::default();
        let out = SharedBuf::default();
        let mut oracle = ScriptedOracle::new(BASE, 16)
            .with(&[0x10, 0x10], "adc al, 10h", &[Register, Immediate])
            .with(&[0x10, 0x11], "adc al, 11h", &[Register, Immediate]);
        let mut strategy = X86Strategy::new();
        let config = GeneratorConfig::new(Isa::X86).with_limit(3);
        let mut corpus =
            CorpusWriter::new(out.clone(), CorpusFormat::Text).with_trace(TraceLog::new(trace.clone()));

        let stats = Enumerator::new(config, &mut oracle, &mut strategy)
            .run(&mut corpus)
            .unwrap();
        assert_eq!(out.contents(), "1010 adc al, 10\n");
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.undecodable, 1);

        let log = trace.contents();
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].ends_with("1010; disasm: \"adc al, 10h\""));
        assert_eq!(lines[1].trim_start(), "OUTPUT disasm: \"adc al, 10\"");
        assert!(lines[2].ends_with("1011; disasm: \"adc al, 11h\""));
        assert_eq!(lines[3].trim_start(), "*** Skipping duplicate ***");
        assert!(lines[4].starts_with("INPUT hex: "));
        assert_eq!(lines[5].trim_start(), "*** Skipping undecodable ***");
        assert_eq!(lines[6], "Finished");
    }

    #[test]
    fn test_x86_pruning_follows_consumed_length() {
        // 10 10 decodes as two bytes, so the third position is never walked
        let mut oracle = ScriptedOracle::new(BASE, 16)
            .with(&[0x10, 0x10], "adc al, 10h", &[Register, Immediate]);
        let mut strategy = X86Strategy::new();
        let first = strategy.next_candidate().unwrap();
        let mut corpus = CorpusWriter::new(Vec::new(), CorpusFormat::Text);

        let mut enumerator =
            Enumerator::new(GeneratorConfig::new(Isa::X86), &mut oracle, &mut strategy);
        enumerator.step(&first, &mut corpus).unwrap();
        drop(enumerator);

        let second = strategy.next_candidate().unwrap();
        assert_eq!(&second[..3], &[0x10, 0x11, 0x10]);
    }

    #[rstest]
    #[case(&[0xd6], "salc", Skip::Invalid)]
    #[case(&[0x0f, 0x0d, 0x13], "nop dword ptr [ebx]", Skip::Invalid)]
    #[case(&[0xcd, 0x20], "int 20h", Skip::Invalid)]
    #[case(&[0x90], "; comment only", Skip::Empty)]
    fn test_x86_rejections(#[case] bytes: &[u8], #[case] text: &str, #[case] expected: Skip) {
        let mut oracle = ScriptedOracle::new(BASE, 16).with(bytes, text, &[]);
        let mut strategy = X86Strategy::new();
        let mut corpus = CorpusWriter::new(Vec::new(), CorpusFormat::Text);
        let mut enumerator =
            Enumerator::new(GeneratorConfig::new(Isa::X86), &mut oracle, &mut strategy);

        let mut candidate = bytes.to_vec();
        candidate.resize(16, 0x90);
        let disposition = enumerator.step(&candidate, &mut corpus).unwrap();
        assert_eq!(disposition, Disposition::Skipped(expected));
        assert_eq!(corpus.entries(), 0);
    }

    #[test]
    fn test_rejected_shape_does_not_block_later_duplicate() {
        let mut oracle = ScriptedOracle::new(BASE, 16)
            .with(&[0xd6], "salc", &[])
            .with(&[0x90, 0xd6], "salc", &[]);
        let mut strategy = X86Strategy::new();
        let mut corpus = CorpusWriter::new(Vec::new(), CorpusFormat::Text);
        let config = GeneratorConfig::new(Isa::X86).with_epoch_policy(EpochPolicy::Global);
        let mut enumerator = Enumerator::new(config, &mut oracle, &mut strategy);

        let mut invalid = vec![0xd6];
        invalid.resize(16, 0);
        assert_eq!(
            enumerator.step(&invalid, &mut corpus).unwrap(),
            Disposition::Skipped(Skip::Invalid)
        );
        let mut valid = vec![0x90, 0xd6];
        valid.resize(16, 0);
        assert_eq!(
            enumerator.step(&valid, &mut corpus).unwrap(),
            Disposition::Accepted("salc".to_string())
        );
    }

    #[test]
    fn test_overlong_decode_is_undecodable() {
        let mut oracle = ScriptedOracle::new(BASE, 4)
            .with_length(&[0x00, 0x00], 6, "movs r0, r0", &[Register, Register]);
        let mut strategy = ThumbStrategy::new();
        let mut corpus = CorpusWriter::new(Vec::new(), CorpusFormat::Text);
        let mut enumerator =
            Enumerator::new(GeneratorConfig::new(Isa::Thumb), &mut oracle, &mut strategy);

        let disposition = enumerator.step(&[0, 0, 0xff, 0xff], &mut corpus).unwrap();
        assert_eq!(disposition, Disposition::Skipped(Skip::Undecodable));
    }

    #[test]
    fn test_csv_and_summary_files() {
        let dir = tempfile::tempdir().unwrap();
        let corpus_path = dir.path().join("thumb.csv");
        let summary_path = dir.path().join("summary.json");

        let mut oracle = thumb_oracle();
        let mut strategy = Strategy::for_isa(Isa::Thumb);
        let config = GeneratorConfig::new(Isa::Thumb).with_limit(8);
        let file = fs::File::create(&corpus_path).unwrap();
        let mut corpus = CorpusWriter::new(file, CorpusFormat::Csv);
        let stats = Enumerator::new(config.clone(), &mut oracle, &mut strategy)
            .run(&mut corpus)
            .unwrap();
        drop(corpus);

        let summary = fs::File::create(&summary_path).unwrap();
        RunSummary::new(&config, &stats).write_to(summary).unwrap();

        let csv = fs::read_to_string(&corpus_path).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("hex,text"));
        assert_eq!(lines.next(), Some("0000,\"movs r0, r0\""));
        assert_eq!(csv.lines().count() as u64, stats.accepted + 1);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&summary_path).unwrap()).unwrap();
        assert_eq!(json["config"]["isa"], "thumb");
        assert_eq!(json["config"]["limit"], 8);
        assert_eq!(json["stats"]["accepted"], 4);
    }

    fn capstone_corpus(isa: Isa, limit: u64) -> (String, RunStats) {
        let out = SharedBuf::default();
        let config = GeneratorConfig::new(isa).with_limit(limit);
        let mut strategy = Strategy::for_isa(isa);
        let mut oracle =
            CapstoneOracle::for_isa(isa, config.probe_address, strategy.probe_len()).unwrap();
        let mut corpus = CorpusWriter::new(out.clone(), CorpusFormat::Text);
        let stats = Enumerator::new(config, &mut oracle, &mut strategy)
            .run(&mut corpus)
            .unwrap();
        (out.contents(), stats)
    }

    #[rstest]
    #[case(Isa::Arm, 2000)]
    #[case(Isa::Thumb, 2000)]
    #[case(Isa::X86, 2000)]
    fn capstone_corpus_lines_are_well_formed(#[case] isa: Isa, #[case] limit: u64) {
        let (corpus, stats) = capstone_corpus(isa, limit);
        assert_eq!(stats.candidates, limit);
        assert!(stats.accepted > 0, "no instructions accepted for {}", isa);
        assert_eq!(corpus.lines().count() as u64, stats.accepted);

        // decoding the written bytes alone consumes exactly those bytes
        let mut oracle = CapstoneOracle::for_isa(isa, BASE, 16).unwrap();
        for line in corpus.lines() {
            let (hex, text) = line.split_once(' ').unwrap();
            let bytes = hex::decode(hex).unwrap();
            assert!(!bytes.is_empty() && bytes.len() <= isa.max_instruction_len());
            assert!(!text.trim().is_empty());
            assert!(!text.contains("  "));

            let mut window = bytes.clone();
            window.resize(16, 0);
            oracle.patch_bytes(BASE, &window);
            assert_eq!(oracle.decode(BASE).length, bytes.len(), "length mismatch for '{}'", line);
        }
    }

    fn capstone_x86_canonical(bytes: &[u8]) -> String {
        let mut oracle = CapstoneOracle::for_isa(Isa::X86, BASE, 16).unwrap();
        let mut window = bytes.to_vec();
        window.resize(16, 0);
        oracle.patch_bytes(BASE, &window);
        let insn = oracle.decode(BASE);
        assert_eq!(insn.length, bytes.len());
        X86Strategy::new().canonicalize(&insn.text, bytes).unwrap()
    }

    #[rstest]
    #[case(&[0xa1, 0x34, 0x12, 0x00, 0x00], "mov eax, dword [1234]")]
    #[case(&[0x3e, 0xa1, 0x34, 0x12, 0x00, 0x00], "mov eax, ds:[1234]")]
    #[case(&[0xc7, 0x05, 0x00, 0x10, 0x40, 0x00, 0x01, 0x00, 0x00, 0x00], "mov dword [401000], 1")]
    #[case(&[0x9a, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18], "lcall 1817:16151413")]
    #[case(&[0xea, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18], "ljmp 1817:16151413")]
    fn capstone_x86_absolute_operands(#[case] bytes: &[u8], #[case] expected: &str) {
        assert_eq!(capstone_x86_canonical(bytes), expected);
    }

    #[test]
    fn capstone_arm_keeps_shifted_register_shapes() {
        let mut oracle = CapstoneOracle::for_isa(Isa::Arm, BASE, 4).unwrap();
        let mut strategy = Strategy::for_isa(Isa::Arm);
        let out = SharedBuf::default();
        let mut corpus = CorpusWriter::new(out.clone(), CorpusFormat::Text);
        let mut enumerator =
            Enumerator::new(GeneratorConfig::new(Isa::Arm), &mut oracle, &mut strategy);
        for word in [0xe081_0002u32, 0xe081_0182, 0xe081_0202, 0xe081_0312, 0xe081_0062] {
            enumerator.step(&word.to_le_bytes(), &mut corpus).unwrap();
        }
        assert_eq!(enumerator.stats().accepted, 4);
        assert_eq!(enumerator.stats().duplicates, 1);
        assert!(out.contents().contains("820181e0 add r0, r1, r2, lsl #3\n"));
    }

    #[test]
    fn capstone_x86_run_is_deterministic() {
        let first = capstone_corpus(Isa::X86, 1500);
        let second = capstone_corpus(Isa::X86, 1500);
        assert_eq!(first, second);
    }

    #[test]
    fn capstone_x86_corpus_is_filtered_and_clean() {
        let (corpus, stats) = capstone_corpus(Isa::X86, 3000);
        assert!(stats.duplicates > 0);
        for line in corpus.lines() {
            let (hex, text) = line.split_once(' ').unwrap();
            assert!(!filter::is_invalid(&hex::decode(hex).unwrap()), "blocked encoding in '{}'", line);
            assert!(!text.contains(';'), "comment left in '{}'", line);
            assert!(!text.contains("xmmword"), "vector keyword left in '{}'", line);
        }
    }
}
