//! opcode-corpus
//!
//! Enumerates the instruction space of one ISA against Capstone and writes
//! the deduplicated `(bytes, canonical text)` corpus.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use opcode_corpus::{
    decoder::CapstoneOracle,
    enumerator::{Enumerator, GeneratorConfig, DEFAULT_PROBE_ADDRESS},
    format::{CorpusFormat, CorpusWriter, RunSummary, TraceLog},
    strategy::{EpochPolicy, IsaStrategy, Strategy},
    Isa,
};

/// Build a decoder reference corpus by exhaustive enumeration.
#[derive(Parser, Debug)]
#[command(name = "opcode-corpus")]
#[command(version, about, long_about = None)]
struct Args {
    /// Instruction set to enumerate
    #[arg(value_enum)]
    isa: Isa,

    /// Corpus file (defaults to `<isa>-opcodes.txt`)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Corpus encoding
    #[arg(short, long, value_enum, default_value_t = CorpusFormat::Text)]
    format: CorpusFormat,

    /// When the duplicate-shape set is cleared (defaults per ISA)
    #[arg(short, long, value_enum)]
    epoch_policy: Option<EpochPolicy>,

    /// Stop after this many candidates
    #[arg(short, long)]
    limit: Option<u64>,

    /// Per-candidate trace file (x86 writes `<output>.log` unless --no-trace)
    #[arg(short, long)]
    trace: Option<PathBuf>,

    /// Do not write a trace file
    #[arg(long, conflicts_with = "trace")]
    no_trace: bool,

    /// Write a JSON run summary here
    #[arg(short, long)]
    summary: Option<PathBuf>,

    /// Probe address (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_address, default_value_t = DEFAULT_PROBE_ADDRESS)]
    probe_address: u64,

    /// Increase logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_address(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn default_output(isa: Isa) -> PathBuf {
    let name = match isa {
        Isa::Arm => "arm",
        Isa::Thumb => "thumb",
        Isa::X86 => "x86",
    };
    PathBuf::from(format!("{}-opcodes.txt", name))
}

fn trace_path(args: &Args, output: &Path) -> Option<PathBuf> {
    if args.no_trace {
        return None;
    }
    match (&args.trace, args.isa) {
        (Some(path), _) => Some(path.clone()),
        (None, Isa::X86) => {
            let mut name = output.as_os_str().to_owned();
            name.push(".log");
            Some(PathBuf::from(name))
        }
        (None, _) => None,
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "opcode_corpus=info",
        1 => "opcode_corpus=debug",
        _ => "opcode_corpus=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = GeneratorConfig::new(args.isa);
    config.probe_address = args.probe_address;
    if let Some(policy) = args.epoch_policy {
        config = config.with_epoch_policy(policy);
    }
    if let Some(limit) = args.limit {
        config = config.with_limit(limit);
    }

    let mut strategy = Strategy::for_isa(args.isa);
    let mut oracle = CapstoneOracle::for_isa(args.isa, config.probe_address, strategy.probe_len())
        .context("Failed to create Capstone oracle")?;

    let output = args.output.clone().unwrap_or_else(|| default_output(args.isa));
    let file = File::create(&output)
        .with_context(|| format!("Failed to create corpus file {}", output.display()))?;
    let mut corpus = CorpusWriter::new(BufWriter::new(file), args.format);

    if let Some(path) = trace_path(&args, &output) {
        let file = File::create(&path)
            .with_context(|| format!("Failed to create trace file {}", path.display()))?;
        corpus = corpus.with_trace(TraceLog::new(BufWriter::new(file)));
    }

    let stats = Enumerator::new(config.clone(), &mut oracle, &mut strategy)
        .run(&mut corpus)
        .with_context(|| format!("Enumeration failed writing {}", output.display()))?;

    if let Some(path) = &args.summary {
        let file = File::create(path)
            .with_context(|| format!("Failed to create summary file {}", path.display()))?;
        RunSummary::new(&config, &stats)
            .write_to(BufWriter::new(file))
            .context("Failed to write run summary")?;
    }

    println!(
        "{}: {} instructions written to {} ({} candidates, {} duplicates, {} invalid)",
        args.isa,
        stats.accepted,
        output.display(),
        stats.candidates,
        stats.duplicates,
        stats.invalid
    );
    Ok(())
}
