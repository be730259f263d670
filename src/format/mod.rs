//! Corpus and trace output

mod csv_corpus;
mod header;
mod json;

pub use self::header::header_line;
pub use self::json::RunSummary;

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use clap::ValueEnum;
use serde::Serialize;

use crate::CorpusError;

/// Indentation in front of trace dispositions, so they line up under the
/// `INPUT` column.
const TRACE_INDENT: &str = "\t\t\t\t\t\t\t\t";

/// Supported corpus encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorpusFormat {
    /// `<hex> <text>` lines (default)
    Text,
    /// C initializer lines `{len, "\xNN..", "text"},`
    Header,
    /// `hex,text` CSV records
    Csv,
}

impl fmt::Display for CorpusFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorpusFormat::Text => write!(f, "text"),
            CorpusFormat::Header => write!(f, "header"),
            CorpusFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for CorpusFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(CorpusFormat::Text),
            "header" | "h" => Ok(CorpusFormat::Header),
            "csv" => Ok(CorpusFormat::Csv),
            _ => Err(format!("Unknown corpus format: {}", s)),
        }
    }
}

/// Lowercase hex of `bytes`, no separators.
pub fn hex_bytes(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// `<hex> <text>\n`
pub fn text_line(binary: &[u8], text: &str) -> String {
    format!("{} {}\n", hex_bytes(binary), text)
}

enum Output<W: Write> {
    Lines(W, CorpusFormat),
    Csv(csv::Writer<W>),
}

/// Append-only corpus sink.
///
/// Every entry is flushed as soon as it is written, so an interrupted run
/// leaves a corpus made of complete lines.
pub struct CorpusWriter<W: Write> {
    output: Output<W>,
    trace: Option<TraceLog>,
    entries: u64,
}

impl<W: Write> CorpusWriter<W> {
    pub fn new(out: W, format: CorpusFormat) -> Self {
        let output = match format {
            CorpusFormat::Csv => Output::Csv(csv_corpus::writer(out)),
            other => Output::Lines(out, other),
        };
        Self {
            output,
            trace: None,
            entries: 0,
        }
    }

    /// Attach a verbose per-candidate trace.
    pub fn with_trace(mut self, trace: TraceLog) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Number of entries written so far
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Append one `(binary, text)` pair.
    pub fn write(&mut self, binary: &[u8], text: &str) -> Result<(), CorpusError> {
        debug_assert!(!binary.is_empty());
        debug_assert!(!text.contains('\n'));
        match &mut self.output {
            Output::Lines(out, CorpusFormat::Header) => {
                out.write_all(header_line(binary, text).as_bytes())?;
                out.flush()?;
            }
            Output::Lines(out, _) => {
                out.write_all(text_line(binary, text).as_bytes())?;
                out.flush()?;
            }
            Output::Csv(out) => csv_corpus::write_record(out, binary, text)?,
        }
        self.entries += 1;
        Ok(())
    }

    pub(crate) fn trace(&mut self) -> Option<&mut TraceLog> {
        self.trace.as_mut()
    }

    /// Flush everything and close the trace.
    pub fn finish(&mut self) -> Result<(), CorpusError> {
        match &mut self.output {
            Output::Lines(out, _) => out.flush()?,
            Output::Csv(out) => out.flush()?,
        }
        if let Some(trace) = self.trace.as_mut() {
            trace.finish()?;
        }
        Ok(())
    }
}

/// Outcome of one candidate, as recorded in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    Undecodable,
    Invalid,
    Empty,
    Duplicate,
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::Undecodable => write!(f, "*** Skipping undecodable ***"),
            Skip::Invalid => write!(f, "*** Skipping invalid opcode ***"),
            Skip::Empty => write!(f, "*** Skipping empty disassembly ***"),
            Skip::Duplicate => write!(f, "*** Skipping duplicate ***"),
        }
    }
}

/// Human-readable log of every candidate and what happened to it.
pub struct TraceLog {
    out: Box<dyn Write>,
}

impl TraceLog {
    pub fn new(out: impl Write + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    /// `INPUT hex: <hex>; disasm: "<raw>"`
    pub fn input(&mut self, binary: &[u8], raw: &str) -> Result<(), CorpusError> {
        writeln!(self.out, "INPUT hex: {:>20}; disasm: \"{}\"", hex_bytes(binary), raw)?;
        Ok(())
    }

    /// `OUTPUT disasm: "<canonical>"`
    pub fn output(&mut self, text: &str) -> Result<(), CorpusError> {
        writeln!(self.out, "{}OUTPUT disasm: \"{}\"", TRACE_INDENT, text)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn skip(&mut self, reason: Skip) -> Result<(), CorpusError> {
        writeln!(self.out, "{}{}", TRACE_INDENT, reason)?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CorpusError> {
        writeln!(self.out, "Finished")?;
        self.out.flush()?;
        Ok(())
    }
}
