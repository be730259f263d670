//! JSON run summary

use std::io::Write;

use serde::Serialize;

use crate::enumerator::{GeneratorConfig, RunStats};
use crate::CorpusError;

/// Settings and counters of one finished run.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub config: &'a GeneratorConfig,
    pub stats: &'a RunStats,
}

impl<'a> RunSummary<'a> {
    pub fn new(config: &'a GeneratorConfig, stats: &'a RunStats) -> Self {
        Self { config, stats }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, CorpusError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> Result<(), CorpusError> {
        out.write_all(self.to_json()?.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}
