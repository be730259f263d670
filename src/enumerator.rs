//! The enumeration driver.
//!
//! For every candidate the strategy produces, the [`Enumerator`] patches the
//! probe, asks the oracle, filters, canonicalizes, deduplicates and finally
//! hands the survivor to the [`CorpusWriter`]. All mutable scan state (the
//! uniqueness epoch, the previous step, counters) lives here.

use std::io::Write;
use std::time::Instant;

use serde::Serialize;

use crate::format::{CorpusWriter, Skip};
use crate::signature::{classify, Epoch};
use crate::strategy::{ramp, EpochPolicy, IsaStrategy, Step, Strategy};
use crate::{Address, CorpusError, Isa, Oracle};

/// Default probe address; any address works as long as it is constant.
pub const DEFAULT_PROBE_ADDRESS: Address = 0x1000;

/// Resolved settings of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratorConfig {
    pub isa: Isa,
    pub probe_address: Address,
    pub epoch_policy: EpochPolicy,
    /// Stop after this many candidates
    pub limit: Option<u64>,
}

impl GeneratorConfig {
    /// Defaults for `isa`
    pub fn new(isa: Isa) -> Self {
        Self {
            isa,
            probe_address: DEFAULT_PROBE_ADDRESS,
            epoch_policy: Strategy::default_epoch_policy(isa),
            limit: None,
        }
    }

    pub fn with_epoch_policy(mut self, policy: EpochPolicy) -> Self {
        self.epoch_policy = policy;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Counters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub candidates: u64,
    pub undecodable: u64,
    pub empty: u64,
    pub invalid: u64,
    pub duplicates: u64,
    pub accepted: u64,
    pub epochs: u64,
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Written to the corpus with this canonical text
    Accepted(String),
    Skipped(Skip),
}

/// Previous decoded step, kept to detect epoch boundaries.
#[derive(Debug, Default)]
struct Previous {
    lead: u8,
    mnemonic: String,
}

pub struct Enumerator<'a, O: Oracle + ?Sized, S: IsaStrategy + ?Sized> {
    config: GeneratorConfig,
    oracle: &'a mut O,
    strategy: &'a mut S,
    epoch: Epoch,
    previous: Option<Previous>,
    stats: RunStats,
}

impl<'a, O: Oracle + ?Sized, S: IsaStrategy + ?Sized> Enumerator<'a, O, S> {
    /// Bind an oracle and a strategy; the strategy adopts the configured
    /// epoch policy.
    pub fn new(config: GeneratorConfig, oracle: &'a mut O, strategy: &'a mut S) -> Self {
        if config.isa != strategy.isa() {
            log::warn!(
                "configured for {} but enumerating {}",
                config.isa,
                strategy.isa()
            );
        }
        strategy.set_epoch_policy(config.epoch_policy);
        Self {
            config,
            oracle,
            strategy,
            epoch: Epoch::new(),
            previous: None,
            stats: RunStats::default(),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Counters so far
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Write the filler ramp over the whole probe window.
    pub fn prime_probe(&mut self) {
        let filler = ramp(self.strategy.ramp_start(), self.strategy.probe_len());
        self.oracle.patch_bytes(self.config.probe_address, &filler);
    }

    /// Enumerate the whole space (or up to the configured limit).
    ///
    /// Only I/O failures end the run early.
    pub fn run<W: Write>(mut self, corpus: &mut CorpusWriter<W>) -> Result<RunStats, CorpusError> {
        let start = Instant::now();
        log::info!(
            "Enumerating {} (epoch policy: {}, probe at 0x{:x})",
            self.strategy.isa(),
            self.config.epoch_policy,
            self.config.probe_address
        );
        self.prime_probe();

        while let Some(candidate) = self.strategy.next_candidate() {
            if self.config.limit.is_some_and(|limit| self.stats.candidates >= limit) {
                log::info!("Candidate limit reached");
                break;
            }
            self.step(&candidate, corpus)?;
        }
        corpus.finish()?;

        self.stats.epochs = self.epoch.resets() + 1;
        log::info!(
            "Finished in {:?}: {} accepted out of {} candidates",
            start.elapsed(),
            self.stats.accepted,
            self.stats.candidates
        );
        Ok(self.stats)
    }

    /// Push one candidate through the pipeline.
    pub fn step<W: Write>(
        &mut self,
        candidate: &[u8],
        corpus: &mut CorpusWriter<W>,
    ) -> Result<Disposition, CorpusError> {
        self.stats.candidates += 1;
        let address = self.config.probe_address;
        self.oracle.patch_bytes(address, candidate);
        let decoded = self.oracle.decode(address);

        if !decoded.is_valid() || decoded.length > candidate.len() {
            if decoded.length > candidate.len() {
                log::warn!(
                    "oracle consumed {} bytes of a {}-byte candidate, skipping",
                    decoded.length,
                    candidate.len()
                );
            }
            self.strategy.observe(0);
            return self.skip(corpus, candidate, "", Skip::Undecodable);
        }
        self.strategy.observe(decoded.length);

        let current = Step {
            lead: candidate[0],
            mnemonic: &decoded.mnemonic,
        };
        if let Some(prev) = &self.previous {
            let prev = Step {
                lead: prev.lead,
                mnemonic: &prev.mnemonic,
            };
            if self.strategy.epoch_boundary(&prev, &current) {
                log::debug!(
                    "epoch reset at {:02x} '{}' after {} signatures",
                    current.lead,
                    current.mnemonic,
                    self.epoch.len()
                );
                self.epoch.clear();
            }
        }
        let previous = self.previous.get_or_insert_with(Previous::default);
        previous.lead = candidate[0];
        previous.mnemonic.clear();
        previous.mnemonic.push_str(&decoded.mnemonic);

        let binary = &candidate[..decoded.length];
        if self.strategy.is_invalid(binary) {
            return self.skip(corpus, binary, &decoded.text, Skip::Invalid);
        }
        let Some(text) = self.strategy.canonicalize(&decoded.text, binary) else {
            return self.skip(corpus, binary, &decoded.text, Skip::Empty);
        };
        if !self.epoch.is_new(classify(&decoded)) {
            return self.skip(corpus, binary, &decoded.text, Skip::Duplicate);
        }

        if let Some(trace) = corpus.trace() {
            trace.input(binary, &decoded.text)?;
            trace.output(&text)?;
        }
        corpus.write(binary, &text)?;
        self.stats.accepted += 1;
        if self.stats.accepted % self.strategy.progress_interval() == 0 {
            log::info!("{} opcodes processed", self.stats.accepted);
        }
        Ok(Disposition::Accepted(text))
    }

    fn skip<W: Write>(
        &mut self,
        corpus: &mut CorpusWriter<W>,
        binary: &[u8],
        raw: &str,
        reason: Skip,
    ) -> Result<Disposition, CorpusError> {
        match reason {
            Skip::Undecodable => self.stats.undecodable += 1,
            Skip::Invalid => self.stats.invalid += 1,
            Skip::Empty => self.stats.empty += 1,
            Skip::Duplicate => self.stats.duplicates += 1,
        }
        log::trace!("{} {}: {}", crate::format::hex_bytes(binary), raw, reason);
        if let Some(trace) = corpus.trace() {
            trace.input(binary, raw)?;
            trace.skip(reason)?;
        }
        Ok(Disposition::Skipped(reason))
    }
}
