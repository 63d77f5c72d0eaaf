//! Rule-merging optimizer.
//!
//! Runs once over a compiled command list, before rules are handed to the
//! kernel. Within each chain, runs of adjacent rules that differ only in the
//! values they match are collapsed into a single rule matching a set:
//!
//! ```text
//! ip saddr 1.1.1.1 counter accept
//! ip saddr 2.2.2.2 counter accept
//! ```
//! becomes
//! ```text
//! ip saddr { 1.1.1.1, 2.2.2.2 } counter accept
//! ```
//!
//! Rules differing on several selectors are merged into a concatenation
//! matched against a set of tuples
//! (`iifname . ip daddr { "eth0" . 1.1.1.1, "eth1" . 1.1.1.1 }`).
//!
//! The pass for one chain proceeds in steps:
//! 1. Collect the distinct statement shapes of the chain and build the
//!    rule × shape statement matrix.
//! 2. Scan the matrix for runs of consecutive rules whose rows are
//!    shape-equal.
//! 3. Rewrite the first rule of each run, drop the others and record the
//!    merge in the audit trail.
//!
//! Chains offloaded to hardware are never modified.

mod audit;
mod matrix;
mod merge;
mod shape;


pub use self::shape::shapes_equal;

use std::io::{self, Write};

use thiserror::Error;

use self::matrix::collect_shapes;
use self::merge::{find_merge_runs, merge_rules};
use crate::config::{default_config, OptimizerConfig};
use crate::ruleset::{Chain, Cmd, CmdObj, CmdOp, Table};

/// Default maximum number of distinct statement shapes per chain.
pub const MAX_STMT_SHAPES: usize = 32;

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("Chain has more than {max} distinct statement shapes")]
    TooManyShapes { max: usize },
}

/// Outcome of optimizing a command list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OptimizeSummary {
    /// Number of runs merged.
    pub merges: usize,
    /// Number of rules deleted by merges.
    pub rules_removed: usize,
    /// Number of hardware-offloaded chains left untouched.
    pub offload_skipped: usize,
    /// (table, chain) pairs left unoptimized because they exceeded the
    /// shape capacity.
    pub failed_chains: Vec<(String, String)>,
}

/// Merges adjacent rules, writing an audit record of each merge to `W`.
pub struct Optimizer<W: Write> {
    config: OptimizerConfig,
    audit: W,
}

impl Optimizer<io::Stderr> {
    /// Optimizer writing its audit trail to standard error.
    pub fn with_stderr(config: OptimizerConfig) -> Self {
        Optimizer::new(config, io::stderr())
    }
}

impl<W: Write> Optimizer<W> {
    pub fn new(config: OptimizerConfig, audit: W) -> Self {
        Optimizer { config, audit }
    }

    /// Consumes the optimizer, returning the audit sink.
    pub fn into_inner(self) -> W {
        self.audit
    }

    /// Optimizes every chain of every table added by `cmds`.
    ///
    /// A chain exceeding the shape capacity is left as compiled and reported
    /// in the summary; the remaining chains are still optimized.
    pub fn optimize(&mut self, cmds: &mut [Cmd]) -> OptimizeSummary {
        let mut summary = OptimizeSummary::default();
        for cmd in cmds.iter_mut() {
            if let (CmdOp::Add, CmdObj::Table(table)) = (cmd.op, &mut cmd.obj) {
                self.optimize_table(table, &mut summary);
            }
        }
        summary
    }

    fn optimize_table(&mut self, table: &mut Table, summary: &mut OptimizeSummary) {
        let mut merges = 0;
        for chain in table.chains.iter_mut() {
            if chain.is_hw_offload() {
                log::debug!("Skipping offloaded chain {} {}", table.name, chain.name);
                summary.offload_skipped += 1;
                continue;
            }
            let num_rules = chain.rules.len();
            match self.optimize_chain(chain) {
                Ok(n) => {
                    merges += n;
                    summary.rules_removed += num_rules - chain.rules.len();
                }
                Err(OptimizeError::TooManyShapes { max }) => {
                    log::warn!(
                        "Not optimizing chain {} {}: more than {} distinct statement shapes",
                        table.name,
                        chain.name,
                        max
                    );
                    summary
                        .failed_chains
                        .push((table.name.clone(), chain.name.clone()));
                }
            }
        }
        log::info!(
            "Table {} {}: merged {} rule run(s)",
            table.family,
            table.name,
            merges
        );
        summary.merges += merges;
    }

    /// Merges runs of adjacent rules in `chain`, returning the number of
    /// merges performed.
    ///
    /// Does not check the chain's offload flag. If the chain exceeds the
    /// shape capacity it is left unmodified. A failure to write the audit
    /// record is logged and does not undo the merges.
    pub fn optimize_chain(&mut self, chain: &mut Chain) -> Result<usize, OptimizeError> {
        let (shapes, matrix) = collect_shapes(&chain.rules, self.config.max_shapes)?;
        log::debug!(
            "Chain {}: {} rules, {} statement shapes",
            chain.name,
            matrix.num_rules(),
            shapes.len()
        );

        let runs = find_merge_runs(&chain.rules, &shapes, &matrix);
        if runs.is_empty() {
            return Ok(0);
        }

        // Absorbed rules are dropped only after every run is merged so that
        // matrix indices stay valid.
        let mut report = Vec::new();
        let mut absorbed = vec![false; chain.rules.len()];
        for run in &runs {
            merge_rules(&mut chain.rules, &matrix, run);
            if self.config.audit {
                // Writing into memory cannot fail
                let _ = audit::print_merge(&mut report, &chain.rules, run);
            }
            absorbed[run.from + 1..=run.to()].fill(true);
        }

        let rules = std::mem::take(&mut chain.rules);
        chain.rules = rules
            .into_iter()
            .zip(absorbed)
            .filter_map(|(rule, gone)| (!gone).then_some(rule))
            .collect();

        if let Err(err) = self.audit.write_all(&report) {
            log::warn!("Failed to write merge audit for chain {}: {}", chain.name, err);
        }
        Ok(runs.len())
    }
}

/// Optimizes `cmds` with the default configuration, auditing to stderr.
pub fn optimize(cmds: &mut [Cmd]) -> OptimizeSummary {
    Optimizer::with_stderr(default_config()).optimize(cmds)
}
