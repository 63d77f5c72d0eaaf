//! Human-readable record of every merge, written to the diagnostic sink.
//!
//! ```text
//! Merging:
//! ruleset.nft:3:3-30:   ip saddr 1.1.1.1 accept
//! ruleset.nft:4:3-30:   ip saddr 2.2.2.2 accept
//! into:
//!         ip saddr { 1.1.1.1, 2.2.2.2 } accept
//! ```

use std::io::{self, Write};

use super::merge::MergeRun;
use crate::ruleset::Rule;

// Quotes the source line a rule was parsed from. Rules without source text
// (synthesized, or read back from the kernel) print nothing.
fn print_rule_source(out: &mut impl Write, rule: &Rule) -> io::Result<()> {
    if rule.location.indesc.is_synthetic() {
        return Ok(());
    }
    match rule.location.source_line() {
        Some(line) => writeln!(out, "{}{}", rule.location, line),
        None => Ok(()),
    }
}

/// Prints the rules absorbed by `run` followed by the merged rule.
///
/// Must be called after the first rule of the run has been rewritten and
/// before the absorbed rules are dropped.
pub(crate) fn print_merge(out: &mut impl Write, rules: &[Rule], run: &MergeRun) -> io::Result<()> {
    writeln!(out, "Merging:")?;
    for rule in &rules[run.from..=run.to()] {
        print_rule_source(out, rule)?;
    }
    writeln!(out, "into:")?;
    writeln!(out, "\t{}", rules[run.from])
}
