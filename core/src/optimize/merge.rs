//! Detection of mergeable rule runs and the rewrite that folds each run into
//! its first rule.

use std::rc::Rc;

use super::matrix::{ShapeRegistry, StmtMatrix};
use crate::ruleset::expr::{Expr, ExprRef, SetExpr, SetFlags};
use crate::ruleset::stmt::MatchStmt;
use crate::ruleset::Rule;

/// A run of consecutive rules to be folded into the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MergeRun {
    pub(crate) from: usize,
    pub(crate) num_rules: usize,
    // Columns of the match statements whose values are merged, in shape order
    pub(crate) stmts: Vec<usize>,
}

impl MergeRun {
    /// Index of the last rule in the run (inclusive).
    pub(crate) fn to(&self) -> usize {
        self.from + self.num_rules - 1
    }
}

/// Finds every maximal run of at least two consecutive row-equal rules,
/// left to right. Runs never overlap.
pub(crate) fn find_merge_runs(
    rules: &[Rule],
    shapes: &ShapeRegistry,
    matrix: &StmtMatrix,
) -> Vec<MergeRun> {
    let mut runs = vec![];
    let mut start = 0;
    while start < rules.len() {
        let mut end = start + 1;
        while end < rules.len() && matrix.rows_eq(rules, start, end) {
            end += 1;
        }
        if end - start >= 2 {
            let stmts: Vec<usize> = (0..shapes.len())
                .filter(|&k| matrix.get(start, k).is_some() && shapes.get(k).is_match())
                .collect();
            if stmts.is_empty() {
                // Identical rules without a match: nothing to fold
                log::debug!("Rules {}..={} have no selector to merge", start, end - 1);
            } else if stmts.len() == 1 {
                runs.push(MergeRun {
                    from: start,
                    num_rules: end - start,
                    stmts,
                });
            } else {
                runs.extend(split_at_sets(rules, matrix, start, end, &stmts));
            }
        }
        start = end;
    }
    for run in &runs {
        log::debug!(
            "Merge candidate: rules {}..={} on {} selector(s)",
            run.from,
            run.to(),
            run.stmts.len()
        );
    }
    runs
}

// A set cannot be an element of a concatenation, so rules matching a set on
// any selector split a multi-selector run. Stretches of at least two rules
// between them are still merged.
fn split_at_sets(
    rules: &[Rule],
    matrix: &StmtMatrix,
    start: usize,
    end: usize,
    stmts: &[usize],
) -> Vec<MergeRun> {
    let mut runs = vec![];
    let mut from = start;
    for i in start..=end {
        let cut = i == end
            || stmts
                .iter()
                .any(|&k| matches!(*match_stmt(rules, matrix, i, k).right, Expr::Set(_)));
        if !cut {
            continue;
        }
        if i < end {
            log::debug!("Rule {} matches a set on one of several selectors; not merging it", i);
        }
        if i - from >= 2 {
            runs.push(MergeRun {
                from,
                num_rules: i - from,
                stmts: stmts.to_vec(),
            });
        }
        from = i + 1;
    }
    runs
}

fn match_stmt<'a>(rules: &'a [Rule], matrix: &StmtMatrix, rule: usize, shape: usize) -> &'a MatchStmt {
    let stmt = match matrix.get(rule, shape) {
        Some(idx) => rules[rule].stmts[idx].as_match(),
        None => None,
    };
    stmt.unwrap_or_else(|| panic!("Cannot merge non-match statement (rule {}, shape {})", rule, shape))
}

fn match_stmt_mut<'a>(
    rules: &'a mut [Rule],
    matrix: &StmtMatrix,
    rule: usize,
    shape: usize,
) -> &'a mut MatchStmt {
    let stmt = match matrix.get(rule, shape) {
        Some(idx) => rules[rule].stmts[idx].as_match_mut(),
        None => None,
    };
    stmt.unwrap_or_else(|| panic!("Cannot merge non-match statement (rule {}, shape {})", rule, shape))
}

/// Rewrites the first rule of `run` to match the values of every rule in
/// the run. The remaining rules are left in place for the caller to drop.
pub(crate) fn merge_rules(rules: &mut [Rule], matrix: &StmtMatrix, run: &MergeRun) {
    assert!(run.num_rules >= 2 && !run.stmts.is_empty());
    if run.stmts.len() > 1 {
        merge_concat_stmts(rules, matrix, run);
    } else {
        merge_stmts(rules, matrix, run);
    }
}

// Key of a set element node
fn elem_key(elem: &ExprRef) -> &Expr {
    match &**elem {
        Expr::SetElem(key) => &**key,
        other => other,
    }
}

fn has_key(set: &SetExpr, key: &Expr) -> bool {
    set.elems.iter().any(|elem| elem_key(elem) == key)
}

// Adds the value(s) matched by `right` to `set`, skipping values already
// present. Anonymous sets are flattened into their elements.
fn add_values(set: &mut SetExpr, right: &ExprRef) {
    match right.as_anonymous_set() {
        Some(inner) => {
            for elem in &inner.elems {
                if !has_key(set, elem_key(elem)) {
                    set.elems.push(Rc::clone(elem));
                }
            }
        }
        None => {
            if !has_key(set, right) {
                set.add_elem(Rc::clone(right));
            }
        }
    }
}

// ip saddr 1.1.1.1 + ip saddr 2.2.2.2 => ip saddr { 1.1.1.1, 2.2.2.2 }
fn merge_stmts(rules: &mut [Rule], matrix: &StmtMatrix, run: &MergeRun) {
    let shape = run.stmts[0];

    let mut set = SetExpr::anonymous();
    for i in run.from..=run.to() {
        add_values(&mut set, &match_stmt(rules, matrix, i, shape).right);
    }

    // Replacing the old value releases the rule's reference to it
    match_stmt_mut(rules, matrix, run.from, shape).right = Expr::set(set);
}

// iifname eth0 ip daddr 1.1.1.1 + iifname eth1 ip daddr 1.1.1.1
//   => iifname . ip daddr { eth0 . 1.1.1.1, eth1 . 1.1.1.1 }
fn merge_concat_stmts(rules: &mut [Rule], matrix: &StmtMatrix, run: &MergeRun) {
    let selectors: Vec<ExprRef> = run
        .stmts
        .iter()
        .map(|&k| Rc::clone(&match_stmt(rules, matrix, run.from, k).left))
        .collect();

    let mut set = SetExpr::anonymous();
    set.flags |= SetFlags::Concat;
    for i in run.from..=run.to() {
        let values = run
            .stmts
            .iter()
            .map(|&k| Rc::clone(&match_stmt(rules, matrix, i, k).right))
            .collect();
        let tuple = Expr::concat(values);
        if !has_key(&set, &tuple) {
            set.add_elem(tuple);
        }
    }

    let survivor = match_stmt_mut(rules, matrix, run.from, run.stmts[0]);
    survivor.left = Expr::concat(selectors);
    survivor.right = Expr::set(set);

    // The other selectors now live in the concatenation
    let mut redundant: Vec<usize> = run.stmts[1..]
        .iter()
        .filter_map(|&k| matrix.get(run.from, k))
        .collect();
    redundant.sort_unstable();
    let stmts = &mut rules[run.from].stmts;
    for idx in redundant.into_iter().rev() {
        stmts.remove(idx);
    }
}
