//! Shape registry and the rule × shape statement matrix of a chain.

use super::shape::{shapes_equal, StmtShape};
use super::OptimizeError;
use crate::ruleset::stmt::Stmt;
use crate::ruleset::Rule;

/// Distinct statement shapes of a chain, in first-seen order.
#[derive(Debug)]
pub(crate) struct ShapeRegistry {
    shapes: Vec<StmtShape>,
    max: usize,
}

impl ShapeRegistry {
    pub(crate) fn new(max: usize) -> Self {
        ShapeRegistry {
            shapes: Vec::new(),
            max,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.shapes.len()
    }

    pub(crate) fn get(&self, idx: usize) -> &StmtShape {
        &self.shapes[idx]
    }

    fn find(&self, shape: &StmtShape) -> Option<usize> {
        self.shapes.iter().position(|s| s.same(shape))
    }

    // Returns the index of `shape`, registering it if unseen
    fn find_or_insert(&mut self, shape: StmtShape) -> Result<usize, OptimizeError> {
        if let Some(idx) = self.find(&shape) {
            return Ok(idx);
        }
        if self.shapes.len() >= self.max {
            return Err(OptimizeError::TooManyShapes { max: self.max });
        }
        self.shapes.push(shape);
        Ok(self.shapes.len() - 1)
    }
}

/// For each rule (row) and shape (column), the position of the rule's
/// statement of that shape within `Rule::stmts`.
#[derive(Debug)]
pub(crate) struct StmtMatrix {
    cells: Vec<Vec<Option<usize>>>,
    // Rule holds two statements of one shape and cannot take part in a merge
    barrier: Vec<bool>,
}

impl StmtMatrix {
    pub(crate) fn num_rules(&self) -> usize {
        self.cells.len()
    }

    /// Position in `Rule::stmts` of rule `rule`'s statement with shape `shape`.
    pub(crate) fn get(&self, rule: usize, shape: usize) -> Option<usize> {
        self.cells[rule][shape]
    }

    pub(crate) fn is_barrier(&self, rule: usize) -> bool {
        self.barrier[rule]
    }

    fn stmt<'a>(&self, rules: &'a [Rule], rule: usize, shape: usize) -> Option<&'a Stmt> {
        self.get(rule, shape).map(|idx| &rules[rule].stmts[idx])
    }

    /// `true` if rules `i` and `j` have pairwise shape-equal statements in
    /// every column.
    pub(crate) fn rows_eq(&self, rules: &[Rule], i: usize, j: usize) -> bool {
        if self.barrier[i] || self.barrier[j] {
            return false;
        }
        let width = self.cells[i].len();
        (0..width).all(|k| shapes_equal(self.stmt(rules, i, k), self.stmt(rules, j, k)))
    }
}

/// Builds the shape registry and statement matrix for `rules`.
///
/// Fails if the chain has more than `max_shapes` distinct statement shapes.
/// `rules` is never modified.
pub(crate) fn collect_shapes(
    rules: &[Rule],
    max_shapes: usize,
) -> Result<(ShapeRegistry, StmtMatrix), OptimizeError> {
    let mut registry = ShapeRegistry::new(max_shapes);

    // Shapes that never compare equal cannot be found again by lookup, so
    // each statement's column is remembered as it is registered.
    let mut columns = Vec::with_capacity(rules.len());
    for rule in rules {
        let mut rule_columns = Vec::with_capacity(rule.stmts.len());
        for stmt in &rule.stmts {
            rule_columns.push(registry.find_or_insert(StmtShape::of(stmt))?);
        }
        columns.push(rule_columns);
    }

    let width = registry.len();
    let mut cells = vec![vec![None; width]; rules.len()];
    let mut barrier = vec![false; rules.len()];
    for (i, rule_columns) in columns.iter().enumerate() {
        for (stmt_idx, &k) in rule_columns.iter().enumerate() {
            if cells[i][k].is_some() {
                barrier[i] = true;
            }
            cells[i][k] = Some(stmt_idx);
        }
    }

    Ok((registry, StmtMatrix { cells, barrier }))
}
