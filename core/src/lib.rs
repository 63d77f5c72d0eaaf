//! Rule-merging optimizer for compiled packet-filter rulesets.
//!
//! After a ruleset has been parsed and compiled into commands, tables, chains
//! and rules, but before it is sent to the kernel, [`optimize`] scans every
//! chain and collapses runs of adjacent rules that differ only in the values
//! they match into a single rule matching an anonymous set. Fewer rules means
//! cheaper lookups and a smaller footprint in the packet-matching engine;
//! matching semantics are unchanged.
//!
//! ```
//! use std::net::Ipv4Addr;
//! use nftopt_core::ruleset::expr::{Expr, ProtoDesc, Verdict, VerdictExpr};
//! use nftopt_core::ruleset::location::Location;
//! use nftopt_core::ruleset::stmt::Stmt;
//! use nftopt_core::{Chain, Cmd, Family, Optimizer, Rule, Table};
//!
//! let rule = |a: u8| {
//!     Rule::new(
//!         Location::internal(),
//!         vec![
//!             Stmt::matches(
//!                 Expr::payload(ProtoDesc::Ip, "saddr"),
//!                 Expr::value(Ipv4Addr::new(a, a, a, a)),
//!             ),
//!             Stmt::counter(),
//!             Stmt::verdict(VerdictExpr::new(Verdict::Accept)),
//!         ],
//!     )
//! };
//! let chain = Chain::with_rules("input", vec![rule(1), rule(2)]);
//! let mut cmds = vec![Cmd::add_table(Table::new(Family::Ip, "filter", vec![chain]))];
//!
//! let mut optimizer = Optimizer::new(nftopt_core::config::default_config(), Vec::new());
//! let summary = optimizer.optimize(&mut cmds);
//! assert_eq!(summary.merges, 1);
//! ```

pub mod config;
pub mod optimize;
pub mod ruleset;

pub use config::OptimizerConfig;
pub use optimize::{optimize, OptimizeError, OptimizeSummary, Optimizer, MAX_STMT_SHAPES};
pub use ruleset::{Chain, ChainFlags, Cmd, CmdObj, CmdOp, Family, Rule, Table};
