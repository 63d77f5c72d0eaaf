//! In-memory representation of a compiled ruleset.
//!
//! Commands carry tables, tables own chains, chains own an ordered list of
//! rules and rules own their statements. Expressions hang off statements and
//! are shared by reference (see [`expr`]).

pub mod expr;
pub mod location;
pub mod stmt;

use std::fmt;

use bitmask_enum::bitmask;
use strum_macros::{Display, EnumString};

use self::location::Location;
use self::stmt::Stmt;

/// Address family of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Family {
    Ip,
    Ip6,
    Inet,
    Arp,
    Bridge,
    Netdev,
}

#[bitmask(u32)]
#[bitmask_config(vec_debug)]
pub enum ChainFlags {
    // Rules are installed in a fixed-function offload engine
    HwOffload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub location: Location,
    pub stmts: Vec<Stmt>,
    pub handle: Option<u64>,
}

impl Rule {
    pub fn new(location: Location, stmts: Vec<Stmt>) -> Self {
        Rule {
            location,
            stmts,
            handle: None,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stmt) in self.stmts.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", stmt)?;
        }
        if let Some(handle) = self.handle {
            write!(f, " # handle {}", handle)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub name: String,
    pub flags: ChainFlags,
    pub rules: Vec<Rule>,
}

impl Chain {
    pub fn new(name: &str) -> Self {
        Chain {
            name: name.to_string(),
            flags: ChainFlags::none(),
            rules: vec![],
        }
    }

    pub fn with_rules(name: &str, rules: Vec<Rule>) -> Self {
        Chain {
            rules,
            ..Chain::new(name)
        }
    }

    pub fn is_hw_offload(&self) -> bool {
        self.flags.contains(ChainFlags::HwOffload)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\tchain {} {{", self.name)?;
        if self.is_hw_offload() {
            writeln!(f, "\t\tflags offload;")?;
        }
        for rule in &self.rules {
            writeln!(f, "\t\t{}", rule)?;
        }
        writeln!(f, "\t}}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub family: Family,
    pub name: String,
    pub chains: Vec<Chain>,
}

impl Table {
    pub fn new(family: Family, name: &str, chains: Vec<Chain>) -> Self {
        Table {
            family,
            name: name.to_string(),
            chains,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "table {} {} {{", self.family, self.name)?;
        for chain in &self.chains {
            write!(f, "{}", chain)?;
        }
        writeln!(f, "}}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CmdOp {
    Add,
    Replace,
    Create,
    Insert,
    Delete,
    List,
    Flush,
}

/// Object a command operates on.
#[derive(Debug, Clone, PartialEq)]
pub enum CmdObj {
    Table(Table),
    Chain(Chain),
    Rule(Rule),
}

/// One command of a compiled command list.
#[derive(Debug, Clone, PartialEq)]
pub struct Cmd {
    pub op: CmdOp,
    pub obj: CmdObj,
}

impl Cmd {
    pub fn add_table(table: Table) -> Self {
        Cmd {
            op: CmdOp::Add,
            obj: CmdObj::Table(table),
        }
    }
}
