//! Statements: the tests and actions a rule is made of.

use std::fmt;

use bitmask_enum::bitmask;
use strum_macros::Display;

use super::expr::{Expr, ExprRef, VerdictExpr};
use super::Family;

/// Relational operator of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            // Equality is implicit in nft syntax
            RelOp::Eq => "",
            RelOp::Neq => "!=",
            RelOp::Lt => "<",
            RelOp::Gt => ">",
            RelOp::Lte => "<=",
            RelOp::Gte => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Compares a selector (`left`) against a value (`right`).
#[derive(Debug, Clone, PartialEq)]
pub struct MatchStmt {
    pub op: RelOp,
    pub left: ExprRef,
    pub right: ExprRef,
}

impl fmt::Display for MatchStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            RelOp::Eq => write!(f, "{} {}", self.left, self.right),
            op => write!(f, "{} {} {}", self.left, op, self.right),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterStmt {
    pub packets: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitType {
    Pkts,
    PktBytes,
}

/// Limit flag: match when the rate is exceeded.
pub const LIMIT_F_INV: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitStmt {
    pub rate: u64,
    // Seconds per unit
    pub unit: u64,
    pub burst: u32,
    pub kind: LimitType,
    pub flags: u32,
}

impl LimitStmt {
    fn unit_str(&self) -> String {
        match self.unit {
            1 => "second".into(),
            60 => "minute".into(),
            3600 => "hour".into(),
            86400 => "day".into(),
            604800 => "week".into(),
            secs => format!("{} seconds", secs),
        }
    }
}

impl fmt::Display for LimitStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "limit rate ")?;
        if self.flags & LIMIT_F_INV != 0 {
            write!(f, "over ")?;
        }
        match self.kind {
            LimitType::Pkts => {
                write!(f, "{}/{}", self.rate, self.unit_str())?;
                if self.burst > 0 {
                    write!(f, " burst {} packets", self.burst)?;
                }
            }
            LimitType::PktBytes => {
                write!(f, "{} bytes/{}", self.rate, self.unit_str())?;
                if self.burst > 0 {
                    write!(f, " burst {} bytes", self.burst)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Emerg,
    Alert,
    Crit,
    Err,
    #[default]
    Warn,
    Notice,
    Info,
    Debug,
    Audit,
}

// Which optional log parameters were given explicitly
#[bitmask(u32)]
#[bitmask_config(vec_debug)]
pub enum LogFlags {
    Prefix,
    Snaplen,
    Group,
    Qthreshold,
    Level,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogStmt {
    pub prefix: Option<ExprRef>,
    pub snaplen: u32,
    pub group: u16,
    pub qthreshold: u16,
    pub level: LogLevel,
    // Kernel NF_LOG_* flags (tcp sequence, ip options, ...)
    pub logflags: u32,
    pub flags: LogFlags,
}

impl Default for LogStmt {
    fn default() -> Self {
        LogStmt {
            prefix: None,
            snaplen: 0,
            group: 0,
            qthreshold: 0,
            level: LogLevel::Warn,
            logflags: 0,
            flags: LogFlags::none(),
        }
    }
}

impl LogStmt {
    pub fn with_prefix(prefix: &str) -> Self {
        LogStmt {
            prefix: Some(Expr::value(prefix)),
            flags: LogFlags::Prefix,
            ..Default::default()
        }
    }
}

impl fmt::Display for LogStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log")?;
        if let Some(prefix) = &self.prefix {
            write!(f, " prefix {}", prefix)?;
        }
        if self.flags.contains(LogFlags::Group) {
            write!(f, " group {}", self.group)?;
        }
        if self.flags.contains(LogFlags::Snaplen) {
            write!(f, " snaplen {}", self.snaplen)?;
        }
        if self.flags.contains(LogFlags::Qthreshold) {
            write!(f, " queue-threshold {}", self.qthreshold)?;
        }
        if self.flags.contains(LogFlags::Level) && self.level != LogLevel::Warn {
            write!(f, " level {}", self.level)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectType {
    IcmpUnreach,
    TcpRst,
    IcmpxUnreach,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectStmt {
    // Explicit reject message, e.g. `reject with icmp $code`
    pub expr: Option<ExprRef>,
    pub family: Option<Family>,
    pub kind: RejectType,
    pub icmp_code: u8,
}

impl Default for RejectStmt {
    fn default() -> Self {
        // port-unreachable
        RejectStmt {
            expr: None,
            family: None,
            kind: RejectType::IcmpxUnreach,
            icmp_code: 3,
        }
    }
}

fn icmp_code_str(code: u8) -> String {
    match code {
        0 => "net-unreachable".into(),
        1 => "host-unreachable".into(),
        2 => "prot-unreachable".into(),
        3 => "port-unreachable".into(),
        9 => "net-prohibited".into(),
        10 => "host-prohibited".into(),
        13 => "admin-prohibited".into(),
        code => code.to_string(),
    }
}

impl fmt::Display for RejectStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reject")?;
        if let Some(expr) = &self.expr {
            return write!(f, " with {}", expr);
        }
        match self.kind {
            RejectType::TcpRst => write!(f, " with tcp reset"),
            RejectType::IcmpxUnreach if self.icmp_code == 3 => Ok(()),
            RejectType::IcmpxUnreach => write!(f, " with icmpx {}", icmp_code_str(self.icmp_code)),
            RejectType::IcmpUnreach => {
                let proto = match self.family {
                    Some(Family::Ip6) => "icmpv6",
                    _ => "icmp",
                };
                write!(f, " with {} {}", proto, icmp_code_str(self.icmp_code))
            }
        }
    }
}

/// Statement within a rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Match(MatchStmt),
    Counter(CounterStmt),
    Notrack,
    Verdict(VerdictExpr),
    Limit(LimitStmt),
    Log(LogStmt),
    Reject(RejectStmt),
    // Anything else (nat, meters, quotas, ...), kept as printed text
    Other(String),
}

impl Stmt {
    /// Shorthand for an equality match.
    pub fn matches(left: ExprRef, right: ExprRef) -> Self {
        Stmt::Match(MatchStmt {
            op: RelOp::Eq,
            left,
            right,
        })
    }

    pub fn counter() -> Self {
        Stmt::Counter(CounterStmt::default())
    }

    pub fn verdict(verdict: VerdictExpr) -> Self {
        Stmt::Verdict(verdict)
    }

    pub fn as_match(&self) -> Option<&MatchStmt> {
        match self {
            Stmt::Match(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_match_mut(&mut self) -> Option<&mut MatchStmt> {
        match self {
            Stmt::Match(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Match(m) => write!(f, "{}", m),
            Stmt::Counter(c) => {
                if c.packets == 0 && c.bytes == 0 {
                    write!(f, "counter")
                } else {
                    write!(f, "counter packets {} bytes {}", c.packets, c.bytes)
                }
            }
            Stmt::Notrack => write!(f, "notrack"),
            Stmt::Verdict(v) => write!(f, "{}", v),
            Stmt::Limit(l) => write!(f, "{}", l),
            Stmt::Log(l) => write!(f, "{}", l),
            Stmt::Reject(r) => write!(f, "{}", r),
            Stmt::Other(text) => write!(f, "{}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::expr::{ProtoDesc, Verdict};

    #[test]
    fn test_print_match() {
        let stmt = Stmt::matches(Expr::payload(ProtoDesc::Tcp, "dport"), Expr::value(22u64));
        assert_eq!(stmt.to_string(), "tcp dport 22");
        let neq = Stmt::Match(MatchStmt {
            op: RelOp::Neq,
            left: Expr::payload(ProtoDesc::Tcp, "dport"),
            right: Expr::value(22u64),
        });
        assert_eq!(neq.to_string(), "tcp dport != 22");
    }

    #[test]
    fn test_print_actions() {
        let limit = LimitStmt {
            rate: 10,
            unit: 60,
            burst: 5,
            kind: LimitType::Pkts,
            flags: LIMIT_F_INV,
        };
        assert_eq!(
            Stmt::Limit(limit).to_string(),
            "limit rate over 10/minute burst 5 packets"
        );
        assert_eq!(
            Stmt::Log(LogStmt::with_prefix("dropped: ")).to_string(),
            "log prefix \"dropped: \""
        );
        assert_eq!(Stmt::Reject(RejectStmt::default()).to_string(), "reject");
        let tcp_rst = RejectStmt {
            kind: RejectType::TcpRst,
            ..Default::default()
        };
        assert_eq!(Stmt::Reject(tcp_rst).to_string(), "reject with tcp reset");
        assert_eq!(
            Stmt::verdict(VerdictExpr::new(Verdict::Drop)).to_string(),
            "drop"
        );
        assert!(Stmt::counter().as_match().is_none());
    }
}
