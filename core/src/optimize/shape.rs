//! Statement shapes: a statement's identity with its matched value stripped.
//!
//! Two statements have the same shape when they are of the same kind and
//! agree on every parameter except the value a match compares against. Rules
//! whose statements pairwise share shapes differ only in those values and can
//! be folded into a single rule matching a set.

use crate::ruleset::expr::{
    CtExpr, Expr, ExprKind, ExthdrExpr, MetaExpr, PayloadExpr, RtExpr, SocketExpr, Value,
    Verdict, VerdictExpr,
};
use crate::ruleset::stmt::{
    LimitStmt, LogFlags, LogLevel, LogStmt, RejectStmt, RejectType, RelOp, Stmt,
};
use crate::ruleset::Family;

/// Field a match statement tests.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Selector {
    Payload(PayloadExpr),
    Exthdr(ExthdrExpr),
    Meta(MetaExpr),
    Ct(CtExpr),
    Rt(RtExpr),
    Socket(SocketExpr),
}

impl Selector {
    fn from_expr(expr: &Expr) -> Option<Selector> {
        match expr {
            Expr::Payload(p) => Some(Selector::Payload(p.clone())),
            Expr::Exthdr(e) => Some(Selector::Exthdr(e.clone())),
            Expr::Meta(m) => Some(Selector::Meta(m.clone())),
            Expr::Ct(c) => Some(Selector::Ct(c.clone())),
            Expr::Rt(r) => Some(Selector::Rt(r.clone())),
            Expr::Socket(s) => Some(Selector::Socket(s.clone())),
            _ => None,
        }
    }
}

/// Jump/goto target as far as shape comparison is concerned.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChainTarget {
    // Literal chain name
    Literal(Value),
    // Non-literal target; only its kind is compared
    Other(ExprKind),
}

#[derive(Debug, Clone)]
pub(crate) enum LogPrefix {
    Absent,
    Literal(Value),
    // Never equal to anything
    NonLiteral,
}

impl LogPrefix {
    fn same(&self, other: &LogPrefix) -> bool {
        match (self, other) {
            // Neither statement sets a prefix, so there is nothing to differ on
            (LogPrefix::Absent, LogPrefix::Absent) => true,
            (LogPrefix::Literal(a), LogPrefix::Literal(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LogParams {
    snaplen: u32,
    group: u16,
    qthreshold: u16,
    level: LogLevel,
    logflags: u32,
    flags: LogFlags,
    prefix: LogPrefix,
}

impl LogParams {
    fn from_stmt(log: &LogStmt) -> Self {
        let prefix = match log.prefix.as_deref() {
            None => LogPrefix::Absent,
            Some(Expr::Value(value)) => LogPrefix::Literal(value.clone()),
            Some(_) => LogPrefix::NonLiteral,
        };
        LogParams {
            snaplen: log.snaplen,
            group: log.group,
            qthreshold: log.qthreshold,
            level: log.level,
            logflags: log.logflags,
            flags: log.flags,
            prefix,
        }
    }

    fn same(&self, other: &LogParams) -> bool {
        self.snaplen == other.snaplen
            && self.group == other.group
            && self.qthreshold == other.qthreshold
            && self.level == other.level
            && self.logflags == other.logflags
            && self.flags == other.flags
            && self.prefix.same(&other.prefix)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RejectParams {
    family: Option<Family>,
    kind: RejectType,
    icmp_code: u8,
}

/// Exemplar of a statement shape.
///
/// Holds an independent copy of the compared fields only, so shapes stay
/// valid while the rules they were taken from are rewritten or dropped.
#[derive(Debug, Clone)]
pub(crate) enum StmtShape {
    Match(Selector),
    Counter,
    Notrack,
    Verdict {
        code: Verdict,
        chain: Option<ChainTarget>,
    },
    Limit(LimitStmt),
    Log(LogParams),
    Reject(RejectParams),
    // Not equal to any shape, including itself
    Unmergeable,
}

impl StmtShape {
    pub(crate) fn of(stmt: &Stmt) -> StmtShape {
        match stmt {
            Stmt::Match(m) => {
                // Only equality tests can be widened to set membership
                if m.op != RelOp::Eq {
                    return StmtShape::Unmergeable;
                }
                match Selector::from_expr(&m.left) {
                    Some(selector) => StmtShape::Match(selector),
                    None => StmtShape::Unmergeable,
                }
            }
            Stmt::Counter(_) => StmtShape::Counter,
            Stmt::Notrack => StmtShape::Notrack,
            Stmt::Verdict(verdict) => Self::verdict(verdict),
            Stmt::Limit(limit) => StmtShape::Limit(limit.clone()),
            Stmt::Log(log) => StmtShape::Log(LogParams::from_stmt(log)),
            Stmt::Reject(reject) => Self::reject(reject),
            Stmt::Other(_) => StmtShape::Unmergeable,
        }
    }

    fn verdict(verdict: &VerdictExpr) -> StmtShape {
        let chain = verdict.chain.as_deref().map(|chain| match chain {
            Expr::Value(name) => ChainTarget::Literal(name.clone()),
            other => ChainTarget::Other(other.kind()),
        });
        StmtShape::Verdict {
            code: verdict.code,
            chain,
        }
    }

    fn reject(reject: &RejectStmt) -> StmtShape {
        if reject.expr.is_some() {
            return StmtShape::Unmergeable;
        }
        StmtShape::Reject(RejectParams {
            family: reject.family,
            kind: reject.kind,
            icmp_code: reject.icmp_code,
        })
    }

    /// Shape equality. Not reflexive for [`StmtShape::Unmergeable`].
    pub(crate) fn same(&self, other: &StmtShape) -> bool {
        match (self, other) {
            (StmtShape::Match(a), StmtShape::Match(b)) => a == b,
            (StmtShape::Counter, StmtShape::Counter) => true,
            (StmtShape::Notrack, StmtShape::Notrack) => true,
            (
                StmtShape::Verdict { code, chain },
                StmtShape::Verdict {
                    code: other_code,
                    chain: other_chain,
                },
            ) => code == other_code && chain == other_chain,
            (StmtShape::Limit(a), StmtShape::Limit(b)) => a == b,
            (StmtShape::Log(a), StmtShape::Log(b)) => a.same(b),
            (StmtShape::Reject(a), StmtShape::Reject(b)) => a == b,
            _ => false,
        }
    }

    /// `true` if statements of this shape get their values folded into a set.
    pub(crate) fn is_match(&self) -> bool {
        matches!(self, StmtShape::Match(_))
    }
}

/// Compares two optional statements by shape, ignoring matched values.
///
/// Two absent statements are equal; an absent and a present one are not.
pub fn shapes_equal(a: Option<&Stmt>, b: Option<&Stmt>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => StmtShape::of(a).same(&StmtShape::of(b)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::expr::{CtDir, CtKey, ExthdrDesc, MetaKey, ProtoDesc, RtKey, SocketKey};
    use crate::ruleset::stmt::{LimitType, MatchStmt};
    use std::net::Ipv4Addr;
    use std::rc::Rc;

    fn saddr(a: u8) -> Stmt {
        Stmt::matches(
            Expr::payload(ProtoDesc::Ip, "saddr"),
            Expr::value(Ipv4Addr::new(a, a, a, a)),
        )
    }

    fn eq(a: &Stmt, b: &Stmt) -> bool {
        shapes_equal(Some(a), Some(b))
    }

    #[test]
    fn test_absent() {
        assert!(shapes_equal(None, None));
        assert!(!shapes_equal(Some(&Stmt::counter()), None));
        assert!(!shapes_equal(None, Some(&Stmt::counter())));
    }

    #[test]
    fn test_match_value_blind() {
        assert!(eq(&saddr(1), &saddr(2)));
        let set = {
            let mut set = crate::ruleset::expr::SetExpr::anonymous();
            set.add_elem(Expr::value(Ipv4Addr::new(9, 9, 9, 9)));
            Expr::set(set)
        };
        let set_match = Stmt::matches(Expr::payload(ProtoDesc::Ip, "saddr"), set);
        assert!(eq(&saddr(1), &set_match));
    }

    #[test]
    fn test_match_selector_sensitive() {
        let daddr = Stmt::matches(
            Expr::payload(ProtoDesc::Ip, "daddr"),
            Expr::value(Ipv4Addr::new(1, 1, 1, 1)),
        );
        assert!(!eq(&saddr(1), &daddr));
        let ip6 = Stmt::matches(
            Expr::payload(ProtoDesc::Ip6, "saddr"),
            Expr::value(Ipv4Addr::new(1, 1, 1, 1)),
        );
        assert!(!eq(&saddr(1), &ip6));

        let ct = |dir| Stmt::matches(Expr::ct(CtKey::Saddr, dir, None), Expr::value(1u64));
        assert!(eq(&ct(Some(CtDir::Original)), &ct(Some(CtDir::Original))));
        assert!(!eq(&ct(Some(CtDir::Original)), &ct(Some(CtDir::Reply))));
        assert!(!eq(&ct(None), &ct(Some(CtDir::Reply))));

        let meta = |key| Stmt::matches(Expr::meta(key), Expr::value("eth0"));
        assert!(eq(&meta(MetaKey::Iifname), &meta(MetaKey::Iifname)));
        assert!(!eq(&meta(MetaKey::Iifname), &meta(MetaKey::Oifname)));

        let rt = |key| Stmt::matches(Expr::rt(key), Expr::value(1500u64));
        assert!(eq(&rt(RtKey::Mtu), &rt(RtKey::Mtu)));
        assert!(!eq(&rt(RtKey::Mtu), &rt(RtKey::Classid)));

        let socket = |level| Stmt::matches(Expr::socket(SocketKey::Cgroupv2, level), Expr::value(1u64));
        assert!(eq(&socket(1), &socket(1)));
        assert!(!eq(&socket(1), &socket(2)));

        let exthdr = |desc| Stmt::matches(Expr::exthdr(desc, "nexthdr"), Expr::value(6u64));
        assert!(eq(&exthdr(ExthdrDesc::Frag), &exthdr(ExthdrDesc::Frag)));
        assert!(!eq(&exthdr(ExthdrDesc::Frag), &exthdr(ExthdrDesc::Hbh)));
    }

    #[test]
    fn test_match_unmergeable() {
        let concat = Stmt::matches(
            Expr::concat(vec![Expr::meta(MetaKey::Iifname), Expr::payload(ProtoDesc::Ip, "saddr")]),
            Expr::value(1u64),
        );
        assert!(!eq(&concat, &concat.clone()));
        let neq = Stmt::Match(MatchStmt {
            op: RelOp::Neq,
            left: Expr::payload(ProtoDesc::Ip, "saddr"),
            right: Expr::value(Ipv4Addr::new(1, 1, 1, 1)),
        });
        assert!(!eq(&neq, &neq.clone()));
        assert!(!eq(&neq, &saddr(1)));
        let other = Stmt::Other("masquerade".into());
        assert!(!eq(&other, &other.clone()));
    }

    #[test]
    fn test_parameterless() {
        assert!(eq(&Stmt::counter(), &Stmt::counter()));
        let counted = Stmt::Counter(crate::ruleset::stmt::CounterStmt {
            packets: 10,
            bytes: 800,
        });
        assert!(eq(&Stmt::counter(), &counted));
        assert!(eq(&Stmt::Notrack, &Stmt::Notrack));
        assert!(!eq(&Stmt::Notrack, &Stmt::counter()));
    }

    #[test]
    fn test_verdict() {
        let accept = Stmt::verdict(VerdictExpr::new(Verdict::Accept));
        let drop = Stmt::verdict(VerdictExpr::new(Verdict::Drop));
        assert!(eq(&accept, &accept.clone()));
        assert!(!eq(&accept, &drop));

        let jump = |chain| Stmt::verdict(VerdictExpr::with_chain(Verdict::Jump, chain));
        assert!(eq(&jump("a"), &jump("a")));
        assert!(!eq(&jump("a"), &jump("b")));
        assert!(!eq(&jump("a"), &Stmt::verdict(VerdictExpr::new(Verdict::Jump))));

        // Non-literal targets are compared by kind only
        let sym = |name: &str| {
            Stmt::verdict(VerdictExpr {
                code: Verdict::Goto,
                chain: Some(Rc::new(Expr::Symbol(name.into()))),
            })
        };
        assert!(eq(&sym("x"), &sym("y")));
        assert!(!eq(
            &sym("x"),
            &Stmt::verdict(VerdictExpr::with_chain(Verdict::Goto, "x"))
        ));
    }

    #[test]
    fn test_limit() {
        let limit = |rate| {
            Stmt::Limit(LimitStmt {
                rate,
                unit: 1,
                burst: 5,
                kind: LimitType::Pkts,
                flags: 0,
            })
        };
        assert!(eq(&limit(10), &limit(10)));
        assert!(!eq(&limit(10), &limit(20)));
    }

    #[test]
    fn test_log() {
        let log = |prefix: &str| Stmt::Log(LogStmt::with_prefix(prefix));
        assert!(eq(&log("in: "), &log("in: ")));
        assert!(!eq(&log("in: "), &log("out: ")));
        assert!(eq(&Stmt::Log(LogStmt::default()), &Stmt::Log(LogStmt::default())));
        assert!(!eq(&log("in: "), &Stmt::Log(LogStmt::default())));

        let mut grouped = LogStmt::with_prefix("in: ");
        grouped.group = 2;
        assert!(!eq(&log("in: "), &Stmt::Log(grouped)));

        let symbolic = Stmt::Log(LogStmt {
            prefix: Some(Rc::new(Expr::Symbol("prefix".into()))),
            ..Default::default()
        });
        assert!(!eq(&symbolic, &symbolic.clone()));
    }

    #[test]
    fn test_reject() {
        let reject = Stmt::Reject(RejectStmt::default());
        assert!(eq(&reject, &reject.clone()));
        let rst = Stmt::Reject(RejectStmt {
            kind: RejectType::TcpRst,
            ..Default::default()
        });
        assert!(!eq(&reject, &rst));
        let with_expr = Stmt::Reject(RejectStmt {
            expr: Some(Expr::value(3u64)),
            ..Default::default()
        });
        assert!(!eq(&with_expr, &with_expr.clone()));
    }

    #[test]
    fn test_equivalence() {
        let stmts = vec![
            saddr(1),
            saddr(2),
            saddr(3),
            Stmt::counter(),
            Stmt::verdict(VerdictExpr::new(Verdict::Accept)),
            Stmt::Log(LogStmt::with_prefix("x")),
        ];
        for a in &stmts {
            assert!(eq(a, a));
            for b in &stmts {
                assert_eq!(eq(a, b), eq(b, a));
                for c in &stmts {
                    if eq(a, b) && eq(b, c) {
                        assert!(eq(a, c));
                    }
                }
            }
        }
    }
}
