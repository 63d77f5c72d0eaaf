//! Expressions: the values and packet fields that statements operate on.
//!
//! Expression nodes are shared. Any number of statements, sets or
//! concatenations may hold the same node through an [`ExprRef`]; cloning the
//! handle acquires a reference and dropping it releases one. The node (and,
//! transitively, its children) is freed when the last handle goes away.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::rc::Rc;

use bitmask_enum::bitmask;
use strum_macros::{AsRefStr, Display, EnumDiscriminants, EnumString};

use super::Family;

/// Shared handle to an expression node.
pub type ExprRef = Rc<Expr>;

/// A literal. Two values are equal only if they are bit-for-bit identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Int(u64),
    String(String),
    Bytes(Vec<u8>),
}

impl From<Ipv4Addr> for Value {
    fn from(addr: Ipv4Addr) -> Self {
        Value::Ipv4(addr)
    }
}

impl From<Ipv6Addr> for Value {
    fn from(addr: Ipv6Addr) -> Self {
        Value::Ipv6(addr)
    }
}

impl From<u64> for Value {
    fn from(val: u64) -> Self {
        Value::Int(val)
    }
}

impl From<&str> for Value {
    fn from(val: &str) -> Self {
        Value::String(val.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Ipv4(addr) => write!(f, "{}", addr),
            Value::Ipv6(addr) => write!(f, "{}", addr),
            Value::Int(val) => write!(f, "{}", val),
            Value::String(val) => write!(f, "\"{}\"", val),
            Value::Bytes(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Protocol header a payload expression is loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ProtoDesc {
    Ether,
    Vlan,
    Arp,
    Ip,
    Ip6,
    Icmp,
    Icmpv6,
    Tcp,
    Udp,
    Sctp,
    Dccp,
}

/// Protocol layer a key is evaluated relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtoBase {
    #[default]
    Invalid,
    LinkLayer,
    NetworkLayer,
    TransportLayer,
}

/// Field of a protocol header, e.g. `tcp dport`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadExpr {
    pub desc: ProtoDesc,
    // Header field template
    pub field: String,
}

/// IPv6 extension header descriptor (or TCP option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ExthdrDesc {
    Hbh,
    Rt,
    Frag,
    Dst,
    Mh,
    Srh,
    #[strum(serialize = "tcp option")]
    TcpOpt,
}

/// Field of an extension header, e.g. `frag more-fragments`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExthdrExpr {
    pub desc: ExthdrDesc,
    pub field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetaKey {
    Len,
    Protocol,
    Nfproto,
    L4proto,
    Mark,
    Iif,
    Iifname,
    Iiftype,
    Oif,
    Oifname,
    Oiftype,
    Skuid,
    Skgid,
    Priority,
    Pkttype,
    Cpu,
    Cgroup,
}

impl MetaKey {
    // Keys printed without the `meta` keyword
    fn is_unqualified(&self) -> bool {
        matches!(
            self,
            MetaKey::Iif | MetaKey::Oif | MetaKey::Iifname | MetaKey::Oifname
        )
    }
}

/// Packet metadata, e.g. `iifname` or `meta mark`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaExpr {
    pub key: MetaKey,
    pub base: ProtoBase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum CtKey {
    State,
    Direction,
    Status,
    Mark,
    Expiration,
    Helper,
    L3proto,
    Saddr,
    Daddr,
    Protocol,
    ProtoSrc,
    ProtoDst,
    Label,
    Zone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CtDir {
    Original,
    Reply,
}

/// Connection tracking key, e.g. `ct state` or `ct original ip saddr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CtExpr {
    pub key: CtKey,
    pub base: ProtoBase,
    pub direction: Option<CtDir>,
    pub nfproto: Option<Family>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RtKey {
    Classid,
    Nexthop,
    Mtu,
    Ipsec,
}

/// Routing information, e.g. `rt mtu`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RtExpr {
    pub key: RtKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SocketKey {
    Transparent,
    Mark,
    Wildcard,
    Cgroupv2,
}

/// Socket lookup, e.g. `socket transparent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketExpr {
    pub key: SocketKey,
    // Cgroup ancestor level; zero for other keys
    pub level: u32,
}

#[bitmask(u32)]
#[bitmask_config(vec_debug)]
pub enum SetFlags {
    Anonymous,
    Constant,
    Interval,
    Map,
    Timeout,
    Concat,
}

/// Set literal: an ordered collection of set elements.
#[derive(Debug, Clone, PartialEq)]
pub struct SetExpr {
    pub flags: SetFlags,
    pub elems: Vec<ExprRef>,
}

impl SetExpr {
    /// Creates an empty unnamed, inline set.
    pub fn anonymous() -> Self {
        SetExpr {
            flags: SetFlags::Anonymous | SetFlags::Constant,
            elems: vec![],
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.flags.contains(SetFlags::Anonymous)
    }

    /// Appends `key` wrapped in a new set element.
    pub fn add_elem(&mut self, key: ExprRef) {
        self.elems.push(Rc::new(Expr::SetElem(key)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Verdict {
    Accept,
    Drop,
    Continue,
    Return,
    Jump,
    Goto,
    Queue,
}

/// Verdict, optionally targeting a chain (`jump`/`goto`).
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictExpr {
    pub code: Verdict,
    pub chain: Option<ExprRef>,
}

impl VerdictExpr {
    pub fn new(code: Verdict) -> Self {
        VerdictExpr { code, chain: None }
    }

    pub fn with_chain(code: Verdict, chain: &str) -> Self {
        VerdictExpr {
            code,
            chain: Some(Expr::value(Value::String(chain.to_string()))),
        }
    }
}

impl fmt::Display for VerdictExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        match self.chain.as_deref() {
            // Chain names print as bare identifiers
            Some(Expr::Value(Value::String(name))) => write!(f, " {}", name),
            Some(chain) => write!(f, " {}", chain),
            None => Ok(()),
        }
    }
}

/// Expression node.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(ExprKind), derive(Hash))]
pub enum Expr {
    Value(Value),
    // Unresolved variable, e.g. `$trusted`
    Symbol(String),
    Payload(PayloadExpr),
    Exthdr(ExthdrExpr),
    Meta(MetaExpr),
    Ct(CtExpr),
    Rt(RtExpr),
    Socket(SocketExpr),
    Set(SetExpr),
    SetElem(ExprRef),
    Concat(Vec<ExprRef>),
    Range(ExprRef, ExprRef),
    Prefix(ExprRef, u8),
    Verdict(VerdictExpr),
}

impl Expr {
    pub fn kind(&self) -> ExprKind {
        ExprKind::from(self)
    }

    pub fn value(value: impl Into<Value>) -> ExprRef {
        Rc::new(Expr::Value(value.into()))
    }

    pub fn payload(desc: ProtoDesc, field: &str) -> ExprRef {
        Rc::new(Expr::Payload(PayloadExpr {
            desc,
            field: field.to_string(),
        }))
    }

    pub fn exthdr(desc: ExthdrDesc, field: &str) -> ExprRef {
        Rc::new(Expr::Exthdr(ExthdrExpr {
            desc,
            field: field.to_string(),
        }))
    }

    pub fn meta(key: MetaKey) -> ExprRef {
        Rc::new(Expr::Meta(MetaExpr {
            key,
            base: ProtoBase::Invalid,
        }))
    }

    pub fn ct(key: CtKey, direction: Option<CtDir>, nfproto: Option<Family>) -> ExprRef {
        Rc::new(Expr::Ct(CtExpr {
            key,
            base: ProtoBase::Invalid,
            direction,
            nfproto,
        }))
    }

    pub fn rt(key: RtKey) -> ExprRef {
        Rc::new(Expr::Rt(RtExpr { key }))
    }

    pub fn socket(key: SocketKey, level: u32) -> ExprRef {
        Rc::new(Expr::Socket(SocketExpr { key, level }))
    }

    pub fn set(set: SetExpr) -> ExprRef {
        Rc::new(Expr::Set(set))
    }

    pub fn concat(exprs: Vec<ExprRef>) -> ExprRef {
        Rc::new(Expr::Concat(exprs))
    }

    /// Returns the set literal if this is an anonymous set.
    pub fn as_anonymous_set(&self) -> Option<&SetExpr> {
        match self {
            Expr::Set(set) if set.is_anonymous() => Some(set),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Value(value) => write!(f, "{}", value),
            Expr::Symbol(name) => write!(f, "${}", name),
            Expr::Payload(payload) => write!(f, "{} {}", payload.desc, payload.field),
            Expr::Exthdr(exthdr) => write!(f, "{} {}", exthdr.desc, exthdr.field),
            Expr::Meta(meta) => {
                if meta.key.is_unqualified() {
                    write!(f, "{}", meta.key)
                } else {
                    write!(f, "meta {}", meta.key)
                }
            }
            Expr::Ct(ct) => {
                write!(f, "ct")?;
                if let Some(dir) = ct.direction {
                    write!(f, " {}", dir)?;
                }
                if let Some(nfproto) = ct.nfproto {
                    write!(f, " {}", nfproto)?;
                }
                write!(f, " {}", ct.key)
            }
            Expr::Rt(rt) => write!(f, "rt {}", rt.key),
            Expr::Socket(socket) => match socket.key {
                SocketKey::Cgroupv2 => write!(f, "socket cgroupv2 level {}", socket.level),
                key => write!(f, "socket {}", key),
            },
            Expr::Set(set) => {
                write!(f, "{{ ")?;
                for (i, elem) in set.elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", elem)?;
                }
                write!(f, " }}")
            }
            Expr::SetElem(key) => write!(f, "{}", key),
            Expr::Concat(exprs) => {
                for (i, expr) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " . ")?;
                    }
                    write!(f, "{}", expr)?;
                }
                Ok(())
            }
            Expr::Range(low, high) => write!(f, "{}-{}", low, high),
            Expr::Prefix(expr, len) => write!(f, "{}/{}", expr, len),
            Expr::Verdict(verdict) => write!(f, "{}", verdict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_selectors() {
        assert_eq!(Expr::payload(ProtoDesc::Ip, "saddr").to_string(), "ip saddr");
        assert_eq!(Expr::meta(MetaKey::Iifname).to_string(), "iifname");
        assert_eq!(Expr::meta(MetaKey::Mark).to_string(), "meta mark");
        assert_eq!(
            Expr::ct(CtKey::Saddr, Some(CtDir::Original), Some(Family::Ip)).to_string(),
            "ct original ip saddr"
        );
        assert_eq!(Expr::ct(CtKey::State, None, None).to_string(), "ct state");
        assert_eq!(
            Expr::socket(SocketKey::Cgroupv2, 2).to_string(),
            "socket cgroupv2 level 2"
        );
        assert_eq!(
            Expr::exthdr(ExthdrDesc::TcpOpt, "maxseg size").to_string(),
            "tcp option maxseg size"
        );
    }

    #[test]
    fn test_print_set_and_concat() {
        let mut set = SetExpr::anonymous();
        set.add_elem(Expr::concat(vec![
            Expr::value("eth0"),
            Expr::value(Ipv4Addr::new(1, 1, 1, 1)),
            Expr::value(22u64),
        ]));
        set.add_elem(Expr::value(Value::Bytes(vec![0xde, 0xad])));
        assert_eq!(
            Expr::set(set).to_string(),
            "{ \"eth0\" . 1.1.1.1 . 22, 0xdead }"
        );
    }

    #[test]
    fn test_verdict_chain() {
        assert_eq!(VerdictExpr::new(Verdict::Accept).to_string(), "accept");
        assert_eq!(
            VerdictExpr::with_chain(Verdict::Jump, "inbound").to_string(),
            "jump inbound"
        );
    }

    #[test]
    fn test_shared_release() {
        let addr = Expr::value(Ipv4Addr::new(10, 0, 0, 1));
        let mut set = SetExpr::anonymous();
        set.add_elem(Rc::clone(&addr));
        assert_eq!(Rc::strong_count(&addr), 2);
        drop(set);
        // Releasing the set releases its elements
        assert_eq!(Rc::strong_count(&addr), 1);
    }

    #[test]
    fn test_kind() {
        assert_eq!(Expr::payload(ProtoDesc::Tcp, "dport").kind(), ExprKind::Payload);
        assert!(Expr::set(SetExpr::anonymous()).as_anonymous_set().is_some());
    }
}
