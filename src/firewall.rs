//! Inbound packet firewall, consulted before any forwarding decision.
//!
//! Rules are keyed on where a packet enters and what protocol it speaks,
//! not on addresses: switch, ethertype, IP protocol, ingress port, and
//! transport source port. Anything IPv4 without a matching rule is denied.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::openflow0x01::{dpid_str, DatapathId, Pattern};
use crate::packet::{EthFrame, ETH_TYPE_IP, IP_PROTO_ICMP};

/// Transport-port half of a rule key: one exact source port, or any.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TpPort {
    Any,
    Port(u16),
}

impl fmt::Display for TpPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TpPort::Any => write!(f, "any"),
            TpPort::Port(p) => write!(f, "{}", p),
        }
    }
}

/// Identifies one firewall rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleKey {
    pub dpid: DatapathId,
    pub dl_typ: u16,
    pub nw_proto: u8,
    pub in_port: u16,
    pub tp_src: TpPort,
}

impl RuleKey {
    /// A rule key with the conventional defaults: ICMP over IPv4, entering
    /// port 0, any source port.
    pub fn new(dpid: DatapathId) -> RuleKey {
        RuleKey {
            dpid,
            dl_typ: ETH_TYPE_IP,
            nw_proto: IP_PROTO_ICMP,
            in_port: 0,
            tp_src: TpPort::Any,
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,
               "(switch {}, dl_typ {:#06x}, nw_proto {}, in_port {}, tp_src {})",
               dpid_str(self.dpid),
               self.dl_typ,
               self.nw_proto,
               self.in_port,
               self.tp_src)
    }
}

/// Whether a packet may proceed to the forwarding pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

/// The rule set. Values are verdicts: `true` allows matching packets,
/// `false` denies them ahead of any wildcard rule they also match.
#[derive(Debug, Default)]
pub struct Firewall {
    rules: HashMap<RuleKey, bool>,
}

impl Firewall {
    pub fn new() -> Firewall {
        Firewall::default()
    }

    /// Insert a rule. Replaces the verdict of an existing identical key.
    pub fn add_rule(&mut self, key: RuleKey, allow: bool) {
        debug!("adding firewall rule {} -> {}",
               key,
               if allow { "allow" } else { "deny" });
        self.rules.insert(key, allow);
    }

    /// Remove the rule with exactly this key.
    pub fn remove_rule(&mut self, key: &RuleKey) -> Result<()> {
        match self.rules.remove(key) {
            Some(_) => {
                debug!("removed firewall rule {}", key);
                Ok(())
            }
            None => {
                error!("rule not found in firewall: {}", key);
                Err(Error::RuleNotFound(key.to_string()))
            }
        }
    }

    /// Find the rule covering a packet: an exact transport-port rule wins
    /// over an `any`-port rule with the same remaining key. Returns the
    /// matching rule and its verdict, or `None` when no rule covers the
    /// packet.
    pub fn lookup(&self,
                  dpid: DatapathId,
                  dl_typ: u16,
                  nw_proto: u8,
                  tp_src: u16,
                  in_port: u16)
                  -> Option<(RuleKey, bool)> {
        let exact = RuleKey {
            dpid,
            dl_typ,
            nw_proto,
            in_port,
            tp_src: TpPort::Port(tp_src),
        };
        let wild = RuleKey {
            tp_src: TpPort::Any,
            ..exact
        };
        self.rules
            .get(&exact)
            .map(|allow| (exact, *allow))
            .or_else(|| self.rules.get(&wild).map(|allow| (wild, *allow)))
    }

    /// Decide whether `frame`, entering `dpid` on `in_port`, may reach the
    /// forwarding pipeline. Non-IPv4 traffic is not filtered. IPv4 traffic
    /// without transport ports is looked up as port 0.
    pub fn check(&self, dpid: DatapathId, frame: &EthFrame, in_port: u16) -> Verdict {
        if frame.dl_typ != ETH_TYPE_IP {
            trace!("frame type {:#06x} from {} is not filtered",
                   frame.dl_typ,
                   frame.dl_src);
            return Verdict::Allow;
        }
        let ip = match frame.ip {
            Some(ip) => ip,
            None => {
                warn!("malformed IPv4 packet from {} on {} port {}; dropping",
                      frame.dl_src,
                      dpid_str(dpid),
                      in_port);
                return Verdict::Deny;
            }
        };
        let tp_src = ip.tp_src.unwrap_or(0);
        match self.lookup(dpid, frame.dl_typ, ip.proto, tp_src, in_port) {
            Some((key, true)) => {
                debug!("rule {} found in firewall; allowing packet", key);
                Verdict::Allow
            }
            Some((key, false)) => {
                debug!("rule {} found in firewall; denying packet", key);
                Verdict::Deny
            }
            None => {
                warn!("no firewall rule for switch {} dl_typ {:#06x} nw_proto {} \
                       in_port {} tp_src {}; denying by default",
                      dpid_str(dpid),
                      frame.dl_typ,
                      ip.proto,
                      in_port,
                      tp_src);
                Verdict::Deny
            }
        }
    }

    /// Narrow an install pattern so the resulting flow only covers traffic
    /// shaped like the vetted packet: its ethertype always, including for
    /// frames the filter passes unfiltered, and for IPv4 its protocol and,
    /// except for ICMP, its transport source port.
    pub fn constrain(pattern: &mut Pattern, frame: &EthFrame) {
        pattern.dl_typ = Some(frame.dl_typ);
        let ip = match frame.ip {
            Some(ip) => ip,
            None => return,
        };
        pattern.nw_proto = Some(ip.proto);
        if ip.proto != IP_PROTO_ICMP {
            pattern.tp_src = ip.tp_src;
        }
    }

    /// All rules, ordered by key for stable listing.
    pub fn rules(&self) -> Vec<(RuleKey, bool)> {
        let mut rules: Vec<_> = self.rules.iter().map(|(k, v)| (*k, *v)).collect();
        rules.sort();
        rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
