//! The six forwarding strategies, from repeating hub to pair-learning
//! switch. A strategy turns one arriving packet into a pure `Decision`;
//! it never talks to a switch itself.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::Error;
use crate::openflow0x01::{dpid_str, DatapathId};
use crate::packet::{EthFrame, MacAddr};
use crate::table::ForwardingTable;

/// Seconds of inactivity before an installed flow expires.
pub const FLOW_IDLE_TIMEOUT: u16 = 10;
/// Seconds after which an installed flow expires unconditionally.
pub const FLOW_HARD_TIMEOUT: u16 = 30;

/// Where packets go: one physical port, or out every port except the ingress.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outport {
    Port(u16),
    Flood,
}

/// One flow rule a strategy wants installed. Address fields left `None`
/// are wildcards. When `resend` is set, the packet that triggered the rule
/// is also to be forwarded through it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowSpec {
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub out: Outport,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub resend: bool,
}

/// What to do with one arriving packet: zero or more rules to install, and
/// optionally a direct packet-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decision {
    pub flows: Vec<FlowSpec>,
    pub packet_out: Option<Outport>,
}

fn flow(dl_src: Option<MacAddr>, dl_dst: Option<MacAddr>, out: Outport, resend: bool) -> FlowSpec {
    FlowSpec {
        dl_src,
        dl_dst,
        out,
        idle_timeout: FLOW_IDLE_TIMEOUT,
        hard_timeout: FLOW_HARD_TIMEOUT,
        resend,
    }
}

/// The available forwarding strategies, in order of increasing cleverness.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Resend every packet out every other port. Installs nothing, learns nothing.
    DumbHub,
    /// Install a flood rule per (src, dst) address pair as traffic appears.
    PairHub,
    /// Install one wildcard flood rule on first contact.
    LazyHub,
    /// Learns; installs a rule toward each sender before looking up the receiver.
    BadSwitch,
    /// Learns; installs one exact-pair rule once the receiver is known.
    PairSwitch,
    /// Learns; installs both directions of a pair in one step.
    IdealPairSwitch,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [Strategy::DumbHub,
                                    Strategy::PairHub,
                                    Strategy::LazyHub,
                                    Strategy::BadSwitch,
                                    Strategy::PairSwitch,
                                    Strategy::IdealPairSwitch];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::DumbHub => "dumb-hub",
            Strategy::PairHub => "pair-hub",
            Strategy::LazyHub => "lazy-hub",
            Strategy::BadSwitch => "bad-switch",
            Strategy::PairSwitch => "pair-switch",
            Strategy::IdealPairSwitch => "ideal-pair-switch",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Strategy::DumbHub => "flood every packet, install nothing",
            Strategy::PairHub => "install a flood rule per address pair",
            Strategy::LazyHub => "install one wildcard flood rule",
            Strategy::BadSwitch => "learn, but install toward senders only",
            Strategy::PairSwitch => "learn and install exact pair rules",
            Strategy::IdealPairSwitch => "learn and install pair rules both ways",
        }
    }

    /// Decide what to do with one packet that entered `switch` on `in_port`.
    /// Learning strategies record the packet's source in `table` first, so a
    /// host is learned even when its packet ends up flooded.
    pub fn decide(&self,
                  table: &mut ForwardingTable,
                  switch: DatapathId,
                  in_port: u16,
                  frame: &EthFrame)
                  -> Decision {
        match self {
            Strategy::DumbHub => Strategy::dumb_hub(switch, in_port, frame),
            Strategy::PairHub => Strategy::pair_hub(switch, in_port, frame),
            Strategy::LazyHub => Strategy::lazy_hub(switch),
            Strategy::BadSwitch => Strategy::bad_switch(table, switch, in_port, frame),
            Strategy::PairSwitch => Strategy::pair_switch(table, switch, in_port, frame),
            Strategy::IdealPairSwitch => {
                Strategy::ideal_pair_switch(table, switch, in_port, frame)
            }
        }
    }

    fn dumb_hub(switch: DatapathId, in_port: u16, frame: &EthFrame) -> Decision {
        debug!("{}: broadcasting {}.{} -> {}",
               dpid_str(switch),
               frame.dl_src,
               in_port,
               frame.dl_dst);
        Decision {
            flows: vec![],
            packet_out: Some(Outport::Flood),
        }
    }

    fn pair_hub(switch: DatapathId, in_port: u16, frame: &EthFrame) -> Decision {
        debug!("{}: installing {}.{} -> {}.ALL",
               dpid_str(switch),
               frame.dl_src,
               in_port,
               frame.dl_dst);
        Decision {
            flows: vec![flow(Some(frame.dl_src), Some(frame.dl_dst), Outport::Flood, true)],
            packet_out: None,
        }
    }

    fn lazy_hub(switch: DatapathId) -> Decision {
        debug!("{}: installing wildcard flood rule", dpid_str(switch));
        Decision {
            flows: vec![flow(None, None, Outport::Flood, true)],
            packet_out: None,
        }
    }

    fn bad_switch(table: &mut ForwardingTable,
                  switch: DatapathId,
                  in_port: u16,
                  frame: &EthFrame)
                  -> Decision {
        table.learn(switch, frame.dl_src, in_port);
        // The misbehavior: a rule toward the sender goes in on every packet,
        // whether or not the receiver is known.
        let toward_sender = flow(None, Some(frame.dl_src), Outport::Port(in_port), false);
        let packet_out = match table.lookup(switch, frame.dl_dst) {
            Some(p) => {
                debug!("{}: sending {}.{} -> {}.{}",
                       dpid_str(switch),
                       frame.dl_src,
                       in_port,
                       frame.dl_dst,
                       p);
                Outport::Port(p)
            }
            None => {
                debug!("{}: broadcasting {}.{} -> {}",
                       dpid_str(switch),
                       frame.dl_src,
                       in_port,
                       frame.dl_dst);
                Outport::Flood
            }
        };
        Decision {
            flows: vec![toward_sender],
            packet_out: Some(packet_out),
        }
    }

    fn pair_switch(table: &mut ForwardingTable,
                   switch: DatapathId,
                   in_port: u16,
                   frame: &EthFrame)
                   -> Decision {
        table.learn(switch, frame.dl_src, in_port);
        match table.lookup(switch, frame.dl_dst) {
            None => {
                debug!("{}: broadcasting {}.{} -> {}",
                       dpid_str(switch),
                       frame.dl_src,
                       in_port,
                       frame.dl_dst);
                Decision {
                    flows: vec![],
                    packet_out: Some(Outport::Flood),
                }
            }
            Some(p) => {
                debug!("{}: installing {}.{} -> {}.{}",
                       dpid_str(switch),
                       frame.dl_src,
                       in_port,
                       frame.dl_dst,
                       p);
                Decision {
                    flows: vec![flow(Some(frame.dl_src),
                                     Some(frame.dl_dst),
                                     Outport::Port(p),
                                     true)],
                    packet_out: None,
                }
            }
        }
    }

    fn ideal_pair_switch(table: &mut ForwardingTable,
                         switch: DatapathId,
                         in_port: u16,
                         frame: &EthFrame)
                         -> Decision {
        table.learn(switch, frame.dl_src, in_port);
        match table.lookup(switch, frame.dl_dst) {
            None => {
                debug!("{}: broadcasting {}.{} -> {}",
                       dpid_str(switch),
                       frame.dl_src,
                       in_port,
                       frame.dl_dst);
                Decision {
                    flows: vec![],
                    packet_out: Some(Outport::Flood),
                }
            }
            Some(p) => {
                debug!("{}: installing reverse {}.{} -> {}.{}",
                       dpid_str(switch),
                       frame.dl_dst,
                       p,
                       frame.dl_src,
                       in_port);
                debug!("{}: installing {}.{} -> {}.{}",
                       dpid_str(switch),
                       frame.dl_src,
                       in_port,
                       frame.dl_dst,
                       p);
                Decision {
                    flows: vec![flow(Some(frame.dl_dst),
                                     Some(frame.dl_src),
                                     Outport::Port(in_port),
                                     false),
                                flow(Some(frame.dl_src),
                                     Some(frame.dl_dst),
                                     Outport::Port(p),
                                     true)],
                    packet_out: None,
                }
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Strategy, Error> {
        Strategy::ALL
            .iter()
            .find(|strategy| strategy.name() == s)
            .copied()
            .ok_or_else(|| Error::UnknownStrategy(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Ipv4Meta, ETH_TYPE_IP, IP_PROTO_ICMP};

    const HOST_A: MacAddr = MacAddr([0xaa, 0, 0, 0, 0, 1]);
    const HOST_B: MacAddr = MacAddr([0xbb, 0, 0, 0, 0, 2]);
    const SW: DatapathId = 0x2a;

    fn frame(src: MacAddr, dst: MacAddr) -> EthFrame {
        EthFrame {
            dl_src: src,
            dl_dst: dst,
            dl_vlan: None,
            dl_typ: ETH_TYPE_IP,
            ip: Some(Ipv4Meta {
                proto: IP_PROTO_ICMP,
                tp_src: None,
                tp_dst: None,
            }),
        }
    }

    #[test]
    fn dumb_hub_floods_and_learns_nothing() {
        let mut table = ForwardingTable::new();
        let d = Strategy::DumbHub.decide(&mut table, SW, 1, &frame(HOST_A, HOST_B));
        assert!(d.flows.is_empty());
        assert_eq!(d.packet_out, Some(Outport::Flood));
        assert!(table.is_empty());
    }

    #[test]
    fn pair_hub_installs_flood_rule_per_pair() {
        let mut table = ForwardingTable::new();
        let d = Strategy::PairHub.decide(&mut table, SW, 1, &frame(HOST_A, HOST_B));
        assert_eq!(d.packet_out, None);
        assert_eq!(d.flows,
                   vec![FlowSpec {
                            dl_src: Some(HOST_A),
                            dl_dst: Some(HOST_B),
                            out: Outport::Flood,
                            idle_timeout: FLOW_IDLE_TIMEOUT,
                            hard_timeout: FLOW_HARD_TIMEOUT,
                            resend: true,
                        }]);
        assert!(table.is_empty());
    }

    #[test]
    fn lazy_hub_installs_one_wildcard_rule() {
        let mut table = ForwardingTable::new();
        let d = Strategy::LazyHub.decide(&mut table, SW, 1, &frame(HOST_A, HOST_B));
        assert_eq!(d.flows.len(), 1);
        assert_eq!(d.flows[0].dl_src, None);
        assert_eq!(d.flows[0].dl_dst, None);
        assert_eq!(d.flows[0].out, Outport::Flood);
        assert!(d.flows[0].resend);
        assert_eq!(d.packet_out, None);
    }

    #[test]
    fn bad_switch_installs_toward_sender_before_lookup() {
        let mut table = ForwardingTable::new();
        let d = Strategy::BadSwitch.decide(&mut table, SW, 1, &frame(HOST_A, HOST_B));
        // Receiver unknown: flood the packet, but the sender rule goes in anyway.
        assert_eq!(d.packet_out, Some(Outport::Flood));
        assert_eq!(d.flows,
                   vec![FlowSpec {
                            dl_src: None,
                            dl_dst: Some(HOST_A),
                            out: Outport::Port(1),
                            idle_timeout: FLOW_IDLE_TIMEOUT,
                            hard_timeout: FLOW_HARD_TIMEOUT,
                            resend: false,
                        }]);
        assert_eq!(table.lookup(SW, HOST_A), Some(1));

        let d = Strategy::BadSwitch.decide(&mut table, SW, 2, &frame(HOST_B, HOST_A));
        assert_eq!(d.packet_out, Some(Outport::Port(1)));
        assert_eq!(d.flows[0].dl_dst, Some(HOST_B));
        assert_eq!(d.flows[0].out, Outport::Port(2));
    }

    #[test]
    fn pair_switch_floods_until_receiver_is_known() {
        let mut table = ForwardingTable::new();
        let d = Strategy::PairSwitch.decide(&mut table, SW, 1, &frame(HOST_A, HOST_B));
        assert!(d.flows.is_empty());
        assert_eq!(d.packet_out, Some(Outport::Flood));
        assert_eq!(table.lookup(SW, HOST_A), Some(1));

        let d = Strategy::PairSwitch.decide(&mut table, SW, 2, &frame(HOST_B, HOST_A));
        assert_eq!(d.packet_out, None);
        assert_eq!(d.flows,
                   vec![FlowSpec {
                            dl_src: Some(HOST_B),
                            dl_dst: Some(HOST_A),
                            out: Outport::Port(1),
                            idle_timeout: FLOW_IDLE_TIMEOUT,
                            hard_timeout: FLOW_HARD_TIMEOUT,
                            resend: true,
                        }]);
    }

    #[test]
    fn ideal_pair_switch_installs_both_directions() {
        let mut table = ForwardingTable::new();
        let d = Strategy::IdealPairSwitch.decide(&mut table, SW, 1, &frame(HOST_A, HOST_B));
        assert_eq!(d.packet_out, Some(Outport::Flood));

        let d = Strategy::IdealPairSwitch.decide(&mut table, SW, 2, &frame(HOST_B, HOST_A));
        assert_eq!(d.packet_out, None);
        assert_eq!(d.flows.len(), 2);
        // Reverse direction first, without resending the packet through it.
        assert_eq!(d.flows[0],
                   FlowSpec {
                       dl_src: Some(HOST_A),
                       dl_dst: Some(HOST_B),
                       out: Outport::Port(2),
                       idle_timeout: FLOW_IDLE_TIMEOUT,
                       hard_timeout: FLOW_HARD_TIMEOUT,
                       resend: false,
                   });
        assert_eq!(d.flows[1],
                   FlowSpec {
                       dl_src: Some(HOST_B),
                       dl_dst: Some(HOST_A),
                       out: Outport::Port(1),
                       idle_timeout: FLOW_IDLE_TIMEOUT,
                       hard_timeout: FLOW_HARD_TIMEOUT,
                       resend: true,
                   });
    }

    #[test]
    fn strategies_parse_by_name() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.name().parse::<Strategy>().unwrap(), strategy);
        }
        assert!(matches!("perfect-switch".parse::<Strategy>(),
                         Err(Error::UnknownStrategy(_))));
    }
}
