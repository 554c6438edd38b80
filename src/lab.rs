//! The laboratory controller. Every packet a switch punts to us runs the
//! same pipeline: firewall check, then the attached strategy decides, then
//! the decision is applied as flow mods and packet outs.

use std::sync::Mutex;

use tracing::{debug, error, trace, warn};

use crate::error::Result;
use crate::firewall::{Firewall, RuleKey, Verdict};
use crate::ofp_controller::{MessageSink, OF0x01Controller};
use crate::openflow0x01::message::{add_flow, parse_payload};
use crate::openflow0x01::{dpid_str, Action, DatapathId, PacketIn, PacketOut, Pattern, PortStatus,
                          PseudoPort, SwitchFeatures, Timeout};
use crate::packet::EthFrame;
use crate::selector::Selector;
use crate::strategy::{Decision, Outport, Strategy};
use crate::table::ForwardingTable;

/// Priority of every rule the strategies install.
const FLOW_PRIORITY: u16 = 10;

/// Shared controller state: the learned station table, the firewall, and
/// whichever strategy is attached. One instance serves all switches.
pub struct SwitchLab {
    table: Mutex<ForwardingTable>,
    firewall: Mutex<Firewall>,
    selector: Mutex<Selector>,
    firewall_enabled: bool,
}

impl SwitchLab {
    pub fn new(initial: Option<Strategy>, firewall_enabled: bool) -> SwitchLab {
        SwitchLab {
            table: Mutex::new(ForwardingTable::new()),
            firewall: Mutex::new(Firewall::new()),
            selector: Mutex::new(Selector::new(initial)),
            firewall_enabled,
        }
    }

    pub fn strategies(&self) -> &'static [Strategy] {
        &Strategy::ALL
    }

    pub fn active_strategy(&self) -> Option<Strategy> {
        self.selector.lock().unwrap().active()
    }

    /// Attach `strategy`, returning the one it replaced.
    pub fn attach(&self, strategy: Strategy) -> Option<Strategy> {
        self.selector.lock().unwrap().attach(strategy)
    }

    /// Detach the active strategy. Until the next attach, punted packets
    /// are dropped.
    pub fn detach(&self) -> Option<Strategy> {
        self.selector.lock().unwrap().detach()
    }

    pub fn add_firewall_rule(&self, key: RuleKey, allow: bool) {
        self.firewall.lock().unwrap().add_rule(key, allow);
    }

    pub fn remove_firewall_rule(&self, key: &RuleKey) -> Result<()> {
        self.firewall.lock().unwrap().remove_rule(key)
    }

    pub fn firewall_rules(&self) -> Vec<(RuleKey, bool)> {
        self.firewall.lock().unwrap().rules()
    }

    pub fn firewall_enabled(&self) -> bool {
        self.firewall_enabled
    }

    /// Number of learned host entries across all switches.
    pub fn learned(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    fn apply(&self,
             sw: DatapathId,
             xid: u32,
             pkt: &PacketIn,
             frame: &EthFrame,
             decision: Decision,
             sink: &mut dyn MessageSink) {
        for spec in decision.flows {
            let mut pattern = Pattern::match_all();
            pattern.dl_src = spec.dl_src;
            pattern.dl_dst = spec.dl_dst;
            if self.firewall_enabled {
                Firewall::constrain(&mut pattern, frame);
            }
            let mut flow = add_flow(FLOW_PRIORITY,
                                    pattern,
                                    vec![Action::Output(pseudo_port(spec.out))]);
            flow.idle_timeout = Timeout::ExpiresAfter(spec.idle_timeout);
            flow.hard_timeout = Timeout::ExpiresAfter(spec.hard_timeout);
            // A buffered trigger packet rides through the new rule via its
            // buffer id; an unbuffered one needs an explicit packet out.
            let buffered = pkt.buffer_id().is_some();
            if spec.resend && buffered {
                flow.apply_to_packet = pkt.buffer_id();
            }
            // A failed send is terminal for that message only; the rest of
            // the decision still goes out.
            if let Err(err) = Self::send_flow_mod(sw, xid, flow, sink) {
                error!("{}: failed to install flow: {}", dpid_str(sw), err);
            }
            if spec.resend && !buffered {
                self.resend(sw, xid, pkt, spec.out, sink);
            }
        }
        if let Some(out) = decision.packet_out {
            self.resend(sw, xid, pkt, out, sink);
        }
    }

    fn resend(&self,
              sw: DatapathId,
              xid: u32,
              pkt: &PacketIn,
              out: Outport,
              sink: &mut dyn MessageSink) {
        let pkt_out = PacketOut {
            output_payload: pkt.clone_payload(),
            port_id: Some(pkt.port),
            apply_actions: vec![Action::Output(pseudo_port(out))],
        };
        if let Err(err) = Self::send_packet_out(sw, xid, pkt_out, sink) {
            error!("{}: failed to resend packet: {}", dpid_str(sw), err);
        }
    }
}

fn pseudo_port(out: Outport) -> PseudoPort {
    match out {
        Outport::Port(p) => PseudoPort::PhysicalPort(p),
        Outport::Flood => PseudoPort::AllPorts,
    }
}

impl OF0x01Controller for SwitchLab {
    fn switch_connected(&self, sw: DatapathId, feats: SwitchFeatures, _: &mut dyn MessageSink) {
        for port in &feats.ports {
            debug!("{}: port {} is {}", dpid_str(sw), port.port_no, port.name);
        }
    }

    fn switch_disconnected(&self, sw: DatapathId) {
        let forgotten = self.table.lock().unwrap().forget_switch(sw);
        if forgotten > 0 {
            debug!("{}: forgot {} learned hosts", dpid_str(sw), forgotten);
        }
    }

    fn packet_in(&self, sw: DatapathId, xid: u32, pkt: PacketIn, sink: &mut dyn MessageSink) {
        let frame = match parse_payload(&pkt.input_payload) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("{}: dropping unparseable packet: {}", dpid_str(sw), err);
                return;
            }
        };
        if self.firewall_enabled {
            let verdict = self.firewall.lock().unwrap().check(sw, &frame, pkt.port);
            if verdict == Verdict::Deny {
                return;
            }
        }
        let strategy = match self.selector.lock().unwrap().active() {
            Some(strategy) => strategy,
            None => {
                trace!("{}: no strategy attached; dropping packet", dpid_str(sw));
                return;
            }
        };
        let decision = {
            let mut table = self.table.lock().unwrap();
            strategy.decide(&mut table, sw, pkt.port, &frame)
        };
        self.apply(sw, xid, &pkt, &frame, decision, sink);
    }

    fn port_status(&self, sw: DatapathId, status: PortStatus) {
        debug!("{}: port {} ({}) {:?}",
               dpid_str(sw),
               status.desc.port_no,
               status.desc.name,
               status.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    use crate::firewall::TpPort;
    use crate::openflow0x01::message::Message;
    use crate::openflow0x01::{FlowModCmd, PacketInReason, Payload};
    use crate::packet::{MacAddr, ETH_TYPE_ARP, ETH_TYPE_IP};

    const SW: DatapathId = 1;
    const HOST_A: MacAddr = MacAddr([0xaa, 0, 0, 0, 0, 1]);
    const HOST_B: MacAddr = MacAddr([0xbb, 0, 0, 0, 0, 2]);

    #[derive(Default)]
    struct Recorder {
        sent: Vec<(u32, Message)>,
        fail_next: usize,
    }

    impl MessageSink for Recorder {
        fn send(&mut self, xid: u32, msg: Message) -> Result<()> {
            if self.fail_next > 0 {
                self.fail_next -= 1;
                return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
            }
            self.sent.push((xid, msg));
            Ok(())
        }
    }

    fn arp_frame(src: MacAddr, dst: MacAddr) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&dst.octets());
        bytes.extend_from_slice(&src.octets());
        bytes.extend_from_slice(&ETH_TYPE_ARP.to_be_bytes());
        bytes
    }

    fn tcp_frame(src: MacAddr, dst: MacAddr, tp_src: u16) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&dst.octets());
        bytes.extend_from_slice(&src.octets());
        bytes.extend_from_slice(&ETH_TYPE_IP.to_be_bytes());
        bytes.push(0x45);
        bytes.push(0);
        bytes.extend_from_slice(&40u16.to_be_bytes());
        bytes.extend_from_slice(&[0; 5]);
        bytes.push(0x06);
        bytes.extend_from_slice(&[0; 2]);
        bytes.extend_from_slice(&[10, 0, 0, 1]);
        bytes.extend_from_slice(&[10, 0, 0, 2]);
        bytes.extend_from_slice(&tp_src.to_be_bytes());
        bytes.extend_from_slice(&80u16.to_be_bytes());
        bytes
    }

    fn buffered(data: Vec<u8>, port: u16) -> PacketIn {
        PacketIn {
            total_len: data.len() as u16,
            input_payload: Payload::Buffered(0x99, data),
            port,
            reason: PacketInReason::NoMatch,
        }
    }

    fn unbuffered(data: Vec<u8>, port: u16) -> PacketIn {
        PacketIn {
            total_len: data.len() as u16,
            input_payload: Payload::NotBuffered(data),
            port,
            reason: PacketInReason::NoMatch,
        }
    }

    #[test]
    fn detached_controller_drops_packets() {
        let lab = SwitchLab::new(None, false);
        let mut rec = Recorder::default();
        lab.packet_in(SW, 0, buffered(arp_frame(HOST_A, HOST_B), 1), &mut rec);
        assert!(rec.sent.is_empty());
        assert_eq!(lab.learned(), 0);
    }

    #[test]
    fn firewall_denies_before_the_strategy_runs() {
        let lab = SwitchLab::new(Some(Strategy::IdealPairSwitch), true);
        let mut rec = Recorder::default();
        lab.packet_in(SW, 0, buffered(tcp_frame(HOST_A, HOST_B, 5000), 1), &mut rec);
        assert!(rec.sent.is_empty());
        assert_eq!(lab.learned(), 0);
    }

    #[test]
    fn buffered_resend_rides_the_flow_mod() {
        let lab = SwitchLab::new(Some(Strategy::PairHub), false);
        let mut rec = Recorder::default();
        lab.packet_in(SW, 7, buffered(arp_frame(HOST_A, HOST_B), 1), &mut rec);
        match &rec.sent[..] {
            [(7, Message::FlowMod(fm))] => {
                assert_eq!(fm.command, FlowModCmd::AddFlow);
                assert_eq!(fm.priority, FLOW_PRIORITY);
                assert_eq!(fm.pattern.dl_src, Some(HOST_A));
                assert_eq!(fm.pattern.dl_dst, Some(HOST_B));
                assert_eq!(fm.idle_timeout, Timeout::ExpiresAfter(10));
                assert_eq!(fm.hard_timeout, Timeout::ExpiresAfter(30));
                assert_eq!(fm.apply_to_packet, Some(0x99));
                assert_eq!(fm.actions, vec![Action::Output(PseudoPort::AllPorts)]);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn unbuffered_resend_becomes_a_packet_out() {
        let lab = SwitchLab::new(Some(Strategy::LazyHub), false);
        let mut rec = Recorder::default();
        let data = arp_frame(HOST_A, HOST_B);
        lab.packet_in(SW, 0, unbuffered(data.clone(), 4), &mut rec);
        match &rec.sent[..] {
            [(_, Message::FlowMod(fm)), (_, Message::PacketOut(po))] => {
                assert_eq!(fm.apply_to_packet, None);
                assert_eq!(fm.pattern, Pattern::match_all());
                assert_eq!(po.output_payload, Payload::NotBuffered(data));
                assert_eq!(po.port_id, Some(4));
                assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::AllPorts)]);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn flood_decision_is_a_single_packet_out() {
        let lab = SwitchLab::new(Some(Strategy::DumbHub), false);
        let mut rec = Recorder::default();
        lab.packet_in(SW, 0, buffered(arp_frame(HOST_A, HOST_B), 2), &mut rec);
        match &rec.sent[..] {
            [(_, Message::PacketOut(po))] => {
                assert_eq!(po.output_payload, Payload::Buffered(0x99, arp_frame(HOST_A, HOST_B)));
                assert_eq!(po.port_id, Some(2));
                assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::AllPorts)]);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn firewall_constrains_installed_rules() {
        let lab = SwitchLab::new(Some(Strategy::PairHub), true);
        lab.add_firewall_rule(RuleKey {
                                  nw_proto: 0x06,
                                  in_port: 1,
                                  tp_src: TpPort::Any,
                                  ..RuleKey::new(SW)
                              },
                              true);
        let mut rec = Recorder::default();
        lab.packet_in(SW, 0, buffered(tcp_frame(HOST_A, HOST_B, 5000), 1), &mut rec);
        match &rec.sent[..] {
            [(_, Message::FlowMod(fm))] => {
                assert_eq!(fm.pattern.dl_typ, Some(ETH_TYPE_IP));
                assert_eq!(fm.pattern.nw_proto, Some(0x06));
                assert_eq!(fm.pattern.tp_src, Some(5000));
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn unfiltered_arp_installs_stay_pinned_to_arp() {
        let lab = SwitchLab::new(Some(Strategy::PairHub), true);
        let mut rec = Recorder::default();
        // ARP passes the filter without a rule, but the flow it installs
        // must not be wide enough to carry IPv4 past the default deny.
        lab.packet_in(SW, 0, buffered(arp_frame(HOST_A, HOST_B), 1), &mut rec);
        match &rec.sent[..] {
            [(_, Message::FlowMod(fm))] => {
                assert_eq!(fm.pattern.dl_typ, Some(ETH_TYPE_ARP));
                assert_eq!(fm.pattern.nw_proto, None);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn attach_detach_cycle_controls_the_pipeline() {
        let lab = SwitchLab::new(Some(Strategy::DumbHub), false);
        assert_eq!(lab.detach(), Some(Strategy::DumbHub));
        let mut rec = Recorder::default();
        lab.packet_in(SW, 0, buffered(arp_frame(HOST_A, HOST_B), 1), &mut rec);
        assert!(rec.sent.is_empty());

        assert_eq!(lab.attach(Strategy::PairSwitch), None);
        lab.packet_in(SW, 0, buffered(arp_frame(HOST_A, HOST_B), 1), &mut rec);
        assert_eq!(rec.sent.len(), 1);
        assert_eq!(lab.learned(), 1);
    }

    #[test]
    fn a_failed_install_does_not_abandon_the_decision() {
        let lab = SwitchLab::new(Some(Strategy::IdealPairSwitch), false);
        let mut rec = Recorder::default();
        lab.packet_in(SW, 0, buffered(arp_frame(HOST_A, HOST_B), 1), &mut rec);
        rec.sent.clear();

        // The reverse rule's send dies; the forward rule and the resend of
        // the triggering packet still go out.
        rec.fail_next = 1;
        let data = arp_frame(HOST_B, HOST_A);
        lab.packet_in(SW, 0, unbuffered(data.clone(), 2), &mut rec);
        match &rec.sent[..] {
            [(_, Message::FlowMod(fm)), (_, Message::PacketOut(po))] => {
                assert_eq!(fm.pattern.dl_src, Some(HOST_B));
                assert_eq!(fm.pattern.dl_dst, Some(HOST_A));
                assert_eq!(po.output_payload, Payload::NotBuffered(data));
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn disconnect_forgets_the_switch() {
        let lab = SwitchLab::new(Some(Strategy::PairSwitch), false);
        let mut rec = Recorder::default();
        lab.packet_in(SW, 0, buffered(arp_frame(HOST_A, HOST_B), 1), &mut rec);
        assert_eq!(lab.learned(), 1);
        lab.switch_disconnected(SW);
        assert_eq!(lab.learned(), 0);
    }
}
