use std::io::{BufRead, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{bit, test_bit};
use crate::error::{Error, Result};
use crate::packet::MacAddr;

/// OpenFlow 1.0 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Vendor,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    PortMod,
    StatsReq,
    StatsResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
}

impl MsgCode {
    /// Map a wire type code to a `MsgCode`.
    pub fn of_int(code: u8) -> Option<MsgCode> {
        match code {
            0 => Some(MsgCode::Hello),
            1 => Some(MsgCode::Error),
            2 => Some(MsgCode::EchoReq),
            3 => Some(MsgCode::EchoResp),
            4 => Some(MsgCode::Vendor),
            5 => Some(MsgCode::FeaturesReq),
            6 => Some(MsgCode::FeaturesResp),
            7 => Some(MsgCode::GetConfigReq),
            8 => Some(MsgCode::GetConfigResp),
            9 => Some(MsgCode::SetConfig),
            10 => Some(MsgCode::PacketIn),
            11 => Some(MsgCode::FlowRemoved),
            12 => Some(MsgCode::PortStatus),
            13 => Some(MsgCode::PacketOut),
            14 => Some(MsgCode::FlowMod),
            15 => Some(MsgCode::PortMod),
            16 => Some(MsgCode::StatsReq),
            17 => Some(MsgCode::StatsResp),
            18 => Some(MsgCode::BarrierReq),
            19 => Some(MsgCode::BarrierResp),
            20 => Some(MsgCode::QueueGetConfigReq),
            21 => Some(MsgCode::QueueGetConfigResp),
            _ => None,
        }
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message.
    fn size_of(msg: &Self) -> usize;
    /// Parse a buffer into a message.
    fn parse(buf: &[u8]) -> Result<Self>;
    /// Marshal a message into a `u8` buffer. Fails on message types the
    /// controller only ever receives.
    fn marshal(msg: Self, bytes: &mut Vec<u8>) -> Result<()>;
}

// Wire sizes of the fixed-layout C structs of OpenFlow 1.0.
const OFP_MATCH_SIZE: usize = 40;
const OFP_FLOW_MOD_SIZE: usize = 24;
const OFP_ACTION_OUTPUT_SIZE: usize = 8;
const OFP_PACKET_IN_SIZE: usize = 10;
const OFP_PACKET_OUT_SIZE: usize = 8;
const OFP_PHY_PORT_SIZE: usize = 48;
const OFP_PORT_STATUS_SIZE: usize = 8 + OFP_PHY_PORT_SIZE;
const OFP_SWITCH_FEATURES_SIZE: usize = 24;

/// Bytes not yet consumed from a parse cursor.
fn remaining(bytes: &Cursor<&[u8]>) -> usize {
    bytes.get_ref().len().saturating_sub(bytes.position() as usize)
}

/// Datapath identifier of a switch, exchanged during the features handshake.
pub type DatapathId = u64;

/// Render the low 48 bits of a datapath id the way operators read them,
/// as six dash-separated hex bytes.
pub fn dpid_str(dpid: DatapathId) -> String {
    let b = dpid.to_be_bytes();
    format!("{:02x}-{:02x}-{:02x}-{:02x}-{:02x}-{:02x}",
            b[2], b[3], b[4], b[5], b[6], b[7])
}

/// Fields to match against flows. A `None` field is a wildcard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub dl_typ: Option<u16>,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_pcp: Option<u8>,
    pub nw_src: Option<u32>,
    pub nw_dst: Option<u32>,
    pub nw_proto: Option<u8>,
    pub nw_tos: Option<u8>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
    pub in_port: Option<u16>,
}

impl Pattern {
    /// The pattern matching every packet.
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    /// Compute the `OFPFW` wildcard bits of a pattern. The IP address pair
    /// uses 6-bit CIDR-style counts, where 32 or more wildcards the whole
    /// address.
    fn wildcards_of_pattern(m: &Pattern) -> u32 {
        let mut w: u64 = 0;
        w = bit(0, w, m.in_port.is_none());
        w = bit(1, w, m.dl_vlan.is_none());
        w = bit(2, w, m.dl_src.is_none());
        w = bit(3, w, m.dl_dst.is_none());
        w = bit(4, w, m.dl_typ.is_none());
        w = bit(5, w, m.nw_proto.is_none());
        w = bit(6, w, m.tp_src.is_none());
        w = bit(7, w, m.tp_dst.is_none());
        w |= (if m.nw_src.is_none() { 32u64 } else { 0 }) << 8;
        w |= (if m.nw_dst.is_none() { 32u64 } else { 0 }) << 14;
        w = bit(20, w, m.dl_vlan_pcp.is_none());
        w = bit(21, w, m.nw_tos.is_none());
        w as u32
    }

    fn size_of(_: &Pattern) -> usize {
        OFP_MATCH_SIZE
    }

    fn marshal(m: Pattern, bytes: &mut Vec<u8>) {
        bytes
            .write_u32::<BigEndian>(Pattern::wildcards_of_pattern(&m))
            .unwrap();
        bytes.write_u16::<BigEndian>(m.in_port.unwrap_or(0)).unwrap();
        bytes.extend_from_slice(&m.dl_src.unwrap_or(MacAddr::ZERO).octets());
        bytes.extend_from_slice(&m.dl_dst.unwrap_or(MacAddr::ZERO).octets());
        bytes.write_u16::<BigEndian>(m.dl_vlan.unwrap_or(0)).unwrap();
        bytes.write_u8(m.dl_vlan_pcp.unwrap_or(0)).unwrap();
        bytes.write_u8(0).unwrap();
        bytes.write_u16::<BigEndian>(m.dl_typ.unwrap_or(0)).unwrap();
        bytes.write_u8(m.nw_tos.unwrap_or(0)).unwrap();
        bytes.write_u8(m.nw_proto.unwrap_or(0)).unwrap();
        bytes.write_u16::<BigEndian>(0).unwrap();
        bytes.write_u32::<BigEndian>(m.nw_src.unwrap_or(0)).unwrap();
        bytes.write_u32::<BigEndian>(m.nw_dst.unwrap_or(0)).unwrap();
        bytes.write_u16::<BigEndian>(m.tp_src.unwrap_or(0)).unwrap();
        bytes.write_u16::<BigEndian>(m.tp_dst.unwrap_or(0)).unwrap();
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Pattern> {
        let w = bytes.read_u32::<BigEndian>()? as u64;
        let in_port = bytes.read_u16::<BigEndian>()?;
        let mut dl_src = [0u8; 6];
        bytes.read_exact(&mut dl_src)?;
        let mut dl_dst = [0u8; 6];
        bytes.read_exact(&mut dl_dst)?;
        let dl_vlan = bytes.read_u16::<BigEndian>()?;
        let dl_vlan_pcp = bytes.read_u8()?;
        bytes.consume(1);
        let dl_typ = bytes.read_u16::<BigEndian>()?;
        let nw_tos = bytes.read_u8()?;
        let nw_proto = bytes.read_u8()?;
        bytes.consume(2);
        let nw_src = bytes.read_u32::<BigEndian>()?;
        let nw_dst = bytes.read_u32::<BigEndian>()?;
        let tp_src = bytes.read_u16::<BigEndian>()?;
        let tp_dst = bytes.read_u16::<BigEndian>()?;
        Ok(Pattern {
            dl_src: if test_bit(2, w) { None } else { Some(MacAddr(dl_src)) },
            dl_dst: if test_bit(3, w) { None } else { Some(MacAddr(dl_dst)) },
            dl_typ: if test_bit(4, w) { None } else { Some(dl_typ) },
            dl_vlan: if test_bit(1, w) { None } else { Some(dl_vlan) },
            dl_vlan_pcp: if test_bit(20, w) { None } else { Some(dl_vlan_pcp) },
            nw_src: if (w >> 8) & 0x3f >= 32 { None } else { Some(nw_src) },
            nw_dst: if (w >> 14) & 0x3f >= 32 { None } else { Some(nw_dst) },
            nw_proto: if test_bit(5, w) { None } else { Some(nw_proto) },
            nw_tos: if test_bit(21, w) { None } else { Some(nw_tos) },
            tp_src: if test_bit(6, w) { None } else { Some(tp_src) },
            tp_dst: if test_bit(7, w) { None } else { Some(tp_dst) },
            in_port: if test_bit(0, w) { None } else { Some(in_port) },
        })
    }
}

/// Port behavior.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u16),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    Controller(u64),
    Local,
}

#[repr(u16)]
enum OfpPort {
    OFPPMax = 0xff00,
    OFPPInPort = 0xfff8,
    OFPPTable = 0xfff9,
    OFPPNormal = 0xfffa,
    OFPPFlood = 0xfffb,
    OFPPAll = 0xfffc,
    OFPPController = 0xfffd,
    OFPPLocal = 0xfffe,
    OFPPNone = 0xffff,
}

impl PseudoPort {
    fn of_int(p: u16) -> Result<Option<PseudoPort>> {
        if (OfpPort::OFPPNone as u16) == p {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    /// Port numbers between `OFPPMax` and `OFPPInPort` are undefined in
    /// OpenFlow 1.0 and fail to parse.
    fn make(p: u16, len: u64) -> Result<PseudoPort> {
        match p {
            p if p == (OfpPort::OFPPInPort as u16) => Ok(PseudoPort::InPort),
            p if p == (OfpPort::OFPPTable as u16) => Ok(PseudoPort::Table),
            p if p == (OfpPort::OFPPNormal as u16) => Ok(PseudoPort::Normal),
            p if p == (OfpPort::OFPPFlood as u16) => Ok(PseudoPort::Flood),
            p if p == (OfpPort::OFPPAll as u16) => Ok(PseudoPort::AllPorts),
            p if p == (OfpPort::OFPPController as u16) => Ok(PseudoPort::Controller(len)),
            p if p == (OfpPort::OFPPLocal as u16) => Ok(PseudoPort::Local),
            _ => {
                if p <= (OfpPort::OFPPMax as u16) {
                    Ok(PseudoPort::PhysicalPort(p))
                } else {
                    Err(Error::BadEnumValue {
                        what: "port number",
                        value: p as u64,
                    })
                }
            }
        }
    }

    fn marshal(pp: PseudoPort, bytes: &mut Vec<u8>) {
        match pp {
            PseudoPort::PhysicalPort(p) => bytes.write_u16::<BigEndian>(p).unwrap(),
            PseudoPort::InPort => bytes.write_u16::<BigEndian>(OfpPort::OFPPInPort as u16).unwrap(),
            PseudoPort::Table => bytes.write_u16::<BigEndian>(OfpPort::OFPPTable as u16).unwrap(),
            PseudoPort::Normal => bytes.write_u16::<BigEndian>(OfpPort::OFPPNormal as u16).unwrap(),
            PseudoPort::Flood => bytes.write_u16::<BigEndian>(OfpPort::OFPPFlood as u16).unwrap(),
            PseudoPort::AllPorts => bytes.write_u16::<BigEndian>(OfpPort::OFPPAll as u16).unwrap(),
            PseudoPort::Controller(_) => {
                bytes.write_u16::<BigEndian>(OfpPort::OFPPController as u16).unwrap()
            }
            PseudoPort::Local => bytes.write_u16::<BigEndian>(OfpPort::OFPPLocal as u16).unwrap(),
        }
    }
}

/// Actions associated with flows and packets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
}

#[repr(u16)]
enum OfpActionType {
    OFPATOutput,
}

impl Action {
    fn type_code(a: &Action) -> OfpActionType {
        match *a {
            Action::Output(_) => OfpActionType::OFPATOutput,
        }
    }

    fn size_of(a: &Action) -> usize {
        match *a {
            Action::Output(_) => OFP_ACTION_OUTPUT_SIZE,
        }
    }

    fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().fold(0, |acc, x| Action::size_of(x) + acc)
    }

    fn parse_sequence(bytes: &mut Cursor<&[u8]>) -> Result<Vec<Action>> {
        let mut actions = vec![];
        while remaining(bytes) >= 4 {
            let action_code = bytes.read_u16::<BigEndian>()?;
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if len < 4 || len - 4 > remaining(bytes) {
                return Err(Error::Truncated {
                    what: "action",
                    need: len,
                    have: remaining(bytes) + 4,
                });
            }
            let body = len - 4;
            if action_code == (OfpActionType::OFPATOutput as u16) && body >= 4 {
                let port_code = bytes.read_u16::<BigEndian>()?;
                let max_len = bytes.read_u16::<BigEndian>()?;
                bytes.consume(body - 4);
                actions.push(Action::Output(PseudoPort::make(port_code, max_len as u64)?));
            } else {
                // Unsupported action type; skip its body.
                bytes.consume(body);
            }
        }
        Ok(actions)
    }

    fn move_controller_last(acts: Vec<Action>) -> Vec<Action> {
        let (mut to_ctrl, mut not_to_ctrl): (Vec<Action>, Vec<Action>) = acts
            .into_iter()
            .partition(|act| matches!(act, Action::Output(PseudoPort::Controller(_))));
        not_to_ctrl.append(&mut to_ctrl);
        not_to_ctrl
    }

    fn marshal(act: Action, bytes: &mut Vec<u8>) {
        bytes.write_u16::<BigEndian>(Action::type_code(&act) as u16).unwrap();
        bytes.write_u16::<BigEndian>(Action::size_of(&act) as u16).unwrap();
        match act {
            Action::Output(pp) => {
                PseudoPort::marshal(pp, bytes);
                bytes
                    .write_u16::<BigEndian>(match pp {
                        PseudoPort::Controller(w) => w as u16,
                        _ => 0,
                    })
                    .unwrap()
            }
        }
    }
}

/// How long before a flow entry expires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Debug)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub stp: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub arp_match_ip: bool,
}

/// Actions supported by the datapath.
#[derive(Debug)]
pub struct SupportedActions {
    pub output: bool,
    pub set_vlan_id: bool,
    pub set_vlan_pcp: bool,
    pub strip_vlan: bool,
    pub set_dl_src: bool,
    pub set_dl_dst: bool,
    pub set_nw_src: bool,
    pub set_nw_dst: bool,
    pub set_nw_tos: bool,
    pub set_tp_src: bool,
    pub set_tp_dst: bool,
    pub enqueue: bool,
    pub vendor: bool,
}

/// Switch features, sent in reply to a features request during the handshake.
#[derive(Debug)]
pub struct SwitchFeatures {
    pub datapath_id: DatapathId,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub supported_capabilities: Capabilities,
    pub supported_actions: SupportedActions,
    pub ports: Vec<PortDesc>,
}

impl MessageType for SwitchFeatures {
    fn size_of(sf: &SwitchFeatures) -> usize {
        let pds: usize = sf.ports.iter().map(PortDesc::size_of).sum();
        OFP_SWITCH_FEATURES_SIZE + pds
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures> {
        if buf.len() < OFP_SWITCH_FEATURES_SIZE {
            return Err(Error::Truncated {
                what: "features reply",
                need: OFP_SWITCH_FEATURES_SIZE,
                have: buf.len(),
            });
        }
        let mut bytes = Cursor::new(buf);
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        bytes.consume(3);
        let supported_capabilities = {
            let d = bytes.read_u32::<BigEndian>()? as u64;
            Capabilities {
                flow_stats: test_bit(0, d),
                table_stats: test_bit(1, d),
                port_stats: test_bit(2, d),
                stp: test_bit(3, d),
                ip_reasm: test_bit(5, d),
                queue_stats: test_bit(6, d),
                arp_match_ip: test_bit(7, d),
            }
        };
        let supported_actions = {
            let d = bytes.read_u32::<BigEndian>()? as u64;
            SupportedActions {
                output: test_bit(0, d),
                set_vlan_id: test_bit(1, d),
                set_vlan_pcp: test_bit(2, d),
                strip_vlan: test_bit(3, d),
                set_dl_src: test_bit(4, d),
                set_dl_dst: test_bit(5, d),
                set_nw_src: test_bit(6, d),
                set_nw_dst: test_bit(7, d),
                set_nw_tos: test_bit(8, d),
                set_tp_src: test_bit(9, d),
                set_tp_dst: test_bit(10, d),
                enqueue: test_bit(11, d),
                vendor: test_bit(12, d),
            }
        };
        let ports = {
            let mut v = vec![];
            let num_ports = remaining(&bytes) / OFP_PHY_PORT_SIZE;
            for _ in 0..num_ports {
                v.push(PortDesc::parse(&mut bytes)?)
            }
            v
        };
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            supported_capabilities,
            supported_actions,
            ports,
        })
    }

    fn marshal(_: SwitchFeatures, _: &mut Vec<u8>) -> Result<()> {
        Err(Error::NotSendable("features reply"))
    }
}

/// Type of modification to perform on a flow table.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl FlowModCmd {
    fn of_int(d: u16) -> Result<FlowModCmd> {
        match d {
            0 => Ok(FlowModCmd::AddFlow),
            1 => Ok(FlowModCmd::ModFlow),
            2 => Ok(FlowModCmd::ModStrictFlow),
            3 => Ok(FlowModCmd::DeleteFlow),
            4 => Ok(FlowModCmd::DeleteStrictFlow),
            _ => Err(Error::BadEnumValue {
                what: "flow-mod command",
                value: d as u64,
            }),
        }
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
}

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        (if check_overlap { 1 << 1 } else { 0 }) | (if notify_when_removed { 1 << 0 } else { 0 })
    }

    fn check_overlap_of_flags(flags: u16) -> bool {
        2 & flags != 0
    }

    fn notify_when_removed_of_flags(flags: u16) -> bool {
        1 & flags != 0
    }
}

impl MessageType for FlowMod {
    fn size_of(msg: &FlowMod) -> usize {
        Pattern::size_of(&msg.pattern) + OFP_FLOW_MOD_SIZE +
        Action::size_of_sequence(&msg.actions)
    }

    fn parse(buf: &[u8]) -> Result<FlowMod> {
        if buf.len() < OFP_MATCH_SIZE + OFP_FLOW_MOD_SIZE {
            return Err(Error::Truncated {
                what: "flow-mod",
                need: OFP_MATCH_SIZE + OFP_FLOW_MOD_SIZE,
                have: buf.len(),
            });
        }
        let mut bytes = Cursor::new(buf);
        let pattern = Pattern::parse(&mut bytes)?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let command = FlowModCmd::of_int(bytes.read_u16::<BigEndian>()?)?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let prio = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_i32::<BigEndian>()?;
        let out_port = PseudoPort::of_int(bytes.read_u16::<BigEndian>()?)?;
        let flags = bytes.read_u16::<BigEndian>()?;
        let actions = Action::parse_sequence(&mut bytes)?;
        Ok(FlowMod {
            command,
            pattern,
            priority: prio,
            actions,
            cookie,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: FlowMod::notify_when_removed_of_flags(flags),
            apply_to_packet: {
                match buffer_id {
                    -1 => None,
                    n => Some(n as u32),
                }
            },
            out_port,
            check_overlap: FlowMod::check_overlap_of_flags(flags),
        })
    }

    fn marshal(fm: FlowMod, bytes: &mut Vec<u8>) -> Result<()> {
        Pattern::marshal(fm.pattern, bytes);
        bytes.write_u64::<BigEndian>(fm.cookie).unwrap();
        bytes.write_u16::<BigEndian>(fm.command as u16).unwrap();
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.idle_timeout)).unwrap();
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.hard_timeout)).unwrap();
        bytes.write_u16::<BigEndian>(fm.priority).unwrap();
        bytes
            .write_i32::<BigEndian>(match fm.apply_to_packet {
                None => -1,
                Some(buf_id) => buf_id as i32,
            })
            .unwrap();
        match fm.out_port {
            None => bytes.write_u16::<BigEndian>(OfpPort::OFPPNone as u16).unwrap(),
            Some(x) => PseudoPort::marshal(x, bytes),
        }
        bytes
            .write_u16::<BigEndian>(FlowMod::flags_to_int(fm.check_overlap,
                                                          fm.notify_when_removed))
            .unwrap();
        for act in Action::move_controller_last(fm.actions) {
            if let Action::Output(PseudoPort::Table) = act {
                panic!("OFPPTable not allowed in installed flow.")
            }
            Action::marshal(act, bytes)
        }
        Ok(())
    }
}

/// The data associated with a packet received by the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        match *payload {
            Payload::Buffered(_, ref buf) |
            Payload::NotBuffered(ref buf) => buf.len(),
        }
    }

    /// The raw frame bytes carried by this payload.
    pub fn bytes(&self) -> &[u8] {
        match *self {
            Payload::Buffered(_, ref buf) |
            Payload::NotBuffered(ref buf) => buf,
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch,
    ExplicitSend,
}

impl PacketInReason {
    fn of_int(d: u8) -> Result<PacketInReason> {
        match d {
            0 => Ok(PacketInReason::NoMatch),
            1 => Ok(PacketInReason::ExplicitSend),
            _ => Err(Error::BadEnumValue {
                what: "packet-in reason",
                value: d as u64,
            }),
        }
    }
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Clone, Debug)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub port: u16,
    pub reason: PacketInReason,
}

impl PacketIn {
    /// Buffer id at the datapath holding this packet, if it was buffered there.
    pub fn buffer_id(&self) -> Option<u32> {
        match self.input_payload {
            Payload::Buffered(n, _) => Some(n),
            Payload::NotBuffered(_) => None,
        }
    }

    /// Clone the payload, so the packet can be sent back out while the
    /// original message is retained.
    pub fn clone_payload(&self) -> Payload {
        self.input_payload.clone()
    }
}

impl MessageType for PacketIn {
    fn size_of(pi: &PacketIn) -> usize {
        OFP_PACKET_IN_SIZE + Payload::size_of(&pi.input_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketIn> {
        if buf.len() < OFP_PACKET_IN_SIZE {
            return Err(Error::Truncated {
                what: "packet-in",
                need: OFP_PACKET_IN_SIZE,
                have: buf.len(),
            });
        }
        let mut bytes = Cursor::new(buf);
        let buf_id = match bytes.read_i32::<BigEndian>()? {
            -1 => None,
            n => Some(n as u32),
        };
        let total_len = bytes.read_u16::<BigEndian>()?;
        let port = bytes.read_u16::<BigEndian>()?;
        let reason = PacketInReason::of_int(bytes.read_u8()?)?;
        bytes.consume(1);
        let data = buf[bytes.position() as usize..].to_vec();
        let payload = match buf_id {
            None => Payload::NotBuffered(data),
            Some(n) => Payload::Buffered(n, data),
        };
        Ok(PacketIn {
            input_payload: payload,
            total_len,
            port,
            reason,
        })
    }

    fn marshal(_: PacketIn, _: &mut Vec<u8>) -> Result<()> {
        Err(Error::NotSendable("packet-in"))
    }
}

/// Represents packets sent from the controller out a port of the datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: Payload,
    pub port_id: Option<u16>,
    pub apply_actions: Vec<Action>,
}

impl MessageType for PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        let data_len = match po.output_payload {
            Payload::NotBuffered(ref buf) => buf.len(),
            Payload::Buffered(_, _) => 0,
        };
        OFP_PACKET_OUT_SIZE + Action::size_of_sequence(&po.apply_actions) + data_len
    }

    fn parse(buf: &[u8]) -> Result<PacketOut> {
        if buf.len() < OFP_PACKET_OUT_SIZE {
            return Err(Error::Truncated {
                what: "packet-out",
                need: OFP_PACKET_OUT_SIZE,
                have: buf.len(),
            });
        }
        let mut bytes = Cursor::new(buf);
        let buf_id = match bytes.read_i32::<BigEndian>()? {
            -1 => None,
            n => Some(n as u32),
        };
        let in_port = bytes.read_u16::<BigEndian>()?;
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        if actions_len > remaining(&bytes) {
            return Err(Error::Truncated {
                what: "packet-out actions",
                need: actions_len,
                have: remaining(&bytes),
            });
        }
        let actions_end = bytes.position() as usize + actions_len;
        let apply_actions = {
            let mut action_bytes = Cursor::new(&buf[bytes.position() as usize..actions_end]);
            Action::parse_sequence(&mut action_bytes)?
        };
        let data = buf[actions_end..].to_vec();
        Ok(PacketOut {
            output_payload: match buf_id {
                None => Payload::NotBuffered(data),
                Some(n) => Payload::Buffered(n, data),
            },
            port_id: match in_port {
                p if p == (OfpPort::OFPPNone as u16) => None,
                p => Some(p),
            },
            apply_actions,
        })
    }

    fn marshal(po: PacketOut, bytes: &mut Vec<u8>) -> Result<()> {
        bytes
            .write_i32::<BigEndian>(match po.output_payload {
                Payload::Buffered(n, _) => n as i32,
                Payload::NotBuffered(_) => -1,
            })
            .unwrap();
        bytes
            .write_u16::<BigEndian>(po.port_id.unwrap_or(OfpPort::OFPPNone as u16))
            .unwrap();
        bytes
            .write_u16::<BigEndian>(Action::size_of_sequence(&po.apply_actions) as u16)
            .unwrap();
        for act in po.apply_actions {
            Action::marshal(act, bytes)
        }
        // A buffered payload lives at the datapath; only unbuffered bytes ride along.
        if let Payload::NotBuffered(data) = po.output_payload {
            bytes.extend_from_slice(&data);
        }
        Ok(())
    }
}

/// STP state of a port.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StpState {
    Listen,
    Learn,
    Forward,
    Block,
}

/// Current state of a physical port. Not configurable by the controller.
#[derive(Debug)]
pub struct PortState {
    pub down: bool,
    pub stp_state: StpState,
}

/// Features of physical ports available in a datapath.
#[derive(Debug)]
pub struct PortFeatures {
    pub f_10mbhd: bool,
    pub f_10mbfd: bool,
    pub f_100mbhd: bool,
    pub f_100mbfd: bool,
    pub f_1gbhd: bool,
    pub f_1gbfd: bool,
    pub f_10gbfd: bool,
    pub copper: bool,
    pub fiber: bool,
    pub autoneg: bool,
    pub pause: bool,
    pub pause_asym: bool,
}

impl PortFeatures {
    fn of_int(d: u32) -> PortFeatures {
        let d = d as u64;
        PortFeatures {
            f_10mbhd: test_bit(0, d),
            f_10mbfd: test_bit(1, d),
            f_100mbhd: test_bit(2, d),
            f_100mbfd: test_bit(3, d),
            f_1gbhd: test_bit(4, d),
            f_1gbfd: test_bit(5, d),
            f_10gbfd: test_bit(6, d),
            copper: test_bit(7, d),
            fiber: test_bit(8, d),
            autoneg: test_bit(9, d),
            pause: test_bit(10, d),
            pause_asym: test_bit(11, d),
        }
    }
}

/// Flags to indicate behavior of the physical port.
///
/// These flags are used both to describe the current configuration of a physical port,
/// and to configure a port's behavior.
#[derive(Debug)]
pub struct PortConfig {
    pub down: bool,
    pub no_stp: bool,
    pub no_recv: bool,
    pub no_recv_stp: bool,
    pub no_flood: bool,
    pub no_fwd: bool,
    pub no_packet_in: bool,
}

/// Description of a physical port.
#[derive(Debug)]
pub struct PortDesc {
    pub port_no: u16,
    pub hw_addr: MacAddr,
    pub name: String,
    pub config: PortConfig,
    pub state: PortState,
    pub curr: PortFeatures,
    pub advertised: PortFeatures,
    pub supported: PortFeatures,
    pub peer: PortFeatures,
}

impl PortDesc {
    fn size_of(_: &PortDesc) -> usize {
        OFP_PHY_PORT_SIZE
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PortDesc> {
        if remaining(bytes) < OFP_PHY_PORT_SIZE {
            return Err(Error::Truncated {
                what: "port description",
                need: OFP_PHY_PORT_SIZE,
                have: remaining(bytes),
            });
        }
        let port_no = bytes.read_u16::<BigEndian>()?;
        let hw_addr = {
            let mut arr = [0u8; 6];
            bytes.read_exact(&mut arr)?;
            MacAddr(arr)
        };
        let name = {
            let mut arr = [0u8; 16];
            bytes.read_exact(&mut arr)?;
            String::from_utf8_lossy(&arr)
                .trim_end_matches('\0')
                .to_string()
        };
        let config = {
            let d = bytes.read_u32::<BigEndian>()? as u64;
            PortConfig {
                down: test_bit(0, d),
                no_stp: test_bit(1, d),
                no_recv: test_bit(2, d),
                no_recv_stp: test_bit(3, d),
                no_flood: test_bit(4, d),
                no_fwd: test_bit(5, d),
                no_packet_in: test_bit(6, d),
            }
        };
        let state = {
            let d = bytes.read_u32::<BigEndian>()?;
            PortState {
                down: test_bit(0, d as u64),
                // Bits 8 and 9 carry the STP state; all four values are defined.
                stp_state: match (d >> 8) & 3 {
                    0 => StpState::Listen,
                    1 => StpState::Learn,
                    2 => StpState::Forward,
                    _ => StpState::Block,
                },
            }
        };
        let curr = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let advertised = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let supported = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let peer = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        Ok(PortDesc {
            port_no,
            hw_addr,
            name,
            config,
            state,
            curr,
            advertised,
            supported,
            peer,
        })
    }
}

/// What changed about a physical port.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortReason {
    PortAdd,
    PortDelete,
    PortModify,
}

impl PortReason {
    fn of_int(d: u8) -> Result<PortReason> {
        match d {
            0 => Ok(PortReason::PortAdd),
            1 => Ok(PortReason::PortDelete),
            2 => Ok(PortReason::PortModify),
            _ => Err(Error::BadEnumValue {
                what: "port-status reason",
                value: d as u64,
            }),
        }
    }
}

/// A physical port has changed in the datapath.
#[derive(Debug)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: PortDesc,
}

impl MessageType for PortStatus {
    fn size_of(_: &PortStatus) -> usize {
        OFP_PORT_STATUS_SIZE
    }

    fn parse(buf: &[u8]) -> Result<PortStatus> {
        if buf.len() < OFP_PORT_STATUS_SIZE {
            return Err(Error::Truncated {
                what: "port-status",
                need: OFP_PORT_STATUS_SIZE,
                have: buf.len(),
            });
        }
        let mut bytes = Cursor::new(buf);
        let reason = PortReason::of_int(bytes.read_u8()?)?;
        bytes.consume(7);
        let desc = PortDesc::parse(&mut bytes)?;
        Ok(PortStatus { reason, desc })
    }

    fn marshal(_: PortStatus, _: &mut Vec<u8>) -> Result<()> {
        Err(Error::NotSendable("port-status"))
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;
    use crate::packet::EthFrame;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Debug)]
    pub enum Message {
        Hello,
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        PacketOut(PacketOut),
        PortStatus(PortStatus),
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
        fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::PortStatus(_) => MsgCode::PortStatus,
            }
        }

        /// Marshal the body of the OpenFlow message `msg`.
        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) -> Result<()> {
            match msg {
                Message::Hello => Ok(()),
                Message::EchoRequest(buf) => {
                    bytes.extend_from_slice(&buf);
                    Ok(())
                }
                Message::EchoReply(buf) => {
                    bytes.extend_from_slice(&buf);
                    Ok(())
                }
                Message::FeaturesReq => Ok(()),
                Message::FeaturesReply(sf) => SwitchFeatures::marshal(sf, bytes),
                Message::FlowMod(flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::PacketOut(packet_out) => PacketOut::marshal(packet_out, bytes),
                Message::PortStatus(sts) => PortStatus::marshal(sts, bytes),
            }
        }
    }

    impl OfpMessage for Message {
        /// Return the byte-size of a `Message`.
        fn size_of(msg: &Message) -> usize {
            match *msg {
                Message::Hello => OfpHeader::size(),
                Message::EchoRequest(ref buf) => OfpHeader::size() + buf.len(),
                Message::EchoReply(ref buf) => OfpHeader::size() + buf.len(),
                Message::FeaturesReq => OfpHeader::size(),
                Message::FeaturesReply(ref sf) => OfpHeader::size() + SwitchFeatures::size_of(sf),
                Message::FlowMod(ref flow_mod) => OfpHeader::size() + FlowMod::size_of(flow_mod),
                Message::PacketIn(ref packet_in) => OfpHeader::size() + PacketIn::size_of(packet_in),
                Message::PacketOut(ref packet_out) => {
                    OfpHeader::size() + PacketOut::size_of(packet_out)
                }
                Message::PortStatus(ref ps) => OfpHeader::size() + PortStatus::size_of(ps),
            }
        }

        /// Create an `OfpHeader` for the given `xid` and `msg`.
        fn header_of(xid: u32, msg: &Message) -> OfpHeader {
            let sizeof_buf = Self::size_of(msg);
            OfpHeader::new(0x01, Message::msg_code_of_message(msg), sizeof_buf as u16, xid)
        }

        /// Returns a `u8` buffer containing a marshaled OpenFlow header and the message `msg`.
        fn marshal(xid: u32, msg: Message) -> Result<Vec<u8>> {
            let hdr = Self::header_of(xid, &msg);
            let mut bytes = vec![];
            OfpHeader::marshal(&mut bytes, hdr);
            Message::marshal_body(msg, &mut bytes)?;
            Ok(bytes)
        }

        /// Returns a pair `(u32, Message)` of the transaction id and OpenFlow message parsed from
        /// the given OpenFlow header `header`, and buffer `buf`. Well-formed messages of a type
        /// this controller takes no action on parse to `Error::UnhandledMessage`.
        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message)> {
            let msg = match header.type_code() {
                MsgCode::Hello => Message::Hello,
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::PortStatus => Message::PortStatus(PortStatus::parse(buf)?),
                other => return Err(Error::UnhandledMessage(other)),
            };
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a flow parameterized by the given `priority`, `pattern`,
    /// and `actions`.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            command: FlowModCmd::AddFlow,
            pattern,
            priority: prio,
            actions,
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            out_port: None,
            apply_to_packet: None,
            check_overlap: false,
        }
    }

    /// Return a `FlowMod` deleting every flow installed at a datapath.
    pub fn delete_all_flows() -> FlowMod {
        FlowMod {
            command: FlowModCmd::DeleteFlow,
            pattern: Pattern::match_all(),
            priority: 0,
            actions: vec![],
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            out_port: None,
            apply_to_packet: None,
            check_overlap: false,
        }
    }

    /// Parse the Ethernet frame carried in a packet payload.
    pub fn parse_payload(payload: &Payload) -> Result<EthFrame> {
        EthFrame::parse(payload.bytes())
    }
}
