//! Switch connection handling: the per-connection message loop, the sink
//! abstraction outbound messages travel through, and the registry of
//! connected switches.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::ofp_header::OfpHeader;
use crate::ofp_message::OfpMessage;
use crate::openflow0x01::message::Message;
use crate::openflow0x01::{dpid_str, DatapathId, FlowMod, PacketIn, PacketOut, PortStatus,
                          SwitchFeatures};

/// Where outbound messages go. The message loop hands controllers a sink
/// rather than the raw stream, so controller logic can be driven without a
/// socket on the other end.
pub trait MessageSink {
    fn send(&mut self, xid: u32, msg: Message) -> Result<()>;
}

/// A sink that marshals messages onto a switch's TCP connection. Cloning
/// shares the underlying stream, so the console can write to a switch the
/// message loop is reading from.
#[derive(Clone)]
pub struct TcpSink {
    stream: Arc<Mutex<TcpStream>>,
}

impl TcpSink {
    pub fn new(stream: TcpStream) -> TcpSink {
        TcpSink { stream: Arc::new(Mutex::new(stream)) }
    }

    /// True when both sinks write to the same underlying connection.
    fn is_same_connection(&self, other: &TcpSink) -> bool {
        Arc::ptr_eq(&self.stream, &other.stream)
    }
}

impl MessageSink for TcpSink {
    fn send(&mut self, xid: u32, msg: Message) -> Result<()> {
        let raw = Message::marshal(xid, msg)?;
        let mut stream = self.stream.lock().unwrap();
        stream.write_all(&raw)?;
        Ok(())
    }
}

/// The switches currently connected, keyed by datapath id. Shared between
/// the per-connection threads and the operator console.
#[derive(Default)]
pub struct SwitchRegistry {
    inner: Mutex<HashMap<DatapathId, TcpSink>>,
}

impl SwitchRegistry {
    pub fn new() -> SwitchRegistry {
        SwitchRegistry::default()
    }

    pub(crate) fn register(&self, sw: DatapathId, sink: TcpSink) {
        let mut inner = self.inner.lock().unwrap();
        if inner.insert(sw, sink).is_some() {
            warn!("switch {} reconnected; replacing its old connection",
                  dpid_str(sw));
        }
    }

    /// Remove `sw` only while `sink` is still its registered connection.
    /// Returns false when a reconnect has already replaced the entry.
    pub(crate) fn unregister(&self, sw: DatapathId, sink: &TcpSink) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.get(&sw) {
            Some(current) if current.is_same_connection(sink) => {
                inner.remove(&sw);
                true
            }
            _ => false,
        }
    }

    pub fn sink(&self, sw: DatapathId) -> Option<TcpSink> {
        self.inner.lock().unwrap().get(&sw).cloned()
    }

    pub fn dpids(&self) -> Vec<DatapathId> {
        let mut ids: Vec<DatapathId> = self.inner.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn sinks(&self) -> Vec<(DatapathId, TcpSink)> {
        let mut all: Vec<(DatapathId, TcpSink)> = self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|(sw, sink)| (*sw, sink.clone()))
            .collect();
        all.sort_unstable_by_key(|(sw, _)| *sw);
        all
    }
}

/// An OpenFlow 0x01 controller. One instance serves every connected switch,
/// so implementations guard their own state.
pub trait OF0x01Controller: Send + Sync {
    /// Called once the features handshake with `sw` completes.
    fn switch_connected(&self, sw: DatapathId, feats: SwitchFeatures, sink: &mut dyn MessageSink);
    /// Called after the connection to `sw` goes away.
    fn switch_disconnected(&self, sw: DatapathId);
    /// Called for each packet `sw` punts to the controller.
    fn packet_in(&self, sw: DatapathId, xid: u32, pkt: PacketIn, sink: &mut dyn MessageSink);
    /// Called when a port on `sw` changes state.
    fn port_status(&self, sw: DatapathId, status: PortStatus) {
        let _ = (sw, status);
    }

    /// Install `flow` on `sw`.
    fn send_flow_mod(sw: DatapathId,
                     xid: u32,
                     flow: FlowMod,
                     sink: &mut dyn MessageSink)
                     -> Result<()> {
        trace!("{}: sending flow mod {:?}", dpid_str(sw), flow);
        sink.send(xid, Message::FlowMod(flow))
    }

    /// Tell `sw` to emit a packet.
    fn send_packet_out(sw: DatapathId,
                       xid: u32,
                       pkt: PacketOut,
                       sink: &mut dyn MessageSink)
                       -> Result<()> {
        trace!("{}: sending packet out {:?}", dpid_str(sw), pkt);
        sink.send(xid, Message::PacketOut(pkt))
    }
}

struct ThreadState {
    switch_id: Option<DatapathId>,
}

/// Run the message loop for one switch connection: send the hello, complete
/// the features handshake, then dispatch messages to `cntl` until the peer
/// hangs up. Intended to run on its own thread, one per connection.
pub fn handle_client_connected<C: OF0x01Controller>(cntl: Arc<C>,
                                                    stream: TcpStream,
                                                    registry: Arc<SwitchRegistry>) {
    let peer = stream.peer_addr().ok();
    let mut sink = match stream.try_clone() {
        Ok(writer) => TcpSink::new(writer),
        Err(err) => {
            warn!("failed to clone switch connection: {}", err);
            return;
        }
    };
    let mut state = ThreadState { switch_id: None };
    if let Err(err) = message_loop(&*cntl, stream, &mut sink, &mut state, &registry) {
        warn!("switch connection lost: {}", err);
    }
    match state.switch_id {
        Some(sw) => {
            // A reconnect may already have taken over this dpid; only the
            // connection still holding the registry entry tears it down.
            if registry.unregister(sw, &sink) {
                cntl.switch_disconnected(sw);
                info!("switch {} disconnected", dpid_str(sw));
            } else {
                debug!("old connection for switch {} closed after a reconnect",
                       dpid_str(sw));
            }
        }
        None => {
            if let Some(addr) = peer {
                debug!("{} disconnected before completing the handshake", addr);
            }
        }
    }
}

fn message_loop<C: OF0x01Controller>(cntl: &C,
                                     mut stream: TcpStream,
                                     sink: &mut TcpSink,
                                     state: &mut ThreadState,
                                     registry: &SwitchRegistry)
                                     -> Result<()> {
    sink.send(0, Message::Hello)?;
    loop {
        let mut buf = [0u8; 8];
        if let Err(err) = stream.read_exact(&mut buf) {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                return Ok(());
            }
            return Err(err.into());
        }
        let header = match OfpHeader::parse(buf) {
            Ok(header) => header,
            Err(Error::UnknownMsgCode(code)) => {
                // Consume the body anyway so the stream stays framed.
                let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
                let mut rest = vec![0; length.saturating_sub(OfpHeader::size())];
                stream.read_exact(&mut rest)?;
                trace!("ignoring message with unknown type {:#04x}", code);
                continue;
            }
            Err(err) => return Err(err),
        };
        let mut body = vec![0; header.length().saturating_sub(OfpHeader::size())];
        stream.read_exact(&mut body)?;
        match Message::parse(&header, &body) {
            Ok((xid, msg)) => process_message(cntl, state, sink, registry, xid, msg)?,
            Err(Error::UnhandledMessage(code)) => {
                trace!("ignoring {:?} message from switch", code)
            }
            Err(err) => {
                warn!("dropping malformed {:?} message: {}", header.type_code(), err)
            }
        }
    }
}

fn process_message<C: OF0x01Controller>(cntl: &C,
                                        state: &mut ThreadState,
                                        sink: &mut TcpSink,
                                        registry: &SwitchRegistry,
                                        xid: u32,
                                        msg: Message)
                                        -> Result<()> {
    match msg {
        Message::Hello => sink.send(xid, Message::FeaturesReq)?,
        Message::EchoRequest(bytes) => sink.send(xid, Message::EchoReply(bytes))?,
        Message::EchoReply(_) => (),
        Message::FeaturesReply(feats) => {
            let sw = feats.datapath_id;
            if let Some(old) = state.switch_id.replace(sw) {
                warn!("switch {} sent a second features reply", dpid_str(old));
            }
            registry.register(sw, sink.clone());
            info!("switch {} connected ({} ports)", dpid_str(sw), feats.ports.len());
            cntl.switch_connected(sw, feats, sink);
        }
        Message::PacketIn(pkt) => match state.switch_id {
            Some(sw) => cntl.packet_in(sw, xid, pkt, sink),
            None => warn!("packet in before features reply; dropping"),
        },
        Message::PortStatus(status) => {
            if let Some(sw) = state.switch_id {
                cntl.port_status(sw, status);
            }
        }
        other => trace!("ignoring unexpected {:?} from switch", other),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use crate::openflow0x01::MsgCode;

    struct CountingController {
        packets: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl OF0x01Controller for CountingController {
        fn switch_connected(&self, _: DatapathId, _: SwitchFeatures, _: &mut dyn MessageSink) {}

        fn switch_disconnected(&self, _: DatapathId) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn packet_in(&self, _: DatapathId, _: u32, _: PacketIn, _: &mut dyn MessageSink) {
            self.packets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn read_message(stream: &mut TcpStream) -> (OfpHeader, Vec<u8>) {
        let mut head = [0u8; 8];
        stream.read_exact(&mut head).unwrap();
        let header = OfpHeader::parse(head).unwrap();
        let mut body = vec![0; header.length() - OfpHeader::size()];
        stream.read_exact(&mut body).unwrap();
        (header, body)
    }

    fn features_reply_bytes(dpid: DatapathId, xid: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        OfpHeader::marshal(&mut bytes, OfpHeader::new(1, MsgCode::FeaturesResp, 8 + 24, xid));
        bytes.extend_from_slice(&dpid.to_be_bytes());
        bytes.extend_from_slice(&64u32.to_be_bytes());
        bytes.push(2);
        bytes.extend_from_slice(&[0; 3]);
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes
    }

    fn packet_in_bytes(xid: u32) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0xff; 6]);
        frame.extend_from_slice(&[0xaa; 6]);
        frame.extend_from_slice(&[0x08, 0x06]);
        let mut bytes = Vec::new();
        let length = (8 + 10 + frame.len()) as u16;
        OfpHeader::marshal(&mut bytes, OfpHeader::new(1, MsgCode::PacketIn, length, xid));
        bytes.extend_from_slice(&(-1i32).to_be_bytes());
        bytes.extend_from_slice(&(frame.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&3u16.to_be_bytes());
        bytes.push(0);
        bytes.push(0);
        bytes.extend_from_slice(&frame);
        bytes
    }

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for {}", what);
    }

    #[test]
    fn handshake_registers_switch_and_disconnect_unregisters() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let cntl = Arc::new(CountingController {
            packets: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        });
        let registry = Arc::new(SwitchRegistry::new());

        let mut switch = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        let worker = {
            let cntl = Arc::clone(&cntl);
            let registry = Arc::clone(&registry);
            thread::spawn(move || handle_client_connected(cntl, server, registry))
        };

        // The controller speaks first.
        let (hello, _) = read_message(&mut switch);
        assert_eq!(hello.type_code(), MsgCode::Hello);
        let raw = Message::marshal(0, Message::Hello).unwrap();
        switch.write_all(&raw).unwrap();
        let (req, _) = read_message(&mut switch);
        assert_eq!(req.type_code(), MsgCode::FeaturesReq);

        switch.write_all(&features_reply_bytes(7, 1)).unwrap();
        wait_until("switch registration", || !registry.dpids().is_empty());
        assert_eq!(registry.dpids(), vec![7]);

        switch.write_all(&packet_in_bytes(2)).unwrap();
        wait_until("packet in delivery", || cntl.packets.load(Ordering::SeqCst) == 1);

        drop(switch);
        worker.join().unwrap();
        assert!(registry.dpids().is_empty());
        assert_eq!(cntl.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reconnect_survives_the_old_connection_closing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let cntl = Arc::new(CountingController {
            packets: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        });
        let registry = Arc::new(SwitchRegistry::new());

        let handshake = |dpid: DatapathId| {
            let mut switch = TcpStream::connect(addr).unwrap();
            let (server, _) = listener.accept().unwrap();
            let worker = {
                let cntl = Arc::clone(&cntl);
                let registry = Arc::clone(&registry);
                thread::spawn(move || handle_client_connected(cntl, server, registry))
            };
            let _hello = read_message(&mut switch);
            switch.write_all(&Message::marshal(0, Message::Hello).unwrap()).unwrap();
            let _req = read_message(&mut switch);
            switch.write_all(&features_reply_bytes(dpid, 1)).unwrap();
            // An answered echo proves the features reply was processed.
            let raw = Message::marshal(9, Message::EchoRequest(vec![])).unwrap();
            switch.write_all(&raw).unwrap();
            let (reply, _) = read_message(&mut switch);
            assert_eq!(reply.type_code(), MsgCode::EchoResp);
            (switch, worker)
        };

        // The switch power-cycles: a second connection registers dpid 7
        // while the first socket is still half-open.
        let (first, first_worker) = handshake(7);
        let (second, second_worker) = handshake(7);

        drop(first);
        first_worker.join().unwrap();
        assert_eq!(registry.dpids(), vec![7],
                   "stale teardown must not evict the live connection");
        assert_eq!(cntl.disconnects.load(Ordering::SeqCst), 0);

        drop(second);
        second_worker.join().unwrap();
        assert!(registry.dpids().is_empty());
        assert_eq!(cntl.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn echo_requests_are_answered_with_the_same_xid() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let cntl = Arc::new(CountingController {
            packets: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        });
        let registry = Arc::new(SwitchRegistry::new());

        let mut switch = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        let worker = {
            let cntl = Arc::clone(&cntl);
            let registry = Arc::clone(&registry);
            thread::spawn(move || handle_client_connected(cntl, server, registry))
        };

        let _hello = read_message(&mut switch);
        let raw = Message::marshal(0x55, Message::EchoRequest(vec![1, 2, 3])).unwrap();
        switch.write_all(&raw).unwrap();
        let (reply, body) = read_message(&mut switch);
        assert_eq!(reply.type_code(), MsgCode::EchoResp);
        assert_eq!(reply.xid(), 0x55);
        assert_eq!(body, vec![1, 2, 3]);

        drop(switch);
        worker.join().unwrap();
    }
}
