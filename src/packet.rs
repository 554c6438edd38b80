use std::fmt;
use std::io::{BufRead, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Error, Result};

pub const ETH_TYPE_IP: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;
pub const ETH_TYPE_VLAN: u16 = 0x8100;

pub const IP_PROTO_ICMP: u8 = 0x01;
pub const IP_PROTO_TCP: u8 = 0x06;
pub const IP_PROTO_UDP: u8 = 0x11;

/// 48-bit Ethernet MAC address.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> MacAddr {
        MacAddr(octets)
    }
}

impl From<MacAddr> for [u8; 6] {
    fn from(mac: MacAddr) -> [u8; 6] {
        mac.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,
               "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
               self.0[0],
               self.0[1],
               self.0[2],
               self.0[3],
               self.0[4],
               self.0[5])
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The IPv4 fields a forwarding or firewall decision reads. Transport ports
/// are absent for protocols that carry none, and for truncated segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Meta {
    pub proto: u8,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

/// Bytes not yet consumed from a parse cursor.
fn remaining(bytes: &Cursor<&[u8]>) -> usize {
    bytes.get_ref().len().saturating_sub(bytes.position() as usize)
}

impl Ipv4Meta {
    /// Parse the IPv4 header sitting at the cursor. Returns `None` when the
    /// bytes do not form a well-formed IPv4 header.
    fn parse(bytes: &mut Cursor<&[u8]>) -> Option<Ipv4Meta> {
        if remaining(bytes) < 20 {
            return None;
        }
        let vhl = bytes.read_u8().ok()?;
        if (vhl >> 4) != 4 {
            return None;
        }
        let ihl = (vhl & 0x0f) as usize;
        if ihl < 5 {
            return None;
        }
        // Skip tos through fragment offset, then checksum and addresses.
        bytes.consume(8);
        let proto = bytes.read_u8().ok()?;
        bytes.consume(2 + 4 + 4);
        let options = ihl * 4 - 20;
        if remaining(bytes) < options {
            return None;
        }
        bytes.consume(options);
        let (tp_src, tp_dst) = match proto {
            IP_PROTO_TCP | IP_PROTO_UDP if remaining(bytes) >= 4 => {
                (Some(bytes.read_u16::<BigEndian>().ok()?),
                 Some(bytes.read_u16::<BigEndian>().ok()?))
            }
            _ => (None, None),
        };
        Some(Ipv4Meta {
            proto,
            tp_src,
            tp_dst,
        })
    }
}

/// Summary of one Ethernet frame as delivered by a packet-in: the addresses
/// and type of the frame, plus the IPv4 fields when the frame carries IPv4.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EthFrame {
    pub dl_src: MacAddr,
    pub dl_dst: MacAddr,
    pub dl_vlan: Option<u16>,
    pub dl_typ: u16,
    pub ip: Option<Ipv4Meta>,
}

impl EthFrame {
    /// Parse an Ethernet frame. `dl_typ` is the inner type when the frame is
    /// VLAN tagged. An IPv4 frame whose header is malformed parses with
    /// `ip: None`.
    pub fn parse(buf: &[u8]) -> Result<EthFrame> {
        if buf.len() < 14 {
            return Err(Error::Truncated {
                what: "ethernet frame",
                need: 14,
                have: buf.len(),
            });
        }
        let mut bytes = Cursor::new(buf);
        let mut dst = [0u8; 6];
        bytes.read_exact(&mut dst)?;
        let mut src = [0u8; 6];
        bytes.read_exact(&mut src)?;
        let typ = bytes.read_u16::<BigEndian>()?;
        let (dl_vlan, dl_typ) = if typ == ETH_TYPE_VLAN {
            if buf.len() < 18 {
                return Err(Error::Truncated {
                    what: "vlan tag",
                    need: 18,
                    have: buf.len(),
                });
            }
            let tci = bytes.read_u16::<BigEndian>()?;
            (Some(tci & 0xfff), bytes.read_u16::<BigEndian>()?)
        } else {
            (None, typ)
        };
        let ip = if dl_typ == ETH_TYPE_IP {
            Ipv4Meta::parse(&mut bytes)
        } else {
            None
        };
        Ok(EthFrame {
            dl_src: MacAddr(src),
            dl_dst: MacAddr(dst),
            dl_vlan,
            dl_typ,
            ip,
        })
    }
}
