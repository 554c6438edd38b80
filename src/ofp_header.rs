use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::openflow0x01::MsgCode;

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine the type and length of the remaining message, so
/// that it can be properly handled.
#[derive(Clone, Copy, Debug)]
pub struct OfpHeader {
    version: u8,
    typ: MsgCode,
    length: u16,
    xid: u32,
}

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: MsgCode, length: u16, xid: u32) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader` as laid out on the wire.
    pub const fn size() -> usize {
        8
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal(bytes: &mut Vec<u8>, header: OfpHeader) {
        bytes.write_u8(header.version()).unwrap();
        bytes.write_u8(header.type_code() as u8).unwrap();
        bytes.write_u16::<BigEndian>(header.length).unwrap();
        bytes.write_u32::<BigEndian>(header.xid()).unwrap();
    }

    /// Takes a message buffer (sized for an `OfpHeader`) and returns an
    /// `OfpHeader`, rejecting type codes OpenFlow 0x01 does not define.
    pub fn parse(buf: [u8; 8]) -> Result<OfpHeader> {
        let mut bytes = Cursor::new(&buf[..]);
        let version = bytes.read_u8()?;
        let code = bytes.read_u8()?;
        let typ = MsgCode::of_int(code).ok_or(Error::UnknownMsgCode(code))?;
        let length = bytes.read_u16::<BigEndian>()?;
        let xid = bytes.read_u32::<BigEndian>()?;
        Ok(OfpHeader {
            version,
            typ,
            length,
            xid,
        })
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the OpenFlow message type code of a header.
    pub fn type_code(&self) -> MsgCode {
        self.typ
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Return the `xid` field of a header, the transaction id associated with this
    /// message. Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> u32 {
        self.xid
    }
}
