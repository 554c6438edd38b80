use std::io;

use crate::openflow0x01::MsgCode;

/// Errors surfaced by the wire codec, the switch transport, and the
/// operator console.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A message body is shorter than its type requires.
    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("unknown OpenFlow message code {0}")]
    UnknownMsgCode(u8),

    /// A wire field holds a value its enum does not define.
    #[error("bad {what} value {value}")]
    BadEnumValue { what: &'static str, value: u64 },

    /// A well-formed message of a type this controller does not act on.
    #[error("unhandled OpenFlow message {0:?}")]
    UnhandledMessage(MsgCode),

    /// Marshal was asked for a switch-to-controller message type.
    #[error("{0} is receive-only, the controller never sends it")]
    NotSendable(&'static str),

    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),

    #[error("no firewall rule for {0}")]
    RuleNotFound(String),

    #[error("switch {0} is not connected")]
    SwitchNotConnected(String),

    #[error("bad command: {0}")]
    BadCommand(String),
}

pub type Result<T> = std::result::Result<T, Error>;
