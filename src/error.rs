//! Crate-wide error taxonomy ([SPEC_FULL] Section 7).

use thiserror::Error;

use crate::hci::{Opcode, Status};

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type. Component-local error enums convert into this one
/// at the boundary where they cross into caller-facing APIs.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A status code returned by the controller in response to a command or
    /// as part of an event ([Vol 1] Part F).
    #[error("controller error: {0}")]
    Controller(#[from] Status),

    /// A peer-side protocol violation (L2CAP rejection, SDP error code, ATT
    /// error).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A caller-side contract violation (bad PSM, MTU out of range, unknown
    /// PHY, …).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was issued in the wrong lifecycle state (double pair,
    /// connect while connecting, …).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Failed to decode an incoming packet.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// A command completed with a non-success status.
    #[error("command {opcode} failed: {status}")]
    CommandFailed { opcode: Opcode, status: Status },

    /// The controller sent an event (or LE meta-event subevent) this crate
    /// does not recognize.
    #[error("unknown event code {code:#04X} (subevent {subevent:#04X})")]
    UnknownEvent { code: u8, subevent: u8 },

    /// No free CID, no free handle, or the command pipeline is saturated.
    #[error("out of resources: {0}")]
    OutOfResources(String),

    /// An LE Credit-Based Connection channel has no receive credits left
    /// to send the requested K-frames.
    #[error("insufficient LE credits to send SDU")]
    InsufficientCredits,

    /// A command or operation timed out.
    #[error("timeout")]
    Timeout,

    /// The connection underlying a pending operation was lost.
    #[error("disconnected")]
    Disconnected,

    /// The transport's send/recv endpoint returned an I/O error.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Shorthand for [`Error::Protocol`].
    #[must_use]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Shorthand for [`Error::InvalidArgument`].
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Shorthand for [`Error::InvalidState`].
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Shorthand for [`Error::InvalidPacket`].
    #[must_use]
    pub fn invalid_packet(msg: impl Into<String>) -> Self {
        Self::InvalidPacket(msg.into())
    }

    /// Shorthand for [`Error::OutOfResources`].
    #[must_use]
    pub fn out_of_resources(msg: impl Into<String>) -> Self {
        Self::OutOfResources(msg.into())
    }
}
