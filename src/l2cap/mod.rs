//! Logical Link Control and Adaptation Protocol: fixed channels, classic
//! dynamic channels with Enhanced Retransmission Mode, and LE
//! Credit-Based channels ([Vol 3] Part A).

mod classic;
mod config;
mod crc;
mod erm;
mod fixed;
mod le_credit;
pub(crate) mod signal;

pub use classic::{ClassicChannel, State as ClassicState};
pub use config::{ChannelMode, ConfigOption, OptionType, RfcOption};
pub use crc::fcs;
pub use erm::{ErmChannel, ErmConfig};
pub use fixed::FixedChannel;
pub use le_credit::{LeCreditChannel, LeCreditConfig};
pub use signal::{
    command_reject, ConnParamUpdate, ConnParamUpdateResult, ConnectionRequest, ConnectionResponse,
    ConnectionResult, Disconnection, FlowControlCredit, InfoResult, InfoType,
    LeCreditConnectionRequest, LeCreditConnectionResponse, LeCreditResult, RejectReason, SignalCode,
};

use crate::hci::ConnHandle;

/// Well-known SDP L2CAP PSM ([SPEC_FULL] Section 4.4.2).
pub const PSM_SDP: u16 = 0x0001;

/// Fixed channel identifiers assigned by the core spec ([Vol 3] Part A,
/// Section 2.1, Table 2.1).
pub mod cid {
    pub const NULL: u16 = 0x0000;
    pub const SIGNALING: u16 = 0x0001;
    pub const CONNECTIONLESS: u16 = 0x0002;
    pub const ATT: u16 = 0x0004;
    pub const LE_SIGNALING: u16 = 0x0005;
    pub const SMP: u16 = 0x0006;
    pub const SMP_BR: u16 = 0x0007;
    pub const DYNAMIC_START: u16 = 0x0040;
    pub const LE_DYNAMIC_START: u16 = 0x0040;
}

/// L2CAP PDU header: 2-byte length, 2-byte channel id
/// ([Vol 3] Part A, Section 3.1).
pub const PDU_HDR: usize = 4;

/// Splits a reassembled ACL SDU into its L2CAP length/CID header and
/// payload, validating that the declared length matches.
pub fn split_pdu(sdu: &[u8]) -> crate::Result<(u16, &[u8])> {
    if sdu.len() < PDU_HDR {
        return Err(crate::Error::invalid_packet("l2cap PDU shorter than header"));
    }
    let len = u16::from_le_bytes([sdu[0], sdu[1]]);
    let cid = u16::from_le_bytes([sdu[2], sdu[3]]);
    let payload = &sdu[PDU_HDR..];
    if payload.len() != usize::from(len) {
        return Err(crate::Error::invalid_packet("l2cap length field mismatch"));
    }
    Ok((cid, payload))
}

/// Frames a channel payload into an L2CAP Basic-mode PDU.
#[must_use]
pub fn frame_pdu(cid: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(PDU_HDR + payload.len());
    v.extend_from_slice(&u16::try_from(payload.len()).unwrap_or(u16::MAX).to_le_bytes());
    v.extend_from_slice(&cid.to_le_bytes());
    v.extend_from_slice(payload);
    v
}

/// Frames a channel payload into an ERM-mode PDU, appending the 2-byte FCS
/// over the control field and payload when `with_fcs` is set ([SPEC_FULL]
/// Section 4.3, FCS option).
#[must_use]
pub fn frame_pdu_checked(cid: u16, frame: &[u8], with_fcs: bool) -> Vec<u8> {
    if !with_fcs {
        return frame_pdu(cid, frame);
    }
    let mut body = frame.to_vec();
    body.extend_from_slice(&crc::fcs(frame).to_le_bytes());
    frame_pdu(cid, &body)
}

/// Splits a received ERM-mode PDU payload into its frame and validates the
/// trailing FCS, if present. Returns the frame with the FCS trailer
/// removed.
pub fn split_fcs(payload: &[u8], with_fcs: bool) -> crate::Result<&[u8]> {
    if !with_fcs {
        return Ok(payload);
    }
    if payload.len() < 2 {
        return Err(crate::Error::invalid_packet("ERM frame shorter than FCS trailer"));
    }
    let (frame, trailer) = payload.split_at(payload.len() - 2);
    let want = u16::from_le_bytes([trailer[0], trailer[1]]);
    if crc::fcs(frame) != want {
        return Err(crate::Error::invalid_packet("ERM frame FCS mismatch"));
    }
    Ok(frame)
}

/// 8-byte fixed-channels-supported bitmap returned by
/// `L2CAP_Information_Response` for [`InfoType::FixedChannelsSupported`]
/// ([Vol 3] Part A, Section 4.12): bit 1 is the signaling channel, bit 2
/// the connectionless channel, bit 4 ATT, bit 5 LE signaling, bit 6 SMP.
#[must_use]
pub fn fixed_channels_bitmap() -> u64 {
    (1 << 1) | (1 << 2) | (1 << 4) | (1 << 5) | (1 << 6)
}

/// Per-connection table of open channels (fixed and dynamic), owned by the
/// [`crate::device`] orchestrator. The orchestrator routes inbound PDUs
/// itself using [`ChannelManager::classify`] to pick a fixed-channel
/// handler or look up a dynamic channel by [`ChannelId`].
#[derive(Debug, Default)]
pub struct ChannelManager {
    next_local_cid: u16,
}

impl ChannelManager {
    /// Creates a manager whose next allocated dynamic CID starts at
    /// [`cid::DYNAMIC_START`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_local_cid: cid::DYNAMIC_START,
        }
    }

    /// Allocates the next local dynamic channel id for `handle`.
    pub fn alloc_cid(&mut self) -> u16 {
        let c = self.next_local_cid;
        self.next_local_cid = self.next_local_cid.wrapping_add(1).max(cid::DYNAMIC_START);
        c
    }

    /// Routes an inbound L2CAP PDU by CID. Returns `Err` if the CID is not
    /// one of the fixed channels recognized here; dynamic-channel lookup
    /// is the caller's (device orchestrator's) responsibility since it
    /// owns the per-connection channel table.
    pub fn classify(cid: u16) -> FixedOrDynamic {
        match cid {
            cid::SIGNALING | cid::LE_SIGNALING => FixedOrDynamic::Signaling,
            cid::ATT => FixedOrDynamic::Att,
            cid::SMP | cid::SMP_BR => FixedOrDynamic::Smp,
            c if c >= cid::DYNAMIC_START => FixedOrDynamic::Dynamic(c),
            c => FixedOrDynamic::Unknown(c),
        }
    }
}

/// Classification of an inbound CID, used to route a PDU to the right
/// collaborator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FixedOrDynamic {
    Signaling,
    Att,
    Smp,
    Dynamic(u16),
    Unknown(u16),
}

/// Endpoint identity for a dynamic channel: the connection it belongs to
/// plus its local (host-assigned) channel id.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ChannelId {
    pub handle: ConnHandle,
    pub local_cid: u16,
}
