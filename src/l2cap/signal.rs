//! L2CAP signaling commands ([Vol 3] Part A, Section 4), carried on the
//! classic (0x0001) or LE (0x0005) signaling fixed channels.

use structbuf::Unpacker;

use crate::error::{Error, Result};

/// Signaling command codes ([Vol 3] Part A, Section 4).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive, strum::Display)]
#[non_exhaustive]
#[repr(u8)]
pub enum SignalCode {
    CommandReject = 0x01,
    ConnectionRequest = 0x02,
    ConnectionResponse = 0x03,
    ConfigureRequest = 0x04,
    ConfigureResponse = 0x05,
    DisconnectionRequest = 0x06,
    DisconnectionResponse = 0x07,
    EchoRequest = 0x08,
    EchoResponse = 0x09,
    InformationRequest = 0x0A,
    InformationResponse = 0x0B,
    ConnectionParameterUpdateRequest = 0x12,
    ConnectionParameterUpdateResponse = 0x13,
    LeCreditBasedConnectionRequest = 0x14,
    LeCreditBasedConnectionResponse = 0x15,
    FlowControlCreditIndex = 0x16,
}

/// Signaling command header: code (1) + identifier (1) + data length (2)
/// ([Vol 3] Part A, Section 4).
pub const SIG_HDR: usize = 4;

/// Decodes the header of a signaling command, returning the code,
/// identifier, and the remaining data as an `Unpacker`.
pub fn parse_header(pdu: &[u8]) -> Result<(SignalCode, u8, Unpacker<'_>)> {
    if pdu.len() < SIG_HDR {
        return Err(Error::invalid_packet("signaling command shorter than header"));
    }
    let code = SignalCode::try_from(pdu[0])
        .map_err(|_| Error::invalid_packet("unknown signaling code"))?;
    let id = pdu[1];
    let len = usize::from(u16::from_le_bytes([pdu[2], pdu[3]]));
    let data = &pdu[SIG_HDR..];
    if data.len() != len {
        return Err(Error::invalid_packet("signaling command length mismatch"));
    }
    Ok((code, id, Unpacker::new(data)))
}

/// Builds a signaling command with a data block written by `f`.
pub fn build(code: SignalCode, id: u8, f: impl FnOnce(&mut crate::hci::Command)) -> Vec<u8> {
    let mut body = crate::hci::Command::default();
    f(&mut body);
    let body = body.into_bytes();
    let mut v = Vec::with_capacity(SIG_HDR + body.len());
    v.push(code as u8);
    v.push(id);
    v.extend_from_slice(&u16::try_from(body.len()).unwrap_or(u16::MAX).to_le_bytes());
    v.extend_from_slice(&body);
    v
}

/// `L2CAP_Connection_Parameter_Update_Request` / `..._Response` payload
/// ([Vol 3] Part A, Section 4.20).
#[derive(Clone, Copy, Debug)]
pub struct ConnParamUpdate {
    pub interval_min: u16,
    pub interval_max: u16,
    pub peripheral_latency: u16,
    pub timeout_multiplier: u16,
}

impl ConnParamUpdate {
    /// Decodes a request payload.
    pub fn decode(u: &mut Unpacker<'_>) -> Self {
        Self {
            interval_min: u.u16(),
            interval_max: u.u16(),
            peripheral_latency: u.u16(),
            timeout_multiplier: u.u16(),
        }
    }

    /// Encodes the request payload.
    pub fn encode(&self, cmd: &mut crate::hci::Command) {
        cmd.u16(self.interval_min)
            .u16(self.interval_max)
            .u16(self.peripheral_latency)
            .u16(self.timeout_multiplier);
    }
}

/// `L2CAP_Connection_Parameter_Update_Response` result codes
/// ([Vol 3] Part A, Section 4.21).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive)]
#[repr(u16)]
pub enum ConnParamUpdateResult {
    Accepted = 0x0000,
    Rejected = 0x0001,
}

/// `L2CAP_Command_Reject` reason codes ([Vol 3] Part A, Section 4.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive)]
#[repr(u16)]
pub enum RejectReason {
    CommandNotUnderstood = 0x0000,
    SignalingMtuExceeded = 0x0001,
    InvalidCid = 0x0002,
}

/// Builds a `L2CAP_Command_Reject` response ([Vol 3] Part A, Section 4.1).
/// `data` carries the reason-specific extra parameters (none for
/// `CommandNotUnderstood`, the actual MTU for `SignalingMtuExceeded`, the
/// two offending CIDs for `InvalidCid`).
#[must_use]
pub fn command_reject(id: u8, reason: RejectReason, data: &[u8]) -> Vec<u8> {
    build(SignalCode::CommandReject, id, |cmd| {
        cmd.u16(reason as u16).put(data);
    })
}

/// `L2CAP_Connection_Request` payload ([Vol 3] Part A, Section 4.2).
#[derive(Clone, Copy, Debug)]
pub struct ConnectionRequest {
    pub psm: u16,
    pub scid: u16,
}

impl ConnectionRequest {
    pub fn decode(u: &mut Unpacker<'_>) -> Self {
        Self {
            psm: u.u16(),
            scid: u.u16(),
        }
    }

    pub fn encode(&self, cmd: &mut crate::hci::Command) {
        cmd.u16(self.psm).u16(self.scid);
    }
}

/// `L2CAP_Connection_Response` result codes ([Vol 3] Part A, Section 4.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive)]
#[repr(u16)]
pub enum ConnectionResult {
    Success = 0x0000,
    Pending = 0x0001,
    RefusedPsmNotSupported = 0x0002,
    RefusedSecurityBlock = 0x0003,
    RefusedNoResources = 0x0004,
    RefusedInvalidSourceCid = 0x0006,
    RefusedSourceCidAlreadyAllocated = 0x0007,
}

/// `L2CAP_Connection_Response` payload ([Vol 3] Part A, Section 4.3).
#[derive(Clone, Copy, Debug)]
pub struct ConnectionResponse {
    pub dcid: u16,
    pub scid: u16,
    pub result: ConnectionResult,
    pub status: u16,
}

impl ConnectionResponse {
    pub fn decode(u: &mut Unpacker<'_>) -> Result<Self> {
        let dcid = u.u16();
        let scid = u.u16();
        let result = ConnectionResult::try_from(u.u16())
            .map_err(|_| Error::invalid_packet("unknown connection result"))?;
        let status = u.u16();
        Ok(Self { dcid, scid, result, status })
    }

    pub fn encode(&self, cmd: &mut crate::hci::Command) {
        cmd.u16(self.dcid).u16(self.scid).u16(self.result as u16).u16(self.status);
    }
}

/// `L2CAP_Disconnection_Request` / `..._Response` payload ([Vol 3] Part A,
/// Section 4.6, 4.7): both carry the same `(dcid, scid)` pair.
#[derive(Clone, Copy, Debug)]
pub struct Disconnection {
    pub dcid: u16,
    pub scid: u16,
}

impl Disconnection {
    pub fn decode(u: &mut Unpacker<'_>) -> Self {
        Self {
            dcid: u.u16(),
            scid: u.u16(),
        }
    }

    pub fn encode(&self, cmd: &mut crate::hci::Command) {
        cmd.u16(self.dcid).u16(self.scid);
    }
}

/// `L2CAP_Information_Request` info type codes ([Vol 3] Part A, Section
/// 4.10, 4.11).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive)]
#[repr(u16)]
pub enum InfoType {
    ConnectionlessMtu = 0x0001,
    ExtendedFeaturesSupported = 0x0002,
    FixedChannelsSupported = 0x0003,
}

/// `L2CAP_Information_Response` result codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive)]
#[repr(u16)]
pub enum InfoResult {
    Success = 0x0000,
    NotSupported = 0x0001,
}

/// `L2CAP_LE_Credit_Based_Connection_Request` payload ([Vol 3] Part A,
/// Section 4.22).
#[derive(Clone, Copy, Debug)]
pub struct LeCreditConnectionRequest {
    pub le_psm: u16,
    pub scid: u16,
    pub mtu: u16,
    pub mps: u16,
    pub initial_credits: u16,
}

impl LeCreditConnectionRequest {
    pub fn decode(u: &mut Unpacker<'_>) -> Self {
        Self {
            le_psm: u.u16(),
            scid: u.u16(),
            mtu: u.u16(),
            mps: u.u16(),
            initial_credits: u.u16(),
        }
    }

    pub fn encode(&self, cmd: &mut crate::hci::Command) {
        cmd.u16(self.le_psm).u16(self.scid).u16(self.mtu).u16(self.mps).u16(self.initial_credits);
    }
}

/// `L2CAP_LE_Credit_Based_Connection_Response` result codes ([Vol 3] Part
/// A, Section 4.23).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive)]
#[repr(u16)]
pub enum LeCreditResult {
    Success = 0x0000,
    RefusedPsmNotSupported = 0x0002,
    RefusedNoResources = 0x0004,
    RefusedAuthenticationRequired = 0x0005,
    RefusedAuthorizationRequired = 0x0006,
    RefusedEncryptionKeySizeTooShort = 0x0007,
    RefusedInsufficientEncryption = 0x0008,
    RefusedInvalidSourceCid = 0x0009,
    RefusedSourceCidAlreadyAllocated = 0x000A,
    RefusedUnacceptableParameters = 0x000B,
}

/// `L2CAP_LE_Credit_Based_Connection_Response` payload.
#[derive(Clone, Copy, Debug)]
pub struct LeCreditConnectionResponse {
    pub dcid: u16,
    pub mtu: u16,
    pub mps: u16,
    pub initial_credits: u16,
    pub result: LeCreditResult,
}

impl LeCreditConnectionResponse {
    pub fn decode(u: &mut Unpacker<'_>) -> Result<Self> {
        let dcid = u.u16();
        let mtu = u.u16();
        let mps = u.u16();
        let initial_credits = u.u16();
        let result = LeCreditResult::try_from(u.u16())
            .map_err(|_| Error::invalid_packet("unknown LE credit connection result"))?;
        Ok(Self { dcid, mtu, mps, initial_credits, result })
    }

    pub fn encode(&self, cmd: &mut crate::hci::Command) {
        cmd.u16(self.dcid)
            .u16(self.mtu)
            .u16(self.mps)
            .u16(self.initial_credits)
            .u16(self.result as u16);
    }
}

/// `L2CAP_Flow_Control_Credit_Ind` payload ([Vol 3] Part A, Section 4.24).
#[derive(Clone, Copy, Debug)]
pub struct FlowControlCredit {
    pub cid: u16,
    pub credits: u16,
}

impl FlowControlCredit {
    pub fn decode(u: &mut Unpacker<'_>) -> Self {
        Self {
            cid: u.u16(),
            credits: u.u16(),
        }
    }

    pub fn encode(&self, cmd: &mut crate::hci::Command) {
        cmd.u16(self.cid).u16(self.credits);
    }
}
