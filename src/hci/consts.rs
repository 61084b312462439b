#![allow(clippy::use_self)]

use std::fmt::{self, Display, Formatter};

use bitflags::bitflags;

use OpcodeGroup::{HciControl, InfoParams, Le};

/// HCI command header size ([Vol 4] Part E, Section 5.4.1): opcode (2) +
/// parameter length (1).
pub(crate) const CMD_HDR: usize = 3;
pub(crate) const CMD_BUF: usize = CMD_HDR + u8::MAX as usize;

/// HCI ACL data header size ([Vol 4] Part E, Section 5.4.2): handle+flags
/// (2) + data total length (2).
pub(crate) const ACL_HDR: usize = 4;

/// HCI event header size ([Vol 4] Part E, Section 5.4.4): event code (1) +
/// parameter length (1).
pub(crate) const EVT_HDR: usize = 2;
pub(crate) const EVT_BUF: usize = EVT_HDR + u8::MAX as usize;

/// Leading octet that tags every HCI packet on a shared transport
/// ([Vol 4] Part A, Section 2).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum PacketType {
    Command = 1,
    Acl = 2,
    Sco = 3,
    Event = 4,
    Iso = 5,
}

/// HCI command opcodes ([Vol 4] Part E, Section 7). Covers the commands
/// this crate issues directly; vendor and profile-specific opcodes are
/// represented generically via [`Opcode::from`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    num_enum::FromPrimitive,
    num_enum::IntoPrimitive,
    strum::Display,
)]
#[non_exhaustive]
#[repr(u16)]
pub enum Opcode {
    /// Opcode 0x0000 updates `Num_HCI_Command_Packets` only
    /// ([Vol 4] Part E, Section 7.7.14).
    #[default]
    None = 0x0000,

    // HCI Control and Baseband commands ([Vol 4] Part E, Section 7.3).
    SetEventMask = HciControl.ocf(0x0001),
    Reset = HciControl.ocf(0x0003),
    WriteLocalName = HciControl.ocf(0x0013),
    WriteScanEnable = HciControl.ocf(0x001A),
    WriteClassOfDevice = HciControl.ocf(0x0024),
    WriteInquiryMode = HciControl.ocf(0x0045),
    WriteExtendedInquiryResponse = HciControl.ocf(0x0052),
    WriteSimplePairingMode = HciControl.ocf(0x0056),
    SetEventMaskPage2 = HciControl.ocf(0x0063),
    WriteLeHostSupport = HciControl.ocf(0x006D),
    WriteSecureConnectionsHostSupport = HciControl.ocf(0x007A),

    // Link Control commands ([Vol 4] Part E, Section 7.1).
    Inquiry = OpcodeGroup::LinkControl.ocf(0x0001),
    InquiryCancel = OpcodeGroup::LinkControl.ocf(0x0002),
    CreateConnection = OpcodeGroup::LinkControl.ocf(0x0005),
    Disconnect = OpcodeGroup::LinkControl.ocf(0x0006),
    CreateConnectionCancel = OpcodeGroup::LinkControl.ocf(0x0008),
    LinkKeyRequestReply = OpcodeGroup::LinkControl.ocf(0x000B),
    LinkKeyRequestNegativeReply = OpcodeGroup::LinkControl.ocf(0x000C),

    // Informational parameters commands ([Vol 4] Part E, Section 7.4).
    ReadLocalVersionInformation = InfoParams.ocf(0x0001),
    ReadLocalSupportedCommands = InfoParams.ocf(0x0002),
    ReadLocalSupportedFeatures = InfoParams.ocf(0x0003),
    ReadBufferSize = InfoParams.ocf(0x0005),
    ReadBdAddr = InfoParams.ocf(0x0009),

    // LE Controller commands ([Vol 4] Part E, Section 7.8).
    LeSetEventMask = Le.ocf(0x0001),
    LeReadBufferSize = Le.ocf(0x0002),
    LeReadLocalSupportedFeatures = Le.ocf(0x0003),
    LeSetRandomAddress = Le.ocf(0x0005),
    LeSetAdvertisingParameters = Le.ocf(0x0006),
    LeSetAdvertisingData = Le.ocf(0x0008),
    LeSetScanResponseData = Le.ocf(0x0009),
    LeSetAdvertisingEnable = Le.ocf(0x000A),
    LeSetScanParameters = Le.ocf(0x000B),
    LeSetScanEnable = Le.ocf(0x000C),
    LeCreateConnection = Le.ocf(0x000D),
    LeCreateConnectionCancel = Le.ocf(0x000E),
    LeConnectionUpdate = Le.ocf(0x0013),
    LeLongTermKeyRequestReply = Le.ocf(0x001A),
    LeLongTermKeyRequestNegativeReply = Le.ocf(0x001B),
    LeReadBufferSizeV2 = Le.ocf(0x0060),
    LeSetAdvertisingSetRandomAddress = Le.ocf(0x0035),
    LeSetExtendedAdvertisingParameters = Le.ocf(0x0036),
    LeSetExtendedAdvertisingData = Le.ocf(0x0037),
    LeSetExtendedScanResponseData = Le.ocf(0x0038),
    LeSetExtendedAdvertisingEnable = Le.ocf(0x0039),
    LeReadMaximumAdvertisingDataLength = Le.ocf(0x003A),
    LeReadNumberOfSupportedAdvertisingSets = Le.ocf(0x003B),
    LeRemoveAdvertisingSet = Le.ocf(0x003C),
    LeClearAdvertisingSets = Le.ocf(0x003D),
    LeSetExtendedScanParameters = Le.ocf(0x0041),
    LeSetExtendedScanEnable = Le.ocf(0x0042),
    LeExtendedCreateConnection = Le.ocf(0x0043),
    LeAddDeviceToResolvingList = Le.ocf(0x0027),
    LeRemoveDeviceFromResolvingList = Le.ocf(0x0028),
    LeClearResolvingList = Le.ocf(0x0029),
    LeSetAddressResolutionEnable = Le.ocf(0x002D),
}

impl Opcode {
    /// Returns whether the opcode is `None`.
    #[must_use]
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns whether the opcode is other than `None`.
    #[must_use]
    pub const fn is_some(self) -> bool {
        !self.is_none()
    }
}

// Opcode group field definitions ([Vol 4] Part E, Section 5.4.1).
#[derive(Clone, Copy)]
#[repr(u16)]
enum OpcodeGroup {
    LinkControl = 0x01,
    HciControl = 0x03,
    InfoParams = 0x04,
    Le = 0x08,
}

impl OpcodeGroup {
    /// Combines OGF with OCF to create a full opcode: `opcode = ogf << 10 | ocf`.
    const fn ocf(self, ocf: u16) -> u16 {
        (self as u16) << 10 | ocf
    }
}

/// HCI event codes ([Vol 4] Part E, Section 7.7).
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive, strum::Display, strum::EnumIter,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum EventCode {
    InquiryComplete = 0x01,
    InquiryResult = 0x02,
    ConnectionComplete = 0x03,
    ConnectionRequest = 0x04,
    DisconnectionComplete = 0x05,
    EncryptionChangeV1 = 0x08,
    CommandComplete = 0x0E,
    CommandStatus = 0x0F,
    NumberOfCompletedPackets = 0x13,
    LinkKeyRequest = 0x17,
    DataBufferOverflow = 0x1A,
    ExtendedInquiryResult = 0x2F,
    EncryptionChangeV2 = 0x59,
    LeMetaEvent = 0x3E,
}

/// LE meta-event subevent codes ([Vol 4] Part E, Section 7.7.65).
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive, strum::Display, strum::EnumIter,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum SubeventCode {
    ConnectionComplete = 0x01,
    AdvertisingReport = 0x02,
    ConnectionUpdateComplete = 0x03,
    LongTermKeyRequest = 0x05,
    DataLengthChange = 0x07,
    EnhancedConnectionComplete = 0x0A,
    DirectedAdvertisingReport = 0x0B,
    PhyUpdateComplete = 0x0C,
    ExtendedAdvertisingReport = 0x0D,
    ScanTimeout = 0x11,
    AdvertisingSetTerminated = 0x12,
    ScanRequestReceived = 0x13,
    ChannelSelectionAlgorithm = 0x14,
}

bitflags! {
    /// Which optional fields are present in an event's parameters, used to
    /// drive the common prefix-parsing logic in [`crate::hci::event::Event`]
    /// without a fully hand-written header decode per event.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct EventFmt: u8 {
        const STATUS      = 1 << 0;
        const HANDLE      = 1 << 1;
        const CONN_HANDLE = 1 << 2;
        const ADV_HANDLE  = 1 << 3;
        const BIG_HANDLE  = 1 << 4;
    }
}

impl EventCode {
    /// Returns this event's bit position in `Set_Event_Mask`/
    /// `Set_Event_Mask_Page_2` ([Vol 4] Part E, Section 7.3.1, 7.3.69).
    /// `CommandComplete`/`CommandStatus` are always enabled and have no
    /// mask bit.
    #[must_use]
    pub const fn mask_bit(self) -> u64 {
        match self {
            Self::InquiryComplete => 1 << 0,
            Self::InquiryResult => 1 << 1,
            Self::ConnectionComplete => 1 << 2,
            Self::ConnectionRequest => 1 << 3,
            Self::DisconnectionComplete => 1 << 4,
            Self::EncryptionChangeV1 | Self::EncryptionChangeV2 => 1 << 7,
            Self::LinkKeyRequest => 1 << 17,
            Self::DataBufferOverflow => 1 << 21,
            Self::ExtendedInquiryResult => 1 << 38,
            Self::NumberOfCompletedPackets => 1 << 27,
            Self::LeMetaEvent => 1 << 61,
            Self::CommandComplete | Self::CommandStatus => 0,
        }
    }

    /// Returns the format of this event's leading parameters.
    #[must_use]
    pub const fn param_fmt(self) -> EventFmt {
        match self {
            Self::ConnectionComplete
            | Self::DisconnectionComplete
            | Self::EncryptionChangeV1
            | Self::EncryptionChangeV2 => {
                EventFmt::from_bits_truncate(EventFmt::STATUS.bits() | EventFmt::CONN_HANDLE.bits())
            }
            _ => EventFmt::empty(),
        }
    }
}

impl SubeventCode {
    /// Returns this subevent's bit position in `LE_Set_Event_Mask`
    /// ([Vol 4] Part E, Section 7.8.1): for the subevents this crate uses,
    /// bit position is `subevent code - 1`.
    #[must_use]
    pub const fn mask_bit(self) -> u64 {
        1 << (self as u8 - 1)
    }

    /// Returns the format of this subevent's leading parameters.
    #[must_use]
    pub const fn param_fmt(self) -> EventFmt {
        match self {
            Self::ConnectionComplete | Self::EnhancedConnectionComplete | Self::ConnectionUpdateComplete => {
                EventFmt::from_bits_truncate(EventFmt::STATUS.bits() | EventFmt::CONN_HANDLE.bits())
            }
            Self::LongTermKeyRequest | Self::DataLengthChange | Self::PhyUpdateComplete => {
                EventFmt::CONN_HANDLE
            }
            Self::AdvertisingSetTerminated => {
                EventFmt::from_bits_truncate(EventFmt::STATUS.bits() | EventFmt::ADV_HANDLE.bits())
            }
            _ => EventFmt::empty(),
        }
    }
}

/// HCI command status / error codes ([Vol 1] Part F).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, num_enum::FromPrimitive)]
#[non_exhaustive]
#[repr(u8)]
pub enum Status {
    #[default]
    Success = 0x00,
    UnknownCommand = 0x01,
    UnknownConnectionIdentifier = 0x02,
    HardwareFailure = 0x03,
    PageTimeout = 0x04,
    AuthenticationFailure = 0x05,
    PinOrKeyMissing = 0x06,
    MemoryCapacityExceeded = 0x07,
    ConnectionTimeout = 0x08,
    CommandDisallowed = 0x0C,
    ConnectionRejectedLimitedResources = 0x0D,
    ConnectionRejectedSecurity = 0x0E,
    ConnectionRejectedUnacceptableBdAddr = 0x0F,
    ConnectionAcceptTimeoutExceeded = 0x10,
    UnsupportedFeatureOrParameterValue = 0x11,
    InvalidHciCommandParameters = 0x12,
    RemoteUserTerminatedConnection = 0x13,
    RemoteDeviceTerminatedLowResources = 0x14,
    RemoteDevicePowerOff = 0x15,
    ConnectionTerminatedByLocalHost = 0x16,
    UnsupportedRemoteFeature = 0x1A,
    UnspecifiedError = 0x1F,
    InstantPassed = 0x28,
    ParameterOutOfMandatoryRange = 0x30,
    ControllerBusy = 0x3A,
    DirectedAdvertisingTimeout = 0x3C,
    ConnectionFailedToBeEstablished = 0x3E,
    #[num_enum(catch_all)]
    Other(u8),
}

impl Status {
    /// Returns whether the status indicates success.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Other(code) => write!(f, "unknown status {code:#04X}"),
            ref s => write!(f, "{s:?} ({:#04X})", u8::from(*s)),
        }
    }
}

impl From<Status> for u8 {
    fn from(s: Status) -> Self {
        match s {
            Status::Other(code) => code,
            Status::Success => 0x00,
            Status::UnknownCommand => 0x01,
            Status::UnknownConnectionIdentifier => 0x02,
            Status::HardwareFailure => 0x03,
            Status::PageTimeout => 0x04,
            Status::AuthenticationFailure => 0x05,
            Status::PinOrKeyMissing => 0x06,
            Status::MemoryCapacityExceeded => 0x07,
            Status::ConnectionTimeout => 0x08,
            Status::CommandDisallowed => 0x0C,
            Status::ConnectionRejectedLimitedResources => 0x0D,
            Status::ConnectionRejectedSecurity => 0x0E,
            Status::ConnectionRejectedUnacceptableBdAddr => 0x0F,
            Status::ConnectionAcceptTimeoutExceeded => 0x10,
            Status::UnsupportedFeatureOrParameterValue => 0x11,
            Status::InvalidHciCommandParameters => 0x12,
            Status::RemoteUserTerminatedConnection => 0x13,
            Status::RemoteDeviceTerminatedLowResources => 0x14,
            Status::RemoteDevicePowerOff => 0x15,
            Status::ConnectionTerminatedByLocalHost => 0x16,
            Status::UnsupportedRemoteFeature => 0x1A,
            Status::UnspecifiedError => 0x1F,
            Status::InstantPassed => 0x28,
            Status::ParameterOutOfMandatoryRange => 0x30,
            Status::ControllerBusy => 0x3A,
            Status::DirectedAdvertisingTimeout => 0x3C,
            Status::ConnectionFailedToBeEstablished => 0x3E,
        }
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_combines_ogf_and_ocf() {
        assert_eq!(u16::from(Opcode::Reset), 0x03 << 10 | 0x0003);
        assert_eq!(u16::from(Opcode::LeSetEventMask), 0x08 << 10 | 0x0001);
    }

    #[test]
    fn status_round_trips_through_primitive() {
        assert_eq!(Status::from(0x13), Status::RemoteUserTerminatedConnection);
        assert!(matches!(Status::from(0xEE), Status::Other(0xEE)));
        assert_eq!(u8::from(Status::from(0xEE)), 0xEE);
    }
}
