//! Device event taxonomy ([SPEC_FULL] Section 9: Design Notes).
//!
//! The reference implementation reports activity through a dynamic,
//! any-name emitter; every name it uses becomes one struct variant here so
//! callers match exhaustively instead of string-comparing event names.

use crate::gap::{Addr, RawAddr};
use crate::hci::{ConnHandle, Status};

use super::connection::Phy;

/// One accumulated advertising report, combined with its scan response if
/// the peer is scannable and the scan was active ([SPEC_FULL] Section 3:
/// `AdvertisementAccumulator`).
#[derive(Clone, Debug)]
pub struct Advertisement {
    pub peer_address: Addr,
    pub rssi: i8,
    pub data: Vec<u8>,
    pub scan_response: Option<Vec<u8>>,
    pub connectable: bool,
    pub scannable: bool,
}

/// One classic inquiry result ([Vol 4] Part E, Section 7.7.2, 7.7.38).
#[derive(Clone, Debug)]
pub struct InquiryResult {
    pub address: RawAddr,
    pub class_of_device: u32,
    pub rssi: Option<i8>,
}

/// Top-level Device activity event. One variant per event name listed in
/// [SPEC_FULL] Section 9.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum DeviceEvent {
    /// A new connection was established, in either role.
    Connection { handle: ConnHandle },
    /// An outbound connection attempt did not complete.
    ConnectionFailure { peer: Addr, status: Status },
    /// A connection was torn down.
    Disconnection { handle: ConnHandle, reason: Status },
    /// Pairing completed successfully for a connection.
    Pairing { handle: ConnHandle },
    /// Pairing was attempted and failed.
    PairingFailure { handle: ConnHandle },
    /// A combined advertising report (plus scan response, if any) arrived.
    Advertisement(Advertisement),
    /// A classic inquiry result arrived.
    InquiryResult(InquiryResult),
    /// A peer (un)subscribed to notifications/indications on a
    /// characteristic, surfaced to the GATT server collaborator.
    CharacteristicSubscription {
        handle: ConnHandle,
        attribute_handle: u16,
        enabled: bool,
    },
    /// The device has released its transport and stopped.
    Close,
    /// The device has powered on and is ready.
    Open,
    /// A connection's link-layer parameters changed.
    ConnectionParametersUpdate { handle: ConnHandle },
    /// A connection's PHY changed.
    ConnectionPhyUpdate { handle: ConnHandle, phy: Phy },
    /// A connection's negotiated ATT MTU changed.
    ConnectionAttMtuUpdate { handle: ConnHandle, att_mtu: u16 },
    /// A connection's encryption state changed.
    ConnectionEncryptionChange { handle: ConnHandle, encrypted: bool },
    /// A connection's encryption key was refreshed without a state change.
    ConnectionEncryptionKeyRefresh { handle: ConnHandle },
}
