use std::time::Duration;

use crate::gap::{Addr, RawAddr};

use super::{duration_10ms, duration_1250us, Status};

/// Connection handle assigned by the controller ([Vol 4] Part E, Section
/// 5.4.2). The top 4 bits are reserved and always zero.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct ConnHandle(u16);

impl ConnHandle {
    /// Creates a connection handle, or `None` if `h` uses any of the
    /// reserved top 4 bits.
    #[must_use]
    pub const fn new(h: u16) -> Option<Self> {
        if h >> 12 == 0 {
            Some(Self(h))
        } else {
            None
        }
    }
}

impl From<ConnHandle> for u16 {
    #[inline]
    fn from(h: ConnHandle) -> Self {
        h.0
    }
}

/// Advertising set handle ([Vol 4] Part E, Section 7.8.53).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct AdvHandle(u8);

impl AdvHandle {
    /// Creates an advertising handle, or `None` if out of the valid range
    /// `0x00..=0xEF`.
    #[must_use]
    pub const fn new(h: u8) -> Option<Self> {
        if h <= 0xEF {
            Some(Self(h))
        } else {
            None
        }
    }
}

impl From<AdvHandle> for u8 {
    #[inline]
    fn from(h: AdvHandle) -> Self {
        h.0
    }
}

/// Link layer role assigned at connection establishment
/// ([Vol 4] Part E, Section 7.7.65.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum Role {
    Central = 0x00,
    Peripheral = 0x01,
}

/// `HCI_Connection_Complete` event parameters ([Vol 4] Part E, Section
/// 7.7.3): the classic (BR/EDR) counterpart of [`LeConnectionComplete`].
#[derive(Clone, Copy, Debug)]
pub struct ConnectionComplete {
    pub status: Status,
    pub handle: ConnHandle,
    pub peer_addr: RawAddr,
    pub encryption_enabled: bool,
}

impl ConnectionComplete {
    pub(crate) fn decode(e: &mut super::Event<'_>) -> Self {
        let status = e.status();
        let handle = e.conn_handle().expect("connection event without handle");
        let peer_addr = e.addr();
        let _link_type = e.u8();
        let encryption_enabled = e.u8() != 0;
        Self {
            status,
            handle,
            peer_addr,
            encryption_enabled,
        }
    }
}

/// `HCI_LE_Connection_Complete` / `HCI_LE_Enhanced_Connection_Complete`
/// event parameters ([Vol 4] Part E, Section 7.7.65.1, 7.7.65.10).
#[derive(Clone, Debug)]
pub struct LeConnectionComplete {
    pub status: Status,
    pub handle: ConnHandle,
    pub role: Role,
    pub peer_addr: Addr,
    pub local_rpa: RawAddr,
    pub peer_rpa: RawAddr,
    pub conn_interval: Duration,
    pub peripheral_latency: u16,
    pub supervision_timeout: Duration,
    pub central_clock_accuracy: u16,
}

impl LeConnectionComplete {
    /// Decodes parameters common to both event variants. `enhanced`
    /// selects whether the resolvable-private-address fields are present.
    pub(crate) fn decode(e: &mut super::Event<'_>, enhanced: bool) -> Self {
        let status = e.status();
        let handle = e.conn_handle().expect("connection event without handle");
        let role = Role::try_from(e.u8()).expect("invalid role");
        let peer_addr = Addr::peer(e.u8(), e.addr());
        let (local_rpa, peer_rpa) = if enhanced {
            (e.addr(), e.addr())
        } else {
            Default::default()
        };
        Self {
            status,
            handle,
            role,
            peer_addr,
            local_rpa,
            peer_rpa,
            conn_interval: duration_1250us(e.u16()),
            peripheral_latency: e.u16(),
            supervision_timeout: duration_10ms(e.u16()),
            central_clock_accuracy: match e.u8() {
                0x00 => 500,
                0x01 => 250,
                0x02 => 150,
                0x03 => 100,
                0x04 => 75,
                0x05 => 50,
                0x06 => 30,
                0x07 => 20,
                _ => 0,
            },
        }
    }
}
