//! Per-link connection state owned by [`crate::device::Device`]
//! ([SPEC_FULL] Section 3: Connection).

use std::time::Duration;

use crate::gap::{Addr, PhysicalTransport};
use crate::hci::{ConnHandle, Role};

/// ATT MTU every connection starts at before an `Exchange_MTU` negotiation
/// ([Vol 3] Part F, Section 3.4.2.1).
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Link-layer connection parameters in effect for a connection.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionParameters {
    pub interval: Duration,
    pub peripheral_latency: u16,
    pub supervision_timeout: Duration,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(30),
            peripheral_latency: 0,
            supervision_timeout: Duration::from_secs(4),
        }
    }
}

/// LE Data Length Extension state ([Vol 4] Part E, Section 7.8.46-.48).
#[derive(Clone, Copy, Debug, Default)]
pub struct DataLength {
    pub tx_octets: u16,
    pub tx_time: u16,
    pub rx_octets: u16,
    pub rx_time: u16,
}

/// LE PHY state ([Vol 4] Part E, Section 7.8.49).
#[derive(Clone, Copy, Debug, Default)]
pub struct Phy {
    pub tx: u8,
    pub rx: u8,
}

/// Link-layer encryption state of a connection ([SPEC_FULL] Section 3:
/// Connection).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Encryption {
    #[default]
    Off,
    /// Classic E0 or LE/Secure-Connections AES-CCM, no MITM guarantee.
    Unauthenticated,
    /// AES-CCM with Secure Connections pairing and MITM protection.
    Authenticated,
}

/// Per-link state tracked from connection establishment to teardown
/// ([SPEC_FULL] Section 3: Connection). Owned exclusively by
/// [`crate::device::Device`]'s connection map; external code only ever
/// holds a `ConnHandle` plus a snapshot `Clone` of this struct.
#[derive(Clone, Debug)]
pub struct Connection {
    pub handle: ConnHandle,
    pub transport: PhysicalTransport,
    pub peer_address: Addr,
    pub resolved_address: Option<Addr>,
    pub role: Role,
    pub parameters: ConnectionParameters,
    pub att_mtu: u16,
    pub data_length: DataLength,
    pub phy: Phy,
    pub encryption: Encryption,
    pub authenticated: bool,
}

impl Connection {
    pub(crate) fn new(
        handle: ConnHandle,
        transport: PhysicalTransport,
        peer_address: Addr,
        role: Role,
        parameters: ConnectionParameters,
    ) -> Self {
        Self {
            handle,
            transport,
            peer_address,
            resolved_address: None,
            role,
            parameters,
            att_mtu: DEFAULT_ATT_MTU,
            data_length: DataLength::default(),
            phy: Phy::default(),
            encryption: Encryption::Off,
            authenticated: false,
        }
    }
}
