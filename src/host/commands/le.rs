//! LE Controller commands ([Vol 4] Part E, Section 7.8).

use std::time::Duration;

use crate::error::Result;
use crate::gap::{Addr, RawAddr};
use crate::hci::{ticks_10ms, ticks_1250us, ticks_625us, ConnHandle, Opcode, Status, SubeventCode};
use crate::host::{Host, Transport};

impl<T: Transport> Host<T> {
    /// Configures which LE meta-event subevents can be generated.
    pub async fn le_set_event_mask(&self, enable: LeEventMask) -> Result<()> {
        self.exec_params(Opcode::LeSetEventMask, |cmd| {
            cmd.u64(enable.0);
        })
        .await?;
        Ok(())
    }

    /// Returns the controller's LE ACL (and, if supported, ISO) packet
    /// size and count limits.
    pub async fn le_read_buffer_size(&self) -> Result<LeBufferSize> {
        match self.exec(Opcode::LeReadBufferSizeV2).await {
            Ok(raw) => Ok(LeBufferSize::decode(&raw, true)),
            Err(crate::Error::CommandFailed {
                status: Status::UnknownCommand,
                ..
            }) => {
                let raw = self.exec(Opcode::LeReadBufferSize).await?;
                Ok(LeBufferSize::decode(&raw, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Sets the controller's random device address
    /// ([Vol 4] Part E, Section 7.8.4).
    pub async fn le_set_random_address(&self, addr: RawAddr) -> Result<()> {
        self.exec_params(Opcode::LeSetRandomAddress, |cmd| {
            cmd.put(addr.0);
        })
        .await?;
        Ok(())
    }

    /// Sets legacy advertising parameters
    /// ([Vol 4] Part E, Section 7.8.5).
    pub async fn le_set_advertising_parameters(&self, p: &LegacyAdvParams) -> Result<()> {
        self.exec_params(Opcode::LeSetAdvertisingParameters, |cmd| {
            cmd.u16(ticks_625us(p.interval.0).unwrap_or(0x0800))
                .u16(ticks_625us(p.interval.1).unwrap_or(0x0800))
                .u8(p.adv_type)
                .u8(u8::from(p.own_addr_is_random))
                .u8(u8::from(!p.peer_addr.is_public()))
                .put(p.peer_addr.raw().0)
                .u8(p.channel_map)
                .u8(p.filter_policy);
        })
        .await?;
        Ok(())
    }

    /// Sets legacy advertising data ([Vol 4] Part E, Section 7.8.7).
    pub async fn le_set_advertising_data(&self, data: &[u8]) -> Result<()> {
        self.exec_params(Opcode::LeSetAdvertisingData, |cmd| {
            cmd.u8(u8::try_from(data.len()).unwrap_or(31));
            let mut padded = [0u8; 31];
            padded[..data.len().min(31)].copy_from_slice(&data[..data.len().min(31)]);
            cmd.put(padded);
        })
        .await?;
        Ok(())
    }

    /// Sets legacy scan response data ([Vol 4] Part E, Section 7.8.8).
    pub async fn le_set_scan_response_data(&self, data: &[u8]) -> Result<()> {
        self.exec_params(Opcode::LeSetScanResponseData, |cmd| {
            cmd.u8(u8::try_from(data.len()).unwrap_or(31));
            let mut padded = [0u8; 31];
            padded[..data.len().min(31)].copy_from_slice(&data[..data.len().min(31)]);
            cmd.put(padded);
        })
        .await?;
        Ok(())
    }

    /// Enables or disables legacy advertising
    /// ([Vol 4] Part E, Section 7.8.9).
    pub async fn le_set_advertising_enable(&self, enable: bool) -> Result<()> {
        self.exec_params(Opcode::LeSetAdvertisingEnable, |cmd| {
            cmd.bool(enable);
        })
        .await?;
        Ok(())
    }

    /// Sets scanning parameters ([Vol 4] Part E, Section 7.8.10).
    pub async fn le_set_scan_parameters(&self, p: &ScanParams) -> Result<()> {
        self.exec_params(Opcode::LeSetScanParameters, |cmd| {
            cmd.u8(u8::from(p.active))
                .u16(ticks_625us(p.interval).unwrap_or(0x0010))
                .u16(ticks_625us(p.window).unwrap_or(0x0010))
                .u8(u8::from(p.own_addr_is_random))
                .u8(p.filter_policy);
        })
        .await?;
        Ok(())
    }

    /// Enables or disables scanning ([Vol 4] Part E, Section 7.8.11).
    pub async fn le_set_scan_enable(&self, enable: bool, filter_duplicates: bool) -> Result<()> {
        self.exec_params(Opcode::LeSetScanEnable, |cmd| {
            cmd.bool(enable).bool(filter_duplicates);
        })
        .await?;
        Ok(())
    }

    /// Creates a connection to a peer ([Vol 4] Part E, Section 7.8.12).
    /// Completion arrives asynchronously as an
    /// `HCI_LE_Connection_Complete` event; this command itself only
    /// returns `HCI_Command_Status`.
    pub async fn le_create_connection(&self, p: &ConnectParams) -> Result<()> {
        self.exec_params(Opcode::LeCreateConnection, |cmd| {
            cmd.u16(ticks_625us(p.scan_interval).unwrap_or(0x0010))
                .u16(ticks_625us(p.scan_window).unwrap_or(0x0010))
                .u8(u8::from(p.use_filter_accept_list))
                .u8(u8::from(!p.peer_addr.is_public()))
                .put(p.peer_addr.raw().0)
                .u8(u8::from(p.own_addr_is_random))
                .u16(ticks_1250us(p.conn_interval.0).unwrap_or(0x0018))
                .u16(ticks_1250us(p.conn_interval.1).unwrap_or(0x0028))
                .u16(p.peripheral_latency)
                .u16(ticks_10ms(p.supervision_timeout).unwrap_or(0x01F4))
                .u16(0u16)
                .u16(0xFFFFu16);
        })
        .await?;
        Ok(())
    }

    /// Cancels a pending connection creation ([Vol 4] Part E, Section
    /// 7.8.13).
    pub async fn le_create_connection_cancel(&self) -> Result<()> {
        self.exec(Opcode::LeCreateConnectionCancel).await?;
        Ok(())
    }

    /// Requests new connection parameters ([Vol 4] Part E, Section
    /// 7.8.18).
    pub async fn le_connection_update(&self, handle: ConnHandle, p: &ConnUpdateParams) -> Result<()> {
        self.exec_params(Opcode::LeConnectionUpdate, |cmd| {
            cmd.u16(handle)
                .u16(ticks_1250us(p.interval.0).unwrap_or(0x0018))
                .u16(ticks_1250us(p.interval.1).unwrap_or(0x0028))
                .u16(p.peripheral_latency)
                .u16(ticks_10ms(p.supervision_timeout).unwrap_or(0x01F4))
                .u16(0u16)
                .u16(0xFFFFu16);
        })
        .await?;
        Ok(())
    }

    /// Replies to an `HCI_LE_Long_Term_Key_Request` event with the Long
    /// Term Key for the connection, or a negative reply if none is on
    /// record ([Vol 4] Part E, Section 7.8.24, 7.8.25).
    pub async fn le_long_term_key_request_reply(
        &self,
        handle: ConnHandle,
        key: Option<&crate::crypto::Ltk>,
    ) -> Result<()> {
        if let Some(k) = key {
            self.exec_params(Opcode::LeLongTermKeyRequestReply, |cmd| {
                cmd.u16(handle).u128(k.as_bytes());
            })
            .await?;
        } else {
            self.exec_params(Opcode::LeLongTermKeyRequestNegativeReply, |cmd| {
                cmd.u16(handle);
            })
            .await?;
        }
        Ok(())
    }

    /// Adds a peer identity address and IRK pair to the resolving list
    /// ([Vol 4] Part E, Section 7.8.38).
    pub async fn le_add_device_to_resolving_list(
        &self,
        peer: Addr,
        peer_irk: &crate::crypto::Irk,
        local_irk: &crate::crypto::Irk,
    ) -> Result<()> {
        self.exec_params(Opcode::LeAddDeviceToResolvingList, |cmd| {
            cmd.u8(u8::from(!peer.is_public()))
                .put(peer.raw().0)
                .u128(peer_irk.as_bytes())
                .u128(local_irk.as_bytes());
        })
        .await?;
        Ok(())
    }

    /// Removes a peer identity address from the resolving list
    /// ([Vol 4] Part E, Section 7.8.39).
    pub async fn le_remove_device_from_resolving_list(&self, peer: Addr) -> Result<()> {
        self.exec_params(Opcode::LeRemoveDeviceFromResolvingList, |cmd| {
            cmd.u8(u8::from(!peer.is_public())).put(peer.raw().0);
        })
        .await?;
        Ok(())
    }

    /// Clears the resolving list ([Vol 4] Part E, Section 7.8.40).
    pub async fn le_clear_resolving_list(&self) -> Result<()> {
        self.exec(Opcode::LeClearResolvingList).await?;
        Ok(())
    }

    /// Enables or disables address resolution in the controller
    /// ([Vol 4] Part E, Section 7.8.44).
    pub async fn le_set_address_resolution_enable(&self, enable: bool) -> Result<()> {
        self.exec_params(Opcode::LeSetAddressResolutionEnable, |cmd| {
            cmd.bool(enable);
        })
        .await?;
        Ok(())
    }
}

/// `HCI_LE_Set_Event_Mask` command parameters ([Vol 4] Part E, Section
/// 7.8.1).
#[derive(Clone, Copy, Debug)]
#[repr(transparent)]
pub struct LeEventMask(u64);

impl LeEventMask {
    /// Builds a mask enabling the given subevents.
    #[must_use]
    pub fn enable(events: impl Iterator<Item = SubeventCode>) -> Self {
        Self(events.fold(0, |m, c| m | c.mask_bit()))
    }
}

/// `HCI_LE_Read_Buffer_Size[V2]` return parameters ([Vol 4] Part E,
/// Section 7.8.2, 7.8.158).
#[derive(Clone, Copy, Debug, Default)]
pub struct LeBufferSize {
    pub acl_data_len: u16,
    pub acl_num_pkts: u8,
    pub iso_data_len: u16,
    pub iso_num_pkts: u8,
}

impl LeBufferSize {
    fn decode(raw: &[u8], v2: bool) -> Self {
        let mut u = structbuf::Unpacker::new(raw);
        Self {
            acl_data_len: u.u16(),
            acl_num_pkts: u.u8(),
            iso_data_len: if v2 { u.u16() } else { 0 },
            iso_num_pkts: if v2 { u.u8() } else { 0 },
        }
    }
}

/// Legacy advertising parameters ([Vol 4] Part E, Section 7.8.5).
#[derive(Clone, Debug)]
pub struct LegacyAdvParams {
    pub interval: (Duration, Duration),
    pub adv_type: u8,
    pub own_addr_is_random: bool,
    pub peer_addr: Addr,
    pub channel_map: u8,
    pub filter_policy: u8,
}

/// Scanning parameters ([Vol 4] Part E, Section 7.8.10).
#[derive(Clone, Copy, Debug)]
pub struct ScanParams {
    pub active: bool,
    pub interval: Duration,
    pub window: Duration,
    pub own_addr_is_random: bool,
    pub filter_policy: u8,
}

/// `HCI_LE_Create_Connection` command parameters ([Vol 4] Part E, Section
/// 7.8.12).
#[derive(Clone, Debug)]
pub struct ConnectParams {
    pub scan_interval: Duration,
    pub scan_window: Duration,
    pub use_filter_accept_list: bool,
    pub peer_addr: Addr,
    pub own_addr_is_random: bool,
    pub conn_interval: (Duration, Duration),
    pub peripheral_latency: u16,
    pub supervision_timeout: Duration,
}

/// `HCI_LE_Connection_Update` command parameters ([Vol 4] Part E,
/// Section 7.8.18).
#[derive(Clone, Copy, Debug)]
pub struct ConnUpdateParams {
    pub interval: (Duration, Duration),
    pub peripheral_latency: u16,
    pub supervision_timeout: Duration,
}

