//! Classic (BR/EDR) Link Control and HCI Control/Baseband commands used to
//! bring a classic radio into a connectable, discoverable state
//! ([Vol 4] Part E, Section 7.1, 7.3).

use crate::error::Result;
use crate::gap::RawAddr;
use crate::hci::{ConnHandle, Opcode, Status};
use crate::host::{Host, Transport};

impl<T: Transport> Host<T> {
    /// Creates a classic ACL connection to `peer` ([Vol 4] Part E, Section
    /// 7.1.5). Completion arrives asynchronously as an
    /// `HCI_Connection_Complete` event.
    pub async fn create_connection(&self, peer: RawAddr, allow_role_switch: bool) -> Result<()> {
        self.exec_params(Opcode::CreateConnection, |cmd| {
            cmd.put(peer.0)
                .u16(0xCC18u16) // packet types: all DM/DH1-5
                .u8(0x02u8) // page scan repetition mode R2
                .u8(0u8) // reserved
                .u16(0u16) // clock offset, unknown
                .bool(allow_role_switch);
        })
        .await?;
        Ok(())
    }

    /// Terminates an existing connection, classic or LE ([Vol 4] Part E,
    /// Section 7.1.6). Completion arrives as `HCI_Disconnection_Complete`.
    pub async fn disconnect(&self, handle: ConnHandle, reason: Status) -> Result<()> {
        self.exec_params(Opcode::Disconnect, |cmd| {
            cmd.u16(handle).u8(u8::from(reason));
        })
        .await?;
        Ok(())
    }

    /// Sets the local Bluetooth device name advertised to classic peers
    /// ([Vol 4] Part E, Section 7.3.11).
    pub async fn write_local_name(&self, name: &str) -> Result<()> {
        self.exec_params(Opcode::WriteLocalName, |cmd| {
            let mut buf = [0u8; 248];
            let bytes = name.as_bytes();
            let n = bytes.len().min(247);
            buf[..n].copy_from_slice(&bytes[..n]);
            cmd.put(buf);
        })
        .await?;
        Ok(())
    }

    /// Enables inquiry scan and/or page scan ([Vol 4] Part E, Section
    /// 7.3.18): bit 0 inquiry scan, bit 1 page scan.
    pub async fn write_scan_enable(&self, inquiry_scan: bool, page_scan: bool) -> Result<()> {
        let mode = u8::from(inquiry_scan) | (u8::from(page_scan) << 1);
        self.exec_params(Opcode::WriteScanEnable, |cmd| {
            cmd.u8(mode);
        })
        .await?;
        Ok(())
    }

    /// Sets the class-of-device value advertised to classic peers
    /// ([Vol 4] Part E, Section 7.3.26).
    pub async fn write_class_of_device(&self, class_of_device: u32) -> Result<()> {
        self.exec_params(Opcode::WriteClassOfDevice, |cmd| {
            cmd.u24(class_of_device);
        })
        .await?;
        Ok(())
    }

    /// Sets the inquiry mode, always requesting the extended (RSSI plus
    /// EIR) result format ([Vol 4] Part E, Section 7.3.50).
    pub async fn write_inquiry_mode(&self) -> Result<()> {
        self.exec_params(Opcode::WriteInquiryMode, |cmd| {
            cmd.u8(0x02u8);
        })
        .await?;
        Ok(())
    }

    /// Sets the Extended Inquiry Response data broadcast during inquiry
    /// ([Vol 4] Part E, Section 7.3.56).
    pub async fn write_extended_inquiry_response(&self, data: &[u8]) -> Result<()> {
        self.exec_params(Opcode::WriteExtendedInquiryResponse, |cmd| {
            cmd.u8(0u8); // FEC not required
            let mut buf = [0u8; 240];
            let n = data.len().min(240);
            buf[..n].copy_from_slice(&data[..n]);
            cmd.put(buf);
        })
        .await?;
        Ok(())
    }

    /// Enables or disables Secure Simple Pairing ([Vol 4] Part E, Section
    /// 7.3.59).
    pub async fn write_simple_pairing_mode(&self, enable: bool) -> Result<()> {
        self.exec_params(Opcode::WriteSimplePairingMode, |cmd| {
            cmd.bool(enable);
        })
        .await?;
        Ok(())
    }

    /// Enables or disables classic Secure Connections ([Vol 4] Part E,
    /// Section 7.3.92).
    pub async fn write_secure_connections_host_support(&self, enable: bool) -> Result<()> {
        self.exec_params(Opcode::WriteSecureConnectionsHostSupport, |cmd| {
            cmd.bool(enable);
        })
        .await?;
        Ok(())
    }
}
