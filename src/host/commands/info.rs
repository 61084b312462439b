//! Informational Parameters commands ([Vol 4] Part E, Section 7.4).

use crate::error::Result;
use crate::hci::Opcode;
use crate::host::{Host, Transport};

impl<T: Transport> Host<T> {
    /// Returns the controller's HCI version, LMP/PAL version, and
    /// manufacturer name ([Vol 4] Part E, Section 7.4.1).
    pub async fn read_local_version_information(&self) -> Result<LocalVersionInformation> {
        let raw = self.exec(Opcode::ReadLocalVersionInformation).await?;
        Ok(LocalVersionInformation::decode(&raw))
    }

    /// Returns the bitmask of HCI commands the controller supports
    /// ([Vol 4] Part E, Section 7.4.2).
    pub async fn read_local_supported_commands(&self) -> Result<[u8; 64]> {
        let raw = self.exec(Opcode::ReadLocalSupportedCommands).await?;
        let mut bits = [0u8; 64];
        bits.copy_from_slice(&raw[..64]);
        Ok(bits)
    }

    /// Returns the bitmask of LMP/LL features the controller supports
    /// ([Vol 4] Part E, Section 7.4.3).
    pub async fn read_local_supported_features(&self) -> Result<u64> {
        let raw = self.exec(Opcode::ReadLocalSupportedFeatures).await?;
        Ok(u64::from_le_bytes(raw[..8].try_into().unwrap()))
    }

    /// Returns the controller's classic ACL/SCO buffer size and count
    /// limits ([Vol 4] Part E, Section 7.4.5).
    pub async fn read_buffer_size(&self) -> Result<BufferSize> {
        let raw = self.exec(Opcode::ReadBufferSize).await?;
        Ok(BufferSize::decode(&raw))
    }

    /// Returns the bitmask of LE features the controller supports
    /// ([Vol 4] Part E, Section 7.8.3).
    pub async fn le_read_local_supported_features(&self) -> Result<u64> {
        let raw = self.exec(Opcode::LeReadLocalSupportedFeatures).await?;
        Ok(u64::from_le_bytes(raw[..8].try_into().unwrap()))
    }
}

/// `HCI_Read_Local_Version_Information` return parameters ([Vol 4] Part E,
/// Section 7.4.1).
#[derive(Clone, Copy, Debug)]
pub struct LocalVersionInformation {
    pub hci_version: u8,
    pub hci_revision: u16,
    pub lmp_version: u8,
    pub manufacturer_name: u16,
    pub lmp_subversion: u16,
}

impl LocalVersionInformation {
    fn decode(raw: &[u8]) -> Self {
        let mut u = structbuf::Unpacker::new(raw);
        Self {
            hci_version: u.u8(),
            hci_revision: u.u16(),
            lmp_version: u.u8(),
            manufacturer_name: u.u16(),
            lmp_subversion: u.u16(),
        }
    }
}

/// `HCI_Read_Buffer_Size` return parameters ([Vol 4] Part E, Section 7.4.5).
#[derive(Clone, Copy, Debug)]
pub struct BufferSize {
    pub acl_data_len: u16,
    pub sco_data_len: u8,
    pub acl_num_pkts: u16,
    pub sco_num_pkts: u16,
}

impl BufferSize {
    fn decode(raw: &[u8]) -> Self {
        let mut u = structbuf::Unpacker::new(raw);
        Self {
            acl_data_len: u.u16(),
            sco_data_len: u.u8(),
            acl_num_pkts: u.u16(),
            sco_num_pkts: u.u16(),
        }
    }
}
