//! HCI Control and Baseband commands ([Vol 4] Part E, Section 7.3).

use crate::error::Result;
use crate::gap::RawAddr;
use crate::hci::{EventCode, Opcode};
use crate::host::{Host, Transport};

impl<T: Transport> Host<T> {
    /// Resets the controller's link manager, baseband, and link layer.
    pub async fn reset(&self) -> Result<()> {
        self.exec(Opcode::Reset).await?;
        Ok(())
    }

    /// Configures which events can be generated by the controller (mask
    /// page 1).
    pub async fn set_event_mask(&self, enable: &EventMask) -> Result<()> {
        self.exec_params(Opcode::SetEventMask, |cmd| {
            cmd.u64(enable.p1);
        })
        .await?;
        Ok(())
    }

    /// Configures which events can be generated by the controller (mask
    /// page 2).
    pub async fn set_event_mask_page_2(&self, enable: &EventMask) -> Result<()> {
        self.exec_params(Opcode::SetEventMaskPage2, |cmd| {
            cmd.u64(enable.p2);
        })
        .await?;
        Ok(())
    }

    /// Sets the LE Supported (Host) feature bit, enabling LE operation
    /// ([Vol 4] Part E, Section 7.3.79).
    pub async fn write_le_host_support(&self, enable: bool) -> Result<()> {
        self.exec_params(Opcode::WriteLeHostSupport, |cmd| {
            cmd.bool(enable).u8(0u8);
        })
        .await?;
        Ok(())
    }

    /// Returns the controller's public device address
    /// ([Vol 4] Part E, Section 7.4.6).
    pub async fn read_bd_addr(&self) -> Result<RawAddr> {
        let raw = self.exec(Opcode::ReadBdAddr).await?;
        let mut a = [0u8; 6];
        a.copy_from_slice(&raw[..6]);
        Ok(RawAddr(a))
    }
}

/// `HCI_Set_Event_Mask` / `HCI_Set_Event_Mask_Page_2` command parameters
/// ([Vol 4] Part E, Section 7.3.1, 7.3.69).
#[derive(Clone, Copy, Debug, Default)]
pub struct EventMask {
    pub(crate) p1: u64,
    pub(crate) p2: u64,
}

impl FromIterator<EventCode> for EventMask {
    /// Builds an event mask from the set of events to enable.
    fn from_iter<I: IntoIterator<Item = EventCode>>(it: I) -> Self {
        let mut m = Self::default();
        for c in it {
            m.p1 |= c.mask_bit();
        }
        m
    }
}
