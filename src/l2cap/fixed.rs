//! Fixed channels: ATT, SMP, and the signaling channels. Fixed channels
//! carry their payload directly in a Basic-mode L2CAP PDU with no channel
//! configuration handshake ([Vol 3] Part A, Section 2.1).

use crate::hci::ConnHandle;

use super::frame_pdu;

/// A fixed channel endpoint bound to one connection.
#[derive(Clone, Copy, Debug)]
pub struct FixedChannel {
    pub handle: ConnHandle,
    pub cid: u16,
}

impl FixedChannel {
    /// Creates a fixed channel endpoint.
    #[must_use]
    pub const fn new(handle: ConnHandle, cid: u16) -> Self {
        Self { handle, cid }
    }

    /// Frames `payload` as a Basic-mode PDU ready to hand to
    /// [`crate::host::Host::send_acl`].
    #[must_use]
    pub fn frame(&self, payload: &[u8]) -> Vec<u8> {
        frame_pdu(self.cid, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::l2cap::{cid, split_pdu};

    #[test]
    fn frame_and_split_round_trip() {
        let h = ConnHandle::new(1).unwrap();
        let ch = FixedChannel::new(h, cid::ATT);
        let framed = ch.frame(&[0x0A, 0x01, 0x00]);
        let (cid, payload) = split_pdu(&framed).unwrap();
        assert_eq!(cid, super::super::cid::ATT);
        assert_eq!(payload, &[0x0A, 0x01, 0x00]);
    }
}
