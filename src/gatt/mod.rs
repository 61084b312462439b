//! GATT dispatch surface.
//!
//! The attribute database, profile services, and the SMP-backed security
//! model are external collaborators ([SPEC_FULL] Section 1, non-goals).
//! This module specifies only the two trait objects [`Device`](crate::device::Device)
//! wires per connection and the op-code-parity router that hands ATT PDUs
//! to one or the other ([SPEC_FULL] Section 4.5.1).

use std::fmt::Debug;

use crate::hci::ConnHandle;

/// Client-role collaborator: receives server-originated (odd op code) ATT
/// PDUs for one connection.
pub trait GattClient: Debug + Send + Sync {
    /// Delivers a server-to-client ATT PDU (odd op code) received on this
    /// connection's ATT fixed channel.
    fn on_att_pdu(&self, handle: ConnHandle, pdu: &[u8]);
}

/// Server-role collaborator: a single process-wide attribute database
/// shared by every connection.
pub trait GattServer: Debug + Send + Sync {
    /// Delivers a client-to-server ATT PDU (even op code), with the
    /// originating connection as context.
    fn on_att_pdu(&self, handle: ConnHandle, pdu: &[u8]);
}

/// Routes an ATT PDU to the client or server collaborator based on op-code
/// parity: odd op codes are server-to-client responses/notifications, even
/// op codes are client-to-server requests ([SPEC_FULL] Section 4.5.1).
pub fn dispatch(
    handle: ConnHandle,
    pdu: &[u8],
    client: Option<&dyn GattClient>,
    server: Option<&dyn GattServer>,
) {
    let Some(&op) = pdu.first() else { return };
    if op % 2 == 1 {
        if let Some(c) = client {
            c.on_att_pdu(handle, pdu);
        }
    } else if let Some(s) = server {
        s.on_att_pdu(handle, pdu);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU8, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    struct Counter(AtomicU8);
    impl GattClient for Counter {
        fn on_att_pdu(&self, _: ConnHandle, _: &[u8]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
    impl GattServer for Counter {
        fn on_att_pdu(&self, _: ConnHandle, _: &[u8]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn odd_opcode_goes_to_client() {
        let client = Counter::default();
        let server = Counter::default();
        let h = ConnHandle::new(1).unwrap();
        dispatch(h, &[0x1B], Some(&client), Some(&server)); // HandleValueNotification
        assert_eq!(client.0.load(Ordering::SeqCst), 1);
        assert_eq!(server.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn even_opcode_goes_to_server() {
        let client = Counter::default();
        let server = Counter::default();
        let h = ConnHandle::new(1).unwrap();
        dispatch(h, &[0x0A], Some(&client), Some(&server)); // ReadRequest
        assert_eq!(client.0.load(Ordering::SeqCst), 0);
        assert_eq!(server.0.load(Ordering::SeqCst), 1);
    }
}
