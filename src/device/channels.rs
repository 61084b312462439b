//! Per-connection dynamic L2CAP channel bookkeeping wired by [`super::Device`]
//! on top of the data-only state machines in [`crate::l2cap`] ([SPEC_FULL]
//! Section 4.3).

use std::fmt::Debug;

use crate::l2cap::{ClassicChannel, LeCreditChannel};

/// Receives data and lifecycle notifications for one dynamic channel.
/// Implemented by whatever opened or accepted the channel (the SDP
/// transaction glue, a GATT-over-BR/EDR bridge, or a test harness).
pub trait ChannelListener: Debug + Send + Sync {
    /// One fully reassembled SDU arrived on the channel.
    fn on_data(&self, data: Vec<u8>);

    /// The channel finished its connect/configure handshake and is ready
    /// to carry data.
    fn on_open(&self) {}

    /// The channel was torn down, locally or by the peer.
    fn on_close(&self) {}
}

/// One dynamic channel's protocol state, classic or LE Credit-Based
/// ([SPEC_FULL] Section 3: L2CAP channel).
#[derive(Debug)]
pub enum DynChannel {
    Classic(ClassicChannel),
    LeCredit(LeCreditChannel),
}

impl DynChannel {
    /// Returns the remote (peer-assigned) channel id, once known.
    #[must_use]
    pub fn remote_cid(&self) -> u16 {
        match self {
            Self::Classic(c) => c.remote_cid,
            Self::LeCredit(c) => c.remote_cid,
        }
    }
}
