//! Bridges an open classic L2CAP channel to the SDP client transaction
//! seam, so [`crate::sdp::client::Client`] can run a real discovery
//! session over a connection instead of an in-process loopback
//! ([SPEC_FULL] Section 4.4.2).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::hci::ConnHandle;
use crate::host::Transport;
use crate::l2cap::ChannelId;
use crate::sdp::client::SdpTransaction;
use crate::{AsyncMutex, SyncMutex};

use super::{ChannelListener, Device};

const SDP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// An SDP client transport bound to one classic channel opened against a
/// peer's SDP server on [`crate::sdp::PSM`]. Requests are serialized: only
/// one may be outstanding at a time, matching how a single SDP connection
/// is used in practice ([SPEC_FULL] Section 4.4.2, continuation looping).
#[derive(Debug)]
pub struct SdpChannel<T> {
    device: Arc<Device<T>>,
    chan_id: SyncMutex<Option<ChannelId>>,
    request_lock: AsyncMutex<()>,
    pending: SyncMutex<Option<oneshot::Sender<Vec<u8>>>>,
}

impl<T: Transport> SdpChannel<T> {
    /// Opens a classic channel to `handle`'s peer SDP server and returns a
    /// transport ready for [`crate::sdp::client::Client`] requests.
    pub async fn connect(device: &Arc<Device<T>>, handle: ConnHandle) -> Result<Arc<Self>> {
        let this = Arc::new(Self {
            device: Arc::clone(device),
            chan_id: SyncMutex::new(None),
            request_lock: AsyncMutex::new(()),
            pending: SyncMutex::new(None),
        });
        let listener = Arc::clone(&this) as Arc<dyn ChannelListener>;
        let chan_id = device.open_classic_channel(handle, crate::sdp::PSM, false, listener).await?;
        *this.chan_id.lock() = Some(chan_id);
        Ok(this)
    }
}

impl<T: Transport> SdpTransaction for SdpChannel<T> {
    async fn request(&self, request: Vec<u8>) -> Result<Vec<u8>> {
        let _serialize = self.request_lock.lock().await;
        let chan_id = self
            .chan_id
            .lock()
            .ok_or_else(|| Error::invalid_state("SDP channel not open"))?;
        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(tx);
        if let Err(e) = self.device.send_classic_sdu(chan_id, &request).await {
            self.pending.lock().take();
            return Err(e);
        }
        match timeout(SDP_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.pending.lock().take();
                Err(Error::Timeout)
            }
        }
    }
}

impl<T: Transport> ChannelListener for SdpChannel<T> {
    fn on_data(&self, data: Vec<u8>) {
        if let Some(tx) = self.pending.lock().take() {
            let _ = tx.send(data);
        }
    }

    fn on_close(&self) {
        self.pending.lock().take();
    }
}

/// Server-side half of one SDP channel: answers each inbound request PDU
/// against a shared [`crate::sdp::server::Server`] record database and
/// writes the response back on the same channel.
#[derive(Debug)]
struct SdpServerChannel<T> {
    device: Arc<Device<T>>,
    chan_id: ChannelId,
    server: Arc<crate::sdp::server::Server>,
}

impl<T: Transport> ChannelListener for SdpServerChannel<T> {
    fn on_data(&self, data: Vec<u8>) {
        let Ok(response) = self.server.handle_request(&data) else {
            return;
        };
        let device = Arc::clone(&self.device);
        let chan_id = self.chan_id;
        tokio::spawn(async move {
            let _ = device.send_classic_sdu(chan_id, &response).await;
        });
    }
}

/// Builds an [`super::AcceptorFn`] that answers every incoming SDP channel
/// against `server`, for registration via
/// [`Device::register_classic_server`] on [`crate::sdp::PSM`].
pub fn server_acceptor<T: Transport>(
    device: &Arc<Device<T>>,
    server: Arc<crate::sdp::server::Server>,
) -> super::AcceptorFn {
    let device = Arc::clone(device);
    Arc::new(move |chan_id: ChannelId| {
        Arc::new(SdpServerChannel {
            device: Arc::clone(&device),
            chan_id,
            server: Arc::clone(&server),
        }) as Arc<dyn ChannelListener>
    })
}
