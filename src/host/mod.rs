//! Host core: owns the transport connection to a controller, serializes
//! the HCI command pipeline, reassembles inbound ACL data, and applies
//! outbound flow control from `Number_Of_Completed_Packets`
//! ([SPEC_FULL] Section 4.2).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::gap::RawAddr;
use crate::hci::{
    Command, ConnHandle, EventCode, EventType, HciPacket, NumberOfCompletedPackets, Opcode,
};
use crate::{AsyncMutex, SyncMutex};

pub mod commands;

/// Identity and auxiliary key material the transport side needs from the
/// host during LE pairing and Secure Simple Pairing. Implemented by the
/// device orchestrator's keystore ([SPEC_FULL] Section 6).
pub trait KeyProvider: std::fmt::Debug + Send + Sync {
    /// Returns the Long Term Key for `handle`, if one is on record, in
    /// response to an `HCI_LE_Long_Term_Key_Request` event. `rand`/`ediv`
    /// identify which LTK the peer is asking for, matching the `rand`/
    /// `ediv` recorded alongside the key at pairing time
    /// ([`crate::crypto::LtkEntry`]).
    fn long_term_key(&self, handle: ConnHandle, rand: u64, ediv: u16) -> Option<crate::crypto::Ltk>;

    /// Returns the Link Key for a classic peer, in response to an
    /// `HCI_Link_Key_Request` event.
    fn link_key(&self, peer: RawAddr) -> Option<crate::crypto::LinkKey>;
}

/// Transport abstraction between the host and a controller: either a real
/// HCI transport (USB, UART) or [`crate::link`]'s in-process simulator.
pub trait Transport: std::fmt::Debug + Send + Sync + 'static {
    /// Sends a single HCI packet to the controller.
    fn send(&self, pkt: HciPacket) -> impl Future<Output = Result<()>> + Send;

    /// Receives the next HCI packet from the controller.
    fn recv(&self) -> impl Future<Output = Result<HciPacket>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(&self, pkt: HciPacket) -> impl Future<Output = Result<()>> + Send {
        T::send(self, pkt)
    }

    fn recv(&self) -> impl Future<Output = Result<HciPacket>> + Send {
        T::recv(self)
    }
}

/// Host-side HCI driver, generic over the transport used to reach the
/// controller.
#[derive(Debug)]
pub struct Host<T> {
    transport: Arc<T>,
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Inner {
    pending: SyncMutex<VecDeque<oneshot::Sender<Vec<u8>>>>,
    /// Serializes the command pipeline end-to-end (queue the response slot,
    /// send on the wire, await the reply) so at most one command is ever
    /// outstanding, per [SPEC_FULL] Section 4.2/5: the simplest conforming
    /// policy, and the only one that keeps `pending`'s FIFO pop in
    /// `on_event` matched to the caller that actually sent first.
    cmd_pipeline: AsyncMutex<()>,
    events: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    events_tx: mpsc::UnboundedSender<Vec<u8>>,
    acl: AsyncMutex<mpsc::UnboundedReceiver<(ConnHandle, Vec<u8>)>>,
    acl_tx: mpsc::UnboundedSender<(ConnHandle, Vec<u8>)>,
    reassembly: SyncMutex<HashMap<ConnHandle, Vec<u8>>>,
    /// Controller ACL buffer credits, from `HCI_LE_Read_Buffer_Size` and
    /// replenished by `Number_Of_Completed_Packets` ([Vol 4] Part E,
    /// Section 7.7.19 and 4.1.1).
    acl_credits: Arc<Semaphore>,
    acl_data_len: SyncMutex<u16>,
    keys: SyncMutex<Option<Arc<dyn KeyProvider>>>,
}

impl<T: Transport> Host<T> {
    /// Wraps a transport and starts the background receive loop. Does not
    /// reset or configure the controller; call [`Host::power_on`] for that.
    pub fn new(transport: T) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (acl_tx, acl_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            pending: SyncMutex::new(VecDeque::new()),
            cmd_pipeline: AsyncMutex::new(()),
            events: AsyncMutex::new(events_rx),
            events_tx,
            acl: AsyncMutex::new(acl_rx),
            acl_tx,
            reassembly: SyncMutex::new(HashMap::new()),
            acl_credits: Arc::new(Semaphore::new(1)),
            acl_data_len: SyncMutex::new(27),
            keys: SyncMutex::new(None),
        });
        let transport = Arc::new(transport);
        let cancel = CancellationToken::new();
        tokio::spawn(Self::recv_loop(
            Arc::clone(&transport),
            Arc::clone(&inner),
            cancel.clone(),
        ));
        Self {
            transport,
            inner,
            cancel,
        }
    }

    /// Registers the collaborator that supplies key material for
    /// encryption requests. Replaces any previously registered provider.
    pub fn set_key_provider(&self, keys: Arc<dyn KeyProvider>) {
        *self.inner.keys.lock() = Some(keys);
    }

    /// Runs the standard power-on command sequence ([SPEC_FULL] Section
    /// 4.2.1): reset, read local capabilities/buffer sizes, enable LE host
    /// support, and unmask the events this crate relies on. The driver
    /// hook and `ready` notification are the caller's ([`crate::device`])
    /// responsibility, run after this returns.
    pub async fn power_on(&self) -> Result<()> {
        self.reset().await?;
        let _ = self.read_local_version_information().await?;
        let _ = self.read_local_supported_commands().await?;
        let _ = self.read_local_supported_features().await?;
        let _ = self.read_buffer_size().await?;
        let _ = self.read_bd_addr().await?;
        let _ = self.le_read_local_supported_features().await?;
        self.set_event_mask(&commands::hci_control::EventMask::from_iter([
            EventCode::DisconnectionComplete,
            EventCode::EncryptionChangeV1,
            EventCode::CommandComplete,
            EventCode::CommandStatus,
            EventCode::NumberOfCompletedPackets,
            EventCode::DataBufferOverflow,
            EventCode::LeMetaEvent,
        ]))
        .await?;
        self.write_le_host_support(true).await?;
        let bs = self.le_read_buffer_size().await?;
        *self.inner.acl_data_len.lock() = bs.acl_data_len.max(27);
        let credits = usize::from(bs.acl_num_pkts.max(1));
        let extra = credits.saturating_sub(1);
        if extra > 0 {
            self.inner.acl_credits.add_permits(extra);
        }
        self.le_set_event_mask(commands::le::LeEventMask::enable(
            [
                crate::hci::SubeventCode::ConnectionComplete,
                crate::hci::SubeventCode::EnhancedConnectionComplete,
                crate::hci::SubeventCode::AdvertisingReport,
                crate::hci::SubeventCode::ExtendedAdvertisingReport,
                crate::hci::SubeventCode::ConnectionUpdateComplete,
                crate::hci::SubeventCode::LongTermKeyRequest,
                crate::hci::SubeventCode::AdvertisingSetTerminated,
                crate::hci::SubeventCode::ScanTimeout,
            ]
            .into_iter(),
        ))
        .await?;
        Ok(())
    }

    /// Sends a command with no parameters and waits for its completion.
    pub(crate) async fn exec(&self, opcode: Opcode) -> Result<Vec<u8>> {
        self.exec_params(opcode, |_| {}).await
    }

    /// Sends a command built by `f` and waits for its completion, returning
    /// the raw return-parameter bytes (empty for `CommandStatus`-only
    /// commands).
    pub(crate) async fn exec_params(
        &self,
        opcode: Opcode,
        f: impl FnOnce(&mut Command),
    ) -> Result<Vec<u8>> {
        // Hold the pipeline lock across queueing the response slot, the
        // actual wire send, and the wait for the reply: this is what makes
        // "at most one outstanding command" true rather than aspirational,
        // and keeps `on_event`'s FIFO `pop_front()` matched to whichever
        // caller really sent first.
        let _pipeline = self.inner.cmd_pipeline.lock().await;
        let raw = Command::build(opcode, f);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().push_back(tx);
        self.transport.send(HciPacket::Command(raw)).await?;
        let evt_bytes = rx.await.map_err(|_| Error::Disconnected)?;
        let evt = crate::hci::Event::try_from(&*evt_bytes)?;
        evt.ok()?;
        Ok(evt.as_ref().to_vec())
    }

    /// Returns the next non-command HCI event's raw parameter bytes, or an
    /// error if the receive loop has terminated.
    pub async fn next_event(&self) -> Result<Vec<u8>> {
        self.inner
            .events
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::Disconnected)
    }

    /// Returns the next fully reassembled inbound ACL SDU and the
    /// connection it arrived on.
    pub async fn next_acl(&self) -> Result<(ConnHandle, Vec<u8>)> {
        self.inner
            .acl
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::Disconnected)
    }

    /// Sends an L2CAP PDU over the ACL-U logical transport for `handle`,
    /// fragmenting to the controller's negotiated buffer size and applying
    /// credit-based flow control ([Vol 4] Part E, Section 5.4.2, 4.1.1).
    pub async fn send_acl(&self, handle: ConnHandle, pdu: &[u8]) -> Result<()> {
        let frag_len = usize::from(*self.inner.acl_data_len.lock());
        let mut first = true;
        for chunk in pdu.chunks(frag_len.max(1)) {
            let permit = Arc::clone(&self.inner.acl_credits)
                .acquire_owned()
                .await
                .map_err(|_| Error::Disconnected)?;
            let pb_flag: u16 = if first { 0b00 } else { 0b01 };
            let mut raw = Vec::with_capacity(4 + chunk.len());
            raw.extend_from_slice(&(u16::from(handle) | pb_flag << 12).to_le_bytes());
            raw.extend_from_slice(&u16::try_from(chunk.len()).unwrap().to_le_bytes());
            raw.extend_from_slice(chunk);
            self.transport.send(HciPacket::Acl(raw)).await?;
            permit.forget();
            first = false;
        }
        Ok(())
    }

    /// Terminates the receive loop. Pending commands observe a
    /// `Disconnected` error.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn recv_loop(transport: Arc<T>, inner: Arc<Inner>, cancel: CancellationToken) {
        debug!("host receive loop started");
        loop {
            let pkt = tokio::select! {
                r = transport.recv() => r,
                () = cancel.cancelled() => {
                    debug!("host receive loop terminating");
                    return;
                }
            };
            match pkt {
                Ok(HciPacket::Event(bytes)) => Self::on_event(&transport, &inner, bytes).await,
                Ok(HciPacket::Acl(bytes)) => Self::on_acl(&inner, &bytes),
                Ok(_) => {}
                Err(e) => {
                    warn!("transport receive error: {e}");
                    return;
                }
            }
        }
    }

    async fn on_event(transport: &Arc<T>, inner: &Arc<Inner>, bytes: Vec<u8>) {
        let Ok(evt) = crate::hci::Event::try_from(&*bytes) else {
            trace!("dropping unparseable event");
            return;
        };
        if evt.typ().is_cmd() {
            if let Some(tx) = inner.pending.lock().pop_front() {
                let _ = tx.send(bytes);
            } else {
                warn!("command-complete event with no pending command");
            }
            return;
        }
        if matches!(evt.typ(), EventType::Hci(EventCode::NumberOfCompletedPackets)) {
            let mut evt = evt;
            let n = NumberOfCompletedPackets::decode(&mut evt);
            let total: u32 = n.0.iter().map(|&(_, c)| u32::from(c)).sum();
            inner.acl_credits.add_permits(total as usize);
            return;
        }
        if matches!(evt.typ(), EventType::Hci(EventCode::LinkKeyRequest)) {
            let mut evt = evt;
            let peer = evt.addr();
            let key = inner.keys.lock().clone().and_then(|k| k.link_key(peer));
            let raw = Command::build(
                if key.is_some() {
                    Opcode::LinkKeyRequestReply
                } else {
                    Opcode::LinkKeyRequestNegativeReply
                },
                |cmd| {
                    cmd.put(peer.0);
                    if let Some(k) = &key {
                        cmd.u128(k.as_bytes());
                    }
                },
            );
            Self::reply_command(transport, inner, raw).await;
            return;
        }
        if matches!(evt.typ(), EventType::Le(crate::hci::SubeventCode::LongTermKeyRequest)) {
            let mut evt = evt;
            let Some(handle) = evt.conn_handle() else {
                return;
            };
            let rand = evt.u64();
            let ediv = evt.u16();
            let key = inner
                .keys
                .lock()
                .clone()
                .and_then(|k| k.long_term_key(handle, rand, ediv));
            let raw = Command::build(
                if key.is_some() {
                    Opcode::LeLongTermKeyRequestReply
                } else {
                    Opcode::LeLongTermKeyRequestNegativeReply
                },
                |cmd| {
                    cmd.u16(handle);
                    if let Some(k) = &key {
                        cmd.u128(k.as_bytes());
                    }
                },
            );
            Self::reply_command(transport, inner, raw).await;
            return;
        }
        let _ = inner.events_tx.send(bytes);
    }

    /// Sends an auto-generated key-provider reply command, queuing a
    /// discarded pending slot so the eventual `CommandComplete` is consumed
    /// by the normal correlation path instead of warning about an
    /// unmatched event.
    async fn reply_command(transport: &Arc<T>, inner: &Arc<Inner>, raw: Vec<u8>) {
        let (tx, rx) = oneshot::channel();
        inner.pending.lock().push_back(tx);
        drop(rx);
        if let Err(e) = transport.send(HciPacket::Command(raw)).await {
            warn!("failed to send key-provider reply: {e}");
        }
    }

    fn on_acl(inner: &Inner, raw: &[u8]) {
        if raw.len() < 4 {
            return;
        }
        let handle_flags = u16::from_le_bytes([raw[0], raw[1]]);
        let Some(handle) = ConnHandle::new(handle_flags & 0x0FFF) else {
            return;
        };
        let pb = (handle_flags >> 12) & 0b11;
        let len = usize::from(u16::from_le_bytes([raw[2], raw[3]]));
        let payload = &raw[4..];
        if payload.len() != len {
            return;
        }
        let mut reassembly = inner.reassembly.lock();
        match pb {
            // first-non-flushable (0b00), first-flushable (0b10), or
            // complete-L2CAP (0b11): all start a new reassembly buffer
            // ([SPEC_FULL] Section 4.2: ACL reassembly).
            0b00 | 0b10 | 0b11 => {
                reassembly.insert(handle, payload.to_vec());
            }
            0b01 => {
                // Continuation fragment; a continuation with no matching
                // first fragment is a stray and is silently dropped
                // ([SPEC_FULL] Section 4.2.2).
                if let Some(buf) = reassembly.get_mut(&handle) {
                    buf.extend_from_slice(payload);
                } else {
                    trace!("dropping stray ACL continuation for {handle:?}");
                    return;
                }
            }
            _ => return,
        }
        let Some(buf) = reassembly.get(&handle) else {
            return;
        };
        if buf.len() < 2 {
            return;
        }
        let l2cap_len = usize::from(u16::from_le_bytes([buf[0], buf[1]])) + 4;
        if buf.len() < l2cap_len {
            return; // Still waiting for more continuation fragments.
        }
        if buf.len() > l2cap_len {
            // Oversized accumulation: a protocol error, not a PDU.
            // ([SPEC_FULL] Section 4.2: "Oversized accumulations are a
            // protocol error: drop and log.")
            warn!("dropping oversized ACL reassembly for {handle:?}: got {} bytes, expected {l2cap_len}", buf.len());
            reassembly.remove(&handle);
            return;
        }
        let complete = reassembly.remove(&handle).unwrap();
        drop(reassembly);
        let _ = inner.acl_tx.send((handle, complete));
    }
}
