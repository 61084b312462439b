//! Minimal virtual controller: answers the HCI commands
//! [`crate::host::Host::power_on`] and LE connection establishment need,
//! and turns [`super::LinkController`] deliveries into HCI events. This is
//! deliberately not a full controller/link-layer emulation — classic
//! commands complete successfully with no behavioral effect, and commands
//! outside the set below complete successfully with empty return
//! parameters rather than simulating real controller state. Radio PHY and
//! controller-side link-layer scheduling are explicitly out of scope
//! ([SPEC_FULL] Section 4.6, Non-goals).

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::gap::{PhysicalTransport, RawAddr};
use crate::hci::{
    ConnHandle, EventCode, HciPacket, Opcode, Role, Status, SubeventCode,
};
use crate::host::Transport;
use crate::{AsyncMutex, Error, Result, SyncMutex};

use super::{next_handle, ConnectionParams, LinkController, LocalLink};

#[derive(Debug, Default)]
struct AdvState {
    data: Vec<u8>,
    scan_response: Vec<u8>,
    interval: Duration,
    enabled: CancellationToken,
    running: bool,
}

#[derive(Debug, Clone, Copy)]
struct Peer {
    addr: RawAddr,
    transport: PhysicalTransport,
}

/// A single simulated HCI controller attached to a [`LocalLink`]. Implements
/// both [`LinkController`] (the relay's view) and [`Transport`] (the host's
/// view), so a [`crate::host::Host`] can drive it exactly like a real HCI
/// transport.
#[derive(Debug)]
pub struct SimController {
    public_address: RawAddr,
    random_address: SyncMutex<Option<RawAddr>>,
    link: Arc<LocalLink>,
    self_ref: OnceLock<Arc<dyn LinkController>>,
    weak_self: OnceLock<Weak<SimController>>,
    outbound_tx: mpsc::UnboundedSender<HciPacket>,
    outbound_rx: AsyncMutex<mpsc::UnboundedReceiver<HciPacket>>,
    advertising: SyncMutex<AdvState>,
    scan_enabled: SyncMutex<bool>,
    next_handle: SyncMutex<u16>,
    by_handle: SyncMutex<HashMap<ConnHandle, Peer>>,
    by_addr: SyncMutex<HashMap<RawAddr, ConnHandle>>,
}

impl SimController {
    /// Creates a controller with the given fixed public address and
    /// registers it on `link`.
    #[must_use]
    pub fn new(link: Arc<LocalLink>, public_address: RawAddr) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let this = Arc::new(Self {
            public_address,
            random_address: SyncMutex::new(None),
            link: Arc::clone(&link),
            self_ref: OnceLock::new(),
            weak_self: OnceLock::new(),
            outbound_tx,
            outbound_rx: AsyncMutex::new(outbound_rx),
            advertising: SyncMutex::new(AdvState::default()),
            scan_enabled: SyncMutex::new(false),
            next_handle: SyncMutex::new(1),
            by_handle: SyncMutex::new(HashMap::new()),
            by_addr: SyncMutex::new(HashMap::new()),
        });
        let handle: Arc<dyn LinkController> = this.clone();
        let _ = this.self_ref.set(handle.clone());
        let _ = this.weak_self.set(Arc::downgrade(&this));
        link.add_controller(handle);
        this
    }

    fn this(&self) -> Arc<dyn LinkController> {
        self.self_ref.get().expect("self_ref set in new()").clone()
    }

    fn le_address(&self) -> RawAddr {
        self.random_address.lock().unwrap_or(self.public_address)
    }

    fn push(&self, pkt: HciPacket) {
        let _ = self.outbound_tx.send(pkt);
    }

    fn push_event(&self, bytes: Vec<u8>) {
        self.push(HciPacket::Event(bytes));
    }

    async fn handle_command(&self, raw: &[u8]) {
        if raw.len() < 3 {
            return;
        }
        let opcode = Opcode::from(u16::from_le_bytes([raw[0], raw[1]]));
        let len = usize::from(raw[2]);
        let params = &raw[3..];
        if params.len() != len {
            return;
        }
        match opcode {
            Opcode::Reset => {
                *self.random_address.lock() = None;
                self.by_handle.lock().clear();
                self.by_addr.lock().clear();
                self.push_event(complete(opcode, &[0x00]));
            }
            Opcode::ReadLocalVersionInformation => {
                // hci_version, hci_revision(2), lmp_version, manufacturer(2), lmp_subversion(2)
                self.push_event(complete(opcode, &[0x00, 0x0C, 0x00, 0x00, 0x0C, 0xFF, 0xFF, 0x00, 0x00]));
            }
            Opcode::ReadLocalSupportedCommands => {
                let mut body = vec![0x00];
                body.extend_from_slice(&[0u8; 64]);
                self.push_event(complete(opcode, &body));
            }
            Opcode::ReadLocalSupportedFeatures => {
                // byte index 4, bit 6: LE Supported (Controller).
                self.push_event(complete(opcode, &[0x00, 0, 0, 0, 0, 0x20, 0, 0, 0]));
            }
            Opcode::ReadBufferSize => {
                let mut body = vec![0x00];
                body.extend_from_slice(&251u16.to_le_bytes());
                body.push(0); // SCO data length
                body.extend_from_slice(&4u16.to_le_bytes()); // ACL buffers
                body.extend_from_slice(&0u16.to_le_bytes()); // SCO buffers
                self.push_event(complete(opcode, &body));
            }
            Opcode::ReadBdAddr => {
                let mut body = vec![0x00];
                body.extend_from_slice(&self.public_address.0);
                self.push_event(complete(opcode, &body));
            }
            Opcode::LeReadBufferSize | Opcode::LeReadBufferSizeV2 => {
                let mut body = vec![0x00];
                body.extend_from_slice(&251u16.to_le_bytes());
                body.push(4); // ACL buffers
                if opcode == Opcode::LeReadBufferSizeV2 {
                    body.extend_from_slice(&0u16.to_le_bytes());
                    body.push(0);
                }
                self.push_event(complete(opcode, &body));
            }
            Opcode::LeReadLocalSupportedFeatures => {
                self.push_event(complete(opcode, &[0x00, 0, 0, 0, 0, 0, 0, 0, 0]));
            }
            Opcode::LeSetRandomAddress => {
                if params.len() >= 6 {
                    let mut a = [0u8; 6];
                    a.copy_from_slice(&params[..6]);
                    *self.random_address.lock() = Some(RawAddr(a));
                }
                self.push_event(complete(opcode, &[0x00]));
            }
            Opcode::LeSetAdvertisingParameters => {
                if params.len() >= 2 {
                    let ticks = u16::from_le_bytes([params[0], params[1]]);
                    self.advertising.lock().interval = Duration::from_micros(u64::from(ticks) * 625);
                }
                self.push_event(complete(opcode, &[0x00]));
            }
            Opcode::LeSetAdvertisingData => {
                if let Some(&n) = params.first() {
                    let n = usize::from(n).min(params.len().saturating_sub(1));
                    self.advertising.lock().data = params[1..1 + n].to_vec();
                }
                self.push_event(complete(opcode, &[0x00]));
            }
            Opcode::LeSetScanResponseData => {
                if let Some(&n) = params.first() {
                    let n = usize::from(n).min(params.len().saturating_sub(1));
                    self.advertising.lock().scan_response = params[1..1 + n].to_vec();
                }
                self.push_event(complete(opcode, &[0x00]));
            }
            Opcode::LeSetAdvertisingEnable => {
                let enable = params.first() == Some(&1);
                self.set_advertising_enabled(enable);
                self.push_event(complete(opcode, &[0x00]));
            }
            Opcode::LeSetScanParameters => {
                self.push_event(complete(opcode, &[0x00]));
            }
            Opcode::LeSetScanEnable => {
                *self.scan_enabled.lock() = params.first() == Some(&1);
                self.push_event(complete(opcode, &[0x00]));
            }
            Opcode::LeCreateConnection => {
                self.push_event(cmd_status(opcode, Status::Success));
                if params.len() >= 12 {
                    let peer_addr_type = params[5];
                    let mut a = [0u8; 6];
                    a.copy_from_slice(&params[6..12]);
                    let _ = peer_addr_type;
                    let peer_addr = RawAddr(a);
                    self.link.connect(self.this(), peer_addr, ConnectionParams::default());
                }
            }
            Opcode::LeCreateConnectionCancel | Opcode::CreateConnectionCancel => {
                self.push_event(complete(opcode, &[0x00]));
            }
            Opcode::LeConnectionUpdate => {
                self.push_event(cmd_status(opcode, Status::Success));
                if params.len() >= 2 {
                    let handle = u16::from_le_bytes([params[0], params[1]]) & 0x0FFF;
                    if let Some(h) = ConnHandle::new(handle) {
                        self.push_event(le_meta(
                            SubeventCode::ConnectionUpdateComplete,
                            &connection_update_bytes(h, Status::Success),
                        ));
                    }
                }
            }
            Opcode::Disconnect => {
                self.push_event(cmd_status(opcode, Status::Success));
                if params.len() >= 3 {
                    let handle = u16::from_le_bytes([params[0], params[1]]) & 0x0FFF;
                    let reason = Status::from(params[2]);
                    if let Some(h) = ConnHandle::new(handle) {
                        self.finish_disconnect(h, reason);
                    }
                }
            }
            Opcode::SetEventMask
            | Opcode::SetEventMaskPage2
            | Opcode::LeSetEventMask
            | Opcode::WriteLeHostSupport
            | Opcode::WriteLocalName
            | Opcode::WriteScanEnable
            | Opcode::WriteClassOfDevice
            | Opcode::WriteInquiryMode
            | Opcode::WriteExtendedInquiryResponse
            | Opcode::WriteSimplePairingMode
            | Opcode::WriteSecureConnectionsHostSupport
            | Opcode::Inquiry
            | Opcode::InquiryCancel
            | Opcode::CreateConnection
            | Opcode::LinkKeyRequestReply
            | Opcode::LinkKeyRequestNegativeReply
            | Opcode::LeLongTermKeyRequestReply
            | Opcode::LeLongTermKeyRequestNegativeReply
            | Opcode::LeAddDeviceToResolvingList
            | Opcode::LeRemoveDeviceFromResolvingList
            | Opcode::LeClearResolvingList
            | Opcode::LeSetAddressResolutionEnable => {
                self.push_event(complete(opcode, &[0x00]));
            }
            _ => {
                trace!("unhandled simulated command {opcode:?}, completing with success");
                self.push_event(complete(opcode, &[0x00]));
            }
        }
    }

    fn set_advertising_enabled(&self, enable: bool) {
        let mut adv = self.advertising.lock();
        if enable == adv.running {
            return;
        }
        adv.running = enable;
        if !enable {
            adv.enabled.cancel();
            return;
        }
        adv.enabled = CancellationToken::new();
        let cancel = adv.enabled.clone();
        let interval = if adv.interval.is_zero() { Duration::from_millis(100) } else { adv.interval };
        drop(adv);
        let weak = self.weak_self.get().expect("weak_self set in new()").clone();
        let link = Arc::clone(&self.link);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = tick.tick() => {
                        let Some(sim) = weak.upgrade() else { return };
                        let data = sim.advertising.lock().data.clone();
                        link.send_advertising_data(&sim.this(), data);
                    }
                }
            }
        });
    }

    fn finish_disconnect(&self, handle: ConnHandle, reason: Status) {
        let peer = self.by_handle.lock().remove(&handle);
        if let Some(peer) = peer {
            self.by_addr.lock().remove(&peer.addr);
            self.link.notify_disconnected(self.le_address(), peer.addr, peer.transport, reason);
        }
        self.push_event(disconnection_complete_bytes(handle, reason));
    }

    fn register_connection(&self, peer_addr: RawAddr, transport: PhysicalTransport) -> ConnHandle {
        let mut counter = self.next_handle.lock();
        let handle = next_handle(&mut counter);
        drop(counter);
        self.by_handle.lock().insert(handle, Peer { addr: peer_addr, transport });
        self.by_addr.lock().insert(peer_addr, handle);
        handle
    }
}

impl LinkController for SimController {
    fn public_address(&self) -> RawAddr {
        self.public_address
    }

    fn random_address(&self) -> Option<RawAddr> {
        *self.random_address.lock()
    }

    fn on_le_advertising_data(self: Arc<Self>, sender: RawAddr, data: Vec<u8>, rssi: i8) {
        if !*self.scan_enabled.lock() {
            return;
        }
        self.push_event(le_meta(SubeventCode::AdvertisingReport, &advertising_report_bytes(sender, &data, rssi)));
    }

    fn on_acl_data(self: Arc<Self>, sender: RawAddr, data: Vec<u8>) {
        let Some(&handle) = self.by_addr.lock().get(&sender) else {
            trace!("on_acl_data: no connection for {sender:?}");
            return;
        };
        let mut raw = Vec::with_capacity(4 + data.len());
        raw.extend_from_slice(&u16::from(handle).to_le_bytes());
        raw.extend_from_slice(&u16::try_from(data.len()).unwrap_or(u16::MAX).to_le_bytes());
        raw.extend_from_slice(&data);
        self.push(HciPacket::Acl(raw));
    }

    fn on_le_peripheral_connection_complete(self: Arc<Self>, central: RawAddr, params: ConnectionParams) {
        let handle = self.register_connection(central, PhysicalTransport::Le);
        self.push_event(le_meta(
            SubeventCode::ConnectionComplete,
            &connection_complete_bytes(Status::Success, handle, Role::Peripheral, central, params),
        ));
    }

    fn on_le_central_connected(self: Arc<Self>, peripheral: RawAddr, params: ConnectionParams) {
        let handle = self.register_connection(peripheral, PhysicalTransport::Le);
        self.push_event(le_meta(
            SubeventCode::ConnectionComplete,
            &connection_complete_bytes(Status::Success, handle, Role::Central, peripheral, params),
        ));
    }

    fn on_disconnected(self: Arc<Self>, peer: RawAddr, reason: Status) {
        let handle = self.by_addr.lock().remove(&peer);
        if let Some(handle) = handle {
            self.by_handle.lock().remove(&handle);
            self.push_event(disconnection_complete_bytes(handle, reason));
        }
    }

    fn on_ll_control_pdu(self: Arc<Self>, _sender: RawAddr, _pdu: Vec<u8>) {
        trace!("ignoring LL control PDU; not modeled by the simulated controller");
    }

    fn on_lmp_packet(self: Arc<Self>, _sender: RawAddr, _packet: Vec<u8>) {
        trace!("ignoring LMP packet; classic link layer is not modeled by the simulated controller");
    }
}

impl Transport for SimController {
    fn send(&self, pkt: HciPacket) -> impl Future<Output = Result<()>> + Send {
        async move {
            match pkt {
                HciPacket::Command(raw) => self.handle_command(&raw).await,
                HciPacket::Acl(raw) => self.send_acl(&raw),
                _ => {}
            }
            Ok(())
        }
    }

    fn recv(&self) -> impl Future<Output = Result<HciPacket>> + Send {
        async move {
            self.outbound_rx
                .lock()
                .await
                .recv()
                .await
                .ok_or(Error::Disconnected)
        }
    }
}

impl SimController {
    fn send_acl(&self, raw: &[u8]) {
        if raw.len() < 4 {
            return;
        }
        let handle = u16::from_le_bytes([raw[0], raw[1]]) & 0x0FFF;
        let len = usize::from(u16::from_le_bytes([raw[2], raw[3]]));
        let payload = &raw[4..];
        if payload.len() != len {
            return;
        }
        let Some(h) = ConnHandle::new(handle) else { return };
        let Some(&peer) = self.by_handle.lock().get(&h) else {
            trace!("send_acl: unknown handle {h:?}");
            return;
        };
        self.link
            .send_acl_data(self.le_address(), peer.addr, peer.transport, payload.to_vec());
        self.push_event(number_of_completed_packets_bytes(h, 1));
    }
}

fn event(code: EventCode, params: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(2 + params.len());
    v.push(code as u8);
    v.push(u8::try_from(params.len()).unwrap_or(u8::MAX));
    v.extend_from_slice(params);
    v
}

fn le_meta(sub: SubeventCode, params: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + params.len());
    body.push(sub as u8);
    body.extend_from_slice(params);
    event(EventCode::LeMetaEvent, &body)
}

fn complete(opcode: Opcode, body: &[u8]) -> Vec<u8> {
    let mut params = Vec::with_capacity(3 + body.len());
    params.push(1); // cmd_quota
    params.extend_from_slice(&u16::from(opcode).to_le_bytes());
    params.extend_from_slice(body);
    event(EventCode::CommandComplete, &params)
}

fn cmd_status(opcode: Opcode, status: Status) -> Vec<u8> {
    let mut params = Vec::with_capacity(4);
    params.push(u8::from(status));
    params.push(1);
    params.extend_from_slice(&u16::from(opcode).to_le_bytes());
    event(EventCode::CommandStatus, &params)
}

fn disconnection_complete_bytes(handle: ConnHandle, reason: Status) -> Vec<u8> {
    let mut params = vec![0x00];
    params.extend_from_slice(&u16::from(handle).to_le_bytes());
    params.push(u8::from(reason));
    event(EventCode::DisconnectionComplete, &params)
}

fn number_of_completed_packets_bytes(handle: ConnHandle, count: u16) -> Vec<u8> {
    let mut params = vec![1u8];
    params.extend_from_slice(&u16::from(handle).to_le_bytes());
    params.extend_from_slice(&count.to_le_bytes());
    event(EventCode::NumberOfCompletedPackets, &params)
}

fn connection_update_bytes(handle: ConnHandle, status: Status) -> Vec<u8> {
    let mut params = vec![u8::from(status)];
    params.extend_from_slice(&u16::from(handle).to_le_bytes());
    params.extend_from_slice(&24u16.to_le_bytes()); // conn_interval
    params.extend_from_slice(&0u16.to_le_bytes()); // peripheral_latency
    params.extend_from_slice(&400u16.to_le_bytes()); // supervision_timeout
    params
}

fn connection_complete_bytes(
    status: Status,
    handle: ConnHandle,
    role: Role,
    peer: RawAddr,
    params: ConnectionParams,
) -> Vec<u8> {
    let mut v = vec![u8::from(status)];
    v.extend_from_slice(&u16::from(handle).to_le_bytes());
    v.push(role as u8);
    v.push(0x00); // peer address type: public
    v.extend_from_slice(&peer.0);
    v.extend_from_slice(&crate::hci::ticks_1250us(params.interval).unwrap_or(24).to_le_bytes());
    v.extend_from_slice(&params.peripheral_latency.to_le_bytes());
    v.extend_from_slice(&crate::hci::ticks_10ms(params.supervision_timeout).unwrap_or(400).to_le_bytes());
    v.push(params.central_clock_accuracy);
    v
}

fn advertising_report_bytes(sender: RawAddr, data: &[u8], rssi: i8) -> Vec<u8> {
    let mut v = vec![1u8]; // num_reports
    v.push(0x00); // event_type: ADV_IND
    v.push(0x01); // address_type: random
    v.extend_from_slice(&sender.0);
    v.push(u8::try_from(data.len()).unwrap_or(u8::MAX));
    v.extend_from_slice(data);
    v.push(rssi.to_le_bytes()[0]);
    v
}
