//! HCI event decoding ([Vol 4] Part E, Section 7.7).

use std::ops::{Deref, DerefMut};

use smallvec::SmallVec;
use structbuf::Unpacker;

use crate::error::{Error, Result};

use super::{ConnHandle, EventCode, EventFmt, Opcode, Status, SubeventCode, EVT_HDR};

/// HCI event decoder: a cursor over the event's parameter bytes, with the
/// common leading fields (status, handle, command-complete opcode) already
/// consumed and cached.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct Event<'a> {
    typ: EventType,
    status: Status,
    cmd_quota: u8,
    opcode: Opcode,
    handle: u16,
    params: Unpacker<'a>,
}

impl<'a> Event<'a> {
    /// Returns the event type (HCI event code or LE meta-event subevent).
    #[must_use]
    pub const fn typ(&self) -> EventType {
        self.typ
    }

    /// Returns the event status, or [`Status::Success`] for events without
    /// one.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Returns the number of commands the controller is now ready to
    /// accept, from `CommandComplete`/`CommandStatus` events.
    #[must_use]
    pub const fn cmd_quota(&self) -> u8 {
        self.cmd_quota
    }

    /// Returns the opcode from `CommandComplete`/`CommandStatus` events, or
    /// [`Opcode::None`] otherwise.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns the associated connection handle, or `None` for events that
    /// don't carry one.
    #[must_use]
    pub fn conn_handle(&self) -> Option<ConnHandle> {
        self.typ
            .param_fmt()
            .contains(EventFmt::CONN_HANDLE)
            .then(|| ConnHandle::new(self.handle))
            .flatten()
    }

    /// Returns the associated advertising handle, or `None` for events that
    /// don't carry one.
    #[must_use]
    pub fn adv_handle(&self) -> Option<super::AdvHandle> {
        #[allow(clippy::cast_possible_truncation)]
        self.typ
            .param_fmt()
            .contains(EventFmt::ADV_HANDLE)
            .then(|| super::AdvHandle::new(self.handle as u8))
            .flatten()
    }

    /// Reads the next `BD_ADDR` from the parameter stream.
    pub fn addr(&mut self) -> crate::gap::RawAddr {
        let mut raw = [0u8; 6];
        for b in &mut raw {
            *b = self.params.u8();
        }
        crate::gap::RawAddr(raw)
    }

    /// Returns an error wrapping this event if it represents a failed
    /// command, otherwise `Ok(())`.
    pub fn ok(&self) -> Result<()> {
        if self.status.is_ok() {
            Ok(())
        } else {
            Err(Error::CommandFailed {
                opcode: self.opcode,
                status: self.status,
            })
        }
    }
}

impl<'a> Deref for Event<'a> {
    type Target = Unpacker<'a>;

    fn deref(&self) -> &Self::Target {
        &self.params
    }
}

impl DerefMut for Event<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.params
    }
}

impl<'a> TryFrom<&'a [u8]> for Event<'a> {
    type Error = Error;

    /// Parses an event's header: event code (and subevent code, for LE meta
    /// events), plus any leading status/handle fields implied by
    /// [`EventFmt`]. The remainder is left for the caller to decode.
    fn try_from(orig: &'a [u8]) -> Result<Self> {
        if orig.len() < EVT_HDR {
            return Err(Error::invalid_packet("event shorter than header"));
        }
        let code = orig[0];
        let param_len = usize::from(orig[1]);
        if orig.len() - EVT_HDR != param_len {
            return Err(Error::invalid_packet("event parameter length mismatch"));
        }
        let mut params = Unpacker::new(&orig[EVT_HDR..]);
        let typ = match EventCode::try_from(code) {
            Ok(EventCode::LeMetaEvent) => {
                let sub = params.u8();
                SubeventCode::try_from(sub)
                    .map(EventType::Le)
                    .map_err(|_| Error::UnknownEvent { code, subevent: sub })?
            }
            Ok(c) => EventType::Hci(c),
            Err(_) => return Err(Error::UnknownEvent { code, subevent: 0 }),
        };
        let mut evt = Self {
            typ,
            params,
            ..Self::default()
        };
        match typ {
            EventType::Hci(EventCode::CommandComplete) => {
                evt.cmd_quota = evt.params.u8();
                evt.opcode = Opcode::from(evt.params.u16());
                if !evt.params.is_empty() {
                    evt.status = Status::from(evt.params.u8());
                }
            }
            EventType::Hci(EventCode::CommandStatus) => {
                evt.status = Status::from(evt.params.u8());
                evt.cmd_quota = evt.params.u8();
                evt.opcode = Opcode::from(evt.params.u16());
            }
            _ => {
                let pf = typ.param_fmt();
                if pf.contains(EventFmt::STATUS) {
                    evt.status = Status::from(evt.params.u8());
                }
                if pf.contains(EventFmt::CONN_HANDLE) {
                    evt.handle = evt.params.u16();
                } else if pf.contains(EventFmt::ADV_HANDLE | EventFmt::BIG_HANDLE) {
                    evt.handle = u16::from(evt.params.u8());
                }
            }
        }
        Ok(evt)
    }
}

/// HCI event code or LE meta-event subevent code.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
#[non_exhaustive]
pub enum EventType {
    Hci(EventCode),
    Le(SubeventCode),
}

impl EventType {
    /// Returns whether this is `CommandComplete` or `CommandStatus`.
    #[must_use]
    pub const fn is_cmd(self) -> bool {
        matches!(
            self,
            Self::Hci(EventCode::CommandComplete | EventCode::CommandStatus)
        )
    }

    /// Returns the format of this event type's leading parameters.
    #[must_use]
    pub const fn param_fmt(self) -> EventFmt {
        match self {
            Self::Hci(c) => c.param_fmt(),
            Self::Le(c) => c.param_fmt(),
        }
    }
}

impl Default for EventType {
    fn default() -> Self {
        Self::Hci(EventCode::LeMetaEvent)
    }
}

/// `HCI_Disconnection_Complete` event parameters ([Vol 4] Part E, Section
/// 7.7.5).
#[derive(Clone, Copy, Debug)]
pub struct DisconnectionComplete {
    pub status: Status,
    pub handle: ConnHandle,
    pub reason: Status,
}

impl DisconnectionComplete {
    pub(crate) fn decode(e: &mut Event<'_>) -> Self {
        Self {
            status: e.status(),
            handle: e.conn_handle().expect("disconnection event without handle"),
            reason: Status::from(e.u8()),
        }
    }
}

/// `HCI_Encryption_Change` (v1/v2) event parameters ([Vol 4] Part E,
/// Section 7.7.8).
#[derive(Clone, Copy, Debug)]
pub struct EncryptionChange {
    pub status: Status,
    pub handle: ConnHandle,
    pub encrypted: bool,
}

impl EncryptionChange {
    pub(crate) fn decode(e: &mut Event<'_>) -> Self {
        Self {
            status: e.status(),
            handle: e.conn_handle().expect("encryption change event without handle"),
            encrypted: e.u8() != 0,
        }
    }
}

/// `HCI_Number_Of_Completed_Packets` event parameters ([Vol 4] Part E,
/// Section 7.7.19): per-connection counts of packets the controller has
/// freed from its buffer, driving outbound ACL flow control.
#[derive(Clone, Debug, Default)]
#[repr(transparent)]
pub struct NumberOfCompletedPackets(pub SmallVec<[(ConnHandle, u16); 4]>);

impl NumberOfCompletedPackets {
    pub(crate) fn decode(e: &mut Event<'_>) -> Self {
        let n = usize::from(e.u8());
        let mut v = SmallVec::with_capacity(n);
        for _ in 0..n {
            let (handle, count) = (e.u16(), e.u16());
            if let Some(h) = ConnHandle::new(handle) {
                v.push((h, count));
            }
        }
        Self(v)
    }
}

/// One report from an `HCI_LE_Advertising_Report` event ([Vol 4] Part E,
/// Section 7.7.65.2). Several reports can arrive batched in a single
/// event; the wire format groups each field into its own array rather than
/// interleaving per-report structs, so every report must be decoded from
/// the same event together via [`Self::decode_all`].
#[derive(Clone, Debug)]
pub struct LeAdvertisingReportItem {
    pub event_type: u8,
    pub addr: crate::gap::Addr,
    pub data: Vec<u8>,
    pub rssi: i8,
}

impl LeAdvertisingReportItem {
    /// Legacy advertising event type bits ([Vol 4] Part E, Section
    /// 7.7.65.2, Table 7.2): `ADV_IND`/`ADV_SCAN_IND` are scannable,
    /// `ADV_IND`/`ADV_DIRECT_IND` are connectable, `SCAN_RSP` carries a
    /// scan response rather than an advertisement.
    #[must_use]
    pub const fn is_connectable(&self) -> bool {
        matches!(self.event_type, 0x00 | 0x01)
    }

    #[must_use]
    pub const fn is_scannable(&self) -> bool {
        matches!(self.event_type, 0x00 | 0x02)
    }

    #[must_use]
    pub const fn is_scan_response(&self) -> bool {
        self.event_type == 0x04
    }

    pub(crate) fn decode_all(e: &mut Event<'_>) -> Vec<Self> {
        let n = usize::from(e.u8());
        let event_types: Vec<u8> = (0..n).map(|_| e.u8()).collect();
        let addr_types: Vec<u8> = (0..n).map(|_| e.u8()).collect();
        let addrs: Vec<crate::gap::RawAddr> = (0..n).map(|_| e.addr()).collect();
        let lens: Vec<u8> = (0..n).map(|_| e.u8()).collect();
        let datas: Vec<Vec<u8>> = lens
            .iter()
            .map(|&l| (0..l).map(|_| e.u8()).collect())
            .collect();
        let rssis: Vec<i8> = (0..n).map(|_| e.u8() as i8).collect();
        (0..n)
            .map(|i| Self {
                event_type: event_types[i],
                addr: crate::gap::Addr::peer(addr_types[i], addrs[i]),
                data: datas[i].clone(),
                rssi: rssis[i],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disconnection_complete_bytes(handle: u16, reason: u8) -> Vec<u8> {
        let mut v = vec![EventCode::DisconnectionComplete as u8, 4, 0x00];
        v.extend_from_slice(&handle.to_le_bytes());
        v.push(reason);
        v[1] = u8::try_from(v.len() - EVT_HDR).unwrap();
        v
    }

    #[test]
    fn parses_disconnection_complete() {
        let raw = disconnection_complete_bytes(0x0042, 0x13);
        let mut e = Event::try_from(&*raw).unwrap();
        assert_eq!(e.typ(), EventType::Hci(EventCode::DisconnectionComplete));
        assert!(e.status().is_ok());
        let dc = DisconnectionComplete::decode(&mut e);
        assert_eq!(u16::from(dc.handle), 0x0042);
        assert_eq!(dc.reason, Status::RemoteUserTerminatedConnection);
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut raw = disconnection_complete_bytes(1, 0);
        raw[1] += 1;
        assert!(matches!(Event::try_from(&*raw), Err(Error::InvalidPacket(_))));
    }

    #[test]
    fn parses_encryption_change() {
        let mut v = vec![EventCode::EncryptionChangeV1 as u8, 4, 0x00];
        v.extend_from_slice(&0x0042u16.to_le_bytes());
        v.push(0x01);
        v[1] = u8::try_from(v.len() - EVT_HDR).unwrap();
        let mut e = Event::try_from(&*v).unwrap();
        let ec = EncryptionChange::decode(&mut e);
        assert_eq!(u16::from(ec.handle), 0x0042);
        assert!(ec.encrypted);
    }

    #[test]
    fn unknown_event_code_is_reported() {
        let raw = [0xF0u8, 0];
        assert!(matches!(
            Event::try_from(&raw[..]),
            Err(Error::UnknownEvent { code: 0xF0, .. })
        ));
    }

    #[test]
    fn parses_single_advertising_report() {
        let mut body = vec![SubeventCode::AdvertisingReport as u8, 1, 0x00, 0x01];
        body.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        body.push(3);
        body.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        body.push((-40i8).to_le_bytes()[0]);
        let mut v = vec![EventCode::LeMetaEvent as u8, u8::try_from(body.len()).unwrap()];
        v.extend_from_slice(&body);
        let mut e = Event::try_from(&*v).unwrap();
        let reports = LeAdvertisingReportItem::decode_all(&mut e);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_connectable());
        assert!(reports[0].is_scannable());
        assert_eq!(reports[0].data, vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(reports[0].rssi, -40);
    }
}
