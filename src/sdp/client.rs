//! SDP client: issues `ServiceSearch`/`ServiceAttribute`/
//! `ServiceSearchAttribute` transactions, looping on continuation state
//! until the full result set has arrived ([SPEC_FULL] Section 4.4.2).

use std::future::Future;

use crate::error::{Error, Result};
use crate::gap::Uuid;

use super::{
    build, parse_header, AttributeIdFilter, Continuation, DataElement, PduId, SdpError,
    MAX_CONTINUATION_ROUNDS,
};

/// A single round-trip transport for SDP PDUs: send a request PDU, await
/// its response PDU. Implemented by whatever owns the SDP fixed-PSM
/// dynamic channel (the [`crate::device`] orchestrator in this crate;
/// kept generic so tests can substitute an in-process server).
pub trait SdpTransaction {
    /// Sends `request` and returns the matching response PDU bytes.
    fn request(&self, request: Vec<u8>) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// An SDP client bound to one transaction transport, with its own
/// transaction-id counter.
#[derive(Debug, Default)]
pub struct Client {
    next_txn: std::sync::atomic::AtomicU16,
}

impl Client {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_txn(&self) -> u16 {
        self.next_txn.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Searches for service records matching every UUID in `pattern`,
    /// returning up to `max_records` handles ([SPEC_FULL] Section 4.4.2,
    /// `ServiceSearch`).
    pub async fn service_search(
        &self,
        t: &impl SdpTransaction,
        pattern: &[Uuid],
        max_records: u16,
    ) -> Result<Vec<u32>> {
        let mut handles = Vec::new();
        let mut cont = Continuation::NONE;
        for round in 0.. {
            if round >= MAX_CONTINUATION_ROUNDS {
                return Err(Error::protocol("SDP continuation watchdog exceeded"));
            }
            let txn = self.next_txn();
            let mut params = Vec::new();
            let list = DataElement::sequence(pattern.iter().copied().map(DataElement::Uuid).collect());
            params.extend_from_slice(&list.serialize());
            params.extend_from_slice(&max_records.to_be_bytes());
            cont.encode(&mut params);

            let req = build(PduId::ServiceSearchRequest, txn, &params);
            let resp = t.request(req).await?;
            let (id, rtxn, body) = parse_header(&resp)?;
            check_txn(id, PduId::ServiceSearchResponse, txn, rtxn)?;

            if body.len() < 4 {
                return Err(Error::invalid_packet("ServiceSearchResponse too short"));
            }
            let total = u16::from_be_bytes([body[0], body[1]]);
            let current = u16::from_be_bytes([body[2], body[3]]);
            let rest = &body[4..];
            let (handle_bytes, tail) = rest.split_at(usize::from(current) * 4);
            for chunk in handle_bytes.chunks_exact(4) {
                handles.push(u32::from_be_bytes(chunk.try_into().unwrap()));
            }
            let (next_cont, _) = Continuation::parse(tail)?;
            let _ = total;
            if next_cont.is_final() {
                break;
            }
            cont = next_cont;
        }
        Ok(handles)
    }

    /// Fetches matching attributes from a single record ([SPEC_FULL]
    /// Section 4.4.2, `ServiceAttribute`).
    pub async fn service_attribute(
        &self,
        t: &impl SdpTransaction,
        handle: u32,
        ids: &[AttributeIdFilter],
        max_bytes: u16,
    ) -> Result<Vec<DataElement>> {
        let id_list = filters_to_element(ids);
        self.attribute_loop(t, PduId::ServiceAttributeRequest, PduId::ServiceAttributeResponse, move |params| {
            params.extend_from_slice(&handle.to_be_bytes());
            params.extend_from_slice(&max_bytes.to_be_bytes());
            params.extend_from_slice(&id_list.serialize());
        })
        .await
    }

    /// Combined search-plus-attribute-fetch request ([SPEC_FULL] Section
    /// 4.4.2, `ServiceSearchAttribute`). Returns one `Sequence` per
    /// matching record (as the server emits them, concatenated across
    /// continuation rounds).
    pub async fn service_search_attribute(
        &self,
        t: &impl SdpTransaction,
        pattern: &[Uuid],
        ids: &[AttributeIdFilter],
        max_bytes: u16,
    ) -> Result<Vec<DataElement>> {
        let pattern_elem = DataElement::sequence(pattern.iter().copied().map(DataElement::Uuid).collect());
        let id_list = filters_to_element(ids);
        self.attribute_loop(
            t,
            PduId::ServiceSearchAttributeRequest,
            PduId::ServiceSearchAttributeResponse,
            move |params| {
                params.extend_from_slice(&pattern_elem.serialize());
                params.extend_from_slice(&max_bytes.to_be_bytes());
                params.extend_from_slice(&id_list.serialize());
            },
        )
        .await
    }

    async fn attribute_loop(
        &self,
        t: &impl SdpTransaction,
        req_id: PduId,
        resp_id: PduId,
        build_params: impl Fn(&mut Vec<u8>),
    ) -> Result<Vec<DataElement>> {
        let mut accumulated = Vec::new();
        let mut cont = Continuation::NONE;
        for round in 0.. {
            if round >= MAX_CONTINUATION_ROUNDS {
                return Err(Error::protocol("SDP continuation watchdog exceeded"));
            }
            let txn = self.next_txn();
            let mut params = Vec::new();
            build_params(&mut params);
            cont.encode(&mut params);

            let req = build(req_id, txn, &params);
            let resp = t.request(req).await?;
            let (id, rtxn, body) = parse_header(&resp)?;
            if id == PduId::ErrorResponse {
                let code = u16::from_be_bytes([body[0], body[1]]);
                return Err(Error::protocol(format!(
                    "SDP error {:?}",
                    SdpError::try_from(code).ok()
                )));
            }
            check_txn(id, resp_id, txn, rtxn)?;

            if body.len() < 2 {
                return Err(Error::invalid_packet("attribute response too short"));
            }
            let list_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
            let rest = &body[2..];
            if rest.len() < list_len {
                return Err(Error::invalid_packet("attribute list length mismatch"));
            }
            accumulated.extend_from_slice(&rest[..list_len]);
            let (next_cont, _) = Continuation::parse(&rest[list_len..])?;
            if next_cont.is_final() {
                break;
            }
            cont = next_cont;
        }
        let mut out = Vec::new();
        let mut rem = &accumulated[..];
        while !rem.is_empty() {
            let (e, tail) = DataElement::parse(rem)?;
            out.push(e);
            rem = tail;
        }
        Ok(out)
    }
}

fn filters_to_element(ids: &[AttributeIdFilter]) -> DataElement {
    DataElement::sequence(
        ids.iter()
            .map(|f| match *f {
                AttributeIdFilter::Id(id) => DataElement::u16(id),
                AttributeIdFilter::Range(start, end) => {
                    DataElement::u32(u32::from(start) << 16 | u32::from(end))
                }
            })
            .collect(),
    )
}

fn check_txn(got: PduId, want: PduId, want_txn: u16, got_txn: u16) -> Result<()> {
    if got != want {
        return Err(Error::protocol("unexpected SDP response PDU id"));
    }
    if got_txn != want_txn {
        return Err(Error::protocol("SDP response transaction id mismatch"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::server::Server;
    use std::sync::Arc;

    struct Loopback(Arc<parking_lot::Mutex<Server>>);

    impl SdpTransaction for Loopback {
        async fn request(&self, request: Vec<u8>) -> Result<Vec<u8>> {
            self.0.lock().handle_request(&request)
        }
    }

    #[tokio::test]
    async fn search_attribute_round_trip() {
        let mut server = Server::new();
        let handle = server.add_record(
            [Uuid::from_u16(0x1101)],
            [(super::super::ATTR_SERVICE_RECORD_HANDLE, DataElement::u32(0))],
        );
        let transport = Loopback(Arc::new(parking_lot::Mutex::new(server)));
        let client = Client::new();
        let results = client
            .service_search_attribute(
                &transport,
                &[Uuid::from_u16(0x1101)],
                &[AttributeIdFilter::Range(0x0000, 0xFFFF)],
                512,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let attrs = results[0].as_elements().unwrap();
        // alternating [id, value] pairs; at least the handle and class
        // id list attributes must be present.
        assert!(attrs.len() >= 4);
        let _ = handle;
    }
}
