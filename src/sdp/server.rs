//! SDP server: service record storage plus `ServiceSearch`/
//! `ServiceAttribute`/`ServiceSearchAttribute` request handling with
//! byte-offset continuation state ([SPEC_FULL] Section 4.4.2).

use crate::gap::Uuid;

use super::{
    build, build_error, parse_header, AttributeIdFilter, Continuation, DataElement, PduId,
    SdpError, ServiceRecord,
};

/// Holds the local service record database and answers SDP requests.
/// Continuation state is encoded as a 4-byte big-endian byte offset into
/// a deterministically recomputed full response, so the server itself
/// carries no per-transaction session state ([SPEC_FULL] Section 4.4.2,
/// continuation state).
#[derive(Debug, Default)]
pub struct Server {
    records: Vec<ServiceRecord>,
    next_handle: u32,
}

impl Server {
    #[must_use]
    pub fn new() -> Self {
        Self { records: Vec::new(), next_handle: 0x1000_0000 }
    }

    /// Adds a record built from a class-id list and attribute set,
    /// returning its assigned handle. A convenience wrapper over
    /// [`Self::add`] for callers (and tests) that do not need to choose
    /// handles themselves.
    pub fn add_record(
        &mut self,
        class_ids: impl IntoIterator<Item = Uuid>,
        attrs: impl IntoIterator<Item = (u16, DataElement)>,
    ) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        let mut rec = ServiceRecord::new(handle, class_ids);
        for (id, value) in attrs {
            rec.set(id, value);
        }
        self.records.push(rec);
        handle
    }

    /// Inserts a fully-constructed record, replacing any existing record
    /// with the same handle.
    pub fn add(&mut self, record: ServiceRecord) {
        if let Some(slot) = self.records.iter_mut().find(|r| r.handle == record.handle) {
            *slot = record;
        } else {
            self.records.push(record);
        }
    }

    /// Removes the record with `handle`, if present.
    pub fn remove(&mut self, handle: u32) {
        self.records.retain(|r| r.handle != handle);
    }

    /// Handles one raw SDP request PDU, returning the raw response PDU.
    pub fn handle_request(&self, req: &[u8]) -> crate::Result<Vec<u8>> {
        let (id, txn, params) = match parse_header(req) {
            Ok(v) => v,
            Err(_) => return Ok(build_error(0, SdpError::InvalidPduSize)),
        };
        let result = match id {
            PduId::ServiceSearchRequest => self.service_search(params).map(|b| (PduId::ServiceSearchResponse, b)),
            PduId::ServiceAttributeRequest => {
                self.service_attribute(params).map(|b| (PduId::ServiceAttributeResponse, b))
            }
            PduId::ServiceSearchAttributeRequest => self
                .service_search_attribute(params)
                .map(|b| (PduId::ServiceSearchAttributeResponse, b)),
            _ => Err(SdpError::InvalidRequestSyntax),
        };
        Ok(match result {
            Ok((pdu_id, body)) => build(pdu_id, txn, &body),
            Err(e) => build_error(txn, e),
        })
    }

    fn service_search(&self, params: &[u8]) -> Result<Vec<u8>, SdpError> {
        let (pattern_elem, rest) =
            DataElement::parse(params).map_err(|_| SdpError::InvalidRequestSyntax)?;
        if rest.len() < 2 {
            return Err(SdpError::InvalidRequestSyntax);
        }
        let max_count = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
        let (cont, _) =
            Continuation::parse(&rest[2..]).map_err(|_| SdpError::InvalidContinuationState)?;
        let offset = decode_offset(&cont)?;

        let pattern = pattern_element_to_uuids(&pattern_elem)?;
        let matches: Vec<u32> =
            self.records.iter().filter(|r| r.matches_pattern(&pattern)).map(|r| r.handle).collect();

        let total = matches.len();
        if offset > total {
            return Err(SdpError::InvalidContinuationState);
        }
        let take = max_count.min(total - offset);
        let chunk = &matches[offset..offset + take];

        let mut body = Vec::new();
        body.extend_from_slice(&u16::try_from(total).unwrap_or(u16::MAX).to_be_bytes());
        body.extend_from_slice(&u16::try_from(chunk.len()).unwrap_or(u16::MAX).to_be_bytes());
        for h in chunk {
            body.extend_from_slice(&h.to_be_bytes());
        }
        encode_continuation(&mut body, offset + take, total);
        Ok(body)
    }

    fn service_attribute(&self, params: &[u8]) -> Result<Vec<u8>, SdpError> {
        if params.len() < 6 {
            return Err(SdpError::InvalidRequestSyntax);
        }
        let handle = u32::from_be_bytes(params[0..4].try_into().unwrap());
        let max_bytes = usize::from(u16::from_be_bytes([params[4], params[5]]));
        let (id_list_elem, rest) =
            DataElement::parse(&params[6..]).map_err(|_| SdpError::InvalidRequestSyntax)?;
        let (cont, _) =
            Continuation::parse(rest).map_err(|_| SdpError::InvalidContinuationState)?;
        let offset = decode_offset(&cont)?;

        let record = self
            .records
            .iter()
            .find(|r| r.handle == handle)
            .ok_or(SdpError::InvalidServiceRecordHandle)?;
        let filters =
            AttributeIdFilter::decode_list(&id_list_elem).map_err(|_| SdpError::InvalidRequestSyntax)?;
        let full = attribute_list_bytes(std::iter::once(record), &filters);

        let mut body = Vec::new();
        append_byte_chunk(&mut body, &full, offset, max_bytes)?;
        Ok(body)
    }

    fn service_search_attribute(&self, params: &[u8]) -> Result<Vec<u8>, SdpError> {
        let (pattern_elem, rest) =
            DataElement::parse(params).map_err(|_| SdpError::InvalidRequestSyntax)?;
        if rest.len() < 2 {
            return Err(SdpError::InvalidRequestSyntax);
        }
        let max_bytes = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
        let (id_list_elem, rest) =
            DataElement::parse(&rest[2..]).map_err(|_| SdpError::InvalidRequestSyntax)?;
        let (cont, _) =
            Continuation::parse(rest).map_err(|_| SdpError::InvalidContinuationState)?;
        let offset = decode_offset(&cont)?;

        let pattern = pattern_element_to_uuids(&pattern_elem)?;
        let filters =
            AttributeIdFilter::decode_list(&id_list_elem).map_err(|_| SdpError::InvalidRequestSyntax)?;
        let matching = self.records.iter().filter(|r| r.matches_pattern(&pattern));
        let full = attribute_list_bytes(matching, &filters);

        let mut body = Vec::new();
        append_byte_chunk(&mut body, &full, offset, max_bytes)?;
        Ok(body)
    }
}

/// Appends `AttributeListByteCount` + chunk + continuation to `out`,
/// slicing `full` at `offset` for up to `max_bytes`.
fn append_byte_chunk(
    out: &mut Vec<u8>,
    full: &[u8],
    offset: usize,
    max_bytes: usize,
) -> Result<(), SdpError> {
    if offset > full.len() {
        return Err(SdpError::InvalidContinuationState);
    }
    let take = max_bytes.min(full.len() - offset);
    let chunk = &full[offset..offset + take];
    out.extend_from_slice(&u16::try_from(chunk.len()).unwrap_or(u16::MAX).to_be_bytes());
    out.extend_from_slice(chunk);
    encode_continuation(out, offset + take, full.len());
    Ok(())
}

fn attribute_list_bytes<'a>(
    records: impl Iterator<Item = &'a ServiceRecord>,
    filters: &[AttributeIdFilter],
) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        let pairs = record.matching_attributes(filters);
        let seq = DataElement::sequence(
            pairs
                .into_iter()
                .flat_map(|(id, value)| [DataElement::u16(id), value.clone()])
                .collect(),
        );
        out.extend_from_slice(&seq.serialize());
    }
    out
}

fn pattern_element_to_uuids(elem: &DataElement) -> Result<Vec<Uuid>, SdpError> {
    elem.as_elements()
        .ok_or(SdpError::InvalidRequestSyntax)?
        .iter()
        .map(|e| e.as_uuid().ok_or(SdpError::InvalidRequestSyntax))
        .collect()
}

fn decode_offset(cont: &Continuation) -> Result<usize, SdpError> {
    if cont.is_final() {
        return Ok(0);
    }
    let bytes: [u8; 4] = cont.0.as_slice().try_into().map_err(|_| SdpError::InvalidContinuationState)?;
    Ok(usize::try_from(u32::from_be_bytes(bytes)).unwrap_or(usize::MAX))
}

fn encode_continuation(out: &mut Vec<u8>, next_offset: usize, total_len: usize) {
    if next_offset >= total_len {
        Continuation::NONE.encode(out);
    } else {
        let offset = u32::try_from(next_offset).unwrap_or(u32::MAX);
        Continuation(offset.to_be_bytes().to_vec()).encode(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_server() -> Server {
        let mut s = Server::new();
        s.add_record(
            [Uuid::from_u16(0x1101)],
            [(0x0100, DataElement::text_string(b"Serial Port".to_vec()))],
        );
        s
    }

    #[test]
    fn service_search_finds_matching_handle() {
        let s = sample_server();
        let pattern = DataElement::sequence(vec![DataElement::Uuid(Uuid::from_u16(0x1101))]);
        let mut params = pattern.serialize();
        params.extend_from_slice(&10u16.to_be_bytes());
        Continuation::NONE.encode(&mut params);
        let req = build(PduId::ServiceSearchRequest, 1, &params);
        let resp = s.handle_request(&req).unwrap();
        let (id, _, body) = parse_header(&resp).unwrap();
        assert_eq!(id, PduId::ServiceSearchResponse);
        let total = u16::from_be_bytes([body[0], body[1]]);
        assert_eq!(total, 1);
    }

    #[test]
    fn service_search_rejects_unmatched_pattern() {
        let s = sample_server();
        let pattern = DataElement::sequence(vec![DataElement::Uuid(Uuid::from_u16(0x9999))]);
        let mut params = pattern.serialize();
        params.extend_from_slice(&10u16.to_be_bytes());
        Continuation::NONE.encode(&mut params);
        let req = build(PduId::ServiceSearchRequest, 1, &params);
        let resp = s.handle_request(&req).unwrap();
        let (id, _, body) = parse_header(&resp).unwrap();
        assert_eq!(id, PduId::ServiceSearchResponse);
        assert_eq!(u16::from_be_bytes([body[0], body[1]]), 0);
    }

    #[test]
    fn service_attribute_unknown_handle_errors() {
        let s = sample_server();
        let mut params = 0xFFFF_FFFFu32.to_be_bytes().to_vec();
        params.extend_from_slice(&512u16.to_be_bytes());
        let ids = DataElement::sequence(vec![DataElement::u32(0x0000_FFFF)]);
        params.extend_from_slice(&ids.serialize());
        Continuation::NONE.encode(&mut params);
        let req = build(PduId::ServiceAttributeRequest, 2, &params);
        let resp = s.handle_request(&req).unwrap();
        let (id, _, body) = parse_header(&resp).unwrap();
        assert_eq!(id, PduId::ErrorResponse);
        let code = u16::from_be_bytes([body[0], body[1]]);
        assert_eq!(code, SdpError::InvalidServiceRecordHandle as u16);
    }

    #[test]
    fn service_attribute_chunks_across_continuation() {
        let mut s = Server::new();
        let handle = s.add_record(
            [Uuid::from_u16(0x1101)],
            [(0x0100, DataElement::text_string(vec![b'x'; 100]))],
        );
        let mut params = handle.to_be_bytes().to_vec();
        params.extend_from_slice(&16u16.to_be_bytes()); // small max byte count forces chunking
        let ids = DataElement::sequence(vec![DataElement::u32(0x0000_FFFF)]);
        params.extend_from_slice(&ids.serialize());
        Continuation::NONE.encode(&mut params);

        let mut full = Vec::new();
        let mut req = build(PduId::ServiceAttributeRequest, 3, &params);
        loop {
            let resp = s.handle_request(&req).unwrap();
            let (id, _, body) = parse_header(&resp).unwrap();
            assert_eq!(id, PduId::ServiceAttributeResponse);
            let len = usize::from(u16::from_be_bytes([body[0], body[1]]));
            full.extend_from_slice(&body[2..2 + len]);
            let (cont, _) = Continuation::parse(&body[2 + len..]).unwrap();
            if cont.is_final() {
                break;
            }
            let mut next_params = handle.to_be_bytes().to_vec();
            next_params.extend_from_slice(&16u16.to_be_bytes());
            next_params.extend_from_slice(&ids.serialize());
            cont.encode(&mut next_params);
            req = build(PduId::ServiceAttributeRequest, 3, &next_params);
        }
        let (elem, tail) = DataElement::parse(&full).unwrap();
        assert!(tail.is_empty());
        let attrs = elem.as_elements().unwrap();
        // [handle-id, handle-value, class-list-id, class-list-value, 0x0100-id, text-value]
        assert_eq!(attrs.len(), 6);
    }
}
