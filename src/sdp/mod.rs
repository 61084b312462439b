//! Service Discovery Protocol: the Data Element codec plus client/server
//! request-response transactions over the SDP fixed PSM ([SPEC_FULL]
//! Section 4.4).

mod element;

pub mod client;
pub mod server;

pub use element::DataElement;

use crate::gap::Uuid;

/// The reserved classic PSM SDP runs over ([SPEC_FULL] Section 4.4.2).
pub const PSM: u16 = crate::l2cap::PSM_SDP;

/// PDU id byte ([SPEC_FULL] Section 4.4.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive)]
#[non_exhaustive]
#[repr(u8)]
pub enum PduId {
    ErrorResponse = 0x01,
    ServiceSearchRequest = 0x02,
    ServiceSearchResponse = 0x03,
    ServiceAttributeRequest = 0x04,
    ServiceAttributeResponse = 0x05,
    ServiceSearchAttributeRequest = 0x06,
    ServiceSearchAttributeResponse = 0x07,
}

/// SDP error codes ([SPEC_FULL] Section 4.4.2, Errors).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::TryFromPrimitive, thiserror::Error)]
#[repr(u16)]
pub enum SdpError {
    #[error("invalid SDP version")]
    InvalidSdpVersion = 0x0001,
    #[error("invalid service record handle")]
    InvalidServiceRecordHandle = 0x0002,
    #[error("invalid request syntax")]
    InvalidRequestSyntax = 0x0003,
    #[error("invalid PDU size")]
    InvalidPduSize = 0x0004,
    #[error("invalid continuation state")]
    InvalidContinuationState = 0x0005,
    #[error("insufficient resources")]
    InsufficientResources = 0x0006,
}

/// SDP PDU header: pdu id (1) + transaction id (2 BE) + parameter length
/// (2 BE) ([SPEC_FULL] Section 4.4.2). All multi-byte integers in SDP
/// headers are big-endian, unlike the rest of the host stack.
pub const PDU_HDR: usize = 5;

/// Decodes an SDP PDU header, returning the PDU id, transaction id, and
/// the parameter bytes.
pub fn parse_header(pdu: &[u8]) -> crate::Result<(PduId, u16, &[u8])> {
    if pdu.len() < PDU_HDR {
        return Err(crate::Error::invalid_packet("SDP PDU shorter than header"));
    }
    let id = PduId::try_from(pdu[0])
        .map_err(|_| crate::Error::invalid_packet("unknown SDP PDU id"))?;
    let txn = u16::from_be_bytes([pdu[1], pdu[2]]);
    let len = usize::from(u16::from_be_bytes([pdu[3], pdu[4]]));
    let params = &pdu[PDU_HDR..];
    if params.len() != len {
        return Err(crate::Error::invalid_packet("SDP parameter length mismatch"));
    }
    Ok((id, txn, params))
}

/// Builds an SDP PDU from its id, transaction id, and parameter bytes.
#[must_use]
pub fn build(id: PduId, txn: u16, params: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(PDU_HDR + params.len());
    v.push(id as u8);
    v.extend_from_slice(&txn.to_be_bytes());
    v.extend_from_slice(&u16::try_from(params.len()).unwrap_or(u16::MAX).to_be_bytes());
    v.extend_from_slice(params);
    v
}

/// Builds an `SDP_ErrorResponse` PDU.
#[must_use]
pub fn build_error(txn: u16, err: SdpError) -> Vec<u8> {
    build(PduId::ErrorResponse, txn, &(err as u16).to_be_bytes())
}

/// A continuation-state blob, length-prefixed on the wire with a single
/// byte (0 means "no continuation", i.e. this is the final response)
/// ([SPEC_FULL] Section 4.4.2).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Continuation(pub Vec<u8>);

impl Continuation {
    /// The empty/terminal continuation state.
    pub const NONE: Self = Self(Vec::new());

    /// Parses a length-prefixed continuation blob from the tail of a
    /// response, returning it and the bytes that preceded it.
    pub fn parse(data: &[u8]) -> crate::Result<(Self, &[u8])> {
        let (&len, rest) = data
            .split_last()
            .ok_or_else(|| crate::Error::invalid_packet("SDP response missing continuation byte"))?;
        let len = usize::from(len);
        if rest.len() < len {
            return Err(crate::Error::invalid_packet("SDP continuation state truncated"));
        }
        let split_at = rest.len() - len;
        Ok((Self(rest[split_at..].to_vec()), &rest[..split_at]))
    }

    /// Appends this continuation's length-prefixed encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::try_from(self.0.len()).unwrap_or(u8::MAX));
        out.extend_from_slice(&self.0);
    }

    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.0.is_empty()
    }
}

/// Maximum number of continuation round trips before a transaction is
/// abandoned as a protocol-level infinite loop ([SPEC_FULL] Section
/// 4.4.2, continuation state watchdog).
pub const MAX_CONTINUATION_ROUNDS: usize = 64;

/// A 16-bit id or 32-bit `(start, end)` range from an attribute-id list
/// ([SPEC_FULL] Section 4.4.2, attribute-id list).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttributeIdFilter {
    Id(u16),
    Range(u16, u16),
}

impl AttributeIdFilter {
    #[must_use]
    pub const fn matches(self, id: u16) -> bool {
        match self {
            Self::Id(i) => i == id,
            Self::Range(start, end) => id >= start && id <= end,
        }
    }

    fn decode(e: &DataElement) -> Option<Self> {
        match e {
            DataElement::UnsignedInt { value, width: 2 } => {
                Some(Self::Id(u16::try_from(*value).ok()?))
            }
            DataElement::UnsignedInt { value, width: 4 } => {
                let v = u32::try_from(*value).ok()?;
                Some(Self::Range(u16::try_from(v >> 16).ok()?, u16::try_from(v & 0xFFFF).ok()?))
            }
            _ => None,
        }
    }

    fn decode_list(e: &DataElement) -> crate::Result<Vec<Self>> {
        let elems = e
            .as_elements()
            .ok_or_else(|| crate::Error::invalid_packet("attribute id list not a sequence"))?;
        elems
            .iter()
            .map(|e| Self::decode(e).ok_or_else(|| crate::Error::invalid_packet("bad attribute id element")))
            .collect()
    }
}

/// A service record: an ordered list of `(attribute id, value)` pairs
/// keyed by a 32-bit handle ([SPEC_FULL] Section 3: SDP service record).
/// Attribute id `0x0000` ([`ATTR_SERVICE_RECORD_HANDLE`]) always equals
/// `handle`.
#[derive(Clone, Debug)]
pub struct ServiceRecord {
    pub handle: u32,
    attributes: Vec<(u16, DataElement)>,
}

/// Attribute id of the service record handle, mirrored in every record
/// ([SPEC_FULL] Section 3).
pub const ATTR_SERVICE_RECORD_HANDLE: u16 = 0x0000;
/// Attribute id of the service class id list, used for UUID matching
/// ([SPEC_FULL] Section 3).
pub const ATTR_SERVICE_CLASS_ID_LIST: u16 = 0x0001;

impl ServiceRecord {
    /// Creates a record with the mandatory handle attribute plus
    /// `class_ids` as its class id list.
    #[must_use]
    pub fn new(handle: u32, class_ids: impl IntoIterator<Item = Uuid>) -> Self {
        let mut rec = Self { handle, attributes: Vec::new() };
        rec.set(ATTR_SERVICE_RECORD_HANDLE, DataElement::UnsignedInt { value: u64::from(handle), width: 4 });
        rec.set(
            ATTR_SERVICE_CLASS_ID_LIST,
            DataElement::sequence(class_ids.into_iter().map(DataElement::Uuid).collect()),
        );
        rec
    }

    /// Sets (inserting or replacing) an attribute value.
    pub fn set(&mut self, id: u16, value: DataElement) {
        if let Some(slot) = self.attributes.iter_mut().find(|(i, _)| *i == id) {
            slot.1 = value;
        } else {
            self.attributes.push((id, value));
        }
    }

    /// Returns attributes matching any of `filters`, sorted ascending by
    /// id ([SPEC_FULL] Section 4.4.2, attribute-id list).
    #[must_use]
    pub fn matching_attributes(&self, filters: &[AttributeIdFilter]) -> Vec<(u16, &DataElement)> {
        let mut out: Vec<_> = self
            .attributes
            .iter()
            .filter(|(id, _)| filters.iter().any(|f| f.matches(*id)))
            .map(|(id, v)| (*id, v))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Returns whether this record matches a `ServiceSearch` pattern: the
    /// pattern's UUIDs must all appear somewhere within some attribute
    /// value, recursing into sequences/alternatives ([SPEC_FULL] Section
    /// 4.4.2, matching rule).
    #[must_use]
    pub fn matches_pattern(&self, pattern: &[Uuid]) -> bool {
        pattern
            .iter()
            .all(|uuid| self.attributes.iter().any(|(_, v)| v.contains_uuid(*uuid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdu_header_round_trips() {
        let raw = build(PduId::ServiceSearchRequest, 7, &[1, 2, 3]);
        let (id, txn, params) = parse_header(&raw).unwrap();
        assert_eq!(id, PduId::ServiceSearchRequest);
        assert_eq!(txn, 7);
        assert_eq!(params, &[1, 2, 3]);
    }

    #[test]
    fn continuation_round_trips() {
        let mut out = vec![0xAA, 0xBB];
        Continuation(vec![1, 2]).encode(&mut out);
        let (cont, rest) = Continuation::parse(&out).unwrap();
        assert_eq!(cont.0, vec![1, 2]);
        assert_eq!(rest, &[0xAA, 0xBB]);
    }

    #[test]
    fn terminal_continuation_is_final() {
        let mut out = vec![0xAA];
        Continuation::NONE.encode(&mut out);
        let (cont, _) = Continuation::parse(&out).unwrap();
        assert!(cont.is_final());
    }

    #[test]
    fn record_matches_nested_uuid() {
        let mut rec = ServiceRecord::new(0x0001_0000, [Uuid::from_u16(0x1101)]);
        rec.set(
            0x0004,
            DataElement::sequence(vec![DataElement::sequence(vec![DataElement::Uuid(
                Uuid::from_u16(0x0100),
            )])]),
        );
        assert!(rec.matches_pattern(&[Uuid::from_u16(0x1101)]));
        assert!(!rec.matches_pattern(&[Uuid::from_u16(0x1102)]));
    }

    #[test]
    fn attribute_filter_decodes_id_and_range() {
        let id = DataElement::u16(0x0001);
        assert_eq!(AttributeIdFilter::decode(&id), Some(AttributeIdFilter::Id(0x0001)));
        let range = DataElement::u32(0x0000_FFFF);
        assert_eq!(
            AttributeIdFilter::decode(&range),
            Some(AttributeIdFilter::Range(0x0000, 0xFFFF))
        );
    }
}
