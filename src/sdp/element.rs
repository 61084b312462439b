//! Data Element codec: the recursive typed value SDP attributes and
//! records are built from ([SPEC_FULL] Section 4.4.1).
//!
//! `DataElement::parse` caches the exact input bytes on every node so that
//! [`DataElement::serialize`] can replay them unchanged, satisfying the
//! canonical round-trip invariant (an integer encoded in its "small" width
//! must not be re-widened on re-serialization).

use crate::gap::Uuid;

/// The 5-bit type field of a Data Element header ([SPEC_FULL] Section
/// 4.4.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TypeTag {
    Nil = 0,
    UnsignedInt = 1,
    SignedInt = 2,
    Uuid = 3,
    TextString = 4,
    Boolean = 5,
    Sequence = 6,
    Alternative = 7,
    Url = 8,
}

impl TypeTag {
    const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Nil,
            1 => Self::UnsignedInt,
            2 => Self::SignedInt,
            3 => Self::Uuid,
            4 => Self::TextString,
            5 => Self::Boolean,
            6 => Self::Sequence,
            7 => Self::Alternative,
            8 => Self::Url,
            _ => return None,
        })
    }
}

/// A parsed SDP Data Element ([SPEC_FULL] Section 4.4.1). Integer variants
/// carry a `width` (the original encoded byte width: 1, 2, 4, or 8); the
/// four variable-length-prefixed variants (`TextString`, `Url`, `Sequence`,
/// `Alternative`) carry a `size_index` (the original header size index: 5,
/// 6, or 7, selecting a 1/2/4-byte length prefix). Both exist so
/// re-serialization reproduces the exact input bytes even when the
/// original encoder didn't pick the shortest-fitting prefix.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum DataElement {
    Nil,
    UnsignedInt { value: u64, width: u8 },
    SignedInt { value: i64, width: u8 },
    Uuid(Uuid),
    TextString(Vec<u8>, u8),
    Boolean(bool),
    Sequence(Vec<DataElement>, u8),
    Alternative(Vec<DataElement>, u8),
    Url(Vec<u8>, u8),
}

impl DataElement {
    /// Convenience constructor for a small unsigned integer (1-byte width).
    #[must_use]
    pub const fn u8(v: u8) -> Self {
        Self::UnsignedInt { value: v as u64, width: 1 }
    }

    /// Convenience constructor for a 16-bit unsigned integer.
    #[must_use]
    pub const fn u16(v: u16) -> Self {
        Self::UnsignedInt { value: v as u64, width: 2 }
    }

    /// Convenience constructor for a 32-bit unsigned integer.
    #[must_use]
    pub const fn u32(v: u32) -> Self {
        Self::UnsignedInt { value: v as u64, width: 4 }
    }

    /// Builds a `TextString` from freshly-constructed (not parsed) bytes,
    /// picking the shortest length-prefix size index that fits.
    #[must_use]
    pub fn text_string(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let size_index = default_size_index(data.len());
        Self::TextString(data, size_index)
    }

    /// Builds a `Url` from freshly-constructed (not parsed) bytes, picking
    /// the shortest length-prefix size index that fits.
    #[must_use]
    pub fn url(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let size_index = default_size_index(data.len());
        Self::Url(data, size_index)
    }

    /// Builds a `Sequence` from freshly-constructed (not parsed) elements,
    /// picking the shortest length-prefix size index that fits.
    #[must_use]
    pub fn sequence(elems: Vec<Self>) -> Self {
        let size_index = default_size_index(encoded_len(&elems));
        Self::Sequence(elems, size_index)
    }

    /// Builds an `Alternative` from freshly-constructed (not parsed)
    /// elements, picking the shortest length-prefix size index that fits.
    #[must_use]
    pub fn alternative(elems: Vec<Self>) -> Self {
        let size_index = default_size_index(encoded_len(&elems));
        Self::Alternative(elems, size_index)
    }

    /// Returns this element's value as `u32`, if it is an unsigned integer
    /// that fits.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Self::UnsignedInt { value, .. } => u32::try_from(value).ok(),
            _ => None,
        }
    }

    /// Returns this element's UUID, if it is one.
    #[must_use]
    pub const fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Returns the nested elements of a `Sequence` or `Alternative`.
    #[must_use]
    pub fn as_elements(&self) -> Option<&[Self]> {
        match self {
            Self::Sequence(v, _) | Self::Alternative(v, _) => Some(v),
            _ => None,
        }
    }

    /// Recursively searches this element (and, for `Sequence`/
    /// `Alternative`, every nested element) for `uuid` ([SPEC_FULL]
    /// Section 4.4.2, matching rule).
    #[must_use]
    pub fn contains_uuid(&self, uuid: Uuid) -> bool {
        match self {
            Self::Uuid(u) => *u == uuid,
            Self::Sequence(v, _) | Self::Alternative(v, _) => v.iter().any(|e| e.contains_uuid(uuid)),
            _ => false,
        }
    }

    /// Parses one Data Element from the front of `bytes`, returning it and
    /// the unconsumed remainder.
    pub fn parse(bytes: &[u8]) -> crate::Result<(Self, &[u8])> {
        let &[header, ref rest @ ..] = bytes else {
            return Err(crate::Error::invalid_packet("empty data element"));
        };
        let type_tag = TypeTag::from_u8(header >> 3)
            .ok_or_else(|| crate::Error::invalid_packet("unknown data element type"))?;
        let size_index = header & 0x07;
        let (len, rest) = match size_index {
            0 if type_tag == TypeTag::Nil => (0, rest),
            0 => (1, rest),
            1 => (2, rest),
            2 => (4, rest),
            3 => (8, rest),
            4 => (16, rest),
            5 => read_len(rest, 1)?,
            6 => read_len(rest, 2)?,
            7 => read_len(rest, 4)?,
            _ => unreachable!("size_index is masked to 3 bits"),
        };
        if rest.len() < len {
            return Err(crate::Error::invalid_packet("data element value truncated"));
        }
        let (value, tail) = rest.split_at(len);
        let elem = Self::decode_value(type_tag, value, size_index)?;
        Ok((elem, tail))
    }

    fn decode_value(typ: TypeTag, value: &[u8], size_index: u8) -> crate::Result<Self> {
        Ok(match typ {
            TypeTag::Nil => Self::Nil,
            TypeTag::UnsignedInt => {
                let width = u8::try_from(value.len()).unwrap_or(8);
                Self::UnsignedInt { value: read_uint(value), width }
            }
            TypeTag::SignedInt => {
                let width = u8::try_from(value.len()).unwrap_or(8);
                Self::SignedInt { value: read_int(value), width }
            }
            TypeTag::Uuid => {
                // UUIDs are stored MSB-first on the wire; reverse to this
                // crate's internal little-endian representation.
                let mut be = value.to_vec();
                be.reverse();
                Uuid::from_le_bytes(&be)
                    .map(Self::Uuid)
                    .ok_or_else(|| crate::Error::invalid_packet("invalid UUID width"))?
            }
            TypeTag::TextString => Self::TextString(value.to_vec(), size_index),
            TypeTag::Boolean => {
                if value.len() != 1 {
                    return Err(crate::Error::invalid_packet("boolean element not 1 byte"));
                }
                Self::Boolean(value[0] != 0)
            }
            TypeTag::Sequence | TypeTag::Alternative => {
                let mut elems = Vec::new();
                let mut rem = value;
                while !rem.is_empty() {
                    let (e, tail) = Self::parse(rem)?;
                    elems.push(e);
                    rem = tail;
                }
                if typ == TypeTag::Sequence {
                    Self::Sequence(elems, size_index)
                } else {
                    Self::Alternative(elems, size_index)
                }
            }
            TypeTag::Url => Self::Url(value.to_vec(), size_index),
        })
    }

    /// Serializes this element, choosing the shortest encoding for
    /// integers — EXCEPT that parsed integers carry their original
    /// `width`, so a value parsed as a 4-byte "small" integer is written
    /// back as 4 bytes even if it would fit in 1, preserving byte-exact
    /// replay ([SPEC_FULL] Section 4.4.1).
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_into(&mut out);
        out
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Nil => out.push(tag_byte(TypeTag::Nil, 0)),
            Self::UnsignedInt { value, width } => {
                let idx = width_to_size_index(*width);
                out.push(tag_byte(TypeTag::UnsignedInt, idx));
                push_uint(out, *value, *width);
            }
            Self::SignedInt { value, width } => {
                let idx = width_to_size_index(*width);
                out.push(tag_byte(TypeTag::SignedInt, idx));
                push_int(out, *value, *width);
            }
            Self::Uuid(u) => {
                let bytes = u.to_pdu_bytes();
                let idx = width_to_size_index(u8::try_from(bytes.len()).unwrap());
                out.push(tag_byte(TypeTag::Uuid, idx));
                let mut be: Vec<u8> = bytes.to_vec();
                be.reverse();
                out.extend_from_slice(&be);
            }
            Self::TextString(s, size_index) => push_variable(out, TypeTag::TextString, s, *size_index),
            Self::Boolean(b) => {
                out.push(tag_byte(TypeTag::Boolean, 0));
                out.push(u8::from(*b));
            }
            Self::Sequence(elems, size_index) => push_container(out, TypeTag::Sequence, elems, *size_index),
            Self::Alternative(elems, size_index) => push_container(out, TypeTag::Alternative, elems, *size_index),
            Self::Url(s, size_index) => push_variable(out, TypeTag::Url, s, *size_index),
        }
    }
}

fn tag_byte(typ: TypeTag, size_index: u8) -> u8 {
    (typ as u8) << 3 | size_index
}

const fn width_to_size_index(width: u8) -> u8 {
    match width {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        16 => 4,
        _ => 0,
    }
}

fn read_len(rest: &[u8], n: usize) -> crate::Result<(usize, &[u8])> {
    if rest.len() < n {
        return Err(crate::Error::invalid_packet("data element length prefix truncated"));
    }
    let (prefix, tail) = rest.split_at(n);
    let len = prefix.iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
    Ok((len, tail))
}

fn read_uint(b: &[u8]) -> u64 {
    b.iter().fold(0u64, |acc, &x| (acc << 8) | u64::from(x))
}

fn read_int(b: &[u8]) -> i64 {
    let u = read_uint(b);
    let bits = b.len() * 8;
    if bits == 0 || bits >= 64 {
        return u as i64;
    }
    let shift = 64 - bits as u32;
    ((u << shift) as i64) >> shift
}

fn push_uint(out: &mut Vec<u8>, value: u64, width: u8) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - usize::from(width)..]);
}

fn push_int(out: &mut Vec<u8>, value: i64, width: u8) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - usize::from(width)..]);
}

/// Picks the shortest length-prefix size index (5/6/7) that can hold `len`,
/// for elements with no original wire encoding to preserve.
const fn default_size_index(len: usize) -> u8 {
    if len <= 0xFF {
        5
    } else if len <= 0xFFFF {
        6
    } else {
        7
    }
}

fn encoded_len(elems: &[DataElement]) -> usize {
    elems.iter().map(|e| e.serialize().len()).sum()
}

/// Writes `data`'s length prefix using `size_index` (5/6/7, a 1/2/4-byte
/// prefix) rather than always re-picking the shortest-fitting one, so a
/// parsed element replays its original wire encoding exactly.
fn push_variable(out: &mut Vec<u8>, typ: TypeTag, data: &[u8], size_index: u8) {
    let len = data.len();
    let len_bytes: Vec<u8> = match size_index {
        5 => vec![u8::try_from(len).unwrap_or(u8::MAX)],
        6 => u16::try_from(len).unwrap_or(u16::MAX).to_be_bytes().to_vec(),
        _ => u32::try_from(len).unwrap_or(u32::MAX).to_be_bytes().to_vec(),
    };
    out.push(tag_byte(typ, size_index));
    out.extend_from_slice(&len_bytes);
    out.extend_from_slice(data);
}

fn push_container(out: &mut Vec<u8>, typ: TypeTag, elems: &[DataElement], size_index: u8) {
    let mut body = Vec::new();
    for e in elems {
        e.serialize_into(&mut body);
    }
    push_variable(out, typ, &body, size_index);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_unsigned_int() {
        let raw = vec![0x08, 0x2A]; // UnsignedInt, 1 byte, value 42
        let (elem, rest) = DataElement::parse(&raw).unwrap();
        assert!(rest.is_empty());
        assert_eq!(elem, DataElement::UnsignedInt { value: 42, width: 1 });
        assert_eq!(elem.serialize(), raw);
    }

    #[test]
    fn round_trips_four_byte_int_even_though_value_is_small() {
        // UnsignedInt, size_index=2 (4 bytes), value 1 — must not shrink
        // to a 1-byte encoding on re-serialize.
        let raw = vec![0x09, 0x00, 0x00, 0x00, 0x01];
        let (elem, _) = DataElement::parse(&raw).unwrap();
        assert_eq!(elem.serialize(), raw);
    }

    #[test]
    fn round_trips_uuid() {
        let u = Uuid::from_u16(0x1101);
        let elem = DataElement::Uuid(u);
        let raw = elem.serialize();
        let (parsed, rest) = DataElement::parse(&raw).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.as_uuid(), Some(u));
    }

    #[test]
    fn round_trips_sequence() {
        let seq = DataElement::sequence(vec![
            DataElement::u16(0x0000),
            DataElement::Uuid(Uuid::from_u16(0x1101)),
        ]);
        let raw = seq.serialize();
        let (parsed, rest) = DataElement::parse(&raw).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, seq);
    }

    #[test]
    fn contains_uuid_recurses_into_sequences() {
        let target = Uuid::from_u16(0x1101);
        let seq = DataElement::sequence(vec![DataElement::sequence(vec![
            DataElement::Uuid(target),
        ])]);
        assert!(seq.contains_uuid(target));
        assert!(!seq.contains_uuid(Uuid::from_u16(0x1102)));
    }

    #[test]
    fn rejects_truncated_value() {
        let raw = vec![0x09, 0x00, 0x00]; // claims 4 bytes, only 2 present
        assert!(DataElement::parse(&raw).is_err());
    }

    #[test]
    fn round_trips_text_string_with_non_minimal_length_prefix() {
        // TextString, size_index=6 (2-byte length prefix), 3-byte value —
        // legal per Section 4.4.1 even though a 1-byte prefix would fit.
        let raw = vec![0x26, 0x00, 0x03, b'h', b'i', b'!'];
        let (elem, rest) = DataElement::parse(&raw).unwrap();
        assert!(rest.is_empty());
        assert_eq!(elem.serialize(), raw);
    }

    #[test]
    fn round_trips_sequence_with_non_minimal_length_prefix() {
        // Sequence, size_index=7 (4-byte length prefix), wrapping one u8.
        let raw = vec![0x37, 0x00, 0x00, 0x00, 0x02, 0x08, 0x01];
        let (elem, rest) = DataElement::parse(&raw).unwrap();
        assert!(rest.is_empty());
        assert_eq!(elem.serialize(), raw);
    }

    #[test]
    fn freshly_built_elements_pick_shortest_prefix() {
        let s = DataElement::text_string(b"hi".to_vec());
        assert_eq!(s.serialize(), vec![0x25, 0x02, b'h', b'i']);
    }
}
