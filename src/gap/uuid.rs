#![allow(clippy::use_self)]

use std::fmt::{self, Debug, Display, Formatter};
use std::hash::Hash;
use std::num::NonZeroU128;

const SHIFT: u32 = u128::BITS - u32::BITS;
const BASE: u128 = 0x0000_0000_0000_1000_8000_00805F9B34FB;
const MASK_16: u128 = !((u16::MAX as u128) << SHIFT);
const MASK_32: u128 = !((u32::MAX as u128) << SHIFT);

/// 16-, 32-, or 128-bit UUID ([Vol 3] Part B, Section 2.5.1).
///
/// Internally always stored as the full 128-bit value; [`Uuid::to_pdu_bytes`]
/// recovers the shortest encoding that round-trips.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid(NonZeroU128);

impl Uuid {
    /// Creates a UUID from a 128-bit value.
    #[must_use]
    pub const fn new(v: u128) -> Option<Self> {
        match NonZeroU128::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Creates a UUID from a `u128` without checking whether the value is
    /// non-zero.
    ///
    /// # Safety
    ///
    /// `v` must not be zero.
    #[must_use]
    pub const unsafe fn new_unchecked(v: u128) -> Self {
        Self(NonZeroU128::new_unchecked(v))
    }

    /// Creates a UUID from an assigned 16-bit Bluetooth SIG value.
    #[must_use]
    pub const fn from_u16(v: u16) -> Self {
        assert!(v != 0);
        // SAFETY: v != 0 implies the shifted-or'd value is != 0.
        unsafe { Self::new_unchecked((v as u128) << SHIFT | BASE) }
    }

    /// Creates a UUID from an assigned 32-bit Bluetooth SIG value.
    #[must_use]
    pub const fn from_u32(v: u32) -> Self {
        assert!(v != 0);
        // SAFETY: v != 0 implies the shifted-or'd value is != 0.
        unsafe { Self::new_unchecked((v as u128) << SHIFT | BASE) }
    }

    /// Converts a 16-bit Bluetooth SIG UUID to `u16`, or `None` if this
    /// UUID does not fit the 16-bit base form.
    #[must_use]
    pub fn as_u16(self) -> Option<u16> {
        #[allow(clippy::cast_possible_truncation)]
        let v = (self.0.get() >> SHIFT) as u16;
        (self.0.get() & MASK_16 == BASE && v > 0).then_some(v)
    }

    /// Converts a 32-bit Bluetooth SIG UUID to `u32`, or `None` otherwise.
    #[must_use]
    pub fn as_u32(self) -> Option<u32> {
        #[allow(clippy::cast_possible_truncation)]
        let v = (self.0.get() >> SHIFT) as u32;
        (self.0.get() & MASK_32 == BASE && v > u32::from(u16::MAX)).then_some(v)
    }

    /// Returns the full 128-bit value.
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0.get()
    }

    /// Parses a UUID from its on-the-wire little-endian bytes: 2 bytes for
    /// a 16-bit UUID, 4 for 32-bit, 16 for 128-bit.
    pub fn from_le_bytes(b: &[u8]) -> Option<Self> {
        match b.len() {
            2 => Some(Self::from_u16(u16::from_le_bytes([b[0], b[1]]))),
            4 => Some(Self::from_u32(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
            16 => {
                let mut a = [0u8; 16];
                a.copy_from_slice(b);
                Self::new(u128::from_le_bytes(a))
            }
            _ => None,
        }
    }

    /// Serializes to little-endian bytes at the shortest width that
    /// round-trips: 2 bytes if this is an assigned 16-bit UUID, 4 if it is
    /// an assigned 32-bit UUID, otherwise the full 16-byte form.
    #[must_use]
    pub fn to_pdu_bytes(self) -> smallvec::SmallVec<[u8; 16]> {
        use smallvec::SmallVec;
        if let Some(v) = self.as_u16() {
            SmallVec::from_slice(&v.to_le_bytes())
        } else if let Some(v) = self.as_u32() {
            SmallVec::from_slice(&v.to_le_bytes())
        } else {
            SmallVec::from_slice(&self.0.get().to_le_bytes())
        }
    }
}

impl From<u16> for Uuid {
    fn from(v: u16) -> Self {
        Self::from_u16(v)
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        #[allow(clippy::cast_possible_truncation)]
        if let Some(v) = self.as_u16() {
            write!(f, "{v:#06X}")
        } else if let Some(v) = self.as_u32() {
            write!(f, "{v:#010X}")
        } else {
            let v = self.0.get();
            write!(
                f,
                "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
                (v >> 96) as u32,
                (v >> 80) as u16,
                (v >> 64) as u16,
                (v >> 48) as u16,
                (v & ((1 << 48) - 1)) as u64
            )
        }
    }
}

impl Display for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl From<Uuid> for u128 {
    fn from(u: Uuid) -> Self {
        u.0.get()
    }
}

/// SDP/GATT service class identifiers used by the bundled test fixtures
/// ([Assigned Numbers] Section 3.3). Not an exhaustive list: callers needing
/// other assigned numbers construct a [`Uuid`] directly with
/// [`Uuid::from_u16`].
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, strum::Display)]
#[non_exhaustive]
#[repr(u16)]
pub enum ServiceClass {
    ServiceDiscoveryServer = 0x1000,
    BrowseGroupDescriptor = 0x1001,
    SerialPort = 0x1101,
    AudioSource = 0x110A,
    AudioSink = 0x110B,
    Handsfree = 0x111E,
    PublicBrowseGroup = 0x1002,
    GenericAccess = 0x1800,
    GenericAttribute = 0x1801,
}

impl From<ServiceClass> for Uuid {
    fn from(v: ServiceClass) -> Self {
        Self::from_u16(v as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_bit_round_trip() {
        let u = Uuid::from_u16(0x1101);
        assert_eq!(u.as_u16(), Some(0x1101));
        assert_eq!(&*u.to_pdu_bytes(), &[0x01, 0x11]);
    }

    #[test]
    fn hundred_twenty_eight_bit_round_trip() {
        let bytes: [u8; 16] = [
            0xfb, 0x34, 0x9b, 0x5f, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0xaa, 0xbb,
            0x00, 0x00,
        ];
        let u = Uuid::from_le_bytes(&bytes).unwrap();
        assert_eq!(u.as_u16(), None);
        assert_eq!(&*u.to_pdu_bytes(), &bytes[..]);
    }

    #[test]
    fn from_le_bytes_rejects_bad_length() {
        assert!(Uuid::from_le_bytes(&[1, 2, 3]).is_none());
    }
}
