use std::fmt::{self, Debug, Display, Formatter};

/// Raw, untyped 6-byte little-endian `BD_ADDR` as it appears on the wire
/// ([Vol 6] Part B, Section 1.3). Distinct from [`Addr`] because some HCI
/// parameters carry an address without an accompanying type byte.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct RawAddr(pub [u8; 6]);

impl RawAddr {
    /// The `00:00:00:00:00:00` placeholder address.
    pub const ZERO: Self = Self([0; 6]);
}

impl Debug for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{g:02X}:{e:02X}:{d:02X}:{c:02X}:{b:02X}:{a:02X}")
    }
}

/// Address type tag ([Vol 4] Part E, Section 7.8.5 and related).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddrType {
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
    Anonymous,
    /// A random address whose resolution status is not yet known (used for
    /// reports received before the resolving list lookup completes).
    Unresolved,
}

/// A classified Bluetooth device address: 6 address bytes plus a type tag
/// ([SPEC_FULL] Section 3: Address).
#[derive(Clone, Copy, Eq)]
pub struct Addr {
    raw: RawAddr,
    typ: AddrType,
}

impl Addr {
    /// Creates a new address from raw bytes and a type tag.
    #[must_use]
    pub const fn new(raw: RawAddr, typ: AddrType) -> Self {
        Self { raw, typ }
    }

    /// Creates a public address.
    #[must_use]
    pub const fn public(raw: RawAddr) -> Self {
        Self::new(raw, AddrType::Public)
    }

    /// Creates a random address, classifying it by its top two bits.
    #[must_use]
    pub fn random(raw: RawAddr) -> Self {
        Self::new(raw, AddrType::Random)
    }

    /// Builds an address from a peer-address-type byte (as transmitted in
    /// connection and advertising report events) and raw bytes.
    #[must_use]
    pub fn peer(addr_type: u8, raw: RawAddr) -> Self {
        let typ = match addr_type {
            0x00 => AddrType::Public,
            0x01 => AddrType::Random,
            0x02 => AddrType::PublicIdentity,
            0x03 => AddrType::RandomIdentity,
            0xFF => AddrType::Anonymous,
            _ => AddrType::Unresolved,
        };
        Self::new(raw, typ)
    }

    /// Raw address bytes.
    #[must_use]
    pub const fn raw(self) -> RawAddr {
        self.raw
    }

    /// Address type tag.
    #[must_use]
    pub const fn addr_type(self) -> AddrType {
        self.typ
    }

    /// Returns whether this is a public (or public-identity) address.
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self.typ, AddrType::Public | AddrType::PublicIdentity)
    }

    /// Returns whether this is a Resolvable Private Address: random, with
    /// the top two bits of the most significant byte equal to `01`
    /// ([Vol 6] Part B, Section 1.3.2.2).
    #[must_use]
    pub const fn is_resolvable(self) -> bool {
        matches!(self.typ, AddrType::Random) && self.raw.0[5] >> 6 == 0b01
    }

    /// Returns whether this is a Static Device Address: random, with the
    /// top two bits of the most significant byte equal to `11`
    /// ([Vol 6] Part B, Section 1.3.2.1).
    #[must_use]
    pub const fn is_static(self) -> bool {
        matches!(self.typ, AddrType::Random) && self.raw.0[5] >> 6 == 0b11
    }

    /// Returns whether this address has already been resolved to an
    /// identity address.
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        matches!(self.typ, AddrType::PublicIdentity | AddrType::RandomIdentity)
    }
}

impl PartialEq for Addr {
    /// Equality compares bytes AND public-ness, per the data model: a
    /// public and a random address with identical bytes are distinct
    /// peers.
    fn eq(&self, other: &Self) -> bool {
        self.raw.0 == other.raw.0 && self.is_public() == other.is_public()
    }
}

impl std::hash::Hash for Addr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.0.hash(state);
        self.is_public().hash(state);
    }
}

impl Debug for Addr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.raw, self.typ)
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_resolvable_private_address() {
        let a = Addr::random(RawAddr([0x01, 0x02, 0x03, 0x04, 0x05, 0b0100_0000]));
        assert!(a.is_resolvable());
        assert!(!a.is_static());
    }

    #[test]
    fn classifies_static_address() {
        let a = Addr::random(RawAddr([0, 0, 0, 0, 0, 0b1100_0000]));
        assert!(a.is_static());
        assert!(!a.is_resolvable());
    }

    #[test]
    fn equality_includes_public_ness() {
        let raw = RawAddr([1, 2, 3, 4, 5, 6]);
        assert_ne!(Addr::public(raw), Addr::random(raw));
        assert_eq!(Addr::public(raw), Addr::public(raw));
    }
}
