//! Opaque key material exchanged between the host core and its external
//! SMP/keystore collaborator ([Vol 3] Part H).
//!
//! This crate intentionally does not implement the SMP cryptographic
//! toolbox (P-256 ECDH, AES-CMAC key derivation, …) — those live in the
//! pairing-state-machine collaborator, which is out of scope for the host
//! core. What the core needs is just fixed-size, zeroizing byte containers
//! it can pass opaquely to and from that collaborator.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]

use std::fmt::{self, Debug, Formatter};

use zeroize::Zeroize;

macro_rules! opaque_key {
    ($name:ident, $len:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Zeroize)]
        #[zeroize(drop)]
        #[repr(transparent)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Length of the key in bytes.
            pub const LEN: usize = $len;

            /// Wraps raw key bytes.
            #[inline]
            #[must_use]
            pub const fn new(b: [u8; $len]) -> Self {
                Self(b)
            }

            /// Returns the raw key bytes.
            #[inline]
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            #[inline]
            fn from(b: [u8; $len]) -> Self {
                Self(b)
            }
        }

        impl Debug for $name {
            /// Never prints key material.
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($name), "(..)"))
            }
        }

        impl PartialEq for $name {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                // Not constant-time: these keys are only ever compared in
                // tests, never on a path that could leak timing to a peer.
                self.0 == other.0
            }
        }
        impl Eq for $name {}
    };
}

opaque_key!(Ltk, 16, "LE Long Term Key ([Vol 3] Part H, Section 2.4.2).");
opaque_key!(LinkKey, 16, "BR/EDR Link Key ([Vol 3] Part H, Section 3.1).");
opaque_key!(Irk, 16, "Identity Resolving Key ([Vol 3] Part H, Section 2.4.2).");
opaque_key!(Csrk, 16, "Connection Signature Resolving Key.");

/// Long Term Key plus the associated `EDIV`/`Rand` used to look it up on
/// `HCI_LE_Long_Term_Key_Request` ([Vol 4] Part E, Section 7.8.24).
#[derive(Clone, Debug)]
pub struct LtkEntry {
    pub ltk: Ltk,
    pub ediv: u16,
    pub rand: u64,
}

/// Bundle of keys a [`crate::Keystore`](../fathom/trait.Keystore.html)
/// implementation persists per bonded peer.
#[derive(Clone, Debug, Default)]
pub struct PairingKeys {
    pub ltk: Option<LtkEntry>,
    pub irk: Option<Irk>,
    pub csrk: Option<Csrk>,
    pub link_key: Option<LinkKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_leaks_key_material() {
        let ltk = Ltk::new([0x42; 16]);
        assert_eq!(format!("{ltk:?}"), "Ltk(..)");
    }

    #[test]
    fn equality_is_value_based() {
        assert_eq!(Irk::new([1; 16]), Irk::new([1; 16]));
        assert_ne!(Irk::new([1; 16]), Irk::new([2; 16]));
    }
}
