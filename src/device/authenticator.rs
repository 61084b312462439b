//! Pairing/encryption and controller-bring-up collaborators ([SPEC_FULL]
//! Section 6: Authenticator, Driver).

use std::fmt::Debug;

use crate::hci::ConnHandle;
use crate::host::{Host, Transport};

use super::keystore::BoxFuture;

/// Drives SMP/Secure Simple Pairing and encryption for a connection. This
/// crate's L2CAP/SDP/GATT layers never inspect key material directly; they
/// only ask this collaborator to run the handshake and report the
/// resulting encryption state.
pub trait Authenticator: Debug + Send + Sync {
    /// Runs pairing for `handle`, storing the resulting keys through the
    /// registered [`Keystore`](super::keystore::Keystore) collaborator.
    fn pair(&self, handle: ConnHandle) -> BoxFuture<'_, crate::Result<()>>;

    /// Enables link-layer encryption for `handle` using previously paired
    /// keys, pairing first if none exist.
    fn encrypt(&self, handle: ConnHandle) -> BoxFuture<'_, crate::Result<()>>;

    /// Raises `handle`'s encryption to authenticated (MITM-protected),
    /// pairing again with MITM protection if the existing keys lack it.
    fn authenticate(&self, handle: ConnHandle) -> BoxFuture<'_, crate::Result<()>>;
}

/// Controller-specific bring-up hook, run once immediately after the
/// standard power-on command sequence ([SPEC_FULL] Section 4.2.1). Used for
/// vendor commands a particular controller needs (for example, loading
/// firmware patches) that this crate has no business knowing about.
pub trait Driver<T: Transport>: Debug + Send + Sync {
    fn init_controller<'a>(&'a self, host: &'a Host<T>) -> BoxFuture<'a, crate::Result<()>>;
}
