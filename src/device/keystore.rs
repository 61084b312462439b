//! External key-storage collaborator ([SPEC_FULL] Section 6: Keystore).

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

use crate::crypto::{Irk, PairingKeys};
use crate::gap::Addr;

/// A boxed, owned future, used at the few seams where a collaborator trait
/// needs to be object-safe (held as `Arc<dyn Trait>`) while still exposing
/// `async fn`-shaped methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persists pairing key material across process restarts. The reference
/// implementation backs this with a JSON file; this crate only defines the
/// seam ([SPEC_FULL] Section 6) and leaves storage to the caller.
pub trait Keystore: Debug + Send + Sync {
    /// Returns the stored keys for `addr`, if any have been paired before.
    fn get(&self, addr: Addr) -> BoxFuture<'_, Option<PairingKeys>>;

    /// Records (or replaces) the keys paired with `addr`.
    fn update(&self, addr: Addr, keys: PairingKeys) -> BoxFuture<'_, crate::Result<()>>;

    /// Returns every stored `(IRK, identity address)` pair, used to
    /// populate the controller's resolving list at power-on.
    fn resolving_keys(&self) -> BoxFuture<'_, Vec<(Irk, Addr)>>;
}
