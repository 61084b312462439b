//! Host-side Bluetooth protocol stack: HCI transport framing, L2CAP channel
//! management, SDP client/server, and a device orchestrator that ties them
//! together, plus an in-process link simulator for testing against a
//! virtual controller fabric instead of real hardware.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod config;
pub mod device;
pub mod error;
pub mod gap;
pub mod gatt;
pub mod hci;
pub mod host;
pub mod l2cap;
pub mod link;
pub mod logging;
pub mod sdp;

pub use error::{Error, Result};

/// Opaque pairing key material, kept in its own crate so it can carry the
/// [`zeroize`](https://docs.rs/zeroize) dependency without pulling it into
/// every consumer of this crate.
pub use fathom_crypto as crypto;

type SyncMutex<T> = parking_lot::Mutex<T>;
type AsyncMutex<T> = tokio::sync::Mutex<T>;
type AsyncRwLock<T> = tokio::sync::RwLock<T>;
