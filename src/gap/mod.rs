//! Generic Access Profile primitives shared by every layer: device
//! addresses and Bluetooth UUIDs ([Vol 3] Part C).

pub use addr::{Addr, AddrType, RawAddr};
pub use uuid::Uuid;

mod addr;
#[path = "uuid.rs"]
mod uuid;

/// Which physical transport a connection or data transfer runs over
/// ([SPEC_FULL] Section 3: Connection). Link Layer (LE) and Basic
/// Rate/Enhanced Data Rate (classic) addresses and connections are kept
/// entirely separate even when two controllers share one [`RawAddr`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PhysicalTransport {
    Le,
    BrEdr,
}
