//! Command constructors, grouped the way [Vol 4] Part E, Section 7 groups
//! them by OGF.

pub mod classic;
pub mod hci_control;
pub mod info;
pub mod le;
