//! Host Controller Interface: packet framing, opcodes, status codes, and
//! event decoding ([Vol 4] Part E).

use std::time::Duration;

pub use conn::*;
pub use consts::*;
pub use event::*;

mod conn;
mod consts;
mod event;

/// A single HCI packet crossing the host/controller boundary, tagged by
/// [`PacketType`] ([Vol 4] Part A, Section 2). The payload excludes the
/// type-tag octet but includes each packet kind's own header.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HciPacket {
    Command(Vec<u8>),
    Acl(Vec<u8>),
    Sco(Vec<u8>),
    Event(Vec<u8>),
    Iso(Vec<u8>),
}

impl HciPacket {
    /// Returns the [`PacketType`] tag for this packet.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Self::Command(_) => PacketType::Command,
            Self::Acl(_) => PacketType::Acl,
            Self::Sco(_) => PacketType::Sco,
            Self::Event(_) => PacketType::Event,
            Self::Iso(_) => PacketType::Iso,
        }
    }

    /// Returns the packet payload, excluding the `PacketType` tag.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Command(b) | Self::Acl(b) | Self::Sco(b) | Self::Event(b) | Self::Iso(b) => b,
        }
    }

    /// Reconstructs a packet from its `PacketType` tag and payload.
    #[must_use]
    pub fn from_parts(t: PacketType, payload: Vec<u8>) -> Self {
        match t {
            PacketType::Command => Self::Command(payload),
            PacketType::Acl => Self::Acl(payload),
            PacketType::Sco => Self::Sco(payload),
            PacketType::Event => Self::Event(payload),
            PacketType::Iso => Self::Iso(payload),
        }
    }
}

/// Incremental byte packer used to build HCI command parameter blocks,
/// mirroring the chained-call style of `structbuf`'s packer without
/// depending on its exact field layout.
#[derive(Debug, Default)]
pub struct Command(Vec<u8>);

impl Command {
    fn new() -> Self {
        Self(Vec::with_capacity(16))
    }

    /// Appends a single byte from anything that converts to `u8`.
    pub fn u8(&mut self, v: impl Into<u8>) -> &mut Self {
        self.0.push(v.into());
        self
    }

    /// Appends a boolean as a single 0/1 byte.
    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(u8::from(v))
    }

    /// Appends a signed byte.
    pub fn i8(&mut self, v: i8) -> &mut Self {
        self.0.push(v.to_le_bytes()[0]);
        self
    }

    /// Appends a little-endian `u16`.
    pub fn u16(&mut self, v: impl Into<u16>) -> &mut Self {
        self.0.extend_from_slice(&v.into().to_le_bytes());
        self
    }

    /// Appends the low 3 bytes of a `u32`, little-endian.
    pub fn u24(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes()[..3]);
        self
    }

    /// Appends a little-endian `u64`.
    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Appends a little-endian-encoded 16-byte key or value.
    pub fn u128(&mut self, v: &[u8; 16]) -> &mut Self {
        self.0.extend_from_slice(v);
        self
    }

    /// Appends raw bytes verbatim.
    pub fn put(&mut self, v: impl AsRef<[u8]>) -> &mut Self {
        self.0.extend_from_slice(v.as_ref());
        self
    }

    /// Consumes the packer, returning the accumulated bytes with no
    /// opcode/length header. Used by callers (L2CAP signaling, SDP) that
    /// frame their own headers.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Finishes the command, prefixing the opcode and patched length.
    pub(crate) fn build(opcode: Opcode, f: impl FnOnce(&mut Self)) -> Vec<u8> {
        let mut cmd = Self::new();
        f(&mut cmd);
        let mut out = Vec::with_capacity(CMD_HDR + cmd.0.len());
        out.extend_from_slice(&u16::from(opcode).to_le_bytes());
        out.push(u8::try_from(cmd.0.len()).expect("command parameters exceed 255 bytes"));
        out.extend_from_slice(&cmd.0);
        out
    }
}

// Time conversions between `Duration` and the various tick units HCI
// parameters are expressed in ([Vol 4] Part E, Section 7.8 and others).

#[must_use]
pub(crate) fn ticks_625us(d: Duration) -> Option<u16> {
    u16::try_from(d.as_micros() / 625).ok()
}

#[must_use]
pub(crate) fn ticks_1250us(d: Duration) -> Option<u16> {
    u16::try_from(d.as_micros() / 1250).ok()
}

#[must_use]
pub(crate) fn ticks_10ms(d: Duration) -> Option<u16> {
    u16::try_from(d.as_millis() / 10).ok()
}

#[must_use]
pub(crate) const fn duration_1250us(ticks: u16) -> Duration {
    Duration::from_micros(ticks as u64 * 1250)
}

#[must_use]
pub(crate) const fn duration_10ms(ticks: u16) -> Duration {
    Duration::from_millis(ticks as u64 * 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_builds_header_and_patches_length() {
        let raw = Command::build(Opcode::Reset, |_| {});
        assert_eq!(raw, vec![0x03, 0x0C, 0x00]);

        let raw = Command::build(Opcode::LeSetRandomAddress, |c| {
            c.put([1u8, 2, 3, 4, 5, 6]);
        });
        assert_eq!(raw.len(), CMD_HDR + 6);
        assert_eq!(raw[2], 6);
    }

    #[test]
    fn packet_round_trips_through_parts() {
        let p = HciPacket::Acl(vec![1, 2, 3]);
        let t = p.packet_type();
        let payload = p.payload().to_vec();
        assert_eq!(HciPacket::from_parts(t, payload), p);
    }
}
