//! Classic channel configuration options, carried as TLVs inside
//! `L2CAP_Configure_Request`/`..._Response` data blocks
//! ([Vol 3] Part A, Section 5).

use structbuf::Unpacker;

use crate::error::{Error, Result};

/// Configuration option type codes ([Vol 3] Part A, Section 5.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
#[repr(u8)]
pub enum OptionType {
    Mtu = 0x01,
    FlushTimeout = 0x02,
    QoS = 0x03,
    RetransmissionAndFlowControl = 0x04,
    Fcs = 0x05,
    ExtendedFlowSpec = 0x06,
    ExtendedWindowSize = 0x07,
}

impl OptionType {
    const fn from_u8(v: u8) -> Option<Self> {
        Some(match v & 0x7F {
            0x01 => Self::Mtu,
            0x02 => Self::FlushTimeout,
            0x03 => Self::QoS,
            0x04 => Self::RetransmissionAndFlowControl,
            0x05 => Self::Fcs,
            0x06 => Self::ExtendedFlowSpec,
            0x07 => Self::ExtendedWindowSize,
            _ => return None,
        })
    }
}

/// Retransmission/flow-control mode byte ([Vol 3] Part A, Section 5.4).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ChannelMode {
    Basic = 0x00,
    Retransmission = 0x01,
    FlowControl = 0x02,
    EnhancedRetransmission = 0x03,
    Streaming = 0x04,
}

impl ChannelMode {
    const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => Self::Basic,
            0x01 => Self::Retransmission,
            0x02 => Self::FlowControl,
            0x03 => Self::EnhancedRetransmission,
            0x04 => Self::Streaming,
            _ => return None,
        })
    }
}

/// The `RetransmissionAndFlowControl` option payload ([Vol 3] Part A,
/// Section 5.4), present whenever Enhanced Retransmission Mode (or any
/// other non-Basic mode) is proposed.
#[derive(Clone, Copy, Debug)]
pub struct RfcOption {
    pub mode: ChannelMode,
    pub tx_window: u8,
    pub max_transmit: u8,
    pub retransmission_timeout: u16,
    pub monitor_timeout: u16,
    pub max_pdu_size: u16,
}

impl RfcOption {
    /// Builds the option for Enhanced Retransmission Mode using the
    /// defaults from [`crate::l2cap::ErmConfig`].
    #[must_use]
    pub fn erm(cfg: crate::l2cap::ErmConfig) -> Self {
        Self {
            mode: ChannelMode::EnhancedRetransmission,
            tx_window: cfg.tx_window,
            max_transmit: cfg.max_transmit,
            retransmission_timeout: 2000,
            monitor_timeout: 12000,
            max_pdu_size: cfg.mps,
        }
    }
}

/// A single decoded configuration option.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum ConfigOption {
    Mtu(u16),
    FlushTimeout(u16),
    Rfc(RfcOption),
    Fcs(bool),
    /// An option this decoder does not interpret, carried by type code and
    /// raw value so an unknown *hint* (top bit of the type byte set) can
    /// still be accepted, per the negotiation rule in [SPEC_FULL] Section
    /// 4.3.1.
    Unknown { is_hint: bool, raw_type: u8 },
}

impl ConfigOption {
    /// Parses every option TLV in a configuration request/response data
    /// block. Returns the options plus the type codes of any unrecognized
    /// *mandatory* options (top bit of the type byte clear), which the
    /// caller must reject with `Unknown Options` ([Vol 3] Part A, Section
    /// 5).
    pub fn parse_all(mut data: &[u8]) -> Result<(Vec<Self>, Vec<u8>)> {
        let mut options = Vec::new();
        let mut unknown_mandatory = Vec::new();
        while !data.is_empty() {
            if data.len() < 2 {
                return Err(Error::invalid_packet("truncated configuration option header"));
            }
            let raw_type = data[0];
            let len = usize::from(data[1]);
            if data.len() < 2 + len {
                return Err(Error::invalid_packet("truncated configuration option value"));
            }
            let value = &data[2..2 + len];
            let is_hint = raw_type & 0x80 != 0;
            let opt = match OptionType::from_u8(raw_type) {
                Some(OptionType::Mtu) if len == 2 => {
                    Self::Mtu(u16::from_le_bytes([value[0], value[1]]))
                }
                Some(OptionType::FlushTimeout) if len == 2 => {
                    Self::FlushTimeout(u16::from_le_bytes([value[0], value[1]]))
                }
                Some(OptionType::RetransmissionAndFlowControl) if len == 9 => {
                    let mut u = Unpacker::new(value);
                    let Some(mode) = ChannelMode::from_u8(u.u8()) else {
                        unknown_mandatory.push(raw_type);
                        data = &data[2 + len..];
                        continue;
                    };
                    Self::Rfc(RfcOption {
                        mode,
                        tx_window: u.u8(),
                        max_transmit: u.u8(),
                        retransmission_timeout: u.u16(),
                        monitor_timeout: u.u16(),
                        max_pdu_size: u.u16(),
                    })
                }
                Some(OptionType::Fcs) if len == 1 => Self::Fcs(value[0] != 0),
                _ if is_hint => Self::Unknown { is_hint, raw_type },
                _ => {
                    unknown_mandatory.push(raw_type);
                    data = &data[2 + len..];
                    continue;
                }
            };
            options.push(opt);
            data = &data[2 + len..];
        }
        Ok((options, unknown_mandatory))
    }

    /// Encodes this option as a single TLV.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            Self::Mtu(mtu) => {
                out.push(OptionType::Mtu as u8);
                out.push(2);
                out.extend_from_slice(&mtu.to_le_bytes());
            }
            Self::FlushTimeout(t) => {
                out.push(OptionType::FlushTimeout as u8);
                out.push(2);
                out.extend_from_slice(&t.to_le_bytes());
            }
            Self::Rfc(rfc) => {
                out.push(OptionType::RetransmissionAndFlowControl as u8);
                out.push(9);
                out.push(rfc.mode as u8);
                out.push(rfc.tx_window);
                out.push(rfc.max_transmit);
                out.extend_from_slice(&rfc.retransmission_timeout.to_le_bytes());
                out.extend_from_slice(&rfc.monitor_timeout.to_le_bytes());
                out.extend_from_slice(&rfc.max_pdu_size.to_le_bytes());
            }
            Self::Fcs(on) => {
                out.push(OptionType::Fcs as u8);
                out.push(1);
                out.push(u8::from(on));
            }
            Self::Unknown { raw_type, .. } => {
                out.push(raw_type);
                out.push(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_option_round_trips() {
        let mut raw = Vec::new();
        ConfigOption::Mtu(672).encode(&mut raw);
        let (opts, unknown) = ConfigOption::parse_all(&raw).unwrap();
        assert!(unknown.is_empty());
        assert!(matches!(opts[0], ConfigOption::Mtu(672)));
    }

    #[test]
    fn unknown_hint_option_is_accepted() {
        let raw = vec![0x80 | 0x20, 1, 0xAA];
        let (opts, unknown) = ConfigOption::parse_all(&raw).unwrap();
        assert!(unknown.is_empty());
        assert!(matches!(opts[0], ConfigOption::Unknown { is_hint: true, .. }));
    }

    #[test]
    fn unknown_mandatory_option_is_rejected() {
        let raw = vec![0x20, 1, 0xAA];
        let (_opts, unknown) = ConfigOption::parse_all(&raw).unwrap();
        assert_eq!(unknown, vec![0x20]);
    }
}
