//! Classic dynamic channels running Enhanced Retransmission Mode
//! ([Vol 3] Part A, Section 5.4, 8.6): segmentation/reassembly, sequencing,
//! and go-back-n retransmission driven by `REJ`/`SREJ`.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::hci::ConnHandle;

const MODULUS: u8 = 64;

fn seq_add(a: u8, b: u8) -> u8 {
    (a + b) % MODULUS
}

/// Segmentation-and-reassembly field of an I-frame control word
/// ([Vol 3] Part A, Section 3.3.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Sar {
    Unsegmented,
    Start,
    End,
    Continuation,
}

impl Sar {
    const fn bits(self) -> u16 {
        match self {
            Self::Unsegmented => 0b00,
            Self::Start => 0b01,
            Self::End => 0b10,
            Self::Continuation => 0b11,
        }
    }

    const fn from_bits(b: u16) -> Self {
        match b & 0b11 {
            0b01 => Self::Start,
            0b10 => Self::End,
            0b11 => Self::Continuation,
            _ => Self::Unsegmented,
        }
    }
}

/// Supervisory function of an S-frame ([Vol 3] Part A, Section 3.3.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SFunction {
    ReceiverReady,
    Reject,
    ReceiverNotReady,
    SelectiveReject,
}

impl SFunction {
    const fn bits(self) -> u16 {
        match self {
            Self::ReceiverReady => 0b00,
            Self::Reject => 0b01,
            Self::ReceiverNotReady => 0b10,
            Self::SelectiveReject => 0b11,
        }
    }

    const fn from_bits(b: u16) -> Self {
        match b & 0b11 {
            0b01 => Self::Reject,
            0b10 => Self::ReceiverNotReady,
            0b11 => Self::SelectiveReject,
            _ => Self::ReceiverReady,
        }
    }
}

/// A decoded control field, either an information frame or a supervisory
/// frame.
#[derive(Clone, Copy, Debug)]
pub enum ControlField {
    Information {
        tx_seq: u8,
        req_seq: u8,
        sar: Sar,
        final_bit: bool,
    },
    Supervisory {
        req_seq: u8,
        function: SFunction,
        poll: bool,
    },
}

impl ControlField {
    fn encode_info(tx_seq: u8, req_seq: u8, sar: Sar, final_bit: bool) -> u16 {
        (u16::from(tx_seq) << 1)
            | (u16::from(final_bit) << 7)
            | (u16::from(req_seq) << 8)
            | (sar.bits() << 14)
    }

    fn encode_super(req_seq: u8, function: SFunction, poll: bool) -> u16 {
        0b01 | (function.bits() << 2) | (u16::from(poll) << 4) | (u16::from(req_seq) << 8)
    }

    fn decode(w: u16) -> Self {
        if w & 0b01 == 0 {
            Self::Information {
                tx_seq: u8::try_from((w >> 1) & 0x3F).unwrap(),
                final_bit: (w >> 7) & 1 != 0,
                req_seq: u8::try_from((w >> 8) & 0x3F).unwrap(),
                sar: Sar::from_bits(w >> 14),
            }
        } else {
            Self::Supervisory {
                function: SFunction::from_bits(w >> 2),
                poll: (w >> 4) & 1 != 0,
                req_seq: u8::try_from((w >> 8) & 0x3F).unwrap(),
            }
        }
    }
}

/// Per-channel configuration negotiated via `L2CAP_Configure_Request`/
/// `..._Response` ([Vol 3] Part A, Section 5.4).
#[derive(Clone, Copy, Debug)]
pub struct ErmConfig {
    pub mtu: u16,
    pub mps: u16,
    pub tx_window: u8,
    pub max_transmit: u8,
}

impl ErmConfig {
    #[must_use]
    pub const fn default_params() -> Self {
        Self {
            mtu: 672,
            mps: 672,
            tx_window: 32,
            max_transmit: 3,
        }
    }
}

struct UnackedFrame {
    tx_seq: u8,
    payload: Vec<u8>,
    sar: Sar,
    transmissions: u8,
}

/// A classic dynamic channel operating in Enhanced Retransmission Mode.
pub struct ErmChannel {
    pub handle: ConnHandle,
    pub local_cid: u16,
    pub remote_cid: u16,
    cfg: ErmConfig,
    next_tx_seq: u8,
    expected_rx_seq: u8,
    unacked: VecDeque<UnackedFrame>,
    reassembly: Option<Vec<u8>>,
    remote_busy: bool,
}

impl ErmChannel {
    #[must_use]
    pub fn new(handle: ConnHandle, local_cid: u16, remote_cid: u16, cfg: ErmConfig) -> Self {
        Self {
            handle,
            local_cid,
            remote_cid,
            cfg,
            next_tx_seq: 0,
            expected_rx_seq: 0,
            unacked: VecDeque::new(),
            reassembly: None,
            remote_busy: false,
        }
    }

    /// Segments `sdu` into I-frames, each prefixed with its 2-byte control
    /// field, ready to send. Fails if more I-frames than the negotiated
    /// transmit window would be outstanding.
    pub fn segment(&mut self, sdu: &[u8]) -> Result<Vec<Vec<u8>>> {
        if sdu.len() > usize::from(self.cfg.mtu) {
            return Err(Error::invalid_packet("SDU exceeds channel MTU"));
        }
        let mps = usize::from(self.cfg.mps).max(1);
        let chunks: Vec<&[u8]> = if sdu.len() <= mps {
            vec![sdu]
        } else {
            sdu.chunks(mps).collect()
        };
        if self.unacked.len() + chunks.len() > usize::from(self.cfg.tx_window) {
            return Err(Error::invalid_packet("ERM transmit window exhausted"));
        }
        let mut frames = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let sar = if chunks.len() == 1 {
                Sar::Unsegmented
            } else if i == 0 {
                Sar::Start
            } else if i == chunks.len() - 1 {
                Sar::End
            } else {
                Sar::Continuation
            };
            let tx_seq = self.next_tx_seq;
            self.next_tx_seq = seq_add(self.next_tx_seq, 1);
            let mut frame = Vec::with_capacity(2 + chunk.len());
            frame.extend_from_slice(
                &ControlField::encode_info(tx_seq, self.expected_rx_seq, sar, false).to_le_bytes(),
            );
            frame.extend_from_slice(chunk);
            self.unacked.push_back(UnackedFrame {
                tx_seq,
                payload: chunk.to_vec(),
                sar,
                transmissions: 1,
            });
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Feeds one inbound frame (I- or S-frame). Returns a reassembled SDU
    /// when an I-frame completes one, plus any S-frames that must be sent
    /// in response (acknowledgement, reject, or retransmission request).
    pub fn on_frame(&mut self, frame: &[u8]) -> Result<(Option<Vec<u8>>, Vec<Vec<u8>>)> {
        if frame.len() < 2 {
            return Err(Error::invalid_packet("ERM frame shorter than control field"));
        }
        let ctrl = ControlField::decode(u16::from_le_bytes([frame[0], frame[1]]));
        let payload = &frame[2..];
        match ctrl {
            ControlField::Supervisory { req_seq, function, .. } => {
                self.ack_through(req_seq);
                let resend = match function {
                    SFunction::Reject => self.frames_from(req_seq),
                    SFunction::ReceiverNotReady => {
                        self.remote_busy = true;
                        Vec::new()
                    }
                    SFunction::ReceiverReady => {
                        self.remote_busy = false;
                        Vec::new()
                    }
                    SFunction::SelectiveReject => self.frame_for_seq(req_seq),
                };
                Ok((None, resend))
            }
            ControlField::Information {
                tx_seq, req_seq, sar, ..
            } => {
                self.ack_through(req_seq);
                if tx_seq != self.expected_rx_seq {
                    let reject = ControlField::encode_super(
                        self.expected_rx_seq,
                        SFunction::Reject,
                        false,
                    )
                    .to_le_bytes()
                    .to_vec();
                    return Ok((None, vec![reject]));
                }
                self.expected_rx_seq = seq_add(self.expected_rx_seq, 1);
                let sdu = self.reassemble(sar, payload)?;
                let rr = ControlField::encode_super(
                    self.expected_rx_seq,
                    SFunction::ReceiverReady,
                    false,
                )
                .to_le_bytes()
                .to_vec();
                Ok((sdu, vec![rr]))
            }
        }
    }

    fn reassemble(&mut self, sar: Sar, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        match sar {
            Sar::Unsegmented => Ok(Some(payload.to_vec())),
            Sar::Start => {
                if payload.len() < 2 {
                    return Err(Error::invalid_packet("SAR start frame missing SDU length"));
                }
                self.reassembly = Some(payload[2..].to_vec());
                Ok(None)
            }
            Sar::Continuation => {
                if let Some(buf) = self.reassembly.as_mut() {
                    buf.extend_from_slice(payload);
                }
                Ok(None)
            }
            Sar::End => {
                if let Some(mut buf) = self.reassembly.take() {
                    buf.extend_from_slice(payload);
                    Ok(Some(buf))
                } else {
                    Ok(Some(payload.to_vec()))
                }
            }
        }
    }

    fn ack_through(&mut self, req_seq: u8) {
        while let Some(f) = self.unacked.front() {
            if f.tx_seq == req_seq {
                break;
            }
            self.unacked.pop_front();
        }
    }

    fn frames_from(&mut self, _from_seq: u8) -> Vec<Vec<u8>> {
        // `ack_through` already dropped everything the peer has confirmed,
        // so a REJ retransmits the entire remaining window (go-back-n).
        self.unacked
            .iter_mut()
            .map(|f| {
                f.transmissions += 1;
                let mut frame = Vec::with_capacity(2 + f.payload.len());
                frame.extend_from_slice(
                    &ControlField::encode_info(f.tx_seq, self.expected_rx_seq, f.sar, false)
                        .to_le_bytes(),
                );
                frame.extend_from_slice(&f.payload);
                frame
            })
            .collect()
    }

    fn frame_for_seq(&mut self, seq: u8) -> Vec<Vec<u8>> {
        self.unacked
            .iter_mut()
            .find(|f| f.tx_seq == seq)
            .map(|f| {
                f.transmissions += 1;
                let mut frame = Vec::with_capacity(2 + f.payload.len());
                frame.extend_from_slice(
                    &ControlField::encode_info(f.tx_seq, self.expected_rx_seq, f.sar, false)
                        .to_le_bytes(),
                );
                frame.extend_from_slice(&f.payload);
                frame
            })
            .into_iter()
            .collect()
    }

    /// Returns `true` if any outstanding I-frame has reached the
    /// negotiated `max_transmit` retry count, indicating the channel
    /// should be disconnected ([Vol 3] Part A, Section 8.6.5.6).
    #[must_use]
    pub fn exhausted_retries(&self) -> bool {
        self.unacked
            .iter()
            .any(|f| f.transmissions > self.cfg.max_transmit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (ErmChannel, ErmChannel) {
        let h = ConnHandle::new(1).unwrap();
        let cfg = ErmConfig {
            mtu: 200,
            mps: 20,
            tx_window: 8,
            max_transmit: 3,
        };
        (
            ErmChannel::new(h, 0x40, 0x41, cfg),
            ErmChannel::new(h, 0x41, 0x40, cfg),
        )
    }

    #[test]
    fn segment_and_reassemble_round_trip() {
        let (mut a, mut b) = pair();
        let sdu = vec![0x5A; 55];
        let frames = a.segment(&sdu).unwrap();
        assert!(frames.len() > 1);
        let mut got = None;
        for f in &frames {
            let (sdu_out, _acks) = b.on_frame(f).unwrap();
            if sdu_out.is_some() {
                got = sdu_out;
            }
        }
        assert_eq!(got.unwrap(), sdu);
    }

    #[test]
    fn out_of_order_iframe_triggers_reject() {
        let (mut a, mut b) = pair();
        let sdu = vec![1, 2, 3];
        let frames = a.segment(&sdu).unwrap();
        // Skip the (only) first frame and feed nothing, then forge a
        // second I-frame with tx_seq=1 while the channel expects 0.
        let bogus =
            ControlField::encode_info(1, 0, Sar::Unsegmented, false).to_le_bytes().to_vec();
        let (sdu_out, resp) = b.on_frame(&[bogus, vec![9]].concat()).unwrap();
        assert!(sdu_out.is_none());
        assert_eq!(resp.len(), 1);
        let ctrl = ControlField::decode(u16::from_le_bytes([resp[0][0], resp[0][1]]));
        assert!(matches!(
            ctrl,
            ControlField::Supervisory {
                function: SFunction::Reject,
                ..
            }
        ));
        let _ = frames;
    }

    #[test]
    fn control_field_round_trips() {
        let w = ControlField::encode_info(5, 9, Sar::End, true);
        match ControlField::decode(w) {
            ControlField::Information {
                tx_seq,
                req_seq,
                sar,
                final_bit,
            } => {
                assert_eq!(tx_seq, 5);
                assert_eq!(req_seq, 9);
                assert_eq!(sar, Sar::End);
                assert!(final_bit);
            }
            ControlField::Supervisory { .. } => panic!("expected information frame"),
        }
    }
}
