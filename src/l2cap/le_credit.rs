//! LE Credit-Based Connection channels: SDU segmentation/reassembly and
//! credit-based flow control ([Vol 3] Part A, Section 4.24-4.25, 5.4).

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::hci::ConnHandle;

/// Per-channel SDU-length and initial-credit configuration negotiated at
/// connection time ([Vol 3] Part A, Section 4.25).
#[derive(Clone, Copy, Debug)]
pub struct LeCreditConfig {
    /// Maximum SDU size this end will accept.
    pub mtu: u16,
    /// Maximum PDU (K-frame) payload size this end will accept.
    pub mps: u16,
    /// Number of K-frames this end can initially receive before its peer
    /// must wait for an `L2CAP_Flow_Control_Credit_Ind`.
    pub initial_credits: u16,
}

impl LeCreditConfig {
    /// A configuration with conservative, widely-supported defaults.
    #[must_use]
    pub const fn default_params() -> Self {
        Self {
            mtu: 672,
            mps: 251,
            initial_credits: 10,
        }
    }
}

/// An LE Credit-Based Connection channel bound to one connection. Tracks
/// the local and remote channel ids, the negotiated MTU/MPS, and the
/// credit balance and in-flight reassembly state in each direction.
#[derive(Debug)]
pub struct LeCreditChannel {
    pub handle: ConnHandle,
    pub local_cid: u16,
    pub remote_cid: u16,
    local: LeCreditConfig,
    remote: LeCreditConfig,
    tx_credits: u16,
    rx_credits: u16,
    reassembly: Option<Vec<u8>>,
    reassembly_want: usize,
    pending_tx: VecDeque<Vec<u8>>,
}

impl LeCreditChannel {
    /// Creates a channel after the `L2CAP_Credit_Based_Connection_Request`
    /// / `..._Response` handshake has completed.
    #[must_use]
    pub fn new(
        handle: ConnHandle,
        local_cid: u16,
        remote_cid: u16,
        local: LeCreditConfig,
        remote: LeCreditConfig,
    ) -> Self {
        Self {
            handle,
            local_cid,
            remote_cid,
            local,
            remote,
            tx_credits: remote.initial_credits,
            rx_credits: local.initial_credits,
            reassembly: None,
            reassembly_want: 0,
            pending_tx: VecDeque::new(),
        }
    }

    /// Segments `sdu` into K-frames ready to send, each prefixed for its
    /// position with the 2-byte SDU length on the first K-frame
    /// ([Vol 3] Part A, Section 3.4.1). Returns `Err` if `sdu` exceeds the
    /// peer's MTU, or if there are not enough credits to send every
    /// resulting K-frame.
    pub fn segment(&mut self, sdu: &[u8]) -> Result<Vec<Vec<u8>>> {
        if sdu.len() > usize::from(self.remote.mtu) {
            return Err(Error::invalid_packet("SDU exceeds peer MTU"));
        }
        let mps = usize::from(self.remote.mps);
        let mut frames = Vec::new();
        let mut first = Vec::with_capacity(2 + mps.min(sdu.len() + 2));
        first.extend_from_slice(&u16::try_from(sdu.len()).unwrap_or(u16::MAX).to_le_bytes());
        let first_cap = mps.saturating_sub(2);
        let (head, rest) = sdu.split_at(sdu.len().min(first_cap));
        first.extend_from_slice(head);
        frames.push(first);
        for chunk in rest.chunks(mps.max(1)) {
            frames.push(chunk.to_vec());
        }
        if frames.len() > usize::from(self.tx_credits) {
            return Err(Error::InsufficientCredits);
        }
        self.tx_credits -= u16::try_from(frames.len()).unwrap_or(u16::MAX);
        Ok(frames)
    }

    /// Feeds one inbound K-frame, consuming one receive credit. Returns a
    /// complete SDU once all of its K-frames have arrived.
    pub fn on_kframe(&mut self, k_frame: &[u8]) -> Result<Option<Vec<u8>>> {
        self.rx_credits = self.rx_credits.saturating_sub(1);
        if self.reassembly.is_none() {
            if k_frame.len() < 2 {
                return Err(Error::invalid_packet("K-frame shorter than SDU length field"));
            }
            let want = usize::from(u16::from_le_bytes([k_frame[0], k_frame[1]]));
            if want > usize::from(self.local.mtu) {
                return Err(Error::invalid_packet("SDU length exceeds local MTU"));
            }
            self.reassembly_want = want;
            self.reassembly = Some(k_frame[2..].to_vec());
        } else if let Some(buf) = self.reassembly.as_mut() {
            buf.extend_from_slice(k_frame);
        }
        let len = self.reassembly.as_ref().map_or(0, Vec::len);
        match len.cmp(&self.reassembly_want) {
            std::cmp::Ordering::Less => Ok(None),
            std::cmp::Ordering::Equal => Ok(self.reassembly.take()),
            std::cmp::Ordering::Greater => {
                self.reassembly = None;
                Err(Error::protocol("SDU reassembly overflow: more K-frame bytes than the announced SDU length"))
            }
        }
    }

    /// Returns `true` once remaining receive credits have dropped to or
    /// below half of this end's configured maximum, per [Vol 3] Part A,
    /// Section 4.25: the peer should be replenished with an
    /// `L2CAP_Flow_Control_Credit_Ind` back up to that maximum.
    #[must_use]
    pub fn needs_credit_refill(&self) -> bool {
        self.rx_credits <= self.local.initial_credits / 2
    }

    /// Applies a credit refill received via `L2CAP_Flow_Control_Credit_Ind`
    /// from the peer, replenishing this end's transmit credits.
    pub fn replenish_tx_credits(&mut self, credits: u16) {
        self.tx_credits = self.tx_credits.saturating_add(credits);
    }

    /// Restores this end's own receive-credit accounting back up to its
    /// configured maximum after issuing an `L2CAP_Flow_Control_Credit_Ind`
    /// to the peer, returning the number of credits granted so the caller
    /// can put that count on the wire.
    pub fn refill_rx_credits(&mut self) -> u16 {
        let grant = self.local.initial_credits.saturating_sub(self.rx_credits);
        self.rx_credits = self.local.initial_credits;
        grant
    }

    /// Queues an SDU for transmission once credits become available,
    /// returning any K-frames that can be sent immediately.
    pub fn queue_or_send(&mut self, sdu: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        if self.pending_tx.is_empty() {
            match self.segment(&sdu) {
                Ok(frames) => return Ok(frames),
                Err(Error::InsufficientCredits) => {
                    self.pending_tx.push_back(sdu);
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            }
        }
        self.pending_tx.push_back(sdu);
        Ok(Vec::new())
    }

    /// Drains as much of the pending-transmit queue as current credits
    /// allow, typically called after [`LeCreditChannel::replenish_tx_credits`].
    pub fn drain_pending(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        while let Some(sdu) = self.pending_tx.front() {
            match self.segment(sdu) {
                Ok(frames) => {
                    out.extend(frames);
                    self.pending_tx.pop_front();
                }
                Err(_) => break,
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (LeCreditChannel, LeCreditChannel) {
        let h = ConnHandle::new(1).unwrap();
        let cfg = LeCreditConfig {
            mtu: 100,
            mps: 23,
            initial_credits: 4,
        };
        let a = LeCreditChannel::new(h, 0x40, 0x41, cfg, cfg);
        let b = LeCreditChannel::new(h, 0x41, 0x40, cfg, cfg);
        (a, b)
    }

    #[test]
    fn segment_and_reassemble_round_trip() {
        let (mut a, mut b) = pair();
        let sdu = vec![0xAB; 60];
        let frames = a.segment(&sdu).unwrap();
        assert!(frames.len() > 1);
        let mut result = None;
        for f in &frames {
            if let Some(done) = b.on_kframe(f).unwrap() {
                result = Some(done);
            }
        }
        assert_eq!(result.unwrap(), sdu);
    }

    #[test]
    fn segment_rejects_oversized_sdu() {
        let (mut a, _b) = pair();
        let sdu = vec![0; 200];
        assert!(a.segment(&sdu).is_err());
    }

    #[test]
    fn exhausted_credits_queue_for_later() {
        let (mut a, _b) = pair();
        let big = vec![0xCD; 90];
        let frames = a.queue_or_send(big.clone()).unwrap();
        assert!(!frames.is_empty());
        let frames2 = a.queue_or_send(big).unwrap();
        assert!(frames2.is_empty());
        a.replenish_tx_credits(10);
        let drained = a.drain_pending().unwrap();
        assert!(!drained.is_empty());
    }

    #[test]
    fn insufficient_credits_is_a_typed_error() {
        let (mut a, _b) = pair();
        let sdu = vec![0xCD; 90];
        assert!(matches!(a.segment(&sdu), Err(Error::InsufficientCredits)));
    }

    #[test]
    fn overlong_reassembly_is_a_protocol_error() {
        let (mut a, mut b) = pair();
        let sdu = vec![0xAB; 10];
        let mut frames = a.segment(&sdu).unwrap();
        frames.push(vec![0xFF; 5]);
        let mut result = Ok(None);
        for f in &frames {
            result = b.on_kframe(f);
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
    }

    #[test]
    fn credit_refill_derives_from_configured_max() {
        let (_a, mut b) = pair();
        assert!(!b.needs_credit_refill());
        b.rx_credits = 2;
        assert!(b.needs_credit_refill());
        let grant = b.refill_rx_credits();
        assert_eq!(grant, 2);
        assert_eq!(b.rx_credits, b.local.initial_credits);
    }
}
