//! Combines a scannable advertising report with its scan response before
//! surfacing one [`DeviceEvent::Advertisement`](super::event::DeviceEvent::Advertisement)
//! ([SPEC_FULL] Section 3: `AdvertisementAccumulator`).

use std::collections::HashMap;

use crate::gap::Addr;

use super::event::Advertisement;

struct Pending {
    rssi: i8,
    data: Vec<u8>,
    connectable: bool,
}

/// Buffers scannable advertising reports by peer address while awaiting
/// their scan response, so a single combined event can be reported instead
/// of two. Passive scans and non-scannable reports bypass buffering
/// entirely.
///
/// Keyed by peer address alone, matching `original_source/bumble/device.py`'s
/// `AdvertisementDataAccumulator`. That class has no time-based expiry: a
/// second non-scan-response report for a peer that already has one pending
/// simply flushes the earlier report (with no scan response) and replaces
/// it, rather than waiting on a timer.
#[derive(Default)]
pub struct AdvertisementAccumulator {
    pending: HashMap<Addr, Pending>,
}

impl AdvertisementAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one advertising report. Returns a completed [`Advertisement`]
    /// immediately for non-scannable reports, or for scannable reports
    /// during passive scanning (no scan response will ever follow). For
    /// scannable reports during active scanning, buffers the report and
    /// returns `None` until [`on_scan_response`](Self::on_scan_response)
    /// supplies the matching data — unless `peer` already has a report
    /// pending, in which case that earlier report is flushed now (without
    /// a scan response) and replaced by this one.
    pub fn on_advertisement(
        &mut self,
        peer: Addr,
        rssi: i8,
        data: Vec<u8>,
        connectable: bool,
        scannable: bool,
        active_scan: bool,
    ) -> Option<Advertisement> {
        if !scannable || !active_scan {
            return Some(Advertisement {
                peer_address: peer,
                rssi,
                data,
                scan_response: None,
                connectable,
                scannable,
            });
        }
        self.pending
            .insert(peer, Pending { rssi, data, connectable })
            .map(|prev| Advertisement {
                peer_address: peer,
                rssi: prev.rssi,
                data: prev.data,
                scan_response: None,
                connectable: prev.connectable,
                scannable: true,
            })
    }

    /// Feeds a scan-response report, completing the buffered advertisement
    /// for `peer` if one is still pending.
    pub fn on_scan_response(&mut self, peer: Addr, data: Vec<u8>) -> Option<Advertisement> {
        let pending = self.pending.remove(&peer)?;
        Some(Advertisement {
            peer_address: peer,
            rssi: pending.rssi,
            data: pending.data,
            scan_response: Some(data),
            connectable: pending.connectable,
            scannable: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::RawAddr;

    fn peer() -> Addr {
        Addr::public(RawAddr([1, 2, 3, 4, 5, 6]))
    }

    #[test]
    fn passive_scan_emits_immediately() {
        let mut acc = AdvertisementAccumulator::new();
        let adv = acc
            .on_advertisement(peer(), -40, vec![1, 2, 3], true, true, false)
            .expect("passive scannable report emits without waiting");
        assert!(adv.scan_response.is_none());
    }

    #[test]
    fn active_scan_waits_for_scan_response() {
        let mut acc = AdvertisementAccumulator::new();
        assert!(acc
            .on_advertisement(peer(), -40, vec![1, 2, 3], true, true, true)
            .is_none());
        let adv = acc
            .on_scan_response(peer(), vec![4, 5, 6])
            .expect("scan response completes the buffered report");
        assert_eq!(adv.data, vec![1, 2, 3]);
        assert_eq!(adv.scan_response, Some(vec![4, 5, 6]));
    }

    #[test]
    fn non_scannable_report_emits_immediately_even_when_active() {
        let mut acc = AdvertisementAccumulator::new();
        let adv = acc
            .on_advertisement(peer(), -40, vec![9], false, false, true)
            .expect("non-scannable reports never wait for a scan response");
        assert!(adv.scan_response.is_none());
    }

    #[test]
    fn unmatched_scan_response_is_dropped() {
        let mut acc = AdvertisementAccumulator::new();
        assert!(acc.on_scan_response(peer(), vec![1]).is_none());
    }

    #[test]
    fn second_report_before_scan_response_flushes_the_first() {
        let mut acc = AdvertisementAccumulator::new();
        assert!(acc
            .on_advertisement(peer(), -40, vec![1, 2, 3], true, true, true)
            .is_none());
        let flushed = acc
            .on_advertisement(peer(), -35, vec![4, 5, 6], true, true, true)
            .expect("a second report for the same peer flushes the pending one immediately");
        assert_eq!(flushed.data, vec![1, 2, 3]);
        assert!(flushed.scan_response.is_none());
        let adv = acc
            .on_scan_response(peer(), vec![7, 8, 9])
            .expect("the replacement report is still pending");
        assert_eq!(adv.data, vec![4, 5, 6]);
    }
}
