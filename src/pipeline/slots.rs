//! Fixed ring of transfer slots over one capture buffer.

use std::collections::VecDeque;
use std::time::Duration;

use crate::source::{IsoPacket, ReadRequest};
use crate::{BridgeError, TransferError};

/// Number of slots needed to keep `capture_duration` of audio in flight.
///
/// Rounds up so the ring never covers less than the requested duration, and
/// never goes below one slot.
pub(crate) fn slot_count(
    avg_bytes_per_sec: usize,
    capture_duration: Duration,
    transfer_size: usize,
) -> Result<usize, BridgeError> {
    if transfer_size == 0 {
        return Err(BridgeError::invalid_config(
            "isochronous pipe reports zero bytes per interval",
        ));
    }
    let capture_bytes = (avg_bytes_per_sec as f64 * capture_duration.as_secs_f64()).ceil() as usize;
    Ok(capture_bytes.div_ceil(transfer_size).max(1))
}

/// Arena of transfer slots indexed by slot number.
///
/// Every slot owns a fixed byte range of the shared capture buffer and a
/// fixed range of packet descriptors. Slots are queued in submission order
/// and a slot is only handed out again after its read was drained.
pub(crate) struct TransferRing {
    transfer_size: usize,
    packets_per_transfer: usize,
    capture: Vec<u8>,
    packets: Vec<IsoPacket>,
    outstanding: VecDeque<usize>,
    in_flight: Vec<bool>,
}

impl TransferRing {
    pub fn new(slots: usize, transfer_size: usize, packets_per_transfer: usize) -> Self {
        Self {
            transfer_size,
            packets_per_transfer,
            capture: vec![0; slots * transfer_size],
            packets: vec![IsoPacket::default(); slots * packets_per_transfer],
            outstanding: VecDeque::with_capacity(slots),
            in_flight: vec![false; slots],
        }
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn transfer_size(&self) -> usize {
        self.transfer_size
    }

    /// Size of the capture buffer to register with the pipe.
    pub fn buffer_len(&self) -> usize {
        self.capture.len()
    }

    /// Builds the read for `slot`.
    pub fn request(&self, slot: usize, continuation: bool) -> ReadRequest {
        ReadRequest {
            slot,
            offset: slot * self.transfer_size,
            length: self.transfer_size,
            packet_count: self.packets_per_transfer,
            continuation,
        }
    }

    /// Marks `slot` as in flight and queues it behind every older read.
    pub fn mark_submitted(&mut self, slot: usize) -> Result<(), TransferError> {
        if self.in_flight[slot] {
            return Err(TransferError::SlotBusy { slot });
        }
        self.in_flight[slot] = true;
        self.outstanding.push_back(slot);
        Ok(())
    }

    /// Dequeues the oldest outstanding slot.
    ///
    /// The slot stays in flight until [`TransferRing::complete`].
    pub fn oldest(&mut self) -> Option<usize> {
        self.outstanding.pop_front()
    }

    /// Marks the read on `slot` as drained and clears its descriptors.
    pub fn complete(&mut self, slot: usize) {
        self.in_flight[slot] = false;
        let packets = self.packet_range(slot);
        self.packets[packets].fill(IsoPacket::default());
    }

    /// Capture region and packet descriptors of `slot`.
    pub fn slot_mut(&mut self, slot: usize) -> (&mut [u8], &mut [IsoPacket]) {
        let bytes = self.byte_range(slot);
        let packets = self.packet_range(slot);
        (&mut self.capture[bytes], &mut self.packets[packets])
    }

    /// Capture region and packet descriptors of `slot`, read-only.
    pub fn slot(&self, slot: usize) -> (&[u8], &[IsoPacket]) {
        (
            &self.capture[self.byte_range(slot)],
            &self.packets[self.packet_range(slot)],
        )
    }

    fn byte_range(&self, slot: usize) -> std::ops::Range<usize> {
        let start = slot * self.transfer_size;
        start..start + self.transfer_size
    }

    fn packet_range(&self, slot: usize) -> std::ops::Range<usize> {
        let start = slot * self.packets_per_transfer;
        start..start + self.packets_per_transfer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_count_default_capture() {
        // 88200 bytes of capture in 192-byte transfers.
        let slots = slot_count(176_400, Duration::from_millis(500), 192).unwrap();
        assert_eq!(slots, 460);
    }

    #[test]
    fn test_slot_count_rounds_up() {
        let slots = slot_count(176_400, Duration::from_millis(8), 192).unwrap();
        assert_eq!(slots, 8);
    }

    #[test]
    fn test_slot_count_at_least_one() {
        let slots = slot_count(176_400, Duration::from_micros(1), 4096).unwrap();
        assert_eq!(slots, 1);
    }

    #[test]
    fn test_slot_count_zero_transfer_rejected() {
        assert!(matches!(
            slot_count(176_400, Duration::from_millis(500), 0),
            Err(BridgeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_requests_cover_disjoint_ranges() {
        let ring = TransferRing::new(4, 192, 2);
        assert_eq!(ring.buffer_len(), 768);
        let request = ring.request(3, true);
        assert_eq!(request.offset, 576);
        assert_eq!(request.length, 192);
        assert_eq!(request.packet_count, 2);
        assert!(request.continuation);
    }

    #[test]
    fn test_fifo_order() {
        let mut ring = TransferRing::new(3, 8, 1);
        for slot in 0..3 {
            ring.mark_submitted(slot).unwrap();
        }
        assert_eq!(ring.oldest(), Some(0));
        ring.complete(0);
        ring.mark_submitted(0).unwrap();
        assert_eq!(ring.oldest(), Some(1));
        assert_eq!(ring.oldest(), Some(2));
        assert_eq!(ring.oldest(), Some(0));
        assert_eq!(ring.oldest(), None);
    }

    #[test]
    fn test_resubmit_before_drain_rejected() {
        let mut ring = TransferRing::new(2, 8, 1);
        ring.mark_submitted(1).unwrap();
        assert_eq!(ring.oldest(), Some(1));
        assert_eq!(
            ring.mark_submitted(1),
            Err(TransferError::SlotBusy { slot: 1 })
        );
    }

    #[test]
    fn test_complete_resets_descriptors() {
        let mut ring = TransferRing::new(2, 8, 2);
        ring.mark_submitted(1).unwrap();
        {
            let (region, packets) = ring.slot_mut(1);
            region[0] = 0xAA;
            packets[1] = IsoPacket {
                offset: 4,
                length: 4,
            };
        }
        ring.complete(1);
        let (region, packets) = ring.slot(1);
        assert_eq!(region[0], 0xAA);
        assert!(packets.iter().all(|p| *p == IsoPacket::default()));
    }
}
