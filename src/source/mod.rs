//! Isochronous source abstraction.
//!
//! The accessory delivers audio over an isochronous IN endpoint. This module
//! defines the seam between the transfer scheduler and whatever USB stack
//! drives that endpoint, plus a scripted [`MockPipe`] for running the whole
//! bridge without hardware.

mod mock;

pub use mock::{accessory_frames, MockCompletion, MockPipe, PipeEvent, PipeJournal};

use async_trait::async_trait;

use crate::TransferError;

/// Location of one isochronous packet inside its transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsoPacket {
    /// Byte offset from the start of the transfer.
    pub offset: usize,
    /// Number of valid bytes. Zero is a legitimate empty packet.
    pub length: usize,
}

/// An asynchronous read of one transfer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Slot index in the transfer ring.
    pub slot: usize,
    /// Byte offset of the slot within the registered capture buffer.
    pub offset: usize,
    /// Transfer size in bytes.
    pub length: usize,
    /// Number of isochronous packets in the transfer.
    pub packet_count: usize,
    /// Whether the read continues the previous one without a gap.
    ///
    /// `false` starts a new sequence.
    pub continuation: bool,
}

/// An isochronous IN pipe carrying accessory audio.
///
/// The scheduler registers one capture buffer per session, keeps a fixed
/// number of reads outstanding, and drains them strictly in submission order.
/// At most one read is outstanding per slot at any time.
#[async_trait]
pub trait IsochronousPipe: Send {
    /// Maximum bytes the endpoint moves per service interval.
    fn max_bytes_per_interval(&self) -> usize;

    /// Registers a capture buffer of `len` bytes for isochronous reads.
    fn register_buffer(&mut self, len: usize) -> Result<(), TransferError>;

    /// Submits an asynchronous read. Must not block on the transfer itself.
    fn submit_read(&mut self, request: &ReadRequest) -> Result<(), TransferError>;

    /// Waits for the outstanding read on `slot` to complete.
    ///
    /// On success the slot's bytes are in `region` and each entry of
    /// `packets` describes one packet within it. Returns the byte count.
    /// A gap in a continued sequence is reported as
    /// [`TransferError::Discontinuity`].
    async fn wait_for_completion(
        &mut self,
        slot: usize,
        region: &mut [u8],
        packets: &mut [IsoPacket],
    ) -> Result<usize, TransferError>;

    /// Releases the capture buffer registration. Safe to call more than once.
    fn unregister_buffer(&mut self);
}
