//! Mock isochronous pipe for testing without hardware.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{IsoPacket, IsochronousPipe, ReadRequest};
use crate::TransferError;

/// Default maximum packet size for a 44.1kHz stereo 16-bit endpoint.
const DEFAULT_MAX_BYTES_PER_INTERVAL: usize = 192;

/// Encodes `(left, right)` pairs in the accessory wire format.
pub fn accessory_frames(pairs: &[(i16, i16)]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(pairs.len() * 4);
    for &(left, right) in pairs {
        bytes.extend_from_slice(&left.to_le_bytes());
        bytes.extend_from_slice(&right.to_le_bytes());
    }
    bytes
}

/// How a scripted read completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCompletion {
    /// The read succeeds with one payload per packet.
    Transfer(Vec<Vec<u8>>),
    /// The read reports a sequence gap.
    Discontinuity,
    /// The read fails with the given error.
    Fail(TransferError),
}

/// Something the scheduler did to the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEvent {
    /// A capture buffer was registered.
    Registered {
        /// Buffer length in bytes.
        len: usize,
    },
    /// A read was submitted.
    Submitted {
        /// Slot index.
        slot: usize,
        /// Continuation flag of the read.
        continuation: bool,
    },
    /// An outstanding read was drained.
    Drained {
        /// Slot index.
        slot: usize,
    },
    /// The capture buffer was unregistered.
    Unregistered,
}

/// Shared record of [`PipeEvent`]s, kept by tests after the pipe is moved.
#[derive(Debug, Clone, Default)]
pub struct PipeJournal(Arc<Mutex<Vec<PipeEvent>>>);

impl PipeJournal {
    fn record(&self, event: PipeEvent) {
        self.0.lock().push(event);
    }

    /// All events so far.
    pub fn events(&self) -> Vec<PipeEvent> {
        self.0.lock().clone()
    }

    /// `(slot, continuation)` for every submitted read, in order.
    pub fn submissions(&self) -> Vec<(usize, bool)> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| match *event {
                PipeEvent::Submitted { slot, continuation } => Some((slot, continuation)),
                _ => None,
            })
            .collect()
    }

    /// Slot indices in the order they were drained.
    pub fn drains(&self) -> Vec<usize> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| match *event {
                PipeEvent::Drained { slot } => Some(slot),
                _ => None,
            })
            .collect()
    }
}

/// A scripted isochronous pipe.
///
/// Each drained read consumes the next scripted completion. Once the script
/// runs out the pipe either repeats a fixed completion or reports
/// [`TransferError::Disconnected`], which ends the session.
///
/// The mock enforces the transfer layer's rules: reads need a registered
/// buffer, must stay inside it, and a slot can only have one read in flight.
///
/// # Example
///
/// ```
/// use accessory_audio::source::MockPipe;
///
/// let mut pipe = MockPipe::new();
/// pipe.push_constant(0x4000, 0x4000, 44);
/// pipe.push_empty();
/// pipe.push_discontinuity();
/// let journal = pipe.journal();
/// assert!(journal.events().is_empty());
/// ```
pub struct MockPipe {
    max_bytes_per_interval: usize,
    script: VecDeque<MockCompletion>,
    repeat: Option<MockCompletion>,
    pacing: Option<Duration>,
    registered: Option<usize>,
    in_flight: BTreeSet<usize>,
    journal: PipeJournal,
}

impl Default for MockPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPipe {
    /// Creates an empty pipe with a 192-byte service interval.
    pub fn new() -> Self {
        Self::with_max_bytes_per_interval(DEFAULT_MAX_BYTES_PER_INTERVAL)
    }

    /// Creates an empty pipe with a custom maximum packet size.
    pub fn with_max_bytes_per_interval(max_bytes_per_interval: usize) -> Self {
        Self {
            max_bytes_per_interval,
            script: VecDeque::new(),
            repeat: None,
            pacing: None,
            registered: None,
            in_flight: BTreeSet::new(),
            journal: PipeJournal::default(),
        }
    }

    /// Delays every completion by `interval`, like a real service interval.
    pub fn with_pacing(mut self, interval: Duration) -> Self {
        self.pacing = Some(interval);
        self
    }

    /// Repeats `completion` forever once the script is exhausted.
    pub fn with_repeat(mut self, completion: MockCompletion) -> Self {
        self.repeat = Some(completion);
        self
    }

    /// Returns a handle to the event journal.
    pub fn journal(&self) -> PipeJournal {
        self.journal.clone()
    }

    /// Scripts a single-packet read carrying `pairs`.
    pub fn push_frames(&mut self, pairs: &[(i16, i16)]) {
        self.push(MockCompletion::Transfer(vec![accessory_frames(pairs)]));
    }

    /// Scripts a single-packet read of `frames` identical frames.
    pub fn push_constant(&mut self, left: i16, right: i16, frames: usize) {
        self.push_frames(&vec![(left, right); frames]);
    }

    /// Scripts a read whose only packet is empty.
    pub fn push_empty(&mut self) {
        self.push(MockCompletion::Transfer(vec![Vec::new()]));
    }

    /// Scripts a read that reports a discontinuity.
    pub fn push_discontinuity(&mut self) {
        self.push(MockCompletion::Discontinuity);
    }

    /// Scripts a read that fails.
    pub fn push_error(&mut self, error: TransferError) {
        self.push(MockCompletion::Fail(error));
    }

    /// Scripts an arbitrary completion.
    pub fn push(&mut self, completion: MockCompletion) {
        self.script.push_back(completion);
    }

    /// Number of scripted completions not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    fn fill(region: &mut [u8], packets: &mut [IsoPacket], payloads: &[Vec<u8>]) -> usize {
        if packets.is_empty() || payloads.is_empty() {
            return 0;
        }
        let stride = region.len() / packets.len();
        let mut total = 0;

        for (index, (packet, payload)) in packets.iter_mut().zip(payloads).enumerate() {
            let offset = index * stride;
            let length = payload.len().min(stride);
            region[offset..offset + length].copy_from_slice(&payload[..length]);
            *packet = IsoPacket { offset, length };
            total += length;
        }

        total
    }
}

#[async_trait]
impl IsochronousPipe for MockPipe {
    fn max_bytes_per_interval(&self) -> usize {
        self.max_bytes_per_interval
    }

    fn register_buffer(&mut self, len: usize) -> Result<(), TransferError> {
        self.registered = Some(len);
        self.journal.record(PipeEvent::Registered { len });
        Ok(())
    }

    fn submit_read(&mut self, request: &ReadRequest) -> Result<(), TransferError> {
        let registered = self.registered.ok_or(TransferError::NotRegistered)?;
        if request.offset + request.length > registered {
            return Err(TransferError::backend(format!(
                "read of {} bytes at {} outside {registered}-byte buffer",
                request.length, request.offset
            )));
        }
        if !self.in_flight.insert(request.slot) {
            return Err(TransferError::SlotBusy { slot: request.slot });
        }

        self.journal.record(PipeEvent::Submitted {
            slot: request.slot,
            continuation: request.continuation,
        });
        Ok(())
    }

    async fn wait_for_completion(
        &mut self,
        slot: usize,
        region: &mut [u8],
        packets: &mut [IsoPacket],
    ) -> Result<usize, TransferError> {
        if self.registered.is_none() {
            return Err(TransferError::NotRegistered);
        }
        if !self.in_flight.remove(&slot) {
            return Err(TransferError::backend(format!(
                "no read outstanding on slot {slot}"
            )));
        }
        self.journal.record(PipeEvent::Drained { slot });

        match self.pacing {
            Some(interval) => tokio::time::sleep(interval).await,
            None => tokio::task::yield_now().await,
        }

        let completion = self
            .script
            .pop_front()
            .or_else(|| self.repeat.clone())
            .ok_or(TransferError::Disconnected)?;

        match completion {
            MockCompletion::Transfer(payloads) => Ok(Self::fill(region, packets, &payloads)),
            MockCompletion::Discontinuity => Err(TransferError::Discontinuity),
            MockCompletion::Fail(error) => Err(error),
        }
    }

    fn unregister_buffer(&mut self) {
        if self.registered.take().is_some() {
            self.in_flight.clear();
            self.journal.record(PipeEvent::Unregistered);
        }
    }
}
