//! Isochronous transfer scheduler - the bridge worker loop.
//!
//! Every slot of the [`TransferRing`] is kept in flight against the pipe.
//! Slots are drained strictly in submission order, whichever read the
//! hardware finishes first, because that is the order the audio was captured
//! in. A drained slot is fed to the [`RenderFeeder`] packet by packet and
//! resubmitted straight away.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::feeder::RenderFeeder;
use super::slots::TransferRing;
use crate::event::EventCallback;
use crate::format::OutputFormat;
use crate::session::SessionState;
use crate::sink::RenderSink;
use crate::source::IsochronousPipe;
use crate::{BridgeError, BridgeEvent, TransferError};

/// Drained transfers between progress logs.
const PROGRESS_LOG_INTERVAL: u64 = 500;

pub(crate) struct TransferScheduler {
    pipe: Box<dyn IsochronousPipe>,
    ring: TransferRing,
    feeder: RenderFeeder,
    sink: Arc<dyn RenderSink>,
    format: OutputFormat,
    state: Arc<SessionState>,
    event_callback: Option<EventCallback>,
    /// Whether the next read continues the current sequence.
    continuity: bool,
}

impl TransferScheduler {
    pub fn new(
        pipe: Box<dyn IsochronousPipe>,
        ring: TransferRing,
        feeder: RenderFeeder,
        sink: Arc<dyn RenderSink>,
        format: OutputFormat,
        state: Arc<SessionState>,
        event_callback: Option<EventCallback>,
    ) -> Self {
        Self {
            pipe,
            ring,
            feeder,
            sink,
            format,
            state,
            event_callback,
            continuity: true,
        }
    }

    fn emit_event(&self, event: BridgeEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    /// Runs until stopped or a fatal error, then tears the session down.
    ///
    /// Teardown runs on every exit path and releases everything in the same
    /// order no matter how far startup got.
    pub async fn run(mut self) -> Result<(), BridgeError> {
        let result = self.stream().await;
        self.teardown();
        result
    }

    async fn stream(&mut self) -> Result<(), BridgeError> {
        self.pipe.register_buffer(self.ring.buffer_len())?;

        for slot in 0..self.ring.len() {
            // Slot 0 opens the sequence; everything after continues it.
            self.submit(slot, slot != 0)?;
        }
        self.sink.start()?;

        tracing::info!(
            format = %self.format,
            slots = self.ring.len(),
            transfer_size = self.ring.transfer_size(),
            "Bridge streaming"
        );
        self.emit_event(BridgeEvent::SessionStarted {
            format: self.format,
            slots: self.ring.len(),
        });

        while self.state.running.load(Ordering::SeqCst) {
            let Some(slot) = self.ring.oldest() else {
                break;
            };

            let (region, packets) = self.ring.slot_mut(slot);
            match self.pipe.wait_for_completion(slot, region, packets).await {
                Ok(_) => self.drain(slot)?,
                Err(TransferError::Discontinuity) => {
                    tracing::warn!(slot, "Isochronous discontinuity, restarting sequence");
                    self.continuity = false;
                    self.state.discontinuities.fetch_add(1, Ordering::SeqCst);
                    self.emit_event(BridgeEvent::Discontinuity { slot });
                }
                Err(e) => return Err(e.into()),
            }

            self.ring.complete(slot);
            self.submit(slot, self.continuity)?;
            self.continuity = true;

            let completed = self.state.transfers_completed.fetch_add(1, Ordering::SeqCst) + 1;
            if completed % PROGRESS_LOG_INTERVAL == 0 {
                let stats = self.state.snapshot();
                tracing::debug!(
                    transfers = completed,
                    frames_written = stats.frames_written,
                    frames_dropped = stats.frames_dropped,
                    discontinuities = stats.discontinuities,
                    "Bridge progress"
                );
            }
        }

        Ok(())
    }

    fn submit(&mut self, slot: usize, continuation: bool) -> Result<(), TransferError> {
        let request = self.ring.request(slot, continuation);
        self.ring.mark_submitted(slot)?;
        self.pipe.submit_read(&request)
    }

    /// Feeds every non-empty packet of a completed slot, in packet order.
    fn drain(&mut self, slot: usize) -> Result<(), BridgeError> {
        let capacity = self.ring.transfer_size();
        let (region, packets) = self.ring.slot(slot);

        for packet in packets {
            if packet.length == 0 {
                self.state.empty_packets.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            let bytes = packet
                .offset
                .checked_add(packet.length)
                .and_then(|end| region.get(packet.offset..end))
                .ok_or(TransferError::InvalidPacket {
                    offset: packet.offset,
                    length: packet.length,
                    capacity,
                })?;
            self.feeder.feed(bytes)?;
        }

        Ok(())
    }

    fn teardown(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);

        if let Err(e) = self.sink.stop() {
            tracing::warn!(sink = self.sink.name(), error = %e, "Failed to stop render sink");
        }
        self.pipe.unregister_buffer();

        tracing::debug!("Bridge worker torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleEncoding;
    use crate::sink::MemorySink;
    use crate::source::{MockPipe, PipeEvent};
    use std::time::Duration;

    fn scheduler(pipe: MockPipe, sink: &Arc<MemorySink>, slots: usize) -> TransferScheduler {
        let format = OutputFormat {
            channels: 2,
            sample_rate: 44_100,
            encoding: SampleEncoding::Int16,
        };
        sink.initialize(&format, Duration::from_millis(500)).unwrap();
        let state = Arc::new(SessionState::new());
        let ring = TransferRing::new(slots, pipe.max_bytes_per_interval(), 1);
        let feeder = RenderFeeder::new(sink.clone(), format, 192, state.clone(), None).unwrap();
        TransferScheduler::new(Box::new(pipe), ring, feeder, sink.clone(), format, state, None)
    }

    #[tokio::test]
    async fn test_drains_in_submission_order() {
        let mut pipe = MockPipe::new();
        for i in 0..6 {
            pipe.push_constant(i, i, 4);
        }
        let journal = pipe.journal();
        let sink = Arc::new(MemorySink::new());

        let err = scheduler(pipe, &sink, 3).run().await.unwrap_err();

        assert!(matches!(err, BridgeError::Transfer(TransferError::Disconnected)));
        assert_eq!(journal.drains(), vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(sink.frames_written(), 24);
        // Every frame of the fifth transfer carries its index.
        let fifth = &sink.written()[4 * 16..5 * 16];
        assert!(fifth.chunks_exact(2).all(|s| s == [4, 0]));
    }

    #[tokio::test]
    async fn test_slot_never_resubmitted_while_in_flight() {
        let mut pipe = MockPipe::new();
        for _ in 0..20 {
            pipe.push_constant(1, 1, 2);
        }
        let journal = pipe.journal();
        let sink = Arc::new(MemorySink::new());

        scheduler(pipe, &sink, 4).run().await.unwrap_err();

        let mut outstanding = [false; 4];
        for event in journal.events() {
            match event {
                PipeEvent::Submitted { slot, .. } => {
                    assert!(!outstanding[slot], "slot {slot} resubmitted before drain");
                    outstanding[slot] = true;
                }
                PipeEvent::Drained { slot } => outstanding[slot] = false,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_empty_packets_are_skipped() {
        let mut pipe = MockPipe::new();
        pipe.push_empty();
        pipe.push_constant(3, 3, 5);
        pipe.push_empty();
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(pipe, &sink, 2);
        let state = scheduler.state.clone();

        scheduler.run().await.unwrap_err();

        let stats = state.snapshot();
        assert_eq!(stats.empty_packets, 2);
        assert_eq!(stats.packets_rendered, 1);
        assert_eq!(stats.transfers_completed, 3);
        assert_eq!(sink.frames_written(), 5);
    }

    #[tokio::test]
    async fn test_teardown_after_fatal_error() {
        let mut pipe = MockPipe::new();
        pipe.push_constant(0, 0, 4);
        pipe.push_error(TransferError::backend("stall"));
        let journal = pipe.journal();
        let sink = Arc::new(MemorySink::new());

        let err = scheduler(pipe, &sink, 2).run().await.unwrap_err();

        assert_eq!(err.to_string(), "usb backend error: stall");
        assert_eq!(journal.events().last(), Some(&PipeEvent::Unregistered));
        assert!(!sink.is_playing());
        assert_eq!(sink.stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_render_failure_is_fatal() {
        let mut pipe = MockPipe::new();
        pipe.push_constant(0, 0, 4);
        pipe.push_constant(0, 0, 4);
        let sink = Arc::new(
            MemorySink::new().with_write_error_after(1, crate::RenderError::backend("lost")),
        );

        let err = scheduler(pipe, &sink, 2).run().await.unwrap_err();

        assert!(matches!(err, BridgeError::Render(_)));
        assert_eq!(sink.write_calls(), 1);
    }

    #[tokio::test]
    async fn test_stops_when_running_cleared() {
        let pipe = MockPipe::new().with_repeat(crate::source::MockCompletion::Transfer(vec![
            vec![0; 8],
        ]));
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(pipe, &sink, 2);
        scheduler.state.running.store(false, Ordering::SeqCst);

        scheduler.run().await.unwrap();
        assert_eq!(sink.start_calls(), 1);
        assert_eq!(sink.stop_calls(), 1);
    }
}
