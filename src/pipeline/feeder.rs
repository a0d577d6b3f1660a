//! Render feeder - moves converted packets into the host ring buffer.
//!
//! The feeder never blocks on the host. A packet that does not fit is cut to
//! whatever room the ring buffer has, and a packet arriving at a full ring
//! buffer is dropped. Either way the sampling counter advances over the whole
//! packet, so the output time base does not depend on how much was played.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::event::EventCallback;
use crate::format::{Conversion, OutputFormat, SampleConverter, SamplingCounter};
use crate::session::SessionState;
use crate::sink::RenderSink;
use crate::{BridgeEvent, RenderError};

pub(crate) struct RenderFeeder {
    sink: Arc<dyn RenderSink>,
    converter: SampleConverter,
    counter: SamplingCounter,
    scratch: Vec<u8>,
    capacity_frames: usize,
    dropping: bool,
    state: Arc<SessionState>,
    event_callback: Option<EventCallback>,
}

impl RenderFeeder {
    /// Creates a feeder for packets of at most `max_packet_bytes`.
    ///
    /// The sink must already be initialized; its capacity is read once here.
    pub fn new(
        sink: Arc<dyn RenderSink>,
        format: OutputFormat,
        max_packet_bytes: usize,
        state: Arc<SessionState>,
        event_callback: Option<EventCallback>,
    ) -> Result<Self, RenderError> {
        let capacity_frames = sink.buffer_frames()?;
        let converter = SampleConverter::new(format);
        let scratch = vec![0; converter.max_output_frames(max_packet_bytes) * format.block_align()];

        Ok(Self {
            sink,
            converter,
            counter: SamplingCounter::new(),
            scratch,
            capacity_frames,
            dropping: false,
            state,
            event_callback,
        })
    }

    fn emit_event(&self, event: BridgeEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    /// Converts one packet and commits what fits.
    ///
    /// # Errors
    ///
    /// Any sink failure. These end the session.
    pub fn feed(&mut self, packet: &[u8]) -> Result<Conversion, RenderError> {
        let backlog = self.sink.backlog_frames()?;
        let available = self.capacity_frames.saturating_sub(backlog);

        if available == 0 {
            let frames = self.converter.skip(packet, &mut self.counter);
            if !self.dropping {
                tracing::warn!(
                    sink = self.sink.name(),
                    backlog,
                    "Render buffer full, dropping packets"
                );
                self.dropping = true;
            }
            self.state
                .frames_dropped
                .fetch_add(frames as u64, Ordering::SeqCst);
            self.emit_event(BridgeEvent::PacketDropped { frames });
            return Ok(Conversion {
                frames_written: 0,
                frames_discarded: frames,
            });
        }
        self.dropping = false;

        let block = self.converter.output_format().block_align();
        let limit = available.min(self.scratch.len() / block);
        let conversion =
            self.converter
                .convert(packet, &mut self.scratch[..limit * block], &mut self.counter);

        if conversion.frames_written > 0 {
            let len = conversion.frames_written * block;
            self.sink
                .write_frames(&self.scratch[..len], conversion.frames_written)?;
        }
        if conversion.frames_discarded > 0 {
            tracing::debug!(
                written = conversion.frames_written,
                dropped = conversion.frames_discarded,
                "Packet truncated to render buffer space"
            );
            self.emit_event(BridgeEvent::FramesTruncated {
                dropped: conversion.frames_discarded,
            });
        }

        self.state.packets_rendered.fetch_add(1, Ordering::SeqCst);
        self.state
            .frames_written
            .fetch_add(conversion.frames_written as u64, Ordering::SeqCst);
        self.state
            .frames_dropped
            .fetch_add(conversion.frames_discarded as u64, Ordering::SeqCst);

        Ok(conversion)
    }

    #[cfg(test)]
    pub fn counter(&self) -> &SamplingCounter {
        &self.counter
    }
}
