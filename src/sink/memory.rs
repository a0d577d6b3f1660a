//! In-memory render sink for testing without an audio device.

use std::time::Duration;

use parking_lot::Mutex;

use super::RenderSink;
use crate::format::{FormatDescriptor, OutputFormat};
use crate::RenderError;

/// How a [`MemorySink`] consumes its backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Playback {
    /// Every committed frame plays immediately; backlog is always zero.
    #[default]
    Instant,
    /// Committed frames stay queued until [`MemorySink::drain`] is called.
    Hold,
    /// Backlog is pinned at the given frame count regardless of writes.
    Fixed(usize),
}

#[derive(Debug, Default)]
struct MemoryState {
    format: Option<OutputFormat>,
    capacity: usize,
    backlog: usize,
    playing: bool,
    written: Vec<u8>,
    frames_written: usize,
    write_calls: usize,
    start_calls: usize,
    stop_calls: usize,
}

/// A render sink that records committed frames in memory.
///
/// Useful for tests and for running the bridge on machines without an output
/// device. The sink models a host ring buffer faithfully enough to exercise
/// backlog handling and can be told to fail at specific points.
///
/// Committed bytes are kept for inspection. Long headless runs should bound
/// that with [`with_recording_limit`](MemorySink::with_recording_limit).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use accessory_audio::format::{OutputFormat, SampleEncoding};
/// use accessory_audio::sink::{MemorySink, Playback};
/// use accessory_audio::RenderSink;
///
/// let sink = MemorySink::new().with_playback(Playback::Hold);
/// let format = OutputFormat { channels: 2, sample_rate: 48_000, encoding: SampleEncoding::Int16 };
/// sink.initialize(&format, Duration::from_millis(10)).unwrap();
///
/// assert_eq!(sink.buffer_frames().unwrap(), 480);
/// sink.write_frames(&[0; 40], 10).unwrap();
/// assert_eq!(sink.backlog_frames().unwrap(), 10);
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    alternate: Option<FormatDescriptor>,
    check_error: Option<RenderError>,
    init_error: Option<RenderError>,
    backlog_error: Option<RenderError>,
    write_error: Option<(usize, RenderError)>,
    capacity: Option<usize>,
    recording_limit: Option<usize>,
    playback: Playback,
    state: Mutex<MemoryState>,
}

impl MemorySink {
    /// Creates a sink that accepts any format and plays instantly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers `alternate` instead of accepting the desired format.
    pub fn with_alternate(mut self, alternate: FormatDescriptor) -> Self {
        self.alternate = Some(alternate);
        self
    }

    /// Fails every format check with `error`.
    pub fn with_check_error(mut self, error: RenderError) -> Self {
        self.check_error = Some(error);
        self
    }

    /// Fails `initialize` with `error`.
    pub fn with_init_error(mut self, error: RenderError) -> Self {
        self.init_error = Some(error);
        self
    }

    /// Fails every backlog query with `error`.
    pub fn with_backlog_error(mut self, error: RenderError) -> Self {
        self.backlog_error = Some(error);
        self
    }

    /// Lets `writes` commits succeed, then fails the next one with `error`.
    pub fn with_write_error_after(mut self, writes: usize, error: RenderError) -> Self {
        self.write_error = Some((writes, error));
        self
    }

    /// Overrides the ring buffer capacity in frames.
    ///
    /// By default the capacity covers the requested buffer duration.
    pub fn with_capacity(mut self, frames: usize) -> Self {
        self.capacity = Some(frames);
        self
    }

    /// Keeps at most the first `bytes` committed bytes.
    ///
    /// Later commits are still counted in [`frames_written`](Self::frames_written).
    pub fn with_recording_limit(mut self, bytes: usize) -> Self {
        self.recording_limit = Some(bytes);
        self
    }

    /// Sets the playback model.
    pub fn with_playback(mut self, playback: Playback) -> Self {
        self.playback = playback;
        self
    }

    /// The format the sink was initialized with.
    pub fn format(&self) -> Option<OutputFormat> {
        self.state.lock().format
    }

    /// Bytes committed so far, in order, up to the recording limit.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Total frames committed.
    pub fn frames_written(&self) -> usize {
        self.state.lock().frames_written
    }

    /// Number of `write_frames` calls that succeeded.
    pub fn write_calls(&self) -> usize {
        self.state.lock().write_calls
    }

    /// Number of `start` calls.
    pub fn start_calls(&self) -> usize {
        self.state.lock().start_calls
    }

    /// Number of `stop` calls.
    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }

    /// Returns `true` between `start` and `stop`.
    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    /// Plays up to `frames` queued frames under [`Playback::Hold`].
    pub fn drain(&self, frames: usize) {
        let mut state = self.state.lock();
        state.backlog = state.backlog.saturating_sub(frames);
    }
}

impl RenderSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn check_format(
        &self,
        _desired: &FormatDescriptor,
    ) -> Result<Option<FormatDescriptor>, RenderError> {
        if let Some(error) = &self.check_error {
            return Err(error.clone());
        }
        Ok(self.alternate)
    }

    fn initialize(
        &self,
        format: &OutputFormat,
        buffer_duration: Duration,
    ) -> Result<(), RenderError> {
        if let Some(error) = &self.init_error {
            return Err(error.clone());
        }

        let capacity = self
            .capacity
            .unwrap_or_else(|| format.frames_for(buffer_duration));
        if capacity == 0 {
            return Err(RenderError::FormatRejected {
                reason: format!("zero-frame buffer for {format}"),
            });
        }

        let mut state = self.state.lock();
        state.format = Some(*format);
        state.capacity = capacity;
        state.backlog = 0;
        Ok(())
    }

    fn buffer_frames(&self) -> Result<usize, RenderError> {
        let state = self.state.lock();
        state
            .format
            .map(|_| state.capacity)
            .ok_or(RenderError::NotInitialized)
    }

    fn backlog_frames(&self) -> Result<usize, RenderError> {
        if let Some(error) = &self.backlog_error {
            return Err(error.clone());
        }
        let state = self.state.lock();
        if state.format.is_none() {
            return Err(RenderError::NotInitialized);
        }
        Ok(match self.playback {
            Playback::Instant => 0,
            Playback::Hold => state.backlog,
            Playback::Fixed(frames) => frames.min(state.capacity),
        })
    }

    fn write_frames(&self, bytes: &[u8], frames: usize) -> Result<(), RenderError> {
        let mut state = self.state.lock();
        let format = state.format.ok_or(RenderError::NotInitialized)?;

        if let Some((allowed, error)) = &self.write_error {
            if state.write_calls >= *allowed {
                return Err(error.clone());
            }
        }

        let expected = frames * format.block_align();
        if bytes.len() != expected {
            return Err(RenderError::backend(format!(
                "{} bytes committed for {frames} frames of {format}",
                bytes.len()
            )));
        }
        if self.playback == Playback::Hold && state.backlog + frames > state.capacity {
            return Err(RenderError::backend(format!(
                "render buffer overrun: {frames} frames with {} of {} queued",
                state.backlog, state.capacity
            )));
        }

        let keep = self.recording_limit.map_or(bytes.len(), |limit| {
            limit.saturating_sub(state.written.len()).min(bytes.len())
        });
        state.written.extend_from_slice(&bytes[..keep]);
        state.frames_written += frames;
        state.write_calls += 1;
        if self.playback == Playback::Hold {
            state.backlog += frames;
        }
        Ok(())
    }

    fn start(&self) -> Result<(), RenderError> {
        let mut state = self.state.lock();
        if state.format.is_none() {
            return Err(RenderError::NotInitialized);
        }
        state.playing = true;
        state.start_calls += 1;
        Ok(())
    }

    fn stop(&self) -> Result<(), RenderError> {
        let mut state = self.state.lock();
        state.playing = false;
        state.stop_calls += 1;
        Ok(())
    }
}
