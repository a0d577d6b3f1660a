//! Render sink trait and implementations for host audio output.
//!
//! A [`RenderSink`] is the host side of the bridge: a shared-mode output ring
//! buffer that converted frames are committed into. Two sinks are provided:
//!
//! - [`CpalRenderSink`]: Plays through the default output device via CPAL
//! - [`MemorySink`]: Records frames in memory, for tests and headless runs
//!
//! Implement the trait to bridge accessory audio into another audio stack.

mod cpal_output;
mod memory;

pub use cpal_output::CpalRenderSink;
pub use memory::{MemorySink, Playback};

use std::time::Duration;

use crate::format::{FormatDescriptor, OutputFormat};
use crate::RenderError;

/// A host output ring buffer.
///
/// # Implementation Notes
///
/// - Methods take `&self`; use interior mutability (`Mutex`, atomics) for state
/// - `check_format` may be called before `initialize`; nothing else may
/// - `write_frames` is called from the bridge worker task and must not block
///   on playback
/// - `stop` must be idempotent; it runs on every teardown path
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
/// use accessory_audio::format::{FormatDescriptor, OutputFormat};
/// use accessory_audio::{RenderError, RenderSink};
///
/// /// Discards everything, as if playback were instantaneous.
/// struct NullSink {
///     frames: AtomicUsize,
/// }
///
/// impl RenderSink for NullSink {
///     fn name(&self) -> &str {
///         "null"
///     }
///
///     fn check_format(
///         &self,
///         _desired: &FormatDescriptor,
///     ) -> Result<Option<FormatDescriptor>, RenderError> {
///         Ok(None)
///     }
///
///     fn initialize(
///         &self,
///         _format: &OutputFormat,
///         _duration: Duration,
///     ) -> Result<(), RenderError> {
///         Ok(())
///     }
///
///     fn buffer_frames(&self) -> Result<usize, RenderError> {
///         Ok(4096)
///     }
///
///     fn backlog_frames(&self) -> Result<usize, RenderError> {
///         Ok(0)
///     }
///
///     fn write_frames(&self, _bytes: &[u8], frames: usize) -> Result<(), RenderError> {
///         self.frames.fetch_add(frames, Ordering::Relaxed);
///         Ok(())
///     }
///
///     fn start(&self) -> Result<(), RenderError> {
///         Ok(())
///     }
///
///     fn stop(&self) -> Result<(), RenderError> {
///         Ok(())
///     }
/// }
/// ```
pub trait RenderSink: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Checks whether `desired` is playable in shared mode.
    ///
    /// Returns `None` when it is accepted as-is, or the closest format the
    /// host supports instead.
    fn check_format(
        &self,
        desired: &FormatDescriptor,
    ) -> Result<Option<FormatDescriptor>, RenderError>;

    /// Opens a render session for `format` buffering roughly `buffer_duration`.
    fn initialize(&self, format: &OutputFormat, buffer_duration: Duration)
        -> Result<(), RenderError>;

    /// Total capacity of the host ring buffer in frames.
    fn buffer_frames(&self) -> Result<usize, RenderError>;

    /// Frames queued in the host ring buffer and not yet played.
    fn backlog_frames(&self) -> Result<usize, RenderError>;

    /// Commits `frames` frames of interleaved output bytes.
    ///
    /// `bytes` holds exactly `frames` frames. Callers never commit more than
    /// `buffer_frames() - backlog_frames()`.
    fn write_frames(&self, bytes: &[u8], frames: usize) -> Result<(), RenderError>;

    /// Starts playback.
    fn start(&self) -> Result<(), RenderError>;

    /// Stops playback. Idempotent.
    fn stop(&self) -> Result<(), RenderError>;
}
