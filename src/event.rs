//! Runtime events for monitoring bridge health.
//!
//! Events are non-fatal notifications about session behavior. A session keeps
//! running after any event except [`BridgeEvent::SessionStopped`], which is
//! always the last one.

use std::sync::Arc;

use crate::format::OutputFormat;

/// Runtime events emitted by a bridge session.
///
/// # Example
///
/// ```
/// use accessory_audio::BridgeEvent;
///
/// fn handle_event(event: BridgeEvent) {
///     match event {
///         BridgeEvent::SessionStarted { format, slots } => {
///             eprintln!("Bridging to {format} with {slots} reads in flight");
///         }
///         BridgeEvent::Discontinuity { slot } => {
///             eprintln!("Stream gap detected at slot {slot}");
///         }
///         BridgeEvent::PacketDropped { frames } => {
///             eprintln!("Render buffer full, dropped {frames} frames");
///         }
///         BridgeEvent::FramesTruncated { dropped } => {
///             eprintln!("Render buffer nearly full, truncated {dropped} frames");
///         }
///         BridgeEvent::SessionStopped { error } => {
///             eprintln!("Session stopped: {error:?}");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Reads are in flight and the render session is playing.
    SessionStarted {
        /// Negotiated output format.
        format: OutputFormat,
        /// Number of transfer slots.
        slots: usize,
    },

    /// A read reported a gap; the slot restarts the sequence.
    Discontinuity {
        /// Slot whose read observed the gap.
        slot: usize,
    },

    /// A packet arrived while the render buffer had no room at all.
    PacketDropped {
        /// Output frames the packet would have produced.
        frames: usize,
    },

    /// A packet only partially fit in the render buffer.
    FramesTruncated {
        /// Output frames cut from the end of the packet.
        dropped: usize,
    },

    /// The worker exited.
    SessionStopped {
        /// The fatal error that ended the session, if any.
        error: Option<String>,
    },
}

/// Callback type for receiving runtime events.
pub type EventCallback = Arc<dyn Fn(BridgeEvent) + Send + Sync>;

/// Wraps a closure as an [`EventCallback`].
///
/// # Example
///
/// ```
/// use accessory_audio::{event_callback, BridgeEvent};
///
/// let callback = event_callback(|event: BridgeEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(BridgeEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
