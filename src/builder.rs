//! Builder pattern for `AudioBridge`.

use std::sync::Arc;

use crate::session::AudioBridge;
use crate::sink::RenderSink;
use crate::{event_callback, BridgeConfig, BridgeEvent, EventCallback};

/// Builder for configuring an [`AudioBridge`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use accessory_audio::sink::MemorySink;
/// use accessory_audio::{AudioBridge, BridgeConfig};
///
/// let bridge = AudioBridge::builder()
///     .with_config(BridgeConfig {
///         capture_duration: Duration::from_millis(100),
///         ..Default::default()
///     })
///     .on_event(|e| tracing::warn!(?e, "bridge event"))
///     .build(Arc::new(MemorySink::new()));
/// ```
///
/// [`AudioBridge::builder()`]: crate::AudioBridge::builder
#[must_use]
#[derive(Default)]
pub struct BridgeBuilder {
    /// Event callback.
    event_callback: Option<EventCallback>,
    /// Session configuration.
    config: BridgeConfig,
}

impl BridgeBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include discontinuities, dropped packets, and session start/stop.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(BridgeEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Set custom session configuration.
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds an idle bridge that renders into `sink`.
    pub fn build(self, sink: Arc<dyn RenderSink>) -> AudioBridge {
        AudioBridge::new(sink, self.config, self.event_callback)
    }
}

impl AudioBridge {
    /// Creates a new builder for configuring a bridge.
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }
}
