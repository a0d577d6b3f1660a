//! Error types for accessory-audio.
//!
//! Errors are split into three layers:
//! - [`TransferError`]: failures reported by the isochronous source
//! - [`RenderError`]: failures reported by the host output sink
//! - [`BridgeError`]: what callers of [`AudioBridge`](crate::AudioBridge) see
//!
//! Only [`TransferError::Discontinuity`] is recoverable at runtime. Everything
//! else either prevents a session from starting or ends it.

/// Failures reported by an [`IsochronousPipe`](crate::IsochronousPipe).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// Two reads submitted as one continuous sequence observed a gap.
    ///
    /// The scheduler recovers by starting a new sequence on the next read.
    #[error("isochronous stream discontinuity")]
    Discontinuity,

    /// The accessory or its pipe went away.
    #[error("isochronous pipe disconnected")]
    Disconnected,

    /// A read was submitted for a slot that still has one outstanding.
    #[error("transfer slot {slot} already has a read in flight")]
    SlotBusy {
        /// Index of the busy slot.
        slot: usize,
    },

    /// A read was submitted before the capture buffer was registered.
    #[error("capture buffer not registered")]
    NotRegistered,

    /// A completed packet descriptor points outside its transfer.
    #[error("packet at offset {offset} with length {length} exceeds transfer size {capacity}")]
    InvalidPacket {
        /// Byte offset of the packet within its transfer.
        offset: usize,
        /// Valid length reported for the packet.
        length: usize,
        /// Size of the transfer the packet belongs to.
        capacity: usize,
    },

    /// Any other error from the USB stack.
    #[error("usb backend error: {0}")]
    Backend(String),
}

impl TransferError {
    /// Returns `true` for the one failure the scheduler absorbs.
    pub fn is_discontinuity(&self) -> bool {
        matches!(self, Self::Discontinuity)
    }

    /// Creates a backend error with the given message.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Failures reported by a [`RenderSink`](crate::RenderSink).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// No output device is available.
    #[error("no output device available")]
    DeviceNotFound,

    /// The sink was used before [`initialize`](crate::RenderSink::initialize).
    #[error("render session not initialized")]
    NotInitialized,

    /// The device refused the format without offering an alternative.
    #[error("output format rejected: {reason}")]
    FormatRejected {
        /// Why the format was rejected.
        reason: String,
    },

    /// An error from the underlying audio library.
    #[error("audio backend error: {0}")]
    Backend(String),
}

impl RenderError {
    /// Creates a backend error with the given message.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Errors surfaced by the [`AudioBridge`](crate::AudioBridge) controller.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The negotiated format uses an encoding the converter cannot produce.
    #[error("unsupported output format: {reason}")]
    UnsupportedFormat {
        /// Description of the offending format.
        reason: String,
    },

    /// The negotiated format uses a channel width other than 1, 2 or 4 bytes.
    #[error("unsupported sample width: {bytes} bytes per channel")]
    UnsupportedSampleWidth {
        /// Bytes per channel of the rejected format.
        bytes: u16,
    },

    /// The host sink failed while the session was being prepared.
    #[error("format negotiation failed: {0}")]
    Negotiation(#[source] RenderError),

    /// Configuration values that cannot produce a working session.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// `start()` was called while a session is active.
    #[error("a session is already active")]
    AlreadyRunning,

    /// `wait()` was called without a session to join.
    #[error("no session to wait for")]
    NoSession,

    /// A fatal isochronous transfer error ended the session.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A fatal render error ended the session.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// The worker task could not be spawned or did not run to completion.
    #[error("session worker failed: {0}")]
    WorkerFailed(String),
}

impl BridgeError {
    /// Returns `true` for errors that kept a session from starting.
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat { .. }
                | Self::UnsupportedSampleWidth { .. }
                | Self::Negotiation(_)
        )
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported_format(reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_display() {
        let err = TransferError::SlotBusy { slot: 3 };
        assert_eq!(err.to_string(), "transfer slot 3 already has a read in flight");
    }

    #[test]
    fn test_only_discontinuity_is_recoverable() {
        assert!(TransferError::Discontinuity.is_discontinuity());
        assert!(!TransferError::Disconnected.is_discontinuity());
        assert!(!TransferError::backend("stall").is_discontinuity());
    }

    #[test]
    fn test_render_error_backend() {
        let err = RenderError::backend("device unplugged");
        assert_eq!(err.to_string(), "audio backend error: device unplugged");
    }

    #[test]
    fn test_bridge_error_from_transfer_is_transparent() {
        let err: BridgeError = TransferError::Disconnected.into();
        assert_eq!(err.to_string(), "isochronous pipe disconnected");
        assert!(!err.is_negotiation());
    }

    #[test]
    fn test_bridge_error_negotiation_category() {
        assert!(BridgeError::UnsupportedSampleWidth { bytes: 3 }.is_negotiation());
        assert!(BridgeError::Negotiation(RenderError::DeviceNotFound).is_negotiation());
        assert!(!BridgeError::AlreadyRunning.is_negotiation());
    }
}
