//! Configuration for bridge sessions.

use std::time::Duration;

use crate::BridgeError;

/// Configuration for a bridge session.
///
/// Use [`BridgeConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use accessory_audio::BridgeConfig;
/// use std::time::Duration;
///
/// let config = BridgeConfig {
///     capture_duration: Duration::from_millis(100),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Amount of accessory audio kept in flight as outstanding reads.
    ///
    /// Determines the number of transfer slots. Longer durations ride out
    /// scheduling hiccups at the cost of memory.
    /// Default: 500ms
    pub capture_duration: Duration,

    /// Buffering requested from the host render session.
    ///
    /// Default: 500ms
    pub render_buffer_duration: Duration,

    /// Isochronous packets per read.
    ///
    /// Each packet carries up to one service interval of audio.
    /// Default: 1
    pub packets_per_transfer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capture_duration: Duration::from_millis(500),
            render_buffer_duration: Duration::from_millis(500),
            packets_per_transfer: 1,
        }
    }
}

impl BridgeConfig {
    /// Checks that the configuration can produce a working session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for zero durations or zero packets per transfer.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.capture_duration.is_zero() {
            return Err(BridgeError::invalid_config("capture_duration must be non-zero"));
        }
        if self.render_buffer_duration.is_zero() {
            return Err(BridgeError::invalid_config(
                "render_buffer_duration must be non-zero",
            ));
        }
        if self.packets_per_transfer == 0 {
            return Err(BridgeError::invalid_config(
                "packets_per_transfer must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.capture_duration, Duration::from_millis(500));
        assert_eq!(config.render_buffer_duration, Duration::from_millis(500));
        assert_eq!(config.packets_per_transfer, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capture_duration_rejected() {
        let config = BridgeConfig {
            capture_duration: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capture_duration"));
    }

    #[test]
    fn test_zero_render_duration_rejected() {
        let config = BridgeConfig {
            render_buffer_duration: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BridgeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_zero_packets_rejected() {
        let config = BridgeConfig {
            packets_per_transfer: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
