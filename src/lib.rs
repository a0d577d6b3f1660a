//! # accessory-audio
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Plays audio from a USB accessory through the host's audio output.
//!
//! The accessory streams 2-channel 16-bit PCM at 44.1kHz over an isochronous
//! endpoint. `accessory-audio` keeps a ring of reads in flight against that
//! endpoint, converts every packet to whatever format the host output device
//! negotiated, and commits it to the host's render buffer without ever
//! blocking on playback.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use accessory_audio::sink::CpalRenderSink;
//! use accessory_audio::AudioBridge;
//!
//! let pipe = open_accessory_pipe()?; // your `IsochronousPipe` implementation
//!
//! let bridge = AudioBridge::builder()
//!     .on_event(|e| tracing::warn!(?e, "bridge event"))
//!     .build(Arc::new(CpalRenderSink::open_default()?));
//!
//! bridge.start(pipe)?;
//! // Audio plays in the background...
//! tokio::time::sleep(Duration::from_secs(10)).await;
//!
//! bridge.stop();
//! let stats = bridge.wait().await?;
//! ```
//!
//! ## Architecture
//!
//! - **Transfer Ring**: Fixed set of reads kept in flight, drained in FIFO order
//! - **Sample Converter**: Nearest-neighbor rate conversion and re-encoding
//! - **Render Feeder**: Truncates or drops packets the host buffer has no room for
//!
//! Isochronous data must reach the render path in capture order, so one
//! worker task drains transfers strictly one at a time.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod config;
mod error;
mod event;
pub mod format;
mod pipeline;
mod session;
pub mod sink;
pub mod source;

pub use builder::BridgeBuilder;
pub use config::BridgeConfig;
pub use error::{BridgeError, RenderError, TransferError};
pub use event::{event_callback, BridgeEvent, EventCallback};
pub use format::{OutputFormat, SampleEncoding, SourceFormat, ACCESSORY_FORMAT};
pub use session::{AudioBridge, BridgeState, SessionStats};
pub use sink::{CpalRenderSink, MemorySink, RenderSink};
pub use source::{IsoPacket, IsochronousPipe, MockPipe, ReadRequest};
