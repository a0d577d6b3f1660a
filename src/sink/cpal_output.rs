//! CPAL output device as a render sink.
//!
//! CPAL does not expose the host's shared-mode ring buffer directly, so this
//! sink keeps its own: a lock-free SPSC byte ring filled by the bridge worker
//! and drained by the device callback. Backlog is whatever the callback has
//! not yet consumed.
//!
//! `cpal::Stream` is not `Send`, so each render session owns a dedicated
//! output thread that builds the stream and applies play/pause commands.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SizedSample, Stream, StreamConfig, SupportedStreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::RenderSink;
use crate::format::{FormatDescriptor, OutputFormat, SampleEncoding, SubFormat};
use crate::RenderError;

/// Size of the callback's decode scratch buffer in bytes.
const CALLBACK_SCRATCH_BYTES: usize = 16 * 1024;

enum StreamCommand {
    Play,
    Pause,
}

struct OutputSession {
    format: OutputFormat,
    capacity_frames: usize,
    producer: HeapProd<u8>,
    commands: Option<mpsc::Sender<StreamCommand>>,
    replies: mpsc::Receiver<Result<(), RenderError>>,
    thread: Option<JoinHandle<()>>,
    playing: bool,
}

impl OutputSession {
    fn send(&mut self, command: StreamCommand) -> Result<(), RenderError> {
        self.commands
            .as_ref()
            .ok_or_else(|| RenderError::backend("output thread exited"))?
            .send(command)
            .map_err(|_| RenderError::backend("output thread exited"))?;
        self.replies
            .recv()
            .map_err(|_| RenderError::backend("output thread exited"))?
    }

    fn shutdown(&mut self) {
        // Dropping the sender ends the command loop and with it the stream.
        self.commands.take();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("Output thread panicked");
            }
        }
    }
}

impl Drop for OutputSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Plays bridged audio through a CPAL output device.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use accessory_audio::sink::CpalRenderSink;
/// use accessory_audio::AudioBridge;
///
/// let sink = CpalRenderSink::open_default()?;
/// let bridge = AudioBridge::builder().build(Arc::new(sink));
/// # Ok::<(), accessory_audio::RenderError>(())
/// ```
pub struct CpalRenderSink {
    name: String,
    device_name: Option<String>,
    session: Mutex<Option<OutputSession>>,
}

impl CpalRenderSink {
    /// Uses the host's default output device.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no default output device is configured.
    pub fn open_default() -> Result<Self, RenderError> {
        let device = resolve_device(None)?;
        Ok(Self {
            name: device_label(&device),
            device_name: None,
            session: Mutex::new(None),
        })
    }

    /// Uses the output device called `name`.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no output device has that name.
    pub fn open_by_name(name: &str) -> Result<Self, RenderError> {
        resolve_device(Some(name))?;
        Ok(Self {
            name: name.to_string(),
            device_name: Some(name.to_string()),
            session: Mutex::new(None),
        })
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut OutputSession) -> Result<T, RenderError>,
    ) -> Result<T, RenderError> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(RenderError::NotInitialized)?;
        f(session)
    }
}

impl RenderSink for CpalRenderSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_format(
        &self,
        desired: &FormatDescriptor,
    ) -> Result<Option<FormatDescriptor>, RenderError> {
        let device = resolve_device(self.device_name.as_deref())?;

        if let Ok(format) = OutputFormat::from_descriptor(desired) {
            let supported = device
                .supported_output_configs()
                .map_err(|e| RenderError::backend(e.to_string()))?
                .any(|range| {
                    range.channels() == format.channels
                        && encoding_of(range.sample_format()) == Some(format.encoding)
                        && (range.min_sample_rate().0..=range.max_sample_rate().0)
                            .contains(&format.sample_rate)
                });
            if supported {
                return Ok(None);
            }
        }

        let default = device
            .default_output_config()
            .map_err(|e| RenderError::backend(e.to_string()))?;
        descriptor_for(&default).map(Some).ok_or_else(|| RenderError::FormatRejected {
            reason: format!(
                "device default sample format {:?} has no PCM equivalent",
                default.sample_format()
            ),
        })
    }

    fn initialize(
        &self,
        format: &OutputFormat,
        buffer_duration: Duration,
    ) -> Result<(), RenderError> {
        // Release any previous session before opening the device again.
        self.session.lock().take();

        let capacity_frames = format.frames_for(buffer_duration).max(1);
        let ring = HeapRb::<u8>::new(capacity_frames * format.block_align());
        let (producer, consumer) = ring.split();

        let (command_tx, command_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let device_name = self.device_name.clone();
        let stream_format = *format;

        let thread = std::thread::Builder::new()
            .name("accessory-audio-output".into())
            .spawn(move || {
                run_output_thread(device_name, stream_format, consumer, &command_rx, &reply_tx);
            })
            .map_err(|e| RenderError::backend(e.to_string()))?;

        let session = OutputSession {
            format: *format,
            capacity_frames,
            producer,
            commands: Some(command_tx),
            replies: reply_rx,
            thread: Some(thread),
            playing: false,
        };

        // The thread reports whether the stream could be built before taking commands.
        session
            .replies
            .recv()
            .map_err(|_| RenderError::backend("output thread exited"))??;

        tracing::info!(
            device = %self.name,
            format = %format,
            capacity_frames,
            "Render session initialized"
        );
        *self.session.lock() = Some(session);
        Ok(())
    }

    fn buffer_frames(&self) -> Result<usize, RenderError> {
        self.with_session(|session| Ok(session.capacity_frames))
    }

    fn backlog_frames(&self) -> Result<usize, RenderError> {
        self.with_session(|session| {
            Ok(queued_frames(&session.producer, session.format.block_align()))
        })
    }

    fn write_frames(&self, bytes: &[u8], frames: usize) -> Result<(), RenderError> {
        self.with_session(|session| {
            let block_align = session.format.block_align();
            queue_frames(&mut session.producer, bytes, frames, block_align)
        })
    }

    fn start(&self) -> Result<(), RenderError> {
        self.with_session(|session| {
            session.send(StreamCommand::Play)?;
            session.playing = true;
            Ok(())
        })
    }

    fn stop(&self) -> Result<(), RenderError> {
        let mut guard = self.session.lock();
        match guard.as_mut() {
            Some(session) if session.playing => {
                session.playing = false;
                session.send(StreamCommand::Pause)
            }
            _ => Ok(()),
        }
    }
}

fn run_output_thread(
    device_name: Option<String>,
    format: OutputFormat,
    consumer: HeapCons<u8>,
    commands: &mpsc::Receiver<StreamCommand>,
    replies: &mpsc::Sender<Result<(), RenderError>>,
) {
    let stream = match resolve_device(device_name.as_deref())
        .and_then(|device| build_stream(&device, &format, consumer))
    {
        Ok(stream) => {
            let _ = replies.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = replies.send(Err(e));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        let result = match command {
            StreamCommand::Play => stream.play().map_err(|e| e.to_string()),
            StreamCommand::Pause => stream.pause().map_err(|e| e.to_string()),
        };
        let _ = replies.send(result.map_err(RenderError::backend));
    }

    tracing::debug!("Output thread exiting");
}

fn resolve_device(name: Option<&str>) -> Result<Device, RenderError> {
    let host = cpal::default_host();
    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or(RenderError::DeviceNotFound);
    };

    let devices = host
        .output_devices()
        .map_err(|e| RenderError::backend(e.to_string()))?;
    for device in devices {
        if device.name().is_ok_and(|device_name| device_name == name) {
            return Ok(device);
        }
    }
    Err(RenderError::DeviceNotFound)
}

fn device_label(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "unknown".to_string())
}

fn encoding_of(format: SampleFormat) -> Option<SampleEncoding> {
    match format {
        SampleFormat::I8 => Some(SampleEncoding::Int8),
        SampleFormat::I16 => Some(SampleEncoding::Int16),
        SampleFormat::I32 => Some(SampleEncoding::Int32),
        SampleFormat::F32 => Some(SampleEncoding::Float32),
        _ => None,
    }
}

fn descriptor_for(config: &SupportedStreamConfig) -> Option<FormatDescriptor> {
    let encoding = encoding_of(config.sample_format())?;
    let bits = (encoding.bytes() * 8) as u16;
    let channels = config.channels();
    let rate = config.sample_rate().0;

    Some(if encoding.is_float() {
        FormatDescriptor::extensible(SubFormat::IeeeFloat, channels, rate, bits)
    } else {
        FormatDescriptor::pcm(channels, rate, bits)
    })
}

fn build_stream(
    device: &Device,
    format: &OutputFormat,
    consumer: HeapCons<u8>,
) -> Result<Stream, RenderError> {
    let config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    match format.encoding {
        SampleEncoding::Int8 => build_typed_stream(device, &config, consumer, decode_i8),
        SampleEncoding::Int16 => build_typed_stream(device, &config, consumer, decode_i16),
        SampleEncoding::Int32 => build_typed_stream(device, &config, consumer, decode_i32),
        SampleEncoding::Float32 => build_typed_stream(device, &config, consumer, decode_f32),
    }
}

fn decode_i8(b: &[u8]) -> i8 {
    i8::from_le_bytes([b[0]])
}

fn decode_i16(b: &[u8]) -> i16 {
    i16::from_le_bytes([b[0], b[1]])
}

fn decode_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn decode_f32(b: &[u8]) -> f32 {
    f32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn build_typed_stream<T: SizedSample + Send + 'static>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: HeapCons<u8>,
    decode: fn(&[u8]) -> T,
) -> Result<Stream, RenderError> {
    // Allocated once; larger callbacks are served in scratch-sized chunks.
    let mut scratch = vec![0u8; CALLBACK_SCRATCH_BYTES];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                fill_output(&mut consumer, &mut scratch, data, decode);
            },
            |err| tracing::error!("Output stream error: {err}"),
            None,
        )
        .map_err(|e| RenderError::backend(e.to_string()))
}

/// Fills `data` from the byte ring and pads whatever is left with silence.
///
/// Returns the number of samples taken from the ring.
fn fill_output<T: SizedSample>(
    consumer: &mut impl Consumer<Item = u8>,
    scratch: &mut [u8],
    data: &mut [T],
    decode: fn(&[u8]) -> T,
) -> usize {
    let width = std::mem::size_of::<T>();
    let chunk = (scratch.len() / width).max(1);
    let mut filled = 0;

    for out in data.chunks_mut(chunk) {
        let bytes = &mut scratch[..out.len() * width];
        let popped = consumer.pop_slice(bytes) / width;

        for (sample, raw) in out.iter_mut().zip(bytes.chunks_exact(width)).take(popped) {
            *sample = decode(raw);
        }
        // Underrun: pad with silence rather than replaying stale data.
        for sample in &mut out[popped..] {
            *sample = T::EQUILIBRIUM;
        }
        filled += popped;
    }

    filled
}

/// Whole frames waiting in the ring.
fn queued_frames(ring: &impl Observer, block_align: usize) -> usize {
    ring.occupied_len() / block_align
}

/// Queues `frames` whole frames from `bytes`, failing if the ring overruns.
fn queue_frames(
    producer: &mut impl Producer<Item = u8>,
    bytes: &[u8],
    frames: usize,
    block_align: usize,
) -> Result<(), RenderError> {
    let len = frames * block_align;
    let region = bytes.get(..len).ok_or_else(|| {
        RenderError::backend(format!("{} bytes given for {frames} frames", bytes.len()))
    })?;
    let pushed = producer.push_slice(region);
    if pushed < len {
        return Err(RenderError::backend(format!(
            "render buffer overrun: {pushed} of {len} bytes queued"
        )));
    }
    Ok(())
}
