//! Bridge lifecycle management.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::format::{negotiate, OutputFormat, SamplingPlan, ACCESSORY_FORMAT};
use crate::pipeline::{slot_count, RenderFeeder, TransferRing, TransferScheduler};
use crate::sink::RenderSink;
use crate::source::IsochronousPipe;
use crate::{BridgeConfig, BridgeError, BridgeEvent, EventCallback};

/// Statistics about a bridge session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Transfers drained and resubmitted.
    pub transfers_completed: u64,
    /// Non-empty packets handed to the render sink.
    pub packets_rendered: u64,
    /// Packets that arrived with no data.
    pub empty_packets: u64,
    /// Discontinuities reported by the pipe.
    pub discontinuities: u64,
    /// Output frames committed to the render sink.
    pub frames_written: u64,
    /// Output frames lost to a full render buffer.
    pub frames_dropped: u64,
}

/// Internal state shared between `AudioBridge` and the worker task.
pub(crate) struct SessionState {
    pub running: AtomicBool,
    pub transfers_completed: AtomicU64,
    pub packets_rendered: AtomicU64,
    pub empty_packets: AtomicU64,
    pub discontinuities: AtomicU64,
    pub frames_written: AtomicU64,
    pub frames_dropped: AtomicU64,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            transfers_completed: AtomicU64::new(0),
            packets_rendered: AtomicU64::new(0),
            empty_packets: AtomicU64::new(0),
            discontinuities: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            transfers_completed: self.transfers_completed.load(Ordering::SeqCst),
            packets_rendered: self.packets_rendered.load(Ordering::SeqCst),
            empty_packets: self.empty_packets.load(Ordering::SeqCst),
            discontinuities: self.discontinuities.load(Ordering::SeqCst),
            frames_written: self.frames_written.load(Ordering::SeqCst),
            frames_dropped: self.frames_dropped.load(Ordering::SeqCst),
        }
    }
}

/// Lifecycle of an [`AudioBridge`].
///
/// ```text
/// Idle → Preparing → Running → Stopping → Stopped
///            ↓                               ↓
///          Idle  (negotiation failed)     Preparing (next start)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No session has run yet, or the last start failed.
    Idle,
    /// Negotiating formats and allocating the session.
    Preparing,
    /// The worker is streaming.
    Running,
    /// Stop was requested; the worker is finishing its current transfer.
    Stopping,
    /// The worker exited.
    Stopped,
}

struct ActiveSession {
    state: Arc<SessionState>,
    format: OutputFormat,
    worker: Option<JoinHandle<Result<SessionStats, BridgeError>>>,
}

/// Bridges accessory audio into a host render sink.
///
/// One bridge runs at most one session at a time. A session starts with
/// [`start()`](AudioBridge::start), streams on a Tokio task until
/// [`stop()`](AudioBridge::stop) or a fatal error, and is joined with
/// [`wait()`](AudioBridge::wait). A stopped bridge can be started again.
///
/// All methods take `&self`, so the bridge can be shared (e.g. in an `Arc`)
/// to stop it from one task while another waits on it.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use accessory_audio::sink::MemorySink;
/// use accessory_audio::source::MockPipe;
/// use accessory_audio::{AudioBridge, BridgeState};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), accessory_audio::BridgeError> {
/// let sink = Arc::new(MemorySink::new());
/// let mut pipe = MockPipe::new();
/// pipe.push_constant(0x1000, -0x1000, 44);
///
/// let bridge = AudioBridge::builder().build(sink.clone());
/// bridge.start(pipe)?;
///
/// // The script runs out and the pipe reports a disconnect.
/// assert!(bridge.wait().await.is_err());
/// assert_eq!(bridge.state(), BridgeState::Stopped);
/// assert_eq!(sink.frames_written(), 44);
/// # Ok(())
/// # }
/// ```
pub struct AudioBridge {
    sink: Arc<dyn RenderSink>,
    config: BridgeConfig,
    event_callback: Option<EventCallback>,
    lifecycle: Arc<Mutex<BridgeState>>,
    session: Mutex<Option<ActiveSession>>,
}

impl AudioBridge {
    pub(crate) fn new(
        sink: Arc<dyn RenderSink>,
        config: BridgeConfig,
        event_callback: Option<EventCallback>,
    ) -> Self {
        Self {
            sink,
            config,
            event_callback,
            lifecycle: Arc::new(Mutex::new(BridgeState::Idle)),
            session: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        *self.lifecycle.lock()
    }

    /// Returns `true` while the worker is streaming and no stop was requested.
    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|session| session.state.running.load(Ordering::SeqCst))
    }

    /// Format negotiated for the current or most recent session.
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.session.lock().as_ref().map(|session| session.format)
    }

    /// Statistics of the current or most recent session.
    pub fn stats(&self) -> SessionStats {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.state.snapshot())
            .unwrap_or_default()
    }

    /// Negotiates formats and starts streaming from `pipe`.
    ///
    /// Returns once the session is set up; audio flows on a Tokio task.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` if a session is preparing, running or stopping
    /// - `InvalidConfig` for an unusable configuration or pipe
    /// - negotiation errors (see [`BridgeError::is_negotiation`]) when the
    ///   host cannot play the accessory's audio
    ///
    /// On any error the bridge is left `Idle`.
    pub fn start<P>(&self, pipe: P) -> Result<(), BridgeError>
    where
        P: IsochronousPipe + 'static,
    {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                BridgeState::Idle | BridgeState::Stopped => *lifecycle = BridgeState::Preparing,
                _ => return Err(BridgeError::AlreadyRunning),
            }
        }

        match self.prepare(Box::new(pipe)) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Bridge failed to start");
                *self.lifecycle.lock() = BridgeState::Idle;
                Err(e)
            }
        }
    }

    fn prepare(&self, pipe: Box<dyn IsochronousPipe>) -> Result<(), BridgeError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::WorkerFailed(e.to_string()))?;
        self.config.validate()?;

        let format = negotiate(self.sink.as_ref(), &ACCESSORY_FORMAT)?;
        self.sink
            .initialize(&format, self.config.render_buffer_duration)
            .map_err(BridgeError::Negotiation)?;

        let plan = SamplingPlan::new(ACCESSORY_FORMAT.sample_rate, format.sample_rate);
        if plan.under_produces() {
            tracing::warn!(
                source_rate = ACCESSORY_FORMAT.sample_rate,
                output_rate = format.sample_rate,
                produced_rate = plan.produced_rate(ACCESSORY_FORMAT.sample_rate),
                "Output rate is above twice the accessory rate; playback will underrun"
            );
        }

        let transfer_size = pipe.max_bytes_per_interval() * self.config.packets_per_transfer;
        let slots = slot_count(
            ACCESSORY_FORMAT.avg_bytes_per_sec(),
            self.config.capture_duration,
            transfer_size,
        )?;

        let state = Arc::new(SessionState::new());
        let feeder = RenderFeeder::new(
            self.sink.clone(),
            format,
            transfer_size,
            state.clone(),
            self.event_callback.clone(),
        )
        .map_err(BridgeError::Negotiation)?;
        let ring = TransferRing::new(slots, transfer_size, self.config.packets_per_transfer);
        let scheduler = TransferScheduler::new(
            pipe,
            ring,
            feeder,
            self.sink.clone(),
            format,
            state.clone(),
            self.event_callback.clone(),
        );

        tracing::info!(
            sink = self.sink.name(),
            format = %format,
            slots,
            transfer_size,
            "Bridge session prepared"
        );

        // Held across the transition: stop() never sees `Running` without this session.
        let mut session = self.session.lock();
        *self.lifecycle.lock() = BridgeState::Running;
        let worker = runtime.spawn(run_worker(
            scheduler,
            state.clone(),
            self.lifecycle.clone(),
            self.event_callback.clone(),
        ));
        *session = Some(ActiveSession {
            state,
            format,
            worker: Some(worker),
        });
        Ok(())
    }

    /// Requests the session to stop.
    ///
    /// Clears the running flag and stops the render sink. The worker exits
    /// after the transfer it is waiting on completes. Calling this without a
    /// running session, or more than once, does nothing.
    pub fn stop(&self) {
        let session = self.session.lock();
        let Some(session) = session.as_ref() else {
            return;
        };
        if !session.state.running.swap(false, Ordering::SeqCst) {
            return;
        }

        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == BridgeState::Running {
                *lifecycle = BridgeState::Stopping;
            }
        }
        if let Err(e) = self.sink.stop() {
            tracing::warn!(sink = self.sink.name(), error = %e, "Failed to stop render sink");
        }
        tracing::info!("Bridge stop requested");
    }

    /// Waits for the worker to exit.
    ///
    /// Returns the final statistics after a clean stop.
    ///
    /// # Errors
    ///
    /// - `NoSession` if no session was started or it was already joined
    /// - the fatal `Transfer` or `Render` error that ended the session
    /// - `WorkerFailed` if the worker task panicked
    pub async fn wait(&self) -> Result<SessionStats, BridgeError> {
        let worker = self
            .session
            .lock()
            .as_mut()
            .and_then(|session| session.worker.take())
            .ok_or(BridgeError::NoSession)?;

        match worker.await {
            Ok(result) => result,
            Err(e) => {
                *self.lifecycle.lock() = BridgeState::Stopped;
                Err(BridgeError::WorkerFailed(e.to_string()))
            }
        }
    }
}

impl Drop for AudioBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_worker(
    scheduler: TransferScheduler,
    state: Arc<SessionState>,
    lifecycle: Arc<Mutex<BridgeState>>,
    event_callback: Option<EventCallback>,
) -> Result<SessionStats, BridgeError> {
    let result = scheduler.run().await;
    let stats = state.snapshot();

    match &result {
        Ok(()) => tracing::info!(
            transfers = stats.transfers_completed,
            frames_written = stats.frames_written,
            frames_dropped = stats.frames_dropped,
            "Bridge stopped"
        ),
        Err(e) => tracing::error!(error = %e, "Bridge session failed"),
    }

    *lifecycle.lock() = BridgeState::Stopped;
    if let Some(callback) = event_callback {
        callback(BridgeEvent::SessionStopped {
            error: result.as_ref().err().map(ToString::to_string),
        });
    }

    result.map(|()| stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::source::{MockCompletion, MockPipe};
    use crate::RenderError;
    use std::time::Duration;

    fn looping_pipe() -> MockPipe {
        MockPipe::new().with_repeat(MockCompletion::Transfer(vec![vec![0; 176]]))
    }

    #[test]
    fn test_session_state_starts_running() {
        let state = SessionState::new();
        assert!(state.running.load(Ordering::SeqCst));
        assert_eq!(state.snapshot(), SessionStats::default());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let bridge = AudioBridge::new(Arc::new(MemorySink::new()), BridgeConfig::default(), None);
        let err = bridge.start(looping_pipe()).unwrap_err();
        assert!(matches!(err, BridgeError::WorkerFailed(_)));
        assert_eq!(bridge.state(), BridgeState::Idle);
    }

    #[tokio::test]
    async fn test_wait_without_session() {
        let bridge = AudioBridge::new(Arc::new(MemorySink::new()), BridgeConfig::default(), None);
        assert!(matches!(bridge.wait().await, Err(BridgeError::NoSession)));
    }

    #[tokio::test]
    async fn test_stop_and_wait() {
        let sink = Arc::new(MemorySink::new());
        let bridge = AudioBridge::new(sink.clone(), BridgeConfig::default(), None);

        bridge.start(looping_pipe()).unwrap();
        assert_eq!(bridge.state(), BridgeState::Running);
        assert!(bridge.is_running());
        tokio::task::yield_now().await;

        bridge.stop();
        bridge.stop();
        assert!(!bridge.is_running());

        let stats = bridge.wait().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert_eq!(stats.frames_dropped, 0);
        assert!(!sink.is_playing());
        assert!(matches!(bridge.wait().await, Err(BridgeError::NoSession)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_as_soon_as_running_reaches_worker() {
        let bridge = Arc::new(AudioBridge::new(
            Arc::new(MemorySink::new()),
            BridgeConfig::default(),
            None,
        ));
        let stopper = {
            let bridge = bridge.clone();
            std::thread::spawn(move || {
                while matches!(bridge.state(), BridgeState::Idle | BridgeState::Preparing) {
                    std::hint::spin_loop();
                }
                bridge.stop();
            })
        };

        bridge.start(looping_pipe()).unwrap();
        stopper.join().unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(5), bridge.wait())
            .await
            .expect("worker ignored the stop")
            .unwrap();
        assert_eq!(stats.frames_dropped, 0);
        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert!(!bridge.is_running());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let sink = Arc::new(MemorySink::new());
        let bridge = AudioBridge::new(sink.clone(), BridgeConfig::default(), None);

        bridge.start(looping_pipe()).unwrap();
        bridge.stop();
        bridge.wait().await.unwrap();

        bridge.start(looping_pipe()).unwrap();
        assert_eq!(bridge.state(), BridgeState::Running);
        bridge.stop();
        bridge.wait().await.unwrap();
        assert_eq!(sink.start_calls(), 2);
    }

    #[tokio::test]
    async fn test_init_failure_returns_to_idle() {
        let sink = Arc::new(MemorySink::new().with_init_error(RenderError::DeviceNotFound));
        let bridge = AudioBridge::new(sink, BridgeConfig::default(), None);

        let err = bridge.start(looping_pipe()).unwrap_err();
        assert!(err.is_negotiation());
        assert_eq!(bridge.state(), BridgeState::Idle);
        assert!(bridge.output_format().is_none());
    }

    #[tokio::test]
    async fn test_zero_interval_pipe_rejected() {
        let bridge = AudioBridge::new(Arc::new(MemorySink::new()), BridgeConfig::default(), None);
        let err = bridge
            .start(MockPipe::with_max_bytes_per_interval(0))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidConfig { .. }));
        assert_eq!(bridge.state(), BridgeState::Idle);
    }
}
