//! Mock bridge example.
//!
//! Streams a scripted 440Hz tone from a mock accessory through the bridge.
//! By default the audio lands in memory; pass `--play` to hear it on the
//! default output device.
//!
//! Run with: cargo run --example mock_bridge [-- --play]

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use accessory_audio::sink::{CpalRenderSink, MemorySink};
use accessory_audio::source::MockPipe;
use accessory_audio::{AudioBridge, BridgeEvent, RenderSink};
use tracing_subscriber::EnvFilter;

/// One service interval of accessory audio.
const FRAMES_PER_PACKET: usize = 44;
const TONE_HZ: f32 = 440.0;
const SECONDS: usize = 3;

fn tone_pipe() -> MockPipe {
    let mut pipe = MockPipe::new().with_pacing(Duration::from_millis(1));
    let packets = SECONDS * 1000;
    let mut phase = 0.0f32;
    let step = TAU * TONE_HZ / 44_100.0;

    for packet in 0..packets {
        if packet == packets / 2 {
            // Simulate a hiccup on the bus halfway through.
            pipe.push_discontinuity();
        }
        let frames: Vec<(i16, i16)> = (0..FRAMES_PER_PACKET)
            .map(|_| {
                let sample = (phase.sin() * 0.25 * f32::from(i16::MAX)) as i16;
                phase = (phase + step) % TAU;
                (sample, sample)
            })
            .collect();
        pipe.push_frames(&frames);
    }

    pipe
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("accessory_audio=info".parse()?),
        )
        .init();

    let sink: Arc<dyn RenderSink> = if std::env::args().any(|arg| arg == "--play") {
        Arc::new(CpalRenderSink::open_default()?)
    } else {
        Arc::new(MemorySink::new().with_recording_limit(1 << 20))
    };
    println!("Bridging a {SECONDS}s tone into '{}'", sink.name());

    let bridge = AudioBridge::builder()
        .on_event(|event| match event {
            BridgeEvent::Discontinuity { slot } => println!("Discontinuity at slot {slot}"),
            BridgeEvent::SessionStopped { error } => println!("Stopped: {error:?}"),
            _ => {}
        })
        .build(sink);

    bridge.start(tone_pipe())?;
    println!("Negotiated {:?}", bridge.output_format());

    // The script ends with a disconnect, which finishes the session.
    match bridge.wait().await {
        Ok(stats) => println!("Stats: {stats:?}"),
        Err(e) => println!("Session ended: {e}"),
    }
    println!("Stats: {:?}", bridge.stats());

    Ok(())
}
