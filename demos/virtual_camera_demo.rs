//! Virtual camera walkthrough
//!
//! One producer and two consumer contexts share an in-memory installation.
//! The producer stores a simulated clip and switches the camera on; the
//! consumers then get the loop instead of the (mock) real camera and follow
//! the producer's seeks.
//!
//! Run with `RUST_LOG=debug` to see the sync traffic.

use anyhow::Context as _;
use futures::StreamExt;
use loopcam::{
    init_logging, CaptureConstraints, LoopCam, LoopCamConfig, MediaUpload, MockPlatformCapture,
    SimulatedMedia,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = LoopCamConfig {
        autosave_interval_ms: 2_000,
        ..Default::default()
    };
    init_logging(&config);

    let loopcam = LoopCam::in_memory(config)
        .await
        .context("failed to create installation")?;

    println!("🎬 Starting producer");
    let producer = loopcam.producer().await?;
    producer.initialize().await?;
    let mut events = producer.events();

    let clip = SimulatedMedia::new(1280, 720, Duration::from_secs(20)).encode();
    let fingerprint = producer
        .upload(MediaUpload::new("video/mp4", clip))
        .await
        .context("upload failed")?;
    println!("   Stored clip {}", fingerprint.short());

    let real = Arc::new(MockPlatformCapture::new());
    let call = loopcam.consumer(real.clone()).await?;
    let recorder = loopcam.consumer(real.clone()).await?;

    println!("📷 Camera off: requests reach the real device");
    let stream = call.get_user_media(CaptureConstraints::audio_video()).await?;
    println!(
        "   {:?} stream with {} tracks (real device calls: {})",
        stream.origin(),
        stream.tracks().len(),
        real.calls()
    );
    stream.stop();

    println!("🔁 Switching the virtual camera on");
    producer.enable().await?;

    let stream = call.get_user_media(CaptureConstraints::audio_video()).await?;
    let second = recorder.get_user_media(CaptureConstraints::video_only()).await?;
    println!(
        "   {:?} stream, {} video / {} audio tracks",
        stream.origin(),
        stream.video_tracks().count(),
        stream.audio_tracks().count()
    );

    let track = stream
        .video_tracks()
        .next()
        .context("synthetic stream has no video track")?;
    let mut frames = Box::pin(track.frames().take(3));
    while let Some(frame) = frames.next().await {
        println!("   frame {}x{} @ {}ms", frame.width, frame.height, frame.timestamp);
    }

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    println!("⏩ Producer seeks to 15s");
    producer.seek(15.0).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!(
        "   producer {:.2}s, call {:.2}s, recorder {:.2}s",
        producer.position(),
        call.coordinator().position(),
        recorder.coordinator().position()
    );

    producer.on_hidden().await?;
    while let Some(event) = events.try_next() {
        println!("   event: {}", event.describe());
    }

    println!("🛑 Stopping");
    stream.stop();
    second.stop();
    producer.disable().await?;
    producer.shutdown().await?;
    call.shutdown();
    recorder.shutdown();

    println!("✅ Done");
    Ok(())
}
