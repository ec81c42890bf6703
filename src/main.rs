use anyhow::Context;
use capture_edge_rs::capture::{is_loopback_label, CapturePlatform, PlatformCapture};
use capture_edge_rs::config::CaptureConfig;
use capture_edge_rs::lifecycle::LifecycleController;
use clap::Parser;
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "capture-edge",
    about = "Microphone and system-audio capture front-end for the speech pipeline"
)]
struct Cli {
    /// List input devices with their loopback verdicts and exit
    #[arg(long)]
    list_devices: bool,

    /// Stop after this many seconds (default: run until Ctrl-C)
    #[arg(long)]
    duration: Option<u64>,

    /// Disable echo cancellation
    #[arg(long)]
    no_aec: bool,

    /// Disable voice-activity gating
    #[arg(long)]
    no_vad: bool,

    #[arg(long)]
    sample_rate: Option<u32>,

    #[arg(long)]
    chunk_ms: Option<u32>,

    /// Write cleaned microphone audio to a WAV file
    #[arg(long)]
    debug_wav: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let platform = Arc::new(PlatformCapture::new());

    if cli.list_devices {
        let devices = platform
            .input_devices()
            .context("enumerating input devices")?;
        if devices.is_empty() {
            println!("no input devices found");
            return Ok(());
        }
        for device in devices {
            let verdict = if is_loopback_label(&device.label) {
                "loopback (rejected)"
            } else {
                "ok"
            };
            println!("{:50} {}", device.label, verdict);
        }
        return Ok(());
    }

    let mut config = CaptureConfig::from_env().context("loading configuration")?;
    if cli.no_aec {
        config.aec_enabled = false;
    }
    if cli.no_vad {
        config.vad_enabled = false;
    }
    if let Some(rate) = cli.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(chunk_ms) = cli.chunk_ms {
        config.chunk_duration_ms = chunk_ms;
    }
    if cli.debug_wav.is_some() {
        config.debug_wav_path = cli.debug_wav.clone();
    }

    let queue_capacity = config.frame_queue_capacity;
    let (controller, mut frames) =
        LifecycleController::with_channel(platform.clone(), queue_capacity);
    let controller = Arc::new(controller);

    controller.start_capture(config).await?;
    let health = controller.health().await;
    log::info!(
        "capture health: mic={}, system_audio={}, aec={}",
        health.mic_active,
        health.system_audio_active,
        health.aec_active
    );

    let emitted = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let emitted_counter = Arc::clone(&emitted);
    let consumer = tokio::spawn(async move {
        while let Some(frame) = frames.next().await {
            let count = emitted_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            if count % 200 == 0 {
                log::debug!("{} frames emitted (last: {:?})", count, frame.channel);
            }
        }
    });

    match cli.duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            println!("capturing; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
        }
    }

    let stats = controller.get_performance_stats().await;
    controller.stop_capture().await;
    consumer.abort();

    println!(
        "{} chunks analyzed, {} voiced, {:.1}% traffic reduction, {} frames emitted",
        stats.total_chunks,
        stats.voice_chunks,
        stats.traffic_reduction_percent,
        emitted.load(std::sync::atomic::Ordering::Relaxed)
    );
    Ok(())
}
