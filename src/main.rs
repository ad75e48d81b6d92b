//! Demo pipeline: two test-pattern sources multiplexed into one sink

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use flume::bounded;
use tracing::{error, info};

use framepipe::utils::spawn_named;
use framepipe::{
    stats, Config, FrameSnapshot, ImageMultiplexer, PipelineError, StreamReader,
    TestPatternProducer,
};

const DEMO_FRAMES: usize = 120;

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    framepipe::logging::init_with_filter("framepipe=debug");

    info!("framepipe demo launching...");

    // Load configuration
    let config = Config::default();
    framepipe::CONFIG.store(Arc::new(config.clone()));

    let format = config.source.image_format();
    let interval = config.source.frame_interval();
    let buffer_config = config.pipeline.buffer_config();

    // Two independent sources
    let cam0 = Arc::new(TestPatternProducer::new(format, 1, buffer_config, "cam0"));
    let cam1 = Arc::new(TestPatternProducer::new(format, 1, buffer_config, "cam1"));

    let mut mux = ImageMultiplexer::new(format, config.pipeline.multiplexer_config());
    mux.add_upstream(cam0.as_ref(), 0, "cam0")?;
    mux.add_upstream(cam1.as_ref(), 0, "cam1")?;

    // Producer threads, one per source
    let mut producers = Vec::new();
    for cam in [&cam0, &cam1] {
        let cam = Arc::clone(cam);
        let name = cam.name().to_string();
        producers.push(spawn_named(&name, None, move || loop {
            match cam.trigger() {
                Ok(()) => std::thread::sleep(interval),
                Err(PipelineError::Stopped) => break,
                Err(PipelineError::BufferFull) => continue,
                Err(e) => {
                    error!(%e, "producer failed");
                    break;
                }
            }
        })?);
    }

    mux.start()?;

    // Sink consumer thread, forwarding snapshots to the main thread
    let mut sink = StreamReader::attach(&mux, 0);
    let (tx, rx) = bounded::<FrameSnapshot>(config.pipeline.buffer_slots);
    let sink_stop = Arc::new(AtomicBool::new(false));
    let sink_stop_flag = Arc::clone(&sink_stop);
    let sink_handle = spawn_named("sink", None, move || {
        while !sink_stop_flag.load(Ordering::Acquire) {
            if !sink.wait(Duration::from_millis(50)) {
                continue;
            }
            while let Ok(frame) = sink.fetch() {
                let snapshot = frame.snapshot();
                drop(frame);
                if tx.send(snapshot).is_err() {
                    return;
                }
            }
        }
    })?;

    for n in 1..=DEMO_FRAMES {
        let snapshot = rx.recv_timeout(Duration::from_secs(5))?;
        if n % 30 == 0 {
            let source = snapshot
                .metadata
                .as_ref()
                .and_then(|m| m.source.as_deref())
                .unwrap_or("?");
            info!(frames = n, source, "pipeline running");
        }
    }

    // Orderly shutdown: sources first, then the multiplexer, then the sink
    cam0.stop();
    cam1.stop();
    for handle in producers {
        let _ = handle.join();
    }
    mux.stop();
    sink_stop.store(true, Ordering::Release);
    drop(rx);
    let _ = sink_handle.join();

    for (name, value) in stats::stats().sample() {
        info!(%name, value, "counter");
    }
    info!("framepipe demo shutting down");
    Ok(())
}
