//! Many-to-one stream aggregation
//!
//! The multiplexer is a consumer of N upstream producers and a producer of
//! one downstream stream. Its worker thread pulls frames round-robin so no
//! upstream can monopolize the output, and it never blocks on a silent
//! source: a dry upstream is skipped for that cycle and polled again on the
//! next one. A source silent past the stall timeout is logged as a stall,
//! not treated as fatal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::image::{ImageFormat, ImageMetadata};
use crate::pipeline::buffer::{BufferConfig, SharedImageBuffer};
use crate::pipeline::consumer::StreamReader;
use crate::pipeline::producer::{Producer, ProducerCore};
use crate::stats::{self, stats, StageTimer};
use crate::utils::spawn_named;

/// Constructor-time multiplexer parameters; not runtime-mutable.
#[derive(Debug, Clone, Copy)]
pub struct MultiplexerConfig {
    /// Downstream buffer parameters.
    pub buffer: BufferConfig,
    /// Silence on one upstream before it is reported as stalled.
    pub stall_timeout: Duration,
    /// Bounded park when every upstream is dry.
    pub idle_wait: Duration,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            stall_timeout: Duration::from_millis(500),
            idle_wait: Duration::from_millis(1),
        }
    }
}

struct Upstream {
    reader: StreamReader,
    tag: String,
    last_frame: Instant,
    stalled: bool,
}

/// Aggregates multiple upstream producers into a single downstream stream,
/// relabeling each forwarded frame with its source identity.
pub struct ImageMultiplexer {
    core: Arc<ProducerCore>,
    config: MultiplexerConfig,
    /// Registered before `start`, then moved into the worker.
    upstreams: Vec<Upstream>,
    /// Registrations arriving while the worker runs; drained at the top of
    /// each worker cycle.
    late_tx: Sender<Upstream>,
    late_rx: Option<Receiver<Upstream>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ImageMultiplexer {
    pub fn new(format: ImageFormat, config: MultiplexerConfig) -> Self {
        let (late_tx, late_rx) = flume::unbounded();
        Self {
            core: Arc::new(ProducerCore::new(&[format], config.buffer)),
            config,
            upstreams: Vec::new(),
            late_tx,
            late_rx: Some(late_rx),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Register an upstream stream. The upstream must already carry the
    /// downstream format; the core does no conversion. Sources added while
    /// the worker is running join its rotation on the next cycle.
    pub fn add_upstream(
        &mut self,
        producer: &dyn Producer,
        stream: usize,
        tag: &str,
    ) -> Result<(), PipelineError> {
        if self.stop.load(Ordering::Acquire) {
            return Err(PipelineError::Stopped);
        }
        let reader = StreamReader::attach_expecting(producer, stream, self.core.format(0))?;
        let upstream = Upstream {
            reader,
            tag: tag.to_string(),
            last_frame: Instant::now(),
            stalled: false,
        };
        if self.worker.is_some() {
            self.late_tx
                .send(upstream)
                .map_err(|_| PipelineError::Stopped)?;
        } else {
            self.upstreams.push(upstream);
        }
        info!(tag, "upstream registered");
        Ok(())
    }

    /// Spawn the pull-then-push worker thread.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(late_rx) = self.late_rx.take() else {
            // a stopped multiplexer does not restart
            return Ok(());
        };
        let mut upstreams = std::mem::take(&mut self.upstreams);
        let started = Instant::now();
        for up in &mut upstreams {
            up.last_frame = started;
        }
        let core = Arc::clone(&self.core);
        let stop = Arc::clone(&self.stop);
        let config = self.config;
        self.worker = Some(spawn_named("mux-worker", None, move || {
            worker_loop(&core, upstreams, &late_rx, &stop, config)
        })?);
        Ok(())
    }

    /// Flag-stop the worker, wake anything blocked on the downstream
    /// buffer, and join.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.core.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for ImageMultiplexer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Producer for ImageMultiplexer {
    fn streams(&self) -> usize {
        1
    }

    fn format(&self, stream: usize) -> ImageFormat {
        self.core.format(stream)
    }

    fn buffer(&self, stream: usize) -> &Arc<SharedImageBuffer> {
        self.core.buffer(stream)
    }
}

fn worker_loop(
    core: &ProducerCore,
    mut upstreams: Vec<Upstream>,
    late: &Receiver<Upstream>,
    stop: &AtomicBool,
    config: MultiplexerConfig,
) {
    info!(upstreams = upstreams.len(), "multiplexer worker started");
    let mut timer = StageTimer::new("multiplexer");
    let mut index = 0usize;

    while !stop.load(Ordering::Acquire) {
        for mut up in late.try_iter() {
            up.last_frame = Instant::now();
            upstreams.push(up);
        }
        if upstreams.is_empty() {
            std::thread::sleep(config.idle_wait);
            continue;
        }
        let mut forwarded = false;
        for _ in 0..upstreams.len() {
            let i = index;
            index = (index + 1) % upstreams.len();
            match forward_one(core, &mut upstreams[i], &config, &mut timer) {
                Ok(true) => forwarded = true,
                Ok(false) => {}
                Err(PipelineError::Stopped) => return,
                Err(PipelineError::BufferFull) => {
                    // downstream lossy and pinned; the pulled frame is lost
                    // and already counted as dropped
                }
                Err(e) => {
                    error!(%e, "multiplexer worker terminating");
                    return;
                }
            }
            if stop.load(Ordering::Acquire) {
                return;
            }
        }
        if !forwarded {
            // bounded park on the next source's wakeup condition; a stopped
            // upstream just times out
            upstreams[index].reader.wait(config.idle_wait);
        }
    }
    info!("multiplexer worker stopped");
}

/// Pull at most one frame from `up` and republish it downstream. `Ok(false)`
/// means the source had nothing ready this cycle.
fn forward_one(
    core: &ProducerCore,
    up: &mut Upstream,
    config: &MultiplexerConfig,
    timer: &mut StageTimer,
) -> Result<bool, PipelineError> {
    match up.reader.fetch() {
        Ok(frame) => {
            timer.tick();
            let mut cycle = core.begin_cycle()?;
            if let Err(e) = cycle.image_mut(0).fill_from(&frame) {
                cycle.cancel();
                return Err(e);
            }
            let mut meta = frame
                .metadata()
                .cloned()
                .unwrap_or_else(|| ImageMetadata::new(cycle.sequence()));
            meta.source = Some(up.tag.clone());
            cycle.image_mut(0).set_metadata(meta);
            drop(frame);
            cycle.commit();

            if up.stalled {
                info!(tag = %up.tag, "upstream recovered");
                up.stalled = false;
            }
            up.last_frame = Instant::now();
            stats().increment(stats::MULTIPLEXER_FORWARDED);
            timer.tock();
            Ok(true)
        }
        Err(PipelineError::NoNewFrame) => {
            if !up.stalled && up.last_frame.elapsed() >= config.stall_timeout {
                warn!(
                    tag = %up.tag,
                    silent_ms = up.last_frame.elapsed().as_millis() as u64,
                    "upstream stalled, skipping until it recovers"
                );
                up.stalled = true;
                stats().increment(stats::MULTIPLEXER_STALLS);
            }
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
