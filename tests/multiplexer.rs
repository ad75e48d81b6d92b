//! Fan-in behavior: fairness, stall tolerance, source relabeling

use std::collections::HashMap;
use std::time::{Duration, Instant};

use framepipe::image::{ImageFormat, PixelFormat};
use framepipe::pipeline::{BufferConfig, MultiplexerConfig, OverflowPolicy};
use framepipe::{ImageMultiplexer, Producer, StreamReader, TestPatternProducer};

fn format() -> ImageFormat {
    ImageFormat::new(8, 8, PixelFormat::Gray8)
}

fn mux_config(stall_ms: u64) -> MultiplexerConfig {
    MultiplexerConfig {
        buffer: BufferConfig {
            capacity: 16,
            policy: OverflowPolicy::Block,
        },
        stall_timeout: Duration::from_millis(stall_ms),
        idle_wait: Duration::from_millis(1),
    }
}

fn pattern(name: &str) -> TestPatternProducer {
    TestPatternProducer::new(
        format(),
        1,
        BufferConfig {
            capacity: 16,
            policy: OverflowPolicy::Block,
        },
        name,
    )
}

/// Drain up to `want` frames from the sink, keyed by source tag.
fn collect(
    sink: &mut StreamReader,
    want: usize,
    deadline: Duration,
) -> HashMap<String, Vec<u64>> {
    let start = Instant::now();
    let mut by_source: HashMap<String, Vec<u64>> = HashMap::new();
    let mut total = 0;
    while total < want && start.elapsed() < deadline {
        if !sink.wait(Duration::from_millis(20)) {
            continue;
        }
        while let Ok(frame) = sink.fetch() {
            let meta = frame.metadata().expect("forwarded frames carry metadata");
            by_source
                .entry(meta.source.clone().expect("source tag"))
                .or_default()
                .push(meta.sequence);
            total += 1;
            if total == want {
                break;
            }
        }
    }
    by_source
}

#[test]
fn forwards_frames_tagged_with_their_source() {
    let cam = pattern("camA");
    let mut mux = ImageMultiplexer::new(format(), mux_config(500));
    mux.add_upstream(&cam, 0, "camA").expect("same format");
    let mut sink = StreamReader::attach(&mux, 0);
    mux.start().expect("worker start");

    for _ in 0..3 {
        cam.trigger().expect("trigger");
    }
    let frames = collect(&mut sink, 3, Duration::from_secs(2));
    assert_eq!(frames.len(), 1, "exactly one source expected: {frames:?}");
    assert_eq!(frames["camA"], vec![0, 1, 2]);
    mux.stop();
}

#[test]
fn silent_upstream_does_not_block_the_others() {
    let cam0 = pattern("cam0");
    let cam1 = pattern("cam1");
    let silent = pattern("silent");

    let mut mux = ImageMultiplexer::new(format(), mux_config(50));
    mux.add_upstream(&cam0, 0, "cam0").expect("same format");
    mux.add_upstream(&cam1, 0, "cam1").expect("same format");
    mux.add_upstream(&silent, 0, "silent").expect("same format");
    let mut sink = StreamReader::attach(&mux, 0);
    mux.start().expect("worker start");

    for _ in 0..5 {
        cam0.trigger().expect("trigger");
        cam1.trigger().expect("trigger");
    }

    // bounded by the stall timeout, not by the silent source
    let frames = collect(&mut sink, 10, Duration::from_secs(3));
    assert_eq!(
        frames.get("cam0").map(Vec::len),
        Some(5),
        "all of cam0 forwarded: {frames:?}"
    );
    assert_eq!(frames.get("cam1").map(Vec::len), Some(5));
    assert!(!frames.contains_key("silent"));

    // each source's frames keep their upstream order
    for sequences in frames.values() {
        for pair in sequences.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    // give the worker time to notice and report the stall
    std::thread::sleep(Duration::from_millis(150));
    assert!(
        framepipe::stats::stats().get(framepipe::stats::MULTIPLEXER_STALLS) >= 1,
        "the silent upstream must be reported as stalled"
    );
    mux.stop();
}

#[test]
fn upstreams_can_join_a_running_multiplexer() {
    let early = pattern("early");
    let late = pattern("late");
    let mut mux = ImageMultiplexer::new(format(), mux_config(500));
    mux.add_upstream(&early, 0, "early").expect("same format");
    let mut sink = StreamReader::attach(&mux, 0);
    mux.start().expect("worker start");

    early.trigger().expect("trigger");
    let first = collect(&mut sink, 1, Duration::from_secs(2));
    assert_eq!(first.get("early").map(Vec::len), Some(1));

    // a source registered after start joins the worker's rotation
    mux.add_upstream(&late, 0, "late")
        .expect("registration while running");
    late.trigger().expect("trigger");
    late.trigger().expect("trigger");
    let second = collect(&mut sink, 2, Duration::from_secs(2));
    assert_eq!(
        second.get("late").map(Vec::len),
        Some(2),
        "late upstream must be polled: {second:?}"
    );
    mux.stop();
}

#[test]
fn upstream_resumes_after_a_stall() {
    let cam = pattern("cam");
    let mut mux = ImageMultiplexer::new(format(), mux_config(30));
    mux.add_upstream(&cam, 0, "cam").expect("same format");
    let mut sink = StreamReader::attach(&mux, 0);
    mux.start().expect("worker start");

    cam.trigger().expect("trigger");
    let first = collect(&mut sink, 1, Duration::from_secs(2));
    assert_eq!(first.get("cam").map(Vec::len), Some(1));

    // outlast the stall timeout, then resume
    std::thread::sleep(Duration::from_millis(100));
    cam.trigger().expect("trigger");
    let second = collect(&mut sink, 1, Duration::from_secs(2));
    assert_eq!(
        second.get("cam").map(Vec::len),
        Some(1),
        "a stalled source is skipped, not dropped"
    );
    mux.stop();
}

#[test]
fn stop_joins_the_worker_and_stops_downstream() {
    let cam = pattern("cam");
    let mut mux = ImageMultiplexer::new(format(), mux_config(500));
    mux.add_upstream(&cam, 0, "cam").expect("same format");
    mux.start().expect("worker start");
    cam.trigger().expect("trigger");
    mux.stop();

    // stopping is idempotent and leaves the downstream buffer stopped
    mux.stop();
    assert!(mux.buffer(0).is_stopped());
}
