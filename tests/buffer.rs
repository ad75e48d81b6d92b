//! Cursor-protocol properties of the shared frame buffer

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use framepipe::image::{ImageFormat, ImageMetadata, PixelFormat};
use framepipe::pipeline::{BufferConfig, OverflowPolicy, SharedImageBuffer, TestPatternProducer};
use framepipe::{PipelineError, StreamReader};

fn format() -> ImageFormat {
    ImageFormat::new(16, 16, PixelFormat::Gray8)
}

fn buffer(capacity: usize, policy: OverflowPolicy) -> SharedImageBuffer {
    SharedImageBuffer::new(format(), BufferConfig { capacity, policy })
}

fn write_seq(buf: &SharedImageBuffer, seq: u64) -> Result<(), PipelineError> {
    let mut slot = buf.reserve_write()?;
    slot.data_mut().fill(seq as u8);
    slot.set_metadata(ImageMetadata::new(seq));
    Ok(())
}

fn read_seq(buf: &SharedImageBuffer, id: framepipe::ConsumerId) -> Option<u64> {
    let guard = buf.reserve_read(id).ok()?;
    guard.metadata().map(|m| m.sequence)
}

#[test]
fn single_consumer_observes_writes_in_order() {
    let buf = buffer(8, OverflowPolicy::Block);
    let id = buf.register_consumer();
    for seq in 0..6 {
        write_seq(&buf, seq).expect("write");
    }
    let observed: Vec<u64> = std::iter::from_fn(|| read_seq(&buf, id)).collect();
    assert_eq!(observed, (0..6).collect::<Vec<_>>());
    assert_eq!(
        buf.reserve_read(id).err(),
        Some(PipelineError::NoNewFrame)
    );
}

#[test]
fn strict_write_blocks_until_a_consumer_advances() {
    // capacity=4, no consumer: F1..F4 fill the ring, the 5th write blocks
    let buf = Arc::new(buffer(4, OverflowPolicy::Block));
    for seq in 0..4 {
        write_seq(&buf, seq).expect("write");
    }

    let writer_buf = Arc::clone(&buf);
    let (done_tx, done_rx) = mpsc::channel();
    let writer = thread::spawn(move || {
        write_seq(&writer_buf, 4).expect("unblocked write");
        done_tx.send(()).ok();
    });

    assert!(
        done_rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "5th write must block while F1..F4 are unconsumed"
    );

    // a late consumer starts at the oldest retained frame; reading F1
    // unblocks the producer
    let id = buf.register_consumer();
    assert_eq!(read_seq(&buf, id), Some(0));
    done_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("write must complete once a slot is released");
    writer.join().expect("writer thread");
}

#[test]
fn stop_wakes_a_blocked_writer() {
    let buf = Arc::new(buffer(2, OverflowPolicy::Block));
    let _id = buf.register_consumer();
    write_seq(&buf, 0).expect("write");
    write_seq(&buf, 1).expect("write");

    let writer_buf = Arc::clone(&buf);
    let (tx, rx) = mpsc::channel();
    let writer = thread::spawn(move || {
        tx.send(write_seq(&writer_buf, 2)).ok();
    });

    thread::sleep(Duration::from_millis(50));
    buf.stop();
    let result = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("stop must wake the writer");
    assert_eq!(result, Err(PipelineError::Stopped));
    writer.join().expect("writer thread");
}

#[test]
fn lossy_observed_plus_dropped_equals_writes() {
    const TOTAL: u64 = 50;
    let buf = Arc::new(buffer(4, OverflowPolicy::DropOldest));
    let id = buf.register_consumer();

    let writer_buf = Arc::clone(&buf);
    let writer = thread::spawn(move || {
        for seq in 0..TOTAL {
            // lossy writes never block; BufferFull means the incoming
            // frame was dropped and counted
            let _ = write_seq(&writer_buf, seq);
        }
    });

    let mut observed = Vec::new();
    loop {
        match read_seq(&buf, id) {
            Some(seq) => observed.push(seq),
            None => {
                if writer.is_finished() && buf.available(id) == 0 {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
    writer.join().expect("writer thread");

    // never reordered, never duplicated
    for pair in observed.windows(2) {
        assert!(pair[0] < pair[1], "sequence regressed: {:?}", pair);
    }
    assert_eq!(observed.len() as u64 + buf.dropped(id), TOTAL);
}

#[test]
fn lossy_accounting_holds_while_the_oldest_frame_is_pinned() {
    let buf = buffer(2, OverflowPolicy::DropOldest);
    let id = buf.register_consumer();
    write_seq(&buf, 0).expect("write");
    write_seq(&buf, 1).expect("write");

    // pin the oldest frame mid-read; the ring cannot reclaim it, so the
    // incoming write is the frame that gets lost
    let pinned = buf.reserve_read(id).expect("frame 0");
    assert_eq!(pinned.metadata().map(|m| m.sequence), Some(0));
    assert_eq!(
        write_seq(&buf, 2),
        Err(PipelineError::BufferFull),
        "pinned oldest slot must drop the incoming frame"
    );
    drop(pinned);

    let mut observed = vec![0];
    while let Some(seq) = read_seq(&buf, id) {
        observed.push(seq);
    }
    assert_eq!(observed, vec![0, 1]);
    assert_eq!(observed.len() as u64 + buf.dropped(id), 3);
}

#[test]
fn two_consumers_at_different_rates_each_observe_every_frame() {
    const TOTAL: u64 = 100;
    let buf = Arc::new(buffer(3, OverflowPolicy::Block));
    let fast = buf.register_consumer();
    let slow = buf.register_consumer();

    let writer_buf = Arc::clone(&buf);
    let writer = thread::spawn(move || {
        for seq in 0..TOTAL {
            write_seq(&writer_buf, seq).expect("strict write");
        }
    });

    let spawn_reader = |id: framepipe::ConsumerId, lag: Duration| {
        let buf = Arc::clone(&buf);
        thread::spawn(move || {
            let mut observed = Vec::new();
            while (observed.len() as u64) < TOTAL {
                match read_seq(&buf, id) {
                    Some(seq) => {
                        observed.push(seq);
                        if !lag.is_zero() && observed.len() % 10 == 0 {
                            thread::sleep(lag);
                        }
                    }
                    None => {
                        buf.wait_for_frame(id, Duration::from_millis(20));
                    }
                }
            }
            observed
        })
    };

    let fast_reader = spawn_reader(fast, Duration::ZERO);
    let slow_reader = spawn_reader(slow, Duration::from_millis(2));

    let expected: Vec<u64> = (0..TOTAL).collect();
    assert_eq!(fast_reader.join().expect("fast reader"), expected);
    assert_eq!(slow_reader.join().expect("slow reader"), expected);
    writer.join().expect("writer thread");
}

#[test]
fn unregistering_the_laggard_releases_the_writer() {
    let buf = buffer(2, OverflowPolicy::Block);
    let laggard = buf.register_consumer();
    let active = buf.register_consumer();
    write_seq(&buf, 0).expect("write");
    write_seq(&buf, 1).expect("write");
    assert_eq!(read_seq(&buf, active), Some(0));
    assert_eq!(read_seq(&buf, active), Some(1));

    assert!(buf.try_reserve_write().is_err());
    buf.unregister_consumer(laggard);
    assert!(buf.try_reserve_write().is_ok());
}

#[test]
fn reader_rejects_a_mismatched_stream_up_front() {
    let producer = TestPatternProducer::new(format(), 1, BufferConfig::default(), "src");
    let other = ImageFormat::new(16, 16, PixelFormat::Rgb8);
    let err = StreamReader::attach_expecting(&producer, 0, other)
        .err()
        .expect("attach must fail");
    assert!(matches!(err, PipelineError::FormatMismatch { .. }));
}
