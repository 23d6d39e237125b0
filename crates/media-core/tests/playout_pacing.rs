//! Cadence and drain behavior of the playout clock against a recording
//! RTP writer. These run the real send thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ridebridge_media_core::{
    G711Codec, PlayoutClock, PlayoutConfig, PlayoutObserver, RtpWriter, FRAME_BYTES,
    TIMESTAMP_STEP,
};

#[derive(Default)]
struct RecordingWriter {
    frames: Mutex<Vec<(Instant, u32, usize, u8)>>,
}

impl RtpWriter for RecordingWriter {
    fn send_frame(&self, timestamp: u32, payload: &[u8], payload_type: u8) {
        self.frames
            .lock()
            .push((Instant::now(), timestamp, payload.len(), payload_type));
    }
}

#[derive(Default)]
struct CountingObserver {
    drained: AtomicUsize,
    emptied: AtomicUsize,
}

impl PlayoutObserver for CountingObserver {
    fn on_drained(&self) {
        self.drained.fetch_add(1, Ordering::SeqCst);
    }
    fn on_queue_empty(&self) {
        self.emptied.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn cadence_is_fifty_frames_per_second() {
    let clock = PlayoutClock::new(PlayoutConfig::default());
    let writer = Arc::new(RecordingWriter::default());
    clock.start(writer.clone()).unwrap();

    std::thread::sleep(Duration::from_millis(1000));
    clock.stop();

    let frames = writer.frames.lock();
    // 50/s nominal; leave slack for scheduler noise on loaded machines
    assert!(
        (40..=60).contains(&frames.len()),
        "expected ~50 frames in 1s, got {}",
        frames.len()
    );

    for (_, _, len, payload_type) in frames.iter() {
        assert_eq!(*len, FRAME_BYTES);
        assert_eq!(*payload_type, G711Codec::Pcma.payload_type());
    }

    // Timestamps strictly monotonic with step 160
    for pair in frames.windows(2) {
        assert_eq!(pair[1].1, pair[0].1.wrapping_add(TIMESTAMP_STEP));
    }
}

#[test]
fn silence_fills_an_empty_queue_and_real_audio_takes_over() {
    let clock = PlayoutClock::new(PlayoutConfig::default());
    let writer = Arc::new(RecordingWriter::default());
    clock.start(writer.clone()).unwrap();

    // Let a few silence frames go out, then supply real audio
    std::thread::sleep(Duration::from_millis(100));
    clock.buffer(&vec![0x42u8; FRAME_BYTES * 5]);
    std::thread::sleep(Duration::from_millis(300));
    clock.stop();

    let stats = clock.stats();
    assert!(stats.silence_sent > 0, "expected silence filler frames");
    assert_eq!(stats.frames_sent, 5, "all real frames should have played");
}

#[test]
fn drain_fires_exactly_once_per_arm() {
    let clock = PlayoutClock::new(PlayoutConfig::default());
    let observer = Arc::new(CountingObserver::default());
    clock.set_observer(observer.clone());

    clock.buffer(&vec![0u8; FRAME_BYTES * 3]);
    clock.arm_drain();

    let writer = Arc::new(RecordingWriter::default());
    clock.start(writer).unwrap();
    std::thread::sleep(Duration::from_millis(400));
    clock.stop();

    assert_eq!(observer.drained.load(Ordering::SeqCst), 1);
    assert_eq!(observer.emptied.load(Ordering::SeqCst), 1);
}

#[test]
fn drain_does_not_fire_after_clear() {
    let clock = PlayoutClock::new(PlayoutConfig::default());
    let observer = Arc::new(CountingObserver::default());
    clock.set_observer(observer.clone());

    clock.buffer(&vec![0u8; FRAME_BYTES * 10]);
    clock.arm_drain();
    clock.clear();

    let writer = Arc::new(RecordingWriter::default());
    clock.start(writer).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    clock.stop();

    assert_eq!(observer.drained.load(Ordering::SeqCst), 0);
}

#[test]
fn arming_with_an_empty_queue_waits_for_a_real_transition() {
    let clock = PlayoutClock::new(PlayoutConfig::default());
    let observer = Arc::new(CountingObserver::default());
    clock.set_observer(observer.clone());

    // Queue is already empty; no transition can happen
    clock.arm_drain();
    let writer = Arc::new(RecordingWriter::default());
    clock.start(writer).unwrap();
    std::thread::sleep(Duration::from_millis(150));

    assert_eq!(observer.drained.load(Ordering::SeqCst), 0);

    // Audio arrives and plays out: now the transition fires the drain
    clock.buffer(&vec![0u8; FRAME_BYTES]);
    std::thread::sleep(Duration::from_millis(150));
    clock.stop();

    assert_eq!(observer.drained.load(Ordering::SeqCst), 1);
}
