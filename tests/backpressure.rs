use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use geostream::buffer::{BackendKind, HostStorage, RingConfig};
use geostream::fence::{SubPassState, Timeline};
use geostream::{BufferSpec, FenceContext, LockMode, RingAllocator};

const CONSUMER_DELAY: Duration = Duration::from_millis(40);

fn ring(fences: &FenceContext) -> RingAllocator {
    let spec = BufferSpec::vertices(1, 64)
        .backend(BackendKind::SelfManaged)
        .ring(
            RingConfig::default()
                .alignment(1)
                .stall_threshold(Duration::from_millis(1)),
        )
        .debug_name("backpressure");
    RingAllocator::new(&spec, Box::new(HostStorage::default()), fences)
}

fn fill(ring: &mut RingAllocator, n: usize) -> usize {
    let offset = ring.lock(n, LockMode::Append).unwrap().byte_offset;
    ring.locked_bytes_mut().unwrap().fill(0xAB);
    ring.unlock(n);
    ring.mark_used_in_rendering();
    offset
}

#[test]
fn wrap_waits_for_the_consumer_signal() {
    let timeline = Arc::new(Timeline::new());
    let fences = FenceContext::without_sub_passes(timeline.clone());
    let mut ring = ring(&fences);

    assert_eq!(fill(&mut ring, 40), 0);
    let fence = timeline.submit();

    let started = Instant::now();
    let consumer = {
        let timeline = timeline.clone();
        thread::spawn(move || {
            thread::sleep(CONSUMER_DELAY);
            timeline.signal(fence);
        })
    };

    assert_eq!(fill(&mut ring, 40), 0);
    let waited = started.elapsed();
    consumer.join().unwrap();

    assert!(waited >= CONSUMER_DELAY / 2, "returned after {:?}", waited);
    let stats = ring.stats();
    assert_eq!(stats.discards, 1);
    assert_eq!(stats.stalls, 1);
    assert!(stats.stall_time > Duration::ZERO);
}

#[test]
fn satisfied_fences_never_block() {
    let timeline = Arc::new(Timeline::new());
    let fences = FenceContext::without_sub_passes(timeline.clone());
    let mut ring = ring(&fences);

    for _ in 0..8 {
        fill(&mut ring, 40);
        let fence = timeline.submit();
        timeline.signal(fence);
    }

    let stats = ring.stats();
    assert_eq!(stats.stalls, 0);
    assert_eq!(stats.early_sub_pass_ends, 0);
}

#[test]
fn early_end_submits_before_waiting() {
    let timeline = Arc::new(Timeline::new());
    let (submitted_tx, submitted_rx) = std::sync::mpsc::channel();
    let sub_pass = {
        let timeline = timeline.clone();
        Arc::new(SubPassState::new().with_early_end_hook(move |_| {
            let _ = submitted_tx.send(timeline.submit());
        }))
    };
    let fences = FenceContext::new(timeline.clone(), sub_pass.clone());
    let mut ring = ring(&fences);

    let consumer = {
        let timeline = timeline.clone();
        thread::spawn(move || {
            for fence in submitted_rx {
                thread::sleep(Duration::from_millis(5));
                timeline.signal(fence);
            }
        })
    };

    // Both halves of the sub-pass are recorded under one fence, so the second
    // lock can only make progress if the sub-pass is cut short and submitted.
    sub_pass.begin();
    fill(&mut ring, 40);
    fill(&mut ring, 40);
    sub_pass.end();

    assert_eq!(sub_pass.early_ends(), 1);
    assert_eq!(ring.stats().early_sub_pass_ends, 1);
    assert!(timeline.completed() >= timeline.last_submitted());

    drop(fences);
    drop(ring);
    drop(sub_pass);
    consumer.join().unwrap();
}
