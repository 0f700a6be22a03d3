//! S6: a fast producer (~30fps) feeding a bounded oldest-drop frame queue
//! into a slow consumer (~200ms/frame) must never block the producer longer
//! than one frame period, while the consumer still observes a strictly
//! increasing sequence of frames.

use dropcore::supervisor::FrameQueue;
use dropcore::types::Frame;
use std::sync::Arc;
use std::time::Duration;

const FRAME_PERIOD: Duration = Duration::from_millis(33);
const PRODUCER_FRAMES: u64 = 60;

fn test_frame(seq: u64) -> Frame {
    Frame::new(2, 2, vec![0u8; 12], 0, seq)
}

#[tokio::test(start_paused = true)]
async fn test_slow_consumer_never_blocks_fast_producer() {
    let queue = Arc::new(FrameQueue::new(4));
    let observed = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    let producer_queue = queue.clone();
    let producer = tokio::spawn(async move {
        for seq in 0..PRODUCER_FRAMES {
            let start = tokio::time::Instant::now();
            producer_queue.push(test_frame(seq));
            let push_latency = start.elapsed();
            assert!(
                push_latency < FRAME_PERIOD,
                "push() took {push_latency:?}, exceeding one frame period"
            );
            tokio::time::sleep(FRAME_PERIOD).await;
        }
    });

    let consumer_queue = queue.clone();
    let consumer_observed = observed.clone();
    let consumer = tokio::spawn(async move {
        loop {
            let frame = consumer_queue.pop().await;
            let mut seen = consumer_observed.lock().await;
            seen.push(frame.sequence);
            let done = seen.len() >= 9;
            drop(seen);
            tokio::time::sleep(Duration::from_millis(200)).await;
            if done {
                break;
            }
        }
    });

    let _ = tokio::join!(producer, consumer);

    let seqs = observed.lock().await.clone();
    assert!(seqs.len() >= 9, "expected at least 9 frames delivered in ~2s, got {}", seqs.len());
    for pair in seqs.windows(2) {
        assert!(
            pair[1] > pair[0],
            "delivered sequence numbers must strictly increase, got {seqs:?}"
        );
    }
    assert!(queue.dropped_count() > 0, "slow consumer should have forced at least one drop");
}
