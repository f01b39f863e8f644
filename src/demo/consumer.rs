use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::caps::ConsumerCaps;
use super::messages::{EngineControl, ShutdownPhase, Submission};

/// Simulated device: reads each submission `latency` after it was made and
/// signals its fence, strictly in submission order.
pub fn consumer_thread(
    caps: ConsumerCaps,
    latency: Duration,
    submit_rx: Receiver<Submission>,
    control: Arc<EngineControl>,
) -> anyhow::Result<()> {
    let mut consumed = 0u64;

    while !control.reached(ShutdownPhase::StopConsumer) {
        let submission = match submit_rx.recv_timeout(Duration::from_millis(10)) {
            Ok(submission) => submission,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let ready_at = submission.submitted_at + latency;
        if let Some(remaining) = ready_at.checked_duration_since(Instant::now()) {
            std::thread::sleep(remaining);
        }

        caps.timeline.signal(submission.fence);
        consumed += 1;
        if submission.early {
            log::debug!("Consumer: {} (ended early)", submission.fence);
        } else {
            log::trace!("Consumer: {}", submission.fence);
        }
    }

    // Anything still queued was never waited on; release it anyway.
    for submission in submit_rx.try_iter() {
        caps.timeline.signal(submission.fence);
    }
    log::debug!("Consumer thread shutting down after {} submissions", consumed);

    Ok(())
}
