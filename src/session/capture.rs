use super::{Session, TerminationCause};
use crate::audio::SampleBlock;
use crate::resampler::StreamResampler;
use std::time::Duration;
use tokio::sync::mpsc;

/// Microphone to transport path of one session
pub(super) struct CapturePipeline {
    resampler: StreamResampler,
    block_frames: usize,
    poll: Duration,
    inactivity_timeout: Duration,
    blocks_forwarded: usize,
    blocks_suppressed: usize,
}

enum Poll {
    Block(SampleBlock),
    NotReady,
    Closed,
}

impl CapturePipeline {
    pub(super) fn new(
        resampler: StreamResampler,
        block_frames: usize,
        poll: Duration,
        inactivity_timeout: Duration,
    ) -> Self {
        Self {
            resampler,
            block_frames,
            poll,
            inactivity_timeout,
            blocks_forwarded: 0,
            blocks_suppressed: 0,
        }
    }

    pub(super) async fn run(mut self, session: &Session, outbound: mpsc::Sender<SampleBlock>) {
        log::info!(
            "Capture: Started ({} frames per block, {}Hz -> {}Hz)",
            self.block_frames,
            self.resampler.source_rate(),
            self.resampler.target_rate()
        );

        while !session.cancel.is_cancelled() {
            // Only count silence against the session while the user may talk
            if session.machine.send_enabled()
                && session.machine.inactivity_expired(self.inactivity_timeout)
            {
                log::info!(
                    "Capture: No response completed in {:?}, ending session",
                    self.inactivity_timeout
                );
                session.terminate(TerminationCause::InactivityTimeout).await;
                break;
            }

            let block = match self.poll_device(session) {
                Ok(Poll::Block(block)) => block,
                Ok(Poll::NotReady) => {
                    tokio::select! {
                        _ = session.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll) => continue,
                    }
                }
                Ok(Poll::Closed) => break,
                Err(e) => {
                    log::error!("Capture: Input device failed: {}", e);
                    session
                        .terminate(TerminationCause::DeviceError(e.to_string()))
                        .await;
                    break;
                }
            };

            let resampled = self.resampler.process(block.samples());
            if resampled.is_empty() {
                continue;
            }

            // sendEnabled can flip between blocks, so check every time
            if !session.machine.send_enabled() {
                self.blocks_suppressed += 1;
                log::trace!("Capture: Dropping block while speaking");
                continue;
            }

            tokio::select! {
                _ = session.cancel.cancelled() => break,
                sent = outbound.send(resampled) => {
                    if sent.is_err() {
                        break;
                    }
                    self.blocks_forwarded += 1;
                }
            }

            tokio::task::yield_now().await;
        }

        log::info!(
            "Capture: Stopped ({} blocks forwarded, {} suppressed)",
            self.blocks_forwarded,
            self.blocks_suppressed
        );
    }

    /// Read one full block if the device has buffered it
    fn poll_device(&self, session: &Session) -> crate::Result<Poll> {
        let mut guard = session.lock_input();
        let Some(input) = guard.as_mut() else {
            return Ok(Poll::Closed);
        };
        if input.available()? < self.block_frames {
            return Ok(Poll::NotReady);
        }
        Ok(Poll::Block(input.read(self.block_frames)?))
    }
}
