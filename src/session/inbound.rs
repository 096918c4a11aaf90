use super::{Session, SessionEvent, TerminationCause};
use crate::error::EdgeError;
use crate::resampler::StreamResampler;
use crate::transport::{decode_audio, EventStream, ServerEvent, ServiceError};
use std::time::Duration;
use tokio::time::Instant;

/// Service to speaker path of one session
pub(super) struct InboundHandler {
    resampler: StreamResampler,
    transport_rate: u32,
    drain_poll: Duration,
    /// Longest the queue may sit without shrinking while draining
    stall_timeout: Duration,
    transcript: String,
    deltas: usize,
}

impl InboundHandler {
    pub(super) fn new(
        resampler: StreamResampler,
        drain_poll: Duration,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            transport_rate: resampler.source_rate(),
            resampler,
            drain_poll,
            stall_timeout,
            transcript: String::new(),
            deltas: 0,
        }
    }

    pub(super) async fn run(mut self, session: &Session, mut events: Box<dyn EventStream>) {
        log::info!("Realtime: Listening for server events");

        loop {
            let next = tokio::select! {
                _ = session.cancel.cancelled() => break,
                next = events.next_event() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                // Malformed payloads are skipped, not fatal
                Some(Err(e @ (EdgeError::Json(_) | EdgeError::Protocol(_)))) => {
                    log::warn!("Realtime: Skipping malformed event: {}", e);
                    continue;
                }
                Some(Err(e)) => {
                    log::error!("Realtime: Connection error: {}", e);
                    session
                        .terminate(TerminationCause::TransportError(e.to_string()))
                        .await;
                    break;
                }
                None => {
                    session
                        .terminate(TerminationCause::TransportError(
                            "connection closed by server".to_string(),
                        ))
                        .await;
                    break;
                }
            };

            if !self.handle(session, event).await {
                break;
            }
        }
    }

    /// Returns false once the session should stop reading
    async fn handle(&mut self, session: &Session, event: ServerEvent) -> bool {
        match event {
            ServerEvent::AudioDelta { delta } => {
                let block = match decode_audio(&delta, self.transport_rate) {
                    Ok(block) => block,
                    Err(e) => {
                        log::warn!("Realtime: Dropping undecodable audio delta: {}", e);
                        return true;
                    }
                };

                // Stop sending before the first sample can reach the speaker
                session.apply(SessionEvent::AudioDelta);
                if session.machine.is_terminated() {
                    return false;
                }

                self.deltas += 1;
                let resampled = self.resampler.process(block.samples());
                log::trace!(
                    "Realtime: Audio delta {} ({} samples, {} queued)",
                    self.deltas,
                    block.len(),
                    resampled.len()
                );
                session.queue.push(resampled);
            }

            ServerEvent::ResponseDone => {
                session.queue.push(self.resampler.flush());
                if !self.wait_for_drain(session).await {
                    return false;
                }
                session.apply(SessionEvent::ResponseComplete);

                if self.transcript.is_empty() {
                    log::info!("Realtime: Response complete ({} audio deltas)", self.deltas);
                } else {
                    log::info!("Realtime: Assistant said: {}", self.transcript.trim());
                }
                self.transcript.clear();
                self.deltas = 0;
            }

            ServerEvent::Error(error) => {
                log_service_error(&error);
                if error.is_fatal() {
                    let reason = error
                        .message
                        .clone()
                        .unwrap_or_else(|| "service error".to_string());
                    session
                        .terminate(TerminationCause::TransportError(reason))
                        .await;
                    return false;
                }
            }

            ServerEvent::TranscriptDelta { delta } => {
                log::debug!("Realtime: Transcript delta: {}", delta);
                self.transcript.push_str(&delta);
            }

            ServerEvent::Other(kind) => {
                log::debug!("Realtime: Ignoring event {}", kind);
            }
        }
        true
    }

    /// Wait until the speaker has played everything queued for this response.
    /// A failed speaker, or one that stops pulling, ends the session.
    async fn wait_for_drain(&self, session: &Session) -> bool {
        let mut remaining = session.queue.len();
        let mut progressed_at = Instant::now();

        while remaining > 0 {
            if let Err(e) = session.check_output() {
                session.fail_output(e).await;
                return false;
            }
            if progressed_at.elapsed() >= self.stall_timeout {
                let error = EdgeError::Device(format!(
                    "Output stalled with {} samples queued",
                    remaining
                ));
                session.fail_output(error).await;
                return false;
            }

            tokio::select! {
                _ = session.cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.drain_poll) => {}
            }

            let queued = session.queue.len();
            if queued < remaining {
                progressed_at = Instant::now();
            }
            remaining = queued;
        }
        !session.cancel.is_cancelled()
    }
}

fn log_service_error(error: &ServiceError) {
    log::error!(
        "Realtime: Service error type={} code={} event_id={}: {}",
        error.kind.as_deref().unwrap_or("unknown"),
        error.code.as_deref().unwrap_or("none"),
        error.event_id.as_deref().unwrap_or("none"),
        error.message.as_deref().unwrap_or("")
    );
}
