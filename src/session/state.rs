//! Session state and its single transition function.
//!
//! Nothing outside this module writes [`SessionState`]; every change goes
//! through [`transition`] via [`SessionStateMachine::apply`], which also
//! publishes the new state to watchers.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use strum::Display;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    #[strum(serialize = "LISTENING")]
    Listening,
    #[strum(serialize = "CAPTURING")]
    Capturing,
    #[strum(serialize = "AWAITING_RESPONSE")]
    AwaitingResponse,
    #[strum(serialize = "SPEAKING")]
    Speaking,
    #[strum(serialize = "TERMINATED")]
    Terminated,
}

impl SessionState {
    /// Outbound audio is suppressed while the assistant is speaking
    pub fn send_enabled(self) -> bool {
        self != SessionState::Speaking
    }

    /// A conversation is open and has not been torn down
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Capturing | SessionState::AwaitingResponse | SessionState::Speaking
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCause {
    Interrupted,
    InactivityTimeout,
    TransportError(String),
    DeviceError(String),
    StopRequested,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCause::Interrupted => write!(f, "interrupted"),
            TerminationCause::InactivityTimeout => write!(f, "inactivity timeout"),
            TerminationCause::TransportError(e) => write!(f, "transport error: {}", e),
            TerminationCause::DeviceError(e) => write!(f, "device error: {}", e),
            TerminationCause::StopRequested => write!(f, "stop requested"),
        }
    }
}

impl TerminationCause {
    /// Timeouts, interrupts and stop requests end a session normally
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            TerminationCause::TransportError(_) | TerminationCause::DeviceError(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Wake event accepted
    Start,
    /// A capture block was forwarded to the transport
    AudioSent,
    /// Response audio arrived
    AudioDelta,
    /// Response finished and the playback queue has drained
    ResponseComplete,
    Terminate(TerminationCause),
    /// Teardown finished, ready for the next wake event
    Resume,
}

/// Side effects the caller must carry out after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    EnableSend,
    DisableSend,
    ResetTimer,
    Teardown(TerminationCause),
}

/// Pure transition function. Events that do not apply in `state` leave it
/// unchanged with no effects.
pub fn transition(state: SessionState, event: &SessionEvent) -> (SessionState, Vec<Effect>) {
    use SessionState::*;

    match (state, event) {
        (Listening, SessionEvent::Start) => (Capturing, vec![Effect::EnableSend, Effect::ResetTimer]),

        (Capturing, SessionEvent::AudioSent) => (AwaitingResponse, Vec::new()),

        (Capturing | AwaitingResponse, SessionEvent::AudioDelta) => {
            (Speaking, vec![Effect::DisableSend])
        }
        (Speaking, SessionEvent::AudioDelta) => (Speaking, Vec::new()),

        (Speaking, SessionEvent::ResponseComplete) => {
            (Capturing, vec![Effect::EnableSend, Effect::ResetTimer])
        }
        // Response without audio still counts as activity
        (Capturing | AwaitingResponse, SessionEvent::ResponseComplete) => {
            (Capturing, vec![Effect::ResetTimer])
        }

        (Terminated, SessionEvent::Terminate(_)) => (Terminated, Vec::new()),
        (_, SessionEvent::Terminate(cause)) => (Terminated, vec![Effect::Teardown(cause.clone())]),

        (Terminated, SessionEvent::Resume) => (Listening, Vec::new()),

        (state, _) => (state, Vec::new()),
    }
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    last_response: Instant,
}

/// Owner of one conversation's [`SessionState`] and inactivity timer
#[derive(Debug)]
pub struct SessionStateMachine {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Listening);
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Listening,
                last_response: Instant::now(),
            }),
            state_tx,
        }
    }

    /// Run `event` through [`transition`] and return the effects to carry out.
    /// The lock makes concurrent callers serialize, so only one of several
    /// racing `Terminate` events ever receives the `Teardown` effect.
    pub fn apply(&self, event: SessionEvent) -> Vec<Effect> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = inner.state;
        let (next, effects) = transition(previous, &event);

        if effects.contains(&Effect::ResetTimer) {
            inner.last_response = Instant::now();
        }
        inner.state = next;
        drop(inner);

        if previous != next {
            log::debug!("Session: {} -> {} on {:?}", previous, next, event);
            self.state_tx.send_replace(next);
        }
        effects
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    pub fn send_enabled(&self) -> bool {
        self.state().send_enabled()
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == SessionState::Terminated
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Time of the last completed response (or session start)
    pub fn last_response(&self) -> Instant {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_response
    }

    pub fn inactivity_expired(&self, timeout: Duration) -> bool {
        self.last_response().elapsed() > timeout
    }
}
