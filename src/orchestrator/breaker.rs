//! The request state machine. `advance` never panics — an illegal edge
//! is a returned error, not a defensive `unreachable!()`.

use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    ContextReady,
    CandidateGenerated,
    VerificationRunning,
    VerificationPassed,
    Halted,
    Attested,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEvent {
    ContextReady,
    CandidateGenerated,
    BeginVerification,
    VerificationPassed,
    VerificationFailedRetryable,
    VerificationFailedTerminal,
    Attest,
    Complete,
    Cancel,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("illegal transition {event:?} from state {from:?}")]
    IllegalTransition { from: RequestState, event: TransitionEvent },
    #[error("LLM gateway error: {0}")]
    Llm(String),
    #[error("ledger error: {0}")]
    Ledger(String),
    #[error("manifest store error: {0}")]
    Manifest(String),
    #[error("sandbox concurrency exhausted")]
    Backpressure,
    #[error("strict mode unavailable")]
    StrictModeUnavailable,
}

#[derive(Debug, Clone)]
pub struct StateTransitionEvent {
    pub request_id: Uuid,
    pub from: RequestState,
    pub to: RequestState,
}

pub struct CircuitBreaker {
    request_id: Uuid,
    state: RequestState,
    events_tx: broadcast::Sender<StateTransitionEvent>,
}

impl CircuitBreaker {
    pub fn new(request_id: Uuid, events_tx: broadcast::Sender<StateTransitionEvent>) -> Self {
        Self {
            request_id,
            state: RequestState::Received,
            events_tx,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn advance(&mut self, event: TransitionEvent) -> Result<RequestState, OrchestratorError> {
        let next = match (self.state, event) {
            (RequestState::Received, TransitionEvent::ContextReady) => RequestState::ContextReady,
            (RequestState::ContextReady, TransitionEvent::CandidateGenerated) => RequestState::CandidateGenerated,
            (RequestState::CandidateGenerated, TransitionEvent::BeginVerification) => RequestState::VerificationRunning,
            (RequestState::VerificationRunning, TransitionEvent::VerificationPassed) => RequestState::VerificationPassed,
            (RequestState::VerificationRunning, TransitionEvent::VerificationFailedRetryable) => RequestState::ContextReady,
            (RequestState::VerificationRunning, TransitionEvent::VerificationFailedTerminal) => RequestState::Halted,
            (RequestState::VerificationPassed, TransitionEvent::Attest) => RequestState::Attested,
            (RequestState::Attested, TransitionEvent::Complete) => RequestState::Completed,
            (
                RequestState::Received
                | RequestState::ContextReady
                | RequestState::CandidateGenerated
                | RequestState::VerificationRunning,
                TransitionEvent::Cancel,
            ) => RequestState::Halted,
            (from, event) => return Err(OrchestratorError::IllegalTransition { from, event }),
        };

        tracing::info!(
            request_id = %self.request_id,
            from = ?self.state,
            to = ?next,
            "state transition"
        );
        let _ = self.events_tx.send(StateTransitionEvent {
            request_id: self.request_id,
            from: self.state,
            to: next,
        });
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        let (tx, _rx) = broadcast::channel(16);
        CircuitBreaker::new(Uuid::nil(), tx)
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut b = breaker();
        assert_eq!(b.advance(TransitionEvent::ContextReady).unwrap(), RequestState::ContextReady);
        assert_eq!(b.advance(TransitionEvent::CandidateGenerated).unwrap(), RequestState::CandidateGenerated);
        assert_eq!(b.advance(TransitionEvent::BeginVerification).unwrap(), RequestState::VerificationRunning);
        assert_eq!(b.advance(TransitionEvent::VerificationPassed).unwrap(), RequestState::VerificationPassed);
        assert_eq!(b.advance(TransitionEvent::Attest).unwrap(), RequestState::Attested);
        assert_eq!(b.advance(TransitionEvent::Complete).unwrap(), RequestState::Completed);
    }

    #[test]
    fn retryable_failure_loops_back_to_context_ready() {
        let mut b = breaker();
        b.advance(TransitionEvent::ContextReady).unwrap();
        b.advance(TransitionEvent::CandidateGenerated).unwrap();
        b.advance(TransitionEvent::BeginVerification).unwrap();
        assert_eq!(
            b.advance(TransitionEvent::VerificationFailedRetryable).unwrap(),
            RequestState::ContextReady
        );
    }

    #[test]
    fn terminal_failure_halts() {
        let mut b = breaker();
        b.advance(TransitionEvent::ContextReady).unwrap();
        b.advance(TransitionEvent::CandidateGenerated).unwrap();
        b.advance(TransitionEvent::BeginVerification).unwrap();
        assert_eq!(
            b.advance(TransitionEvent::VerificationFailedTerminal).unwrap(),
            RequestState::Halted
        );
    }

    #[test]
    fn illegal_transition_errors_instead_of_panicking() {
        let mut b = breaker();
        let err = b.advance(TransitionEvent::Attest).unwrap_err();
        assert!(matches!(err, OrchestratorError::IllegalTransition { .. }));
    }

    #[test]
    fn cancel_is_legal_from_any_in_flight_state() {
        let mut b = breaker();
        assert_eq!(b.advance(TransitionEvent::Cancel).unwrap(), RequestState::Halted);
    }

    #[test]
    fn cancel_is_illegal_after_verification_passed() {
        let mut b = breaker();
        b.advance(TransitionEvent::ContextReady).unwrap();
        b.advance(TransitionEvent::CandidateGenerated).unwrap();
        b.advance(TransitionEvent::BeginVerification).unwrap();
        b.advance(TransitionEvent::VerificationPassed).unwrap();
        assert!(b.advance(TransitionEvent::Cancel).is_err());
    }
}
