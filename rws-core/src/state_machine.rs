//! Connection state machine: legal transitions and the event that drives
//! each one. On-enter effects are *not* run here — they belong to the
//! actor, which is the only component with the side-effecting
//! collaborators (transport, handler registry, timers) a transition needs.
//! This module is the pure "is this move legal" authority: only table
//! transitions are accepted, and rejected moves never mutate state.

use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Initialized,
    Connecting,
    Connected,
    WebsocketConnected,
    Disconnected,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEvent {
    Start,
    TransportUp,
    TransportError,
    Timeout,
    UpgradeOk,
    UpgradeFail,
    TransportDown,
    Close,
    ScheduleReconnect,
    Fatal,
    Recoverable,
}

impl TransitionEvent {
    fn label(self) -> &'static str {
        match self {
            TransitionEvent::Start => "start",
            TransitionEvent::TransportUp => "transport_up",
            TransitionEvent::TransportError => "transport_error",
            TransitionEvent::Timeout => "timeout",
            TransitionEvent::UpgradeOk => "upgrade_ok",
            TransitionEvent::UpgradeFail => "upgrade_fail",
            TransitionEvent::TransportDown => "transport_down",
            TransitionEvent::Close => "close",
            TransitionEvent::ScheduleReconnect => "schedule_reconnect",
            TransitionEvent::Fatal => "fatal",
            TransitionEvent::Recoverable => "recoverable",
        }
    }
}

/// The actor terminates rather than entering a new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Moved(ConnectionStatus),
    Terminated,
}

/// Pure transition table lookup. Holds no state of its own beyond
/// the current status, so it can be unit-tested exhaustively against the
/// table without any actor machinery.
#[derive(Debug, Clone, Copy)]
pub struct StateMachine {
    status: ConnectionStatus,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Initialized,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Attempts `event`. On success, mutates `self.status` (or leaves the
    /// machine terminated, in which case the caller must drop the actor)
    /// and returns the new status. On failure, `self.status` is left
    /// untouched and a `TransitionError` describes the rejected move.
    pub fn apply(&mut self, event: TransitionEvent) -> Result<TransitionOutcome, TransitionError> {
        use ConnectionStatus::*;
        use TransitionEvent::*;

        let next = match (self.status, event) {
            (Initialized, Start) => Some(Connecting),
            (Connecting, TransportUp) => Some(Connected),
            (Connecting, TransportError) | (Connecting, Timeout) => Some(Error),
            (Connected, UpgradeOk) => Some(WebsocketConnected),
            (Connected, UpgradeFail) => Some(Error),
            (WebsocketConnected, TransportDown) => Some(Disconnected),
            (WebsocketConnected, Close) => {
                tracing::info!(target: "rws::state", from = ?self.status, event = event.label(), "connection terminated");
                return Ok(TransitionOutcome::Terminated);
            }
            (Disconnected, ScheduleReconnect) => Some(Reconnecting),
            (Reconnecting, Start) => Some(Connecting),
            (Error, Fatal) => {
                tracing::info!(target: "rws::state", from = ?self.status, event = event.label(), "connection terminated");
                return Ok(TransitionOutcome::Terminated);
            }
            (Error, Recoverable) => Some(Reconnecting),
            _ => None,
        };

        match next {
            Some(to) => {
                tracing::info!(target: "rws::state", from = ?self.status, event = event.label(), to = ?to, "state transition");
                self.status = to;
                Ok(TransitionOutcome::Moved(to))
            }
            None => {
                let err = TransitionError {
                    from: self.status,
                    event: event.label().to_string(),
                    to: None,
                    reason: format!("{:?} does not accept {}", self.status, event.label()),
                };
                tracing::debug!(target: "rws::state", from = ?self.status, event = event.label(), "rejected transition");
                Err(err)
            }
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionStatus::*;
    use TransitionEvent::*;

    #[test]
    fn happy_path_walks_through_every_state() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply(Start).unwrap(), TransitionOutcome::Moved(Connecting));
        assert_eq!(sm.apply(TransportUp).unwrap(), TransitionOutcome::Moved(Connected));
        assert_eq!(sm.apply(UpgradeOk).unwrap(), TransitionOutcome::Moved(WebsocketConnected));
        assert_eq!(sm.apply(TransportDown).unwrap(), TransitionOutcome::Moved(Disconnected));
        assert_eq!(sm.apply(ScheduleReconnect).unwrap(), TransitionOutcome::Moved(Reconnecting));
        assert_eq!(sm.apply(Start).unwrap(), TransitionOutcome::Moved(Connecting));
    }

    #[test]
    fn illegal_transition_is_rejected_without_mutating_state() {
        let mut sm = StateMachine::new();
        let before = sm.status();
        let err = sm.apply(UpgradeOk).unwrap_err();
        assert_eq!(err.from, Initialized);
        assert_eq!(sm.status(), before);
    }

    #[test]
    fn error_fatal_terminates_and_error_recoverable_reconnects() {
        let mut sm = StateMachine::new();
        sm.apply(Start).unwrap();
        sm.apply(TransportError).unwrap();
        assert_eq!(sm.status(), Error);

        let mut sm2 = sm;
        assert_eq!(sm2.apply(Recoverable).unwrap(), TransitionOutcome::Moved(Reconnecting));

        assert_eq!(sm.apply(Fatal).unwrap(), TransitionOutcome::Terminated);
    }

    #[test]
    fn close_from_websocket_connected_terminates() {
        let mut sm = StateMachine::new();
        sm.apply(Start).unwrap();
        sm.apply(TransportUp).unwrap();
        sm.apply(UpgradeOk).unwrap();
        assert_eq!(sm.apply(Close).unwrap(), TransitionOutcome::Terminated);
    }

    #[test]
    fn only_table_transitions_are_ever_accepted() {
        let all_events = [
            Start, TransportUp, TransportError, Timeout, UpgradeOk, UpgradeFail, TransportDown, Close,
            ScheduleReconnect, Fatal, Recoverable,
        ];
        let all_states = [Initialized, Connecting, Connected, WebsocketConnected, Disconnected, Reconnecting, Error];
        let legal: &[(ConnectionStatus, TransitionEvent)] = &[
            (Initialized, Start),
            (Connecting, TransportUp),
            (Connecting, TransportError),
            (Connecting, Timeout),
            (Connected, UpgradeOk),
            (Connected, UpgradeFail),
            (WebsocketConnected, TransportDown),
            (WebsocketConnected, Close),
            (Disconnected, ScheduleReconnect),
            (Reconnecting, Start),
            (Error, Fatal),
            (Error, Recoverable),
        ];
        for &state in &all_states {
            for &event in &all_events {
                let mut sm = StateMachine { status: state };
                let should_succeed = legal.contains(&(state, event));
                let result = sm.apply(event);
                assert_eq!(result.is_ok(), should_succeed, "state={state:?} event={event:?}");
            }
        }
    }
}
