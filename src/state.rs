/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::time::Duration;

use crate::{ConnectPolicy, EchoError, Readiness};
use crate::utilities::Timeout;

/// Which end of the connection a state machine drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connects, writes one request, reads one response.
    Client,
    /// Reads a request, writes the reply.
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Reading,
    Writing,
    Finished,
}

impl ConnectionState {
    pub fn is_finished(self) -> bool {
        self == Self::Finished
    }

    /// The readiness a connection in this state waits for.
    pub fn interest(self) -> Option<Readiness> {
        match self {
            Self::Connecting => Some(Readiness::CONNECT),
            Self::Reading => Some(Readiness::READ),
            Self::Writing => Some(Readiness::WRITE),
            Self::Finished => None,
        }
    }
}

/// The I/O to attempt for a readiness event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    FinishConnect,
    Drain,
    Flush,
    /// The event does not match the current state; no I/O this cycle.
    Skip,
}

/// What the attempted I/O produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Connected,
    ConnectPending,
    /// Bytes arrived; `complete` if they make up a whole message for the role.
    Received { complete: bool },
    /// The readiness event was spurious, nothing could be read.
    Nothing,
    EndOfStream,
    /// No further request bytes arrived while the server was lingering.
    Quiet,
    /// The write buffer is exhausted. For a server, `round_complete` says
    /// whether the request has been answered in full.
    Flushed { round_complete: bool },
    WriteBlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
    /// Interest to re-arm on the multiplexer; `None` once finished.
    pub reregister: Option<Readiness>,
}

pub fn action(state: ConnectionState, fired: Readiness) -> Action {
    match state {
        ConnectionState::Connecting if fired.contains(Readiness::CONNECT) => Action::FinishConnect,
        ConnectionState::Reading if fired.contains(Readiness::READ) => Action::Drain,
        ConnectionState::Writing if fired.contains(Readiness::WRITE) => Action::Flush,
        _ => Action::Skip,
    }
}

/// The pure transition function. Outcomes that do not belong to `state`
/// leave it unchanged; `Finished` is absorbing.
pub fn transition(role: Role, state: ConnectionState, outcome: Outcome) -> Transition {
    use ConnectionState::*;

    let next = match (state, outcome) {
        (Finished, _) => Finished,
        (Connecting, Outcome::Connected) => Writing,
        (Writing, Outcome::Flushed { round_complete }) => match role {
            Role::Client => Reading,
            Role::Server if round_complete => Finished,
            Role::Server => Reading,
        },
        (Reading, Outcome::EndOfStream) => Finished,
        (Reading, Outcome::Quiet) => Finished,
        (Reading, Outcome::Received { complete: true }) => match role {
            Role::Client => Finished,
            Role::Server => Writing,
        },
        (state, _) => state,
    };

    Transition {
        next,
        reregister: next.interest(),
    }
}

/// A connection's protocol driver: role, current state and the bounds on
/// how long it may stay in `Connecting`
#[derive(Debug)]
pub struct StateMachine {
    role: Role,
    state: ConnectionState,
    policy: ConnectPolicy,
    deadline: Timeout,
    attempts: u32,
}

impl StateMachine {
    pub fn server() -> Self {
        Self {
            role: Role::Server,
            state: ConnectionState::Reading,
            policy: ConnectPolicy { timeout: None, max_attempts: None },
            deadline: Timeout::start(None),
            attempts: 0,
        }
    }

    /// Starts in `Connecting`; the connect deadline starts running now.
    pub fn client(policy: ConnectPolicy) -> Self {
        Self {
            role: Role::Client,
            state: ConnectionState::Connecting,
            policy,
            deadline: Timeout::start(policy.timeout),
            attempts: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn action(&self, fired: Readiness) -> Action {
        action(self.state, fired)
    }

    pub fn apply(&mut self, outcome: Outcome) -> Result<Transition, EchoError> {
        let transition = transition(self.role, self.state, outcome);
        if self.state == ConnectionState::Connecting && transition.next == ConnectionState::Connecting {
            self.attempts = self.attempts.saturating_add(1);
            if self.policy.max_attempts.map(|max| self.attempts > max).unwrap_or(false) {
                return Err(EchoError::ConnectTimedOut);
            }
            self.check_connect_deadline()?;
        }
        self.state = transition.next;
        Ok(transition)
    }

    /// How long the connection may still wait for CONNECT readiness, if
    /// bounded. `None` outside of `Connecting`.
    pub fn connect_remaining(&self) -> Option<Duration> {
        match self.state {
            ConnectionState::Connecting => self.deadline.remaining_time(),
            _ => None,
        }
    }

    pub fn check_connect_deadline(&self) -> Result<(), EchoError> {
        match self.state == ConnectionState::Connecting && self.deadline.expired() {
            true => Err(EchoError::ConnectTimedOut),
            false => Ok(()),
        }
    }

    /// Forces `Finished`, used by the teardown path.
    pub fn finish(&mut self) {
        self.state = ConnectionState::Finished;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn actions_follow_state_and_fired_bits() {
        assert_eq!(action(Connecting, Readiness::CONNECT), Action::FinishConnect);
        assert_eq!(action(Reading, Readiness::READ | Readiness::WRITE), Action::Drain);
        assert_eq!(action(Writing, Readiness::WRITE), Action::Flush);
        assert_eq!(action(Reading, Readiness::WRITE), Action::Skip);
        assert_eq!(action(Writing, Readiness::READ), Action::Skip);
        assert_eq!(action(Finished, Readiness::READ | Readiness::WRITE), Action::Skip);
    }

    #[test]
    fn client_round_trip() {
        let role = Role::Client;
        let step = transition(role, Connecting, Outcome::Connected);
        assert_eq!(step, Transition { next: Writing, reregister: Some(Readiness::WRITE) });
        let step = transition(role, Writing, Outcome::Flushed { round_complete: true });
        assert_eq!(step, Transition { next: Reading, reregister: Some(Readiness::READ) });
        let step = transition(role, Reading, Outcome::Received { complete: true });
        assert_eq!(step, Transition { next: Finished, reregister: None });
    }

    #[test]
    fn server_round_trip() {
        let role = Role::Server;
        assert_eq!(transition(role, Reading, Outcome::Received { complete: true }).next, Writing);
        assert_eq!(transition(role, Writing, Outcome::Flushed { round_complete: true }).next, Finished);
        assert_eq!(transition(role, Writing, Outcome::Flushed { round_complete: false }).next, Reading);
    }

    #[test]
    fn incomplete_io_re_arms_same_interest() {
        assert_eq!(transition(Role::Server, Writing, Outcome::WriteBlocked),
            Transition { next: Writing, reregister: Some(Readiness::WRITE) });
        assert_eq!(transition(Role::Client, Reading, Outcome::Received { complete: false }),
            Transition { next: Reading, reregister: Some(Readiness::READ) });
        assert_eq!(transition(Role::Server, Reading, Outcome::Nothing).next, Reading);
        assert_eq!(transition(Role::Client, Connecting, Outcome::ConnectPending),
            Transition { next: Connecting, reregister: Some(Readiness::CONNECT) });
    }

    #[test]
    fn end_of_stream_finishes_both_roles() {
        assert_eq!(transition(Role::Server, Reading, Outcome::EndOfStream).next, Finished);
        assert_eq!(transition(Role::Client, Reading, Outcome::EndOfStream).next, Finished);
    }

    #[test]
    fn quiet_lingering_server_finishes() {
        assert_eq!(transition(Role::Server, Reading, Outcome::Quiet), Transition { next: Finished, reregister: None });
        assert_eq!(transition(Role::Server, Writing, Outcome::Quiet).next, Writing);
    }

    #[test]
    fn finished_is_absorbing() {
        for outcome in [Outcome::Connected, Outcome::Received { complete: true }, Outcome::Flushed { round_complete: false }] {
            assert_eq!(transition(Role::Client, Finished, outcome), Transition { next: Finished, reregister: None });
        }
        let mut machine = StateMachine::server();
        machine.finish();
        assert_eq!(machine.apply(Outcome::Received { complete: true }).unwrap().next, Finished);
        assert_eq!(machine.state(), Finished);
    }

    #[test]
    fn server_never_returns_to_connecting() {
        let mut machine = StateMachine::server();
        assert_eq!(machine.state(), Reading);
        assert_eq!(machine.apply(Outcome::Connected).unwrap().next, Reading);
        assert_eq!(machine.apply(Outcome::ConnectPending).unwrap().next, Reading);
    }

    #[test]
    fn connect_attempts_are_bounded() {
        let mut machine = StateMachine::client(ConnectPolicy { timeout: None, max_attempts: Some(3) });
        for _ in 0..3 {
            assert_eq!(machine.apply(Outcome::ConnectPending).unwrap().next, Connecting);
        }
        assert!(matches!(machine.apply(Outcome::ConnectPending), Err(EchoError::ConnectTimedOut)));

        let mut machine = StateMachine::client(ConnectPolicy { timeout: None, max_attempts: Some(0) });
        assert!(matches!(machine.apply(Outcome::ConnectPending), Err(EchoError::ConnectTimedOut)));
    }

    #[test]
    fn connect_deadline_is_enforced() {
        let machine = StateMachine::client(ConnectPolicy { timeout: Some(Duration::ZERO), max_attempts: None });
        assert_eq!(machine.connect_remaining(), Some(Duration::ZERO));
        assert!(matches!(machine.check_connect_deadline(), Err(EchoError::ConnectTimedOut)));

        let mut machine = StateMachine::client(ConnectPolicy { timeout: Some(Duration::ZERO), max_attempts: None });
        assert!(matches!(machine.apply(Outcome::ConnectPending), Err(EchoError::ConnectTimedOut)));
    }

    #[test]
    fn deadline_no_longer_applies_once_connected() {
        let mut machine = StateMachine::client(ConnectPolicy { timeout: Some(Duration::ZERO), max_attempts: None });
        assert_eq!(machine.apply(Outcome::Connected).unwrap().next, Writing);
        assert_eq!(machine.connect_remaining(), None);
        assert!(machine.check_connect_deadline().is_ok());
    }
}
