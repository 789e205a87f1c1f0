//! Session lifecycle state machine.
//!
//! This module tracks where a device session is in its lifecycle and rejects
//! transitions that would skip a step, so that open and close sequences can
//! never interleave.
//!
//! # States
//!
//! - `Closed`: No driver handle held
//! - `Opening`: Driver construction and the open entry point are running
//! - `Open`: Driver open and configured, captures allowed
//! - `Closing`: Capture stopped, handles being released
//!
//! # Valid Transitions
//!
//! - Closed → Opening → Open → Closing → Closed
//! - Opening → Closed (open failed or timed out)
//! - Open → Closed (device detached)
//!
//! # Examples
//!
//! ```
//! use biolink_engine::{SessionState, StateMachine};
//!
//! let mut machine = StateMachine::new();
//! assert_eq!(machine.current_state(), &SessionState::Closed);
//!
//! machine.transition_to(SessionState::Opening).unwrap();
//! machine.transition_to(SessionState::Open).unwrap();
//! assert!(machine.current_state().is_open());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use biolink_core::{Error, Result};

/// Maximum number of state transitions to keep in history.
///
/// A full open/close cycle is four transitions, so this covers the last
/// sixteen sessions of a long-running host.
const MAX_HISTORY_SIZE: usize = 64;

/// Lifecycle state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No driver handle held.
    Closed,

    /// Open sequence in progress.
    Opening,

    /// Driver open; captures allowed.
    Open,

    /// Close sequence in progress.
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            SessionState::Closed => "Closed",
            SessionState::Opening => "Opening",
            SessionState::Open => "Open",
            SessionState::Closing => "Closing",
        };
        write!(f, "{}", state_str)
    }
}

impl SessionState {
    /// Check if transition to target state is valid from this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use biolink_engine::SessionState;
    ///
    /// assert!(SessionState::Closed.can_transition_to(&SessionState::Opening));
    /// assert!(SessionState::Open.can_transition_to(&SessionState::Closed));
    /// assert!(!SessionState::Closed.can_transition_to(&SessionState::Open));
    /// ```
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        matches!(
            (self, target),
            // From Closed
            (SessionState::Closed, SessionState::Opening)
            // From Opening
            | (SessionState::Opening, SessionState::Open | SessionState::Closed)
            // From Open (Closed directly on detach)
            | (SessionState::Open, SessionState::Closing | SessionState::Closed)
            // From Closing
            | (SessionState::Closing, SessionState::Closed)
        )
    }

    /// Whether captures may run in this state.
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open)
    }
}

/// Represents a single state transition with timestamp.
///
/// The `timestamp` field is not serialized as `Instant` is process-specific.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// The state transitioned from.
    pub from: SessionState,

    /// The state transitioned to.
    pub to: SessionState,

    /// When the transition occurred.
    #[serde(skip, default = "Instant::now")]
    pub timestamp: Instant,
}

impl StateTransition {
    /// Create a new state transition record.
    pub fn new(from: SessionState, to: SessionState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }
}

/// State machine guarding a device session.
///
/// # Thread Safety
///
/// This struct is not thread-safe by design. The session manager keeps it
/// behind the same lock that serializes open and close.
///
/// # Examples
///
/// ```
/// use biolink_engine::{SessionState, StateMachine};
///
/// let mut machine = StateMachine::new();
/// machine.transition_to(SessionState::Opening).unwrap();
///
/// // Skipping Open is rejected
/// assert!(machine.transition_to(SessionState::Closing).is_err());
/// assert_eq!(machine.history().len(), 1);
/// ```
#[derive(Debug)]
pub struct StateMachine {
    /// Current session state.
    current_state: SessionState,

    /// History of state transitions (limited to MAX_HISTORY_SIZE).
    history: VecDeque<StateTransition>,
}

impl StateMachine {
    /// Create a new state machine in the Closed state.
    pub fn new() -> Self {
        Self {
            current_state: SessionState::Closed,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    /// Get the current state of the machine.
    pub fn current_state(&self) -> &SessionState {
        &self.current_state
    }

    /// Recent transitions, ordered from oldest to newest.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Transition to a new state, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the transition is not
    /// valid from the current state. The state is left unchanged.
    pub fn transition_to(&mut self, new_state: SessionState) -> Result<StateTransition> {
        if !self.current_state.can_transition_to(&new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        let transition = StateTransition::new(self.current_state, new_state);
        self.perform_state_change(new_state, transition.clone());

        Ok(transition)
    }

    /// Force the machine back to Closed regardless of the current state.
    ///
    /// Used by close, which must succeed from any state.
    pub fn reset(&mut self) -> StateTransition {
        let transition = StateTransition::new(self.current_state, SessionState::Closed);
        self.perform_state_change(SessionState::Closed, transition.clone());
        transition
    }

    fn perform_state_change(&mut self, new_state: SessionState, transition: StateTransition) {
        self.current_state = new_state;

        self.history.push_back(transition);
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
