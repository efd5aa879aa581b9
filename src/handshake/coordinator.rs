//! The owner/joiner turn protocol.

use super::TurnToken;
use crate::Role;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use std::fmt;
use std::time::Duration;

/// Where this process is in the turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    /// Owner holds the arena and reads the shared state.
    OwnerConsuming,
    /// Owner raised Produce and waits for Finished.
    OwnerWaitingForJoiner,
    /// Joiner holds the arena and mutates the shared state.
    JoinerProducing,
    /// Joiner waits for Produce.
    JoinerWaiting,
}

impl TurnState {
    /// Whether the local process may touch the arena in this state.
    pub fn holds_turn(&self) -> bool {
        matches!(self, TurnState::OwnerConsuming | TurnState::JoinerProducing)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnState::OwnerConsuming => "owner-consuming",
            TurnState::OwnerWaitingForJoiner => "owner-waiting",
            TurnState::JoinerProducing => "joiner-producing",
            TurnState::JoinerWaiting => "joiner-waiting",
        };
        f.write_str(s)
    }
}

/// Outcome of an owner handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// No joiner has attached; the owner kept the turn.
    Skipped,
    /// The joiner took a turn and handed it back.
    Completed,
}

/// Both turn tokens plus the local side of the protocol.
///
/// ```text
///   owner                         joiner
///   ─────                         ──────
///   consume ...                   wait Produce ◄─┐
///   raise Produce ───────────────────────────────┘
///   wait Finished ◄─┐             mutate ...
///                   └──────────── raise Finished
///   consume ...                   wait Produce
/// ```
///
/// At most one of the two tokens is raised at any time, so exactly one
/// process holds the arena.
#[derive(Debug)]
pub struct Handshake {
    produce: TurnToken,
    finished: TurnToken,
    role: Role,
    timeout: Option<Duration>,
    state: TurnState,
}

impl Handshake {
    /// Create both tokens (owner side).
    ///
    /// # Errors
    ///
    /// Returns `ResourceCreation` if either name is taken.
    pub fn create(config: &SessionConfig) -> Result<Self> {
        let produce = TurnToken::create(&config.produce_token_name())?;
        let finished = TurnToken::create(&config.finished_token_name())?;
        Ok(Self {
            produce,
            finished,
            role: Role::Owner,
            timeout: config.handoff_timeout,
            state: TurnState::OwnerConsuming,
        })
    }

    /// Open the owner's tokens (joiner side).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the owner has not created them.
    pub fn open(config: &SessionConfig) -> Result<Self> {
        let produce = TurnToken::open(&config.produce_token_name())?;
        let finished = TurnToken::open(&config.finished_token_name())?;
        Ok(Self {
            produce,
            finished,
            role: Role::Joiner,
            timeout: config.handoff_timeout,
            state: TurnState::JoinerWaiting,
        })
    }

    /// Which side this handshake drives.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current local turn state.
    pub fn state(&self) -> TurnState {
        self.state
    }

    fn expect_role(&self, role: Role, op: &str) -> Result<()> {
        if self.role != role {
            return Err(Error::ProtocolViolation(format!(
                "{op} called on the {:?} side",
                self.role
            )));
        }
        Ok(())
    }

    /// Give the joiner one turn and wait for it to finish (owner side).
    ///
    /// Without a connected joiner this returns [`Handoff::Skipped`] at once
    /// and the owner keeps the turn.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` if a timeout is configured and the joiner does
    /// not finish in time. If the joiner never picked up the turn, the
    /// Produce signal is withdrawn and the owner holds the turn again;
    /// otherwise the next call resumes waiting for Finished.
    pub fn handoff(&mut self, joiner_connected: bool) -> Result<Handoff> {
        self.expect_role(Role::Owner, "handoff")?;
        if !joiner_connected {
            return Ok(Handoff::Skipped);
        }

        if self.state == TurnState::OwnerConsuming {
            self.produce.raise()?;
            self.state = TurnState::OwnerWaitingForJoiner;
            tracing::debug!(state = %self.state, "handed turn to joiner");
        }

        match self.finished.wait(self.timeout) {
            Ok(()) => {
                self.state = TurnState::OwnerConsuming;
                tracing::debug!(state = %self.state, "joiner handed turn back");
                Ok(Handoff::Completed)
            }
            Err(err @ Error::Disconnected { .. }) => {
                if self.produce.try_observe()? {
                    // The joiner never woke up; take the turn back.
                    self.state = TurnState::OwnerConsuming;
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Block until the owner hands over the turn (joiner side).
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if the joiner already holds the turn and
    /// `Disconnected` on timeout.
    pub fn wait_for_turn(&mut self) -> Result<()> {
        self.expect_role(Role::Joiner, "wait_for_turn")?;
        if self.state == TurnState::JoinerProducing {
            return Err(Error::ProtocolViolation(
                "joiner waited for a turn it already holds".into(),
            ));
        }

        self.produce.wait(self.timeout)?;
        self.state = TurnState::JoinerProducing;
        tracing::debug!(state = %self.state, "joiner took turn");
        Ok(())
    }

    /// Hand the turn back to the owner (joiner side).
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if the joiner does not hold the turn.
    pub fn finish_turn(&mut self) -> Result<()> {
        self.expect_role(Role::Joiner, "finish_turn")?;
        if self.state != TurnState::JoinerProducing {
            tracing::error!(state = %self.state, "finish without a turn");
            return Err(Error::ProtocolViolation(
                "joiner finished a turn it does not hold".into(),
            ));
        }

        self.finished.raise()?;
        self.state = TurnState::JoinerWaiting;
        tracing::debug!(state = %self.state, "joiner finished turn");
        Ok(())
    }
}
