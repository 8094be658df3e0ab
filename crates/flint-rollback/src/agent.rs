//! Per-arena handle over the write and replay paths.

use flint_core::{ArenaContext, Mutation, MutationDescription};

use crate::engine::{RollbackEngine, RollbackError, RollbackReport};
use crate::logger::{ChangeLogger, LogError, LogOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AgentState {
    Active(ArenaContext),
    Retired,
}

/// Result of the end-of-round cleanup step.
#[derive(Debug)]
pub enum RoundCleanup {
    RolledBack(RollbackReport),
    /// The round never logged anything.
    NothingLogged,
    Failed(RollbackError),
}

/// Rollback handle owned by one arena.
///
/// Once retired (the arena was removed) every call fails with `Retired`.
pub struct RollbackAgent {
    state: AgentState,
    logger: ChangeLogger,
    engine: RollbackEngine,
}

impl RollbackAgent {
    pub fn new(ctx: ArenaContext, logger: ChangeLogger, engine: RollbackEngine) -> Self {
        Self {
            state: AgentState::Active(ctx),
            logger,
            engine,
        }
    }

    pub fn context(&self) -> Option<&ArenaContext> {
        match &self.state {
            AgentState::Active(ctx) => Some(ctx),
            AgentState::Retired => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, AgentState::Active(_))
    }

    /// Updates the world used for location defaults and rollback checks.
    pub fn set_world(&mut self, world: impl Into<String>) -> bool {
        match &mut self.state {
            AgentState::Active(ctx) => {
                ctx.world = world.into();
                true
            }
            AgentState::Retired => false,
        }
    }

    pub fn log_change(&self, description: MutationDescription) -> Result<LogOutcome, LogError> {
        let ctx = self.context().ok_or(LogError::Retired)?;
        self.logger.log_change(ctx, description)
    }

    pub fn log_mutation(&self, mutation: Mutation) -> Result<LogOutcome, LogError> {
        let ctx = self.context().ok_or(LogError::Retired)?;
        self.logger.log_mutation(ctx, mutation)
    }

    pub fn pop_rollbacks(&self) -> Result<RollbackReport, RollbackError> {
        let ctx = self.context().ok_or(RollbackError::Retired)?;
        self.engine.pop_rollbacks(ctx)
    }

    /// End-of-round rollback. Never fails: the round is over either way.
    pub fn end_round(&self) -> RoundCleanup {
        match self.pop_rollbacks() {
            Ok(report) => RoundCleanup::RolledBack(report),
            Err(RollbackError::NoActiveLog { arena }) => {
                tracing::debug!(%arena, "round ended with nothing to roll back");
                RoundCleanup::NothingLogged
            }
            Err(e) => {
                tracing::error!("rollback at round end failed: {e}");
                RoundCleanup::Failed(e)
            }
        }
    }

    /// Invalidates the handle. Returns the context it held, if it was active.
    pub fn retire(&mut self) -> Option<ArenaContext> {
        match std::mem::replace(&mut self.state, AgentState::Retired) {
            AgentState::Active(ctx) => Some(ctx),
            AgentState::Retired => None,
        }
    }
}
