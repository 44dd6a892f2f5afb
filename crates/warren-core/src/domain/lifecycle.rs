//! Lifecycle state machine contract and conformance tests
//!
//! `AgentStatus` and `ProjectStatus` implement [`LifecycleState`]; the
//! lifecycle manager consults `can_transition_to` before persisting any status
//! change.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use super::{AgentStatus, ProjectStatus};
use crate::{Error, Result};

/// Shared contract for lifecycle state machines
///
/// # Contract Requirements
///
/// 1. **Transition Consistency**: `can_transition_to(next)` must return true if and only if `next`
///    is in `valid_next_states()`
///
/// 2. **Terminal States**: If `is_terminal()` returns true, `valid_next_states()` must return an
///    empty vec
///
/// 3. **Non-Terminal States**: If `is_terminal()` returns false, `valid_next_states()` must return
///    at least one state
///
/// 4. **Exhaustive Matching**: `all_states()` must return all possible enum variants
pub trait LifecycleState: Copy + Eq + Sized + std::fmt::Display + 'static {
    /// Returns true if transition from `self` to `next` is valid
    fn can_transition_to(self, next: Self) -> bool {
        self.valid_next_states().contains(&next)
    }

    /// Returns all valid next states from current state
    fn valid_next_states(self) -> Vec<Self>;

    /// Returns true if this is a terminal state (no transitions out)
    fn is_terminal(self) -> bool {
        self.valid_next_states().is_empty()
    }

    /// Returns all possible states for this state machine
    fn all_states() -> &'static [Self];

    /// Checked transition, failing with a validation error on an invalid edge.
    fn transition_to(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::validation(format!(
                "invalid status transition {self} -> {next}"
            )))
        }
    }
}

impl LifecycleState for AgentStatus {
    fn valid_next_states(self) -> Vec<Self> {
        match self {
            Self::Created => vec![Self::Running],
            Self::Running => vec![Self::Stopped, Self::Error, Self::Removed],
            Self::Stopped => vec![Self::Running, Self::Error, Self::Removed],
            Self::Error => vec![Self::Removed],
            Self::Removed => vec![],
        }
    }

    fn all_states() -> &'static [Self] {
        &[
            Self::Created,
            Self::Running,
            Self::Stopped,
            Self::Error,
            Self::Removed,
        ]
    }
}

impl LifecycleState for ProjectStatus {
    fn valid_next_states(self) -> Vec<Self> {
        match self {
            Self::Active => vec![Self::Stopped, Self::Error],
            Self::Stopped => vec![Self::Active, Self::Error],
            Self::Error => vec![Self::Active, Self::Stopped],
        }
    }

    fn all_states() -> &'static [Self] {
        &[Self::Active, Self::Stopped, Self::Error]
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SHARED CONFORMANCE TESTS
// ═══════════════════════════════════════════════════════════════════════════
