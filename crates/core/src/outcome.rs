//! Outcome of a conditional mutation
//!
//! A conditional update or delete fetches the current entity, evaluates the
//! caller's condition against it and then attempts a guarded write that only
//! lands if nobody changed the stored value in between. Each stage can end
//! the call, which gives four observable outcomes.

/// Result of a conditional update or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutation {
    /// The entity did not exist; nothing was attempted
    Absent,
    /// The condition was false for the current value; nothing was written
    ConditionNotMet,
    /// Another writer changed the value between fetch and write; the
    /// mutation was abandoned
    Conflict,
    /// The guarded write landed
    Applied,
}

impl Mutation {
    /// Whether the write landed
    pub fn is_applied(&self) -> bool {
        matches!(self, Mutation::Applied)
    }

    /// Whether another writer won the race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Mutation::Conflict)
    }

    /// Tri-state reading used by callers of the `Option<bool>` API
    ///
    /// `None` when absent, `Some(false)` when a concurrent writer won, and
    /// `Some(true)` otherwise. A false condition reads as `Some(true)`: the
    /// check ran and doing nothing was the correct outcome.
    pub fn as_legacy(&self) -> Option<bool> {
        match self {
            Mutation::Absent => None,
            Mutation::ConditionNotMet => Some(true),
            Mutation::Conflict => Some(false),
            Mutation::Applied => Some(true),
        }
    }

    /// Map a guarded-write reply (`1` applied, `0` lost the race)
    pub fn from_guarded_write(landed: bool) -> Self {
        if landed {
            Mutation::Applied
        } else {
            Mutation::Conflict
        }
    }
}
