//! Forward-only phase transition table for battle lifecycles.

use thiserror::Error;

use crate::state::battle::BattlePhase;

/// Events that can move a battle between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Countdown elapsed; the battle goes live.
    Activate,
    /// The current round ended with more rounds to play.
    BreakRound,
    /// The round break elapsed; the next round goes live.
    ResumeRound,
    /// The battle ends, manually or by auto-expiry.
    End,
    /// Administrative or failure override; valid from any non-ended phase.
    Cancel,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the battle was in when the invalid event was received.
    pub from: BattlePhase,
    /// The event that cannot be applied from this phase.
    pub event: LifecycleEvent,
}

/// Compute the phase reached by applying `event` in `from`.
///
/// Phases only move forward: countdown, active, round breaks, ended. The one
/// exception is [`LifecycleEvent::Cancel`], which short-circuits to ended from
/// anywhere so a stuck battle can always be shut down.
pub fn advance(from: BattlePhase, event: LifecycleEvent) -> Result<BattlePhase, InvalidTransition> {
    let next = match (from, event) {
        (BattlePhase::Countdown, LifecycleEvent::Activate) => BattlePhase::Active,
        (BattlePhase::Active, LifecycleEvent::BreakRound) => BattlePhase::RoundBreak,
        (BattlePhase::RoundBreak, LifecycleEvent::ResumeRound) => BattlePhase::Active,
        (BattlePhase::Active | BattlePhase::RoundBreak, LifecycleEvent::End) => BattlePhase::Ended,
        (phase, LifecycleEvent::Cancel) if phase != BattlePhase::Ended => BattlePhase::Ended,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}
