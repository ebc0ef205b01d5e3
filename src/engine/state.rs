//! The engine's warm-up state machine (C10).
//!
//! `WarmingUp` is re-entered after every resync, not just at startup: state
//! is rebuilt identically either way, and nothing downstream should be able
//! to tell a post-resync warm-up from the initial one.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Initializing,
    WarmingUp,
    Running,
}

impl EngineState {
    pub fn is_running(&self) -> bool {
        matches!(self, EngineState::Running)
    }
}

/// Tracks the warm-up deadline alongside the state itself, since
/// `WarmingUp` alone doesn't say when it ends.
#[derive(Debug, Clone, Copy)]
pub struct StateMachine {
    state: EngineState,
    warmup_until: Option<DateTime<Utc>>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { state: EngineState::Initializing, warmup_until: None }
    }
}

impl StateMachine {
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Enters (or re-enters, on resync) `WarmingUp` for `warmup_period_ms`.
    pub fn enter_warmup(&mut self, now: DateTime<Utc>, warmup_period_ms: i64) {
        self.state = EngineState::WarmingUp;
        self.warmup_until = Some(now + chrono::Duration::milliseconds(warmup_period_ms));
    }

    /// Called once per consumer tick; transitions `WarmingUp -> Running`
    /// once the deadline has passed. A no-op in every other state.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if self.state == EngineState::WarmingUp {
            if let Some(until) = self.warmup_until {
                if now >= until {
                    self.state = EngineState::Running;
                    self.warmup_until = None;
                }
            }
        }
    }

    /// `true` while in `WarmingUp`: state-building proceeds but detection
    /// events and persistence writes must be suppressed.
    pub fn is_warming_up(&self) -> bool {
        self.state == EngineState::WarmingUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn starts_initializing() {
        let sm = StateMachine::default();
        assert_eq!(sm.state(), EngineState::Initializing);
    }

    #[test]
    fn warmup_expires_into_running() {
        let mut sm = StateMachine::default();
        sm.enter_warmup(t(0), 10_000);
        sm.tick(t(5_000));
        assert!(sm.is_warming_up());
        sm.tick(t(10_000));
        assert_eq!(sm.state(), EngineState::Running);
    }

    #[test]
    fn resync_re_enters_warmup_from_running() {
        let mut sm = StateMachine::default();
        sm.enter_warmup(t(0), 1_000);
        sm.tick(t(1_000));
        assert_eq!(sm.state(), EngineState::Running);
        sm.enter_warmup(t(1_000), 1_000);
        assert!(sm.is_warming_up());
    }
}
