//! Usage session tracking

use chrono::{DateTime, Local};
use homegate_api::LifetimeStats;
use homegate_util::{whole_minutes_between, Clock, SessionId};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::UsageLedger;

/// A running usage session
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub session_id: SessionId,
    pub started_at: DateTime<Local>,
}

/// Tracks at most one in-progress session of the restricted app.
///
/// Minutes only reach the [`UsageLedger`] when the session ends. A session
/// that is never ended contributes nothing.
#[derive(Debug)]
pub struct SessionTracker {
    clock: Arc<dyn Clock>,
    current: Option<ActiveSession>,
}

impl SessionTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            current: None,
        }
    }

    /// Start a session unless one is already running; returns true if started
    pub fn start(&mut self) -> bool {
        if self.current.is_some() {
            return false;
        }

        let session = ActiveSession {
            session_id: SessionId::new(),
            started_at: self.clock.now(),
        };
        debug!(session_id = %session.session_id, started_at = %session.started_at, "Session started");
        self.current = Some(session);
        true
    }

    /// End the running session, committing its whole minutes to `usage` and
    /// the lifetime total. Returns the committed minutes (0 if idle).
    pub fn end(&mut self, usage: &mut UsageLedger, stats: &mut LifetimeStats) -> u32 {
        let Some(session) = self.current.take() else {
            return 0;
        };

        let (minutes, skewed) = whole_minutes_between(session.started_at, self.clock.now());
        if skewed {
            warn!(
                session_id = %session.session_id,
                started_at = %session.started_at,
                "Clock moved backward during session; counting 0 minutes"
            );
        }

        let used_today = usage.commit(minutes);
        stats.total_usage_minutes = stats.total_usage_minutes.saturating_add(u64::from(minutes));

        info!(
            session_id = %session.session_id,
            minutes,
            used_today,
            "Session ended"
        );
        minutes
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<&ActiveSession> {
        self.current.as_ref()
    }

    /// Whole minutes the running session would commit if ended now
    pub fn elapsed_minutes(&self) -> u32 {
        self.current
            .as_ref()
            .map(|s| whole_minutes_between(s.started_at, self.clock.now()).0)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homegate_util::ManualClock;

    fn setup() -> (Arc<ManualClock>, SessionTracker, UsageLedger, LifetimeStats) {
        let clock = Arc::new(ManualClock::at(2024, 6, 1, 14, 0));
        let tracker = SessionTracker::new(clock.clone());
        let usage = UsageLedger::new(clock.clone(), 120);
        (clock, tracker, usage, LifetimeStats::default())
    }

    #[test]
    fn twenty_five_minute_session_accrues() {
        let (clock, mut tracker, mut usage, mut stats) = setup();

        assert!(tracker.start());
        clock.advance(chrono::Duration::seconds(25 * 60 + 40));

        assert_eq!(tracker.end(&mut usage, &mut stats), 25);
        assert_eq!(usage.used(), 25);
        assert_eq!(stats.total_usage_minutes, 25);
        assert!(!tracker.is_active());
    }

    #[test]
    fn start_is_idempotent() {
        let (clock, mut tracker, mut usage, mut stats) = setup();

        assert!(tracker.start());
        let first = tracker.current().unwrap().started_at;
        clock.advance_minutes(10);
        assert!(!tracker.start());
        assert_eq!(tracker.current().unwrap().started_at, first);

        clock.advance_minutes(5);
        assert_eq!(tracker.end(&mut usage, &mut stats), 15);
    }

    #[test]
    fn end_without_session_is_zero() {
        let (_clock, mut tracker, mut usage, mut stats) = setup();
        assert_eq!(tracker.end(&mut usage, &mut stats), 0);
        assert_eq!(usage.used(), 0);
        assert_eq!(stats.total_usage_minutes, 0);
    }

    #[test]
    fn backward_clock_commits_zero() {
        let (clock, mut tracker, mut usage, mut stats) = setup();

        tracker.start();
        clock.advance_minutes(-30);
        assert_eq!(tracker.end(&mut usage, &mut stats), 0);
        assert_eq!(usage.used(), 0);
    }

    #[test]
    fn elapsed_is_live() {
        let (clock, mut tracker, _usage, _stats) = setup();
        assert_eq!(tracker.elapsed_minutes(), 0);

        tracker.start();
        clock.advance_minutes(7);
        assert_eq!(tracker.elapsed_minutes(), 7);
    }

    #[test]
    fn dropped_session_loses_minutes() {
        let (clock, mut tracker, usage, _stats) = setup();

        tracker.start();
        clock.advance_minutes(40);
        drop(tracker);

        assert_eq!(usage.used(), 0);
    }
}
