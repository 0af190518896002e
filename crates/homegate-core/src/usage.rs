//! Daily usage quota

use chrono::NaiveDate;
use homegate_api::{MAX_DAILY_LIMIT_MINUTES, MIN_DAILY_LIMIT_MINUTES};
use homegate_util::Clock;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{PolicyError, PolicyResult};

/// Minutes used today against a configurable daily limit.
///
/// The counter belongs to `last_usage_date`. Reads on a later day see zero
/// without touching the stored counter; the next write resets it.
#[derive(Debug)]
pub struct UsageLedger {
    clock: Arc<dyn Clock>,
    daily_limit_minutes: u32,
    daily_used_minutes: u32,
    last_usage_date: Option<NaiveDate>,
}

impl UsageLedger {
    pub fn new(clock: Arc<dyn Clock>, daily_limit_minutes: u32) -> Self {
        Self::restore(clock, daily_limit_minutes, 0, None)
    }

    /// Rebuild from persisted fields
    pub fn restore(
        clock: Arc<dyn Clock>,
        daily_limit_minutes: u32,
        daily_used_minutes: u32,
        last_usage_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            clock,
            daily_limit_minutes: clamp_daily_limit(daily_limit_minutes),
            daily_used_minutes,
            last_usage_date,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Minutes used today
    pub fn used(&self) -> u32 {
        match self.last_usage_date {
            // A stamp later than today means the clock went backward; keep counting
            // against it rather than handing out a fresh quota.
            Some(day) if day >= self.today() => self.daily_used_minutes,
            _ => 0,
        }
    }

    /// Add committed usage for today. Negative input is rejected.
    pub fn add_minutes(&mut self, minutes: i64) -> PolicyResult<u32> {
        if minutes < 0 {
            return Err(PolicyError::NegativeMinutes(minutes));
        }
        let minutes = u32::try_from(minutes).unwrap_or(u32::MAX);
        Ok(self.commit(minutes))
    }

    /// Add minutes; returns today's total
    pub(crate) fn commit(&mut self, minutes: u32) -> u32 {
        let today = self.today();
        match self.last_usage_date {
            Some(day) if day == today => {}
            Some(day) if day > today => {
                warn!(
                    stored_day = %day,
                    today = %today,
                    "Clock moved backward; keeping usage counter"
                );
            }
            previous => {
                debug!(previous = ?previous, today = %today, "Daily usage reset");
                self.daily_used_minutes = 0;
                self.last_usage_date = Some(today);
            }
        }

        self.daily_used_minutes = self.daily_used_minutes.saturating_add(minutes);
        self.daily_used_minutes
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit_minutes
    }

    /// Set the limit, clamped to the valid range; returns the effective value
    pub fn set_daily_limit(&mut self, minutes: u32) -> u32 {
        self.daily_limit_minutes = clamp_daily_limit(minutes);
        self.daily_limit_minutes
    }

    pub fn remaining(&self) -> u32 {
        self.daily_limit_minutes.saturating_sub(self.used())
    }

    pub fn exceeded(&self) -> bool {
        self.used() >= self.daily_limit_minutes
    }

    /// Raw counter and its day, for persistence
    pub fn stored(&self) -> (u32, Option<NaiveDate>) {
        (self.daily_used_minutes, self.last_usage_date)
    }
}

/// Clamp a requested daily limit into the supported range
pub fn clamp_daily_limit(minutes: u32) -> u32 {
    minutes.clamp(MIN_DAILY_LIMIT_MINUTES, MAX_DAILY_LIMIT_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use homegate_util::ManualClock;

    fn ledger_at(clock: &Arc<ManualClock>) -> UsageLedger {
        UsageLedger::new(clock.clone(), 120)
    }

    #[test]
    fn same_day_accumulates_next_day_resets() {
        let clock = Arc::new(ManualClock::at(2024, 5, 10, 9, 0));
        let mut ledger = ledger_at(&clock);

        ledger.add_minutes(10).unwrap();
        clock.advance_minutes(120);
        ledger.add_minutes(20).unwrap();
        assert_eq!(ledger.used(), 30);

        clock.advance_minutes(24 * 60);
        assert_eq!(ledger.used(), 0);
        assert_eq!(ledger.stored().0, 30, "read does not reset the counter");

        ledger.add_minutes(5).unwrap();
        assert_eq!(ledger.used(), 5);
    }

    #[test]
    fn remaining_plus_used_equals_limit() {
        let clock = Arc::new(ManualClock::at(2024, 5, 10, 9, 0));
        let mut ledger = ledger_at(&clock);

        for step in [0, 15, 45, 59, 1] {
            ledger.add_minutes(step).unwrap();
            assert_eq!(ledger.remaining() + ledger.used(), ledger.daily_limit());
        }
        assert_eq!(ledger.used(), 120);
        assert!(ledger.exceeded());

        ledger.add_minutes(30).unwrap();
        assert_eq!(ledger.remaining(), 0);
        assert!(ledger.exceeded());
    }

    #[test]
    fn exceeded_at_exact_limit() {
        let clock = Arc::new(ManualClock::at(2024, 5, 10, 9, 0));
        let mut ledger = ledger_at(&clock);

        ledger.add_minutes(119).unwrap();
        assert!(!ledger.exceeded());
        ledger.add_minutes(1).unwrap();
        assert!(ledger.exceeded());
    }

    #[test]
    fn negative_minutes_rejected() {
        let clock = Arc::new(ManualClock::at(2024, 5, 10, 9, 0));
        let mut ledger = ledger_at(&clock);
        ledger.add_minutes(12).unwrap();

        assert_eq!(
            ledger.add_minutes(-3),
            Err(PolicyError::NegativeMinutes(-3))
        );
        assert_eq!(ledger.used(), 12);
    }

    #[test]
    fn limit_is_clamped() {
        let clock = Arc::new(ManualClock::at(2024, 5, 10, 9, 0));
        let mut ledger = ledger_at(&clock);

        assert_eq!(ledger.set_daily_limit(10), 30);
        assert_eq!(ledger.set_daily_limit(500), 240);
        assert_eq!(ledger.set_daily_limit(90), 90);
        assert_eq!(UsageLedger::new(clock.clone(), 0).daily_limit(), 30);
    }

    #[test]
    fn backward_clock_keeps_usage() {
        let clock = Arc::new(ManualClock::at(2024, 5, 10, 0, 30));
        let mut ledger = ledger_at(&clock);
        ledger.add_minutes(50).unwrap();

        // Back into the previous day
        clock.advance_minutes(-60);
        assert_eq!(ledger.used(), 50);

        ledger.add_minutes(10).unwrap();
        assert_eq!(ledger.used(), 60);

        clock.advance_minutes(120);
        assert_eq!(ledger.used(), 60);
    }

    #[test]
    fn restore_from_stale_day() {
        let clock = Arc::new(ManualClock::at(2024, 5, 10, 9, 0));
        let yesterday = clock.today().pred_opt().unwrap();
        let ledger = UsageLedger::restore(clock.clone(), 120, 200, Some(yesterday));

        assert_eq!(ledger.used(), 0);
        assert!(!ledger.exceeded());
    }
}
