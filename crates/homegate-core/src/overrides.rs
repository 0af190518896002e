//! Monthly emergency overrides

use chrono::{DateTime, Local};
use homegate_api::{MONTHLY_OVERRIDE_LIMIT, OVERRIDE_DURATION_MINUTES};
use homegate_util::{whole_minutes_between, Clock, MonthKey};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{PolicyError, PolicyResult};

/// Emergency override quota and the lifecycle of the one active override.
///
/// The monthly counter resets lazily like [`crate::UsageLedger`]. Expiry is
/// read-triggered: [`OverrideLedger::is_active`] clears an override once its
/// hour is up.
#[derive(Debug)]
pub struct OverrideLedger {
    clock: Arc<dyn Clock>,
    overrides_used: u32,
    override_month: Option<MonthKey>,
    active: bool,
    started_at: Option<DateTime<Local>>,
}

impl OverrideLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::restore(clock, 0, None, false, None)
    }

    /// Rebuild from persisted fields
    pub fn restore(
        clock: Arc<dyn Clock>,
        overrides_used: u32,
        override_month: Option<MonthKey>,
        active: bool,
        started_at: Option<DateTime<Local>>,
    ) -> Self {
        Self {
            clock,
            overrides_used,
            override_month,
            // An active flag without a start time cannot expire; drop it
            active: active && started_at.is_some(),
            started_at: started_at.filter(|_| active),
        }
    }

    /// Overrides used this month
    pub fn used(&self) -> u32 {
        match self.override_month {
            Some(month) if month >= self.clock.current_month() => self.overrides_used,
            _ => 0,
        }
    }

    pub fn remaining(&self) -> u32 {
        MONTHLY_OVERRIDE_LIMIT.saturating_sub(self.used())
    }

    pub fn can_activate(&self) -> bool {
        self.remaining() > 0
    }

    /// Consume one override and start its hour. Returns the expiry time.
    ///
    /// Refused without consuming anything when the month's quota is gone.
    pub fn activate(&mut self) -> PolicyResult<DateTime<Local>> {
        if !self.can_activate() {
            return Err(PolicyError::OverrideQuotaExhausted);
        }

        let current = self.clock.current_month();
        match self.override_month {
            Some(month) if month == current => {}
            Some(month) if month > current => {
                warn!(
                    stored_month = %month,
                    current_month = %current,
                    "Clock moved backward; keeping override counter"
                );
            }
            previous => {
                debug!(previous = ?previous.map(|m| m.to_string()), current = %current, "Monthly override counter reset");
                self.overrides_used = 0;
                self.override_month = Some(current);
            }
        }

        let now = self.clock.now();
        self.overrides_used += 1;
        self.active = true;
        self.started_at = Some(now);

        let expires_at = now + chrono::Duration::minutes(i64::from(OVERRIDE_DURATION_MINUTES));
        info!(
            overrides_used = self.overrides_used,
            expires_at = %expires_at,
            "Emergency override activated"
        );
        Ok(expires_at)
    }

    /// Clear the override if its hour is up. Returns true when this call expired it.
    pub fn expire_if_due(&mut self) -> bool {
        let Some(started_at) = self.started_at.filter(|_| self.active) else {
            return false;
        };

        let (elapsed, skewed) = whole_minutes_between(started_at, self.clock.now());
        if skewed {
            warn!(started_at = %started_at, "Clock moved backward during override");
        }
        if elapsed < OVERRIDE_DURATION_MINUTES {
            return false;
        }

        self.active = false;
        self.started_at = None;
        info!(elapsed_minutes = elapsed, "Emergency override expired");
        true
    }

    /// Whether an override is running, expiring it first if due
    pub fn is_active(&mut self) -> bool {
        self.expire_if_due();
        self.active
    }

    /// Minutes left on the running override, 0 if none
    pub fn remaining_active_minutes(&mut self) -> u32 {
        if !self.is_active() {
            return 0;
        }
        let elapsed = self
            .started_at
            .map(|start| whole_minutes_between(start, self.clock.now()).0)
            .unwrap_or(0);
        OVERRIDE_DURATION_MINUTES.saturating_sub(elapsed)
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    /// Month key of the current counter, for display
    pub fn month(&self) -> MonthKey {
        match self.override_month {
            Some(month) if month >= self.clock.current_month() => month,
            _ => self.clock.current_month(),
        }
    }

    /// Raw fields for persistence: (used, month, active, started_at)
    pub fn stored(&self) -> (u32, Option<MonthKey>, bool, Option<DateTime<Local>>) {
        (
            self.overrides_used,
            self.override_month,
            self.active,
            self.started_at,
        )
    }
}
