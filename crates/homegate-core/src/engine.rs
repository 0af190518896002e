//! Core policy engine

use chrono::{DateTime, Local, NaiveDate};
use homegate_api::{
    AtHomeMode, BlockNotice, BlockReason, LifetimeStats, OverrideStatus, PolicyState,
    SessionStatus, SetupFlags, StatusSnapshot, UsageStatus, Verdict, API_VERSION,
    MONTHLY_OVERRIDE_LIMIT,
};
use homegate_config::Policy;
use homegate_store::{AuditEvent, AuditEventType, PersistedState, Store, StoreResult};
use homegate_util::Clock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    CoreEvent, HomeProfile, LocationFix, OverrideLedger, PolicyResult, SessionTracker,
    UsageLedger,
};

/// The access policy engine.
///
/// Owns all policy state and decides allow/block for the restricted app from
/// presence, the daily quota and emergency overrides. Callers serialize access
/// (the service keeps it behind a single mutex). Every mutating call writes the
/// state through to the store; a failed write is logged and retried on the
/// next mutation while the in-memory state stays authoritative.
pub struct PolicyEngine {
    clock: Arc<dyn Clock>,
    store: Arc<dyn Store>,
    at_home_mode: AtHomeMode,
    quota_warnings_minutes: Vec<u32>,

    usage: UsageLedger,
    session: SessionTracker,
    overrides: OverrideLedger,
    stats: LifetimeStats,

    at_home: bool,
    home: Option<HomeProfile>,
    setup: SetupFlags,

    last_verdict: Verdict,
    last_state: PolicyState,
    warnings_issued: Option<(NaiveDate, Vec<u32>)>,
    pending_events: Vec<CoreEvent>,
    dirty: bool,
}

impl PolicyEngine {
    /// Create an engine, restoring persisted state if the store has any.
    ///
    /// Only an empty store starts from configuration. A store that cannot be
    /// read is an error: starting fresh would overwrite lifetime counters and
    /// spent overrides on the first save.
    pub fn new(
        policy: &Policy,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let state = match store.load_state()? {
            Some(state) => {
                info!("Restored persisted policy state");
                state
            }
            None => {
                info!("No persisted state, starting from configuration");
                seed_state(policy)
            }
        };

        Ok(Self::from_persisted(policy, state, store, clock))
    }

    /// Create an engine from an explicit state record
    pub fn from_persisted(
        policy: &Policy,
        state: PersistedState,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if state.session_active {
            warn!(
                started_at = ?state.session_start,
                "Discarding session left open by a previous run"
            );
        }

        let home = if state.home_location_set {
            HomeProfile::new(state.home_latitude, state.home_longitude, state.home_wifi_ssid.clone())
                .inspect_err(|e| warn!(error = %e, "Ignoring stored home profile"))
                .ok()
        } else {
            policy.home.as_ref().and_then(|home| {
                HomeProfile::from_config(home)
                    .inspect_err(|e| warn!(error = %e, "Ignoring configured home profile"))
                    .ok()
            })
        };

        let setup = SetupFlags {
            home_location_set: home.is_some(),
            monitor_enabled: state.monitor_enabled,
            enforcement_enabled: state.enforcement_enabled,
        };

        let engine = Self {
            usage: UsageLedger::restore(
                clock.clone(),
                state.daily_limit_minutes,
                state.daily_used_minutes,
                state.last_usage_date,
            ),
            session: SessionTracker::new(clock.clone()),
            overrides: OverrideLedger::restore(
                clock.clone(),
                state.overrides_used,
                state.override_month,
                state.override_active,
                state.override_start,
            ),
            stats: LifetimeStats {
                total_usage_minutes: state.total_usage_minutes,
                total_blocks_count: state.total_blocks_count,
            },
            at_home: state.at_home,
            home,
            setup,
            at_home_mode: policy.at_home_mode,
            quota_warnings_minutes: policy.quota_warnings_minutes.clone(),
            last_verdict: Verdict::Allow,
            last_state: PolicyState::Unrestricted,
            warnings_issued: None,
            pending_events: Vec::new(),
            dirty: false,
            clock,
            store,
        };

        info!(
            daily_limit = engine.usage.daily_limit(),
            used_today = engine.usage.used(),
            overrides_remaining = engine.overrides.remaining(),
            at_home = engine.at_home,
            mode = ?engine.at_home_mode,
            "Policy engine initialized"
        );

        engine
    }

    // Decision

    /// Decide allow/block for the given presence and apply transition side
    /// effects: entering block ends the running session and counts a block,
    /// leaving block starts a session.
    pub fn evaluate(&mut self, at_home: bool) -> Verdict {
        let state = self.compute_state(at_home);
        let verdict = state.verdict();
        let previous = self.last_verdict;

        self.last_state = state;
        if verdict != previous {
            self.last_verdict = verdict;
            self.pending_events
                .push(CoreEvent::VerdictChanged { verdict, state });

            match verdict {
                Verdict::Block => self.enter_block(),
                Verdict::Allow => {
                    self.session.start();
                }
            }
            self.dirty = true;
        }

        debug!(at_home, state = ?state, verdict = ?verdict, "Evaluated");
        self.persist_if_dirty();
        verdict
    }

    /// Evaluate with the stored presence
    pub fn evaluate_current(&mut self) -> Verdict {
        self.evaluate(self.at_home)
    }

    fn compute_state(&mut self, at_home: bool) -> PolicyState {
        // Read before presence so an elapsed override expires while away too
        let override_active = self.override_active();
        if !at_home {
            return PolicyState::Unrestricted;
        }
        if override_active {
            return PolicyState::RestrictedAllowedByOverride;
        }
        if self.quota_exhausted() {
            return PolicyState::RestrictedBlocking;
        }
        match self.at_home_mode {
            AtHomeMode::AlwaysBlock => PolicyState::RestrictedBlocking,
            AtHomeMode::WithinQuota => PolicyState::RestrictedAllowedByQuota,
        }
    }

    fn quota_exhausted(&self) -> bool {
        match self.at_home_mode {
            AtHomeMode::AlwaysBlock => self.usage.exceeded(),
            // Count the running session so it cannot outlast the quota
            AtHomeMode::WithinQuota => self.projected_used() >= self.usage.daily_limit(),
        }
    }

    fn projected_used(&self) -> u32 {
        self.usage
            .used()
            .saturating_add(self.session.elapsed_minutes())
    }

    fn enter_block(&mut self) {
        self.end_session();
        self.stats.total_blocks_count = self.stats.total_blocks_count.saturating_add(1);

        let notice = self.build_notice();
        self.audit(AuditEventType::Blocked {
            reason: notice.reason,
            used_minutes: self.usage.used(),
            daily_limit_minutes: self.usage.daily_limit(),
        });
        info!(
            reason = ?notice.reason,
            total_blocks = self.stats.total_blocks_count,
            "Restricted app blocked"
        );
        self.pending_events.push(CoreEvent::Blocked(notice));
    }

    fn end_session(&mut self) -> u32 {
        if !self.session.is_active() {
            return 0;
        }

        let minutes = self.session.end(&mut self.usage, &mut self.stats);
        let used_today = self.usage.used();
        self.audit(AuditEventType::SessionEnded {
            minutes,
            used_today,
        });
        self.pending_events.push(CoreEvent::SessionEnded {
            minutes,
            used_today,
        });
        self.dirty = true;
        minutes
    }

    fn override_active(&mut self) -> bool {
        self.refresh_override();
        self.overrides.is_active()
    }

    fn refresh_override(&mut self) {
        if self.overrides.expire_if_due() {
            self.audit(AuditEventType::OverrideExpired);
            self.pending_events.push(CoreEvent::OverrideExpired);
            self.dirty = true;
        }
    }

    fn build_notice(&self) -> BlockNotice {
        let (reason, message) = if self.quota_exhausted() {
            (
                BlockReason::DailyLimitExceeded,
                format!("Daily {}-minute limit exceeded", self.usage.daily_limit()),
            )
        } else {
            (
                BlockReason::AtHome,
                format!(
                    "Restricted at home. {} minutes remaining today",
                    self.usage.remaining()
                ),
            )
        };

        BlockNotice {
            reason,
            message,
            override_available: self.overrides.can_activate(),
            overrides_remaining: self.overrides.remaining(),
        }
    }

    // Collaborator inputs

    /// Store the presence signal. Returns true if it changed.
    pub fn set_presence(&mut self, at_home: bool) -> bool {
        if self.at_home == at_home {
            return false;
        }

        self.at_home = at_home;
        info!(at_home, "Presence changed");
        self.pending_events
            .push(CoreEvent::PresenceChanged { at_home });
        self.dirty = true;
        self.persist_if_dirty();
        true
    }

    /// Derive presence from a raw fix and store it. Without a home profile
    /// every location counts as away.
    pub fn report_location(&mut self, fix: &LocationFix) -> bool {
        let at_home = match &self.home {
            Some(home) => home.contains(fix),
            None => {
                debug!("No home profile configured, treating location as away");
                false
            }
        };
        self.set_presence(at_home);
        at_home
    }

    /// The restricted app came to the foreground
    pub fn app_opened(&mut self) -> Verdict {
        let verdict = self.evaluate_current();
        if verdict.is_allowed() && self.session.start() {
            self.dirty = true;
            self.persist_if_dirty();
        }
        verdict
    }

    /// The restricted app left the foreground; returns committed minutes
    pub fn app_closed(&mut self) -> u32 {
        let minutes = self.end_session();
        self.persist_if_dirty();
        minutes
    }

    // Admin and user actions

    /// Set the daily limit (clamped); returns the effective value
    pub fn set_daily_limit(&mut self, minutes: u32) -> u32 {
        let from = self.usage.daily_limit();
        let to = self.usage.set_daily_limit(minutes);
        if to != minutes {
            debug!(requested = minutes, effective = to, "Daily limit clamped");
        }

        if to != from {
            info!(from, to, "Daily limit changed");
            self.audit(AuditEventType::DailyLimitChanged { from, to });
            self.dirty = true;
            self.persist_if_dirty();
        }
        to
    }

    /// Activate a one-hour emergency override; returns its expiry time
    pub fn activate_override(&mut self) -> PolicyResult<DateTime<Local>> {
        self.refresh_override();

        let expires_at = self
            .overrides
            .activate()
            .inspect_err(|e| warn!(error = %e, "Override activation refused"))?;

        self.audit(AuditEventType::OverrideActivated {
            month: self.overrides.month().to_string(),
            overrides_used: self.overrides.used(),
        });
        self.pending_events.push(CoreEvent::OverrideActivated {
            overrides_remaining: self.overrides.remaining(),
            expires_at,
        });
        self.dirty = true;
        self.persist_if_dirty();
        Ok(expires_at)
    }

    /// Replace the home profile
    pub fn set_home_profile(&mut self, profile: HomeProfile) {
        info!(
            latitude = profile.latitude(),
            longitude = profile.longitude(),
            wifi = !profile.wifi_ssid().is_empty(),
            "Home profile set"
        );
        self.audit(AuditEventType::HomeProfileChanged {
            latitude: profile.latitude(),
            longitude: profile.longitude(),
            wifi_configured: !profile.wifi_ssid().is_empty(),
        });

        self.home = Some(profile);
        self.setup.home_location_set = true;
        self.dirty = true;
        self.persist_if_dirty();
    }

    /// Update agent setup progress; `None` leaves a flag unchanged
    pub fn set_setup_flags(
        &mut self,
        monitor_enabled: Option<bool>,
        enforcement_enabled: Option<bool>,
    ) -> SetupFlags {
        let before = self.setup;
        if let Some(enabled) = monitor_enabled {
            self.setup.monitor_enabled = enabled;
        }
        if let Some(enabled) = enforcement_enabled {
            self.setup.enforcement_enabled = enabled;
        }

        if self.setup != before {
            info!(flags = ?self.setup, "Setup flags changed");
            self.audit(AuditEventType::SetupFlagsChanged { flags: self.setup });
            self.dirty = true;
            self.persist_if_dirty();
        }
        self.setup
    }

    // Periodic work

    /// Surface time-driven events: override expiry, a block that became due
    /// while the app is in use, and quota warnings. Returns all pending events.
    pub fn tick(&mut self) -> Vec<CoreEvent> {
        self.refresh_override();

        if self.session.is_active()
            && self.last_verdict.is_allowed()
            && self.compute_state(self.at_home).verdict().is_blocked()
        {
            self.evaluate_current();
        }

        self.check_quota_warnings();
        self.persist_if_dirty();
        self.take_events()
    }

    fn check_quota_warnings(&mut self) {
        if !self.session.is_active() {
            return;
        }

        let today = self.usage.today();
        let remaining = self
            .usage
            .daily_limit()
            .saturating_sub(self.projected_used());

        if self
            .warnings_issued
            .as_ref()
            .is_none_or(|(day, _)| *day != today)
        {
            self.warnings_issued = Some((today, Vec::new()));
        }
        let Some((_, issued)) = self.warnings_issued.as_mut() else {
            return;
        };

        let crossed: Vec<u32> = self
            .quota_warnings_minutes
            .iter()
            .copied()
            .filter(|threshold| remaining <= *threshold && !issued.contains(threshold))
            .collect();
        if crossed.is_empty() {
            return;
        }

        issued.extend(crossed);
        info!(remaining_minutes = remaining, "Quota warning");
        self.pending_events.push(CoreEvent::QuotaWarning {
            remaining_minutes: remaining,
        });
    }

    /// Drain events produced since the last call
    pub fn take_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.pending_events)
    }

    // Status

    pub fn is_at_home(&self) -> bool {
        self.at_home
    }

    pub fn last_verdict(&self) -> Verdict {
        self.last_verdict
    }

    /// State of the most recent evaluation
    pub fn last_state(&self) -> PolicyState {
        self.last_state
    }

    /// State the engine would report for the stored presence right now
    pub fn current_state(&mut self) -> PolicyState {
        self.compute_state(self.at_home)
    }

    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    pub fn overrides_remaining(&self) -> u32 {
        self.overrides.remaining()
    }

    pub fn stats(&self) -> LifetimeStats {
        self.stats
    }

    pub fn setup_flags(&self) -> SetupFlags {
        self.setup
    }

    pub fn home_profile(&self) -> Option<&HomeProfile> {
        self.home.as_ref()
    }

    /// Notice for the UI while the app is blocked
    pub fn block_notice(&mut self) -> Option<BlockNotice> {
        self.refresh_override();
        self.last_verdict.is_blocked().then(|| self.build_notice())
    }

    /// Composed status for UI and notification rendering
    pub fn status(&mut self) -> StatusSnapshot {
        let state = self.current_state();
        let override_active = self.overrides.is_active();
        let block_notice = self.block_notice();

        StatusSnapshot {
            api_version: API_VERSION,
            generated_at: self.clock.now(),
            at_home: self.at_home,
            state,
            last_verdict: self.last_verdict,
            at_home_mode: self.at_home_mode,
            usage: UsageStatus {
                today: self.usage.today(),
                daily_limit_minutes: self.usage.daily_limit(),
                used_minutes: self.usage.used(),
                remaining_minutes: self.usage.remaining(),
                exceeded: self.usage.exceeded(),
            },
            overrides: OverrideStatus {
                month: self.overrides.month().to_string(),
                used: self.overrides.used(),
                remaining: self.overrides.remaining(),
                monthly_limit: MONTHLY_OVERRIDE_LIMIT,
                active: override_active,
                started_at: self.overrides.started_at(),
                active_remaining_minutes: self.overrides.remaining_active_minutes(),
            },
            session: SessionStatus {
                active: self.session.is_active(),
                started_at: self.session.current().map(|s| s.started_at),
                elapsed_minutes: self.session.elapsed_minutes(),
            },
            lifetime: self.stats,
            setup: self.setup,
            home: self.home.as_ref().map(HomeProfile::to_view),
            block_notice,
        }
    }

    // Persistence

    /// Flat record of the current state
    pub fn to_persisted(&self) -> PersistedState {
        let (daily_used_minutes, last_usage_date) = self.usage.stored();
        let (overrides_used, override_month, override_active, override_start) =
            self.overrides.stored();

        PersistedState {
            daily_limit_minutes: self.usage.daily_limit(),
            daily_used_minutes,
            last_usage_date,
            session_active: self.session.is_active(),
            session_start: self.session.current().map(|s| s.started_at),
            overrides_used,
            override_month,
            override_active,
            override_start,
            total_usage_minutes: self.stats.total_usage_minutes,
            total_blocks_count: self.stats.total_blocks_count,
            at_home: self.at_home,
            home_latitude: self.home.as_ref().map_or(0.0, HomeProfile::latitude),
            home_longitude: self.home.as_ref().map_or(0.0, HomeProfile::longitude),
            home_wifi_ssid: self
                .home
                .as_ref()
                .map(|h| h.wifi_ssid().to_string())
                .unwrap_or_default(),
            home_location_set: self.setup.home_location_set,
            monitor_enabled: self.setup.monitor_enabled,
            enforcement_enabled: self.setup.enforcement_enabled,
        }
    }

    /// Save now regardless of pending changes; returns true on success
    pub fn flush(&mut self) -> bool {
        self.dirty = true;
        self.persist_if_dirty();
        !self.dirty
    }

    fn persist_if_dirty(&mut self) {
        if !self.dirty {
            return;
        }
        match self.store.save_state(&self.to_persisted()) {
            Ok(()) => self.dirty = false,
            Err(e) => warn!(error = %e, "Failed to persist policy state, will retry"),
        }
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self
            .store
            .append_audit(AuditEvent::at(self.clock.now(), event))
        {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}

/// Initial state when nothing was persisted yet
fn seed_state(policy: &Policy) -> PersistedState {
    PersistedState {
        daily_limit_minutes: policy.daily_limit_minutes,
        ..Default::default()
    }
}

/// Text for the notification shown after an override is granted
pub fn override_granted_message(overrides_remaining: u32) -> String {
    format!(
        "1 hour access granted. {} overrides remaining this month.",
        overrides_remaining
    )
}
