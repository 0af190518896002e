//! Store trait definitions

use chrono::{DateTime, Local, NaiveDate};
use homegate_api::DEFAULT_DAILY_LIMIT_MINUTES;
use homegate_util::MonthKey;
use serde::{Deserialize, Serialize};

use crate::{AuditEvent, StoreResult};

/// Main store trait
pub trait Store: Send + Sync {
    // Policy state

    /// Load the last saved state, `None` if nothing was ever saved
    fn load_state(&self) -> StoreResult<Option<PersistedState>>;

    /// Overwrite the saved state
    fn save_state(&self, state: &PersistedState) -> StoreResult<()>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Flat snapshot of everything the policy engine needs to survive a restart.
///
/// Each field is stored under its own key. Missing keys take their default,
/// unknown keys are ignored, so older and newer records load without migrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub daily_limit_minutes: u32,
    pub daily_used_minutes: u32,
    pub last_usage_date: Option<NaiveDate>,

    pub session_active: bool,
    pub session_start: Option<DateTime<Local>>,

    pub overrides_used: u32,
    pub override_month: Option<MonthKey>,
    pub override_active: bool,
    pub override_start: Option<DateTime<Local>>,

    pub total_usage_minutes: u64,
    pub total_blocks_count: u64,

    /// Last presence reported before shutdown
    pub at_home: bool,

    pub home_latitude: f64,
    pub home_longitude: f64,
    pub home_wifi_ssid: String,

    pub home_location_set: bool,
    pub monitor_enabled: bool,
    pub enforcement_enabled: bool,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            daily_limit_minutes: DEFAULT_DAILY_LIMIT_MINUTES,
            daily_used_minutes: 0,
            last_usage_date: None,
            session_active: false,
            session_start: None,
            overrides_used: 0,
            override_month: None,
            override_active: false,
            override_start: None,
            total_usage_minutes: 0,
            total_blocks_count: 0,
            at_home: false,
            home_latitude: 0.0,
            home_longitude: 0.0,
            home_wifi_ssid: String::new(),
            home_location_set: false,
            monitor_enabled: false,
            enforcement_enabled: false,
        }
    }
}
