//! Shared types for the homegated API

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Daily quota used when nothing else is configured
pub const DEFAULT_DAILY_LIMIT_MINUTES: u32 = 120;
/// Lower bound for the daily quota
pub const MIN_DAILY_LIMIT_MINUTES: u32 = 30;
/// Upper bound for the daily quota
pub const MAX_DAILY_LIMIT_MINUTES: u32 = 240;
/// Emergency overrides available per calendar month
pub const MONTHLY_OVERRIDE_LIMIT: u32 = 3;
/// How long one emergency override grants access
pub const OVERRIDE_DURATION_MINUTES: u32 = 60;
/// Radius of the home geofence
pub const GEOFENCE_RADIUS_METERS: f64 = 50.0;

/// Outcome of a policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Block,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Block)
    }
}

/// Derived policy state. Never persisted; recomputed from presence,
/// usage and override state on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyState {
    /// Away from home, no restriction applies
    Unrestricted,
    /// At home and access is denied
    RestrictedBlocking,
    /// At home, allowed because quota remains (only in `within_quota` mode)
    RestrictedAllowedByQuota,
    /// At home, allowed because an emergency override is running
    RestrictedAllowedByOverride,
}

impl PolicyState {
    pub fn verdict(&self) -> Verdict {
        match self {
            PolicyState::RestrictedBlocking => Verdict::Block,
            _ => Verdict::Allow,
        }
    }

    pub fn is_restricted(&self) -> bool {
        !matches!(self, PolicyState::Unrestricted)
    }
}

/// How the daily quota is applied while at home
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtHomeMode {
    /// At home the app is blocked unless an override is active; the quota
    /// only decides which message the user sees.
    #[default]
    AlwaysBlock,
    /// At home the app is allowed until the daily quota is used up.
    WithinQuota,
}

/// Why the app was blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    AtHome,
    DailyLimitExceeded,
}

/// Everything the notification/UI layer needs to render a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNotice {
    pub reason: BlockReason,
    pub message: String,
    /// Whether the user may activate an emergency override right now
    pub override_available: bool,
    pub overrides_remaining: u32,
}

/// Daily quota status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStatus {
    pub today: NaiveDate,
    pub daily_limit_minutes: u32,
    pub used_minutes: u32,
    pub remaining_minutes: u32,
    pub exceeded: bool,
}

/// Monthly emergency override status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideStatus {
    /// `YYYY-MM`
    pub month: String,
    pub used: u32,
    pub remaining: u32,
    pub monthly_limit: u32,
    pub active: bool,
    pub started_at: Option<DateTime<Local>>,
    pub active_remaining_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub active: bool,
    pub started_at: Option<DateTime<Local>>,
    /// Minutes accrued by the running session, not yet committed
    pub elapsed_minutes: u32,
}

/// Lifetime counters; never reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeStats {
    pub total_usage_minutes: u64,
    pub total_blocks_count: u64,
}

/// First-run setup progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupFlags {
    pub home_location_set: bool,
    pub monitor_enabled: bool,
    pub enforcement_enabled: bool,
}

impl SetupFlags {
    pub fn is_fully_configured(&self) -> bool {
        self.home_location_set && self.monitor_enabled && self.enforcement_enabled
    }
}

/// Configured home zone as shown to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeProfileView {
    pub latitude: f64,
    pub longitude: f64,
    pub wifi_ssid: String,
    pub radius_meters: f64,
}

/// Composed engine status for UI and notification rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub api_version: u32,
    pub generated_at: DateTime<Local>,
    pub at_home: bool,
    pub state: PolicyState,
    pub last_verdict: Verdict,
    pub at_home_mode: AtHomeMode,
    pub usage: UsageStatus,
    pub overrides: OverrideStatus,
    pub session: SessionStatus,
    pub lifetime: LifetimeStats,
    pub setup: SetupFlags,
    pub home: Option<HomeProfileView>,
    /// Present when the last verdict was a block
    pub block_notice: Option<BlockNotice>,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Monitoring agent - reports presence and app events, may activate overrides
    Agent,
    /// Local admin - can also change the quota, home profile and setup flags
    Admin,
    /// Read-only observer
    Observer,
}

impl ClientRole {
    pub fn can_report(&self) -> bool {
        matches!(self, ClientRole::Agent | ClientRole::Admin)
    }

    pub fn can_activate_override(&self) -> bool {
        matches!(self, ClientRole::Agent | ClientRole::Admin)
    }

    pub fn can_configure(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
    pub host_ok: bool,
    pub fully_configured: bool,
}
