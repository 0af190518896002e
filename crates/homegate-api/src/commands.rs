//! Command types for the homegated protocol

use chrono::{DateTime, Local};
use homegate_util::ClientId;
use serde::{Deserialize, Serialize};

use crate::{BlockNotice, ClientRole, PolicyState, Verdict, API_VERSION};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    /// Argument outside its valid domain (negative minutes, bad coordinates)
    InvalidArgument,
    /// Monthly override quota is used up
    OverrideUnavailable,
    PermissionDenied,
    RateLimited,
    UnsupportedVersion,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Get the composed engine status
    GetStatus,

    /// Presence monitor: set the at-home signal directly
    SetPresence { at_home: bool },

    /// Presence monitor: report a raw fix, presence is derived from the home profile
    ReportLocation {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        wifi_ssid: Option<String>,
    },

    /// Foreground-app monitor: decide allow/block.
    /// Uses the stored presence unless one is given.
    Evaluate {
        #[serde(default)]
        presence: Option<bool>,
    },

    /// Foreground-app monitor: the restricted app came to the foreground
    AppOpened,

    /// Foreground-app monitor: the restricted app left the foreground
    AppClosed,

    /// Activate a one-hour emergency override
    ActivateOverride,

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Get health status
    GetHealth,

    // Admin commands

    /// Change the daily quota; the value is clamped to the valid range
    SetDailyLimit { minutes: u32 },

    /// Replace the home profile
    SetHomeProfile {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        wifi_ssid: Option<String>,
    },

    /// Record setup progress of the monitoring and enforcement agents
    SetSetupFlags {
        #[serde(default)]
        monitor_enabled: Option<bool>,
        #[serde(default)]
        enforcement_enabled: Option<bool>,
    },

    /// Ping for keepalive
    Ping,
}

impl Command {
    /// Commands that only read state
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Command::GetStatus
                | Command::SubscribeEvents
                | Command::UnsubscribeEvents
                | Command::GetHealth
                | Command::Ping
        )
    }

    /// Whether `role` may issue this command
    pub fn permitted_for(&self, role: ClientRole) -> bool {
        match self {
            Command::SetDailyLimit { .. }
            | Command::SetHomeProfile { .. }
            | Command::SetSetupFlags { .. } => role.can_configure(),
            Command::ActivateOverride => role.can_activate_override(),
            cmd if cmd.is_read_only() => true,
            _ => role.can_report(),
        }
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Status(crate::StatusSnapshot),
    PresenceUpdated {
        at_home: bool,
        changed: bool,
    },
    Verdict {
        verdict: Verdict,
        state: PolicyState,
        notice: Option<BlockNotice>,
    },
    SessionClosed {
        minutes: u32,
    },
    OverrideActivated {
        overrides_remaining: u32,
        expires_at: DateTime<Local>,
    },
    DailyLimitSet {
        /// The effective limit after clamping
        minutes: u32,
    },
    HomeProfileSet,
    SetupFlagsSet(crate::SetupFlags),
    Subscribed {
        client_id: ClientId,
    },
    Unsubscribed,
    Health(crate::HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
