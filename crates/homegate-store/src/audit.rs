//! Audit event types

use chrono::{DateTime, Local};
use homegate_api::{BlockReason, SetupFlags};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    ServiceStarted,

    ServiceStopped,

    /// The app was blocked (recorded on each transition into block)
    Blocked {
        reason: BlockReason,
        used_minutes: u32,
        daily_limit_minutes: u32,
    },

    OverrideActivated {
        /// `YYYY-MM`
        month: String,
        overrides_used: u32,
    },

    OverrideExpired,

    /// A usage session was committed
    SessionEnded { minutes: u32, used_today: u32 },

    DailyLimitChanged { from: u32, to: u32 },

    HomeProfileChanged {
        latitude: f64,
        longitude: f64,
        wifi_configured: bool,
    },

    SetupFlagsChanged { flags: SetupFlags },

    /// Client connected
    ClientConnected {
        client_id: String,
        role: String,
        uid: Option<u32>,
    },

    /// Client disconnected
    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(homegate_util::now(), event)
    }

    /// Event stamped with an explicit time (the engine's clock)
    pub fn at(timestamp: DateTime<Local>, event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
