//! Human-readable rendering of daemon responses and events

use homegate_api::{BlockNotice, Event, EventPayload, ResponsePayload, StatusSnapshot};
use homegate_util::{format_datetime_full, format_day, format_minutes};
use std::fmt::Write;

pub fn render_payload(payload: &ResponsePayload) -> String {
    match payload {
        ResponsePayload::Status(status) => render_status(status),
        ResponsePayload::PresenceUpdated { at_home, changed } => format!(
            "Presence: {}{}",
            presence_label(*at_home),
            if *changed { " (changed)" } else { "" }
        ),
        ResponsePayload::Verdict {
            verdict,
            state,
            notice,
        } => {
            let mut out = format!("Verdict: {:?} ({:?})", verdict, state);
            if let Some(notice) = notice {
                let _ = write!(out, "\n{}", render_notice(notice));
            }
            out
        }
        ResponsePayload::SessionClosed { minutes } => {
            format!("Session closed, {} committed", format_minutes(*minutes))
        }
        ResponsePayload::OverrideActivated {
            overrides_remaining,
            expires_at,
        } => format!(
            "Override active until {}. {} overrides remaining this month.",
            format_datetime_full(expires_at),
            overrides_remaining
        ),
        ResponsePayload::DailyLimitSet { minutes } => {
            format!("Daily limit set to {} minutes", minutes)
        }
        ResponsePayload::HomeProfileSet => "Home profile saved".to_string(),
        ResponsePayload::SetupFlagsSet(flags) => format!(
            "Setup: home location {}, monitor {}, enforcement {}",
            yes_no(flags.home_location_set),
            yes_no(flags.monitor_enabled),
            yes_no(flags.enforcement_enabled)
        ),
        ResponsePayload::Subscribed { client_id } => format!("Subscribed as {}", client_id),
        ResponsePayload::Unsubscribed => "Unsubscribed".to_string(),
        ResponsePayload::Health(health) => format!(
            "live: {}, ready: {}, store: {}, host: {}, configured: {}",
            yes_no(health.live),
            yes_no(health.ready),
            ok_fail(health.store_ok),
            ok_fail(health.host_ok),
            yes_no(health.fully_configured)
        ),
        ResponsePayload::Pong => "pong".to_string(),
    }
}

pub fn render_status(status: &StatusSnapshot) -> String {
    let mut out = String::new();
    let usage = &status.usage;
    let overrides = &status.overrides;

    let _ = writeln!(out, "Location:  {}", presence_label(status.at_home));
    let _ = writeln!(
        out,
        "State:     {:?} (last verdict: {:?}, mode: {:?})",
        status.state, status.last_verdict, status.at_home_mode
    );
    let _ = writeln!(
        out,
        "Today:     {} used of {} on {}, {} remaining{}",
        format_minutes(usage.used_minutes),
        format_minutes(usage.daily_limit_minutes),
        format_day(usage.today),
        format_minutes(usage.remaining_minutes),
        if usage.exceeded { " (limit exceeded)" } else { "" }
    );
    let _ = writeln!(
        out,
        "Overrides: {}/{} used in {}",
        overrides.used, overrides.monthly_limit, overrides.month
    );
    if overrides.active {
        let _ = writeln!(
            out,
            "           active, {} left",
            format_minutes(overrides.active_remaining_minutes)
        );
    }
    match status.session.started_at {
        Some(started) if status.session.active => {
            let _ = writeln!(
                out,
                "Session:   running since {} ({})",
                format_datetime_full(&started),
                format_minutes(status.session.elapsed_minutes)
            );
        }
        _ => {
            let _ = writeln!(out, "Session:   none");
        }
    }
    let _ = writeln!(
        out,
        "Lifetime:  {} used, {} blocks",
        format_minutes(u32::try_from(status.lifetime.total_usage_minutes).unwrap_or(u32::MAX)),
        status.lifetime.total_blocks_count
    );
    match &status.home {
        Some(home) => {
            let _ = writeln!(
                out,
                "Home:      {:.5}, {:.5} within {} m{}",
                home.latitude,
                home.longitude,
                home.radius_meters,
                if home.wifi_ssid.is_empty() {
                    String::new()
                } else {
                    format!(", Wi-Fi \"{}\"", home.wifi_ssid)
                }
            );
        }
        None => {
            let _ = writeln!(out, "Home:      not set");
        }
    }
    if !status.setup.is_fully_configured() {
        let _ = writeln!(
            out,
            "Setup:     incomplete (home location {}, monitor {}, enforcement {})",
            yes_no(status.setup.home_location_set),
            yes_no(status.setup.monitor_enabled),
            yes_no(status.setup.enforcement_enabled)
        );
    }
    if let Some(notice) = &status.block_notice {
        let _ = writeln!(out, "{}", render_notice(notice));
    }

    out.trim_end().to_string()
}

pub fn render_notice(notice: &BlockNotice) -> String {
    if notice.override_available {
        format!(
            "Blocked: {} ({} overrides available)",
            notice.message, notice.overrides_remaining
        )
    } else {
        format!("Blocked: {} (no overrides left)", notice.message)
    }
}

pub fn render_event(event: &Event) -> String {
    let time = event.timestamp.format("%H:%M:%S");
    let body = match &event.payload {
        EventPayload::StateChanged(status) => format!(
            "state {:?}, {} of {} used",
            status.state,
            format_minutes(status.usage.used_minutes),
            format_minutes(status.usage.daily_limit_minutes)
        ),
        EventPayload::VerdictChanged { verdict, state } => {
            format!("verdict {:?} ({:?})", verdict, state)
        }
        EventPayload::Blocked(notice) => render_notice(notice),
        EventPayload::PresenceChanged { at_home } => {
            format!("presence {}", presence_label(*at_home))
        }
        EventPayload::OverrideActivated {
            overrides_remaining,
            expires_at,
        } => format!(
            "override active until {}, {} remaining",
            expires_at.format("%H:%M"),
            overrides_remaining
        ),
        EventPayload::OverrideExpired => "override expired".to_string(),
        EventPayload::SessionEnded {
            minutes,
            used_today,
        } => format!(
            "session ended after {}, {} used today",
            format_minutes(*minutes),
            format_minutes(*used_today)
        ),
        EventPayload::QuotaWarning { remaining_minutes } => {
            format!("{} remaining today", format_minutes(*remaining_minutes))
        }
        EventPayload::Notification { message } => message.clone(),
        EventPayload::Shutdown => "service shutting down".to_string(),
    };
    format!("[{}] {}", time, body)
}

fn presence_label(at_home: bool) -> &'static str {
    if at_home { "home" } else { "away" }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn ok_fail(value: bool) -> &'static str {
    if value { "ok" } else { "failing" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homegate_api::{BlockReason, PolicyState, Verdict};

    fn notice(override_available: bool) -> BlockNotice {
        BlockNotice {
            reason: BlockReason::DailyLimitExceeded,
            message: "Daily 120-minute limit exceeded".into(),
            override_available,
            overrides_remaining: if override_available { 1 } else { 0 },
        }
    }

    #[test]
    fn verdict_with_notice() {
        let text = render_payload(&ResponsePayload::Verdict {
            verdict: Verdict::Block,
            state: PolicyState::RestrictedBlocking,
            notice: Some(notice(true)),
        });
        assert!(text.starts_with("Verdict: Block (RestrictedBlocking)"));
        assert!(text.contains("Daily 120-minute limit exceeded (1 overrides available)"));
    }

    #[test]
    fn notice_without_overrides() {
        assert_eq!(
            render_notice(&notice(false)),
            "Blocked: Daily 120-minute limit exceeded (no overrides left)"
        );
    }

    #[test]
    fn presence_and_session_payloads() {
        assert_eq!(
            render_payload(&ResponsePayload::PresenceUpdated {
                at_home: true,
                changed: true
            }),
            "Presence: home (changed)"
        );
        assert_eq!(
            render_payload(&ResponsePayload::SessionClosed { minutes: 75 }),
            "Session closed, 1h 15m committed"
        );
    }

    #[test]
    fn events_render_with_time() {
        let text = render_event(&Event::new(EventPayload::QuotaWarning {
            remaining_minutes: 5,
        }));
        assert!(text.ends_with("] 5m remaining today"));
        assert!(text.starts_with('['));
    }
}
