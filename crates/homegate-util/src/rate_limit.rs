//! Rate limiting for IPC clients

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ClientId;

/// Token-bucket rate limiter keyed by IPC client.
///
/// The presence monitor reports every 15-30 seconds, but the foreground-app
/// monitor can burst on UI events, so each client gets its own bucket.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    refill_interval: Duration,
    buckets: HashMap<ClientId, Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateLimiter {
    /// Allow `max_requests` per `interval` for each client
    pub fn new(max_requests: u32, interval: Duration) -> Self {
        Self {
            capacity: max_requests,
            refill_interval: interval,
            buckets: HashMap::new(),
        }
    }

    /// Check if a request from `client_id` is allowed right now
    pub fn check(&mut self, client_id: &ClientId) -> bool {
        self.check_at(client_id, Instant::now())
    }

    /// Check if a request is allowed at the given instant
    pub fn check_at(&mut self, client_id: &ClientId, now: Instant) -> bool {
        let capacity = self.capacity;
        let bucket = self.buckets.entry(client_id.clone()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if elapsed >= self.refill_interval && !self.refill_interval.is_zero() {
            let intervals = elapsed.as_nanos() / self.refill_interval.as_nanos();
            let intervals = u32::try_from(intervals).unwrap_or(u32::MAX);
            bucket.tokens = bucket
                .tokens
                .saturating_add(intervals.saturating_mul(capacity))
                .min(capacity);
            bucket.last_refill = now;
        }

        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }

    /// Forget a client's bucket (on disconnect)
    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.buckets.remove(client_id);
    }

    /// Drop buckets that have not refilled within `stale_after`
    pub fn cleanup(&mut self, stale_after: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < stale_after);
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}
