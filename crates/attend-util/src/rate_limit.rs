//! Request gating: per-client rate limiting and refresh debouncing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::ClientId;

/// Simple token-bucket rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum tokens (requests) per bucket
    max_tokens: u32,
    /// How often tokens are replenished
    refill_interval: Duration,
    clients: HashMap<ClientId, ClientBucket>,
}

#[derive(Debug)]
struct ClientBucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a new rate limiter allowing `max_requests` per `interval`
    pub fn new(max_requests: u32, interval: Duration) -> Self {
        Self {
            max_tokens: max_requests,
            refill_interval: interval,
            clients: HashMap::new(),
        }
    }

    /// Returns `true` if the request is allowed, `false` if rate limited
    pub fn check(&mut self, client_id: &ClientId) -> bool {
        let now = Instant::now();

        let bucket = self.clients.entry(client_id.clone()).or_insert(ClientBucket {
            tokens: self.max_tokens,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill);
        if elapsed >= self.refill_interval {
            let intervals = (elapsed.as_millis() / self.refill_interval.as_millis().max(1)) as u32;
            bucket.tokens = bucket
                .tokens
                .saturating_add(intervals.saturating_mul(self.max_tokens))
                .min(self.max_tokens);
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Remove a client's rate limit state
    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.clients.remove(client_id);
    }

    /// Clean up stale client entries
    pub fn cleanup(&mut self, stale_after: Duration) {
        let now = Instant::now();
        self.clients
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < stale_after);
    }
}

/// Why a refresh trigger was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDenied {
    /// Less than the minimum interval since the last accepted trigger
    Debounced,
    /// A previous cycle has not finished yet
    InFlight,
}

/// Gate for reload/refresh triggers.
///
/// Accepts a trigger only if the minimum interval elapsed since the last
/// accepted one and no cycle is in flight. Rejected triggers are dropped,
/// never queued.
#[derive(Debug, Clone)]
pub struct RefreshGate {
    min_interval: Duration,
    last_accepted: Arc<Mutex<Option<Instant>>>,
    in_flight: Arc<AtomicBool>,
}

impl RefreshGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Try to start a refresh cycle at `now`.
    ///
    /// The cycle stays in flight until the returned guard is dropped.
    pub fn try_begin(&self, now: Instant) -> Result<RefreshGuard, RefreshDenied> {
        let mut last = match self.last_accepted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if self.in_flight.load(Ordering::SeqCst) {
            return Err(RefreshDenied::InFlight);
        }
        if let Some(prev) = *last {
            if now.saturating_duration_since(prev) < self.min_interval {
                return Err(RefreshDenied::Debounced);
            }
        }

        let guard = self.try_enter()?;
        *last = Some(now);
        Ok(guard)
    }

    /// Start a cycle that is not a refresh trigger, such as fetching the
    /// next page. Only the in-flight check applies.
    pub fn try_enter(&self) -> Result<RefreshGuard, RefreshDenied> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RefreshDenied::InFlight)?;
        Ok(RefreshGuard {
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Marks a refresh cycle as finished when dropped
#[derive(Debug)]
pub struct RefreshGuard {
    in_flight: Arc<AtomicBool>,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}
