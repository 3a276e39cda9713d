use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
    time::{Duration, Instant},
};

use huddle_common::helpers::{env_u32, env_usize};

/// Largest WebSocket frame the gateway accepts.
pub const WS_MAX_TEXT_BYTES: usize = 64 * 1024;
/// Largest serialized `negotiate` payload.
pub const MAX_NEGOTIATE_PAYLOAD_BYTES: usize = 32 * 1024;
/// Messages queued per connection before new ones are dropped.
pub const WS_OUTBOX_CAPACITY: usize = 128;

#[derive(Clone, Copy)]
struct RateEntry {
    count: u32,
    window_start: Instant,
}

pub struct FixedWindowRateLimiter {
    max_requests: u32,
    window: Duration,
    max_keys: usize,
    entries: Mutex<HashMap<String, RateEntry>>,
}

impl FixedWindowRateLimiter {
    pub fn new(max_requests: u32, window: Duration, max_keys: usize) -> Self {
        Self {
            max_requests,
            window,
            max_keys,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut guard = match self.entries.lock() {
            Ok(v) => v,
            Err(_) => return false,
        };

        if guard.len() > self.max_keys {
            guard.retain(|_, entry| now.duration_since(entry.window_start) < self.window);
            if guard.len() > self.max_keys {
                return false;
            }
        }

        let entry = guard.entry(key.to_string()).or_insert(RateEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count = entry.count.saturating_add(1);
        entry.count <= self.max_requests
    }
}

/// Per-connection message budget. One instance lives in each socket loop.
pub struct MessageBudget {
    max_per_window: u32,
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl MessageBudget {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Configured from `HUDDLE_WS_MAX_MESSAGES_PER_MINUTE` (default 600).
    pub fn per_minute_from_env() -> Self {
        Self::new(
            env_u32("HUDDLE_WS_MAX_MESSAGES_PER_MINUTE", 600),
            Duration::from_secs(60),
        )
    }

    pub fn consume(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
        self.count <= self.max_per_window
    }
}

static WS_CONNECT_LIMITER: OnceLock<FixedWindowRateLimiter> = OnceLock::new();

/// Upgrades allowed per client IP per window.
pub fn allow_ws_connect(key: &str) -> bool {
    WS_CONNECT_LIMITER
        .get_or_init(|| {
            FixedWindowRateLimiter::new(
                env_u32("HUDDLE_WS_CONNECT_RATE_LIMIT", 60),
                Duration::from_secs(env_u32("HUDDLE_WS_CONNECT_RATE_WINDOW_SECS", 60).max(1) as u64),
                env_usize("HUDDLE_WS_CONNECT_RATE_MAX_KEYS", 50_000),
            )
        })
        .allow(key)
}

pub fn ws_connection_limit() -> usize {
    env_usize("HUDDLE_WS_MAX_CONNECTIONS", 4096)
}
