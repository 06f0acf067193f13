//! Multi-tier admission control in front of the pipeline.
//!
//! Four gates run in fixed order under one lock — UTC-day quota, per-client
//! burst window, global burst window, and conversation-id rotation — so a
//! check-then-increment race can never admit two requests on the same last
//! slot. Denials never increment counters.
//!
//! State lives in process memory and is sized for a single-container
//! deployment; multi-replica setups need an external shared counter store
//! (DynamoDB/Redis) instead of this type.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

/// Time source for the limiter, injectable so tests advance time
/// deterministically instead of sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Limiter thresholds. Defaults match production.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Requests per UTC calendar day per client.
    pub daily_limit: u32,
    /// Requests per burst window per client.
    pub burst_limit: u32,
    pub burst_window_secs: u64,
    /// Requests per burst window across all clients.
    pub global_burst_limit: u32,
    pub global_burst_window_secs: u64,
    /// Distinct new conversation ids per window per client. Defends against
    /// minting fresh ids to dodge the per-conversation limits.
    pub conversation_limit: u32,
    pub conversation_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            daily_limit: 100,
            burst_limit: 10,
            burst_window_secs: 60,
            global_burst_limit: 50,
            global_burst_window_secs: 60,
            conversation_limit: 20,
            conversation_window_secs: 3600,
        }
    }
}

impl RateLimitConfig {
    /// Loads thresholds from `RATE_LIMIT_DAILY`, `RATE_LIMIT_BURST`,
    /// `RATE_LIMIT_GLOBAL_BURST`, and `RATE_LIMIT_CONVERSATION_PER_IP`
    /// (reading `.env` first). Window lengths are fixed.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            daily_limit: crate::config::env_u32("RATE_LIMIT_DAILY", defaults.daily_limit),
            burst_limit: crate::config::env_u32("RATE_LIMIT_BURST", defaults.burst_limit),
            global_burst_limit: crate::config::env_u32(
                "RATE_LIMIT_GLOBAL_BURST",
                defaults.global_burst_limit,
            ),
            conversation_limit: crate::config::env_u32(
                "RATE_LIMIT_CONVERSATION_PER_IP",
                defaults.conversation_limit,
            ),
            ..defaults
        }
    }
}

/// Which gate denied a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("daily request limit reached")]
    Daily,
    #[error("too many requests in a short burst")]
    Burst,
    #[error("service is receiving too many requests right now")]
    Global,
    #[error("too many new conversations started recently")]
    Conversation,
}

impl DenyReason {
    /// Machine-readable label for logs and response bodies.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Daily => "daily",
            DenyReason::Burst => "burst",
            DenyReason::Global => "global",
            DenyReason::Conversation => "conversation",
        }
    }
}

/// Per-client limiter record.
#[derive(Debug, Default)]
struct ClientState {
    daily_count: u32,
    daily_window: Option<NaiveDate>,
    burst: Vec<DateTime<Utc>>,
    conversation_ids: FxHashSet<String>,
    conversation_window_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct LimiterState {
    clients: FxHashMap<String, ClientState>,
    global_burst: Vec<DateTime<Utc>>,
}

/// Point-in-time limiter counters, for monitoring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimiterStats {
    pub tracked_clients: usize,
    pub global_burst_count: usize,
    pub global_burst_limit: u32,
}

/// In-memory sliding-window rate limiter.
///
/// ```
/// use foliochat::limiter::{RateLimiter, RateLimitConfig};
///
/// let limiter = RateLimiter::new(RateLimitConfig::default());
/// assert!(limiter.check("203.0.113.7", "/chat", Some("conv-1")).is_ok());
/// ```
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
    clock: Box<dyn Clock>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    /// Constructs a limiter with an explicit time source.
    #[must_use]
    pub fn with_clock(config: RateLimitConfig, clock: impl Clock + 'static) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
            clock: Box::new(clock),
        }
    }

    /// Runs all four gates for one request. On denial, returns the first
    /// failing gate's reason and leaves every counter untouched.
    pub fn check(
        &self,
        client_id: &str,
        route: &str,
        conversation_id: Option<&str>,
    ) -> Result<(), DenyReason> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut state = self.state.lock();

        let client = state.clients.entry(client_id.to_string()).or_default();

        // 1. Daily quota, fixed UTC calendar day.
        if client.daily_window != Some(today) {
            client.daily_count = 0;
            client.daily_window = Some(today);
        }
        if client.daily_count >= self.config.daily_limit {
            tracing::debug!(client = client_id, route, "rate limited: daily");
            return Err(DenyReason::Daily);
        }

        // 2. Per-client burst, sliding window.
        let burst_window = TimeDelta::seconds(self.config.burst_window_secs as i64);
        client.burst.retain(|ts| now - *ts < burst_window);
        if client.burst.len() >= self.config.burst_limit as usize {
            tracing::debug!(client = client_id, route, "rate limited: burst");
            return Err(DenyReason::Burst);
        }

        // 3. Global burst, one shared window across all clients.
        let global_window = TimeDelta::seconds(self.config.global_burst_window_secs as i64);
        state.global_burst.retain(|ts| now - *ts < global_window);
        if state.global_burst.len() >= self.config.global_burst_limit as usize {
            tracing::debug!(client = client_id, route, "rate limited: global");
            return Err(DenyReason::Global);
        }

        // 4. Conversation-id rotation. Only *new* ids count toward the cap.
        let client = state.clients.entry(client_id.to_string()).or_default();
        if let Some(conversation_id) = conversation_id {
            let conv_window = TimeDelta::seconds(self.config.conversation_window_secs as i64);
            let expired = client
                .conversation_window_start
                .is_none_or(|start| now - start > conv_window);
            if expired {
                client.conversation_ids.clear();
                client.conversation_window_start = Some(now);
            }
            if !client.conversation_ids.contains(conversation_id) {
                if client.conversation_ids.len() >= self.config.conversation_limit as usize {
                    tracing::debug!(client = client_id, route, "rate limited: conversation");
                    return Err(DenyReason::Conversation);
                }
                client.conversation_ids.insert(conversation_id.to_string());
            }
        }

        // Admitted: now increment everything.
        client.daily_count += 1;
        client.burst.push(now);
        state.global_burst.push(now);
        Ok(())
    }

    /// Concrete wait hint in seconds for a denial reason: time to the next
    /// UTC midnight for the daily gate, the window length otherwise.
    #[must_use]
    pub fn retry_after(&self, reason: DenyReason) -> u64 {
        match reason {
            DenyReason::Daily => {
                let now = self.clock.now();
                let midnight = now
                    .date_naive()
                    .succ_opt()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc());
                match midnight {
                    Some(m) => (m - now).num_seconds().max(0) as u64,
                    None => 86_400,
                }
            }
            DenyReason::Burst => self.config.burst_window_secs,
            DenyReason::Global => self.config.global_burst_window_secs,
            DenyReason::Conversation => self.config.conversation_window_secs,
        }
    }

    /// Current counters, with expired global entries evicted first.
    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let global_window = TimeDelta::seconds(self.config.global_burst_window_secs as i64);
        state.global_burst.retain(|ts| now - *ts < global_window);
        LimiterStats {
            tracked_clients: state.clients.len(),
            global_burst_count: state.global_burst.len(),
            global_burst_limit: self.config.global_burst_limit,
        }
    }
}
