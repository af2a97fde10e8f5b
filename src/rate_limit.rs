//! Rate limit key selection and per-rule GCRA evaluation.

use crate::error::RateError;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Partition a request is rate limited under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// Authenticated user's stable identifier
    User(String),
    /// Client address, for anonymous traffic
    Address(String),
}

impl RateLimitKey {
    pub fn value(&self) -> &str {
        match self {
            RateLimitKey::User(id) | RateLimitKey::Address(id) => id,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, RateLimitKey::User(_))
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::User(id) => write!(f, "user:{}", id),
            RateLimitKey::Address(addr) => write!(f, "ip:{}", addr),
        }
    }
}

/// Pick the rate limit key: the user when authenticated, else the address.
///
/// Pure; enforcing a limit is the evaluator's job.
pub fn select_key(user_id: Option<&str>, address: &str) -> RateLimitKey {
    match user_id {
        Some(id) => RateLimitKey::User(id.to_string()),
        None => RateLimitKey::Address(address.to_string()),
    }
}

/// Allowed request count per period, written `count/period`.
///
/// Period is a unit (`s`, `m`, `h`, `d`) with an optional multiplier, so
/// `5/m`, `100/h` and `3/10s` are all valid. The count is at least one and
/// the period is a whole, non-zero number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rate {
    count: NonZeroU32,
    period: Duration,
}

impl Rate {
    pub fn new(count: u32, period: Duration) -> Result<Self, RateError> {
        let count = NonZeroU32::new(count).ok_or_else(|| RateError::Count(count.to_string()))?;
        if period.as_secs() == 0 || period.subsec_nanos() != 0 {
            return Err(RateError::Period(format!("{:?}", period)));
        }
        Ok(Self { count, period })
    }

    /// `count` requests per minute. Zero is treated as one.
    pub fn per_minute(count: u32) -> Self {
        Self {
            count: NonZeroU32::new(count).unwrap_or(NonZeroU32::MIN),
            period: Duration::from_secs(60),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.get()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// GCRA quota admitting a burst of `count` and replenishing one cell
    /// every `period / count`.
    pub fn quota(&self) -> Quota {
        let replenish = (self.period / self.count.get()).max(Duration::from_nanos(1));
        Quota::with_period(replenish)
            .unwrap_or_else(|| Quota::per_second(self.count))
            .allow_burst(self.count)
    }
}

impl FromStr for Rate {
    type Err = RateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, period) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| RateError::Format(s.to_string()))?;

        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| RateError::Count(s.to_string()))?;
        if count == 0 {
            return Err(RateError::Count(s.to_string()));
        }

        let period = period.trim();
        let unit = period
            .chars()
            .last()
            .ok_or_else(|| RateError::Period(s.to_string()))?;
        let unit_secs: u64 = match unit {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => return Err(RateError::Period(s.to_string())),
        };
        let multiplier = &period[..period.len() - unit.len_utf8()];
        let multiplier: u64 = if multiplier.is_empty() {
            1
        } else {
            multiplier
                .parse()
                .map_err(|_| RateError::Period(s.to_string()))?
        };
        if multiplier == 0 {
            return Err(RateError::Period(s.to_string()));
        }
        let secs = unit_secs
            .checked_mul(multiplier)
            .ok_or_else(|| RateError::Period(s.to_string()))?;

        Self::new(count, Duration::from_secs(secs))
    }
}

impl TryFrom<String> for Rate {
    type Error = RateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rate> for String {
    fn from(rate: Rate) -> Self {
        rate.to_string()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.period.as_secs();
        let (n, unit) = if secs % 86_400 == 0 {
            (secs / 86_400, "d")
        } else if secs % 3600 == 0 {
            (secs / 3600, "h")
        } else if secs % 60 == 0 {
            (secs / 60, "m")
        } else {
            (secs, "s")
        };
        if n == 1 {
            write!(f, "{}/{}", self.count, unit)
        } else {
            write!(f, "{}/{}{}", self.count, n, unit)
        }
    }
}

/// Result of a rate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateLimitOutcome {
    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitOutcome::Limited { .. })
    }
}

/// Keyed GCRA limiter over `dashmap`.
type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock, NoOpMiddleware>;

/// Limiters for one rule: one keyed by address, one keyed by user.
pub struct RuleLimiter {
    anonymous: KeyedLimiter,
    authenticated: KeyedLimiter,
    anonymous_rate: Rate,
    authenticated_rate: Rate,
    clock: DefaultClock,
    /// Counter for cleanup scheduling
    checks: AtomicU64,
}

impl RuleLimiter {
    pub fn new(anonymous_rate: Rate, authenticated_rate: Rate) -> Self {
        Self {
            anonymous: RateLimiter::dashmap(anonymous_rate.quota()),
            authenticated: RateLimiter::dashmap(authenticated_rate.quota()),
            anonymous_rate,
            authenticated_rate,
            clock: DefaultClock::default(),
            checks: AtomicU64::new(0),
        }
    }

    /// Rate applied to `key`.
    pub fn rate_for(&self, key: &RateLimitKey) -> Rate {
        if key.is_authenticated() {
            self.authenticated_rate
        } else {
            self.anonymous_rate
        }
    }

    /// Count a hit for `key` and report whether it is within its rate.
    pub fn check(&self, key: &RateLimitKey) -> RateLimitOutcome {
        self.maybe_cleanup();

        let limiter = if key.is_authenticated() {
            &self.authenticated
        } else {
            &self.anonymous
        };

        match limiter.check_key(&key.value().to_string()) {
            Ok(()) => RateLimitOutcome::Allowed,
            Err(not_until) => RateLimitOutcome::Limited {
                retry_after: not_until.wait_time_from(self.clock.now()),
            },
        }
    }

    /// Forget keys whose state has fully replenished.
    pub fn retain_recent(&self) {
        self.anonymous.retain_recent();
        self.authenticated.retain_recent();
    }

    pub fn tracked_keys(&self) -> usize {
        self.anonymous.len() + self.authenticated.len()
    }

    fn maybe_cleanup(&self) {
        let count = self.checks.fetch_add(1, Ordering::Relaxed);

        // Prune every 1000 checks
        if count % 1000 == 999 {
            self.retain_recent();
        }
    }
}
