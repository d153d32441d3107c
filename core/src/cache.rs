//! TTL-bound key/value layer: rate limiting, idempotency replay, OTP store.
//!
//! RULE: the engine never talks to the backing service directly. Everything
//! goes through `KvStore`, which models an external store with atomic
//! set-with-TTL and increment-with-conditional-reset. `MemoryKv` is the
//! in-process implementation used by the runner and the tests.

use crate::clock::SharedClock;
use crate::error::{TriageError, TriageResult};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("key/value store unavailable: {0}")]
    Unavailable(String),
}

pub type KvResult<T> = Result<T, KvError>;

/// Fixed-window counter state returned by `incr_window`.
#[derive(Debug, Clone, Copy)]
pub struct WindowCount {
    pub count: u64,
    pub reset_at: DateTime<Utc>,
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> KvResult<Option<String>>;
    fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> KvResult<()>;
    fn delete(&self, key: &str) -> KvResult<()>;

    /// Atomic increment with conditional reset: if the window has elapsed,
    /// the counter restarts at 1 with a fresh reset time.
    fn incr_window(&self, key: &str, window_ms: u64) -> KvResult<WindowCount>;
}

// ── In-memory backing store ──────────────────────────────────────────────────

struct KvEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct MemoryKv {
    clock: SharedClock,
    entries: Mutex<HashMap<String, KvEntry>>,
    windows: Mutex<HashMap<String, WindowCount>>,
}

impl MemoryKv {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> KvResult<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> KvResult<()> {
        let expires_at = self.clock.now() + Duration::milliseconds(ttl_ms as i64);
        self.entries.lock().unwrap().insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> KvResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn incr_window(&self, key: &str, window_ms: u64) -> KvResult<WindowCount> {
        let now = self.clock.now();
        let mut windows = self.windows.lock().unwrap();
        let state = windows
            .entry(key.to_string())
            .and_modify(|w| {
                if now >= w.reset_at {
                    w.count = 1;
                    w.reset_at = now + Duration::milliseconds(window_ms as i64);
                } else {
                    w.count += 1;
                }
            })
            .or_insert_with(|| WindowCount {
                count: 1,
                reset_at: now + Duration::milliseconds(window_ms as i64),
            });
        Ok(*state)
    }
}

// ── Rate limiter ─────────────────────────────────────────────────────────────

/// Outcome of an admitted request. Over-limit requests fail fast with
/// `TriageError::RateLimited` instead.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    clock: SharedClock,
    window_ms: u64,
    max_requests: u64,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, clock: SharedClock, window_ms: u64, max_requests: u64) -> Self {
        Self {
            kv,
            clock,
            window_ms,
            max_requests,
        }
    }

    /// Admit or reject one request for `client_id`. Fails open when the
    /// backing store is unavailable.
    pub fn check(&self, client_id: &str) -> TriageResult<RateDecision> {
        let key = format!("rate_limit:{client_id}");
        let window = match self.kv.incr_window(&key, self.window_ms) {
            Ok(w) => w,
            Err(err) => {
                log::warn!("rate limiter store unavailable, failing open: {err}");
                return Ok(RateDecision {
                    remaining: self.max_requests,
                    reset_at: self.clock.now(),
                });
            }
        };

        if window.count > self.max_requests {
            let now = self.clock.now();
            let millis_left = (window.reset_at - now).num_milliseconds().max(0) as u64;
            return Err(TriageError::RateLimited {
                retry_after_secs: millis_left.div_ceil(1000),
            });
        }

        Ok(RateDecision {
            remaining: self.max_requests - window.count,
            reset_at: window.reset_at,
        })
    }
}

// ── Idempotency cache ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct IdempotencyCache {
    kv: Arc<dyn KvStore>,
    ttl_ms: u64,
}

impl IdempotencyCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl_ms: u64) -> Self {
        Self { kv, ttl_ms }
    }

    /// Return the cached response for `(op, key)` if one is still live.
    /// Fails open: a store error reads as a miss.
    pub fn replay(&self, op: &str, key: &str) -> Option<String> {
        match self.kv.get(&format!("idempotency:{op}:{key}")) {
            Ok(hit) => hit,
            Err(err) => {
                log::warn!("idempotency store unavailable, treating as miss: {err}");
                None
            }
        }
    }

    /// Record a response payload for replay. Best-effort.
    pub fn record(&self, op: &str, key: &str, payload: &str) {
        if let Err(err) = self
            .kv
            .set_with_ttl(&format!("idempotency:{op}:{key}"), payload, self.ttl_ms)
        {
            log::warn!("idempotency store unavailable, response not cached: {err}");
        }
    }
}

// ── OTP store ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct OtpStore {
    kv: Arc<dyn KvStore>,
    ttl_ms: u64,
}

impl OtpStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl_ms: u64) -> Self {
        Self { kv, ttl_ms }
    }

    /// Issue a fresh 6-digit code for the card. The code is delivered to the
    /// customer out-of-band; it is returned here so the delivery channel can
    /// pick it up.
    pub fn issue(&self, card_id: &str) -> TriageResult<String> {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        self.kv
            .set_with_ttl(&format!("otp:{card_id}"), &code, self.ttl_ms)
            .map_err(|err| anyhow::anyhow!("otp store: {err}"))?;
        Ok(code)
    }

    /// Verify and consume. The stored code is deleted only on success, so a
    /// failed attempt does not burn the passcode.
    pub fn verify(&self, card_id: &str, code: &str) -> TriageResult<()> {
        let key = format!("otp:{card_id}");
        let stored = self
            .kv
            .get(&key)
            .map_err(|err| anyhow::anyhow!("otp store: {err}"))?;
        match stored {
            Some(expected) if expected == code => {
                let _ = self.kv.delete(&key);
                Ok(())
            }
            _ => Err(TriageError::OtpInvalid),
        }
    }
}
