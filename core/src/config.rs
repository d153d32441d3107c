//! Engine configuration, loaded from the environment.
//!
//! Every tunable has a documented default; unset or unparsable variables
//! fall back to the default with a warning.

use crate::types::Cents;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// RATE_LIMIT_WINDOW_MS — fixed rate-limit window.
    pub rate_limit_window_ms: u64,
    /// RATE_LIMIT_MAX_REQUESTS — requests allowed per client per window.
    pub rate_limit_max_requests: u64,
    /// AGENT_TIMEOUT_MS — per-step deadline.
    pub agent_timeout_ms: u64,
    /// RUN_TIMEOUT_MS — overall wall-clock budget for one run.
    pub run_timeout_ms: u64,
    /// CIRCUIT_FAIL_THRESHOLD — consecutive failures before a step's circuit opens.
    pub circuit_fail_threshold: u32,
    /// CIRCUIT_RESET_MS — quiet period after which an open circuit admits a probe.
    pub circuit_reset_ms: u64,
    /// OTP_TTL_MS — lifetime of an issued one-time passcode.
    pub otp_ttl_ms: u64,
    /// IDEMPOTENCY_TTL_MS — lifetime of a cached action response.
    pub idempotency_ttl_ms: u64,
    /// BUSINESS_HOURS_UTC_OFFSET_MIN — offset applied before the Mon-Fri 09:00-17:00 check.
    pub business_hours_utc_offset_min: i32,
    /// HEARTBEAT_INTERVAL_MS — stream heartbeat cadence during silence.
    pub heartbeat_interval_ms: u64,
    /// STREAM_BUFFER — per-run event channel capacity.
    pub stream_buffer: usize,
    /// COMPLETED_GRACE_MS — delay between decision_finalized and completed.
    pub completed_grace_ms: u64,
    /// Freeze blocked above this suspect amount.
    pub freeze_amount_limit: Cents,
    /// Dispute blocked above this suspect amount.
    pub dispute_amount_limit: Cents,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 300,
            agent_timeout_ms: 1_000,
            run_timeout_ms: 5_000,
            circuit_fail_threshold: 3,
            circuit_reset_ms: 30_000,
            otp_ttl_ms: 300_000,
            idempotency_ttl_ms: 3_600_000,
            business_hours_utc_offset_min: 0,
            heartbeat_interval_ms: 30_000,
            stream_buffer: 256,
            completed_grace_ms: 150,
            freeze_amount_limit: 100_000,
            dispute_amount_limit: 500_000,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            rate_limit_window_ms: env_or("RATE_LIMIT_WINDOW_MS", d.rate_limit_window_ms),
            rate_limit_max_requests: env_or("RATE_LIMIT_MAX_REQUESTS", d.rate_limit_max_requests),
            agent_timeout_ms: env_or("AGENT_TIMEOUT_MS", d.agent_timeout_ms),
            run_timeout_ms: env_or("RUN_TIMEOUT_MS", d.run_timeout_ms),
            circuit_fail_threshold: env_or("CIRCUIT_FAIL_THRESHOLD", d.circuit_fail_threshold),
            circuit_reset_ms: env_or("CIRCUIT_RESET_MS", d.circuit_reset_ms),
            otp_ttl_ms: env_or("OTP_TTL_MS", d.otp_ttl_ms),
            idempotency_ttl_ms: env_or("IDEMPOTENCY_TTL_MS", d.idempotency_ttl_ms),
            business_hours_utc_offset_min: env_or(
                "BUSINESS_HOURS_UTC_OFFSET_MIN",
                d.business_hours_utc_offset_min,
            ),
            heartbeat_interval_ms: env_or("HEARTBEAT_INTERVAL_MS", d.heartbeat_interval_ms),
            stream_buffer: env_or("STREAM_BUFFER", d.stream_buffer),
            completed_grace_ms: env_or("COMPLETED_GRACE_MS", d.completed_grace_ms),
            freeze_amount_limit: d.freeze_amount_limit,
            dispute_amount_limit: d.dispute_amount_limit,
        }
    }

    /// Config with tight timings for unit tests.
    pub fn default_test() -> Self {
        Self {
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 300,
            agent_timeout_ms: 250,
            run_timeout_ms: 2_000,
            circuit_fail_threshold: 3,
            circuit_reset_ms: 30_000,
            otp_ttl_ms: 300_000,
            idempotency_ttl_ms: 3_600_000,
            business_hours_utc_offset_min: 0,
            heartbeat_interval_ms: 60_000,
            stream_buffer: 64,
            completed_grace_ms: 10,
            freeze_amount_limit: 100_000,
            dispute_amount_limit: 500_000,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("config: {key}={raw} is not parsable, using default");
                default
            }
        },
        Err(_) => default,
    }
}
