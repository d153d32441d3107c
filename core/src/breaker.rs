//! Per-step circuit breakers.
//!
//! State is process-wide and in-memory: failures accumulate across runs,
//! and an open circuit fails the step for every run until the reset period
//! has passed. The first call after the reset period is the implicit
//! half-open probe — allowed through, and clearing the counter on success.

use crate::agent::Step;
use crate::clock::SharedClock;
use crate::error::TriageError;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct BreakerState {
    failures: u32,
    last_failure: Option<DateTime<Utc>>,
    open: bool,
}

pub struct BreakerRegistry {
    clock: SharedClock,
    fail_threshold: u32,
    reset_ms: u64,
    states: Mutex<HashMap<Step, BreakerState>>,
}

impl BreakerRegistry {
    pub fn new(clock: SharedClock, fail_threshold: u32, reset_ms: u64) -> Self {
        Self {
            clock,
            fail_threshold,
            reset_ms,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Gate a step invocation. `Err(CircuitOpen)` means the agent must not
    /// be invoked at all.
    pub fn check(&self, step: Step) -> Result<(), TriageError> {
        let states = self.states.lock().unwrap();
        let Some(state) = states.get(&step) else {
            return Ok(());
        };
        if !state.open {
            return Ok(());
        }
        let elapsed = state
            .last_failure
            .map(|at| self.clock.now() - at)
            .unwrap_or_else(Duration::zero);
        if elapsed >= Duration::milliseconds(self.reset_ms as i64) {
            // Reset period over: admit the probe call.
            return Ok(());
        }
        Err(TriageError::CircuitOpen { step: step.name() })
    }

    pub fn record_success(&self, step: Step) {
        let mut states = self.states.lock().unwrap();
        states.insert(step, BreakerState::default());
    }

    pub fn record_failure(&self, step: Step) {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(step).or_default();
        state.failures += 1;
        state.last_failure = Some(self.clock.now());
        if state.failures >= self.fail_threshold {
            if !state.open {
                log::warn!("circuit opened for step {}", step.name());
            }
            state.open = true;
        }
    }

    pub fn is_open(&self, step: Step) -> bool {
        self.states
            .lock()
            .unwrap()
            .get(&step)
            .map(|s| s.open)
            .unwrap_or(false)
    }
}
