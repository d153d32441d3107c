//! Per-run event fan-out.
//!
//! One bounded broadcast channel per run. Sends never block the
//! orchestrator; a subscriber that falls behind skips the overwritten
//! events and the skip count is recorded. Late subscribers receive only
//! events emitted after they joined — there is no replay.

use crate::clock::SharedClock;
use crate::event::{EventData, TriageEvent};
use crate::types::RunId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub struct EventStream {
    clock: SharedClock,
    buffer: usize,
    heartbeat_ms: u64,
    grace_ms: u64,
    runs: Mutex<HashMap<RunId, RunChannel>>,
    skipped: Arc<AtomicU64>,
}

struct RunChannel {
    tx: broadcast::Sender<TriageEvent>,
    last_emit_ms: Arc<AtomicI64>,
    heartbeat: tokio::task::JoinHandle<()>,
}

impl EventStream {
    pub fn new(clock: SharedClock, buffer: usize, heartbeat_ms: u64, grace_ms: u64) -> Self {
        Self {
            clock,
            buffer,
            heartbeat_ms,
            grace_ms,
            runs: Mutex::new(HashMap::new()),
            skipped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the channel for a run and start its heartbeat. Must be called
    /// from within the runtime.
    pub fn register(&self, run_id: &str) {
        let (tx, _) = broadcast::channel(self.buffer);
        let last_emit_ms = Arc::new(AtomicI64::new(self.clock.now().timestamp_millis()));

        let heartbeat = tokio::spawn(heartbeat_loop(
            run_id.to_string(),
            tx.clone(),
            Arc::clone(&last_emit_ms),
            Arc::clone(&self.clock),
            self.heartbeat_ms,
        ));

        self.runs.lock().unwrap().insert(
            run_id.to_string(),
            RunChannel {
                tx,
                last_emit_ms,
                heartbeat,
            },
        );
    }

    /// Publish one event to the run's subscribers. Events for unknown runs
    /// are dropped — the run has already completed and closed its channel.
    pub fn publish(&self, run_id: &str, data: &EventData) {
        let runs = self.runs.lock().unwrap();
        let Some(channel) = runs.get(run_id) else {
            log::debug!("run={run_id} event after stream close, dropped");
            return;
        };
        let now = self.clock.now();
        channel.last_emit_ms.store(now.timestamp_millis(), Ordering::Relaxed);
        // No subscribers is fine: there is no replay contract.
        let _ = channel.tx.send(TriageEvent::new(run_id, now, data));
    }

    /// Subscribe to a live run. The first event delivered is `connected`.
    pub fn subscribe(&self, run_id: &str) -> Option<EventSubscription> {
        let runs = self.runs.lock().unwrap();
        let channel = runs.get(run_id)?;
        let connected = TriageEvent::new(run_id, self.clock.now(), &EventData::Connected {});
        Some(EventSubscription {
            rx: channel.tx.subscribe(),
            pending: Some(connected),
            skipped: Arc::clone(&self.skipped),
        })
    }

    /// Close a run's stream: after a small grace delay, send `completed`
    /// and drop the channel. Queued events already sent are still drained
    /// by subscribers.
    pub fn finalize(&self, run_id: &str) {
        let Some(channel) = self.runs.lock().unwrap().remove(run_id) else {
            return;
        };
        channel.heartbeat.abort();
        let run_id = run_id.to_string();
        let clock = Arc::clone(&self.clock);
        let grace = self.grace_ms;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(grace)).await;
            let _ = channel
                .tx
                .send(TriageEvent::new(&run_id, clock.now(), &EventData::Completed {}));
            // tx drops here, closing the channel for every subscriber.
        });
    }

    /// Total events skipped by lagging subscribers, process-wide.
    pub fn skipped_events(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

async fn heartbeat_loop(
    run_id: String,
    tx: broadcast::Sender<TriageEvent>,
    last_emit_ms: Arc<AtomicI64>,
    clock: SharedClock,
    heartbeat_ms: u64,
) {
    let probe = Duration::from_millis((heartbeat_ms / 4).max(1));
    loop {
        tokio::time::sleep(probe).await;
        let now = clock.now();
        let idle = now.timestamp_millis() - last_emit_ms.load(Ordering::Relaxed);
        if idle >= heartbeat_ms as i64 {
            last_emit_ms.store(now.timestamp_millis(), Ordering::Relaxed);
            let _ = tx.send(TriageEvent::new(&run_id, now, &EventData::Heartbeat {}));
        }
    }
}

/// A subscriber's view of one run's events, in emit order.
pub struct EventSubscription {
    rx: broadcast::Receiver<TriageEvent>,
    pending: Option<TriageEvent>,
    skipped: Arc<AtomicU64>,
}

impl EventSubscription {
    /// The next event, or None once the run's channel has closed.
    pub async fn next(&mut self) -> Option<TriageEvent> {
        if let Some(event) = self.pending.take() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.skipped.fetch_add(n, Ordering::Relaxed);
                    log::warn!("slow subscriber skipped {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
