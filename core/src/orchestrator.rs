//! The triage orchestrator — the heart of the engine.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. get_profile      (critical)
//!   2. recent_tx        (critical)
//!   3. risk_signals
//!   4. kb_lookup
//!   5. decide
//!   6. propose_action
//!   7. summarize        (post-decision, best-effort, untraced)
//!
//! RULES:
//!   - Steps execute in plan order, each under the per-step deadline.
//!   - A failed non-critical step is replaced by its deterministic fallback.
//!   - A failed critical step short-circuits straight to composition.
//!   - Every step leaves a redacted trace with a contiguous seq.
//!   - Raw step errors never reach clients; they become traces and events.

use crate::agent::{fallback_for, Step, StepContext, StepDetail, TriageAgent};
use crate::breaker::BreakerRegistry;
use crate::cache::{KvStore, RateLimiter};
use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::decide_agent::DecideAgent;
use crate::error::{TriageError, TriageResult};
use crate::event::EventData;
use crate::kb::KbRetriever;
use crate::kb_lookup_agent::KbLookupAgent;
use crate::profile_agent::ProfileAgent;
use crate::propose_action_agent::ProposeActionAgent;
use crate::recent_tx_agent::RecentTxAgent;
use crate::redactor::redact_str;
use crate::risk_signals_agent::RiskSignalsAgent;
use crate::store::{TraceRecord, TriageStore};
use crate::stream::EventStream;
use crate::summarizer_agent::{SummarizerAgent, SummaryDetail};
use crate::types::{RecommendedAction, RiskLevel, Role, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageRequest {
    pub alert_id: String,
    pub customer_id: String,
    pub suspect_txn_id: String,
    pub role: Role,
    pub client_id: String,
}

/// The composed decision returned to the caller and persisted on the run.
#[derive(Debug, Clone, Serialize)]
pub struct TriageOutcome {
    pub run_id: RunId,
    pub risk: RiskLevel,
    pub proposed_action: RecommendedAction,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub citations: Vec<String>,
    pub fallback_used: bool,
    pub approved: bool,
    pub blocked_by: Option<String>,
    pub requires_otp: bool,
    pub summary: SummaryDetail,
    pub latency_ms: i64,
}

/// A run that has been admitted but not yet driven.
#[derive(Debug)]
pub struct PreparedRun {
    pub run_id: RunId,
    ctx: StepContext,
    cancel_rx: watch::Receiver<bool>,
    started_at: DateTime<Utc>,
    started: Instant,
}

struct ActiveRun {
    run_id: RunId,
    cancel_tx: watch::Sender<bool>,
}

pub struct Orchestrator {
    store: TriageStore,
    stream: Arc<EventStream>,
    breakers: Arc<BreakerRegistry>,
    clock: SharedClock,
    config: EngineConfig,
    agents: HashMap<Step, Arc<dyn TriageAgent>>,
    summarizer: SummarizerAgent,
    active: Mutex<HashMap<String, ActiveRun>>,
}

impl Orchestrator {
    /// Build a fully wired orchestrator with all step agents registered.
    pub fn new(
        store: TriageStore,
        kv: Arc<dyn KvStore>,
        stream: Arc<EventStream>,
        breakers: Arc<BreakerRegistry>,
        clock: SharedClock,
        config: EngineConfig,
    ) -> Self {
        let retriever = KbRetriever::new(store.clone());
        let action_limiter = RateLimiter::new(
            kv,
            Arc::clone(&clock),
            config.rate_limit_window_ms,
            config.rate_limit_max_requests,
        );

        let mut agents: HashMap<Step, Arc<dyn TriageAgent>> = HashMap::new();
        agents.insert(Step::GetProfile, Arc::new(ProfileAgent::new(store.clone())));
        agents.insert(Step::RecentTx, Arc::new(RecentTxAgent::new(store.clone())));
        agents.insert(
            Step::RiskSignals,
            Arc::new(RiskSignalsAgent::new(store.clone())),
        );
        agents.insert(Step::KbLookup, Arc::new(KbLookupAgent::new(retriever)));
        agents.insert(Step::Decide, Arc::new(DecideAgent::new(store.clone())));
        agents.insert(
            Step::ProposeAction,
            Arc::new(ProposeActionAgent::new(
                store.clone(),
                action_limiter,
                config.clone(),
            )),
        );

        Self {
            store,
            stream,
            breakers,
            clock,
            config,
            agents,
            summarizer: SummarizerAgent,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Replace one step's agent. Test seam for failure injection.
    pub fn set_agent(&mut self, step: Step, agent: Arc<dyn TriageAgent>) {
        self.agents.insert(step, agent);
    }

    /// Admit a run: validate, enforce the one-active-run-per-alert
    /// invariant, persist the initial run row and open its event channel.
    pub fn begin(&self, req: &TriageRequest) -> TriageResult<PreparedRun> {
        let mut missing = Vec::new();
        if req.alert_id.is_empty() {
            missing.push("alert_id");
        }
        if req.customer_id.is_empty() {
            missing.push("customer_id");
        }
        if req.suspect_txn_id.is_empty() {
            missing.push("suspect_txn_id");
        }
        if !missing.is_empty() {
            return Err(TriageError::validation(&missing));
        }

        let alert = self
            .store
            .get_alert(&req.alert_id)?
            .ok_or_else(|| TriageError::not_found("alert", &req.alert_id))?;
        if alert.customer_id != req.customer_id {
            return Err(TriageError::validation(&["customer_id"]));
        }
        let suspect_txn = self
            .store
            .get_transaction(&req.suspect_txn_id)?
            .ok_or_else(|| TriageError::not_found("transaction", &req.suspect_txn_id))?;

        let run_id = Uuid::new_v4().to_string();
        let started_at = self.clock.now();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        {
            let mut active = self.active.lock().unwrap();
            if let Some(existing) = active.get(&req.alert_id) {
                return Err(TriageError::Conflict {
                    message: format!("alert {} already has an active run", req.alert_id),
                    existing_id: Some(existing.run_id.clone()),
                });
            }
            // A run left over from a previous process counts too.
            if let Some(existing) = self.store.active_run_for_alert(&req.alert_id)? {
                return Err(TriageError::Conflict {
                    message: format!("alert {} already has an active run", req.alert_id),
                    existing_id: Some(existing),
                });
            }
            active.insert(
                req.alert_id.clone(),
                ActiveRun {
                    run_id: run_id.clone(),
                    cancel_tx,
                },
            );
        }

        let admitted = self
            .store
            .insert_run(&run_id, &req.alert_id, &started_at)
            .and_then(|()| {
                self.store
                    .set_alert_status(&req.alert_id, crate::types::AlertStatus::Investigating)
            });
        if let Err(err) = admitted {
            self.active.lock().unwrap().remove(&req.alert_id);
            // The run row may already exist; make sure it cannot block the
            // alert forever.
            let _ = self
                .store
                .finish_run(&run_id, &self.clock.now(), None, &[], true, 0);
            return Err(err);
        }
        self.stream.register(&run_id);

        log::info!("run={run_id} triage started for alert {}", req.alert_id);

        Ok(PreparedRun {
            run_id: run_id.clone(),
            ctx: StepContext {
                run_id,
                role: req.role,
                client_id: req.client_id.clone(),
                alert,
                suspect_txn,
                now: started_at,
                profile: None,
                recent_tx: None,
                risk_signals: None,
                kb: None,
                decision: None,
                proposal: None,
            },
            cancel_rx,
            started_at,
            started: Instant::now(),
        })
    }

    /// Drive an admitted run to its terminal state.
    pub async fn drive(&self, run: PreparedRun) -> TriageResult<TriageOutcome> {
        let run_id = run.run_id.clone();
        let alert_id = run.ctx.alert.id.clone();

        let outcome = self.run_pipeline(run).await;

        match &outcome {
            Ok(result) => {
                self.stream.publish(
                    &run_id,
                    &EventData::DecisionFinalized {
                        risk: result.risk,
                        proposed_action: result.proposed_action,
                        confidence: result.confidence,
                        fallback_used: result.fallback_used,
                        reasons: result.reasons.clone(),
                        citations: result.citations.clone(),
                        requires_otp: result.requires_otp,
                    },
                );
            }
            Err(err) => {
                let correlation_id = Uuid::new_v4().to_string();
                log::error!("run={run_id} fatal [{correlation_id}]: {err}");
                self.stream.publish(
                    &run_id,
                    &EventData::Error {
                        message: "triage failed".to_string(),
                        correlation_id,
                    },
                );
                // Best-effort terminal persistence so the run cannot stay
                // active forever.
                let _ = self.store.finish_run(
                    &run_id,
                    &self.clock.now(),
                    None,
                    &[],
                    true,
                    0,
                );
            }
        }

        self.stream.finalize(&run_id);
        self.active.lock().unwrap().remove(&alert_id);
        outcome
    }

    /// Admit and drive in one call.
    pub async fn execute(&self, req: &TriageRequest) -> TriageResult<TriageOutcome> {
        let run = self.begin(req)?;
        self.drive(run).await
    }

    /// Subscribe to a live run's event channel.
    pub fn subscribe(&self, run_id: &str) -> Option<crate::stream::EventSubscription> {
        self.stream.subscribe(run_id)
    }

    /// Cooperative cancellation. Returns false for unknown or finished runs.
    pub fn cancel(&self, run_id: &str) -> bool {
        let active = self.active.lock().unwrap();
        for entry in active.values() {
            if entry.run_id == run_id {
                let _ = entry.cancel_tx.send(true);
                return true;
            }
        }
        false
    }

    async fn run_pipeline(&self, mut run: PreparedRun) -> TriageResult<TriageOutcome> {
        let run_id = run.run_id.clone();
        self.stream.publish(
            &run_id,
            &EventData::PlanBuilt {
                steps: Step::PLAN.iter().map(|s| s.name()).collect(),
            },
        );

        let run_budget = Duration::from_millis(self.config.run_timeout_ms);
        let mut seq: i64 = 0;
        let mut fallback_used = false;

        for step in Step::PLAN {
            if *run.cancel_rx.borrow() {
                log::info!("run={run_id} cancelled before step {}", step.name());
                fallback_used = true;
                break;
            }
            if run.started.elapsed() >= run_budget {
                log::warn!("run={run_id} wall-clock budget exhausted at step {}", step.name());
                fallback_used = true;
                break;
            }

            let outcome = self.run_step(step, &run.ctx, &mut run.cancel_rx).await;

            let detail_json = serde_json::to_value(&outcome.detail)?;
            let (clean_detail, _) = crate::redactor::redact_json(detail_json);
            self.store.append_trace(&TraceRecord {
                run_id: run_id.clone(),
                seq,
                step: step.name().to_string(),
                ok: outcome.ok,
                duration_ms: outcome.duration_ms as i64,
                detail: serde_json::to_string(&clean_detail)?,
            })?;
            seq += 1;

            self.stream.publish(
                &run_id,
                &EventData::ToolUpdate {
                    step: step.name(),
                    ok: outcome.ok,
                    duration_ms: outcome.duration_ms,
                },
            );

            if outcome.ok {
                run.ctx.absorb(&outcome.detail);
                self.breakers.record_success(step);
                continue;
            }

            if !outcome.circuit_open && !outcome.cancelled {
                self.breakers.record_failure(step);
            }
            fallback_used = true;

            if outcome.cancelled {
                log::info!("run={run_id} cancelled during step {}", step.name());
                break;
            }
            if step.critical() {
                log::warn!(
                    "run={run_id} critical step {} failed: {}",
                    step.name(),
                    outcome.reason
                );
                break;
            }

            self.stream.publish(
                &run_id,
                &EventData::FallbackTriggered {
                    failed_step: step.name(),
                    reason: outcome.reason.clone(),
                },
            );
            run.ctx.absorb(&fallback_for(step));
        }

        let outcome = self.compose(&run, fallback_used)?;
        log::info!(
            "run={run_id} decision: risk={} action={} fallback={} latency={}ms",
            outcome.risk.as_str(),
            outcome.proposed_action.as_str(),
            outcome.fallback_used,
            outcome.latency_ms
        );
        Ok(outcome)
    }

    /// Invoke one agent under the step deadline. A late result is abandoned:
    /// the blocking task keeps running but its output is ignored.
    async fn run_step(
        &self,
        step: Step,
        ctx: &StepContext,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> StepOutcome {
        if let Err(err) = self.breakers.check(step) {
            return StepOutcome {
                ok: false,
                detail: StepDetail::CircuitOpen {},
                duration_ms: 0,
                reason: err.to_string(),
                circuit_open: true,
                cancelled: false,
            };
        }

        let Some(agent) = self.agents.get(&step) else {
            return StepOutcome {
                ok: false,
                detail: StepDetail::Failed {
                    message: "no agent registered".to_string(),
                },
                duration_ms: 0,
                reason: format!("no agent registered for {}", step.name()),
                circuit_open: false,
                cancelled: false,
            };
        };

        let agent = Arc::clone(agent);
        let step_ctx = ctx.clone();
        let deadline = Duration::from_millis(self.config.agent_timeout_ms);
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || agent.run(&step_ctx));
        let result = tokio::select! {
            res = tokio::time::timeout(deadline, task) => Some(res),
            _ = cancel_rx.changed() => None,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            None => StepOutcome {
                ok: false,
                detail: StepDetail::Failed {
                    message: "cancelled".to_string(),
                },
                duration_ms,
                reason: "cancelled".to_string(),
                circuit_open: false,
                cancelled: true,
            },
            Some(Err(_elapsed)) => {
                let err = TriageError::StepTimeout {
                    step: step.name(),
                    timeout_ms: self.config.agent_timeout_ms,
                };
                StepOutcome {
                    ok: false,
                    detail: StepDetail::Failed {
                        message: err.to_string(),
                    },
                    duration_ms,
                    reason: err.to_string(),
                    circuit_open: false,
                    cancelled: false,
                }
            }
            Some(Ok(Err(join_err))) => StepOutcome {
                ok: false,
                detail: StepDetail::Failed {
                    message: "agent task aborted".to_string(),
                },
                duration_ms,
                reason: join_err.to_string(),
                circuit_open: false,
                cancelled: false,
            },
            Some(Ok(Ok(Err(agent_err)))) => StepOutcome {
                ok: false,
                detail: StepDetail::Failed {
                    message: agent_err.to_string(),
                },
                duration_ms,
                reason: agent_err.to_string(),
                circuit_open: false,
                cancelled: false,
            },
            Some(Ok(Ok(Ok(detail)))) => StepOutcome {
                ok: true,
                detail,
                duration_ms,
                reason: String::new(),
                circuit_open: false,
                cancelled: false,
            },
        }
    }

    /// Compose the final decision from whatever the pipeline produced.
    fn compose(&self, run: &PreparedRun, fallback_used: bool) -> TriageResult<TriageOutcome> {
        let ctx = &run.ctx;
        let score = ctx.risk_signals.as_ref().map(|s| s.score).unwrap_or(0.0);

        let mut risk = ctx
            .decision
            .as_ref()
            .map(|d| d.level)
            .unwrap_or_else(|| RiskLevel::for_score(score));
        // Uncertainty penalty: a decision resting on substituted data never
        // reports high.
        if fallback_used && risk == RiskLevel::High {
            risk = RiskLevel::Medium;
        }

        let proposed_action = ctx.proposal.as_ref().map(|p| p.action).unwrap_or_else(|| {
            match risk {
                RiskLevel::High => RecommendedAction::FreezeCard,
                RiskLevel::Medium => RecommendedAction::OpenDispute,
                RiskLevel::Low => RecommendedAction::MarkFalsePositive,
            }
        });

        let confidence = if fallback_used {
            (score * 0.7).min(70.0)
        } else {
            score.min(95.0)
        };

        let reasons: Vec<String> = ctx
            .risk_signals
            .as_ref()
            .map(|s| {
                s.reasons
                    .iter()
                    .map(|r| redact_str(r).into_owned())
                    .collect()
            })
            .unwrap_or_default();
        let citations: Vec<String> = ctx
            .kb
            .as_ref()
            .map(|kb| {
                kb.citations
                    .iter()
                    .map(|c| redact_str(c).into_owned())
                    .collect()
            })
            .unwrap_or_default();

        let approved = ctx.proposal.as_ref().map(|p| p.approved).unwrap_or(false);
        let blocked_by = ctx.proposal.as_ref().and_then(|p| p.blocked_by.clone());
        let requires_otp = ctx
            .proposal
            .as_ref()
            .map(|p| p.requires_otp)
            .unwrap_or(proposed_action == RecommendedAction::FreezeCard);

        // Best-effort narrative; its failure never touches the decision.
        let summary = match self.summarizer.run(ctx) {
            Ok(StepDetail::Summary(summary)) => summary,
            _ => SummaryDetail::fallback(),
        };

        let ended_at = self.clock.now();
        let latency_ms = (ended_at - run.started_at).num_milliseconds().max(0);

        self.store.finish_run(
            &run.run_id,
            &ended_at,
            Some(risk),
            &reasons,
            fallback_used,
            latency_ms,
        )?;

        Ok(TriageOutcome {
            run_id: run.run_id.clone(),
            risk,
            proposed_action,
            confidence,
            reasons,
            citations,
            fallback_used,
            approved,
            blocked_by,
            requires_otp,
            summary,
            latency_ms,
        })
    }
}

struct StepOutcome {
    ok: bool,
    detail: StepDetail,
    duration_ms: u64,
    reason: String,
    circuit_open: bool,
    cancelled: bool,
}
