//! Payload-level service façade.
//!
//! The transport layer (HTTP, CLI, whatever hosts the engine) maps its
//! requests onto these calls. Every externally-initiated call is gated by
//! the client rate limiter; every response is shaped for the wire and
//! redacted where it can carry customer data.

use crate::cache::{IdempotencyCache, KvStore, OtpStore, RateLimiter};
use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::error::{TriageError, TriageResult};
use crate::evals::{self, EvalReport};
use crate::executor::{ActionExecutor, CaseOutcome, FreezeOutcome};
use crate::kb::{KbHit, KbRetriever};
use crate::orchestrator::{Orchestrator, TriageRequest};
use crate::redactor::mask_customer_id;
use crate::store::{TransactionRecord, TriageStore};
use crate::stream::{EventStream, EventSubscription};
use crate::types::{AlertStatus, Cents, KycLevel, RiskLevel, Role, RunId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 100;
const MAX_QUERY_LEN: usize = 500;
const MAX_KB_LIMIT: usize = 50;
const DEFAULT_KB_LIMIT: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct StartTriageRequest {
    pub alert_id: String,
    pub customer_id: String,
    pub suspect_txn_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartTriageResponse {
    pub run_id: RunId,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceView {
    pub seq: i64,
    pub step: String,
    pub ok: bool,
    pub duration_ms: i64,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: RunId,
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub risk: Option<RiskLevel>,
    pub reasons: Vec<String>,
    pub fallback_used: bool,
    pub latency_ms: Option<i64>,
    pub traces: Vec<TraceView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertSummary {
    pub alert_id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub customer_kyc: KycLevel,
    pub risk: RiskLevel,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub txn_id: String,
    pub txn_merchant: String,
    pub txn_amount_minor: Cents,
    pub txn_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub transactions: Vec<TransactionRecord>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KbSearchResponse {
    pub results: Vec<KbHit>,
    pub total_results: usize,
    pub query: String,
}

pub struct TriageService {
    store: TriageStore,
    orchestrator: Arc<Orchestrator>,
    stream: Arc<EventStream>,
    limiter: RateLimiter,
    executor: ActionExecutor,
    retriever: KbRetriever,
}

impl TriageService {
    /// Wire the full engine over one store, one KV service and one clock.
    pub fn new(
        store: TriageStore,
        kv: Arc<dyn KvStore>,
        clock: SharedClock,
        config: EngineConfig,
    ) -> Self {
        let stream = Arc::new(EventStream::new(
            Arc::clone(&clock),
            config.stream_buffer,
            config.heartbeat_interval_ms,
            config.completed_grace_ms,
        ));
        let breakers = Arc::new(crate::breaker::BreakerRegistry::new(
            Arc::clone(&clock),
            config.circuit_fail_threshold,
            config.circuit_reset_ms,
        ));
        let limiter = RateLimiter::new(
            Arc::clone(&kv),
            Arc::clone(&clock),
            config.rate_limit_window_ms,
            config.rate_limit_max_requests,
        );
        let otp = OtpStore::new(Arc::clone(&kv), config.otp_ttl_ms);
        let idempotency = IdempotencyCache::new(Arc::clone(&kv), config.idempotency_ttl_ms);
        let executor = ActionExecutor::new(
            store.clone(),
            otp,
            idempotency,
            Arc::clone(&clock),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            kv,
            Arc::clone(&stream),
            breakers,
            clock,
            config,
        ));

        Self {
            retriever: KbRetriever::new(store.clone()),
            store,
            orchestrator,
            stream,
            limiter,
            executor,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Start a triage run in the background and return its id. The run is
    /// observable immediately via the stream and the status call.
    pub async fn start_triage(
        &self,
        client_id: &str,
        role: Role,
        req: &StartTriageRequest,
    ) -> TriageResult<StartTriageResponse> {
        self.limiter.check(client_id)?;

        let run = self.orchestrator.begin(&TriageRequest {
            alert_id: req.alert_id.clone(),
            customer_id: req.customer_id.clone(),
            suspect_txn_id: req.suspect_txn_id.clone(),
            role,
            client_id: client_id.to_string(),
        })?;
        let run_id = run.run_id.clone();

        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            // drive() logs and persists its own failures.
            let _ = orchestrator.drive(run).await;
        });

        Ok(StartTriageResponse {
            run_id,
            status: "started",
        })
    }

    pub fn run_status(&self, run_id: &str) -> TriageResult<RunStatus> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| TriageError::not_found("run", run_id))?;
        let traces = self
            .store
            .traces_for_run(run_id)?
            .into_iter()
            .map(|t| TraceView {
                seq: t.seq,
                step: t.step,
                ok: t.ok,
                duration_ms: t.duration_ms,
                detail: serde_json::from_str(&t.detail)
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect();

        Ok(RunStatus {
            run_id: run.run_id,
            status: if run.ended_at.is_some() {
                "completed"
            } else {
                "running"
            },
            started_at: run.started_at,
            ended_at: run.ended_at,
            risk: run.risk,
            reasons: run.reasons,
            fallback_used: run.fallback_used,
            latency_ms: run.latency_ms,
            traces,
        })
    }

    /// Subscribe to a live run's event stream.
    pub fn subscribe(&self, run_id: &str) -> Option<EventSubscription> {
        self.stream.subscribe(run_id)
    }

    pub fn cancel_run(&self, run_id: &str) -> bool {
        self.orchestrator.cancel(run_id)
    }

    /// The alert work queue, newest first, customer ids masked for the wire.
    pub fn list_alerts(&self) -> TriageResult<Vec<AlertSummary>> {
        let listings = self.store.list_alerts()?;
        Ok(listings
            .into_iter()
            .map(|l| AlertSummary {
                alert_id: l.alert.id,
                customer_id: mask_customer_id(&l.alert.customer_id),
                customer_name: l.customer_name,
                customer_kyc: l.customer_kyc,
                risk: l.alert.risk,
                status: l.alert.status,
                created_at: l.alert.created_at,
                txn_id: l.alert.suspect_txn_id,
                txn_merchant: l.txn_merchant,
                txn_amount_minor: l.txn_amount_minor,
                txn_ts: l.txn_ts,
            })
            .collect())
    }

    /// Keyset-paginated transactions for one customer, newest first. The
    /// cursor is `"{lastId}|{lastTsISO}"`.
    pub fn list_transactions(
        &self,
        customer_id: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> TriageResult<TransactionPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);

        let parsed_cursor = match cursor {
            Some(raw) => Some(parse_cursor(raw)?),
            None => None,
        };
        let after = parsed_cursor
            .as_ref()
            .map(|(id, ts)| (id.as_str(), ts));

        let transactions = self.store.transactions_page(customer_id, after, limit)?;
        let next_cursor = if transactions.len() == limit {
            transactions.last().map(|t| {
                format!(
                    "{}|{}",
                    t.id,
                    t.ts.to_rfc3339_opts(SecondsFormat::Millis, true)
                )
            })
        } else {
            None
        };

        Ok(TransactionPage {
            transactions,
            next_cursor,
        })
    }

    /// Free-text knowledge-base search. `q` must be 1-500 chars.
    pub fn kb_search(&self, q: &str, limit: Option<usize>) -> TriageResult<KbSearchResponse> {
        if q.is_empty() || q.len() > MAX_QUERY_LEN {
            return Err(TriageError::validation(&["q"]));
        }
        let limit = limit.unwrap_or(DEFAULT_KB_LIMIT);
        if limit == 0 || limit > MAX_KB_LIMIT {
            return Err(TriageError::validation(&["limit"]));
        }

        let lookup = self.retriever.search(q, limit);
        Ok(KbSearchResponse {
            total_results: lookup.results.len(),
            results: lookup.results,
            query: q.to_string(),
        })
    }

    pub fn evals(&self) -> TriageResult<Vec<EvalReport>> {
        evals::run_all(&self.store)
    }

    // ── Actions ──────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn freeze_card(
        &self,
        client_id: &str,
        role: Role,
        card_id: &str,
        alert_id: Option<&str>,
        otp: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> TriageResult<FreezeOutcome> {
        self.limiter.check(client_id)?;
        self.executor
            .freeze_card(card_id, alert_id, otp, role, client_id, idempotency_key)
    }

    pub fn open_dispute(
        &self,
        client_id: &str,
        txn_id: &str,
        reason_code: &str,
        idempotency_key: Option<&str>,
    ) -> TriageResult<CaseOutcome> {
        self.limiter.check(client_id)?;
        self.executor
            .open_dispute(txn_id, reason_code, client_id, idempotency_key)
    }

    pub fn contact_customer(
        &self,
        client_id: &str,
        alert_id: &str,
        customer_id: &str,
        suspect_txn_id: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> TriageResult<CaseOutcome> {
        self.limiter.check(client_id)?;
        self.executor.contact_customer(
            alert_id,
            customer_id,
            suspect_txn_id,
            client_id,
            idempotency_key,
        )
    }

    pub fn mark_false_positive(
        &self,
        client_id: &str,
        alert_id: &str,
        customer_id: &str,
        suspect_txn_id: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> TriageResult<CaseOutcome> {
        self.limiter.check(client_id)?;
        self.executor.mark_false_positive(
            alert_id,
            customer_id,
            suspect_txn_id,
            client_id,
            idempotency_key,
        )
    }
}

fn parse_cursor(raw: &str) -> TriageResult<(String, DateTime<Utc>)> {
    let Some((id, ts_raw)) = raw.split_once('|') else {
        return Err(TriageError::validation(&["cursor"]));
    };
    let ts = DateTime::parse_from_rfc3339(ts_raw)
        .map_err(|_| TriageError::validation(&["cursor"]))?
        .with_timezone(&Utc);
    Ok((id.to_string(), ts))
}
