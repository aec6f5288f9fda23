use crate::application::gateway::GatewayRegistry;
use crate::application::state_machine::OrderStateMachine;
use crate::config::EngineConfig;
use crate::domain::{AttemptId, OrderId};
use crate::domain::order::{OrderEvent, OrderStatus};
use crate::domain::payment::{
    AttemptStatus, CallbackOutcome, ConfirmationEvent, ProviderVariant, RawCallback,
};
use crate::domain::ports::AttemptStoreRef;
use crate::error::{OrderError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the coordinator did with one confirmation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The order moved (or already sat) where the event points.
    Applied { order_id: OrderId, status: OrderStatus },
    /// The attempt was already settled; nothing changed.
    Duplicate { order_id: OrderId },
    /// No attempt carries this reference.
    UnknownReference(String),
    /// The provider status is not one the engine acts on.
    Malformed { order_id: OrderId },
    /// The order had moved elsewhere first. Logged as a transition conflict.
    Conflict { order_id: OrderId, status: OrderStatus },
}

/// Counters of everything the coordinator accepted or discarded.
#[derive(Debug, Default)]
pub struct ReconciliationStats {
    applied: AtomicU64,
    duplicates: AtomicU64,
    unknown: AtomicU64,
    malformed: AtomicU64,
    untrusted: AtomicU64,
    conflicts: AtomicU64,
    timeouts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub applied: u64,
    pub duplicates: u64,
    pub unknown: u64,
    pub malformed: u64,
    pub untrusted: u64,
    pub conflicts: u64,
    pub timeouts: u64,
}

impl ReconciliationStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            applied: load(&self.applied),
            duplicates: load(&self.duplicates),
            unknown: load(&self.unknown),
            malformed: load(&self.malformed),
            untrusted: load(&self.untrusted),
            conflicts: load(&self.conflicts),
            timeouts: load(&self.timeouts),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Attempts moved to `timed_out`.
    pub timed_out: usize,
    /// Orders cancelled because their attempt timed out.
    pub cancelled: usize,
    /// Attempts the sweep could not process; retried on the next pass.
    pub failed: usize,
}

/// Routes provider confirmations to order transitions and times out
/// abandoned payment attempts.
pub struct ReconciliationCoordinator {
    machine: Arc<OrderStateMachine>,
    attempts: AttemptStoreRef,
    registry: Arc<GatewayRegistry>,
    config: EngineConfig,
    stats: ReconciliationStats,
}

impl ReconciliationCoordinator {
    pub fn new(
        machine: Arc<OrderStateMachine>,
        attempts: AttemptStoreRef,
        registry: Arc<GatewayRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            machine,
            attempts,
            registry,
            config,
            stats: ReconciliationStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Entry point for provider callbacks. Provenance is checked before the
    /// body is parsed.
    pub async fn receive_callback(
        &self,
        variant: ProviderVariant,
        raw: &RawCallback,
    ) -> Result<Reconciliation> {
        let event = match self.registry.verify_and_parse(variant, raw) {
            Ok(event) => event,
            Err(err @ OrderError::UntrustedCallback(_)) => {
                ReconciliationStats::bump(&self.stats.untrusted);
                warn!(provider = %variant, error = %err, "callback rejected");
                return Err(err);
            }
            Err(err @ OrderError::MalformedCallback(_)) => {
                ReconciliationStats::bump(&self.stats.malformed);
                warn!(provider = %variant, error = %err, "callback discarded");
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        self.handle_event(event).await
    }

    /// Applies one confirmation event within `event_timeout`.
    pub async fn handle_event(&self, event: ConfirmationEvent) -> Result<Reconciliation> {
        match tokio::time::timeout(self.config.event_timeout, self.reconcile(event)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("confirmation event handling timed out");
                Err(OrderError::CallbackTimeout)
            }
        }
    }

    async fn reconcile(&self, event: ConfirmationEvent) -> Result<Reconciliation> {
        let reference = event.provider_reference.as_str();
        let attempt = match self.attempts.find_by_reference(reference).await? {
            Some(attempt) if attempt.order_id == event.order_id => attempt,
            _ => {
                ReconciliationStats::bump(&self.stats.unknown);
                let err = OrderError::UnknownPaymentReference(reference.to_string());
                warn!(order_id = event.order_id, reference, error = %err, "callback discarded");
                return Ok(Reconciliation::UnknownReference(reference.to_string()));
            }
        };

        let guard = self.machine.lock(attempt.order_id).await;
        // Re-read under the lock: a concurrent callback or the sweep may have
        // settled it while we waited.
        let mut attempt = self
            .attempts
            .get(attempt.id)
            .await?
            .ok_or_else(|| OrderError::internal(format!("attempt {} vanished", attempt.id)))?;
        let order_id = attempt.order_id;

        if attempt.status.is_terminal() {
            ReconciliationStats::bump(&self.stats.duplicates);
            info!(
                order_id,
                reference,
                attempt = %attempt.status,
                "duplicate confirmation discarded"
            );
            return Ok(Reconciliation::Duplicate { order_id });
        }

        let (order_event, settled) = match event.outcome {
            CallbackOutcome::Confirmed => (OrderEvent::PaymentConfirmed, AttemptStatus::Confirmed),
            CallbackOutcome::Cancelled => (OrderEvent::PaymentCancelled, AttemptStatus::Cancelled),
            CallbackOutcome::Malformed => {
                ReconciliationStats::bump(&self.stats.malformed);
                warn!(order_id, reference, "callback status not actionable, discarded");
                return Ok(Reconciliation::Malformed { order_id });
            }
        };

        attempt.provider_transaction = event.provider_transaction.clone();
        let applied = self
            .machine
            .payment_settled(&guard, order_event, event.provider_transaction)
            .await;
        match applied {
            Ok(transition) => {
                attempt.set_status(settled);
                self.attempts.store(attempt).await?;
                ReconciliationStats::bump(&self.stats.applied);
                Ok(Reconciliation::Applied {
                    order_id,
                    status: transition.status(),
                })
            }
            Err(OrderError::InvalidTransition {
                from,
                event: rejected,
                ..
            }) => {
                // The provider's word on the attempt still stands.
                attempt.set_status(settled);
                self.attempts.store(attempt).await?;
                ReconciliationStats::bump(&self.stats.conflicts);
                let conflict = OrderError::TransitionConflict {
                    order_id,
                    detail: format!("{rejected} arrived while the order was {from}"),
                };
                error!(order_id, reference, error = %conflict, "confirmation not applied");
                Ok(Reconciliation::Conflict {
                    order_id,
                    status: from,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Times out every attempt still `initiated` `payment_timeout` before `now`.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let window = chrono::Duration::from_std(self.config.payment_timeout)
            .map_err(|e| OrderError::internal(format!("payment timeout out of range: {e}")))?;
        let mut report = SweepReport::default();

        for candidate in self.attempts.with_status(AttemptStatus::Initiated).await? {
            if now - candidate.created_at < window {
                continue;
            }
            match self.expire(candidate.id, candidate.order_id, now, window).await {
                Ok(Some(cancelled)) => {
                    report.timed_out += 1;
                    report.cancelled += usize::from(cancelled);
                }
                Ok(None) => {}
                Err(err) => {
                    report.failed += 1;
                    error!(
                        order_id = candidate.order_id,
                        attempt = candidate.id,
                        error = %err,
                        "sweep failed for attempt"
                    );
                }
            }
        }
        if report.timed_out > 0 {
            info!(
                timed_out = report.timed_out,
                cancelled = report.cancelled,
                "payment sweep finished"
            );
        }
        Ok(report)
    }

    /// Returns `None` if the attempt settled before we got the lock, otherwise
    /// whether the order was cancelled.
    async fn expire(
        &self,
        attempt_id: AttemptId,
        order_id: OrderId,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<Option<bool>> {
        let guard = self.machine.lock(order_id).await;
        let Some(mut attempt) = self.attempts.get(attempt_id).await? else {
            return Ok(None);
        };
        if attempt.status.is_terminal() || now - attempt.created_at < window {
            return Ok(None);
        }

        let order = self.machine.order(order_id).await?;
        let cancelled = if order.status == OrderStatus::AwaitingPayment {
            self.machine
                .apply_locked(&guard, OrderEvent::PaymentTimedOut)
                .await?;
            true
        } else {
            debug!(order_id, status = %order.status, "timed-out attempt leaves order as is");
            false
        };

        attempt.set_status(AttemptStatus::TimedOut);
        self.attempts.store(attempt).await?;
        ReconciliationStats::bump(&self.stats.timeouts);
        warn!(order_id, attempt = attempt_id, "payment attempt timed out");
        Ok(Some(cancelled))
    }

    /// Runs the sweep every `sweep_interval` until `shutdown` is cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_expired().await {
                            error!(error = %err, "payment sweep failed");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("payment sweeper received shutdown signal");
                        return;
                    }
                }
            }
        })
    }
}
