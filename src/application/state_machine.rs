use crate::application::ledger::InventoryLedger;
use crate::application::locks::{KeyGuard, KeyedLocks};
use crate::domain::OrderId;
use crate::domain::inventory::MovementKind;
use crate::domain::order::{Order, OrderEvent, OrderStatus};
use crate::domain::payment::ProviderRequest;
use crate::domain::ports::OrderStoreRef;
use crate::error::{OrderError, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Held while an order is being read-modify-written.
pub type OrderGuard = KeyGuard<OrderId>;

/// What a transition request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied { from: OrderStatus, to: OrderStatus },
    /// The order already sat in the event's target status; nothing changed.
    Unchanged(OrderStatus),
}

impl Transition {
    pub fn status(&self) -> OrderStatus {
        match self {
            Transition::Applied { to, .. } => *to,
            Transition::Unchanged(status) => *status,
        }
    }
}

/// Sole owner of order status changes and their inventory side effects.
pub struct OrderStateMachine {
    orders: OrderStoreRef,
    ledger: Arc<InventoryLedger>,
    locks: KeyedLocks<OrderId>,
}

impl OrderStateMachine {
    pub fn new(orders: OrderStoreRef, ledger: Arc<InventoryLedger>) -> Self {
        Self {
            orders,
            ledger,
            locks: KeyedLocks::new(),
        }
    }

    /// Serializes all work on `order_id` until the guard drops.
    pub async fn lock(&self, order_id: OrderId) -> OrderGuard {
        self.locks.lock(order_id).await
    }

    pub async fn create(&self, order: Order) -> Result<Order> {
        if order.status != OrderStatus::Pending {
            return Err(OrderError::internal("orders are created pending"));
        }
        self.orders.store(order.clone()).await?;
        info!(order_id = order.id, user_id = order.user_id, total = %order.total, "order created");
        Ok(order)
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))
    }

    /// Locks the order and applies `event`.
    pub async fn apply(&self, order_id: OrderId, event: OrderEvent) -> Result<Transition> {
        let guard = self.lock(order_id).await;
        self.apply_locked(&guard, event).await
    }

    /// Applies `event` to an order the caller already holds the lock for.
    pub async fn apply_locked(&self, guard: &OrderGuard, event: OrderEvent) -> Result<Transition> {
        self.transition(guard, event, |_| {}).await
    }

    /// `pending → awaiting_payment`, recording which provider holds the payment.
    pub async fn payment_initiated(
        &self,
        guard: &OrderGuard,
        request: &ProviderRequest,
    ) -> Result<Transition> {
        self.transition(guard, OrderEvent::PaymentInitiated, |order| {
            order.provider = Some(request.kind);
            order.provider_reference = Some(request.provider_reference.clone());
        })
        .await
    }

    /// Applies a provider's verdict, keeping its transaction id on the order.
    pub async fn payment_settled(
        &self,
        guard: &OrderGuard,
        event: OrderEvent,
        provider_transaction: Option<String>,
    ) -> Result<Transition> {
        self.transition(guard, event, |order| {
            if provider_transaction.is_some() {
                order.provider_transaction = provider_transaction;
            }
        })
        .await
    }

    async fn transition(
        &self,
        guard: &OrderGuard,
        event: OrderEvent,
        annotate: impl FnOnce(&mut Order) + Send,
    ) -> Result<Transition> {
        let mut order = self.order(guard.key()).await?;
        let from = order.status;

        let Some(to) = from.next(event) else {
            if from == event.target() {
                info!(order_id = order.id, %event, status = %from, "duplicate transition ignored");
                return Ok(Transition::Unchanged(from));
            }
            warn!(order_id = order.id, %event, status = %from, "illegal transition rejected");
            return Err(OrderError::InvalidTransition {
                order_id: order.id,
                from,
                event: event.to_string(),
            });
        };

        self.apply_side_effects(&order, from, event).await?;

        annotate(&mut order);
        order.status = to;
        order.updated_at = Utc::now();
        self.orders.store(order.clone()).await?;
        info!(order_id = order.id, %event, %from, %to, "order transitioned");
        Ok(Transition::Applied { from, to })
    }

    /// Inventory work for an edge. Runs before the status is saved, and every
    /// step is replay-safe, so a crash in between is repaired by re-applying
    /// the same event.
    async fn apply_side_effects(
        &self,
        order: &Order,
        from: OrderStatus,
        event: OrderEvent,
    ) -> Result<()> {
        let kind = match (event, from) {
            (OrderEvent::PaymentConfirmed, _) => MovementKind::Commit,
            (OrderEvent::AdminCancelled, OrderStatus::Paid) => {
                // Stock was already committed; it comes back as a restock
                // tagged with the order so a replay does not count it twice.
                for line in &order.lines {
                    self.ledger
                        .return_line(line.product_id, line.quantity, order.id)
                        .await?;
                }
                return Ok(());
            }
            (
                OrderEvent::PaymentCancelled
                | OrderEvent::PaymentTimedOut
                | OrderEvent::UserCancelled
                | OrderEvent::AdminCancelled,
                _,
            ) => MovementKind::Release,
            _ => return Ok(()),
        };

        for line in &order.lines {
            self.ledger
                .settle_line(kind, line.product_id, line.quantity, order.id)
                .await?;
        }
        Ok(())
    }
}
