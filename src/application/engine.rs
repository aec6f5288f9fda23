use crate::application::converter::CartConverter;
use crate::application::coordinator::{
    Reconciliation, ReconciliationCoordinator, StatsSnapshot, SweepReport,
};
use crate::application::gateway::GatewayRegistry;
use crate::application::ledger::InventoryLedger;
use crate::application::reports::{self, OrderFilter, SalesRange, SalesReport};
use crate::application::state_machine::OrderStateMachine;
use crate::config::EngineConfig;
use crate::domain::cart::Cart;
use crate::domain::inventory::{InventoryRecord, Movement};
use crate::domain::money::UnitPrice;
use crate::domain::order::{Order, OrderEvent, OrderStatus};
use crate::domain::payment::{
    AttemptStatus, PaymentAttempt, ProviderRequest, ProviderVariant, RawCallback,
};
use crate::domain::ports::{MovementFilter, ProviderTransportRef, Stores};
use crate::domain::{OrderId, ProductId, UserId};
use crate::error::{OrderError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Who is asking for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(UserId),
    Admin,
}

/// The order lifecycle engine.
///
/// Owns the ledger, the state machine, the converter and the coordinator, and
/// exposes the storefront, provider and admin entry points over them. All
/// methods take `&self`; the engine is meant to be shared behind an `Arc`.
pub struct OrderEngine {
    config: EngineConfig,
    stores: Stores,
    ledger: Arc<InventoryLedger>,
    machine: Arc<OrderStateMachine>,
    converter: CartConverter,
    registry: Arc<GatewayRegistry>,
    coordinator: Arc<ReconciliationCoordinator>,
}

impl OrderEngine {
    pub fn new(config: EngineConfig, stores: Stores, transport: ProviderTransportRef) -> Self {
        let registry = GatewayRegistry::from_config(&config, transport);
        Self::with_registry(config, stores, registry)
    }

    /// Like `new`, with a caller-assembled set of gateways.
    pub fn with_registry(config: EngineConfig, stores: Stores, registry: GatewayRegistry) -> Self {
        let registry = Arc::new(registry);
        let ledger = Arc::new(InventoryLedger::new(stores.inventory.clone()));
        let machine = Arc::new(OrderStateMachine::new(stores.orders.clone(), ledger.clone()));
        let converter = CartConverter::new(
            stores.catalog.clone(),
            stores.orders.clone(),
            ledger.clone(),
            machine.clone(),
        );
        let coordinator = Arc::new(ReconciliationCoordinator::new(
            machine.clone(),
            stores.attempts.clone(),
            registry.clone(),
            config.clone(),
        ));
        Self {
            config,
            stores,
            ledger,
            machine,
            converter,
            registry,
            coordinator,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Catalog and stock.

    /// Prices a product and brings its initial stock in through a restock.
    pub async fn register_product(
        &self,
        product_id: ProductId,
        price: Decimal,
        initial_stock: u32,
        low_stock_threshold: u32,
    ) -> Result<InventoryRecord> {
        self.set_price(product_id, price).await?;
        let record = self.ledger.register(product_id, low_stock_threshold).await?;
        if initial_stock == 0 {
            return Ok(record);
        }
        self.ledger
            .restock(product_id, initial_stock, "initial stock")
            .await?;
        self.inventory_record(product_id).await
    }

    pub async fn set_price(&self, product_id: ProductId, price: Decimal) -> Result<()> {
        let price = UnitPrice::new(product_id, price)?;
        self.stores.catalog.set_price(product_id, price.into()).await
    }

    pub async fn restock(
        &self,
        product_id: ProductId,
        quantity: u32,
        reason: &str,
    ) -> Result<Movement> {
        self.ledger.restock(product_id, quantity, reason).await
    }

    pub async fn adjust(
        &self,
        product_id: ProductId,
        delta: i64,
        reason: &str,
    ) -> Result<Movement> {
        self.ledger.adjust(product_id, delta, reason).await
    }

    pub async fn set_low_stock_threshold(
        &self,
        product_id: ProductId,
        threshold: u32,
    ) -> Result<InventoryRecord> {
        self.ledger.set_low_stock_threshold(product_id, threshold).await
    }

    // Storefront.

    pub async fn convert_cart(&self, user_id: UserId, cart: &Cart) -> Result<Order> {
        self.converter.convert(user_id, cart).await
    }

    /// Starts a payment for a pending order.
    ///
    /// The provider is called without the order lock held; the attempt is
    /// stored as `initiated` before the call so the sweep can reclaim it if
    /// this future is dropped midway.
    pub async fn initiate_payment(
        &self,
        order_id: OrderId,
        variant: ProviderVariant,
    ) -> Result<ProviderRequest> {
        let gateway = self.registry.get(variant)?;

        let (order, attempt) = {
            let _guard = self.machine.lock(order_id).await;
            let order = self.machine.order(order_id).await?;
            let attempts = self.stores.attempts.for_order(order_id).await?;
            let active = attempts
                .iter()
                .find(|a| a.status == AttemptStatus::Initiated);

            match (order.status, active) {
                (OrderStatus::Pending, None) => {}
                (OrderStatus::Pending, Some(_)) => {
                    return Err(OrderError::PaymentInProgress { order_id });
                }
                (OrderStatus::AwaitingPayment, Some(active)) => {
                    return match &active.request {
                        Some(request) if active.provider == variant => Ok(request.clone()),
                        _ => Err(OrderError::PaymentInProgress { order_id }),
                    };
                }
                (from, _) => {
                    return Err(OrderError::InvalidTransition {
                        order_id,
                        from,
                        event: OrderEvent::PaymentInitiated.to_string(),
                    });
                }
            }

            let attempt = PaymentAttempt::new(
                self.stores.attempts.next_id().await?,
                order_id,
                variant,
            );
            self.stores.attempts.store(attempt.clone()).await?;
            (order, attempt)
        };

        let initiation = match tokio::time::timeout(
            self.config.provider_timeout,
            gateway.initiate(&order, &attempt),
        )
        .await
        {
            Ok(Ok(initiation)) => initiation,
            Ok(Err(err)) => {
                let err = match err {
                    err @ OrderError::ProviderUnavailable(_) => err,
                    other => OrderError::ProviderUnavailable(other.to_string()),
                };
                self.fail_attempt(&attempt, &err).await;
                return Err(err);
            }
            Err(_) => {
                let err = OrderError::ProviderUnavailable(format!(
                    "{variant} did not answer within {:?}",
                    self.config.provider_timeout
                ));
                self.fail_attempt(&attempt, &err).await;
                return Err(err);
            }
        };

        let guard = self.machine.lock(order_id).await;
        let mut current = self
            .stores
            .attempts
            .get(attempt.id)
            .await?
            .ok_or_else(|| OrderError::internal(format!("attempt {} vanished", attempt.id)))?;
        if current.status != AttemptStatus::Initiated {
            warn!(
                order_id,
                attempt = attempt.id,
                status = %current.status,
                "provider answered after the attempt expired"
            );
            return Err(OrderError::AttemptExpired {
                order_id,
                attempt_id: attempt.id,
            });
        }

        if let Err(err) = self.machine.payment_initiated(&guard, &initiation.request).await {
            current.set_status(AttemptStatus::Failed);
            self.stores.attempts.store(current).await?;
            return Err(err);
        }
        current.provider_reference = Some(initiation.request.provider_reference.clone());
        current.request = Some(initiation.request.clone());
        current.request_payload = Some(initiation.payload);
        current.updated_at = Utc::now();
        self.stores.attempts.store(current).await?;

        info!(
            order_id,
            provider = %variant,
            reference = %initiation.request.provider_reference,
            "payment initiated"
        );
        Ok(initiation.request)
    }

    async fn fail_attempt(&self, attempt: &PaymentAttempt, cause: &OrderError) {
        warn!(
            order_id = attempt.order_id,
            attempt = attempt.id,
            error = %cause,
            "payment initiation failed"
        );
        let _guard = self.machine.lock(attempt.order_id).await;
        let result = async {
            if let Some(mut current) = self.stores.attempts.get(attempt.id).await?
                && current.status == AttemptStatus::Initiated
            {
                current.set_status(AttemptStatus::Failed);
                self.stores.attempts.store(current).await?;
            }
            Ok::<_, OrderError>(())
        }
        .await;
        if let Err(err) = result {
            // Left initiated; the sweep reclaims it.
            warn!(
                order_id = attempt.order_id,
                attempt = attempt.id,
                error = %err,
                "could not mark attempt failed"
            );
        }
    }

    /// Cancels on behalf of `actor`. Users may cancel their own unpaid orders;
    /// admins may also cancel paid ones.
    pub async fn cancel_order(&self, order_id: OrderId, actor: Actor) -> Result<Order> {
        let guard = self.machine.lock(order_id).await;
        let order = self.machine.order(order_id).await?;
        let event = match actor {
            Actor::User(user_id) if user_id != order.user_id => {
                return Err(OrderError::NotOrderOwner { order_id });
            }
            Actor::User(_) => OrderEvent::UserCancelled,
            Actor::Admin => OrderEvent::AdminCancelled,
        };
        self.machine.apply_locked(&guard, event).await?;
        self.machine.order(order_id).await
    }

    pub async fn mark_shipped(&self, order_id: OrderId) -> Result<Order> {
        self.machine.apply(order_id, OrderEvent::MarkShipped).await?;
        self.machine.order(order_id).await
    }

    pub async fn mark_delivered(&self, order_id: OrderId) -> Result<Order> {
        self.machine.apply(order_id, OrderEvent::MarkDelivered).await?;
        self.machine.order(order_id).await
    }

    // Providers.

    pub async fn receive_callback(
        &self,
        variant: ProviderVariant,
        raw: &RawCallback,
    ) -> Result<Reconciliation> {
        self.coordinator.receive_callback(variant, raw).await
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.coordinator.sweep_expired().await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.coordinator.sweep_expired_at(now).await
    }

    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.coordinator.clone().spawn_sweeper(shutdown)
    }

    pub fn reconciliation_stats(&self) -> StatsSnapshot {
        self.coordinator.stats()
    }

    // Admin queries.

    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        self.machine.order(order_id).await
    }

    pub async fn orders(&self, filter: OrderFilter) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .stores
            .orders
            .get_all()
            .await?
            .into_iter()
            .filter(|o| filter.matches(o))
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    pub async fn attempts(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        let mut attempts = self.stores.attempts.for_order(order_id).await?;
        attempts.sort_by_key(|a| a.id);
        Ok(attempts)
    }

    pub async fn inventory(&self) -> Result<Vec<InventoryRecord>> {
        let mut records = self.stores.inventory.get_all().await?;
        records.sort_by_key(|r| r.product_id);
        Ok(records)
    }

    pub async fn inventory_record(&self, product_id: ProductId) -> Result<InventoryRecord> {
        self.ledger
            .record(product_id)
            .await?
            .ok_or(OrderError::UnknownProduct { product_id })
    }

    pub async fn low_stock(&self) -> Result<Vec<InventoryRecord>> {
        Ok(reports::low_stock(self.stores.inventory.get_all().await?))
    }

    pub async fn movements(&self, filter: MovementFilter) -> Result<Vec<Movement>> {
        self.stores.inventory.movements(filter).await
    }

    pub async fn sales_report(&self, range: SalesRange) -> Result<SalesReport> {
        let orders = self.stores.orders.get_all().await?;
        Ok(SalesReport::from_orders(&orders, range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::in_memory_stores;
    use crate::infrastructure::sandbox::{SandboxProvider, callback_body, signed_callback};
    use crate::domain::inventory::MovementKind;
    use crate::domain::payment::{CallbackOutcome, DisplayPayload};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    async fn engine_with(transport: SandboxProvider, config: EngineConfig) -> OrderEngine {
        let engine = OrderEngine::new(config, in_memory_stores(), Arc::new(transport));
        engine.register_product(1, dec!(12.50), 10, 2).await.unwrap();
        engine.register_product(2, dec!(3), 1, 0).await.unwrap();
        engine
    }

    async fn engine() -> OrderEngine {
        engine_with(SandboxProvider::new(), EngineConfig::default()).await
    }

    fn cart(lines: &[(ProductId, u32)]) -> Cart {
        Cart::from_lines(lines.iter().copied()).unwrap()
    }

    async fn confirm(engine: &OrderEngine, order_id: OrderId, reference: &str) -> Reconciliation {
        let variant = engine.order(order_id).await.unwrap().provider.unwrap();
        let secret = &engine.config().providers.for_variant(variant).callback_secret;
        let body = callback_body(variant, order_id, reference, CallbackOutcome::Confirmed);
        let raw = signed_callback(secret, body).unwrap();
        engine.receive_callback(variant, &raw).await.unwrap()
    }

    #[tokio::test]
    async fn test_checkout_pay_confirm_ship_deliver() {
        let engine = engine().await;
        let order = engine.convert_cart(5, &cart(&[(1, 2), (2, 1)])).await.unwrap();
        assert_eq!(order.total.value(), dec!(28));

        let request = engine
            .initiate_payment(order.id, ProviderVariant::Redirect)
            .await
            .unwrap();
        assert!(matches!(request.display_payload, DisplayPayload::Redirect { .. }));
        assert_eq!(
            engine.order(order.id).await.unwrap().status,
            OrderStatus::AwaitingPayment
        );

        let outcome = confirm(&engine, order.id, &request.provider_reference).await;
        assert_eq!(
            outcome,
            Reconciliation::Applied {
                order_id: order.id,
                status: OrderStatus::Paid
            }
        );
        let record = engine.inventory_record(1).await.unwrap();
        assert_eq!((record.available, record.reserved), (8, 0));
        let trade_no = format!("2026{:012}", order.id);
        let paid = engine.order(order.id).await.unwrap();
        assert_eq!(paid.provider_transaction.as_deref(), Some(trade_no.as_str()));
        let attempts = engine.attempts(order.id).await.unwrap();
        assert_eq!(
            attempts[0].provider_transaction.as_deref(),
            Some(trade_no.as_str())
        );

        engine.mark_shipped(order.id).await.unwrap();
        let delivered = engine.mark_delivered(order.id).await.unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);

        let report = engine.sales_report(SalesRange::default()).await.unwrap();
        assert_eq!(report.order_count, 1);
        assert_eq!(report.revenue.value(), dec!(28));
        assert_eq!(report.daily.len(), 1);
        assert_eq!(report.daily[0].date, delivered.created_at.date_naive());

        let yesterday = delivered.created_at.date_naive() - chrono::Days::new(1);
        let before = engine
            .sales_report(SalesRange::between(yesterday, yesterday))
            .await
            .unwrap();
        assert_eq!(before.order_count, 0);
    }

    #[tokio::test]
    async fn test_second_initiate_returns_same_request() {
        let engine = engine().await;
        let order = engine.convert_cart(1, &cart(&[(1, 1)])).await.unwrap();

        let first = engine
            .initiate_payment(order.id, ProviderVariant::QrCode)
            .await
            .unwrap();
        let again = engine
            .initiate_payment(order.id, ProviderVariant::QrCode)
            .await
            .unwrap();
        assert_eq!(first, again);
        assert!(matches!(
            engine
                .initiate_payment(order.id, ProviderVariant::Redirect)
                .await,
            Err(OrderError::PaymentInProgress { .. })
        ));
        assert_eq!(engine.attempts(order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_order_pending() {
        let transport = SandboxProvider::new().failing(ProviderVariant::DelegatedApproval);
        let engine = engine_with(transport, EngineConfig::default()).await;
        let order = engine.convert_cart(1, &cart(&[(1, 1)])).await.unwrap();

        let result = engine
            .initiate_payment(order.id, ProviderVariant::DelegatedApproval)
            .await;
        assert!(matches!(result, Err(OrderError::ProviderUnavailable(_))));
        assert_eq!(engine.order(order.id).await.unwrap().status, OrderStatus::Pending);
        let attempts = engine.attempts(order.id).await.unwrap();
        assert_eq!(attempts[0].status, AttemptStatus::Failed);

        // Another provider still works.
        engine
            .initiate_payment(order.id, ProviderVariant::QrCode)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_provider_timeout_is_bounded() {
        let transport = SandboxProvider::new().with_latency(Duration::from_millis(200));
        let config = EngineConfig::default().with_provider_timeout(Duration::from_millis(20));
        let engine = engine_with(transport, config).await;
        let order = engine.convert_cart(1, &cart(&[(1, 1)])).await.unwrap();

        let result = engine
            .initiate_payment(order.id, ProviderVariant::Redirect)
            .await;
        assert!(matches!(result, Err(OrderError::ProviderUnavailable(_))));
        assert_eq!(
            engine.attempts(order.id).await.unwrap()[0].status,
            AttemptStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_provider_answering_after_sweep_expires_attempt() {
        let transport = SandboxProvider::new().with_latency(Duration::from_millis(100));
        let config = EngineConfig::default().with_payment_timeout(Duration::from_millis(10));
        let engine = Arc::new(engine_with(transport, config).await);
        let order = engine.convert_cart(1, &cart(&[(1, 1)])).await.unwrap();

        let initiating = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .initiate_payment(order.id, ProviderVariant::Redirect)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        let report = engine.sweep().await.unwrap();
        assert_eq!((report.timed_out, report.cancelled), (1, 0));

        assert!(matches!(
            initiating.await.unwrap(),
            Err(OrderError::AttemptExpired { .. })
        ));
        // The order keeps its reservation and may pay again.
        assert_eq!(engine.order(order.id).await.unwrap().status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancellation_actors() {
        let engine = engine().await;
        let order = engine.convert_cart(4, &cart(&[(1, 3)])).await.unwrap();

        assert!(matches!(
            engine.cancel_order(order.id, Actor::User(5)).await,
            Err(OrderError::NotOrderOwner { .. })
        ));
        let cancelled = engine.cancel_order(order.id, Actor::User(4)).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(engine.inventory_record(1).await.unwrap().available, 10);

        // Cancelling again changes nothing.
        engine.cancel_order(order.id, Actor::User(4)).await.unwrap();
        assert_eq!(engine.inventory_record(1).await.unwrap().available, 10);
    }

    #[tokio::test]
    async fn test_admin_cancel_of_paid_order_restocks() {
        let engine = engine().await;
        let order = engine.convert_cart(4, &cart(&[(1, 3)])).await.unwrap();
        let request = engine
            .initiate_payment(order.id, ProviderVariant::QrCode)
            .await
            .unwrap();
        confirm(&engine, order.id, &request.provider_reference).await;

        assert!(matches!(
            engine.cancel_order(order.id, Actor::User(4)).await,
            Err(OrderError::InvalidTransition { .. })
        ));
        engine.cancel_order(order.id, Actor::Admin).await.unwrap();
        assert_eq!(engine.inventory_record(1).await.unwrap().available, 10);

        let restocks: Vec<Movement> = engine
            .movements(MovementFilter::product(1))
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.kind == MovementKind::Restock)
            .collect();
        assert_eq!(restocks.len(), 2);
        assert!(restocks[1].reason.contains(&order.id.to_string()));
    }

    #[tokio::test]
    async fn test_register_product_rejects_free_items() {
        let engine = engine().await;
        assert!(matches!(
            engine.register_product(9, dec!(0), 5, 0).await,
            Err(OrderError::PriceUnavailable { product_id: 9 })
        ));
        assert!(matches!(
            engine.inventory_record(9).await,
            Err(OrderError::UnknownProduct { product_id: 9 })
        ));
    }

    #[tokio::test]
    async fn test_low_stock_and_filters() {
        let engine = engine().await;
        engine.convert_cart(1, &cart(&[(2, 1)])).await.unwrap();
        engine.convert_cart(2, &cart(&[(1, 1)])).await.unwrap();

        let low: Vec<ProductId> = engine
            .low_stock()
            .await
            .unwrap()
            .iter()
            .map(|r| r.product_id)
            .collect();
        assert_eq!(low, vec![2]);

        engine.set_low_stock_threshold(1, 9).await.unwrap();
        assert_eq!(engine.low_stock().await.unwrap().len(), 2);
        assert_eq!(engine.orders(OrderFilter::user(2)).await.unwrap().len(), 1);
        assert_eq!(
            engine
                .orders(OrderFilter::status(OrderStatus::Pending))
                .await
                .unwrap()
                .len(),
            2
        );
    }
}
