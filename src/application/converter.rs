use crate::application::ledger::InventoryLedger;
use crate::application::state_machine::OrderStateMachine;
use crate::domain::UserId;
use crate::domain::cart::Cart;
use crate::domain::money::UnitPrice;
use crate::domain::order::{LineItem, Order};
use crate::domain::ports::{OrderStoreRef, PriceCatalogRef};
use crate::error::{OrderError, Result};
use std::sync::Arc;
use tracing::{error, warn};

/// Turns a cart into a pending order, all or nothing.
pub struct CartConverter {
    catalog: PriceCatalogRef,
    orders: OrderStoreRef,
    ledger: Arc<InventoryLedger>,
    machine: Arc<OrderStateMachine>,
}

impl CartConverter {
    pub fn new(
        catalog: PriceCatalogRef,
        orders: OrderStoreRef,
        ledger: Arc<InventoryLedger>,
        machine: Arc<OrderStateMachine>,
    ) -> Self {
        Self {
            catalog,
            orders,
            ledger,
            machine,
        }
    }

    pub async fn convert(&self, user_id: UserId, cart: &Cart) -> Result<Order> {
        cart.validate()?;

        // Prices are read from the catalog, never from the client, and all of
        // them before any stock is touched.
        let mut lines = Vec::with_capacity(cart.len());
        for (product_id, quantity) in cart.lines() {
            let price = self
                .catalog
                .unit_price(product_id)
                .await?
                .ok_or(OrderError::PriceUnavailable { product_id })?;
            lines.push(LineItem {
                product_id,
                quantity,
                unit_price: UnitPrice::new(product_id, price)?,
            });
        }

        let order_id = self.orders.next_id().await?;
        // Reserving runs on its own task: a caller dropped midway must not
        // strand the lines reserved so far without an order to release them.
        let task = tokio::spawn(reserve_and_create(
            self.ledger.clone(),
            self.machine.clone(),
            Order::new(order_id, user_id, lines),
        ));
        task.await.map_err(|e| {
            OrderError::internal(format!("conversion of order {order_id} failed: {e}"))
        })?
    }
}

/// Reserves every line of `order`, then stores it. On the first failed line
/// the reservations already made are released again.
async fn reserve_and_create(
    ledger: Arc<InventoryLedger>,
    machine: Arc<OrderStateMachine>,
    order: Order,
) -> Result<Order> {
    let order_id = order.id;
    let mut reserved: Vec<&LineItem> = Vec::with_capacity(order.lines.len());
    for line in &order.lines {
        if let Err(err) = ledger.reserve(line.product_id, line.quantity, order_id).await {
            warn!(
                order_id,
                product_id = line.product_id,
                error = %err,
                "reservation failed, rolling back"
            );
            for done in reserved {
                let released = ledger.release(done.product_id, done.quantity, order_id).await;
                if let Err(rollback) = released {
                    error!(
                        order_id,
                        product_id = done.product_id,
                        error = %rollback,
                        "rollback release failed"
                    );
                }
            }
            return Err(err);
        }
        reserved.push(line);
    }

    machine.create(order).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProductId;
    use crate::domain::inventory::{InventoryRecord, Movement};
    use crate::domain::money::Money;
    use crate::domain::order::OrderStatus;
    use crate::domain::ports::{InventoryStore, InventoryStoreRef, MovementFilter, OrderStore};
    use crate::infrastructure::in_memory::{InMemoryInventoryStore, in_memory_stores};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Fixture {
        converter: CartConverter,
        ledger: Arc<InventoryLedger>,
        orders: OrderStoreRef,
    }

    async fn fixture() -> Fixture {
        fixture_on(Arc::new(InMemoryInventoryStore::new())).await
    }

    async fn fixture_on(inventory: InventoryStoreRef) -> Fixture {
        let stores = in_memory_stores();
        let ledger = Arc::new(InventoryLedger::new(inventory));
        let machine = Arc::new(OrderStateMachine::new(stores.orders.clone(), ledger.clone()));
        for (product_id, stock, price) in [(1, 2, dec!(10.00)), (2, 1, dec!(3.50))] {
            ledger.register(product_id, 0).await.unwrap();
            ledger.restock(product_id, stock, "initial").await.unwrap();
            stores.catalog.set_price(product_id, price).await.unwrap();
        }
        ledger.register(3, 0).await.unwrap();
        ledger.restock(3, 5, "initial").await.unwrap();
        let orders = stores.orders.clone();
        let converter = CartConverter::new(stores.catalog, stores.orders, ledger.clone(), machine);
        Fixture {
            converter,
            ledger,
            orders,
        }
    }

    /// Stalls every read of one product's record.
    struct SlowInventory {
        inner: InMemoryInventoryStore,
        slow_product: ProductId,
    }

    #[async_trait]
    impl InventoryStore for SlowInventory {
        async fn get(&self, product_id: ProductId) -> Result<Option<InventoryRecord>> {
            if product_id == self.slow_product {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.inner.get(product_id).await
        }

        async fn store(&self, record: InventoryRecord) -> Result<()> {
            self.inner.store(record).await
        }

        async fn append(&self, record: InventoryRecord, movement: Movement) -> Result<Movement> {
            self.inner.append(record, movement).await
        }

        async fn get_all(&self) -> Result<Vec<InventoryRecord>> {
            self.inner.get_all().await
        }

        async fn movements(&self, filter: MovementFilter) -> Result<Vec<Movement>> {
            self.inner.movements(filter).await
        }
    }

    async fn slow_on_product_2() -> Fixture {
        let inventory = Arc::new(SlowInventory {
            inner: InMemoryInventoryStore::new(),
            slow_product: 2,
        });
        fixture_on(inventory).await
    }

    async fn available(f: &Fixture, product_id: u32) -> u32 {
        f.ledger.record(product_id).await.unwrap().unwrap().available
    }

    #[tokio::test]
    async fn test_conversion_snapshots_prices() {
        let f = fixture().await;
        let cart = Cart::from_lines([(1, 2), (2, 1)]).unwrap();
        let order = f.converter.convert(9, &cart).await.unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.user_id, 9);
        assert_eq!(order.total, Money::new(dec!(23.50)));
        assert_eq!(available(&f, 1).await, 0);
        assert_eq!(f.ledger.record(1).await.unwrap().unwrap().reserved, 2);
    }

    #[tokio::test]
    async fn test_failed_line_rolls_back_earlier_lines() {
        let f = fixture().await;
        let cart = Cart::from_lines([(1, 2), (2, 5)]).unwrap();
        let result = f.converter.convert(9, &cart).await;

        assert!(matches!(
            result,
            Err(OrderError::InsufficientStock { product_id: 2, .. })
        ));
        assert_eq!(available(&f, 1).await, 2);
        assert_eq!(available(&f, 2).await, 1);
    }

    #[tokio::test]
    async fn test_missing_price_rejected_before_reserving() {
        let f = fixture().await;
        let cart = Cart::from_lines([(1, 1), (3, 1)]).unwrap();
        let result = f.converter.convert(9, &cart).await;

        assert!(matches!(result, Err(OrderError::PriceUnavailable { product_id: 3 })));
        assert_eq!(available(&f, 1).await, 2);
        assert_eq!(available(&f, 3).await, 5);
    }

    #[tokio::test]
    async fn test_empty_cart() {
        let f = fixture().await;
        assert!(matches!(
            f.converter.convert(9, &Cart::new()).await,
            Err(OrderError::EmptyCart)
        ));
    }

    #[tokio::test]
    async fn test_abandoned_conversion_still_rolls_back() {
        let f = slow_on_product_2().await;
        let cart = Cart::from_lines([(1, 1), (2, 5)]).unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), f.converter.convert(9, &cart)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let record = f.ledger.record(1).await.unwrap().unwrap();
        assert_eq!((record.available, record.reserved), (2, 0));
        assert_eq!(f.ledger.reservation(1, 1).await.unwrap().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_conversion_still_creates_the_order() {
        let f = slow_on_product_2().await;
        let cart = Cart::from_lines([(1, 1), (2, 1)]).unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), f.converter.convert(9, &cart)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let order = f.orders.get(1).await.unwrap().expect("order stored");
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(f.ledger.reservation(1, 1).await.unwrap().outstanding(), 1);
        assert_eq!(f.ledger.reservation(2, 1).await.unwrap().outstanding(), 1);
    }
}
