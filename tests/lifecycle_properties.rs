use orderflow::application::coordinator::Reconciliation;
use orderflow::application::engine::{Actor, OrderEngine};
use orderflow::config::EngineConfig;
use orderflow::domain::cart::Cart;
use orderflow::domain::order::OrderStatus;
use orderflow::domain::payment::{CallbackOutcome, ProviderVariant, RawCallback};
use orderflow::domain::ports::MovementFilter;
use orderflow::error::OrderError;
use orderflow::infrastructure::in_memory::in_memory_stores;
use orderflow::infrastructure::sandbox::{SandboxProvider, callback_body, signed_callback};
use rust_decimal_macros::dec;
use std::sync::Arc;

async fn engine(stock: &[(u32, u32)]) -> Arc<OrderEngine> {
    let engine = OrderEngine::new(
        EngineConfig::default(),
        in_memory_stores(),
        Arc::new(SandboxProvider::new()),
    );
    for &(product_id, units) in stock {
        engine
            .register_product(product_id, dec!(9.99), units, 0)
            .await
            .unwrap();
    }
    Arc::new(engine)
}

fn cart(lines: &[(u32, u32)]) -> Cart {
    Cart::from_lines(lines.iter().copied()).unwrap()
}

fn signed(
    engine: &OrderEngine,
    variant: ProviderVariant,
    order_id: u64,
    reference: &str,
    outcome: CallbackOutcome,
) -> RawCallback {
    let secret = &engine.config().providers.for_variant(variant).callback_secret;
    signed_callback(secret, callback_body(variant, order_id, reference, outcome)).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkouts_for_last_unit() {
    let engine = engine(&[(1, 1)]).await;

    let mut handles = Vec::new();
    for user in 1..=8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.convert_cart(user, &cart(&[(1, 1)])).await
        }));
    }

    let mut won = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(OrderError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(won, 1);
    let record = engine.inventory_record(1).await.unwrap();
    assert_eq!((record.available, record.reserved), (0, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_oversell_under_mixed_quantities() {
    let engine = engine(&[(1, 25)]).await;

    let mut handles = Vec::new();
    for i in 0..40u32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.convert_cart(i, &cart(&[(1, i % 3 + 1)])).await
        }));
    }
    let mut reserved = 0;
    for handle in handles {
        if let Ok(order) = handle.await.unwrap() {
            reserved += order.units();
        }
    }

    let record = engine.inventory_record(1).await.unwrap();
    assert!(reserved <= 25);
    assert_eq!(record.reserved, reserved);
    assert_eq!(record.available + record.reserved, 25);
}

#[tokio::test]
async fn test_failed_conversion_leaves_stock_untouched() {
    let engine = engine(&[(1, 5), (2, 5), (3, 1)]).await;
    let before = engine.inventory().await.unwrap();
    let log_before = engine.movements(MovementFilter::default()).await.unwrap().len();

    let result = engine.convert_cart(1, &cart(&[(1, 2), (2, 3), (3, 2)])).await;
    assert!(matches!(
        result,
        Err(OrderError::InsufficientStock { product_id: 3, .. })
    ));

    let after = engine.inventory().await.unwrap();
    for (b, a) in before.iter().zip(&after) {
        assert_eq!((b.available, b.reserved), (a.available, a.reserved));
    }
    // Reservations that went through were released again; nothing is outstanding.
    let log = engine.movements(MovementFilter::default()).await.unwrap();
    assert_eq!(log.len(), log_before + 4);
}

#[tokio::test]
async fn test_duplicate_confirmation_changes_nothing() {
    let engine = engine(&[(1, 2)]).await;
    let order = engine.convert_cart(1, &cart(&[(1, 2)])).await.unwrap();
    let request = engine
        .initiate_payment(order.id, ProviderVariant::Redirect)
        .await
        .unwrap();
    let raw = signed(
        &engine,
        ProviderVariant::Redirect,
        order.id,
        &request.provider_reference,
        CallbackOutcome::Confirmed,
    );

    engine
        .receive_callback(ProviderVariant::Redirect, &raw)
        .await
        .unwrap();
    let movements = engine.movements(MovementFilter::default()).await.unwrap().len();
    let again = engine
        .receive_callback(ProviderVariant::Redirect, &raw)
        .await
        .unwrap();

    assert_eq!(again, Reconciliation::Duplicate { order_id: order.id });
    assert_eq!(engine.order(order.id).await.unwrap().status, OrderStatus::Paid);
    assert_eq!(
        engine.movements(MovementFilter::default()).await.unwrap().len(),
        movements
    );
    let record = engine.inventory_record(1).await.unwrap();
    assert_eq!((record.available, record.reserved), (0, 0));
    assert_eq!(engine.reconciliation_stats().duplicates, 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_confirmations_apply_once() {
    let engine = engine(&[(1, 3)]).await;
    let order = engine.convert_cart(1, &cart(&[(1, 3)])).await.unwrap();
    let request = engine
        .initiate_payment(order.id, ProviderVariant::DelegatedApproval)
        .await
        .unwrap();
    let raw = signed(
        &engine,
        ProviderVariant::DelegatedApproval,
        order.id,
        &request.provider_reference,
        CallbackOutcome::Confirmed,
    );

    let mut handles = Vec::new();
    for _ in 0..5 {
        let engine = engine.clone();
        let raw = raw.clone();
        handles.push(tokio::spawn(async move {
            engine
                .receive_callback(ProviderVariant::DelegatedApproval, &raw)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stats = engine.reconciliation_stats();
    assert_eq!((stats.applied, stats.duplicates), (1, 4));
    let commits = engine
        .movements(MovementFilter::default())
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.kind.to_string() == "commit")
        .count();
    assert_eq!(commits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_and_confirmation_race() {
    for _ in 0..20 {
        let engine = engine(&[(1, 2)]).await;
        let order = engine.convert_cart(1, &cart(&[(1, 2)])).await.unwrap();
        let request = engine
            .initiate_payment(order.id, ProviderVariant::QrCode)
            .await
            .unwrap();
        let raw = signed(
            &engine,
            ProviderVariant::QrCode,
            order.id,
            &request.provider_reference,
            CallbackOutcome::Confirmed,
        );
        let later = chrono::Utc::now() + chrono::Duration::hours(1);

        let sweeper = engine.clone();
        let confirmer = engine.clone();
        let (swept, confirmed) = tokio::join!(
            tokio::spawn(async move { sweeper.sweep_at(later).await }),
            tokio::spawn(async move {
                confirmer
                    .receive_callback(ProviderVariant::QrCode, &raw)
                    .await
            }),
        );
        swept.unwrap().unwrap();
        confirmed.unwrap().unwrap();

        let record = engine.inventory_record(1).await.unwrap();
        let status = engine.order(order.id).await.unwrap().status;
        match status {
            OrderStatus::Paid => assert_eq!((record.available, record.reserved), (0, 0)),
            OrderStatus::Cancelled => assert_eq!((record.available, record.reserved), (2, 0)),
            other => panic!("order left in {other}"),
        }
    }
}

#[tokio::test]
async fn test_illegal_transitions_leave_state_unchanged() {
    let engine = engine(&[(1, 4)]).await;
    let order = engine.convert_cart(1, &cart(&[(1, 1)])).await.unwrap();
    let log = engine.movements(MovementFilter::default()).await.unwrap().len();

    assert!(matches!(
        engine.mark_shipped(order.id).await,
        Err(OrderError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.mark_delivered(order.id).await,
        Err(OrderError::InvalidTransition { .. })
    ));

    engine.cancel_order(order.id, Actor::Admin).await.unwrap();
    assert!(matches!(
        engine
            .initiate_payment(order.id, ProviderVariant::Redirect)
            .await,
        Err(OrderError::InvalidTransition { .. })
    ));
    assert_eq!(
        engine.order(order.id).await.unwrap().status,
        OrderStatus::Cancelled
    );
    // Only the release from the cancel was added.
    assert_eq!(
        engine.movements(MovementFilter::default()).await.unwrap().len(),
        log + 1
    );
}

#[tokio::test]
async fn test_untrusted_callback_never_reaches_the_order() {
    let engine = engine(&[(1, 1)]).await;
    let order = engine.convert_cart(1, &cart(&[(1, 1)])).await.unwrap();
    let request = engine
        .initiate_payment(order.id, ProviderVariant::QrCode)
        .await
        .unwrap();

    let body = callback_body(
        ProviderVariant::QrCode,
        order.id,
        &request.provider_reference,
        CallbackOutcome::Confirmed,
    );
    let unsigned = RawCallback::new(body.clone(), None);
    let wrong_key = signed_callback("not-the-secret", body).unwrap();

    for raw in [unsigned, wrong_key] {
        assert!(matches!(
            engine.receive_callback(ProviderVariant::QrCode, &raw).await,
            Err(OrderError::UntrustedCallback(_))
        ));
    }
    assert_eq!(
        engine.order(order.id).await.unwrap().status,
        OrderStatus::AwaitingPayment
    );
    assert_eq!(engine.reconciliation_stats().untrusted, 2);
}
