use escrow_engine::application::rate_limiter::{RateLimitRule, RateLimitSettings, RateLimiter};
use escrow_engine::config::EngineConfig;
use escrow_engine::domain::account::{ServerConfig, ServerId};
use escrow_engine::domain::escrow::EscrowStatus;
use escrow_engine::domain::payment_method::PaymentMethodType;
use escrow_engine::domain::ports::TransactionStore;
use escrow_engine::domain::transaction::{TransactionId, TransactionStatus};
use escrow_engine::error::PaymentError;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

mod common;
use common::{SERVER, full_account, harness, harness_with, pay, user};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_rate_limiter_under_concurrent_load() {
    let limiter = Arc::new(RateLimiter::with_rule(60_000, 10));

    let mut handles = Vec::new();
    for user in 0..100 {
        for _ in 0..15 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let key = format!("user-{user}");
                (user, limiter.check_limit(&key, "payment").allowed)
            }));
        }
    }

    let mut per_user: HashMap<u32, (u32, u32)> = HashMap::new();
    for handle in handles {
        let (user, allowed) = handle.await.unwrap();
        let entry = per_user.entry(user).or_default();
        if allowed {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    let allowed: u32 = per_user.values().map(|(a, _)| a).sum();
    let blocked: u32 = per_user.values().map(|(_, b)| b).sum();
    assert_eq!(allowed, 1000);
    assert_eq!(blocked, 500);
    assert!(per_user.values().all(|&counts| counts == (10, 5)));
    assert_eq!(limiter.tracked_keys(), 100);
    limiter.destroy();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_payments_across_users() {
    let h = harness(20);

    let mut handles = Vec::new();
    {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let sender = rng.gen_range(1..=20);
            let mut recipient = rng.gen_range(1..=20);
            if recipient == sender {
                recipient = sender % 20 + 1;
            }
            let cents: i64 = rng.gen_range(100..=50_000);
            let amount = Decimal::new(cents, 2);
            let service = Arc::clone(&h.service);
            handles.push(tokio::spawn(async move {
                service
                    .initiate_payment(pay(sender, recipient, amount, PaymentMethodType::Other))
                    .await
            }));
        }
    }

    let mut ids = HashSet::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(tx) => assert!(ids.insert(tx.id), "duplicate id {}", tx.id),
            Err(PaymentError::RateLimited { .. }) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }

    let all = h.ledger.all().await.unwrap();
    assert!(all.len() <= 100);
    assert_eq!(all.len(), ids.len());
    for tx in &all {
        assert_ne!(tx.sender_id, tx.recipient_id);
        assert!(tx.amount.value() >= dec!(1.00) && tx.amount.value() <= dec!(500.00));
        assert!(matches!(
            tx.status,
            TransactionStatus::Pending | TransactionStatus::Escrowed
        ));
    }
    assert_eq!(h.ledger.escrow_count(), all.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_daily_count_holds_under_concurrency() {
    let mut policy = ServerConfig::new(ServerId::new(SERVER));
    policy.max_transactions_per_user = Some(5);
    let config = EngineConfig {
        rate_limits: RateLimitSettings {
            default: RateLimitRule::new(60_000, 1_000),
            ..RateLimitSettings::default()
        },
        ..EngineConfig::default()
    };
    let h = harness_with(config, vec![full_account(1), full_account(2)], vec![policy]);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move {
                service
                    .initiate_payment(
                        pay(1, 2, dec!(10), PaymentMethodType::Other).on_server(ServerId::new(SERVER)),
                    )
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(PaymentError::LimitExceeded(_)) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(created, 5);
    assert_eq!(h.ledger.all().await.unwrap().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_approve_and_reject_race() {
    let h = harness(2);
    let tx = h
        .service
        .initiate_payment(pay(1, 2, dec!(40), PaymentMethodType::Other))
        .await
        .unwrap();

    let approve = {
        let service = Arc::clone(&h.service);
        tokio::spawn(async move { service.process_payment_request(tx.id, true).await })
    };
    let reject = {
        let service = Arc::clone(&h.service);
        tokio::spawn(async move { service.process_payment_request(tx.id, false).await })
    };
    let outcomes = [approve.await.unwrap(), reject.await.unwrap()];
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);

    let final_tx = h.service.get_transaction(tx.id).await.unwrap().unwrap();
    let escrow = h.service.get_escrow(tx.id).await.unwrap().unwrap();
    match final_tx.status {
        TransactionStatus::Completed => assert_eq!(escrow.status, EscrowStatus::Released),
        TransactionStatus::Cancelled => assert_eq!(escrow.status, EscrowStatus::Returned),
        other => panic!("unexpected status {other}"),
    }
}

#[tokio::test]
async fn test_double_hold_keeps_one_record() {
    let h = harness(2);
    let tx = h
        .service
        .initiate_payment(pay(1, 2, dec!(40), PaymentMethodType::Other))
        .await
        .unwrap();
    let source = common::wallet(&user(1));

    let again = h.service.escrow().hold_funds(tx.id, tx.amount, &source).await;
    assert!(matches!(again, Err(PaymentError::AlreadyHeld(_))));
    assert_eq!(h.ledger.escrow_count(), 1);
    assert_eq!(h.rail.submitted(), 1);
}

#[tokio::test]
async fn test_unknown_transaction() {
    let h = harness(1);
    let missing = TransactionId::generate();
    assert!(matches!(
        h.service.process_payment_request(missing, true).await,
        Err(PaymentError::NotFound { .. })
    ));
    assert!(h.service.get_transaction(missing).await.unwrap().is_none());
}
