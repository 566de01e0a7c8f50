//! End-to-end flywheel runs against the paper rig.

use chrono::Utc;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use flywheel::chains::TxStatus;
use flywheel::dashboard::{build_router, StatusState};
use flywheel::scheduler::TaskName;
use flywheel::storage::{LedgerStore, PendingDetails};
use flywheel::types::{EventStatus, EventType, NewEvent};

use crate::harness::{Rig, FEE_VAULT, MINT, RESERVE_VAULT, XAUT};

#[tokio::test]
async fn test_fee_boundary_through_flywheel() {
    let rig = Rig::new().await;

    rig.fund_fee_vault(dec!(0.015));
    let outcome = rig.flywheel.fire(TaskName::FeeCollection).await;
    assert!(outcome.skipped);
    assert_eq!(outcome.reason.as_deref(), Some("insufficient_fees"));
    assert!(rig.swap.orders().is_empty());

    let notices = rig.ledger.list_recent(Some(EventType::SystemNotice), 10).await.unwrap();
    assert_eq!(notices[0].meta_str("reason"), Some("insufficient_fees"));
    assert_eq!(notices[0].meta_str("balance"), Some("0.015"));

    rig.fund_fee_vault(dec!(0.0151));
    let outcome = rig.flywheel.fire(TaskName::FeeCollection).await;
    assert!(outcome.success && !outcome.skipped);
    assert_eq!(outcome.amount, Some(dec!(0.0101)));
    assert_eq!(rig.sol.native(FEE_VAULT), dec!(0.005));

    let (request, _) = &rig.swap.orders()[0];
    assert_eq!(request.destination_address, RESERVE_VAULT);
    assert_eq!(request.refund_address, FEE_VAULT);
}

#[tokio::test]
async fn test_full_cycle_feeds_snapshot_totals() {
    let rig = Rig::new().await;
    rig.fund_fee_vault(dec!(0.205));
    rig.relayer.accrue(dec!(0.1));
    rig.fund_reserve(dec!(0.5), dec!(0.02));

    assert!(rig.flywheel.fire(TaskName::FeeCollection).await.success);
    assert_eq!(rig.relayer.claims(), 1);
    assert!(rig.flywheel.fire(TaskName::Redeploy).await.success);
    assert_eq!(rig.eth.token(RESERVE_VAULT, XAUT), dec!(0.45));

    // Sale proceeds settle in the fee vault.
    rig.fund_fee_vault(dec!(0.505));
    let buyback = rig.flywheel.fire(TaskName::Buyback).await;
    assert_eq!(buyback.amount, Some(dec!(495)));

    assert!(rig.flywheel.fire(TaskName::Snapshot).await.success);
    let snapshot = rig.ledger.latest_snapshot().await.unwrap().unwrap();
    let fields = &snapshot.fields;
    assert_eq!(fields.total_fees_collected, dec!(0.3));
    assert_eq!(fields.total_reserve_bought, dec!(0.015));
    assert_eq!(fields.total_reserve_sold, dec!(0.05));
    assert_eq!(fields.total_tokens_bought, dec!(495));
    assert_eq!(fields.reserve_vault_balance, dec!(0.45));
    assert_eq!(fields.treasury_balance, dec!(495));
    assert_eq!(fields.reference_price, Some(rig.cfg.price.fallback_price));
    assert_eq!(fields.current_value, dec!(0.45) * rig.cfg.price.fallback_price);
    assert_eq!(fields.estimated_redeploy_units, dec!(0.045));
    assert_eq!(rig.sol.token(FEE_VAULT, MINT), dec!(495));
}

#[tokio::test]
async fn test_every_action_ends_in_one_terminal_event() {
    let rig = Rig::new().await;
    rig.fund_fee_vault(dec!(0.3));
    rig.fund_reserve(dec!(1), dec!(0.02));

    rig.flywheel.fire(TaskName::FeeCollection).await;
    rig.flywheel.fire(TaskName::Redeploy).await;
    rig.flywheel.fire(TaskName::Buyback).await;

    let events = rig.ledger.list_recent(None, 100).await.unwrap();
    assert!(events.iter().all(|e| e.status != EventStatus::Pending));
    for event_type in [EventType::FeeCollection, EventType::GoldPurchase, EventType::GoldSale] {
        let matching: Vec<_> = events.iter().filter(|e| e.event_type == event_type).collect();
        assert_eq!(matching.len(), 1, "{event_type}");
        assert_eq!(matching[0].status, EventStatus::Success);
        assert!(matching[0].tx_ref.is_some());
    }
}

#[tokio::test]
async fn test_redeploy_switches_to_long_term_cadence_in_every_outcome() {
    // (holdings, gas, expect success)
    let scenarios = [
        (dec!(0), dec!(0.02), true),
        (dec!(0.5), dec!(0.001), false),
        (dec!(0.5), dec!(0.02), true),
    ];

    for (holdings, gas, succeeds) in scenarios {
        let rig = Rig::new().await;
        rig.fund_reserve(holdings, gas);

        let outcome = rig.flywheel.fire(TaskName::Redeploy).await;
        assert_eq!(outcome.success, succeeds, "holdings={holdings} gas={gas}");

        assert_eq!(
            rig.scheduler.interval(TaskName::FeeCollection),
            Some(Duration::from_secs(900))
        );
        assert_eq!(
            rig.scheduler.interval(TaskName::Redeploy),
            Some(Duration::from_secs(10_800))
        );
        let remaining = rig.scheduler.time_remaining(TaskName::Redeploy).unwrap();
        assert!(remaining > chrono::Duration::seconds(10_790));
    }
}

#[tokio::test]
async fn test_failure_logs_error_and_still_rearms() {
    let rig = Rig::new().await;
    rig.sol.set_error("rpc down");

    let outcome = rig.flywheel.fire(TaskName::FeeCollection).await;
    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("rpc down"));

    let errors = rig.ledger.list_recent(Some(EventType::SystemError), 10).await.unwrap();
    assert_eq!(errors[0].meta_str("context"), Some("fee_collection"));
    let remaining = rig.scheduler.time_remaining(TaskName::FeeCollection).unwrap();
    assert!(remaining > chrono::Duration::seconds(290));

    rig.sol.clear_error();
    rig.fund_fee_vault(dec!(0.1));
    assert!(rig.flywheel.fire(TaskName::FeeCollection).await.success);
}

#[tokio::test]
async fn test_failed_buyback_leaves_failed_finish_and_keeps_native() {
    let rig = Rig::new().await;
    rig.fund_fee_vault(dec!(0.51));
    rig.dex.set_error("no route");

    let outcome = rig.flywheel.fire(TaskName::Buyback).await;
    assert!(!outcome.success);
    assert_eq!(rig.sol.native(FEE_VAULT), dec!(0.51));

    let finishes = rig.ledger.list_recent(Some(EventType::RedeployFinish), 10).await.unwrap();
    assert_eq!(finishes.len(), 1);
    assert_eq!(finishes[0].status, EventStatus::Failed);
    let errors = rig.ledger.list_recent(Some(EventType::SystemError), 10).await.unwrap();
    assert_eq!(errors[0].meta_str("context"), Some("finish_redeploy"));
}

#[tokio::test]
async fn test_tick_fires_due_tasks_in_order() {
    let rig = Rig::new().await;

    let at = Utc::now() + chrono::Duration::seconds(301);
    let outcomes = rig.flywheel.tick(at).await;
    let tasks: Vec<_> = outcomes.iter().map(|(task, _)| *task).collect();
    assert_eq!(
        tasks,
        vec![TaskName::FeeCollection, TaskName::Buyback, TaskName::Snapshot]
    );
    assert!(outcomes.iter().all(|(_, outcome)| outcome.success));
    assert!(rig.ledger.latest_snapshot().await.unwrap().is_some());
}

#[tokio::test]
async fn test_reconciled_events_count_toward_totals() {
    let rig = Rig::new().await;
    rig.sol.set_status(
        "sig-landed",
        TxStatus {
            confirmed: true,
            finalized: true,
            error: None,
        },
    );
    rig.ledger
        .append(
            NewEvent::new(EventType::FeeCollection, EventStatus::Pending)
                .with_in(dec!(0.2), "SOL")
                .with_tx("sig-landed"),
        )
        .await
        .unwrap();
    rig.ledger
        .append(NewEvent::new(EventType::FeeCollection, EventStatus::Pending).with_in(dec!(0.7), "SOL"))
        .await
        .unwrap();
    assert_eq!(rig.ledger.aggregate_totals().await.unwrap().fees_collected(), dec!(0));

    let report = rig.reconciler().reconcile(Utc::now() + chrono::Duration::seconds(5)).await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.unknown, 1);
    assert_eq!(rig.ledger.aggregate_totals().await.unwrap().fees_collected(), dec!(0.2));
}

#[tokio::test]
async fn test_restart_resolves_pending_left_moments_before() {
    let rig = Rig::new().await;
    rig.fund_reserve(dec!(2), dec!(0.02));
    assert!(rig.flywheel.fire(TaskName::Redeploy).await.success);
    let (_, exchange) = rig.swap.orders()[0].clone();

    // A second sale that crashed after its transfer landed, seconds before
    // the restart.
    let crashed = rig
        .ledger
        .append(NewEvent::new(EventType::GoldSale, EventStatus::Pending).with_in(dec!(0.1), "XAUT"))
        .await
        .unwrap();
    rig.ledger
        .annotate(
            crashed.id,
            PendingDetails::default().with_metadata(serde_json::json!({
                "deposit_address": exchange.deposit_address,
                "token_id": XAUT,
            })),
        )
        .await
        .unwrap();

    let started_at = Utc::now();
    let report = rig.reconciler().reconcile(started_at).await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.succeeded, 1);

    let events = rig.ledger.list_recent(Some(EventType::GoldSale), 10).await.unwrap();
    assert!(events.iter().all(|e| e.status == EventStatus::Success));
    assert_eq!(rig.ledger.aggregate_totals().await.unwrap().reserve_sold(), dec!(0.3));
}

#[tokio::test]
async fn test_manual_trigger_through_status_api() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    let rig = Rig::new().await;
    rig.fund_fee_vault(dec!(0.1));
    let app = build_router(Arc::new(StatusState {
        ledger: rig.ledger.clone(),
        flywheel: rig.flywheel.clone(),
        fee_vault: FEE_VAULT.into(),
        primary_token: MINT.into(),
    }));

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/trigger/fee-collection")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
    let outcome: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(outcome["success"], true);
    assert!(outcome["tx_ref"].is_string());

    let resp = app
        .oneshot(Request::builder().uri("/api/activity").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
    let activity: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    assert!(activity
        .iter()
        .any(|e| e["message"] == "Collected 0.095 SOL from Fees -> Converting to Gold"));
}
