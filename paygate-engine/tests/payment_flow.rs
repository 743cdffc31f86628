mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{create_request, operator, test_settings, Harness};
use paygate_core::payment::{META_REFUND_AMOUNT, META_REFUND_ID, META_REFUND_REASON};
use paygate_core::{
    Amount, AuditAction, GatewayError, PaymentError, PaymentGateway, PaymentStatus, PaymentStore,
    RefundPaymentRequest,
};
use paygate_engine::ProcessingOutcome;
use paygate_gateway::SimulatedGateway;
use uuid::Uuid;

#[tokio::test]
async fn test_payment_lifecycle_with_full_refund() {
    let h = Harness::build(
        test_settings(),
        SimulatedGateway::succeeding_with(PaymentGateway::Stripe, "pi_123"),
        SimulatedGateway::new(PaymentGateway::Paypal),
    );

    let created = h
        .orchestrator
        .create_payment(create_request("O1", "50.00", PaymentGateway::Stripe), &operator())
        .await
        .unwrap();
    assert_eq!(created.status, PaymentStatus::Pending);
    assert_eq!(created.order_id, "O1");

    let succeeded = h.wait_for_status(created.id, PaymentStatus::Succeeded).await;
    assert_eq!(succeeded.external_transaction_id.as_deref(), Some("pi_123"));
    assert_eq!(h.stripe.charge_count(), 1);

    let refunded = h
        .orchestrator
        .refund_payment(created.id, RefundPaymentRequest::default(), &operator())
        .await
        .unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.metadata_str(META_REFUND_AMOUNT), Some("50.00"));
    assert!(refunded.metadata_str(META_REFUND_ID).is_some());

    let stored = h.payments.get_by_id(created.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Refunded);
    assert_eq!(stored.metadata_str(META_REFUND_AMOUNT), Some("50.00"));

    let calls = h.stripe.refund_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].transaction_ref, "pi_123");
    assert_eq!(calls[0].amount, None);

    let trail = h.orchestrator.audit_trail(created.id, 50).await.unwrap();
    let actions: Vec<_> = trail.iter().map(|e| e.action).collect();
    assert!(actions.contains(&AuditAction::PaymentCreated));
    assert!(actions.contains(&AuditAction::PaymentSucceeded));
    assert_eq!(actions.first(), Some(&AuditAction::PaymentRefunded));
    assert_eq!(trail[0].actor_id.as_deref(), Some("ops-1"));
}

#[tokio::test]
async fn test_invalid_amounts_store_nothing() {
    let h = Harness::new();
    let oversized = "79228162514264337593543950335";
    for amount in ["0.00", "-5.00", "abc", "", "0.004", "19.999", oversized] {
        let result = h
            .orchestrator
            .create_payment(create_request("O1", amount, PaymentGateway::Stripe), &operator())
            .await;
        assert!(
            matches!(result, Err(PaymentError::InvalidAmount(_))),
            "amount {:?} should be rejected",
            amount
        );
    }
    assert!(h.payments.is_empty().await);
    assert!(h.audit.entries().await.is_empty());
}

#[tokio::test]
async fn test_disabled_gateway_rejected_without_write() {
    let mut settings = test_settings();
    settings.enable_stripe = false;
    let h = Harness::with_settings(settings);

    let result = h
        .orchestrator
        .create_payment(create_request("O2", "10.00", PaymentGateway::Stripe), &operator())
        .await;
    assert!(matches!(result, Err(PaymentError::Disabled(_))));
    assert!(h.payments.is_empty().await);
    assert!(h.audit.entries().await.is_empty());
    assert_eq!(h.stripe.charge_count(), 0);

    // The other gateway keeps working.
    h.orchestrator
        .create_payment(create_request("O2", "10.00", PaymentGateway::Paypal), &operator())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_gateway_decline_fails_payment() {
    let h = Harness::build(
        test_settings(),
        SimulatedGateway::failing_with(
            PaymentGateway::Stripe,
            GatewayError::Declined {
                reason: "card_declined".to_string(),
                transaction_id: Some("pi_declined".to_string()),
            },
        ),
        SimulatedGateway::new(PaymentGateway::Paypal),
    );

    let created = h
        .orchestrator
        .create_payment(create_request("O3", "12.50", PaymentGateway::Stripe), &operator())
        .await
        .unwrap();
    let failed = h.wait_for_status(created.id, PaymentStatus::Failed).await;
    assert!(failed.failure_reason.unwrap().contains("card_declined"));
    assert_eq!(failed.external_transaction_id.as_deref(), Some("pi_declined"));

    let actions: Vec<_> = h.audit.entries().await.iter().map(|e| e.action).collect();
    assert!(actions.contains(&AuditAction::PaymentFailed));
    assert!(!actions.contains(&AuditAction::PaymentSucceeded));
}

#[tokio::test]
async fn test_concurrent_triggers_charge_once() {
    let h = Harness::build(
        test_settings(),
        SimulatedGateway::succeeding_with(PaymentGateway::Stripe, "pi_once")
            .with_latency(Duration::from_millis(50)),
        SimulatedGateway::new(PaymentGateway::Paypal),
    );
    let payment = h.seed(PaymentGateway::Stripe, PaymentStatus::Pending, None).await;

    let id = payment.id;
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let processor = Arc::clone(&h.processor);
        tasks.push(tokio::spawn(async move { processor.process_payment(id).await }));
    }

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            ProcessingOutcome::Succeeded { transaction_id } => {
                assert_eq!(transaction_id, "pi_once");
                succeeded += 1;
            }
            ProcessingOutcome::Skipped { .. } => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(h.stripe.charge_count(), 1);
    assert_eq!(h.processor.locks().len(), 1);
}

#[tokio::test]
async fn test_unsaved_success_reports_inconsistency() {
    let h = Harness::build(
        test_settings(),
        SimulatedGateway::succeeding_with(PaymentGateway::Stripe, "pi_lost"),
        SimulatedGateway::new(PaymentGateway::Paypal),
    );
    let payment = h.seed(PaymentGateway::Stripe, PaymentStatus::Pending, None).await;
    h.payments.fail_transitions_to(PaymentStatus::Succeeded).await;

    let outcome = h.processor.process_payment(payment.id).await.unwrap();
    assert_eq!(
        outcome,
        ProcessingOutcome::Inconsistent {
            gateway_outcome: PaymentStatus::Succeeded
        }
    );

    // The reference survives so a later webhook can still settle the payment.
    let stored = h.payments.get_by_id(payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Processing);
    assert_eq!(stored.external_transaction_id.as_deref(), Some("pi_lost"));
}

#[tokio::test]
async fn test_refund_requires_succeeded_payment() {
    let h = Harness::new();
    for status in [PaymentStatus::Pending, PaymentStatus::Failed, PaymentStatus::Refunded] {
        let payment = h.seed(PaymentGateway::Stripe, status, Some(&format!("pi_{}", status))).await;
        let result = h
            .orchestrator
            .refund_payment(payment.id, RefundPaymentRequest::default(), &operator())
            .await;
        match result {
            Err(PaymentError::InvalidStatus { operation, current }) => {
                assert_eq!(operation, "refund");
                assert_eq!(current, status);
            }
            other => panic!("expected InvalidStatus for {}, got {:?}", status, other),
        }
        assert_eq!(h.payments.get_by_id(payment.id).await.unwrap().status, status);
    }
    assert!(h.stripe.refund_calls().is_empty());
}

#[tokio::test]
async fn test_partial_refund() {
    let h = Harness::new();
    let payment = h
        .seed(PaymentGateway::Stripe, PaymentStatus::Succeeded, Some("pi_partial"))
        .await;

    let too_much = h
        .orchestrator
        .refund_payment(
            payment.id,
            RefundPaymentRequest {
                amount: Some("60.00".to_string()),
                reason: None,
            },
            &operator(),
        )
        .await;
    assert!(matches!(too_much, Err(PaymentError::InvalidAmount(_))));

    let sub_cent = h
        .orchestrator
        .refund_payment(
            payment.id,
            RefundPaymentRequest {
                amount: Some("0.001".to_string()),
                reason: None,
            },
            &operator(),
        )
        .await;
    assert!(matches!(sub_cent, Err(PaymentError::InvalidAmount(_))));
    assert!(h.stripe.refund_calls().is_empty());

    let refunded = h
        .orchestrator
        .refund_payment(
            payment.id,
            RefundPaymentRequest {
                amount: Some("20.00".to_string()),
                reason: Some("damaged item".to_string()),
            },
            &operator(),
        )
        .await
        .unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.metadata_str(META_REFUND_AMOUNT), Some("20.00"));
    assert_eq!(refunded.metadata_str(META_REFUND_REASON), Some("damaged item"));
    assert_eq!(
        h.stripe.refund_calls()[0].amount,
        Some(Amount::parse("20.00").unwrap())
    );
}

#[tokio::test]
async fn test_refund_without_reference_is_not_found() {
    let h = Harness::new();
    let payment = h.seed(PaymentGateway::Paypal, PaymentStatus::Succeeded, None).await;
    let result = h
        .orchestrator
        .refund_payment(payment.id, RefundPaymentRequest::default(), &operator())
        .await;
    assert!(matches!(result, Err(PaymentError::NotFound(_))));
}

#[tokio::test]
async fn test_gateway_refund_failure_leaves_payment_succeeded() {
    let h = Harness::new();
    h.stripe
        .set_refund_result(Err(GatewayError::Transport("connection reset".to_string())));
    let payment = h.seed(PaymentGateway::Stripe, PaymentStatus::Succeeded, Some("pi_keep")).await;

    let result = h
        .orchestrator
        .refund_payment(payment.id, RefundPaymentRequest::default(), &operator())
        .await;
    assert!(matches!(result, Err(PaymentError::Gateway(GatewayError::Transport(_)))));
    assert_eq!(
        h.payments.get_by_id(payment.id).await.unwrap().status,
        PaymentStatus::Succeeded
    );
}

#[tokio::test]
async fn test_refunds_disabled() {
    let mut settings = test_settings();
    settings.enable_refunds = false;
    let h = Harness::with_settings(settings);
    let payment = h.seed(PaymentGateway::Stripe, PaymentStatus::Succeeded, Some("pi_1")).await;

    let result = h
        .orchestrator
        .refund_payment(payment.id, RefundPaymentRequest::default(), &operator())
        .await;
    assert!(matches!(result, Err(PaymentError::Disabled(_))));
    assert!(h.stripe.refund_calls().is_empty());
}

#[tokio::test]
async fn test_retry_until_ceiling() {
    let mut settings = test_settings();
    settings.retry.max_attempts = 2;
    let h = Harness::build(
        settings,
        SimulatedGateway::failing_with(
            PaymentGateway::Stripe,
            GatewayError::Transport("gateway timeout".to_string()),
        ),
        SimulatedGateway::new(PaymentGateway::Paypal),
    );

    let created = h
        .orchestrator
        .create_payment(create_request("O4", "5.00", PaymentGateway::Stripe), &operator())
        .await
        .unwrap();
    h.wait_for_status(created.id, PaymentStatus::Failed).await;

    for attempt in 1..=2 {
        let retried = h.orchestrator.retry_payment(created.id, &operator()).await.unwrap();
        assert_eq!(retried.status, PaymentStatus::Pending);
        assert_eq!(retried.retry_attempts(), attempt);
        h.wait_for_status(created.id, PaymentStatus::Failed).await;
    }

    let exhausted = h.orchestrator.retry_payment(created.id, &operator()).await;
    assert!(matches!(exhausted, Err(PaymentError::RetryExceeded { attempts: 2 })));
    assert_eq!(h.stripe.charge_count(), 3);
}

#[tokio::test]
async fn test_retry_recovers_payment() {
    let h = Harness::build(
        test_settings(),
        SimulatedGateway::failing_with(
            PaymentGateway::Stripe,
            GatewayError::Transport("gateway timeout".to_string()),
        ),
        SimulatedGateway::new(PaymentGateway::Paypal),
    );
    let created = h
        .orchestrator
        .create_payment(create_request("O5", "5.00", PaymentGateway::Stripe), &operator())
        .await
        .unwrap();
    h.wait_for_status(created.id, PaymentStatus::Failed).await;

    h.stripe.set_charge_result(Ok("pi_second".to_string()));
    h.orchestrator.retry_payment(created.id, &operator()).await.unwrap();
    let succeeded = h.wait_for_status(created.id, PaymentStatus::Succeeded).await;
    assert_eq!(succeeded.external_transaction_id.as_deref(), Some("pi_second"));
    assert_eq!(succeeded.failure_reason, None);
}

#[tokio::test]
async fn test_retry_backoff_does_not_block_new_payments() {
    let mut settings = test_settings();
    settings.processing.max_concurrency = 1;
    settings.retry.backoff_ms = 3_000;
    let h = Harness::build(
        settings,
        SimulatedGateway::failing_with(
            PaymentGateway::Stripe,
            GatewayError::Transport("gateway timeout".to_string()),
        ),
        SimulatedGateway::new(PaymentGateway::Paypal),
    );
    let failed = h
        .orchestrator
        .create_payment(create_request("O6", "5.00", PaymentGateway::Stripe), &operator())
        .await
        .unwrap();
    h.wait_for_status(failed.id, PaymentStatus::Failed).await;
    h.orchestrator.retry_payment(failed.id, &operator()).await.unwrap();

    let fresh = h
        .orchestrator
        .create_payment(create_request("O7", "8.00", PaymentGateway::Paypal), &operator())
        .await
        .unwrap();
    let settled = tokio::time::timeout(
        Duration::from_millis(1_000),
        h.wait_for_status(fresh.id, PaymentStatus::Succeeded),
    )
    .await;
    assert!(settled.is_ok(), "fresh payment waited behind a retry backoff");
    assert_eq!(
        h.payments.get_by_id(failed.id).await.unwrap().status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn test_failed_retry_keeps_attempt_budget() {
    let h = Harness::new();
    let payment = h.seed(PaymentGateway::Stripe, PaymentStatus::Failed, None).await;

    h.payments.fail_transitions_to(PaymentStatus::Pending).await;
    let result = h.orchestrator.retry_payment(payment.id, &operator()).await;
    assert!(matches!(result, Err(PaymentError::Internal(_))));
    let stored = h.payments.get_by_id(payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(stored.retry_attempts(), 0);

    h.payments.clear_failures().await;
    let retried = h.orchestrator.retry_payment(payment.id, &operator()).await.unwrap();
    assert_eq!(retried.retry_attempts(), 1);
}

#[tokio::test]
async fn test_full_refund_without_reason_omits_reason() {
    let h = Harness::new();
    let payment = h.seed(PaymentGateway::Stripe, PaymentStatus::Succeeded, Some("pi_plain")).await;
    let refunded = h
        .orchestrator
        .refund_payment(payment.id, RefundPaymentRequest::default(), &operator())
        .await
        .unwrap();
    assert!(!refunded.metadata.contains_key(META_REFUND_REASON));
    let stored = h.payments.get_by_id(payment.id).await.unwrap();
    assert!(!stored.metadata.contains_key(META_REFUND_REASON));
}

#[tokio::test]
async fn test_retry_requires_failed_payment() {
    let h = Harness::new();
    let payment = h.seed(PaymentGateway::Stripe, PaymentStatus::Succeeded, Some("pi_ok")).await;
    let result = h.orchestrator.retry_payment(payment.id, &operator()).await;
    assert!(matches!(
        result,
        Err(PaymentError::InvalidStatus { operation: "retry", current: PaymentStatus::Succeeded })
    ));
}

#[tokio::test]
async fn test_capture_not_implemented() {
    let h = Harness::new();
    let payment = h.seed(PaymentGateway::Stripe, PaymentStatus::Succeeded, Some("pi_cap")).await;
    let result = h.orchestrator.capture_payment(payment.id, &operator()).await;
    assert!(matches!(result, Err(PaymentError::NotImplemented(_))));

    let missing = h.orchestrator.capture_payment(Uuid::new_v4(), &operator()).await;
    assert!(matches!(missing, Err(PaymentError::NotFound(_))));
}

#[tokio::test]
async fn test_queries() {
    let h = Harness::new();
    let a = h.seed(PaymentGateway::Stripe, PaymentStatus::Succeeded, Some("pi_a")).await;
    h.seed(PaymentGateway::Stripe, PaymentStatus::Failed, None).await;

    let by_order = h.orchestrator.get_payments_by_order(&a.order_id).await.unwrap();
    assert_eq!(by_order.len(), 1);
    assert_eq!(by_order[0].id, a.id);

    let page = h.orchestrator.list_payments(0, -3, None).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.payments.len(), 1);

    let succeeded = h
        .orchestrator
        .list_payments(10, 0, Some(PaymentStatus::Succeeded))
        .await
        .unwrap();
    assert_eq!(succeeded.total, 1);

    assert!(matches!(
        h.orchestrator.get_payment(Uuid::new_v4()).await,
        Err(PaymentError::NotFound(_))
    ));
    assert!(matches!(
        h.orchestrator.audit_trail(Uuid::new_v4(), 10).await,
        Err(PaymentError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_audit_disabled_records_nothing() {
    let mut settings = test_settings();
    settings.enable_audit_log = false;
    let h = Harness::build(
        settings,
        SimulatedGateway::succeeding_with(PaymentGateway::Stripe, "pi_quiet"),
        SimulatedGateway::new(PaymentGateway::Paypal),
    );
    let created = h
        .orchestrator
        .create_payment(create_request("O6", "1.00", PaymentGateway::Stripe), &operator())
        .await
        .unwrap();
    h.wait_for_status(created.id, PaymentStatus::Succeeded).await;
    assert!(h.audit.entries().await.is_empty());
}
