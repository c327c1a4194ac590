mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use wiremock::MockServer;

use appointment_cell::services::{ExpirySweeper, PaymentPoller};
use appointment_cell::PollSummary;
use shared_database::DbHandle;
use shared_models::{AppointmentStatus, TransactionStatus};

use common::*;

fn handle(h: &Harness) -> DbHandle {
    Arc::new(h.store.clone())
}

fn poller(h: &Harness) -> PaymentPoller {
    PaymentPoller::new(
        handle(h),
        Arc::new(h.engine()),
        Duration::from_millis(20),
        chrono::Duration::minutes(10),
    )
}

// ==============================================================================
// EXPIRY SWEEPER
// ==============================================================================

#[tokio::test]
async fn test_sweep_expires_only_overdue_confirmed_appointments() {
    let h = Harness::new().await;

    let overdue = h.book_paid("10:00").await.appointment.id;
    h.lifecycle().confirm_at(overdue, at(2025, 3, 1, 8, 0)).await.unwrap();

    let redeemed = h.book_paid("10:30").await.appointment.id;
    let confirmed = h.lifecycle().confirm_at(redeemed, at(2025, 3, 1, 8, 0)).await.unwrap();
    appointment_cell::services::CheckInVerifier::new(&h.state)
        .verify_at(confirmed.appointment.qr_token.as_deref().unwrap(), at(2025, 3, 1, 10, 25))
        .await
        .unwrap();

    let pending = h.book("11:00").await.appointment.id;

    let sweeper = ExpirySweeper::new(handle(&h), Duration::from_secs(60));

    // Nothing is due before the deadline.
    assert_eq!(sweeper.sweep_once(at(2025, 3, 2, 7, 59)).await.unwrap(), 0);

    assert_eq!(sweeper.sweep_once(at(2025, 3, 2, 8, 1)).await.unwrap(), 1);
    assert_eq!(h.appointment(overdue).await.status, AppointmentStatus::Expired);
    assert_eq!(h.appointment(redeemed).await.status, AppointmentStatus::Completed);
    assert_eq!(h.appointment(pending).await.status, AppointmentStatus::Pending);

    // Repeating the pass is harmless.
    assert_eq!(sweeper.sweep_once(at(2025, 3, 2, 8, 1)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_sweeper_task_runs_until_shutdown() {
    let h = Harness::new().await;
    let id = h.book_paid("10:00").await.appointment.id;
    // The 2025 credential is long past its deadline by wall-clock time.
    h.lifecycle().confirm_at(id, at(2025, 3, 1, 8, 0)).await.unwrap();

    let (stop, shutdown) = watch::channel(false);
    let task = ExpirySweeper::new(handle(&h), Duration::from_millis(20)).spawn(shutdown);

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("sweeper stops on shutdown")
        .unwrap();

    assert_eq!(h.appointment(id).await.status, AppointmentStatus::Expired);
}

// ==============================================================================
// PAYMENT POLLER
// ==============================================================================

#[tokio::test]
async fn test_poll_once_resolves_each_stale_payment() {
    let server = MockServer::start().await;
    let h = harness_with_gateway(&server).await;

    let paid = h.book("10:00").await;
    let canceled = h.book("10:30").await;
    let waiting = h.book("11:00").await;
    mount_status(&server, &paid.payment.transaction_uuid, "COMPLETE", "500.00").await;
    mount_status(&server, &canceled.payment.transaction_uuid, "CANCELED", "500.00").await;
    mount_status(&server, &waiting.payment.transaction_uuid, "PENDING", "500.00").await;

    let summary = poller(&h).poll_once(Utc::now() + chrono::Duration::hours(1)).await.unwrap();

    assert_eq!(
        summary,
        PollSummary {
            checked: 3,
            reconciled: 1,
            failed: 1,
            pending: 1,
            errors: 0,
        }
    );
    assert_eq!(h.payment(paid.appointment.id).await.status, TransactionStatus::Completed);
    assert_eq!(h.payment(canceled.appointment.id).await.status, TransactionStatus::Failed);
    assert_eq!(
        h.appointment(canceled.appointment.id).await.status,
        AppointmentStatus::Cancelled
    );
    assert_eq!(h.payment(waiting.appointment.id).await.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_poll_once_skips_fresh_payments() {
    let server = MockServer::start().await;
    let h = harness_with_gateway(&server).await;
    h.book("10:00").await;

    let summary = poller(&h).poll_once(Utc::now()).await.unwrap();

    assert_eq!(summary, PollSummary::default());
}

#[tokio::test]
async fn test_poll_once_counts_gateway_errors() {
    let h = Harness::new().await;
    h.book("10:00").await;

    // Default status URL points at a closed port.
    let summary = poller(&h).poll_once(Utc::now() + chrono::Duration::hours(1)).await.unwrap();

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.errors, 1);
}

#[tokio::test]
async fn test_poller_task_runs_until_shutdown() {
    let server = MockServer::start().await;
    let h = harness_with_gateway(&server).await;
    let receipt = h.book("10:00").await;
    mount_status(&server, &receipt.payment.transaction_uuid, "COMPLETE", "500.00").await;

    // No minimum age, so the first tick picks the payment up.
    let poller = PaymentPoller::new(
        handle(&h),
        Arc::new(h.engine()),
        Duration::from_millis(20),
        chrono::Duration::seconds(-1),
    );
    let (stop, shutdown) = watch::channel(false);
    let task = poller.spawn(shutdown);

    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("poller stops on shutdown")
        .unwrap();

    assert_eq!(h.payment(receipt.appointment.id).await.status, TransactionStatus::Completed);
}
