use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use payment_cell::{ConfirmationSource, EsewaGateway, GatewayConfirmation, GatewayStatus};
use shared_database::DbHandle;
use shared_models::{Payment, PaymentStatus, TransactionStatus};
use shared_utils::notification::{dispatch, Notification, NotificationKind, Notifier};

use crate::error::LifecycleError;
use crate::models::{ReconcileOutcome, Resolution};
use crate::services::lifecycle::{self, AppointmentLifecycleService};
use crate::state::LifecycleState;

/// Brings local payment state in line with what the gateway reports.
///
/// Gateway calls happen before a transaction is opened. Each settlement runs
/// in one transaction holding the payment row, then the appointment row.
pub struct ReconciliationEngine {
    store: DbHandle,
    gateway: Arc<EsewaGateway>,
    notifier: Arc<dyn Notifier>,
    lifecycle: AppointmentLifecycleService,
    auto_confirm: bool,
}

impl ReconciliationEngine {
    pub fn new(state: &LifecycleState) -> Self {
        Self {
            store: Arc::clone(&state.store),
            gateway: Arc::clone(&state.gateway),
            notifier: Arc::clone(&state.notifier),
            lifecycle: AppointmentLifecycleService::new(state),
            auto_confirm: state.config.auto_confirm_on_payment,
        }
    }

    /// Server-to-server callback. A valid signature is sufficient proof.
    #[instrument(skip(self, data))]
    pub async fn settle_from_callback(
        &self,
        data: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, LifecycleError> {
        let callback = self.gateway.decode_callback(data)?;
        debug!("Callback for {} reports {}", callback.transaction_uuid, callback.status);
        self.reconcile(GatewayConfirmation::from_callback(callback, ConfirmationSource::Callback), now)
            .await
    }

    /// Success redirect carried by the client. Signed, but only trusted once the
    /// status endpoint agrees on transaction and amount.
    #[instrument(skip(self, data))]
    pub async fn settle_from_redirect(
        &self,
        data: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, LifecycleError> {
        let callback = self.gateway.decode_callback(data)?;
        let report = self
            .gateway
            .query_status(&callback.transaction_uuid, callback.total_amount)
            .await?;

        if report.transaction_uuid != callback.transaction_uuid {
            return Err(LifecycleError::VerificationFailed(format!(
                "status query answered for {} instead of {}",
                report.transaction_uuid, callback.transaction_uuid
            )));
        }
        if report.total_amount != callback.total_amount {
            return Err(LifecycleError::VerificationFailed(format!(
                "redirect claims {} but gateway reports {}",
                callback.total_amount, report.total_amount
            )));
        }

        let ref_id = report.ref_id.clone().or(Some(callback.transaction_code));
        let confirmation = GatewayConfirmation {
            ref_id,
            source: ConfirmationSource::Redirect,
            ..GatewayConfirmation::from_report(report)
        };
        self.reconcile(confirmation, now).await
    }

    /// Asks the gateway about a stored payment and settles it if complete.
    #[instrument(skip(self))]
    pub async fn poll(
        &self,
        transaction_uuid: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, LifecycleError> {
        let payment = self.payment(transaction_uuid).await?;
        if payment.status != TransactionStatus::Pending {
            return self.settled_outcome(transaction_uuid, None).await;
        }

        let confirmation = self.query(&payment).await?;
        self.reconcile(confirmation, now).await
    }

    /// The client came back through the failure URL. Only the gateway's own
    /// answer decides whether the payment actually failed.
    #[instrument(skip(self))]
    pub async fn handle_failure(
        &self,
        transaction_uuid: &str,
        now: DateTime<Utc>,
    ) -> Result<Resolution, LifecycleError> {
        info!("Failure redirect received for {}", transaction_uuid);
        self.resolve(transaction_uuid, now).await
    }

    /// Settles, fails or leaves a pending payment according to the gateway.
    pub async fn resolve(
        &self,
        transaction_uuid: &str,
        now: DateTime<Utc>,
    ) -> Result<Resolution, LifecycleError> {
        let payment = self.payment(transaction_uuid).await?;
        if payment.status != TransactionStatus::Pending {
            debug!("Payment {} is already {}", transaction_uuid, payment.status);
            return match payment.status {
                TransactionStatus::Completed => Ok(Resolution::Settled {
                    outcome: ReconcileOutcome::AlreadyProcessed {
                        transaction_uuid: transaction_uuid.to_string(),
                    },
                }),
                _ => {
                    let appointment = self.lifecycle.get(payment.appointment_id).await?;
                    Ok(Resolution::Failed { payment, appointment })
                }
            };
        }

        let confirmation = self.query(&payment).await?;
        if confirmation.status == GatewayStatus::Complete {
            let outcome = self.reconcile(confirmation, now).await?;
            return Ok(Resolution::Settled { outcome });
        }
        if confirmation.status == GatewayStatus::NotFound {
            // The gateway may not know a transaction the patient is still paying for.
            let appointment = self.lifecycle.get(payment.appointment_id).await?;
            if appointment.holds_slot(now) {
                debug!(
                    "Payment {} unknown to the gateway but its hold runs until {:?}",
                    transaction_uuid, appointment.expires_at
                );
                return Ok(Resolution::StillPending {
                    gateway_status: confirmation.status,
                });
            }
        }
        if confirmation.status.is_terminal_failure() {
            return self.fail(transaction_uuid, &confirmation.status, now).await;
        }

        debug!("Payment {} still {} at the gateway", transaction_uuid, confirmation.status);
        Ok(Resolution::StillPending {
            gateway_status: confirmation.status,
        })
    }

    pub async fn payment(&self, transaction_uuid: &str) -> Result<Payment, LifecycleError> {
        let mut tx = self.store.begin().await?;
        let payment = tx.find_payment(transaction_uuid).await?;
        tx.rollback().await?;
        payment.ok_or_else(|| LifecycleError::NotFound(format!("Payment {} not found", transaction_uuid)))
    }

    async fn query(&self, payment: &Payment) -> Result<GatewayConfirmation, LifecycleError> {
        let report = self
            .gateway
            .query_status(&payment.transaction_uuid, payment.amount)
            .await?;
        if report.transaction_uuid != payment.transaction_uuid {
            return Err(LifecycleError::VerificationFailed(format!(
                "status query answered for {} instead of {}",
                report.transaction_uuid, payment.transaction_uuid
            )));
        }
        Ok(GatewayConfirmation::from_report(report))
    }

    /// Core settlement. Runs entirely inside one transaction.
    pub async fn reconcile(
        &self,
        confirmation: GatewayConfirmation,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, LifecycleError> {
        let mut tx = self.store.begin().await?;

        let Some(mut payment) = tx.lock_pending_payment(&confirmation.transaction_uuid).await? else {
            drop(tx);
            return self
                .settled_outcome(&confirmation.transaction_uuid, Some(&confirmation.status))
                .await;
        };

        if confirmation.total_amount != payment.amount {
            warn!(
                "Amount mismatch for {}: stored {}, gateway {}",
                payment.transaction_uuid, payment.amount, confirmation.total_amount
            );
            return Err(LifecycleError::AmountMismatch {
                expected: payment.amount,
                actual: confirmation.total_amount,
            });
        }
        if confirmation.status != GatewayStatus::Complete {
            return Err(LifecycleError::StatusNotComplete(confirmation.status.to_string()));
        }

        payment.status = payment.status.complete()?;
        payment.ref_id = confirmation.ref_id.clone();
        payment.verified_at = Some(now);
        tx.save_payment(&payment).await?;

        let appointment = lifecycle::mark_paid(tx.as_mut(), payment.appointment_id).await?;
        tx.commit().await?;

        info!(
            "Payment {} reconciled via {:?} (ref {:?}) for appointment {}",
            payment.transaction_uuid, confirmation.source, payment.ref_id, appointment.id
        );

        dispatch(
            Arc::clone(&self.notifier),
            Notification {
                kind: NotificationKind::PaymentReceived,
                appointment: appointment.clone(),
                payment: Some(payment.clone()),
                qr_image: None,
            },
        );

        if self.auto_confirm {
            match self.lifecycle.confirm_at(appointment.id, now).await {
                Ok(confirmed) => info!(
                    "Appointment {} confirmed automatically after payment",
                    confirmed.appointment.id
                ),
                Err(e) => warn!(
                    "Automatic confirmation of appointment {} failed, awaiting manual confirm: {}",
                    appointment.id, e
                ),
            }
        }

        Ok(ReconcileOutcome::Reconciled { payment, appointment })
    }

    /// No pending row: a replay is a success only when both sides already show it settled.
    /// Money taken for a payment already failed locally is a conflict that needs an operator.
    async fn settled_outcome(
        &self,
        transaction_uuid: &str,
        reported: Option<&GatewayStatus>,
    ) -> Result<ReconcileOutcome, LifecycleError> {
        let mut tx = self.store.begin().await?;
        let payment = tx.find_payment(transaction_uuid).await?;
        let settled = match &payment {
            Some(p) if p.status == TransactionStatus::Completed => tx
                .find_appointment(p.appointment_id)
                .await?
                .map_or(false, |a| a.payment_status == PaymentStatus::Paid),
            _ => false,
        };
        tx.rollback().await?;

        if let Some(p) = payment.as_ref().filter(|p| p.status == TransactionStatus::Failed) {
            if reported == Some(&GatewayStatus::Complete) {
                error!(
                    "Payment {} of {} for appointment {} completed after local failure, needs manual refund",
                    p.transaction_uuid, p.amount, p.appointment_id
                );
                return Err(LifecycleError::StateConflict(format!(
                    "Payment {} completed at the gateway after it was marked failed",
                    transaction_uuid
                )));
            }
        }

        if settled {
            debug!("Payment {} already reconciled", transaction_uuid);
            Ok(ReconcileOutcome::AlreadyProcessed {
                transaction_uuid: transaction_uuid.to_string(),
            })
        } else {
            Err(LifecycleError::NotFound(format!(
                "No pending payment {}",
                transaction_uuid
            )))
        }
    }

    async fn fail(
        &self,
        transaction_uuid: &str,
        status: &GatewayStatus,
        now: DateTime<Utc>,
    ) -> Result<Resolution, LifecycleError> {
        let mut tx = self.store.begin().await?;
        let Some(mut payment) = tx.lock_pending_payment(transaction_uuid).await? else {
            drop(tx);
            let payment = self.payment(transaction_uuid).await?;
            let appointment = self.lifecycle.get(payment.appointment_id).await?;
            return Ok(match payment.status {
                TransactionStatus::Completed => Resolution::Settled {
                    outcome: ReconcileOutcome::AlreadyProcessed {
                        transaction_uuid: transaction_uuid.to_string(),
                    },
                },
                _ => Resolution::Failed { payment, appointment },
            });
        };

        payment.status = payment.status.fail()?;
        payment.verified_at = Some(now);
        tx.save_payment(&payment).await?;
        let appointment = lifecycle::mark_payment_failed(tx.as_mut(), payment.appointment_id).await?;
        tx.commit().await?;

        info!(
            "Payment {} failed at the gateway ({}); appointment {} released",
            transaction_uuid, status, appointment.id
        );
        Ok(Resolution::Failed { payment, appointment })
    }
}
