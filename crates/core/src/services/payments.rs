// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idempotent payment pipeline.
//!
//! Exactly-once over at-least-once retries rests on three independent
//! safeguards: the unique idempotency key in the store, the keyed result
//! cache, and the per-trip lease lock. Any two suffice for correctness; all
//! three keep the common case fast. PSP failures are terminal for their key;
//! a retry must bring a fresh key.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::Platform;
use crate::error::{Error, Result};
use crate::events::{emit_notification, NotificationKind};
use crate::model::{Payment, PaymentMethod, PaymentStatus, TripStatus};
use crate::services::fare;
use crate::time::epoch_ms;

pub fn idempotency_cache_key(key: &str) -> String {
    format!("payment:idempotency:{key}")
}

/// Outcome of one mock-PSP attempt.
struct PspOutcome {
    status: PaymentStatus,
    psp_ref: Option<String>,
    response: serde_json::Value,
}

pub struct PaymentService {
    platform: Arc<Platform>,
}

impl PaymentService {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    pub async fn get(&self, id: Uuid) -> Result<Payment> {
        self.platform.store.payment(id).await.ok_or_else(|| Error::not_found("payment", id))
    }

    /// Charge a completed trip. For a repeated idempotency key the outcome
    /// is returned verbatim and the PSP is never re-invoked.
    pub async fn process(
        &self,
        trip_id: Uuid,
        method: PaymentMethod,
        idempotency_key: &str,
    ) -> Result<Payment> {
        if idempotency_key.trim().is_empty() {
            return Err(Error::validation("idempotency key must not be empty"));
        }

        let cache_key = idempotency_cache_key(idempotency_key);
        if let Some(payment) = self.platform.cache.get::<Payment>(&cache_key).await {
            return Ok(payment);
        }

        let Some(lock) = self
            .platform
            .locks
            .try_acquire(&format!("payment_lock:{trip_id}"), self.platform.config.payment_lock_lease)
            .await
        else {
            // Another worker is mid-flight; give it a beat, then trust the
            // idempotency cache.
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Some(payment) = self.platform.cache.get::<Payment>(&cache_key).await {
                return Ok(payment);
            }
            return Err(Error::conflict("payment for this trip is processing"));
        };

        let result = self.process_locked(trip_id, method, idempotency_key).await;

        if !lock.release().await {
            warn!(trip_id = %trip_id, "payment lock lease lapsed before release");
        }

        let (payment, fresh) = result?;
        self.platform
            .cache
            .set(&cache_key, &payment, Some(self.platform.config.idempotency_ttl))
            .await;
        if fresh {
            self.publish_outcome(&payment).await;
        }
        Ok(payment)
    }

    async fn process_locked(
        &self,
        trip_id: Uuid,
        method: PaymentMethod,
        idempotency_key: &str,
    ) -> Result<(Payment, bool)> {
        let store = &self.platform.store;

        // A settled row for this trip short-circuits.
        if let Some(existing) = store.payment_by_trip(trip_id).await {
            if existing.idempotency_key == idempotency_key {
                match existing.status {
                    PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Refunded => {
                        return Ok((existing, false));
                    }
                    PaymentStatus::Pending | PaymentStatus::Processing => {
                        // Our own row from an interrupted attempt; drive it
                        // through the PSP below.
                    }
                }
            } else if existing.status == PaymentStatus::Completed {
                // Idempotent against a second key too: already charged.
                return Ok((existing, false));
            } else {
                return Err(Error::conflict(
                    "trip already has a payment attempt; retry it with a new key",
                ));
            }
        }

        let trip =
            store.trip(trip_id).await.ok_or_else(|| Error::not_found("trip", trip_id))?;
        if trip.status != TripStatus::Completed {
            return Err(Error::conflict("trip is not completed"));
        }
        let amount = trip
            .fare
            .as_ref()
            .map(|f| f.total)
            .ok_or_else(|| Error::internal("completed trip has no fare"))?;

        let mut payment = match store.payment_by_trip(trip_id).await {
            Some(mut existing) => {
                let _guard = store.lock_payment_nowait(existing.id).await?;
                existing.status = PaymentStatus::Processing;
                store.put_payment(existing.clone()).await;
                existing
            }
            None => {
                let payment = Payment {
                    id: Uuid::new_v4(),
                    trip_id,
                    amount,
                    currency: "INR".to_owned(),
                    method,
                    status: PaymentStatus::Processing,
                    psp_ref: None,
                    psp_response: None,
                    idempotency_key: idempotency_key.to_owned(),
                    created_at: epoch_ms(),
                    completed_at: None,
                };
                store.insert_payment(payment.clone()).await?;
                payment
            }
        };

        let outcome = self.charge(payment.method, payment.amount).await;
        payment.status = outcome.status;
        payment.psp_ref = outcome.psp_ref;
        payment.psp_response = Some(outcome.response);
        if payment.status == PaymentStatus::Completed {
            payment.completed_at = Some(epoch_ms());
        }
        store.put_payment(payment.clone()).await;

        info!(
            trip_id = %trip_id,
            payment_id = %payment.id,
            status = ?payment.status,
            "payment settled"
        );
        Ok((payment, true))
    }

    /// Method-specific mock PSP with bounded latency.
    async fn charge(&self, method: PaymentMethod, amount: f64) -> PspOutcome {
        match method {
            PaymentMethod::Cash => PspOutcome {
                status: PaymentStatus::Completed,
                psp_ref: Some(format!("CASH-{}", epoch_ms())),
                response: json!({ "gateway": "cash", "amount": amount }),
            },
            PaymentMethod::Card => {
                let latency = rand::random_range(50..=150u64);
                let approved = rand::random_bool(self.platform.config.psp_success_probability);
                tokio::time::sleep(Duration::from_millis(latency)).await;
                if approved {
                    PspOutcome {
                        status: PaymentStatus::Completed,
                        psp_ref: Some(format!("CARD-{:08x}", rand::random::<u32>())),
                        response: json!({ "gateway": "card", "amount": amount }),
                    }
                } else {
                    PspOutcome {
                        status: PaymentStatus::Failed,
                        psp_ref: None,
                        response: json!({
                            "gateway": "card",
                            "amount": amount,
                            "err_code": "CARD_DECLINED",
                        }),
                    }
                }
            }
            PaymentMethod::Wallet => {
                let latency = rand::random_range(30..=100u64);
                tokio::time::sleep(Duration::from_millis(latency)).await;
                PspOutcome {
                    status: PaymentStatus::Completed,
                    psp_ref: Some(format!("WALLET-{}", epoch_ms())),
                    response: json!({ "gateway": "wallet", "amount": amount }),
                }
            }
        }
    }

    async fn publish_outcome(&self, payment: &Payment) {
        if payment.status != PaymentStatus::Completed {
            return;
        }
        let Some(trip) = self.platform.store.trip(payment.trip_id).await else {
            return;
        };
        let Some(ride) = self.platform.store.ride(trip.ride_id).await else {
            return;
        };
        emit_notification(
            &self.platform.bus,
            ride.rider_id,
            NotificationKind::PaymentCompleted,
            json!({
                "payment_id": payment.id,
                "ride_id": ride.id,
                "amount": payment.amount,
                "method": payment.method,
            }),
        )
        .await;
        if let Some(driver_id) = ride.driver_id {
            emit_notification(
                &self.platform.bus,
                driver_id,
                NotificationKind::PaymentReceived,
                json!({
                    "payment_id": payment.id,
                    "ride_id": ride.id,
                    "amount": fare::driver_earnings(payment.amount),
                }),
            )
            .await;
        }
    }

    /// Re-drive a failed payment under a fresh idempotency key.
    pub async fn retry(&self, payment_id: Uuid, new_key: &str) -> Result<Payment> {
        if new_key.trim().is_empty() {
            return Err(Error::validation("idempotency key must not be empty"));
        }
        let existing = self.get(payment_id).await?;
        if existing.status != PaymentStatus::Failed {
            return Err(Error::conflict("only failed payments can be retried"));
        }
        if self.platform.store.payment_by_key(new_key).await.is_some() {
            return Err(Error::new(
                crate::error::ErrorCode::IdempotencyConflict,
                format!("idempotency key {new_key} already used"),
            ));
        }

        let lock = self
            .platform
            .locks
            .acquire(
                &format!("payment_lock:{}", existing.trip_id),
                self.platform.config.payment_lock_lease,
                self.platform.config.lock_attempts,
                self.platform.config.lock_retry_delay,
            )
            .await?;

        let result = self.retry_locked(payment_id, new_key).await;

        if !lock.release().await {
            warn!(payment_id = %payment_id, "payment lock lease lapsed before release");
        }

        let payment = result?;
        self.platform
            .cache
            .set(
                &idempotency_cache_key(new_key),
                &payment,
                Some(self.platform.config.idempotency_ttl),
            )
            .await;
        self.publish_outcome(&payment).await;
        Ok(payment)
    }

    async fn retry_locked(&self, payment_id: Uuid, new_key: &str) -> Result<Payment> {
        let store = &self.platform.store;
        let _guard = store.lock_payment_nowait(payment_id).await?;
        let mut payment =
            store.payment(payment_id).await.ok_or_else(|| Error::not_found("payment", payment_id))?;
        if payment.status != PaymentStatus::Failed {
            return Err(Error::conflict("only failed payments can be retried"));
        }

        payment.idempotency_key = new_key.to_owned();
        payment.status = PaymentStatus::Processing;
        store.put_payment(payment.clone()).await;

        let outcome = self.charge(payment.method, payment.amount).await;
        payment.status = outcome.status;
        payment.psp_ref = outcome.psp_ref;
        payment.psp_response = Some(outcome.response);
        if payment.status == PaymentStatus::Completed {
            payment.completed_at = Some(epoch_ms());
        }
        store.put_payment(payment.clone()).await;
        Ok(payment)
    }

    /// Refund a completed, non-cash payment.
    pub async fn refund(&self, payment_id: Uuid) -> Result<Payment> {
        let store = &self.platform.store;
        let _guard = store.lock_payment_nowait(payment_id).await?;
        let mut payment =
            store.payment(payment_id).await.ok_or_else(|| Error::not_found("payment", payment_id))?;
        if payment.status != PaymentStatus::Completed {
            return Err(Error::conflict("only completed payments can be refunded"));
        }
        if payment.method == PaymentMethod::Cash {
            return Err(Error::conflict("cash payments cannot be refunded"));
        }

        let now = epoch_ms();
        payment.status = PaymentStatus::Refunded;
        let mut response = payment.psp_response.take().unwrap_or_else(|| json!({}));
        if let Some(map) = response.as_object_mut() {
            map.insert("refunded_at".to_owned(), json!(now));
            map.insert("refund_ref".to_owned(), json!(format!("REFUND-{now}")));
        }
        payment.psp_response = Some(response);
        store.put_payment(payment.clone()).await;
        info!(payment_id = %payment.id, "payment refunded");
        Ok(payment)
    }
}

#[cfg(test)]
#[path = "payments_tests.rs"]
mod tests;
