pub mod breaker;
pub mod payment;

use std::sync::Arc;

use chrono::NaiveDate;
use parkcore_common::{AmountMinorUnits, ConfirmOutcome};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordinator::breaker::CacheBreaker;
use crate::coordinator::payment::{PaymentProvider, PaymentSessionMetadata};
use crate::error::{CoreError, CoreResult};
use crate::lease::cache::CoordinationCache;
use crate::lease::manager::{AcquireRequest, LeaseManager, DEFAULT_LEASE_TTL_SECS};
use crate::persistence::{BookingRepo, IdempotencyRepo, LeaseAuditRepo, PendingBookingRepo};

/// Everything a successful `request_booking` call needs the caller (the
/// realtime hub / HTTP handler) to do next.
pub enum BookingOutcome {
    /// Leased path: a payment session was created, the caller should emit
    /// `payment_redirect{url}` and `spot_update{spotId, available:false}`.
    Leased { reservation_id: Uuid, redirect_url: String },
    /// Direct path: same caller-facing effect, no lease guard involved.
    Direct { reservation_id: Uuid, redirect_url: String },
    /// Neither path could reserve the spot; emit `booking_failed{reason}`.
    Failed { reason: String },
}

/// Inputs common to both booking paths.
pub struct BookingRequest {
    pub user_id: Uuid,
    pub lot_id: Uuid,
    pub spot_id: Uuid,
    pub date: NaiveDate,
    pub start_minutes: u16,
    pub end_minutes: u16,
    pub amount: AmountMinorUnits,
    pub success_path: String,
    /// A reservation id already attached to the caller's connection, if
    /// any (idempotency across reconnects).
    pub existing_reservation_id: Option<Uuid>,
}

/// The booking state machine: request → lease → checkout → confirm/refund,
/// dispatching between the leased and direct paths via the circuit
/// breaker.
pub struct BookingCoordinator<C: CoordinationCache, P: PaymentProvider> {
    pool: PgPool,
    cache: Arc<C>,
    breaker: Arc<CacheBreaker>,
    lease_manager: LeaseManager<C>,
    payment: Arc<P>,
    bookings: Arc<BookingRepo>,
    pending: Arc<PendingBookingRepo>,
    idempotency: Arc<IdempotencyRepo>,
    lease_audit: Arc<LeaseAuditRepo>,
}

impl<C: CoordinationCache, P: PaymentProvider> BookingCoordinator<C, P> {
    pub fn new(
        pool: PgPool,
        cache: Arc<C>,
        breaker: Arc<CacheBreaker>,
        payment: Arc<P>,
        bookings: Arc<BookingRepo>,
        pending: Arc<PendingBookingRepo>,
        idempotency: Arc<IdempotencyRepo>,
        lease_audit: Arc<LeaseAuditRepo>,
    ) -> Self {
        let lease_manager = LeaseManager::new(cache.clone());
        Self { pool, cache, breaker, lease_manager, payment, bookings, pending, idempotency, lease_audit }
    }

    pub fn lease_manager(&self) -> &LeaseManager<C> {
        &self.lease_manager
    }

    pub fn payment_provider(&self) -> &P {
        &self.payment
    }

    /// Entry point: dispatch to the leased or direct path per the breaker.
    /// If the leased path raises a cache error mid-flight, falls back to
    /// direct for this attempt.
    pub async fn request_booking(&self, request: BookingRequest) -> CoreResult<BookingOutcome> {
        if request.start_minutes >= request.end_minutes {
            return Err(CoreError::InvalidWindow { start: request.start_minutes, end: request.end_minutes });
        }
        if !request.amount.is_valid() {
            return Err(CoreError::AmountTooSmall(request.amount.0));
        }

        if self.breaker.is_healthy() {
            match self.request_booking_leased(&request).await {
                Ok(outcome) => return Ok(outcome),
                Err(CoreError::Cache(err)) => {
                    warn!(%err, "cache failed mid-flight on leased path, falling back to direct");
                    self.breaker.trip();
                }
                Err(other) => return Err(other),
            }
        }

        self.request_booking_direct(&request).await
    }

    async fn request_booking_leased(&self, request: &BookingRequest) -> CoreResult<BookingOutcome> {
        let reservation_id = match self
            .lease_manager
            .acquire(AcquireRequest {
                spot_id: request.spot_id,
                lot_id: request.lot_id,
                user_id: request.user_id,
                date: request.date,
                start_minutes: request.start_minutes,
                end_minutes: request.end_minutes,
                ttl_secs: DEFAULT_LEASE_TTL_SECS,
                reservation_id: request.existing_reservation_id,
            })
            .await?
        {
            Some(id) => id,
            None => return Ok(BookingOutcome::Failed { reason: "taken".to_string() }),
        };

        self.lease_audit
            .record(
                request.spot_id,
                request.date,
                reservation_id,
                chrono::Utc::now() + chrono::Duration::seconds(DEFAULT_LEASE_TTL_SECS as i64),
            )
            .await?;

        let metadata = PaymentSessionMetadata {
            reservation_id,
            spot_id: request.spot_id,
            lot_id: request.lot_id,
            user_id: request.user_id,
            booking_date: request.date,
            start_minutes: request.start_minutes,
            end_minutes: request.end_minutes,
        };

        let session = match self.payment.create_session(request.amount, &request.success_path, &metadata).await {
            Ok(session) => session,
            Err(err) => {
                // Producing a session failed: release the lease and restore
                // availability rather than leave a dangling hold.
                self.lease_manager.release(request.spot_id, request.date, reservation_id).await.ok();
                self.lease_audit.mark_processed(request.spot_id, request.date, reservation_id).await.ok();
                return Err(err);
            }
        };

        self.lease_manager.attach_payment_context(reservation_id, &session.session_id).await?;

        info!(%reservation_id, spot_id = %request.spot_id, "lease acquired, payment session created");
        Ok(BookingOutcome::Leased { reservation_id, redirect_url: session.redirect_url })
    }

    async fn request_booking_direct(&self, request: &BookingRequest) -> CoreResult<BookingOutcome> {
        let reservation_id = request.existing_reservation_id.unwrap_or_else(Uuid::new_v4);
        let mut tx = self.pool.begin().await?;

        if self.bookings_overlap(&mut tx, request).await? {
            tx.rollback().await.ok();
            return Ok(BookingOutcome::Failed { reason: "taken".to_string() });
        }
        if PendingBookingRepo::has_overlap_tx(&mut tx, request.spot_id, request.date, request.start_minutes, request.end_minutes)
            .await?
        {
            tx.rollback().await.ok();
            return Ok(BookingOutcome::Failed { reason: "taken".to_string() });
        }

        PendingBookingRepo::insert_tx(
            &mut tx,
            reservation_id,
            request.user_id,
            request.lot_id,
            request.spot_id,
            request.date,
            request.start_minutes,
            request.end_minutes,
            request.amount,
        )
        .await?;
        tx.commit().await?;

        let metadata = PaymentSessionMetadata {
            reservation_id,
            spot_id: request.spot_id,
            lot_id: request.lot_id,
            user_id: request.user_id,
            booking_date: request.date,
            start_minutes: request.start_minutes,
            end_minutes: request.end_minutes,
        };
        let session = match self.payment.create_session(request.amount, &request.success_path, &metadata).await {
            Ok(session) => session,
            Err(err) => {
                self.pending.delete(reservation_id).await.ok();
                return Err(err);
            }
        };

        info!(%reservation_id, spot_id = %request.spot_id, "direct-path pending booking created, payment session created");
        Ok(BookingOutcome::Direct { reservation_id, redirect_url: session.redirect_url })
    }

    async fn bookings_overlap(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, request: &BookingRequest) -> CoreResult<bool> {
        BookingRepo::lock_spot(tx, request.spot_id).await?;
        let count =
            BookingRepo::count_overlapping_tx(tx, request.spot_id, request.date, request.start_minutes, request.end_minutes)
                .await?;
        Ok(count > 0)
    }

    /// Confirm a leased-path booking on payment callback. Memoized on
    /// `idempotency_key` (typically `stripe_{sessionId}`); repeated calls
    /// return the same outcome.
    ///
    /// `amount` is the charged amount as reported by the payment provider's
    /// own session record (not re-derived from our state, since the
    /// provider is the source of truth for what was actually charged).
    pub async fn confirm_leased(
        &self,
        reservation_id: Uuid,
        expected_user_id: Uuid,
        expected_spot_id: Uuid,
        amount: AmountMinorUnits,
        idempotency_key: &str,
    ) -> CoreResult<ConfirmOutcome> {
        let mut tx = self.pool.begin().await?;

        if let Some(outcome) = IdempotencyRepo::find_tx(&mut tx, idempotency_key).await? {
            tx.rollback().await.ok();
            return Ok(outcome);
        }

        let Some(metadata) = self.lease_manager.metadata(reservation_id).await? else {
            let outcome = ConfirmOutcome::Failed { reason: "lease lost".to_string() };
            self.finish_confirm(tx, idempotency_key, &outcome).await?;
            self.refund_and_log(&idempotency_key_session(idempotency_key)).await;
            return Ok(outcome);
        };

        if metadata.user_id != expected_user_id || metadata.spot_id != expected_spot_id {
            let outcome = ConfirmOutcome::Failed { reason: "lease lost".to_string() };
            self.finish_confirm(tx, idempotency_key, &outcome).await?;
            self.refund_and_log(&idempotency_key_session(idempotency_key)).await;
            return Ok(outcome);
        }

        // Reconcile: current guard value must still be ours; if absent,
        // attempt a by-reservation-id re-acquire before declaring it lost.
        let held = self.lease_manager.inspect(metadata.spot_id, metadata.date).await?;
        if held != Some(reservation_id) {
            let reacquired = self
                .lease_manager
                .acquire(AcquireRequest {
                    spot_id: metadata.spot_id,
                    lot_id: metadata.lot_id,
                    user_id: metadata.user_id,
                    date: metadata.date,
                    start_minutes: metadata.start_minutes,
                    end_minutes: metadata.end_minutes,
                    ttl_secs: DEFAULT_LEASE_TTL_SECS,
                    reservation_id: Some(reservation_id),
                })
                .await?;
            if reacquired != Some(reservation_id) {
                let outcome = ConfirmOutcome::Failed { reason: "lease lost".to_string() };
                self.finish_confirm(tx, idempotency_key, &outcome).await?;
                self.refund_and_log(&idempotency_key_session(idempotency_key)).await;
                return Ok(outcome);
            }
        }

        BookingRepo::lock_spot(&mut tx, metadata.spot_id).await?;
        let conflicts =
            BookingRepo::count_overlapping_tx(&mut tx, metadata.spot_id, metadata.date, metadata.start_minutes, metadata.end_minutes)
                .await?;
        if conflicts > 0 {
            let outcome = ConfirmOutcome::Failed { reason: "no longer available".to_string() };
            self.finish_confirm(tx, idempotency_key, &outcome).await?;
            self.refund_and_log(&idempotency_key_session(idempotency_key)).await;
            return Ok(outcome);
        }

        let booking = BookingRepo::insert_tx(
            &mut tx,
            metadata.user_id,
            metadata.lot_id,
            metadata.spot_id,
            metadata.date,
            metadata.start_minutes,
            metadata.end_minutes,
            amount,
        )
        .await?;

        let outcome = ConfirmOutcome::Success { booking_id: booking.booking_id };
        IdempotencyRepo::store_tx(&mut tx, idempotency_key, &outcome).await?;
        tx.commit().await?;

        self.lease_manager.release(metadata.spot_id, metadata.date, reservation_id).await.ok();
        self.lease_audit.mark_processed(metadata.spot_id, metadata.date, reservation_id).await.ok();

        info!(%reservation_id, booking_id = %booking.booking_id, "booking confirmed on leased path");
        Ok(outcome)
    }

    /// Confirm a direct-path booking on payment callback.
    pub async fn confirm_direct(&self, reservation_id: Uuid, idempotency_key: &str) -> CoreResult<ConfirmOutcome> {
        let mut tx = self.pool.begin().await?;

        if let Some(outcome) = IdempotencyRepo::find_tx(&mut tx, idempotency_key).await? {
            tx.rollback().await.ok();
            return Ok(outcome);
        }

        let pending: Option<(Uuid, Uuid, Uuid, NaiveDate, i32, i32, i64)> = sqlx::query_as(
            r#"
SELECT user_id, lot_id, spot_id, date, start_minutes, end_minutes, amount_minor_units
FROM pending_bookings WHERE reservation_id = $1
"#,
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id, lot_id, spot_id, date, start_minutes, end_minutes, amount)) = pending else {
            let outcome = ConfirmOutcome::Failed { reason: "pending booking expired".to_string() };
            self.finish_confirm(tx, idempotency_key, &outcome).await?;
            self.refund_and_log(&idempotency_key_session(idempotency_key)).await;
            return Ok(outcome);
        };
        let start_minutes = start_minutes as u16;
        let end_minutes = end_minutes as u16;

        BookingRepo::lock_spot(&mut tx, spot_id).await?;
        let confirmed_conflicts =
            BookingRepo::count_overlapping_tx(&mut tx, spot_id, date, start_minutes, end_minutes).await?;
        let pending_conflicts =
            PendingBookingRepo::has_overlap_excluding_tx(&mut tx, spot_id, date, start_minutes, end_minutes, reservation_id)
                .await?;

        if confirmed_conflicts > 0 || pending_conflicts {
            PendingBookingRepo::delete_tx(&mut tx, reservation_id).await?;
            let outcome = ConfirmOutcome::Failed { reason: "no longer available".to_string() };
            self.finish_confirm(tx, idempotency_key, &outcome).await?;
            self.refund_and_log(&idempotency_key_session(idempotency_key)).await;
            return Ok(outcome);
        }

        let booking = BookingRepo::insert_tx(
            &mut tx,
            user_id,
            lot_id,
            spot_id,
            date,
            start_minutes,
            end_minutes,
            AmountMinorUnits(amount),
        )
        .await?;
        PendingBookingRepo::delete_tx(&mut tx, reservation_id).await?;

        let outcome = ConfirmOutcome::Success { booking_id: booking.booking_id };
        IdempotencyRepo::store_tx(&mut tx, idempotency_key, &outcome).await?;
        tx.commit().await?;

        info!(%reservation_id, booking_id = %booking.booking_id, "booking confirmed on direct path");
        Ok(outcome)
    }

    async fn finish_confirm(
        &self,
        mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
        idempotency_key: &str,
        outcome: &ConfirmOutcome,
    ) -> CoreResult<()> {
        IdempotencyRepo::store_tx(&mut tx, idempotency_key, outcome).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Any terminal failure after a successful payment must trigger a
    /// refund. Errors here are logged, not propagated: the booking is
    /// never left half-committed, but a refund-provider error is a
    /// "contact support" condition, not retried automatically.
    async fn refund_and_log(&self, session_id: &str) {
        if session_id.is_empty() {
            return;
        }
        if let Err(err) = self.payment.refund(session_id).await {
            warn!(%err, session_id, "refund failed; user should be told to contact support");
        }
    }
}

/// Idempotency keys are `stripe_{sessionId}`; this recovers the session id
/// for a refund call. Returns empty when the key does not follow that
/// shape (e.g. a test-only key), in which case no refund is attempted.
fn idempotency_key_session(idempotency_key: &str) -> String {
    idempotency_key.strip_prefix("stripe_").map(str::to_string).unwrap_or_default()
}
