use async_trait::async_trait;
use chrono::NaiveDate;
use parkcore_common::AmountMinorUnits;
use uuid::Uuid;

use crate::error::CoreResult;

/// Metadata attached to a created payment session, carried through to the
/// success callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSessionMetadata {
    pub reservation_id: Uuid,
    pub spot_id: Uuid,
    pub lot_id: Uuid,
    pub user_id: Uuid,
    pub booking_date: NaiveDate,
    pub start_minutes: u16,
    pub end_minutes: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    pub session_id: String,
    pub redirect_url: String,
}

/// What a completed checkout session reports back on the success callback.
/// The charged amount and the booking metadata both come from the
/// provider's own record of the session, not re-derived from our state,
/// since the provider is the source of truth for what was actually
/// charged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedSession {
    pub amount: AmountMinorUnits,
    pub metadata: PaymentSessionMetadata,
}

/// Abstraction over the third-party payment provider, an external
/// collaborator whose only observable interface matters here. In
/// production this talks to Stripe-shaped HTTP endpoints; tests substitute
/// `FakePaymentProvider`.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_session(
        &self,
        amount: AmountMinorUnits,
        success_path: &str,
        metadata: &PaymentSessionMetadata,
    ) -> CoreResult<PaymentSession>;

    /// Called on the success callback to recover the charged amount and
    /// booking metadata from the provider's own session record.
    async fn retrieve_session(&self, session_id: &str) -> CoreResult<RetrievedSession>;

    async fn refund(&self, session_id: &str) -> CoreResult<()>;
}

/// HTTP client over a Stripe-shaped checkout-session API.
pub struct StripeLikePaymentProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl StripeLikePaymentProvider {
    pub fn new(api_base: String, api_key: String) -> Self {
        Self { client: reqwest::Client::new(), api_base, api_key }
    }
}

#[async_trait]
impl PaymentProvider for StripeLikePaymentProvider {
    async fn create_session(
        &self,
        amount: AmountMinorUnits,
        success_path: &str,
        metadata: &PaymentSessionMetadata,
    ) -> CoreResult<PaymentSession> {
        if !amount.is_valid() {
            return Err(crate::error::CoreError::AmountTooSmall(amount.0));
        }

        #[derive(serde::Serialize)]
        struct CreateSessionRequest<'a> {
            amount: i64,
            success_url: &'a str,
            metadata: CreateSessionMetadata,
        }
        #[derive(serde::Serialize)]
        struct CreateSessionMetadata {
            reservation_id: Uuid,
            spot_id: Uuid,
            parking_lot_id: Uuid,
            booking_date: NaiveDate,
            start_time: u16,
            end_time: u16,
            user_id: Uuid,
        }
        #[derive(serde::Deserialize)]
        struct CreateSessionResponse {
            id: String,
            url: String,
        }

        let body = CreateSessionRequest {
            amount: amount.0,
            success_url: success_path,
            metadata: CreateSessionMetadata {
                reservation_id: metadata.reservation_id,
                spot_id: metadata.spot_id,
                parking_lot_id: metadata.lot_id,
                booking_date: metadata.booking_date,
                start_time: metadata.start_minutes,
                end_time: metadata.end_minutes,
                user_id: metadata.user_id,
            },
        };

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| crate::error::CoreError::Payment(err.to_string()))?
            .error_for_status()
            .map_err(|err| crate::error::CoreError::Payment(err.to_string()))?
            .json::<CreateSessionResponse>()
            .await
            .map_err(|err| crate::error::CoreError::Payment(err.to_string()))?;

        Ok(PaymentSession { session_id: response.id, redirect_url: response.url })
    }

    async fn retrieve_session(&self, session_id: &str) -> CoreResult<RetrievedSession> {
        #[derive(serde::Deserialize)]
        struct RetrieveSessionResponse {
            amount_total: i64,
            metadata: CreateSessionMetadata,
        }
        #[derive(serde::Deserialize)]
        struct CreateSessionMetadata {
            reservation_id: Uuid,
            spot_id: Uuid,
            parking_lot_id: Uuid,
            booking_date: NaiveDate,
            start_time: u16,
            end_time: u16,
            user_id: Uuid,
        }

        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions/{session_id}", self.api_base))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| crate::error::CoreError::Payment(err.to_string()))?
            .error_for_status()
            .map_err(|err| crate::error::CoreError::Payment(err.to_string()))?
            .json::<RetrieveSessionResponse>()
            .await
            .map_err(|err| crate::error::CoreError::Payment(err.to_string()))?;

        Ok(RetrievedSession {
            amount: AmountMinorUnits(response.amount_total),
            metadata: PaymentSessionMetadata {
                reservation_id: response.metadata.reservation_id,
                spot_id: response.metadata.spot_id,
                lot_id: response.metadata.parking_lot_id,
                user_id: response.metadata.user_id,
                booking_date: response.metadata.booking_date,
                start_minutes: response.metadata.start_time,
                end_minutes: response.metadata.end_time,
            },
        })
    }

    async fn refund(&self, session_id: &str) -> CoreResult<()> {
        self.client
            .post(format!("{}/v1/checkout/sessions/{session_id}/refund", self.api_base))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| crate::error::CoreError::Payment(err.to_string()))?
            .error_for_status()
            .map_err(|err| crate::error::CoreError::Payment(err.to_string()))?;
        Ok(())
    }
}

/// In-memory fake for coordinator tests: every session "succeeds" to
/// create, and refunds are recorded for assertion. Remembers created
/// sessions so `retrieve_session` can round-trip them the way a real
/// provider's session record would.
#[derive(Default)]
pub struct FakePaymentProvider {
    pub refunded_sessions: std::sync::Mutex<Vec<String>>,
    sessions: std::sync::Mutex<std::collections::HashMap<String, (AmountMinorUnits, PaymentSessionMetadata)>>,
}

impl FakePaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn create_session(
        &self,
        amount: AmountMinorUnits,
        success_path: &str,
        metadata: &PaymentSessionMetadata,
    ) -> CoreResult<PaymentSession> {
        if !amount.is_valid() {
            return Err(crate::error::CoreError::AmountTooSmall(amount.0));
        }
        let session_id = format!("fake_{}", metadata.reservation_id);
        self.sessions.lock().unwrap().insert(session_id.clone(), (amount, metadata.clone()));
        Ok(PaymentSession {
            session_id: session_id.clone(),
            redirect_url: format!("{success_path}?session_id={session_id}"),
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> CoreResult<RetrievedSession> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|(amount, metadata)| RetrievedSession { amount: *amount, metadata: metadata.clone() })
            .ok_or_else(|| crate::error::CoreError::Payment(format!("unknown session {session_id}")))
    }

    async fn refund(&self, session_id: &str) -> CoreResult<()> {
        self.refunded_sessions.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}
