//! Payment provider client for payout disbursement
//!
//! Thin HTTP client over the external disbursement provider. The worker
//! submits one disbursement per payout; the provider's reference string
//! is stored on completion so settlements can be reconciled later.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PaymentsConfig;
use crate::error::{AppError, AppResult};
use crate::models::{Payout, PayoutMethod};

/// Disbursement request sent to the provider
#[derive(Debug, Clone, Serialize)]
pub struct DisbursementRequest<'a> {
    pub idempotency_key: String,
    pub amount: String,
    pub currency: &'a str,
    pub method: PayoutMethod,
    pub payment_details: &'a serde_json::Value,
}

/// Provider acknowledgement of a disbursement
#[derive(Debug, Clone, Deserialize)]
pub struct DisbursementResponse {
    pub reference: String,
    pub status: String,
}

/// Provider error body, when it sends one
#[derive(Debug, Clone, Deserialize)]
struct ProviderError {
    message: String,
}

/// HTTP client for the external payment provider
#[derive(Clone)]
pub struct PaymentProviderClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PaymentProviderClient {
    /// Creates a client from the payments configuration
    pub fn new(config: &PaymentsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build payment provider HTTP client")?;

        Ok(Self {
            http,
            base_url: config.provider_url.trim_end_matches('/').to_string(),
            api_key: config.provider_api_key.clone(),
        })
    }

    /// Submits a disbursement for a payout and returns the provider
    /// reference.
    ///
    /// The payout id doubles as the idempotency key, so a crashed worker
    /// resubmitting the same payout cannot double-disburse on the
    /// provider side.
    pub async fn submit_disbursement(&self, payout: &Payout) -> AppResult<String> {
        let request = DisbursementRequest {
            idempotency_key: payout.id.to_string(),
            amount: payout.amount.to_string(),
            currency: "USD",
            method: payout.method,
            payment_details: &payout.payment_details,
        };

        debug!("Submitting disbursement for payout {}", payout.id);

        let response = self
            .http
            .post(format!("{}/disbursements", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: DisbursementResponse = response.json().await?;
            info!(
                "Disbursement accepted for payout {}: reference {}",
                payout.id, body.reference
            );
            return Ok(body.reference);
        }

        let message = match response.json::<ProviderError>().await {
            Ok(body) => body.message,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("Unknown provider error")
                .to_string(),
        };

        Err(AppError::ExternalService(format!(
            "Provider error ({}): {}",
            status, message
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use httpmock::prelude::*;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn payout() -> Payout {
        let now = Utc::now();
        Payout {
            id: Uuid::new_v4(),
            influencer_id: Uuid::new_v4(),
            amount: Decimal::new(12500, 2),
            status: crate::models::PayoutStatus::Processing,
            method: PayoutMethod::Paypal,
            payment_details: serde_json::json!({ "email": "creator@example.com" }),
            notes: None,
            requested_at: now,
            processed_at: None,
            failure_reason: None,
            provider_reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn client(base_url: &str) -> PaymentProviderClient {
        PaymentProviderClient::new(&crate::config::PaymentsConfig {
            provider_url: base_url.to_string(),
            provider_api_key: "test-key".to_string(),
            request_timeout_secs: 5,
            poll_interval_secs: 10,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn successful_disbursement_returns_reference() {
        let server = MockServer::start_async().await;
        let payout = payout();

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/disbursements")
                    .header("authorization", "Bearer test-key")
                    .json_body_partial(format!(
                        r#"{{ "idempotency_key": "{}", "amount": "125.00" }}"#,
                        payout.id
                    ));
                then.status(200)
                    .json_body(serde_json::json!({ "reference": "disb_42", "status": "accepted" }));
            })
            .await;

        let reference = client(&server.base_url())
            .submit_disbursement(&payout)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reference, "disb_42");
    }

    #[tokio::test]
    async fn provider_rejection_maps_to_external_service_error() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/disbursements");
                then.status(422)
                    .json_body(serde_json::json!({ "message": "account closed" }));
            })
            .await;

        let err = client(&server.base_url())
            .submit_disbursement(&payout())
            .await
            .unwrap_err();

        match err {
            AppError::ExternalService(msg) => assert!(msg.contains("account closed")),
            other => panic!("Expected ExternalService error, got {:?}", other),
        }
    }
}
