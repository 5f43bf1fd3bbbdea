//! Payment-provider webhook endpoint.
//!
//! The provider signs the raw request body with a shared secret; verification
//! happens before the payload is even parsed. Handling is idempotent per
//! provider event id.

use crate::api::ApiError;
use crate::core::traits::{BillingEvent, BillingService};
use crate::error::ServiceError;
use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use chrono::Utc;
use di_axum::Inject;
use hmac::{Hmac, Mac};
use log::error;
use serde::Deserialize;
use sha2::Sha256;
use std::env;

const SIGNATURE_HEADER: &str = "Webhook-Signature";

pub fn router() -> Router {
    Router::new().route("/webhook", post(webhook))
}

async fn webhook(
    Inject(billing): Inject<dyn BillingService>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let secret = env::var("BILLING_WEBHOOK_SECRET").unwrap_or_default();
    if secret.is_empty() {
        // Fail closed rather than accept unverifiable events.
        error!("BILLING_WEBHOOK_SECRET is not set, rejecting webhook");
        return Err(ServiceError::Unauthorized.into());
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ServiceError::Unauthorized)?;

    if !verify_signature(&secret, &body, signature) {
        return Err(ServiceError::Unauthorized.into());
    }

    let payload: schemas::WebhookPayload = serde_json::from_str(&body)
        .map_err(|e| ServiceError::InvalidInput(format!("malformed webhook payload: {e}")))?;

    billing
        .handle_event(BillingEvent {
            id: payload.id,
            kind: payload.kind,
            customer_email: payload.data.customer_email,
            plan: payload.data.plan,
            subscription_id: payload.data.subscription_id,
            status: payload.data.status,
            received_at: Utc::now(),
        })
        .await?;

    Ok(StatusCode::OK)
}

/// Hex-encoded HMAC-SHA256 of the raw body, compared in constant time.
pub fn verify_signature(secret: &str, body: &str, signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Test helper and reference for what the provider sends.
pub fn sign_body(secret: &str, body: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub mod schemas {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct WebhookPayload {
        pub id: String,
        #[serde(rename = "type")]
        pub kind: String,
        pub data: WebhookData,
    }

    #[derive(Deserialize, Debug)]
    pub struct WebhookData {
        pub customer_email: String,
        #[serde(default)]
        pub plan: Option<String>,
        #[serde(default)]
        pub subscription_id: Option<String>,
        #[serde(default)]
        pub status: Option<String>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let body = r#"{"id":"evt_1","type":"invoice.paid"}"#;
        let signature = sign_body("whsec_test", body);
        assert!(verify_signature("whsec_test", body, &signature));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let signature = sign_body("whsec_test", "{\"a\":1}");
        assert!(!verify_signature("whsec_test", "{\"a\":2}", &signature));
        assert!(!verify_signature("other_secret", "{\"a\":1}", &signature));
    }

    #[test]
    fn garbage_signature_is_rejected() {
        assert!(!verify_signature("whsec_test", "{}", "not hex at all"));
    }
}
