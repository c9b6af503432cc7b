//! Payment gateway client and notification verification
//!
//! The gateway is an external hosted-checkout service reached over JSON/HTTPS.
//! Charges are created server-side; the member pays on the gateway's hosted
//! page; the result comes back asynchronously as a signed notification POSTed
//! to our notification URL.

use std::collections::HashMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw notification body
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Metadata key for the server-generated correlation token
pub const CORRELATION_TOKEN_KEY: &str = "correlation_token";

/// Bounded timeout for all gateway calls
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for the payment gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway secret API key (bearer auth)
    pub secret_key: String,
    /// Shared secret used to sign notification bodies
    pub webhook_secret: String,
    /// Gateway API base URL
    pub base_url: String,
    /// Absolute URL of our notification endpoint, sent with every charge
    pub notification_url: String,
}

impl GatewayConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("GATEWAY_SECRET_KEY")
                .map_err(|_| BillingError::Config("GATEWAY_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("GATEWAY_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("GATEWAY_WEBHOOK_SECRET not set".to_string()))?,
            base_url: std::env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.payplug.com".to_string()),
            notification_url: std::env::var("GATEWAY_NOTIFICATION_URL").map_err(|_| {
                BillingError::Config("GATEWAY_NOTIFICATION_URL not set".to_string())
            })?,
        })
    }
}

/// Customer details attached to a charge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChargeCustomer {
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Tokenized card the gateway stored for a charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeCard {
    pub id: String,
    pub exp_month: u8,
    pub exp_year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last4: Option<String>,
}

/// Gateway-reported payment failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeFailure {
    pub code: String,
    pub message: String,
}

/// Hosted-checkout URLs: ours going out, the gateway's payment page coming back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedUrls {
    pub return_url: String,
    pub cancel_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
}

/// Request body for creating a charge
#[derive(Debug, Clone, Serialize)]
pub struct CreateChargeRequest {
    /// Amount in minor currency units (cents)
    pub amount: i64,
    pub currency: String,
    pub customer: ChargeCustomer,
    pub save_card: bool,
    /// Stored card token, set only for merchant-initiated recurring charges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    pub metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosted_payment: Option<HostedUrls>,
    pub notification_url: String,
}

/// A charge resource as returned by the gateway, both from the creation call
/// and inside asynchronous notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeResource {
    pub id: String,
    pub object: String,
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default)]
    pub save_card: bool,
    pub failure: Option<ChargeFailure>,
    pub card: Option<ChargeCard>,
    pub customer: Option<ChargeCustomer>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub hosted_payment: Option<HostedUrls>,
}

impl ChargeResource {
    /// The correlation token echoed back in the charge metadata, if any
    pub fn correlation_token(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_TOKEN_KEY).map(String::as_str)
    }

    pub fn hosted_payment_url(&self) -> Option<&str> {
        self.hosted_payment
            .as_ref()
            .and_then(|h| h.payment_url.as_deref())
    }
}

/// Payment gateway client
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    /// Create a new gateway client from config
    pub fn new(config: GatewayConfig) -> BillingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Create a new gateway client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Create a charge. On acceptance the gateway returns the charge resource
    /// carrying its id and, for hosted checkouts, the payment page URL.
    pub async fn create_charge(
        &self,
        request: &CreateChargeRequest,
    ) -> BillingResult<ChargeResource> {
        let response = self
            .client
            .post(format!("{}/v1/payments", self.config.base_url))
            .bearer_auth(&self.config.secret_key)
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve a charge by id (polling / manual reconciliation path)
    pub async fn retrieve_charge(&self, charge_id: &str) -> BillingResult<ChargeResource> {
        let response = self
            .client
            .get(format!("{}/v1/payments/{}", self.config.base_url, charge_id))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn parse_response(response: reqwest::Response) -> BillingResult<ChargeResource> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(BillingError::GatewayApi {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| BillingError::InvalidPayload(format!("{}; body={}", e, body)))
    }

    /// Verify the HMAC-SHA256 signature over a raw notification body.
    ///
    /// Comparison is constant-time; a payload failing here must never reach
    /// the reconciliation engine.
    pub fn verify_signature(&self, body: &[u8], signature: &str) -> BillingResult<()> {
        let provided =
            hex::decode(signature.trim()).map_err(|_| BillingError::SignatureInvalid)?;

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .map_err(|_| BillingError::SignatureInvalid)?;
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        if bool::from(expected.ct_eq(provided.as_slice())) {
            Ok(())
        } else {
            Err(BillingError::SignatureInvalid)
        }
    }

    /// Verify and parse a notification body into a charge resource
    pub fn parse_notification(
        &self,
        body: &[u8],
        signature: &str,
    ) -> BillingResult<ChargeResource> {
        self.verify_signature(body, signature)?;
        serde_json::from_slice(body).map_err(|e| BillingError::InvalidPayload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(base_url: String) -> GatewayConfig {
        GatewayConfig {
            secret_key: "sk_test_secret".to_string(),
            webhook_secret: "whsec_test".to_string(),
            base_url,
            notification_url: "https://example.org/api/v1/payments/notifications".to_string(),
        }
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn sample_request() -> CreateChargeRequest {
        let mut metadata = HashMap::new();
        metadata.insert(CORRELATION_TOKEN_KEY.to_string(), "tok123".to_string());
        CreateChargeRequest {
            amount: 2500,
            currency: "EUR".to_string(),
            customer: ChargeCustomer {
                email: Some("member@example.org".to_string()),
                first_name: None,
                last_name: None,
            },
            save_card: true,
            payment_method: None,
            metadata,
            hosted_payment: Some(HostedUrls {
                return_url: "https://example.org/done".to_string(),
                cancel_url: "https://example.org/cancel".to_string(),
                payment_url: None,
            }),
            notification_url: "https://example.org/api/v1/payments/notifications".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_charge_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/payments")
            .match_header("authorization", "Bearer sk_test_secret")
            .with_status(201)
            .with_body(
                r#"{
                    "id": "pay_abc123",
                    "object": "payment",
                    "is_paid": false,
                    "hosted_payment": {
                        "return_url": "https://example.org/done",
                        "cancel_url": "https://example.org/cancel",
                        "payment_url": "https://pay.example.com/pay_abc123"
                    }
                }"#,
            )
            .create_async()
            .await;

        let client = GatewayClient::new(test_config(server.url())).unwrap();
        let charge = client.create_charge(&sample_request()).await.unwrap();

        assert_eq!(charge.id, "pay_abc123");
        assert!(!charge.is_paid);
        assert_eq!(
            charge.hosted_payment_url(),
            Some("https://pay.example.com/pay_abc123")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_charge_gateway_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/payments")
            .with_status(400)
            .with_body(r#"{"error": "amount below minimum"}"#)
            .create_async()
            .await;

        let client = GatewayClient::new(test_config(server.url())).unwrap();
        let err = client.create_charge(&sample_request()).await.unwrap_err();

        match err {
            BillingError::GatewayApi { status, .. } => assert_eq!(status, 400),
            other => panic!("expected GatewayApi error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retrieve_charge() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/payments/pay_abc123")
            .with_status(200)
            .with_body(r#"{"id": "pay_abc123", "object": "payment", "is_paid": true}"#)
            .create_async()
            .await;

        let client = GatewayClient::new(test_config(server.url())).unwrap();
        let charge = client.retrieve_charge("pay_abc123").await.unwrap();
        assert!(charge.is_paid);
    }

    #[test]
    fn test_signature_accepts_valid_body() {
        let client = GatewayClient::new(test_config("http://unused".to_string())).unwrap();
        let body = br#"{"id": "pay_1", "object": "payment"}"#;
        let signature = sign("whsec_test", body);

        assert!(client.verify_signature(body, &signature).is_ok());
    }

    #[test]
    fn test_signature_rejects_tampered_body() {
        let client = GatewayClient::new(test_config("http://unused".to_string())).unwrap();
        let body = br#"{"id": "pay_1", "object": "payment"}"#;
        let signature = sign("whsec_test", body);
        let tampered = br#"{"id": "pay_2", "object": "payment"}"#;

        assert!(matches!(
            client.verify_signature(tampered, &signature),
            Err(BillingError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_signature_rejects_garbage_signature() {
        let client = GatewayClient::new(test_config("http://unused".to_string())).unwrap();
        let body = b"{}";

        assert!(client.verify_signature(body, "not-hex").is_err());
        assert!(client.verify_signature(body, "deadbeef").is_err());
    }

    #[test]
    fn test_parse_notification_extracts_token() {
        let client = GatewayClient::new(test_config("http://unused".to_string())).unwrap();
        let body = br#"{
            "id": "pay_1",
            "object": "payment",
            "is_paid": true,
            "metadata": {"correlation_token": "tok456"}
        }"#;
        let signature = sign("whsec_test", body);

        let charge = client.parse_notification(body, &signature).unwrap();
        assert_eq!(charge.correlation_token(), Some("tok456"));
    }
}
