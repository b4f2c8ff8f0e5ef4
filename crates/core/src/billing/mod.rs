//! Billing webhooks: signature verification and event dispatch
//!
//! Signature header format: `t=<unix seconds>,v1=<hex hmac-sha256("{t}.{body}")>`.
//! Several `v1` entries may be present during secret rotation.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "billing-signature";
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;
pub const INVOICE_PAID: &str = "invoice.paid";
pub const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("malformed signature header")]
    MalformedSignature,

    #[error("signature does not match payload")]
    SignatureMismatch,

    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,

    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("billing handler failed: {0}")]
    Handler(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub customer: Option<String>,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

impl BillingEvent {
    pub fn invoice(&self) -> Result<Invoice, WebhookError> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|err| WebhookError::InvalidPayload(err.to_string()))
    }
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_seconds: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
        }
    }

    /// Verify `payload` against `header` and parse it into an event.
    pub fn construct_event(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<BillingEvent, WebhookError> {
        let header = header.ok_or(WebhookError::MissingSignature)?;
        let (timestamp, signatures) = parse_signature_header(header)?;
        if now.abs_diff(timestamp) > self.tolerance_seconds.unsigned_abs() {
            return Err(WebhookError::StaleTimestamp);
        }

        let verified = signatures.iter().any(|signature| {
            let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
                Ok(mac) => mac,
                Err(_) => return false,
            };
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            mac.verify_slice(signature).is_ok()
        });
        if !verified {
            return Err(WebhookError::SignatureMismatch);
        }

        serde_json::from_slice(payload).map_err(|err| WebhookError::InvalidPayload(err.to_string()))
    }
}

fn parse_signature_header(header: &str) -> Result<(i64, Vec<Vec<u8>>), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| WebhookError::MalformedSignature)?);
            }
            Some(("v1", value)) => {
                signatures.push(hex::decode(value).map_err(|_| WebhookError::MalformedSignature)?);
            }
            _ => {}
        }
    }
    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok((timestamp, signatures)),
        _ => Err(WebhookError::MalformedSignature),
    }
}

/// Produce a signature header for `payload`, as the billing provider would.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| WebhookError::Handler(err.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}

#[async_trait]
pub trait BillingHandler: Send + Sync {
    async fn handle_paid(&self, invoice: &Invoice) -> Result<(), WebhookError>;
    async fn handle_failed(&self, invoice: &Invoice) -> Result<(), WebhookError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Paid,
    Failed,
    Ignored,
}

/// Route an event to the handler. Unknown event types are ignored.
pub async fn dispatch(handler: &dyn BillingHandler, event: &BillingEvent) -> Result<Dispatched, WebhookError> {
    match event.event_type.as_str() {
        INVOICE_PAID => {
            let invoice = event.invoice()?;
            handler.handle_paid(&invoice).await?;
            info!(event_id = %event.id, invoice_id = %invoice.id, "Invoice paid");
            Ok(Dispatched::Paid)
        }
        INVOICE_PAYMENT_FAILED => {
            let invoice = event.invoice()?;
            handler.handle_failed(&invoice).await?;
            info!(event_id = %event.id, invoice_id = %invoice.id, "Invoice payment failed");
            Ok(Dispatched::Failed)
        }
        other => {
            debug!(event_id = %event.id, event_type = %other, "Ignoring billing event");
            Ok(Dispatched::Ignored)
        }
    }
}

/// Handler that only remembers what it was asked to do.
#[derive(Default)]
pub struct RecordingBillingHandler {
    calls: Mutex<Vec<(Dispatched, String)>>,
}

impl RecordingBillingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<(Dispatched, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl BillingHandler for RecordingBillingHandler {
    async fn handle_paid(&self, invoice: &Invoice) -> Result<(), WebhookError> {
        self.calls.lock().await.push((Dispatched::Paid, invoice.id.clone()));
        Ok(())
    }

    async fn handle_failed(&self, invoice: &Invoice) -> Result<(), WebhookError> {
        self.calls.lock().await.push((Dispatched::Failed, invoice.id.clone()));
        Ok(())
    }
}
