//! Billing provider webhook.
//!
//! Senders only learn accepted or rejected. Details of a rejection go to the
//! log under an incident id.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use hangar_core::billing::{dispatch, Dispatched, WebhookError, SIGNATURE_HEADER};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
struct WebhookAck {
    received: bool,
    handled: bool,
}

async fn receive(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<WebhookAck>, ApiError> {
    let Some(signature) = headers.get(SIGNATURE_HEADER) else {
        return Err(ApiError::BadRequest(format!("Missing {} header", SIGNATURE_HEADER)));
    };

    let outcome = match signature.to_str() {
        Ok(signature) => process(&state, &body, signature).await,
        Err(_) => Err(WebhookError::MalformedSignature),
    };
    match outcome {
        Ok(dispatched) => Ok(Json(WebhookAck {
            received: true,
            handled: dispatched != Dispatched::Ignored,
        })),
        Err(err) => {
            let incident_id = Uuid::new_v4();
            error!(incident_id = %incident_id, error = %err, "Billing webhook rejected");
            Err(ApiError::BadRequest("Webhook could not be processed".to_string()))
        }
    }
}

async fn process(state: &AppState, body: &[u8], signature: &str) -> Result<Dispatched, WebhookError> {
    let event = state
        .webhooks()
        .construct_event(body, Some(signature), Utc::now().timestamp())?;
    let dispatched = dispatch(state.billing(), &event).await?;
    info!(event_id = %event.id, event_type = %event.event_type, outcome = ?dispatched, "Billing webhook processed");
    Ok(dispatched)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(receive))
}
