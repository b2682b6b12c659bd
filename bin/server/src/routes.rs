//! HTTP trigger surface.
//!
//! One POST endpoint drives the engine: an empty or `{}` body runs the
//! full batch, a body naming an `action` runs a targeted operation for a
//! single entity. A read endpoint lists the records for one entity, and a
//! liveness probe reports the service version.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use billhound_core::{InvoiceId, QuoteId};
use billhound_followup::{EntityKind, EntityRef};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/followups/run", post(run_trigger))
        .route("/followups", get(list_followups))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// One trigger request.
///
/// All fields are optional: an empty object runs the batch, targeted
/// actions name the entity they apply to.
#[derive(Debug, Default, Deserialize)]
struct TriggerRequest {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    invoice_id: Option<String>,
    #[serde(default)]
    quote_id: Option<String>,
}

/// Runs the batch or a targeted action, depending on the request body.
async fn run_trigger(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = parse_trigger(&body)?;
    let now = Utc::now();

    match request.action.as_deref() {
        None => {
            let report = state.engine.run_batch(now).await?;
            Ok(Json(json!({ "ok": true, "report": report })))
        }
        Some("create_followup_for_invoice") => {
            let id = required_invoice_id(&request)?;
            let outcome = state.engine.followup_for_invoice(id, now).await?;
            Ok(Json(json!({ "ok": true, "outcome": outcome })))
        }
        Some("cleanup_finalized_invoice") => {
            let id = required_invoice_id(&request)?;
            let stopped = state.engine.cleanup_invoice(id).await?;
            Ok(Json(json!({ "ok": true, "stopped": stopped })))
        }
        Some("cleanup_finalized_quote") => {
            let id = required_quote_id(&request)?;
            let stopped = state.engine.cleanup_quote(id).await?;
            Ok(Json(json!({ "ok": true, "stopped": stopped })))
        }
        Some(other) => Err(ApiError::BadRequest {
            message: format!("unknown action '{other}'"),
        }),
    }
}

/// Query parameters for the follow-up listing.
#[derive(Debug, Deserialize)]
struct ListQuery {
    /// Prefixed entity ID (`quo_…` or `inv_…`).
    entity_id: String,
}

/// Lists all follow-up records for one entity, oldest first.
async fn list_followups(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entity = parse_entity_id(&query.entity_id)?;
    let followups = state.engine.followups_for_entity(entity).await?;
    Ok(Json(json!({ "ok": true, "followups": followups })))
}

/// Liveness probe.
async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn parse_trigger(body: &[u8]) -> Result<TriggerRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TriggerRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest {
        message: format!("malformed request body: {e}"),
    })
}

fn required_invoice_id(request: &TriggerRequest) -> Result<InvoiceId, ApiError> {
    let raw = request.invoice_id.as_deref().ok_or_else(|| ApiError::BadRequest {
        message: "missing 'invoice_id'".to_string(),
    })?;
    InvoiceId::from_str(raw).map_err(|e| ApiError::BadRequest {
        message: format!("invalid invoice_id: {e}"),
    })
}

fn required_quote_id(request: &TriggerRequest) -> Result<QuoteId, ApiError> {
    let raw = request.quote_id.as_deref().ok_or_else(|| ApiError::BadRequest {
        message: "missing 'quote_id'".to_string(),
    })?;
    QuoteId::from_str(raw).map_err(|e| ApiError::BadRequest {
        message: format!("invalid quote_id: {e}"),
    })
}

fn parse_entity_id(raw: &str) -> Result<EntityRef, ApiError> {
    let kind = match raw.split_once('_').map(|(prefix, _)| prefix) {
        Some(p) if p == QuoteId::prefix() => EntityKind::Quote,
        Some(p) if p == InvoiceId::prefix() => EntityKind::Invoice,
        _ => {
            return Err(ApiError::BadRequest {
                message: format!(
                    "entity_id '{raw}' must carry a '{}_' or '{}_' prefix",
                    QuoteId::prefix(),
                    InvoiceId::prefix()
                ),
            });
        }
    };
    EntityRef::from_parts(kind, raw).map_err(|e| ApiError::BadRequest {
        message: format!("invalid entity_id: {e}"),
    })
}
