//! Faucet eligibility for gallery users.
//!
//! The token transfer itself happens in the faucet service; this API only
//! answers whether a wallet may ask right now and records when it last did.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::models::user::UserUpdate;
use crate::query::UserQuery;
use crate::state::AppState;
use crate::user::{can_request_faucet_tokens, next_faucet_eligibility};

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/users/{address}/faucet",
        get(check_eligibility).post(record_request),
    )
}

/// Eligibility check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityResponse {
    pub address: String,
    pub eligible: bool,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub wait_seconds: Option<i64>,
    pub message: String,
}

/// Response once a faucet request has been recorded
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetRequestResponse {
    pub address: String,
    pub requested_at: DateTime<Utc>,
    pub next_eligible_at: DateTime<Utc>,
    pub message: String,
}

async fn check_eligibility(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<EligibilityResponse>, HttpError> {
    let record = state
        .users
        .find_one(UserQuery::by_address(&address))
        .await?
        .ok_or_else(|| HttpError::not_found(&address))?;

    let now = Utc::now();
    let last = record.faucet_last_requested_at;
    if !state.faucet.enabled {
        return Ok(Json(EligibilityResponse {
            address: record.address,
            eligible: false,
            next_eligible_at: None,
            wait_seconds: None,
            message: "The faucet is currently disabled".to_string(),
        }));
    }

    match next_faucet_eligibility(last, &state.faucet, now) {
        Some(next_eligible) => {
            let wait_seconds = (next_eligible - now).num_seconds().max(1);
            Ok(Json(EligibilityResponse {
                address: record.address,
                eligible: false,
                next_eligible_at: Some(next_eligible),
                wait_seconds: Some(wait_seconds),
                message: wait_message(wait_seconds),
            }))
        }
        None => Ok(Json(EligibilityResponse {
            address: record.address,
            eligible: true,
            next_eligible_at: None,
            wait_seconds: None,
            message: "You are eligible to request tokens".to_string(),
        })),
    }
}

async fn record_request(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<FaucetRequestResponse>, HttpError> {
    if !state.faucet.enabled {
        return Err(HttpError::new(
            StatusCode::FORBIDDEN,
            "The faucet is currently disabled".to_string(),
        ));
    }

    let record = state
        .users
        .find_one(UserQuery::by_address(&address))
        .await?
        .ok_or_else(|| HttpError::not_found(&address))?;

    let now = Utc::now();
    if !can_request_faucet_tokens(record.faucet_last_requested_at, &state.faucet, now) {
        let wait_seconds = next_faucet_eligibility(record.faucet_last_requested_at, &state.faucet, now)
            .map(|next| (next - now).num_seconds().max(1))
            .unwrap_or(1);
        return Err(HttpError::new(
            StatusCode::TOO_MANY_REQUESTS,
            format!("Rate limited. {}", wait_message(wait_seconds)),
        ));
    }

    let matched = state
        .users
        .update_one(
            UserQuery::by_address(&record.address),
            &UserUpdate::faucet_requested_at(now),
        )
        .await?;
    if matched == 0 {
        return Err(HttpError::not_found(&address));
    }

    info!("Faucet request recorded for {}", record.address);
    Ok(Json(FaucetRequestResponse {
        address: record.address,
        requested_at: now,
        next_eligible_at: now + state.faucet.cooldown(),
        message: "Request recorded. Tokens will be sent shortly.".to_string(),
    }))
}

fn wait_message(wait_seconds: i64) -> String {
    let hours = wait_seconds / 3600;
    let minutes = (wait_seconds % 3600) / 60;
    format!("Please wait {}h {}m before requesting again", hours, minutes)
}
