use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::user::{ExternalUser, UserRecord, UserUpdate, deserialize_some};
use crate::query::UserQuery;
use crate::state::AppState;
use crate::user::{canonicalize_email, parse_giveaway_id, parse_wallet_address};

use super::HttpError;

pub const DEFAULT_SEARCH_LIMIT: u64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/session", post(open_session))
        .route("/users/search", post(search_users))
        .route("/users/count", post(count_users))
        .route("/users/bulk-update", post(bulk_update_users))
        .route(
            "/users/{address}",
            get(get_user).patch(update_user).delete(remove_user),
        )
        .route("/users/{address}/giveaways", post(join_giveaway))
}

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    address: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionRequest {
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUserRequest {
    #[serde(default, deserialize_with = "deserialize_some")]
    email: Option<Option<String>>,
    #[serde(default)]
    is_gallery_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(default)]
    filter: UserQuery,
    limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CountRequest {
    #[serde(default)]
    filter: UserQuery,
}

#[derive(Debug, Serialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct BulkUpdateRequest {
    #[serde(default)]
    filter: UserQuery,
    update: UserUpdate,
}

#[derive(Debug, Serialize)]
struct BulkUpdateResponse {
    matched: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinGiveawayRequest {
    giveaway_id: String,
}

async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ExternalUser>), HttpError> {
    let address = parse_wallet_address(&request.address).map_err(HttpError::bad_request)?;
    let email = match request.email.as_deref() {
        Some(raw) => canonicalize_email(raw).map_err(HttpError::bad_request)?,
        None => None,
    };

    let created = state
        .users
        .create(UserRecord::new(&address).with_email(email))
        .await?;
    let document = created.populate(&state.faucet, Utc::now());
    Ok((StatusCode::CREATED, Json(document.to_external())))
}

/// Sign-in entry point: the first visit of a wallet creates its record.
async fn open_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<ExternalUser>, HttpError> {
    let address = parse_wallet_address(&request.address).map_err(HttpError::bad_request)?;
    let record = state.users.find_or_create(&address).await?;
    Ok(Json(record.populate(&state.faucet, Utc::now()).to_external()))
}

async fn get_user(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ExternalUser>, HttpError> {
    let record = state
        .users
        .find_one(UserQuery::by_address(&address))
        .await?
        .ok_or_else(|| HttpError::not_found(&address))?;
    Ok(Json(record.populate(&state.faucet, Utc::now()).to_external()))
}

async fn update_user(
    Path(address): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<ExternalUser>, HttpError> {
    let email = match request.email {
        Some(Some(raw)) => Some(canonicalize_email(&raw).map_err(HttpError::bad_request)?),
        Some(None) => Some(None),
        None => None,
    };
    let update = UserUpdate {
        email,
        is_gallery_enabled: request.is_gallery_enabled,
        ..UserUpdate::default()
    };
    if update.is_empty() {
        return Err(HttpError::bad_request("No changes requested"));
    }

    let record = state
        .users
        .find_one_and_update(UserQuery::by_address(&address), &update)
        .await?
        .ok_or_else(|| HttpError::not_found(&address))?;
    Ok(Json(record.populate(&state.faucet, Utc::now()).to_external()))
}

async fn search_users(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<ExternalUser>>, HttpError> {
    let limit = request.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let records = state.users.find_many(request.filter, Some(limit)).await?;
    let now = Utc::now();
    let views = records
        .into_iter()
        .map(|record| record.populate(&state.faucet, now).to_external())
        .collect();
    Ok(Json(views))
}

async fn count_users(
    State(state): State<AppState>,
    Json(request): Json<CountRequest>,
) -> Result<Json<CountResponse>, HttpError> {
    let count = state.users.count(request.filter).await?;
    Ok(Json(CountResponse { count }))
}

/// Operator endpoint: applies one update to every user matching `filter`.
async fn bulk_update_users(
    State(state): State<AppState>,
    Json(request): Json<BulkUpdateRequest>,
) -> Result<Json<BulkUpdateResponse>, HttpError> {
    let mut update = request.update;
    if update.is_empty() {
        return Err(HttpError::bad_request("No changes requested"));
    }
    if let Some(Some(raw)) = &update.email {
        update.email = Some(canonicalize_email(raw).map_err(HttpError::bad_request)?);
    }
    if let Some(raw) = &update.push_giveaway {
        update.push_giveaway = Some(parse_giveaway_id(raw).map_err(HttpError::bad_request)?);
    }

    let matched = state.users.update_many(request.filter, &update).await?;
    info!("Bulk update matched {matched} users");
    Ok(Json(BulkUpdateResponse { matched }))
}

async fn remove_user(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ExternalUser>, HttpError> {
    let removed = state
        .users
        .find_one_and_remove(UserQuery::by_address(&address))
        .await?
        .ok_or_else(|| HttpError::not_found(&address))?;
    Ok(Json(removed.populate(&state.faucet, Utc::now()).to_external()))
}

async fn join_giveaway(
    Path(address): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<JoinGiveawayRequest>,
) -> Result<Json<ExternalUser>, HttpError> {
    let giveaway_id = parse_giveaway_id(&request.giveaway_id).map_err(HttpError::bad_request)?;
    let record = state
        .users
        .find_one_and_update(
            UserQuery::by_address(&address),
            &UserUpdate::push_giveaway(giveaway_id.clone()),
        )
        .await?
        .ok_or_else(|| HttpError::not_found(&address))?;

    let document = record.populate(&state.faucet, Utc::now());
    let internal = document.to_internal_view();
    info!(
        "User {} joined giveaway {} ({} participations)",
        internal.id,
        giveaway_id,
        internal.giveaways_participated_in.len()
    );
    Ok(Json(document.to_external()))
}
