use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::AuthUser,
    error::ApiError,
    state::AppState,
    swaps::{
        dto::{CreateSwapRequest, IncomingSwap, RequesterSnapshot, SwapResponse},
        repo::{SwapRequest, SwapStatus},
    },
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/request", post(create))
        .route("/incoming/:user_id", get(incoming))
        .route("/accept/:request_id", put(accept))
        .route("/decline/:request_id", put(decline))
        .route("/complete/:request_id", put(complete))
        .route("/:request_id", delete(remove))
}

#[instrument(skip(state, payload))]
pub async fn create(
    State(state): State<AppState>,
    AuthUser(from_user_id): AuthUser,
    Json(payload): Json<CreateSwapRequest>,
) -> Result<(StatusCode, Json<SwapResponse>), ApiError> {
    if payload.to_user_id.trim().is_empty()
        || payload.skill_offered.trim().is_empty()
        || payload.skill_wanted.trim().is_empty()
        || payload.message.trim().is_empty()
    {
        return Err(ApiError::Validation(
            "Missing required fields",
            "All fields are required".into(),
        ));
    }

    let from_user = state.users.get(&from_user_id).await?;
    let to_user = state.users.get(&payload.to_user_id).await?;
    if from_user.is_none() || to_user.is_none() {
        warn!(%from_user_id, to_user_id = %payload.to_user_id, "swap between unknown users");
        return Err(ApiError::NotFound(
            "User not found",
            "One or both users not found".into(),
        ));
    }

    if from_user_id == payload.to_user_id {
        return Err(ApiError::Validation(
            "Invalid request",
            "Cannot request swap with yourself".into(),
        ));
    }

    if SwapRequest::find_pending_between(state.swaps.as_ref(), &from_user_id, &payload.to_user_id)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(
            "Duplicate request",
            "You already have a pending request with this user".into(),
        ));
    }

    let request = SwapRequest::new(
        from_user_id.clone(),
        payload.to_user_id,
        payload.skill_offered,
        payload.skill_wanted,
        payload.message,
    );
    state.swaps.upsert(request.clone()).await?;

    info!(request_id = %request.id, from = %request.from_user_id, to = %request.to_user_id, "swap request created");
    Ok((
        StatusCode::CREATED,
        Json(SwapResponse {
            message: "Swap request sent successfully".into(),
            request,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn incoming(
    State(state): State<AppState>,
    AuthUser(caller_id): AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<IncomingSwap>>, ApiError> {
    if caller_id != user_id {
        return Err(ApiError::Forbidden(
            "Access denied",
            "You can only view your own requests".into(),
        ));
    }

    let requests = SwapRequest::list_incoming(state.swaps.as_ref(), &user_id).await?;
    let users = state.users.list().await?;

    let items = requests
        .into_iter()
        .map(|r| {
            let requester = users.iter().find(|u| u.id == r.from_user_id);
            IncomingSwap {
                id: r.id,
                from_user: RequesterSnapshot {
                    name: requester
                        .map(|u| u.username.clone())
                        .unwrap_or_else(|| "Unknown User".into()),
                    email: requester.map(|u| u.email.clone()).unwrap_or_default(),
                    rating: 0.0,
                },
                skill_offered: r.skill_offered,
                skill_wanted: r.skill_wanted,
                message: r.message,
                date: r.created_at,
                status: r.status,
            }
        })
        .collect();

    Ok(Json(items))
}

#[instrument(skip(state))]
pub async fn accept(
    State(state): State<AppState>,
    AuthUser(caller_id): AuthUser,
    Path(request_id): Path<String>,
) -> Result<Json<SwapResponse>, ApiError> {
    let request = SwapRequest::respond(
        state.swaps.as_ref(),
        &request_id,
        &caller_id,
        SwapStatus::Accepted,
        "You can only accept requests sent to you",
    )
    .await?;

    info!(%request_id, "swap request accepted");
    Ok(Json(SwapResponse {
        message: "Swap request accepted successfully".into(),
        request,
    }))
}

#[instrument(skip(state))]
pub async fn decline(
    State(state): State<AppState>,
    AuthUser(caller_id): AuthUser,
    Path(request_id): Path<String>,
) -> Result<Json<SwapResponse>, ApiError> {
    let request = SwapRequest::respond(
        state.swaps.as_ref(),
        &request_id,
        &caller_id,
        SwapStatus::Rejected,
        "You can only decline requests sent to you",
    )
    .await?;

    info!(%request_id, "swap request declined");
    Ok(Json(SwapResponse {
        message: "Swap request declined".into(),
        request,
    }))
}

#[instrument(skip(state))]
pub async fn complete(
    State(state): State<AppState>,
    AuthUser(caller_id): AuthUser,
    Path(request_id): Path<String>,
) -> Result<Json<SwapResponse>, ApiError> {
    let request = SwapRequest::complete(state.swaps.as_ref(), &request_id, &caller_id).await?;

    info!(%request_id, "swap request completed");
    Ok(Json(SwapResponse {
        message: "Swap request completed".into(),
        request,
    }))
}

#[instrument(skip(state))]
pub async fn remove(
    State(state): State<AppState>,
    AuthUser(caller_id): AuthUser,
    Path(request_id): Path<String>,
) -> Result<Json<SwapResponse>, ApiError> {
    let request =
        SwapRequest::delete_pending(state.swaps.as_ref(), &request_id, &caller_id).await?;

    info!(%request_id, "swap request deleted");
    Ok(Json(SwapResponse {
        message: "Swap request deleted".into(),
        request,
    }))
}
