use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::swaps::repo::{SwapRequest, SwapStatus};

/// Request body for `POST /api/swaps/request`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSwapRequest {
    pub to_user_id: String,
    pub skill_offered: String,
    pub skill_wanted: String,
    pub message: String,
}

/// Envelope returned by the mutating swap endpoints.
#[derive(Debug, Serialize)]
pub struct SwapResponse {
    pub message: String,
    pub request: SwapRequest,
}

/// Denormalized snapshot of the requester attached to incoming requests.
#[derive(Debug, Serialize)]
pub struct RequesterSnapshot {
    pub name: String,
    pub email: String,
    pub rating: f64,
}

/// One entry of `GET /api/swaps/incoming/:userId`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingSwap {
    pub id: String,
    pub from_user: RequesterSnapshot,
    pub skill_offered: String,
    pub skill_wanted: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub status: SwapStatus,
}
