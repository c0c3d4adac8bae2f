use std::fmt;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ApiError;
use crate::store::{Entity, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
}

impl SwapStatus {
    /// Legal transitions: pending -> accepted | rejected, accepted -> completed.
    pub fn can_transition_to(self, next: SwapStatus) -> bool {
        matches!(
            (self, next),
            (SwapStatus::Pending, SwapStatus::Accepted)
                | (SwapStatus::Pending, SwapStatus::Rejected)
                | (SwapStatus::Accepted, SwapStatus::Completed)
        )
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwapStatus::Pending => "pending",
            SwapStatus::Accepted => "accepted",
            SwapStatus::Rejected => "rejected",
            SwapStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Swap request record as persisted in `swap-requests.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub skill_offered: String,
    pub skill_wanted: String,
    pub message: String,
    pub status: SwapStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Entity for SwapRequest {
    const ROOT_KEY: &'static str = "requests";
    fn id(&self) -> &str {
        &self.id
    }
}

impl SwapRequest {
    pub fn new(
        from_user_id: String,
        to_user_id: String,
        skill_offered: String,
        skill_wanted: String,
        message: String,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: new_request_id(now),
            from_user_id,
            to_user_id,
            skill_offered,
            skill_wanted,
            message,
            status: SwapStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// At most one pending request may exist per (from, to) pair.
    pub async fn find_pending_between(
        swaps: &dyn Table<SwapRequest>,
        from_user_id: &str,
        to_user_id: &str,
    ) -> Result<Option<SwapRequest>, ApiError> {
        Ok(swaps.list().await?.into_iter().find(|r| {
            r.from_user_id == from_user_id
                && r.to_user_id == to_user_id
                && r.status == SwapStatus::Pending
        }))
    }

    pub async fn list_incoming(
        swaps: &dyn Table<SwapRequest>,
        to_user_id: &str,
    ) -> Result<Vec<SwapRequest>, ApiError> {
        Ok(swaps
            .list()
            .await?
            .into_iter()
            .filter(|r| r.to_user_id == to_user_id && r.status == SwapStatus::Pending)
            .collect())
    }

    /// Recipient-only transition out of `pending`; atomic with the write.
    pub async fn respond(
        swaps: &dyn Table<SwapRequest>,
        request_id: &str,
        caller_id: &str,
        next: SwapStatus,
        forbidden_message: &'static str,
    ) -> Result<SwapRequest, ApiError> {
        let caller_id = caller_id.to_string();
        swaps
            .cas_update(
                request_id,
                Box::new(move |r| {
                    if r.to_user_id != caller_id {
                        return Err(ApiError::Forbidden(
                            "Access denied",
                            forbidden_message.into(),
                        ));
                    }
                    if !r.status.can_transition_to(next) {
                        return Err(ApiError::InvalidState(
                            "Invalid request",
                            "Request is not pending".into(),
                        ));
                    }
                    r.status = next;
                    r.updated_at = OffsetDateTime::now_utc();
                    Ok(())
                }),
            )
            .await
            .map_err(not_found_as_request)
    }

    /// Either participant may close out an accepted swap.
    pub async fn complete(
        swaps: &dyn Table<SwapRequest>,
        request_id: &str,
        caller_id: &str,
    ) -> Result<SwapRequest, ApiError> {
        let caller_id = caller_id.to_string();
        swaps
            .cas_update(
                request_id,
                Box::new(move |r| {
                    if r.from_user_id != caller_id && r.to_user_id != caller_id {
                        return Err(ApiError::Forbidden(
                            "Access denied",
                            "You can only complete your own swaps".into(),
                        ));
                    }
                    if !r.status.can_transition_to(SwapStatus::Completed) {
                        return Err(ApiError::InvalidState(
                            "Invalid request",
                            "Request is not accepted".into(),
                        ));
                    }
                    r.status = SwapStatus::Completed;
                    r.updated_at = OffsetDateTime::now_utc();
                    Ok(())
                }),
            )
            .await
            .map_err(not_found_as_request)
    }

    /// Sender-only removal of a still-pending request.
    pub async fn delete_pending(
        swaps: &dyn Table<SwapRequest>,
        request_id: &str,
        caller_id: &str,
    ) -> Result<SwapRequest, ApiError> {
        let caller_id = caller_id.to_string();
        swaps
            .remove(
                request_id,
                Box::new(move |r| {
                    if r.from_user_id != caller_id {
                        return Err(ApiError::Forbidden(
                            "Access denied",
                            "You can only delete requests you sent".into(),
                        ));
                    }
                    if r.status != SwapStatus::Pending {
                        return Err(ApiError::InvalidState(
                            "Invalid request",
                            "Request is not pending".into(),
                        ));
                    }
                    Ok(())
                }),
            )
            .await
            .map_err(not_found_as_request)
    }
}

fn not_found_as_request(err: ApiError) -> ApiError {
    match err {
        ApiError::NotFound(..) => {
            ApiError::NotFound("Request not found", "Swap request not found".into())
        }
        other => other,
    }
}

/// `req_<unix-ms>_<9 random alphanumerics>`, matching the stored id format.
fn new_request_id(now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("req_{}_{}", millis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use SwapStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Accepted.can_transition_to(Completed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Accepted.can_transition_to(Pending));
        assert!(!Accepted.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Accepted));
        assert!(!Completed.can_transition_to(Pending));
    }

    #[test]
    fn request_id_format() {
        let id = new_request_id(OffsetDateTime::now_utc());
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts[0], "req");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn persisted_form_uses_camel_case() {
        let r = SwapRequest::new(
            "1".into(),
            "2".into(),
            "Guitar".into(),
            "Spanish".into(),
            "hi".into(),
        );
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json.get("status").unwrap(), "pending");
        assert!(json.get("fromUserId").is_some());
        assert!(json.get("skillOffered").is_some());
        assert!(json.get("updatedAt").is_some());
    }
}
