use time::{Duration, OffsetDateTime};

use crate::error::ApiError;
use crate::store::{Entity, Table};

/// Consecutive failed logins that trip the account lock.
pub const MAX_FAILED_LOGINS: u32 = 5;
/// How long a tripped account stays locked.
pub const LOCK_DURATION: Duration = Duration::minutes(15);

/// User record as persisted in `users.json`. Field names follow the on-disk
/// camelCase format; the `password` field holds the argon2 hash.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(rename = "password")]
    pub password_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
    pub failed_login_attempts: u32,
    pub account_locked: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub lock_until: Option<OffsetDateTime>,
}

impl Entity for User {
    const ROOT_KEY: &'static str = "users";
    fn id(&self) -> &str {
        &self.id
    }
}

impl User {
    pub fn new(username: String, email: String, password_hash: String) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: now.unix_timestamp_nanos().to_string(),
            username,
            email,
            password_hash,
            created_at: now,
            last_login: None,
            failed_login_attempts: 0,
            account_locked: false,
            lock_until: None,
        }
    }

    /// Email uniqueness is enforced by linear scan, same as the stored format implies.
    pub async fn find_by_email(
        users: &dyn Table<User>,
        email: &str,
    ) -> Result<Option<User>, ApiError> {
        Ok(users.list().await?.into_iter().find(|u| u.email == email))
    }

    pub fn is_locked(&self, now: OffsetDateTime) -> bool {
        self.account_locked && self.lock_until.map(|until| now < until).unwrap_or(false)
    }

    /// Bumps the failure counter and trips the lock on the threshold. Atomic
    /// with the write, so parallel failures cannot lose increments.
    pub async fn record_login_failure(
        users: &dyn Table<User>,
        id: &str,
        now: OffsetDateTime,
    ) -> Result<User, ApiError> {
        users
            .cas_update(
                id,
                Box::new(move |u| {
                    u.failed_login_attempts += 1;
                    if u.failed_login_attempts >= MAX_FAILED_LOGINS {
                        u.account_locked = true;
                        u.lock_until = Some(now + LOCK_DURATION);
                    }
                    Ok(())
                }),
            )
            .await
    }

    /// Resets lockout state and stamps the login time.
    pub async fn record_login_success(
        users: &dyn Table<User>,
        id: &str,
        now: OffsetDateTime,
    ) -> Result<User, ApiError> {
        users
            .cas_update(
                id,
                Box::new(move |u| {
                    u.failed_login_attempts = 0;
                    u.account_locked = false;
                    u.lock_until = None;
                    u.last_login = Some(now);
                    Ok(())
                }),
            )
            .await
    }
}
