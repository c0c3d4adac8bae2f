use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, ProfileResponse, PublicUser, RegisterRequest},
        repo::User,
        services::{
            hash_password, is_strong_password, is_valid_email, verify_password, AuthUser, JwtKeys,
        },
    },
    error::{internal, ApiError},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/profile", get(get_profile))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    payload.username = payload.username.trim().to_string();
    payload.email = payload.email.trim().to_lowercase();

    if payload.username.is_empty() || payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation(
            "Missing required fields",
            "Username, email, and password are required".into(),
        ));
    }

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation(
            "Invalid email format",
            "Please provide a valid email address".into(),
        ));
    }

    if !is_strong_password(&payload.password) {
        warn!("weak password rejected");
        return Err(ApiError::Validation(
            "Weak password",
            "Password must be at least 8 characters long and contain uppercase, lowercase, number, and special character".into(),
        ));
    }

    if User::find_by_email(state.users.as_ref(), &payload.email)
        .await?
        .is_some()
    {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::Conflict(
            "User already exists",
            "A user with this email already exists".into(),
        ));
    }

    let hash = hash_password(&payload.password).map_err(internal)?;
    let user = User::new(payload.username, payload.email, hash);
    state.users.upsert(user.clone()).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(&user.id).map_err(internal)?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully".into(),
            token,
            user: PublicUser {
                id: user.id,
                username: user.username,
                email: user.email,
            },
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation(
            "Missing credentials",
            "Email and password are required".into(),
        ));
    }

    let user = match User::find_by_email(state.users.as_ref(), &payload.email).await? {
        Some(u) => u,
        None => {
            warn!(email = %payload.email, "login unknown email");
            return Err(ApiError::InvalidCredentials);
        }
    };

    let now = OffsetDateTime::now_utc();
    if user.is_locked(now) {
        warn!(email = %user.email, "login attempt on locked account");
        return Err(ApiError::AccountLocked {
            // is_locked guarantees the field is set
            lock_until: user.lock_until.unwrap_or(now),
        });
    }

    let ok = verify_password(&payload.password, &user.password_hash).map_err(internal)?;
    if !ok {
        let updated = User::record_login_failure(state.users.as_ref(), &user.id, now).await?;
        warn!(
            email = %user.email,
            attempts = updated.failed_login_attempts,
            locked = updated.account_locked,
            "login invalid password"
        );
        return Err(ApiError::InvalidCredentials);
    }

    let user = User::record_login_success(state.users.as_ref(), &user.id, now).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(&user.id).map_err(internal)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(AuthResponse {
        message: "Login successful".into(),
        token,
        user: PublicUser {
            id: user.id,
            username: user.username,
            email: user.email,
        },
    }))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = state
        .users
        .get(&user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found", "User profile not found".into()))?;

    Ok(Json(ProfileResponse {
        id: user.id,
        username: user.username,
        email: user.email,
        created_at: user.created_at,
        last_login: user.last_login,
    }))
}
