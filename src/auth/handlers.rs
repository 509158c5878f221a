use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RefreshRequest},
        extractors::AuthUser,
        jwt::JwtKeys,
        password::verify_password,
    },
    error::AppError,
    state::AppState,
    users::{dto::UserResponse, repo::User, services::load_public},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn issue_pair(state: &AppState, user: &User) -> Result<(String, String), AppError> {
    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(user.id, user.is_staff)?;
    let refresh_token = keys.sign_refresh(user.id, user.is_staff)?;
    Ok((access_token, refresh_token))
}

fn invalid_credentials() -> AppError {
    AppError::Unauthorized("Invalid credentials".into())
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let username = payload.username.trim();

    let Some(user) = User::find_by_username(&state.db, username).await? else {
        warn!(%username, "login unknown username");
        return Err(invalid_credentials());
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(invalid_credentials());
    }

    let (access_token, refresh_token) = issue_pair(&state, &user)?;
    let orders = User::order_ids(&state.db, user.id).await?;

    info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: UserResponse::new(user, orders),
    }))
}

/// Rotates the token pair. The role is re-read from the database so that
/// an elevation is picked up here.
#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".into()))?;

    let (access_token, refresh_token) = issue_pair(&state, &user)?;
    let orders = User::order_ids(&state.db, user.id).await?;
    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: UserResponse::new(user, orders),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<UserResponse>, AppError> {
    load_public(&state.db, caller.id).await.map(Json).map_err(|e| match e {
        AppError::NotFound(_) => AppError::Unauthorized("User not found".into()),
        other => other,
    })
}
