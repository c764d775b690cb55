use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewUser, Role},
    repo::RepoError,
    state::AppState,
};

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    if payload.username.trim().is_empty() {
        return Err(AppError::validation("username must not be empty"));
    }
    if payload.password.is_empty() {
        return Err(AppError::validation("password must not be empty"));
    }

    if state
        .users
        .user_by_username(&payload.username)
        .await?
        .is_some()
    {
        return Err(AppError::conflict("username already taken"));
    }

    let password_hash = password::hash_password(&payload.password).map_err(AppError::internal)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: payload.username,
        password_hash,
        role: Role::Customer,
    };

    let user = match state.users.insert_user(new_user).await {
        Ok(user) => user,
        Err(RepoError::Database(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        ))) => return Err(AppError::conflict("username already taken")),
        Err(err) => return Err(err.into()),
    };

    info!(user_id = %user.id, "user registered");

    let token = token_response(&state, user.id, &user.username, user.role)?;
    Ok((StatusCode::CREATED, Json(token)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> AppResult<Json<TokenResponse>> {
    let user = state
        .users
        .user_by_username(&payload.username)
        .await?
        .ok_or_else(AppError::unauthorized)?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }

    let token = token_response(&state, user.id, &user.username, user.role)?;
    Ok(Json(token))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

fn token_response(
    state: &AppState,
    user_id: Uuid,
    username: &str,
    role: Role,
) -> AppResult<TokenResponse> {
    let access_token = state
        .jwt
        .generate_token(user_id, username, role)
        .map_err(AppError::from)?;

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.jwt_expiry_minutes * 60,
    })
}
