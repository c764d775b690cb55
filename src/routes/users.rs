use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Role, User},
    routes::tickets::to_iso,
    state::AppState,
};

#[derive(Deserialize)]
pub struct ChangeRoleRequest {
    pub role: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub created_at: String,
    pub updated_at: String,
}

pub async fn change_role(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    requester: AuthenticatedUser,
    Json(payload): Json<ChangeRoleRequest>,
) -> AppResult<Json<UserResponse>> {
    let new_role = Role::parse(&payload.role)
        .ok_or_else(|| AppError::validation(format!("unknown role: {}", payload.role)))?;

    let user = state
        .tickets
        .change_user_role(&requester, user_id, new_role)
        .await?;
    Ok(Json(to_user_response(user)))
}

fn to_user_response(user: User) -> UserResponse {
    UserResponse {
        id: user.id,
        username: user.username,
        role: user.role,
        created_at: to_iso(user.created_at),
        updated_at: to_iso(user.updated_at),
    }
}
