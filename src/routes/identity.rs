use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::auth::AuthContext;
use crate::error::AppError;
use crate::models::user::{AddTokensRequest, CreateKeyRequest};
use crate::state::AppState;

pub async fn create_key(
    State(state): State<AppState>,
    payload: Result<Json<CreateKeyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(req) = payload?;
    let email = req
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::BadRequest("Email is required".into()))?;

    let stored = state.identity.create_user(&email).await;
    let storage = stored.storage();
    let user = stored.into_inner();

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "data": {
                "apiKey": user.api_key,
                "email": user.email,
                "createdAt": user.created_at,
                "storage": storage,
            },
            "error": null
        })),
    ))
}

pub async fn add_tokens(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    payload: Result<Json<AddTokensRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let user = auth.user()?;
    let Json(req) = payload?;

    let (access_token, refresh_token) = match (req.access_token, req.refresh_token) {
        (Some(a), Some(r)) if !a.is_empty() && !r.is_empty() => (a, r),
        _ => {
            return Err(AppError::BadRequest(
                "Both accessToken and refreshToken are required".into(),
            ))
        }
    };

    let stored = state
        .identity
        .add_provider_tokens(&user.api_key, &access_token, &refresh_token)
        .await
        .ok_or_else(|| AppError::Forbidden("Invalid API key".into()))?;
    let storage = stored.storage();
    let user = stored.into_inner();

    Ok(Json(json!({
        "data": {
            "message": "Provider tokens added",
            "user": { "id": user.id, "email": user.email },
            "storage": storage,
        },
        "error": null
    })))
}
