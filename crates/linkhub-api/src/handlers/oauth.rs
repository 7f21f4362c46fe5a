//! OAuth initiation and callback handlers.

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;

use linkhub_core::BrokerError;

use crate::auth::AuthContext;
use crate::envelope::ApiResponse;
use crate::error::{ApiError, ApiResult};
use crate::services::oauth::{append_redirect_params, ConnectRequest, InitiateData};
use crate::state::AppState;

/// Query string of the provider redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: String,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Build an HTTP 302 to the given location.
fn found(location: &str) -> Result<Response, ApiError> {
    let location = HeaderValue::from_str(location)
        .map_err(|_| ApiError(BrokerError::validation("redirect target is not a valid URL")))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// `POST /oauth/connect`: initiate an authorization.
pub async fn connect(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<ApiResponse<InitiateData>> {
    let data = state.oauth.initiate(auth.project_id, &request).await?;
    Ok(ApiResponse::ok(data))
}

/// `GET /oauth/callback`: the provider redirect target.
///
/// Authenticated by the state token alone; issues a 302 back to the caller's
/// original redirect with the outcome appended.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    // A provider-reported error (e.g. the user denied consent) still consumes
    // the state and returns the user to the caller.
    if let Some(provider_error) = &query.error {
        tracing::warn!(
            target: "oauth_flow",
            error = %provider_error,
            description = query.error_description.as_deref().unwrap_or(""),
            "Provider returned an authorization error"
        );

        let consumed = linkhub_db::models::OAuthState::consume(&state.pool, &query.state)
            .await
            .map_err(|e| ApiError(BrokerError::internal(e.to_string())))?
            .ok_or(ApiError(BrokerError::InvalidState))?;

        let target = append_redirect_params(
            &consumed.redirect_uri,
            &[("status", "error"), ("error_code", "PROVIDER_ERROR")],
        );
        return found(&target);
    }

    let code = query
        .code
        .as_deref()
        .ok_or(ApiError(BrokerError::validation("missing authorization code")))?;

    let target = state.oauth.callback(code, &query.state).await?;
    found(&target)
}
