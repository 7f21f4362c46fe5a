//! Uniform-verb dispatch handlers.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;

use linkhub_core::BrokerError;
use linkhub_providers::Verb;

use crate::auth::AuthContext;
use crate::envelope::ApiResponse;
use crate::error::{ApiError, ApiResult};
use crate::handlers::connections::parse_connection_id;
use crate::state::AppState;

/// Body of `POST /execute`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub connection_id: String,
    pub provider: String,
    pub action: String,
    #[serde(default)]
    pub params: Value,
}

/// `POST /{provider}/{verb}`: adapter dispatch.
///
/// The body carries `connectionId` plus verb parameters; everything except
/// `connectionId` is passed to the adapter untouched.
pub async fn provider_verb(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((provider, verb)): Path<(String, String)>,
    Json(mut body): Json<Value>,
) -> ApiResult<ApiResponse<Value>> {
    let verb: Verb = verb
        .parse()
        .map_err(|_| ApiError(BrokerError::validation("unknown verb")))?;

    let connection_id = body
        .get("connectionId")
        .and_then(Value::as_str)
        .map(parse_connection_id)
        .transpose()?
        .ok_or(ApiError(BrokerError::validation("connectionId is required")))?;

    if let Some(obj) = body.as_object_mut() {
        obj.remove("connectionId");
    }

    let endpoint = format!("/v1/{provider}/{verb}");
    let data = state
        .dispatch
        .dispatch(
            auth.project_id,
            connection_id,
            verb,
            Some(&provider),
            body,
            &endpoint,
        )
        .await?;

    Ok(ApiResponse::ok(data))
}

/// `POST /execute`: generic dispatch with the provider and action in the body.
pub async fn execute(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<ApiResponse<Value>> {
    let verb: Verb = request
        .action
        .parse()
        .map_err(|_| ApiError(BrokerError::validation("unknown action")))?;
    let connection_id = parse_connection_id(&request.connection_id)?;

    let data = state
        .dispatch
        .dispatch(
            auth.project_id,
            connection_id,
            verb,
            Some(&request.provider),
            request.params,
            "/v1/execute",
        )
        .await?;

    Ok(ApiResponse::ok(data))
}
