//! Connection management handlers.

use axum::{
    extract::{Path, Query, State},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use linkhub_core::{BrokerError, ConnectionId};
use linkhub_db::models::{Connection, ConnectionFilter, ConnectionStatus, EndUser};
use linkhub_webhooks::{EventType, LifecycleEvent};

use crate::auth::AuthContext;
use crate::envelope::ApiResponse;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Public projection of a connection row. Token material never appears.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionView {
    pub id: String,
    pub provider: String,
    pub end_user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_email: Option<String>,
    pub status: String,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Connection> for ConnectionView {
    fn from(row: &Connection) -> Self {
        Self {
            id: ConnectionId::from_uuid(row.id).to_string(),
            provider: row.provider.clone(),
            end_user_id: row.end_user_id,
            provider_email: row.provider_email.clone(),
            status: row.status.clone(),
            scopes: row.scopes.clone(),
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Filters for `GET /connections`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Project-scoped external user id.
    pub user_id: Option<String>,
    pub provider: Option<String>,
    pub status: Option<String>,
}

/// `GET /connections`: list a project's connections.
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ApiResponse<Vec<ConnectionView>>> {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(
            raw.parse::<ConnectionStatus>()
                .map_err(BrokerError::validation)?,
        ),
    };

    let end_user_id = match query.user_id.as_deref() {
        None => None,
        Some(external_id) => {
            match EndUser::find_by_external_id(&state.pool, auth.project_id, external_id)
                .await
                .map_err(ApiError::from)?
            {
                Some(user) => Some(user.id),
                // An unknown user simply has no connections.
                None => return Ok(ApiResponse::ok(vec![])),
            }
        }
    };

    let filter = ConnectionFilter {
        end_user_id,
        provider: query.provider,
        status,
    };

    let rows = Connection::list_for_project(&state.pool, auth.project_id, &filter)
        .await
        .map_err(ApiError::from)?;

    Ok(ApiResponse::ok(rows.iter().map(ConnectionView::from).collect()))
}

/// `GET /connections/:id`: a single connection.
pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<ConnectionView>> {
    let connection_id = parse_connection_id(&id)?;

    let row = Connection::find_for_project(&state.pool, auth.project_id, connection_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(BrokerError::ConnectionNotFound)?;

    Ok(ApiResponse::ok(ConnectionView::from(&row)))
}

/// `DELETE /connections/:id`: revoke tokens and mark the row revoked.
pub async fn revoke(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let connection_id = parse_connection_id(&id)?;

    // Snapshot before the revoke so the event payload has the provider name.
    let row = Connection::find_for_project(&state.pool, auth.project_id, connection_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(BrokerError::ConnectionNotFound)?;

    let revoked = Connection::revoke(&state.pool, auth.project_id, connection_id)
        .await
        .map_err(ApiError::from)?;
    if !revoked {
        return Err(ApiError(BrokerError::ConnectionNotFound));
    }

    let external_id = EndUser::find_by_id(&state.pool, auth.project_id, row.end_user_id)
        .await
        .ok()
        .flatten()
        .map(|u| u.external_id);

    state.events.publish(LifecycleEvent::new(
        EventType::ConnectionRevoked,
        auth.project_id,
        serde_json::json!({
            "connectionId": ConnectionId::from_uuid(connection_id).to_string(),
            "provider": row.provider,
            "userId": external_id,
            "scopes": row.scopes,
        }),
    ));

    tracing::info!(
        target: "connections",
        project_id = %auth.project_id,
        connection_id = %ConnectionId::from_uuid(connection_id),
        "Connection revoked by project"
    );

    Ok(ApiResponse::ok(serde_json::json!({
        "id": ConnectionId::from_uuid(connection_id).to_string(),
        "status": "revoked",
    })))
}

/// Parse a wire-form connection id (`conn_<uuid>`).
pub fn parse_connection_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse::<ConnectionId>()
        .map(|id| *id.as_uuid())
        .map_err(|_| ApiError(BrokerError::validation("invalid connection id")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection_id_wire_form() {
        let id = ConnectionId::new();
        assert_eq!(parse_connection_id(&id.to_string()).unwrap(), *id.as_uuid());
    }

    #[test]
    fn test_parse_connection_id_rejects_bare_uuid() {
        assert!(parse_connection_id(&Uuid::new_v4().to_string()).is_err());
    }

    #[test]
    fn test_view_hides_token_material() {
        let row = Connection {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            provider: "gmail".to_string(),
            end_user_id: Uuid::new_v4(),
            provider_user_id: Some("123".to_string()),
            provider_email: Some("user@example.com".to_string()),
            access_token_encrypted: Some("sealed-access".to_string()),
            refresh_token_encrypted: Some("sealed-refresh".to_string()),
            token_type: "Bearer".to_string(),
            expires_at: None,
            scopes: vec!["email.read".to_string()],
            status: "active".to_string(),
            error_message: None,
            last_used_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&ConnectionView::from(&row)).unwrap();
        assert!(json.contains("\"id\":\"conn_"));
        assert!(!json.contains("sealed-access"));
        assert!(!json.contains("sealed-refresh"));
    }
}
