//! Router composition for the project-facing API.

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::auth::signed_request_middleware;
use crate::handlers;
use crate::rate_limit::rate_limit_middleware;
use crate::state::AppState;

/// Build the `/v1` API router.
///
/// All routes except the OAuth callback require signed-request
/// authentication and pass the per-project rate limiter. The dispatch route
/// `/:provider/:verb` sits behind the static routes, so provider names can
/// never shadow `oauth`, `connections`, `webhooks`, or `execute`.
pub fn api_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/oauth/connect", post(handlers::oauth::connect))
        .route("/connections", get(handlers::connections::list))
        .route(
            "/connections/:id",
            get(handlers::connections::get).delete(handlers::connections::revoke),
        )
        .route(
            "/webhooks",
            post(handlers::webhooks::create).get(handlers::webhooks::list),
        )
        .route("/webhooks/:id", delete(handlers::webhooks::delete))
        .route("/execute", post(handlers::dispatch::execute))
        .route("/:provider/:verb", post(handlers::dispatch::provider_verb))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            signed_request_middleware,
        ));

    let public = Router::new().route("/oauth/callback", get(handlers::oauth::callback));

    Router::new().merge(protected).merge(public).with_state(state)
}
