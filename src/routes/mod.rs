pub mod access;
pub mod health;
pub mod identity;

use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthLayer;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let identity = state.identity.clone();
    let identity_timeout = state.config.identity_timeout();

    // Public routes (no auth)
    let public_routes = Router::new()
        .route("/health", get(health::health))
        .route("/status", get(health::status))
        .route("/identity/keys", post(identity::create_key));

    // A key is optional here: public mode is anonymous, private mode checks
    // for a user in the handler.
    let access_routes = Router::new()
        .route("/access/{mode}/listing/{folder_id}", get(access::listing))
        .route("/access/{mode}/detail/{file_id}", get(access::detail))
        .route("/access/{mode}/path/{folder_id}", get(access::path))
        .route("/access/{mode}/content/{file_id}", get(access::content))
        .layer(AuthLayer::optional(identity.clone(), identity_timeout));

    let identity_routes = Router::new()
        .route("/identity/tokens", post(identity::add_tokens))
        .layer(AuthLayer::required(identity, identity_timeout));

    // CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID
    let x_request_id = http::HeaderName::from_static("x-request-id");

    Router::new()
        .merge(public_routes)
        .merge(access_routes)
        .merge(identity_routes)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
