pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rate_limit;
pub mod state;

pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::infra::http::RouterState;

/// Token-authenticated routes: the posts API and direct-upload registration.
pub fn build_api_router(state: RouterState) -> Router<RouterState> {
    let auth_state = state.api.clone();
    let rate_state = state.api.clone();

    let authenticated = Router::new()
        .route(
            "/api/posts",
            get(handlers::list_posts).post(handlers::create_post),
        )
        .route(
            "/api/posts/{slug}",
            get(handlers::get_post)
                .patch(handlers::update_post)
                .put(handlers::update_post)
                .delete(handlers::delete_post),
        )
        .route("/api/posts/{slug}/markdown", get(handlers::post_markdown))
        .route(
            "/rails/active_storage/direct_uploads",
            post(handlers::create_direct_upload),
        )
        .route(
            "/uploads/direct_uploads",
            post(handlers::create_direct_upload),
        )
        .layer(axum_middleware::from_fn_with_state(
            rate_state,
            middleware::api_rate_limit,
        ))
        .layer(axum_middleware::from_fn_with_state(
            auth_state,
            middleware::api_auth,
        ));

    let open = Router::new().route(
        "/api/domain-validation",
        get(handlers::validate_domain),
    );

    authenticated.merge(open)
}
