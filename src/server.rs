//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let avatar_limit = state.config.uploads.max_avatar_bytes;

    let auth_routes = Router::new()
        .route("/register", post(handlers::auth_register))
        .route("/login", post(handlers::auth_login))
        .route("/logout", post(handlers::auth_logout))
        .route("/me", get(handlers::auth_me))
        .route("/verify-email/{token}", get(handlers::auth_verify_email));

    let favorite_routes = Router::new()
        .route(
            "/",
            get(handlers::favorites_list).post(handlers::favorites_add),
        )
        .route("/users/{user_id}", get(handlers::favorites_list_user))
        .route("/{book_id}", delete(handlers::favorites_remove))
        .route("/{book_id}/position", put(handlers::favorites_move));

    let collection_routes = Router::new()
        .route("/", post(handlers::collections_add))
        .route("/read", get(handlers::collections_read))
        .route("/{book_id}", delete(handlers::collections_remove));

    let review_routes = Router::new()
        .route("/", post(handlers::reviews_create))
        .route("/book/{book_id}", get(handlers::reviews_for_book))
        .route("/user", get(handlers::reviews_mine))
        .route(
            "/{id}",
            put(handlers::reviews_update).delete(handlers::reviews_delete),
        );

    let user_routes = Router::new()
        .route(
            "/me",
            get(handlers::users_me).put(handlers::users_update_me),
        )
        .route(
            "/me/avatar",
            put(handlers::users_upload_avatar).layer(DefaultBodyLimit::max(avatar_limit)),
        )
        .route("/search", get(handlers::users_search))
        .route("/suggested", get(handlers::users_suggested))
        .route("/{id}", get(handlers::users_profile));

    let stats_routes = Router::new()
        .route("/", get(handlers::stats_me))
        .route("/users/{id}", get(handlers::stats_user))
        .route("/reviews", get(handlers::stats_reviews_me))
        .route("/reviews/users/{id}", get(handlers::stats_reviews_user))
        .route("/collections", get(handlers::stats_collections_me))
        .route(
            "/collections/users/{id}",
            get(handlers::stats_collections_user),
        );

    let book_routes = Router::new()
        .route("/search", get(handlers::books_search))
        .route("/{id}", get(handlers::books_get));

    let admin_routes = Router::new()
        .route("/users", get(handlers::admin_users))
        .route("/users/{id}", delete(handlers::admin_delete_user))
        .route("/reviews", get(handlers::admin_reviews))
        .route("/reviews/{id}", delete(handlers::admin_delete_review));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/avatars/{file}", get(handlers::avatar_file))
        .nest("/api/auth", auth_routes)
        .nest("/api/favorites", favorite_routes)
        .nest("/api/collections", collection_routes)
        .nest("/api/reviews", review_routes)
        .nest("/api/users", user_routes)
        .nest("/api/stats", stats_routes)
        .nest("/api/books", book_routes)
        .nest("/api/admin", admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
