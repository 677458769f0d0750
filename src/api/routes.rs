use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{chapter, comic, page};
use super::types::AppState;
use crate::storage::engine::Library;

pub fn create_router(library: Library) -> Router {
    let state = AppState { library };
    Router::new()
        .route("/health", get(health_check))
        .route("/comics", post(comic::upload_comic))
        .route("/comics/:slug/edit", post(comic::edit_comic))
        .route("/comics/:slug/delete", post(comic::delete_comic))
        .route("/comics/:slug/chapters", post(chapter::add_chapter))
        .route(
            "/comics/:slug/chapters/:number/edit",
            post(chapter::edit_chapter),
        )
        .route(
            "/comics/:slug/chapters/:number/delete",
            post(chapter::delete_chapter),
        )
        .route(
            "/comics/:slug/chapters/:number/reorder",
            post(page::reorder_pages),
        )
        .route("/comics/:slug/chapters/:number/pages", get(page::list_pages))
        .route(
            "/comics/:slug/chapters/:number/pages/:filename",
            get(page::get_page),
        )
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
