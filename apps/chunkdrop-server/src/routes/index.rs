//! Operator page

use axum::response::Html;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// GET /
pub async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}
