use axum::response::Html;

pub async fn index_page() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}
