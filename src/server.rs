//! HTTP-эндпоинт установщика

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use log::info;

use crate::{dispatcher::Dispatcher, response::ActionResponse, ui::INDEX_HTML};

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/install", post(install_handler))
        .with_state(dispatcher)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Тело разбирается вручную: на некорректный JSON отвечаем 200 с
/// `success: false`, а не ошибкой axum
async fn install_handler(State(dispatcher): State<Arc<Dispatcher>>, body: Bytes) -> Json<ActionResponse> {
    Json(dispatcher.handle_json(&body).await)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Не удалось установить обработчик Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Получен сигнал остановки");
}

pub async fn serve(dispatcher: Arc<Dispatcher>, bind: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Мастер настройки доступен на http://{}", addr);
    println!("Server setup wizard running at http://{}", addr);
    println!("Press Ctrl+C to stop.\n");

    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{command::fake::FakeRunner, dispatcher::testing::dispatcher};

    async fn post_json(app: Router, body: &'static str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::post("/api/install")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn errors_are_reported_with_status_200() {
        let (d, _dir) = dispatcher(Arc::new(FakeRunner::new()));
        let app = router(Arc::new(d));

        let (status, json) = post_json(app.clone(), r#"{"action":"explode"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"success": false, "message": "Unknown action"}));

        let (status, json) = post_json(app, "not json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn serves_wizard_page() {
        let (d, _dir) = dispatcher(Arc::new(FakeRunner::new()));
        let response = router(Arc::new(d))
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("/api/install"));
    }
}
