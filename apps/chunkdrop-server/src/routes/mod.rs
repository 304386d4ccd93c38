//! Route modules for Chunkdrop Server

pub mod files;
pub mod health;
pub mod index;
pub mod upload;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router
///
/// Handlers read the caller address from `ConnectInfo<SocketAddr>`, so the
/// router must be served with `into_make_service_with_connect_info`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index::index_page).post(upload::upload_file))
        .route("/files", get(files::list_files))
        .route("/download/:name", get(files::download_file))
        .route("/health", get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{header, Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::codec::ObfuscationCodec;
    use crate::config::Config;

    const KEY: &str = "router-key";
    const BOUNDARY: &str = "----chunkdropTestBoundary";

    async fn test_app(dir: &TempDir) -> (Router, AppState) {
        let mut config = Config::default();
        config.security.key = KEY.to_string();
        config.security.log_path = Some(dir.path().join("security.log"));
        config.storage.upload_dir = dir.path().join("uploads");
        config.storage.chunk_dir = dir.path().join("chunks");

        let state = AppState::new(config).await.unwrap();
        let app = app(state.clone()).layer(MockConnectInfo(SocketAddr::from(([10, 1, 2, 3], 4000))));
        (app, state)
    }

    fn multipart(payload: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                BOUNDARY
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(b"\r\n");
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn post(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_index_and_health() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_app(&dir).await;

        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("<html"));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["service"], "chunkdrop-server");
    }

    #[tokio::test]
    async fn test_unknown_download_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_app(&dir).await;

        let response = app
            .oneshot(Request::get("/download/unknownfile").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_list_download_round_trip() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_app(&dir).await;
        let codec = ObfuscationCodec::xor(KEY).unwrap();
        let plain = b"line one\r\nline two\r\n--not a boundary\r\n".to_vec();

        let response = app
            .clone()
            .oneshot(post(multipart(&codec.encode(&plain), &[("original_name", "notes.txt")])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "File notes.txt uploaded successfully");

        let response = app
            .clone()
            .oneshot(Request::get("/files").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listing: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        let entry = &listing[0];
        let listed_name = entry["name"].as_str().unwrap().to_string();
        assert_eq!(listed_name, codec.transform_name("notes.txt"));
        assert_eq!(entry["size"], plain.len());

        let response = app
            .oneshot(
                Request::get(format!("/download/{}", listed_name))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"notes.txt.enc\""
        );
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            plain.len().to_string().as_str()
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(codec.decode(bytes.to_vec()), plain);
    }

    #[tokio::test]
    async fn test_chunked_upload_over_http() {
        let dir = TempDir::new().unwrap();
        let (app, state) = test_app(&dir).await;
        let codec = ObfuscationCodec::xor(KEY).unwrap();
        let parts: [&[u8]; 2] = [b"first half, ", b"second half"];

        let mut last = String::new();
        for index in [1usize, 0] {
            let index_text = index.to_string();
            let response = app
                .clone()
                .oneshot(post(multipart(
                    &codec.encode(parts[index]),
                    &[
                        ("original_name", "halves.txt"),
                        ("chunk_index", index_text.as_str()),
                        ("total_chunks", "2"),
                    ],
                )))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            last = body_text(response).await;
        }

        assert_eq!(last, "File halves.txt successfully assembled from 2 chunks");
        assert_eq!(
            std::fs::read(dir.path().join("uploads/halves.txt")).unwrap(),
            b"first half, second half"
        );
        assert!(state.upload_service().registry().is_empty());
    }

    #[tokio::test]
    async fn test_protocol_errors_are_client_errors() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_app(&dir).await;

        // Missing original_name
        let response = app.clone().oneshot(post(multipart(b"x", &[]))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Boundary in the body differs from the declared one
        let mut body = multipart(b"x", &[("original_name", "a")]);
        body[2] = b'X';
        let response = app.clone().oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Not multipart at all
        let response = app
            .oneshot(
                Request::post("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::CONTENT_LENGTH, 2)
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_name_with_del_byte_downloads() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_app(&dir).await;
        let codec = ObfuscationCodec::xor(KEY).unwrap();

        let response = app
            .clone()
            .oneshot(post(multipart(&codec.encode(b"ab"), &[("original_name", "a\u{7f}b.txt")])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/files").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listing: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        let listed_name = listing[0]["name"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::get(format!("/download/{}", listed_name))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"a_b.txt.enc\"; filename*=UTF-8''a%7Fb.txt.enc"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(codec.decode(bytes.to_vec()), b"ab");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escaping_root_is_rejected_and_logged() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_app(&dir).await;
        let codec = ObfuscationCodec::xor(KEY).unwrap();

        let outside = dir.path().join("outside.txt");
        std::fs::write(&outside, b"untouched").unwrap();
        std::os::unix::fs::symlink(&outside, dir.path().join("uploads/evil.txt")).unwrap();
        std::os::unix::fs::symlink(&outside, dir.path().join("chunks/evil.bin.chunk0")).unwrap();

        // Single-shot upload onto a planted link
        let response = app
            .clone()
            .oneshot(post(multipart(&codec.encode(b"owned"), &[("original_name", "evil.txt")])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Chunk artifact onto a planted link
        let response = app
            .oneshot(post(multipart(
                &codec.encode(b"owned"),
                &[
                    ("original_name", "evil.bin"),
                    ("chunk_index", "0"),
                    ("total_chunks", "2"),
                ],
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(std::fs::read(&outside).unwrap(), b"untouched");

        let log = std::fs::read_to_string(dir.path().join("security.log")).unwrap();
        let traversal: Vec<&str> = log
            .lines()
            .filter(|line| line.contains("SECURITY EVENT - PATH_TRAVERSAL_ATTEMPT:"))
            .collect();
        assert_eq!(traversal.len(), 2);
        assert!(traversal[0].contains("evil.txt"));
        assert!(traversal[1].contains("evil.bin"));
        assert!(traversal
            .iter()
            .all(|line| line.ends_with("(Client: 10.1.2.3)")));
    }

    #[tokio::test]
    async fn test_chunk_count_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (app, state) = test_app(&dir).await;

        let first = multipart(b"a", &[("original_name", "m.bin"), ("chunk_index", "0"), ("total_chunks", "3")]);
        let response = app.clone().oneshot(post(first)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let second = multipart(b"b", &[("original_name", "m.bin"), ("chunk_index", "1"), ("total_chunks", "4")]);
        let response = app.oneshot(post(second)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let session = state.upload_service().registry().snapshot("m.bin").unwrap();
        assert_eq!(session.total_chunks, 3);
        assert_eq!(session.missing_chunks(), vec![1, 2]);
    }
}
