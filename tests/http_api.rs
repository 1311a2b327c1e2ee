use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use deepfake_detector::{
    config::{Config, DetectorConfig},
    web::create_app,
    Prediction, Predictor,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "deepfake-test-boundary";

/// Records every call and returns a fixed answer
struct MockPredictor {
    calls: AtomicUsize,
    seen: Mutex<Vec<PathBuf>>,
    answer: Option<Prediction>,
}

impl MockPredictor {
    fn new(answer: Option<Prediction>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            answer,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Predictor for MockPredictor {
    fn predict(&self, image_path: &Path) -> Option<Prediction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(image_path.exists(), "upload should exist while predicting");
        self.seen.lock().unwrap().push(image_path.to_path_buf());
        self.answer
    }
}

fn app(upload_dir: &TempDir, predictor: Arc<MockPredictor>) -> Router {
    let config = Config::new(
        "127.0.0.1:0".into(),
        upload_dir.path().to_string_lossy().into_owned(),
        Some(1),
        false,
        DetectorConfig::default(),
    )
    .unwrap();
    create_app(&config, predictor)
}

fn multipart_request(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/predict")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn png_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(8, 8, image::Rgb([10, 200, 30]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

#[tokio::test]
async fn test_text_upload_is_rejected_without_predicting() {
    let dir = tempfile::tempdir().unwrap();
    let predictor = MockPredictor::new(Some(Prediction::from_raw_score(0.9, 0.5)));

    let response = app(&dir, predictor.clone())
        .oneshot(multipart_request("file", "notes.txt", "text/plain", b"hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body.get("error").is_some());
    assert_eq!(predictor.calls(), 0);
}

#[tokio::test]
async fn test_non_image_content_type_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let predictor = MockPredictor::new(None);

    let response = app(&dir, predictor.clone())
        .oneshot(multipart_request("file", "face.png", "application/pdf", &png_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(predictor.calls(), 0);
}

#[tokio::test]
async fn test_missing_file_part_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let predictor = MockPredictor::new(None);

    let response = app(&dir, predictor.clone())
        .oneshot(multipart_request("other", "face.png", "image/png", &png_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
    assert_eq!(predictor.calls(), 0);
}

#[tokio::test]
async fn test_valid_upload_returns_prediction_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let predictor = MockPredictor::new(Some(Prediction::from_raw_score(0.8, 0.5)));

    let response = app(&dir, predictor.clone())
        .oneshot(multipart_request("file", "face.PNG", "image/png", &png_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["is_fake"], true);
    assert!((body["raw_score"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    assert!((body["confidence"].as_f64().unwrap() - 0.8).abs() < 1e-6);

    assert_eq!(predictor.calls(), 1);
    let seen = predictor.seen.lock().unwrap();
    assert!(seen[0].starts_with(dir.path()));
    assert!(!seen[0].exists());
}

#[tokio::test]
async fn test_unprocessable_image_is_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let predictor = MockPredictor::new(None);

    let response = app(&dir, predictor.clone())
        .oneshot(multipart_request("file", "face.jpg", "image/jpeg", b"not really a jpeg"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "PROCESSING_FAILED");
    assert_eq!(predictor.calls(), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_health_endpoints() {
    let dir = tempfile::tempdir().unwrap();

    for uri in ["/api/health", "/health"] {
        let response = app(&dir, MockPredictor::new(None))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }
}

#[tokio::test]
async fn test_root_has_welcome_message() {
    let dir = tempfile::tempdir().unwrap();
    let response = app(&dir, MockPredictor::new(None))
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["message"].as_str().unwrap().contains("Deepfake"));
}
