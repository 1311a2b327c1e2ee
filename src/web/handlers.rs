use crate::detection::Prediction;
use crate::image::ImageLoader;
use crate::web::{error::ApiError, extractors::RequestId, AppState};
use axum::{
    extract::{Multipart, State},
    response::Json,
};
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use std::time::Instant;

/// Multipart upload of one image in field `file`
pub async fn predict_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    mut multipart: Multipart,
) -> Result<Json<Prediction>, ApiError> {
    let start_time = Instant::now();
    tracing::info!("Processing prediction request: request_id={}", request_id);

    let mut upload: Option<(String, axum::body::Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::InvalidInput(format!("Failed to read multipart field: {}", e))
    })? {
        let field_name = field.name().unwrap_or("unknown").to_string();
        if field_name != "file" {
            tracing::debug!("Ignoring unknown field: {}", field_name);
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let extension = validate_extension(&file_name)?;

        if let Some(content_type) = field.content_type() {
            if !content_type.starts_with("image/") {
                return Err(ApiError::InvalidInput(format!(
                    "Unsupported content type: {}",
                    content_type
                )));
            }
        }

        let data = field.bytes().await.map_err(|e| {
            ApiError::InvalidInput(format!("Failed to read file data: {}", e))
        })?;
        if data.is_empty() {
            return Err(ApiError::InvalidInput("Empty file".to_string()));
        }

        tracing::debug!("Received file: {} ({} bytes)", file_name, data.len());
        upload = Some((extension, data));
    }

    let (extension, data) =
        upload.ok_or_else(|| ApiError::InvalidInput("No file part".to_string()))?;

    let upload_dir = state.upload_dir.clone();
    let predictor = state.predictor.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Option<Prediction>, ApiError> {
        std::fs::create_dir_all(&upload_dir)?;
        let mut temp = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&format!(".{}", extension))
            .tempfile_in(&upload_dir)?;
        temp.write_all(&data)?;
        temp.flush()?;

        let prediction = predictor.predict(temp.path());

        let path = temp.path().to_path_buf();
        if let Err(e) = temp.close() {
            tracing::warn!("Failed to remove upload {}: {}", path.display(), e);
        }
        Ok(prediction)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Prediction task failed: {}", e)))??;

    let prediction = result.ok_or_else(|| {
        ApiError::ProcessingFailure("Failed to process image".to_string())
    })?;

    tracing::info!(
        "Prediction completed: request_id={}, label={}, raw_score={:.4}, time={:.3}s",
        request_id,
        prediction.label(),
        prediction.raw_score,
        start_time.elapsed().as_secs_f32()
    );

    Ok(Json(prediction))
}

/// Lower-cased extension of an accepted upload name
fn validate_extension(file_name: &str) -> Result<String, ApiError> {
    if file_name.is_empty() {
        return Err(ApiError::InvalidInput("No selected file".to_string()));
    }

    let extension = Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if ImageLoader::is_supported_extension(&extension) {
        Ok(extension)
    } else {
        Err(ApiError::InvalidInput(format!(
            "Invalid file type: {} (allowed: png, jpg, jpeg)",
            file_name
        )))
    }
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn root_handler() -> Json<Value> {
    Json(json!({
        "message": "Welcome to the Deepfake Detection API",
        "endpoints": {
            "predict": "POST /api/predict (multipart field 'file')",
            "health": "GET /api/health"
        }
    }))
}
