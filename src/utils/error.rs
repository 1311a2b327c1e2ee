use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DetectorError {
    pub fn error_code(&self) -> &'static str {
        match self {
            DetectorError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            DetectorError::ImageProcessing(_) => "IMAGE_PROCESSING_ERROR",
            DetectorError::Training(_) => "TRAINING_ERROR",
            DetectorError::InvalidInput(_) => "INVALID_INPUT",
            DetectorError::Config(_) => "CONFIG_ERROR",
            DetectorError::Io(_) => "IO_ERROR",
            DetectorError::Json(_) => "JSON_ERROR",
            DetectorError::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            DetectorError::Candle(_) => "TENSOR_ERROR",
            DetectorError::Shape(_) => "SHAPE_ERROR",
            DetectorError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
