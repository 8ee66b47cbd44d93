#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid image input: {0}")]
    InvalidImage(String),

    #[error("unsupported OCR engine {0}, expected 1, 2 or 3")]
    InvalidEngine(u8),

    #[error(transparent)]
    Common(#[from] medalert_common::error::CommonError),
}
