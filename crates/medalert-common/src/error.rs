/// Errors from constructing the shared provider stack.
///
/// The scan operations themselves never return these; they fold failures into
/// their result records. Server crates wrap `CommonError` via `#[from]`.
use crate::gemini::GeminiClientError;
use crate::ocr_space::OcrError;

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("ocr client error: {0}")]
    Ocr(#[from] OcrError),

    #[error("gemini client error: {0}")]
    Gemini(#[from] GeminiClientError),
}
