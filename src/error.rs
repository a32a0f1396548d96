use tch::TchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SrError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    #[error("Checkpoint load error: {0}")]
    LoadError(String),

    #[error("Torch error: {0}")]
    Tch(#[from] TchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, SrError>;

impl SrError {
    pub(crate) fn shape(context: &'static str, expected: &[i64], actual: &[i64]) -> Self {
        SrError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
