use crate::canvas::LayerId;
use crate::ops::ai::AiError;

pub type EditorResult<T> = Result<T, EditorError>;

#[derive(thiserror::Error, Debug)]
pub enum EditorError {
    #[error("layer not found: {0}")]
    LayerNotFound(LayerId),

    #[error("invalid hierarchy: {0}")]
    Hierarchy(String),

    #[error("selection error: {0}")]
    Selection(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ai error: {0}")]
    Ai(#[from] AiError),
}

impl EditorError {
    pub fn hierarchy(msg: impl Into<String>) -> Self {
        Self::Hierarchy(msg.into())
    }

    pub fn selection(msg: impl Into<String>) -> Self {
        Self::Selection(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(EditorError::LayerNotFound(Uuid::nil()).to_string().starts_with("layer not found:"));
        assert!(EditorError::hierarchy("x").to_string().starts_with("invalid hierarchy:"));
        assert!(EditorError::selection("x").to_string().starts_with("selection error:"));
        assert!(EditorError::invalid("x").to_string().starts_with("invalid operation:"));
        let io = std::io::Error::other("x");
        assert!(EditorError::from(io).to_string().starts_with("io error:"));
        assert!(EditorError::from(AiError::MissingApiKey).to_string().starts_with("ai error:"));
    }
}
