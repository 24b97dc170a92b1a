// src/errors.rs
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use thiserror::Error;

/// Known remote failure categories, relabeled from raw provider errors so the
/// orchestrator can decide whether to fall back or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFault {
    Timeout,
    RateLimited,
    ResourceExhausted,
    MalformedResponse,
    Remote,
}

impl std::fmt::Display for ProviderFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProviderFault::Timeout => "timeout",
            ProviderFault::RateLimited => "rate-limit",
            ProviderFault::ResourceExhausted => "resource-exhaustion",
            ProviderFault::MalformedResponse => "malformed-response",
            ProviderFault::Remote => "remote",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug)]
pub enum RestyleError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("image is {size} bytes after compression, ceiling is {limit}")]
    ImageTooLarge { size: usize, limit: usize },

    #[error("{provider} produced no usable outputs")]
    NoOutputProduced { provider: &'static str },

    #[error("{provider} {fault} failure: {message}")]
    Provider {
        provider: &'static str,
        fault: ProviderFault,
        message: String,
    },

    #[error("all providers exhausted, last error: {last}")]
    AllProvidersExhausted { last: String },

    #[error("hybrid pipeline failed: {0}")]
    HybridPipelineFailed(String),

    #[error("image generation unavailable")]
    GenerationUnavailable,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RestyleError {
    pub fn fault(&self) -> Option<ProviderFault> {
        match self {
            RestyleError::Provider { fault, .. } => Some(*fault),
            _ => None,
        }
    }
}

// Only InvalidImage, ImageTooLarge, Validation and GenerationUnavailable are
// user-visible; everything else is an internal recovery signal, so its detail
// stays in the logs and the body carries a fixed generic message.
impl ResponseError for RestyleError {
    fn status_code(&self) -> StatusCode {
        match self {
            RestyleError::InvalidImage(_) | RestyleError::Validation(_) => StatusCode::BAD_REQUEST,
            RestyleError::ImageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RestyleError::GenerationUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error, message) = match self {
            RestyleError::InvalidImage(_) => (
                "Invalid image",
                "The uploaded file could not be read as an image.".to_string(),
            ),
            RestyleError::ImageTooLarge { .. } => (
                "Image too large",
                "The image is too large even after compression. Please use a smaller image."
                    .to_string(),
            ),
            RestyleError::Validation(detail) => ("Validation error", detail.clone()),
            RestyleError::GenerationUnavailable => (
                "Generation unavailable",
                "Image generation is currently unavailable. Please try again later.".to_string(),
            ),
            _ => (
                "Internal error",
                "An internal error occurred while processing the image.".to_string(),
            ),
        };

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": error,
            "message": message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_errors_have_distinct_statuses() {
        assert_eq!(
            RestyleError::InvalidImage("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RestyleError::ImageTooLarge { size: 1, limit: 0 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            RestyleError::GenerationUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_errors_map_to_generic_response() {
        let err = RestyleError::Provider {
            provider: "Replicate SDXL img2img",
            fault: ProviderFault::RateLimited,
            message: "upstream secret detail".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.fault(), Some(ProviderFault::RateLimited));
    }
}
