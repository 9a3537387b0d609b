use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ThumbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Renderer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Renderer failed: {0}")]
    Render(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ThumbError {
    /// Short stable label, used as a metrics label and in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ThumbError::Config(_) => "config",
            ThumbError::Timeout(_) => "timeout",
            ThumbError::Render(_) => "render",
            ThumbError::InvalidImage(_) => "invalid_image",
            ThumbError::UnsupportedContent(_) => "unsupported_content",
            ThumbError::Io(_) => "io",
            ThumbError::Network(_) => "network",
            ThumbError::InvalidUrl(_) => "invalid_url",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ThumbError::InvalidUrl(_) | ThumbError::UnsupportedContent(_) => ErrorSeverity::Low,
            ThumbError::Config(_) | ThumbError::Io(_) => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }
}

/// How loudly a failure should be reported by callers such as the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The input was rejected; nothing is wrong with the system.
    Low,
    /// A single render or download failed.
    Medium,
    /// The service cannot work until it is reconfigured.
    High,
}

impl From<std::io::Error> for ThumbError {
    fn from(err: std::io::Error) -> Self {
        ThumbError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for ThumbError {
    fn from(err: reqwest::Error) -> Self {
        ThumbError::Network(err.to_string())
    }
}

impl From<image::ImageError> for ThumbError {
    fn from(err: image::ImageError) -> Self {
        ThumbError::InvalidImage(err.to_string())
    }
}

impl From<serde_json::Error> for ThumbError {
    fn from(err: serde_json::Error) -> Self {
        ThumbError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ThumbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ThumbError::Config("x".to_string()).kind(), "config");
        assert_eq!(ThumbError::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(ThumbError::UnsupportedContent("pdf".to_string()).kind(), "unsupported_content");
        assert_eq!(ThumbError::InvalidUrl("x".to_string()).kind(), "invalid_url");
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(ThumbError::InvalidUrl("x".to_string()).severity(), ErrorSeverity::Low);
        assert_eq!(ThumbError::Render("x".to_string()).severity(), ErrorSeverity::Medium);
        assert_eq!(ThumbError::Timeout(Duration::from_secs(1)).severity(), ErrorSeverity::Medium);
        assert_eq!(ThumbError::Config("x".to_string()).severity(), ErrorSeverity::High);
    }

    #[test]
    fn test_io_error_conversion() {
        let err: ThumbError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, ThumbError::Io(message) if message.contains("denied")));
    }
}
