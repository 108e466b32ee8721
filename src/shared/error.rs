use super::validation::ValidationFailureKind;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// レート制限メッセージに待ち時間が含まれない場合の既定値（分）
pub const DEFAULT_RATE_LIMIT_WAIT_MINUTES: u32 = 5;

static RATE_LIMIT_MINUTES: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*minutes?").ok());

const NETWORK_MARKERS: [&str; 3] = ["network", "timeout", "connection"];
const RATE_LIMIT_MARKERS: [&str; 3] = ["rate limit", "too many requests", "429"];

/// UI 層へ返すエラー分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    RateLimit,
    Validation,
    Unknown,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_minutes: u32,
    },
    #[error("Validation error ({kind}): {message}")]
    ValidationError {
        kind: ValidationFailureKind,
        message: String,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(kind: ValidationFailureKind, message: impl Into<String>) -> Self {
        AppError::ValidationError {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        let message = message.into();
        let retry_after_minutes = extract_wait_minutes(&message);
        AppError::RateLimited {
            message,
            retry_after_minutes,
        }
    }

    /// バックエンドから返された不透明なエラーメッセージを分類する。
    /// レート制限はネットワークエラーより優先する。
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if RATE_LIMIT_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Self::rate_limited(message);
        }
        if NETWORK_MARKERS.iter().any(|m| lowered.contains(m)) {
            return AppError::Network(message);
        }
        AppError::Internal(message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Network(_) | AppError::Timeout(_) => ErrorKind::Network,
            AppError::RateLimited { .. } => ErrorKind::RateLimit,
            AppError::ValidationError { .. } => ErrorKind::Validation,
            _ => ErrorKind::Unknown,
        }
    }

    /// 自動リトライの対象か。レート制限と入力検証エラーは常に対象外。
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network(_) | AppError::Timeout(_) => true,
            AppError::RateLimited { .. } | AppError::ValidationError { .. } => false,
            other => {
                let lowered = other.to_string().to_lowercase();
                NETWORK_MARKERS.iter().any(|m| lowered.contains(m))
            }
        }
    }

    pub fn retry_after_minutes(&self) -> Option<u32> {
        match self {
            AppError::RateLimited {
                retry_after_minutes,
                ..
            } => Some(*retry_after_minutes),
            _ => None,
        }
    }

    /// トーストやスナックバー向けの文言
    pub fn user_message(&self) -> String {
        match self {
            AppError::Network(_) | AppError::Timeout(_) => {
                "Network error. Please check your connection and try again.".to_string()
            }
            AppError::RateLimited {
                retry_after_minutes,
                ..
            } => format!(
                "Rate limit exceeded. Please wait {retry_after_minutes} minutes before trying again."
            ),
            AppError::ValidationError { message, .. } => message.clone(),
            AppError::NotFound(message) | AppError::Internal(message) if !message.is_empty() => {
                message.clone()
            }
            _ => "An unexpected error occurred. Please try again.".to_string(),
        }
    }
}

fn extract_wait_minutes(message: &str) -> u32 {
    RATE_LIMIT_MINUTES
        .as_ref()
        .and_then(|re| re.captures(message))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_MINUTES)
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        AppError::Timeout(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::from_message(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::from_message(err)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_messages_case_insensitively() {
        let err = AppError::from_message("Connection reset by peer");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());

        let err = AppError::from_message("upstream TIMEOUT");
        assert!(matches!(err, AppError::Network(_)));
    }

    #[test]
    fn rate_limit_wins_over_network_markers() {
        let err = AppError::from_message("network: rate limit hit, retry in 12 minutes");
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(!err.is_retryable());
        assert_eq!(err.retry_after_minutes(), Some(12));
    }

    #[test]
    fn rate_limit_defaults_to_five_minutes() {
        let err = AppError::from_message("429 Too Many Requests");
        assert_eq!(err.retry_after_minutes(), Some(DEFAULT_RATE_LIMIT_WAIT_MINUTES));
    }

    #[test]
    fn rate_limit_parses_singular_minute() {
        let err = AppError::rate_limited("try again in 1 minute");
        assert_eq!(err.retry_after_minutes(), Some(1));
        assert!(err.user_message().contains("wait 1 minutes"));
    }

    #[test]
    fn unreachable_host_is_not_a_network_error() {
        let err = AppError::from_message("host unreachable");
        assert!(matches!(err, AppError::Internal(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn unknown_messages_are_not_retryable() {
        let err = AppError::from_message("permission denied");
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(!err.is_retryable());
    }

    #[test]
    fn validation_errors_are_never_retried() {
        let err = AppError::validation(
            ValidationFailureKind::EmptyContent,
            "connection field missing",
        );
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn elapsed_timeout_is_retryable() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            futures::future::pending::<()>(),
        )
        .await
        .expect_err("pending future times out");
        let err: AppError = elapsed.into();
        assert!(matches!(err, AppError::Timeout(_)));
        assert!(err.is_retryable());
    }
}
