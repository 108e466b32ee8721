pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{AppConfig, OverlayConfig, PagerConfig, RetryConfig};
pub use error::{AppError, ErrorKind, Result};
pub use validation::ValidationFailureKind;
