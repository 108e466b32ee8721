use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub pager: PagerConfig,
    pub comments: PagerConfig,
    pub overlay: OverlayConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PagerConfig {
    pub page_size: usize,
    pub max_cached_items: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverlayConfig {
    pub max_entries: usize,
}

/// 指数バックオフ付きリトライの設定
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pager: PagerConfig::default(),
            comments: PagerConfig {
                page_size: 20,
                max_cached_items: 200,
            },
            overlay: OverlayConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_cached_items: 200,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { max_entries: 100 }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 4000,
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    /// 試行 `attempt`（1 始まり）の失敗後、次の試行までの待機時間
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay_ms as f64 * self.exponential_base.powi(exponent);
        let capped = if scaled.is_finite() {
            scaled.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped as u64)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー参照関数から設定を組み立てる（環境変数以外のソースやテスト用）
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(value) = lookup("FEED_SYNC_PAGE_SIZE").as_deref().and_then(parse_usize) {
            cfg.pager.page_size = value.max(1);
        }
        if let Some(value) = lookup("FEED_SYNC_MAX_CACHED_ITEMS")
            .as_deref()
            .and_then(parse_usize)
        {
            cfg.pager.max_cached_items = value.max(1);
        }
        if let Some(value) = lookup("FEED_SYNC_COMMENT_PAGE_SIZE")
            .as_deref()
            .and_then(parse_usize)
        {
            cfg.comments.page_size = value.max(1);
        }
        if let Some(value) = lookup("FEED_SYNC_OVERLAY_MAX_ENTRIES")
            .as_deref()
            .and_then(parse_usize)
        {
            cfg.overlay.max_entries = value.max(1);
        }
        if let Some(value) = lookup("FEED_SYNC_RETRY_MAX_ATTEMPTS")
            .as_deref()
            .and_then(parse_u32)
        {
            cfg.retry.max_attempts = value.max(1);
        }
        if let Some(value) = lookup("FEED_SYNC_RETRY_INITIAL_DELAY_MS")
            .as_deref()
            .and_then(parse_u64)
        {
            cfg.retry.initial_delay_ms = value;
        }
        if let Some(value) = lookup("FEED_SYNC_RETRY_MAX_DELAY_MS")
            .as_deref()
            .and_then(parse_u64)
        {
            cfg.retry.max_delay_ms = value;
        }
        if let Some(value) = lookup("FEED_SYNC_RETRY_EXPONENTIAL_BASE")
            .as_deref()
            .and_then(parse_f64)
        {
            cfg.retry.exponential_base = value.max(1.0);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, pager) in [("pager", &self.pager), ("comments", &self.comments)] {
            if pager.page_size == 0 {
                return Err(format!("{name} page_size must be greater than 0"));
            }
            if pager.max_cached_items < pager.page_size {
                return Err(format!(
                    "{name} max_cached_items must be at least page_size"
                ));
            }
        }
        if self.overlay.max_entries == 0 {
            return Err("Overlay max_entries must be greater than 0".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("Retry max_attempts must be greater than 0".to_string());
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err("Retry max_delay_ms must not be below initial_delay_ms".to_string());
        }
        if self.retry.exponential_base.is_nan() || self.retry.exponential_base < 1.0 {
            return Err("Retry exponential_base must be at least 1.0".to_string());
        }
        Ok(())
    }
}

fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok()
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_f64(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.overlay.max_entries, 100);
        assert_eq!(cfg.retry.max_attempts, 3);
    }

    #[test]
    fn lookup_overrides_apply() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("FEED_SYNC_PAGE_SIZE", "50"),
            ("FEED_SYNC_MAX_CACHED_ITEMS", "500"),
            ("FEED_SYNC_OVERLAY_MAX_ENTRIES", " 32 "),
            ("FEED_SYNC_RETRY_MAX_ATTEMPTS", "5"),
            ("FEED_SYNC_RETRY_EXPONENTIAL_BASE", "1.5"),
        ]));
        assert_eq!(cfg.pager.page_size, 50);
        assert_eq!(cfg.pager.max_cached_items, 500);
        assert_eq!(cfg.overlay.max_entries, 32);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.exponential_base, 1.5);
    }

    #[test]
    fn unparsable_values_keep_defaults() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("FEED_SYNC_PAGE_SIZE", "lots"),
            ("FEED_SYNC_RETRY_MAX_DELAY_MS", ""),
        ]));
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let mut cfg = AppConfig::default();
        cfg.retry.max_delay_ms = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_window_smaller_than_page() {
        let mut cfg = AppConfig::default();
        cfg.pager.max_cached_items = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backoff_delay_grows_then_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(retry.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(retry.backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(retry.backoff_delay(10), Duration::from_millis(4000));
    }
}
