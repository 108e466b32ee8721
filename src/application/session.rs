use crate::application::ports::{CommentGateway, PageLoader, PostInteractionGateway};
use crate::application::services::{FeedService, PostDetailService};
use crate::domain::entities::{CommentEvent, Post, PostEvent};
use crate::infrastructure::EventBus;
use crate::shared::{AppConfig, AppError, Result};
use std::sync::Arc;
use tracing::info;

/// ログインセッション単位で共有する状態
///
/// イベントバスはセッションに一つだけ作り、各画面のサービスへ渡す。
#[derive(Clone)]
pub struct SyncSession {
    config: AppConfig,
    post_events: Arc<EventBus<PostEvent>>,
    comment_events: Arc<EventBus<CommentEvent>>,
}

impl SyncSession {
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate().map_err(AppError::ConfigurationError)?;
        info!(
            page_size = config.pager.page_size,
            overlay_max_entries = config.overlay.max_entries,
            retry_max_attempts = config.retry.max_attempts,
            "sync session created"
        );
        Ok(Self {
            config,
            post_events: EventBus::shared(),
            comment_events: EventBus::shared(),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(AppConfig::from_env())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn post_events(&self) -> &Arc<EventBus<PostEvent>> {
        &self.post_events
    }

    pub fn comment_events(&self) -> &Arc<EventBus<CommentEvent>> {
        &self.comment_events
    }

    /// フィード画面を開く。tokio ランタイム上で呼ぶこと。
    pub fn open_feed(
        &self,
        loader: Arc<dyn PageLoader<Post>>,
        gateway: Arc<dyn PostInteractionGateway>,
    ) -> FeedService {
        FeedService::new(
            &self.config,
            loader,
            gateway,
            Arc::clone(&self.post_events),
        )
    }

    /// 投稿詳細画面を開く。tokio ランタイム上で呼ぶこと。
    pub fn open_post_detail(
        &self,
        post_id: impl Into<String>,
        posts: Arc<dyn PostInteractionGateway>,
        comments: Arc<dyn CommentGateway>,
    ) -> PostDetailService {
        PostDetailService::new(
            &self.config,
            post_id,
            posts,
            comments,
            Arc::clone(&self.post_events),
            Arc::clone(&self.comment_events),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.overlay.max_entries = 0;

        let err = SyncSession::new(config).err().expect("invalid config");
        assert!(matches!(err, AppError::ConfigurationError(_)));
    }

    #[test]
    fn clones_share_buses() {
        let session = SyncSession::new(AppConfig::default()).expect("valid config");
        let clone = session.clone();
        let _sub = session.post_events().subscribe();

        assert_eq!(clone.post_events().subscriber_count(), 1);
        assert_eq!(clone.comment_events().subscriber_count(), 0);
    }
}
