//! 楽観的更新とページングを画面間で同期させるクライアント側エンジン

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;

pub use application::ports::{CommentGateway, PageLoader, PostInteractionGateway};
pub use application::services::{
    FeedService, MutationOutcome, OptimisticMutator, Pager, PagerState, PostDetailService,
    RetryOutcome, RetryPolicy, execute_with_retry,
};
pub use application::{ScreenScope, SyncSession};
pub use domain::entities::{Comment, CommentEvent, MutationEvent, PollOption, Post, PostEvent};
pub use domain::value_objects::{ReactionSummary, ReactionType};
pub use infrastructure::{EventBus, Origin, OverlayCache};
pub use shared::logging::init_logging;
pub use shared::{AppConfig, AppError, ErrorKind, Result};
