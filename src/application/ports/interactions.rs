use crate::domain::entities::{Comment, Post};
use crate::domain::value_objects::ReactionType;
use crate::shared::AppError;
use async_trait::async_trait;

/// 投稿に対するリモート操作
///
/// 実装は安全に再試行できるか、再試行不可の失敗を明示的に返すこと。
#[async_trait]
pub trait PostInteractionGateway: Send + Sync {
    async fn fetch_post(&self, post_id: &str) -> Result<Post, AppError>;

    async fn toggle_reaction(
        &self,
        post_id: &str,
        reaction: ReactionType,
        previous: Option<ReactionType>,
    ) -> Result<(), AppError>;

    async fn submit_vote(&self, post_id: &str, option_index: usize) -> Result<(), AppError>;

    async fn revoke_vote(&self, post_id: &str) -> Result<(), AppError>;

    async fn delete_post(&self, post_id: &str) -> Result<(), AppError>;
}

/// コメントスレッドに対するリモート操作
#[async_trait]
pub trait CommentGateway: Send + Sync {
    async fn list_comments(
        &self,
        post_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Comment>, AppError>;

    async fn create_comment(
        &self,
        post_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<Comment, AppError>;

    async fn edit_comment(&self, comment_id: &str, content: &str) -> Result<(), AppError>;

    async fn delete_comment(&self, comment_id: &str) -> Result<(), AppError>;

    async fn toggle_comment_reaction(
        &self,
        comment_id: &str,
        reaction: ReactionType,
        previous: Option<ReactionType>,
    ) -> Result<(), AppError>;
}
