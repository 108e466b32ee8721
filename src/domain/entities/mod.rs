pub mod comment;
pub mod mutation_event;
pub mod post;

pub use comment::Comment;
pub use mutation_event::{CommentEvent, MutationEvent, PostEvent};
pub use post::{PollOption, Post};

use crate::domain::value_objects::{ReactionSummary, ReactionType};

/// バックエンドが所有し、クライアントは一時的なコピーだけを持つエンティティ
pub trait Entity: Clone + Send + Sync + 'static {
    fn entity_id(&self) -> &str;
}

/// リアクションを持つエンティティ
pub trait Reactable: Entity {
    fn like_count(&self) -> u32;
    fn user_reaction(&self) -> Option<ReactionType>;
    fn reactions(&self) -> &ReactionSummary;
    fn set_reaction_state(
        &mut self,
        like_count: u32,
        user_reaction: Option<ReactionType>,
        reactions: ReactionSummary,
    );

    /// リアクションをトグルした結果を新しい値として返す。
    ///
    /// - 同じ種類なら取り消し（件数 -1）
    /// - 未リアクションなら追加（件数 +1）
    /// - 別種類なら付け替え（旧種別 -1、新種別 +1、合計は不変）
    fn with_reaction_toggled(&self, requested: ReactionType) -> Self {
        let current = self.user_reaction();
        let mut reactions = self.reactions().clone();
        let mut like_count = self.like_count();

        let next = match current {
            Some(existing) if existing == requested => {
                reactions.decrement(requested);
                like_count = like_count.saturating_sub(1);
                None
            }
            Some(existing) => {
                reactions.decrement(existing);
                reactions.increment(requested);
                Some(requested)
            }
            None => {
                reactions.increment(requested);
                like_count = like_count.saturating_add(1);
                Some(requested)
            }
        };

        let mut updated = self.clone();
        updated.set_reaction_state(like_count, next, reactions);
        updated
    }
}
