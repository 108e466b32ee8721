use super::{Comment, Entity, Post};
use crate::domain::value_objects::ReactionType;

/// 画面間で共有する変更イベント。一度だけ配信され、永続化されない。
#[derive(Debug, Clone, PartialEq)]
pub enum MutationEvent<T> {
    /// エンティティ全体の最新値
    Updated(T),
    Deleted { id: String },
    /// `reaction` が `None` ならリアクション取り消し
    Liked {
        id: String,
        reaction: Option<ReactionType>,
    },
    PollVoted {
        id: String,
        option_index: Option<usize>,
    },
    /// ロールバック済みの操作。トースト表示用
    Failed { id: String, message: String },
}

pub type PostEvent = MutationEvent<Post>;
pub type CommentEvent = MutationEvent<Comment>;

impl<T: Entity> MutationEvent<T> {
    pub fn entity_id(&self) -> &str {
        match self {
            MutationEvent::Updated(entity) => entity.entity_id(),
            MutationEvent::Deleted { id }
            | MutationEvent::Liked { id, .. }
            | MutationEvent::PollVoted { id, .. }
            | MutationEvent::Failed { id, .. } => id,
        }
    }
}
