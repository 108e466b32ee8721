use super::{Entity, Reactable};
use crate::domain::value_objects::{ReactionSummary, ReactionType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub parent_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub like_count: u32,
    pub user_reaction: Option<ReactionType>,
    pub reactions: ReactionSummary,
    pub is_edited: bool,
}

impl Comment {
    pub fn new(post_id: String, author_id: String, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            post_id,
            author_id,
            parent_id: None,
            content,
            created_at: Utc::now(),
            like_count: 0,
            user_reaction: None,
            reactions: ReactionSummary::new(),
            is_edited: false,
        }
    }

    pub fn with_parent(mut self, parent_id: String) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

impl Entity for Comment {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl Reactable for Comment {
    fn like_count(&self) -> u32 {
        self.like_count
    }

    fn user_reaction(&self) -> Option<ReactionType> {
        self.user_reaction
    }

    fn reactions(&self) -> &ReactionSummary {
        &self.reactions
    }

    fn set_reaction_state(
        &mut self,
        like_count: u32,
        user_reaction: Option<ReactionType>,
        reactions: ReactionSummary,
    ) {
        self.like_count = like_count;
        self.user_reaction = user_reaction;
        self.reactions = reactions;
    }
}
