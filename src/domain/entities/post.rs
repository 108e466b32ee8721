use super::{Entity, Reactable};
use crate::domain::value_objects::{ReactionSummary, ReactionType};
use crate::shared::{AppError, Result, ValidationFailureKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollOption {
    pub text: String,
    pub votes: u32,
}

impl PollOption {
    pub fn new(text: impl Into<String>, votes: u32) -> Self {
        Self {
            text: text.into(),
            votes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub like_count: u32,
    pub comment_count: u32,
    pub user_reaction: Option<ReactionType>,
    pub reactions: ReactionSummary,
    pub poll_options: Option<Vec<PollOption>>,
    pub user_poll_vote: Option<usize>,
}

impl Post {
    pub fn new(content: String, author_id: String) -> Self {
        Self::new_with_id(uuid::Uuid::new_v4().to_string(), content, author_id, Utc::now())
    }

    pub fn new_with_id(
        id: String,
        content: String,
        author_id: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            author_id,
            content,
            created_at,
            like_count: 0,
            comment_count: 0,
            user_reaction: None,
            reactions: ReactionSummary::new(),
            poll_options: None,
            user_poll_vote: None,
        }
    }

    pub fn with_poll(mut self, options: Vec<PollOption>) -> Self {
        self.poll_options = Some(options);
        self
    }

    pub fn has_poll(&self) -> bool {
        self.poll_options.is_some()
    }

    /// 投票を反映した新しい値を返す。投票済みや範囲外の選択肢は拒否する。
    pub fn with_poll_vote(&self, option_index: usize) -> Result<Post> {
        let options = self.poll_options.as_ref().ok_or_else(|| {
            AppError::validation(
                ValidationFailureKind::PollMissing,
                format!("post {} has no poll", self.id),
            )
        })?;
        if self.user_poll_vote.is_some() {
            return Err(AppError::validation(
                ValidationFailureKind::AlreadyVoted,
                "You have already voted on this poll",
            ));
        }
        if option_index >= options.len() {
            return Err(AppError::validation(
                ValidationFailureKind::PollOptionOutOfRange,
                format!(
                    "poll option {option_index} out of range (options={})",
                    options.len()
                ),
            ));
        }

        let mut updated = self.clone();
        if let Some(options) = updated.poll_options.as_mut() {
            options[option_index].votes = options[option_index].votes.saturating_add(1);
        }
        updated.user_poll_vote = Some(option_index);
        Ok(updated)
    }

    /// 投票の取り消しを反映した新しい値を返す
    pub fn with_vote_revoked(&self) -> Result<Post> {
        let previous = self.user_poll_vote.ok_or_else(|| {
            AppError::validation(ValidationFailureKind::NotVoted, "No vote to revoke")
        })?;

        let mut updated = self.clone();
        if let Some(option) = updated
            .poll_options
            .as_mut()
            .and_then(|options| options.get_mut(previous))
        {
            option.votes = option.votes.saturating_sub(1);
        }
        updated.user_poll_vote = None;
        Ok(updated)
    }
}

impl Entity for Post {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl Reactable for Post {
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
