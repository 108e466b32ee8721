use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// 楽観的更新の前段で弾かれたユーザー操作の理由。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ValidationFailureKind {
    /// 投稿に投票が存在しない。
    PollMissing,
    /// 既に投票済みの投票へ再投票しようとした。
    AlreadyVoted,
    /// 未投票の状態で取り消しを要求した。
    NotVoted,
    /// 選択肢インデックスが範囲外。
    PollOptionOutOfRange,
    /// 同じ対象への操作が処理中。
    ActionInFlight,
    /// 空のコメント本文。
    EmptyContent,
}

impl ValidationFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationFailureKind::PollMissing => "poll_missing",
            ValidationFailureKind::AlreadyVoted => "already_voted",
            ValidationFailureKind::NotVoted => "not_voted",
            ValidationFailureKind::PollOptionOutOfRange => "poll_option_out_of_range",
            ValidationFailureKind::ActionInFlight => "action_in_flight",
            ValidationFailureKind::EmptyContent => "empty_content",
        }
    }
}

impl fmt::Display for ValidationFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationFailureKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poll_missing" => Ok(ValidationFailureKind::PollMissing),
            "already_voted" => Ok(ValidationFailureKind::AlreadyVoted),
            "not_voted" => Ok(ValidationFailureKind::NotVoted),
            "poll_option_out_of_range" => Ok(ValidationFailureKind::PollOptionOutOfRange),
            "action_in_flight" => Ok(ValidationFailureKind::ActionInFlight),
            "empty_content" => Ok(ValidationFailureKind::EmptyContent),
            _ => Err(()),
        }
    }
}
