use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 投稿・コメントに付けられるリアクションの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReactionType {
    Like,
    Love,
    Haha,
    Wow,
    Sad,
    Angry,
}

impl ReactionType {
    pub const ALL: [ReactionType; 6] = [
        ReactionType::Like,
        ReactionType::Love,
        ReactionType::Haha,
        ReactionType::Wow,
        ReactionType::Sad,
        ReactionType::Angry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionType::Like => "LIKE",
            ReactionType::Love => "LOVE",
            ReactionType::Haha => "HAHA",
            ReactionType::Wow => "WOW",
            ReactionType::Sad => "SAD",
            ReactionType::Angry => "ANGRY",
        }
    }
}

impl fmt::Display for ReactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReactionType::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// リアクション種別ごとの件数。件数は常に 0 以上。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ReactionSummary(BTreeMap<ReactionType, u32>);

impl ReactionSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reaction: ReactionType, count: u32) -> Self {
        self.0.insert(reaction, count);
        self
    }

    pub fn count(&self, reaction: ReactionType) -> u32 {
        self.0.get(&reaction).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, reaction: ReactionType) {
        let entry = self.0.entry(reaction).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    /// 0 未満にはならない。0 になった種別は取り除く
    pub fn decrement(&mut self, reaction: ReactionType) {
        if let Some(count) = self.0.get_mut(&reaction) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.0.remove(&reaction);
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.0.values().map(|v| u64::from(*v)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReactionType, u32)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}
