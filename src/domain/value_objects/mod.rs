pub mod reaction;

pub use reaction::{ReactionSummary, ReactionType};
