pub mod feed_service;
pub mod merged_list;
pub mod mutation;
pub mod pager;
pub mod post_detail_service;
pub mod retry;

pub use feed_service::FeedService;
pub use merged_list::MergedList;
pub use mutation::{Mutation, MutationOutcome, MutationPhase, OptimisticMutator};
pub use pager::{PageErrorCallback, Pager, PagerBuilder, PagerState};
pub use post_detail_service::PostDetailService;
pub use retry::{
    RetryOutcome, RetryPolicy, RetryingPageLoader, execute_with_retry, retry_message, should_retry,
};
