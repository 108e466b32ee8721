pub mod interactions;
pub mod page_loader;

pub use interactions::{CommentGateway, PostInteractionGateway};
pub use page_loader::PageLoader;
