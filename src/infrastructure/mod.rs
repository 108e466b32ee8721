pub mod cache;
pub mod event;

pub use cache::OverlayCache;
pub use event::{EventBus, EventSubscription, Origin};
