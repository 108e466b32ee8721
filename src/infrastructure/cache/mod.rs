pub mod overlay_cache;

pub use overlay_cache::OverlayCache;
