pub mod ports;
pub mod scope;
pub mod services;
pub mod session;

pub use scope::ScreenScope;
pub use session::SyncSession;
