use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// ログ設定の初期化
///
/// `RUST_LOG` が未設定なら `feed_sync=debug,info` を使う。既に購読者が
/// 登録済みの場合は何もしない。
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "feed_sync=debug,info".into());

    if tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
    {
        tracing::info!("feed-sync logging initialized");
    }
}
