use crate::shared::AppError;
use async_trait::async_trait;

/// ページ取得ポート
///
/// `(page, page_size)` ごとに冪等であること。`page_size` 未満の件数を
/// 返すとデータ終端とみなされる。
#[async_trait]
pub trait PageLoader<T>: Send + Sync {
    async fn load_page(&self, page: usize, page_size: usize) -> Result<Vec<T>, AppError>;
}
