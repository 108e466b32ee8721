use crate::domain::entities::Entity;
use crate::shared::OverlayConfig;
use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::{RwLock, watch};
use tracing::trace;

/// ページング結果より優先される「クライアントが知っている最新値」のキャッシュ
///
/// 上限を超えると挿入が最も古いエントリから追い出す。参照（`get`）では
/// 順序は変わらず、`put` による上書きだけが最新扱いになる。
pub struct OverlayCache<T: Entity> {
    entries: RwLock<LruCache<String, T>>,
    max_entries: usize,
    version: watch::Sender<u64>,
}

impl<T: Entity> OverlayCache<T> {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        let (version, _) = watch::channel(0);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            max_entries: capacity.get(),
            version,
        }
    }

    pub fn from_config(config: &OverlayConfig) -> Self {
        Self::new(config.max_entries)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// IDで上書き値を取得
    pub async fn get(&self, id: &str) -> Option<T> {
        let cache = self.entries.read().await;
        cache.peek(id).cloned()
    }

    /// 上書き値を登録（既存なら置き換えて最新扱いにする）
    pub async fn put(&self, entity: T) {
        let id = entity.entity_id().to_string();
        let displaced = {
            let mut cache = self.entries.write().await;
            cache.push(id.clone(), entity)
        };
        if let Some((evicted_id, _)) = displaced
            && evicted_id != id
        {
            trace!(evicted_id = %evicted_id, "overlay entry evicted");
        }
        self.bump_version();
    }

    pub async fn remove(&self, id: &str) -> Option<T> {
        let removed = {
            let mut cache = self.entries.write().await;
            cache.pop(id)
        };
        if removed.is_some() {
            self.bump_version();
        }
        removed
    }

    /// ページ内の各要素を上書き値で差し替える。順序は維持し、入力は変更しない。
    pub async fn apply_to(&self, page: &[T]) -> Vec<T> {
        let cache = self.entries.read().await;
        page.iter()
            .map(|item| {
                cache
                    .peek(item.entity_id())
                    .cloned()
                    .unwrap_or_else(|| item.clone())
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        let cache = self.entries.read().await;
        cache.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        {
            let mut cache = self.entries.write().await;
            cache.clear();
        }
        self.bump_version();
    }

    /// 内容が変わるたびに増える版数を購読する
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump_version(&self) {
        self.version.send_modify(|version| *version = version.wrapping_add(1));
    }
}
