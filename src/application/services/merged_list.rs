use crate::application::scope::ScreenScope;
use crate::application::services::pager::{Pager, PagerState};
use crate::domain::entities::Entity;
use crate::infrastructure::OverlayCache;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// ページャの出力にオーバーレイを重ね、非表示 ID を除いたリスト
///
/// ページャ・オーバーレイ・非表示集合のどれかが変わるたびに再計算する。
pub struct MergedList<T: Entity> {
    overlay: Arc<OverlayCache<T>>,
    hidden: watch::Sender<HashSet<String>>,
    merged: watch::Sender<PagerState<T>>,
}

impl<T: Entity> MergedList<T> {
    pub fn new(overlay: Arc<OverlayCache<T>>) -> Arc<Self> {
        let (hidden, _) = watch::channel(HashSet::new());
        let (merged, _) = watch::channel(PagerState::Initial);
        Arc::new(Self {
            overlay,
            hidden,
            merged,
        })
    }

    /// スコープが閉じるまで再計算を続けるタスクを起動する
    pub fn start(self: &Arc<Self>, scope: &ScreenScope, pager: &Pager<T>) {
        let this = Arc::clone(self);
        let mut pager_rx = pager.subscribe();
        let mut overlay_rx = self.overlay.subscribe();
        let mut hidden_rx = self.hidden.subscribe();

        scope.spawn(async move {
            loop {
                let state = pager_rx.borrow_and_update().clone();
                overlay_rx.mark_unchanged();
                hidden_rx.mark_unchanged();

                let merged = this.merge(state).await;
                trace!(items = merged.items().len(), "merged list recomputed");
                this.merged.send_replace(merged);

                let changed = tokio::select! {
                    changed = pager_rx.changed() => changed,
                    changed = overlay_rx.changed() => changed,
                    changed = hidden_rx.changed() => changed,
                };
                if changed.is_err() {
                    break;
                }
            }
        });
    }

    pub async fn merge(&self, state: PagerState<T>) -> PagerState<T> {
        let items = self.overlay.apply_to(state.items()).await;
        let hidden = self.hidden.borrow().clone();
        state.map_items(move |_| {
            items
                .into_iter()
                .filter(|item| !hidden.contains(item.entity_id()))
                .collect()
        })
    }

    pub fn hide(&self, id: &str) {
        self.hidden.send_if_modified(|hidden| hidden.insert(id.to_string()));
    }

    /// ページャを再取得し、成功したら新しい一覧に無い非表示 ID を手放す
    pub fn refresh(self: &Arc<Self>, scope: &ScreenScope, pager: &Pager<T>) -> JoinHandle<()> {
        let job = pager.refresh();
        let this = Arc::clone(self);
        let pager = pager.clone();
        scope.spawn(async move {
            if job.await.is_err() {
                return;
            }
            let state = pager.state();
            if matches!(state, PagerState::Success { .. } | PagerState::EndOfList(_)) {
                this.release_hidden(state.items());
            }
        })
    }

    /// `items` に含まれない ID を非表示集合から外す
    pub fn release_hidden(&self, items: &[T]) {
        self.hidden.send_if_modified(|hidden| {
            let before = hidden.len();
            hidden.retain(|id| items.iter().any(|item| item.entity_id() == id));
            if hidden.len() == before {
                return false;
            }
            debug!(released = before - hidden.len(), "hidden ids released");
            true
        });
    }

    pub fn hidden_count(&self) -> usize {
        self.hidden.borrow().len()
    }

    pub fn is_hidden(&self, id: &str) -> bool {
        self.hidden.borrow().contains(id)
    }

    pub fn current(&self) -> PagerState<T> {
        self.merged.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PagerState<T>> {
        self.merged.subscribe()
    }
}
