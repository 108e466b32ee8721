use crate::application::ports::PageLoader;
use crate::shared::{AppError, PagerConfig};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// ページャの公開状態。`items` は常に保持中のウィンドウ全体。
#[derive(Debug, Clone, PartialEq)]
pub enum PagerState<T> {
    Initial,
    Refreshing,
    LoadingMore(Vec<T>),
    Success { items: Vec<T>, has_more: bool },
    Error { message: String, items: Vec<T> },
    EndOfList(Vec<T>),
}

impl<T> PagerState<T> {
    pub fn items(&self) -> &[T] {
        match self {
            PagerState::Initial | PagerState::Refreshing => &[],
            PagerState::LoadingMore(items)
            | PagerState::EndOfList(items)
            | PagerState::Success { items, .. }
            | PagerState::Error { items, .. } => items,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, PagerState::Refreshing | PagerState::LoadingMore(_))
    }

    /// 状態の種別を保ったまま要素だけ差し替える
    pub fn map_items<U, F>(self, f: F) -> PagerState<U>
    where
        F: FnOnce(Vec<T>) -> Vec<U>,
    {
        match self {
            PagerState::Initial => PagerState::Initial,
            PagerState::Refreshing => PagerState::Refreshing,
            PagerState::LoadingMore(items) => PagerState::LoadingMore(f(items)),
            PagerState::Success { items, has_more } => PagerState::Success {
                items: f(items),
                has_more,
            },
            PagerState::Error { message, items } => PagerState::Error {
                message,
                items: f(items),
            },
            PagerState::EndOfList(items) => PagerState::EndOfList(f(items)),
        }
    }
}

pub type PageErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    Refresh,
    NextPage,
}

struct PagerCore<T> {
    current_page: usize,
    has_more: bool,
    is_loading: bool,
    items: Vec<T>,
    generation: u64,
    job: Option<CancellationToken>,
    last_failure: Option<LoadKind>,
}

impl<T> PagerCore<T> {
    fn new() -> Self {
        Self {
            current_page: 0,
            has_more: true,
            is_loading: false,
            items: Vec::new(),
            generation: 0,
            job: None,
            last_failure: None,
        }
    }

    /// 実行中のジョブを無効化して初期状態へ戻す
    fn invalidate(&mut self) {
        if let Some(job) = self.job.take() {
            job.cancel();
        }
        self.generation = self.generation.wrapping_add(1);
        self.current_page = 0;
        self.has_more = true;
        self.is_loading = false;
        self.items.clear();
        self.last_failure = None;
    }
}

struct PagerInner<T> {
    config: PagerConfig,
    loader: Arc<dyn PageLoader<T>>,
    on_error: Option<PageErrorCallback>,
    parent: Option<CancellationToken>,
    state: watch::Sender<PagerState<T>>,
    core: Mutex<PagerCore<T>>,
}

/// ページ取得関数を、観測可能で上限付きのリストに変換するページャ
///
/// 同時に動くジョブは一つだけ。`refresh` と `reset` は実行中のジョブを
/// 取り消し、取り消されたジョブの結果は状態に反映されない。
pub struct Pager<T> {
    inner: Arc<PagerInner<T>>,
}

impl<T> Clone for Pager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct PagerBuilder<T> {
    config: PagerConfig,
    loader: Arc<dyn PageLoader<T>>,
    on_error: Option<PageErrorCallback>,
    parent: Option<CancellationToken>,
}

impl<T: Clone + Send + Sync + 'static> PagerBuilder<T> {
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// 親トークンが取り消されると実行中のジョブも止まる
    pub fn cancel_with(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn build(self) -> Pager<T> {
        let (state, _) = watch::channel(PagerState::Initial);
        let config = PagerConfig {
            page_size: self.config.page_size.max(1),
            max_cached_items: self.config.max_cached_items.max(1),
        };
        Pager {
            inner: Arc::new(PagerInner {
                config,
                loader: self.loader,
                on_error: self.on_error,
                parent: self.parent,
                state,
                core: Mutex::new(PagerCore::new()),
            }),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Pager<T> {
    pub fn new(config: PagerConfig, loader: Arc<dyn PageLoader<T>>) -> Self {
        Self::builder(config, loader).build()
    }

    pub fn builder(config: PagerConfig, loader: Arc<dyn PageLoader<T>>) -> PagerBuilder<T> {
        PagerBuilder {
            config,
            loader,
            on_error: None,
            parent: None,
        }
    }

    pub fn config(&self) -> &PagerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> PagerState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PagerState<T>> {
        self.inner.state.subscribe()
    }

    pub fn current_items(&self) -> Vec<T> {
        self.inner.core.lock().items.clone()
    }

    pub fn is_at_end(&self) -> bool {
        !self.inner.core.lock().has_more
    }

    pub fn is_loading(&self) -> bool {
        self.inner.core.lock().is_loading
    }

    /// 次のページを取得する。読み込み中または終端に達していれば何もしない。
    pub fn load_next_page(&self) -> Option<JoinHandle<()>> {
        let (generation, page, token) = {
            let mut core = self.inner.core.lock();
            if core.is_loading || !core.has_more {
                return None;
            }
            core.is_loading = true;
            let token = self.new_job_token();
            core.job = Some(token.clone());
            self.inner
                .state
                .send_replace(PagerState::LoadingMore(core.items.clone()));
            (core.generation, core.current_page, token)
        };

        debug!(page, "loading next page");
        Some(self.spawn_job(LoadKind::NextPage, generation, page, token))
    }

    /// 実行中のジョブを取り消し、先頭ページから取り直す
    pub fn refresh(&self) -> JoinHandle<()> {
        let (generation, token) = {
            let mut core = self.inner.core.lock();
            core.invalidate();
            core.is_loading = true;
            let token = self.new_job_token();
            core.job = Some(token.clone());
            self.inner.state.send_replace(PagerState::Refreshing);
            (core.generation, token)
        };

        debug!("refreshing pager");
        self.spawn_job(LoadKind::Refresh, generation, 0, token)
    }

    pub fn reset(&self) {
        let mut core = self.inner.core.lock();
        core.invalidate();
        self.inner.state.send_replace(PagerState::Initial);
    }

    /// 直前に失敗した要求を、蓄積済みの要素を保ったまま再発行する
    pub fn retry(&self) -> Option<JoinHandle<()>> {
        let failed = self.inner.core.lock().last_failure;
        match failed? {
            LoadKind::Refresh => Some(self.refresh()),
            LoadKind::NextPage => self.load_next_page(),
        }
    }

    fn new_job_token(&self) -> CancellationToken {
        match &self.inner.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        }
    }

    fn spawn_job(
        &self,
        kind: LoadKind,
        generation: u64,
        page: usize,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let loader = Arc::clone(&self.inner.loader);
        let page_size = self.inner.config.page_size;
        let inner: Weak<PagerInner<T>> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = loader.load_page(page, page_size) => result,
            };
            if let Some(inner) = inner.upgrade() {
                inner.complete(kind, generation, &token, result);
            }
        })
    }
}

impl<T: Clone + Send + Sync + 'static> PagerInner<T> {
    fn complete(
        &self,
        kind: LoadKind,
        generation: u64,
        token: &CancellationToken,
        result: Result<Vec<T>, AppError>,
    ) {
        let mut core = self.core.lock();
        if token.is_cancelled() || core.generation != generation {
            debug!(?kind, "discarding superseded page result");
            return;
        }
        core.is_loading = false;
        core.job = None;

        match result {
            Ok(page) => {
                let returned = page.len();
                core.items.extend(page);
                core.current_page += 1;
                core.has_more = returned == self.config.page_size;
                core.last_failure = None;

                let overflow = core.items.len().saturating_sub(self.config.max_cached_items);
                if overflow > 0 {
                    core.items.drain(..overflow);
                }

                debug!(
                    page = core.current_page - 1,
                    returned,
                    total = core.items.len(),
                    has_more = core.has_more,
                    "page loaded"
                );
                let items = core.items.clone();
                let state = if core.has_more {
                    PagerState::Success {
                        items,
                        has_more: true,
                    }
                } else {
                    PagerState::EndOfList(items)
                };
                self.state.send_replace(state);
            }
            Err(error) => {
                warn!(?kind, page = core.current_page, error = %error, "page load failed");
                core.last_failure = Some(kind);
                let message = error.user_message();
                self.state.send_replace(PagerState::Error {
                    message: message.clone(),
                    items: core.items.clone(),
                });
                drop(core);

                if let Some(on_error) = &self.on_error {
                    on_error(&message);
                }
            }
        }
    }
}
