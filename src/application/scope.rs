use parking_lot::Mutex;
use std::future::Future;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 画面のライフサイクルに紐づくタスクスコープ
///
/// スコープ経由で起動したタスクは `close` または破棄時にまとめて停止する。
#[derive(Debug)]
pub struct ScreenScope {
    name: &'static str,
    token: CancellationToken,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl ScreenScope {
    pub fn new(name: &'static str) -> Self {
        Self::with_token(name, CancellationToken::new())
    }

    fn with_token(name: &'static str, token: CancellationToken) -> Self {
        Self {
            name,
            token,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// 親スコープが閉じると一緒に閉じる子スコープ
    pub fn child(&self, name: &'static str) -> Self {
        Self::with_token(name, self.token.child_token())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// スコープが閉じられるまで `fut` を実行する
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle.abort_handle());
        handle
    }

    pub fn close(&self) {
        if !self.token.is_cancelled() {
            debug!(scope = self.name, "closing screen scope");
        }
        self.token.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for ScreenScope {
    fn drop(&mut self) {
        self.close();
    }
}
