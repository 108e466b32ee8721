use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

/// イベントの発行元となる画面の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Origin(u64);

impl Origin {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Origin(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct Subscriber<E> {
    origin: Option<Origin>,
    tx: mpsc::UnboundedSender<E>,
}

/// 画面間でミューテーションを配る放送チャネル
///
/// 購読者ごとに無制限キューを持つため、取りこぼしも背圧もない。配信順は
/// `emit` の呼び出し順と一致する。購読前のイベントは再送しない。
/// `emit_from` で発行したイベントは同じ `Origin` の購読者には届かない。
pub struct EventBus<E> {
    subscribers: Mutex<Vec<Subscriber<E>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// 現在の購読者全員へ配信し、閉じた購読者は取り除く。配信できた数を返す。
    pub fn emit(&self, event: E) -> usize {
        self.deliver(None, event)
    }

    /// 発行元自身の購読者を除いて配信する
    pub fn emit_from(&self, origin: Origin, event: E) -> usize {
        self.deliver(Some(origin), event)
    }

    pub fn subscribe(&self) -> EventSubscription<E> {
        self.register(None)
    }

    /// `origin` が `emit_from` したイベントを受け取らない購読
    pub fn subscribe_as(&self, origin: Origin) -> EventSubscription<E> {
        self.register(Some(origin))
    }

    /// 破棄済みの購読者を除いた数
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| !subscriber.tx.is_closed());
        subscribers.len()
    }

    fn register(&self, origin: Option<Origin>) -> EventSubscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber { origin, tx });
        EventSubscription { rx }
    }

    fn deliver(&self, origin: Option<Origin>, event: E) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain(|subscriber| {
            if origin.is_some() && subscriber.origin == origin {
                return !subscriber.tx.is_closed();
            }
            let sent = subscriber.tx.send(event.clone()).is_ok();
            if sent {
                delivered += 1;
            }
            sent
        });
        trace!(delivered, "mutation event emitted");
        delivered
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventSubscription<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> EventSubscription<E> {
    /// 次のイベントを待つ。バスが破棄されると `None`
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<E> {
        UnboundedReceiverStream::new(self.rx)
    }
}
