use crate::application::services::retry::RetryPolicy;
use crate::domain::entities::{Entity, MutationEvent};
use crate::infrastructure::{EventBus, Origin, OverlayCache};
use crate::shared::{AppError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// 一件のミューテーションが辿る段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    OptimisticallyApplied,
    Confirmed,
    RolledBack,
}

impl MutationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationPhase::Idle => "idle",
            MutationPhase::OptimisticallyApplied => "optimistically_applied",
            MutationPhase::Confirmed => "confirmed",
            MutationPhase::RolledBack => "rolled_back",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
    /// リモート呼び出しが成功し、楽観値がそのまま確定した
    Confirmed(T),
    /// リモート呼び出しが失敗し、変更前の値に戻した
    RolledBack { restored: T, error: AppError },
    /// 楽観値の計算自体が拒否された（状態は変わっていない）
    Rejected(AppError),
}

impl<T> MutationOutcome<T> {
    pub fn phase(&self) -> MutationPhase {
        match self {
            MutationOutcome::Confirmed(_) => MutationPhase::Confirmed,
            MutationOutcome::RolledBack { .. } => MutationPhase::RolledBack,
            MutationOutcome::Rejected(_) => MutationPhase::Idle,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, MutationOutcome::Confirmed(_))
    }

    pub fn entity(&self) -> Option<&T> {
        match self {
            MutationOutcome::Confirmed(entity) => Some(entity),
            MutationOutcome::RolledBack { restored, .. } => Some(restored),
            MutationOutcome::Rejected(_) => None,
        }
    }

    pub fn error(&self) -> Option<&AppError> {
        match self {
            MutationOutcome::Confirmed(_) => None,
            MutationOutcome::RolledBack { error, .. } | MutationOutcome::Rejected(error) => {
                Some(error)
            }
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            MutationOutcome::Confirmed(entity) => Ok(entity),
            MutationOutcome::RolledBack { error, .. } | MutationOutcome::Rejected(error) => {
                Err(error)
            }
        }
    }
}

/// リモート呼び出しに渡す変更前後の値
#[derive(Debug, Clone)]
pub struct Mutation<T> {
    pub before: T,
    pub after: T,
}

/// 反映した値を受け取るコールバック
pub type ChangeObserver<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// 楽観的更新の適用、配信、リモート確定、失敗時の巻き戻しを受け持つ
///
/// 同じ ID へのミューテーションは直列化され、後続は先行分の結果を
/// 基準に計算する。他画面から届いた値も `accept` で同じ順序に並ぶ。
/// 配信は `origin` 付きで行うため、同じ画面の購読者には戻ってこない。
pub struct OptimisticMutator<T: Entity> {
    overlay: Arc<OverlayCache<T>>,
    bus: Arc<EventBus<MutationEvent<T>>>,
    retry: RetryPolicy,
    origin: Origin,
    observer: Option<ChangeObserver<T>>,
    locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl<T: Entity> OptimisticMutator<T> {
    pub fn new(
        overlay: Arc<OverlayCache<T>>,
        bus: Arc<EventBus<MutationEvent<T>>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            overlay,
            bus,
            retry,
            origin: Origin::next(),
            observer: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 画面内の複数のミューテーターで発行元を揃える
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// オーバーレイへ書き込むたびに、ロックを保持したまま呼ばれる
    pub fn on_change(mut self, observer: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn overlay(&self) -> &Arc<OverlayCache<T>> {
        &self.overlay
    }

    /// 他画面やサーバーから届いた値を、進行中のミューテーションの後に反映する
    pub async fn accept(&self, entity: T) {
        let lock = self.entity_lock(entity.entity_id());
        let _guard = lock.lock().await;
        self.store(entity).await;
    }

    /// 進行中のミューテーションの後にオーバーレイから取り除く
    pub async fn discard(&self, id: &str) -> Option<T> {
        let lock = self.entity_lock(id);
        let _guard = lock.lock().await;
        self.overlay.remove(id).await
    }

    /// 現時点で最も新しい値。オーバーレイに無ければ `fallback` を返す。
    pub async fn latest(&self, fallback: &T) -> T {
        self.overlay
            .get(fallback.entity_id())
            .await
            .unwrap_or_else(|| fallback.clone())
    }

    /// `compute` で楽観値を求めて即座に反映し、`remote` で確定させる。
    ///
    /// `remote` は試行ごとに呼ばれる。失敗時は変更前の値を再配信し、
    /// 続けて `Failed` を配信する。
    pub async fn mutate<C, R, Fut>(
        &self,
        current: &T,
        compute: C,
        mut remote: R,
    ) -> MutationOutcome<T>
    where
        C: FnOnce(&T) -> Result<T>,
        R: FnMut(Mutation<T>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let id = current.entity_id().to_string();
        let lock = self.entity_lock(&id);
        let _guard = lock.lock().await;

        let before = self.latest(current).await;
        let after = match compute(&before) {
            Ok(after) => after,
            Err(error) => {
                debug!(id = %id, error = %error, "mutation rejected");
                return MutationOutcome::Rejected(error);
            }
        };

        self.store(after.clone()).await;
        self.bus.emit_from(self.origin, MutationEvent::Updated(after.clone()));
        debug!(
            id = %id,
            phase = MutationPhase::OptimisticallyApplied.as_str(),
            "optimistic update applied"
        );

        let mutation = Mutation {
            before: before.clone(),
            after: after.clone(),
        };
        let outcome = self.retry.execute(|_| remote(mutation.clone())).await;

        match outcome.into_result() {
            Ok(()) => {
                info!(id = %id, phase = MutationPhase::Confirmed.as_str(), "mutation confirmed");
                MutationOutcome::Confirmed(after)
            }
            Err(error) => {
                warn!(
                    id = %id,
                    phase = MutationPhase::RolledBack.as_str(),
                    error = %error,
                    "mutation failed, rolling back"
                );
                self.store(before.clone()).await;
                self.bus.emit_from(self.origin, MutationEvent::Updated(before.clone()));
                self.bus.emit_from(
                    self.origin,
                    MutationEvent::Failed {
                        id,
                        message: error.user_message(),
                    },
                );
                MutationOutcome::RolledBack {
                    restored: before,
                    error,
                }
            }
        }
    }

    async fn store(&self, entity: T) {
        self.overlay.put(entity.clone()).await;
        if let Some(observer) = &self.observer {
            observer(&entity);
        }
    }

    fn entity_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(id).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(id.to_string(), Arc::downgrade(&lock));
        lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{PollOption, Post, PostEvent, Reactable};
    use crate::domain::value_objects::{ReactionSummary, ReactionType};
    use crate::shared::{RetryConfig, ValidationFailureKind};
    use chrono::Utc;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    fn sample_post() -> Post {
        let mut post = Post::new_with_id(
            "post-1".into(),
            "hello".into(),
            "author-1".into(),
            Utc::now(),
        );
        post.like_count = 5;
        post.reactions = ReactionSummary::new().with(ReactionType::Like, 5);
        post
    }

    fn mutator() -> (OptimisticMutator<Post>, Arc<EventBus<PostEvent>>) {
        let bus = EventBus::shared();
        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        });
        (
            OptimisticMutator::new(Arc::new(OverlayCache::new(10)), Arc::clone(&bus), retry),
            bus,
        )
    }

    fn drain(sub: &mut crate::infrastructure::EventSubscription<PostEvent>) -> Vec<PostEvent> {
        let mut events = Vec::new();
        while let Some(event) = sub.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn failed_like_rolls_back_everywhere() {
        let (mutator, bus) = mutator();
        let mut sub = bus.subscribe();
        let post = sample_post();

        let outcome = mutator
            .mutate(
                &post,
                |p| Ok(p.with_reaction_toggled(ReactionType::Like)),
                |_| async { Err(AppError::Internal("server rejected".into())) },
            )
            .await;

        assert_eq!(outcome.phase(), MutationPhase::RolledBack);
        assert_eq!(outcome.entity(), Some(&post));
        assert_eq!(mutator.overlay().get("post-1").await, Some(post.clone()));

        let events = drain(&mut sub);
        assert_eq!(events.len(), 3);
        match &events[0] {
            MutationEvent::Updated(optimistic) => {
                assert_eq!(optimistic.like_count, 6);
                assert_eq!(optimistic.user_reaction, Some(ReactionType::Like));
                assert_eq!(optimistic.reactions.count(ReactionType::Like), 6);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(events[1], MutationEvent::Updated(post));
        assert!(matches!(&events[2], MutationEvent::Failed { id, .. } if id == "post-1"));
    }

    #[tokio::test]
    async fn second_vote_is_rejected_without_side_effects() {
        let (mutator, bus) = mutator();
        let post = sample_post().with_poll(vec![PollOption::new("a", 3), PollOption::new("b", 1)]);

        let voted = mutator
            .mutate(&post, |p| p.with_poll_vote(1), |_| async { Ok(()) })
            .await
            .into_result()
            .expect("first vote confirmed");
        let votes: Vec<u32> = voted
            .poll_options
            .as_ref()
            .expect("poll")
            .iter()
            .map(|o| o.votes)
            .collect();
        assert_eq!(votes, vec![3, 2]);
        assert_eq!(voted.user_poll_vote, Some(1));

        let mut sub = bus.subscribe();
        let remote_calls = AtomicU32::new(0);
        let outcome = mutator
            .mutate(
                &post,
                |p| p.with_poll_vote(0),
                |_| {
                    remote_calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
            )
            .await;

        assert!(matches!(
            outcome,
            MutationOutcome::Rejected(AppError::ValidationError {
                kind: ValidationFailureKind::AlreadyVoted,
                ..
            })
        ));
        assert_eq!(remote_calls.load(Ordering::SeqCst), 0);
        assert!(drain(&mut sub).is_empty());
        assert_eq!(mutator.overlay().get("post-1").await, Some(voted));
    }

    #[tokio::test]
    async fn remote_receives_before_and_after() {
        let (mutator, _bus) = mutator();
        let post = sample_post();
        let seen = Mutex::new(None);

        mutator
            .mutate(
                &post,
                |p| Ok(p.with_reaction_toggled(ReactionType::Wow)),
                |m| {
                    *seen.lock() = Some((m.before.user_reaction, m.after.user_reaction));
                    async { Ok(()) }
                },
            )
            .await;

        assert_eq!(*seen.lock(), Some((None, Some(ReactionType::Wow))));
    }

    #[tokio::test]
    async fn same_entity_mutations_are_serialized() {
        let (mutator, _bus) = mutator();
        let mutator = Arc::new(mutator);
        let post = sample_post();
        let release = Arc::new(Notify::new());

        let first = {
            let mutator = Arc::clone(&mutator);
            let post = post.clone();
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                mutator
                    .mutate(
                        &post,
                        |p| Ok(p.with_reaction_toggled(ReactionType::Like)),
                        |_| {
                            let release = Arc::clone(&release);
                            async move {
                                release.notified().await;
                                Ok(())
                            }
                        },
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;

        let second = {
            let mutator = Arc::clone(&mutator);
            let post = post.clone();
            tokio::spawn(async move {
                mutator
                    .mutate(
                        &post,
                        |p| Ok(p.with_reaction_toggled(ReactionType::Like)),
                        |_| async { Ok(()) },
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        release.notify_one();

        let first = first.await.expect("first task");
        let second = second.await.expect("second task");
        assert_eq!(first.entity().map(|p| p.like_count), Some(6));
        // 二件目は一件目の結果を基準にするので、取り消しになる
        assert_eq!(second.entity(), Some(&post));
    }

    #[tokio::test]
    async fn accepted_value_waits_for_inflight_rollback() {
        let (mutator, _bus) = mutator();
        let mutator = Arc::new(mutator);
        let post = sample_post();
        let release = Arc::new(Notify::new());

        let first = {
            let mutator = Arc::clone(&mutator);
            let post = post.clone();
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                mutator
                    .mutate(
                        &post,
                        |p| Ok(p.with_reaction_toggled(ReactionType::Like)),
                        |_| {
                            let release = Arc::clone(&release);
                            async move {
                                release.notified().await;
                                Err(AppError::Internal("server rejected".into()))
                            }
                        },
                    )
                    .await
            })
        };
        while mutator.overlay().get("post-1").await.map(|p| p.like_count) != Some(6) {
            tokio::task::yield_now().await;
        }

        let mut external = post.clone();
        external.comment_count = 9;
        let accepted = {
            let mutator = Arc::clone(&mutator);
            let external = external.clone();
            tokio::spawn(async move { mutator.accept(external).await })
        };
        tokio::task::yield_now().await;
        release.notify_one();

        assert_eq!(first.await.expect("first task").phase(), MutationPhase::RolledBack);
        accepted.await.expect("accept task");
        assert_eq!(mutator.overlay().get("post-1").await, Some(external));
    }

    #[tokio::test]
    async fn observer_sees_optimistic_and_restored_values() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let (mutator, _bus) = mutator();
        let mutator = mutator.on_change(move |p: &Post| recorder.lock().push(p.like_count));

        mutator
            .mutate(
                &sample_post(),
                |p| Ok(p.with_reaction_toggled(ReactionType::Like)),
                |_| async { Err(AppError::Internal("nope".into())) },
            )
            .await;
        mutator.accept(sample_post()).await;

        assert_eq!(*seen.lock(), vec![6, 5, 5]);
    }

    #[tokio::test]
    async fn events_skip_subscribers_of_the_same_origin() {
        let (mutator, bus) = mutator();
        let mut own = bus.subscribe_as(mutator.origin());
        let mut other = bus.subscribe();

        mutator
            .mutate(
                &sample_post(),
                |p| Ok(p.with_reaction_toggled(ReactionType::Like)),
                |_| async { Ok(()) },
            )
            .await;

        assert!(own.try_recv().is_none());
        assert!(matches!(other.try_recv(), Some(MutationEvent::Updated(p)) if p.like_count == 6));
    }

    fn reaction_strategy() -> impl Strategy<Value = ReactionType> {
        prop::sample::select(ReactionType::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn rollback_restores_original(
            like_count in 0u32..10,
            prior in prop::option::of(reaction_strategy()),
            requested in reaction_strategy(),
        ) {
            let mut post = sample_post();
            post.like_count = like_count;
            post.user_reaction = prior;
            post.reactions = ReactionSummary::new();
            if let Some(prior) = prior {
                post.reactions.increment(prior);
            }

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("runtime");
            let restored = rt.block_on(async {
                let (mutator, _bus) = mutator();
                mutator
                    .mutate(
                        &post,
                        |p| Ok(p.with_reaction_toggled(requested)),
                        |_| async { Err(AppError::Internal("nope".into())) },
                    )
                    .await
            });
            prop_assert_eq!(restored.entity(), Some(&post));
            prop_assert_eq!(restored.phase(), MutationPhase::RolledBack);
        }
    }
}
