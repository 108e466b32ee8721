use crate::application::ports::{PageLoader, PostInteractionGateway};
use crate::application::scope::ScreenScope;
use crate::application::services::merged_list::MergedList;
use crate::application::services::mutation::{MutationOutcome, OptimisticMutator};
use crate::application::services::pager::{Pager, PagerState};
use crate::application::services::retry::{RetryPolicy, RetryingPageLoader};
use crate::domain::entities::{MutationEvent, Post, PostEvent, Reactable};
use crate::domain::value_objects::ReactionType;
use crate::infrastructure::{EventBus, EventSubscription, OverlayCache};
use crate::shared::{AppConfig, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// フィード画面のサービス
///
/// 取得済みページにオーバーレイを重ねたリストを公開し、リアクションや
/// 投票を楽観的に反映する。他画面からの変更はイベントバス経由で受け取る。
pub struct FeedService {
    pager: Pager<Post>,
    list: Arc<MergedList<Post>>,
    mutator: Arc<OptimisticMutator<Post>>,
    gateway: Arc<dyn PostInteractionGateway>,
    bus: Arc<EventBus<PostEvent>>,
    retry: RetryPolicy,
    last_error: Arc<Mutex<Option<String>>>,
    scope: ScreenScope,
}

impl FeedService {
    pub fn new(
        config: &AppConfig,
        loader: Arc<dyn PageLoader<Post>>,
        gateway: Arc<dyn PostInteractionGateway>,
        bus: Arc<EventBus<PostEvent>>,
    ) -> Self {
        let scope = ScreenScope::new("feed");
        let overlay = Arc::new(OverlayCache::from_config(&config.overlay));
        let retry = RetryPolicy::new(config.retry);
        let last_error = Arc::new(Mutex::new(None));

        let recorder = Arc::clone(&last_error);
        let pager = Pager::builder(
            config.pager,
            Arc::new(RetryingPageLoader::new(loader, retry)),
        )
        .on_error(move |message| *recorder.lock() = Some(message.to_string()))
        .cancel_with(scope.token())
        .build();

        let list = MergedList::new(Arc::clone(&overlay));
        list.start(&scope, &pager);
        let mutator = Arc::new(OptimisticMutator::new(overlay, Arc::clone(&bus), retry));
        spawn_bus_listener(
            &scope,
            bus.subscribe_as(mutator.origin()),
            Arc::clone(&mutator),
            Arc::clone(&list),
        );

        Self {
            pager,
            list,
            mutator,
            gateway,
            bus,
            retry,
            last_error,
            scope,
        }
    }

    pub fn pager(&self) -> &Pager<Post> {
        &self.pager
    }

    /// オーバーレイ適用済みの投稿リストを購読する
    pub fn subscribe_posts(&self) -> watch::Receiver<PagerState<Post>> {
        self.list.subscribe()
    }

    /// 現在のページャ状態とオーバーレイから即座に組み立てたリスト
    pub async fn current_posts(&self) -> PagerState<Post> {
        self.list.merge(self.pager.state()).await
    }

    pub async fn find_post(&self, post_id: &str) -> Option<Post> {
        if self.list.is_hidden(post_id) {
            return None;
        }
        if let Some(post) = self.mutator.overlay().get(post_id).await {
            return Some(post);
        }
        self.pager
            .current_items()
            .into_iter()
            .find(|post| post.id == post_id)
    }

    pub fn load_next_page(&self) -> Option<JoinHandle<()>> {
        self.pager.load_next_page()
    }

    /// 先頭から取り直す。削除済みとして隠した ID は新しい一覧に無ければ解除する。
    pub fn refresh(&self) -> JoinHandle<()> {
        *self.last_error.lock() = None;
        self.list.refresh(&self.scope, &self.pager)
    }

    pub fn retry_page(&self) -> Option<JoinHandle<()>> {
        self.pager.retry()
    }

    pub fn reset(&self) {
        self.pager.reset();
    }

    /// 直近のページ取得エラー
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// 上書き中の投稿数
    pub async fn modified_count(&self) -> usize {
        self.mutator.overlay().len().await
    }

    pub async fn like_post(&self, post: &Post) -> MutationOutcome<Post> {
        self.react_to_post(post, ReactionType::Like).await
    }

    pub async fn react_to_post(
        &self,
        post: &Post,
        reaction: ReactionType,
    ) -> MutationOutcome<Post> {
        let gateway = Arc::clone(&self.gateway);
        let outcome = self
            .mutator
            .mutate(
                post,
                |current| Ok(current.with_reaction_toggled(reaction)),
                |mutation| {
                    let gateway = Arc::clone(&gateway);
                    async move {
                        gateway
                            .toggle_reaction(
                                &mutation.after.id,
                                reaction,
                                mutation.before.user_reaction,
                            )
                            .await
                    }
                },
            )
            .await;

        if let MutationOutcome::Confirmed(updated) = &outcome {
            self.bus.emit_from(
                self.mutator.origin(),
                MutationEvent::Liked {
                    id: updated.id.clone(),
                    reaction: updated.user_reaction(),
                },
            );
        }
        outcome
    }

    pub async fn vote_poll(&self, post: &Post, option_index: usize) -> MutationOutcome<Post> {
        let gateway = Arc::clone(&self.gateway);
        let outcome = self
            .mutator
            .mutate(
                post,
                |current| current.with_poll_vote(option_index),
                |mutation| {
                    let gateway = Arc::clone(&gateway);
                    async move { gateway.submit_vote(&mutation.after.id, option_index).await }
                },
            )
            .await;

        if outcome.is_confirmed() {
            self.bus.emit_from(
                self.mutator.origin(),
                MutationEvent::PollVoted {
                    id: post.id.clone(),
                    option_index: Some(option_index),
                },
            );
        }
        outcome
    }

    pub async fn revoke_vote(&self, post: &Post) -> MutationOutcome<Post> {
        let gateway = Arc::clone(&self.gateway);
        let outcome = self
            .mutator
            .mutate(
                post,
                |current| current.with_vote_revoked(),
                |mutation| {
                    let gateway = Arc::clone(&gateway);
                    async move { gateway.revoke_vote(&mutation.after.id).await }
                },
            )
            .await;

        if outcome.is_confirmed() {
            self.bus.emit_from(
                self.mutator.origin(),
                MutationEvent::PollVoted {
                    id: post.id.clone(),
                    option_index: None,
                },
            );
        }
        outcome
    }

    /// 削除はサーバー確定後に反映する
    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.retry
            .execute(|_| self.gateway.delete_post(post_id))
            .await
            .into_result()?;

        self.mutator.discard(post_id).await;
        self.list.hide(post_id);
        self.bus.emit_from(
            self.mutator.origin(),
            MutationEvent::Deleted {
                id: post_id.to_string(),
            },
        );
        info!(post_id, "post deleted");
        Ok(())
    }

    pub fn close(&self) {
        self.scope.close();
    }
}

/// 他画面の変更を取り込む。自画面の発行分は購読側で除外済み。
fn spawn_bus_listener(
    scope: &ScreenScope,
    mut events: EventSubscription<PostEvent>,
    mutator: Arc<OptimisticMutator<Post>>,
    list: Arc<MergedList<Post>>,
) {
    scope.spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                MutationEvent::Updated(post) => mutator.accept(post).await,
                MutationEvent::Deleted { id } => {
                    mutator.discard(&id).await;
                    list.hide(&id);
                }
                MutationEvent::Liked { .. }
                | MutationEvent::PollVoted { .. }
                | MutationEvent::Failed { .. } => {}
            }
        }
        debug!("feed event listener stopped");
    });
}
