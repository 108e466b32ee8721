use crate::application::ports::{CommentGateway, PageLoader, PostInteractionGateway};
use crate::application::scope::ScreenScope;
use crate::application::services::merged_list::MergedList;
use crate::application::services::mutation::{MutationOutcome, OptimisticMutator};
use crate::application::services::pager::{Pager, PagerState};
use crate::application::services::retry::{RetryPolicy, RetryingPageLoader};
use crate::domain::entities::{Comment, CommentEvent, MutationEvent, Post, PostEvent, Reactable};
use crate::domain::value_objects::ReactionType;
use crate::infrastructure::{EventBus, EventSubscription, OverlayCache};
use crate::shared::{AppConfig, AppError, Result, ValidationFailureKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// 一つの投稿に紐づくコメント一覧を取得するローダー
struct CommentPageLoader {
    gateway: Arc<dyn CommentGateway>,
    post_id: String,
}

#[async_trait]
impl PageLoader<Comment> for CommentPageLoader {
    async fn load_page(&self, page: usize, page_size: usize) -> Result<Vec<Comment>> {
        self.gateway
            .list_comments(&self.post_id, page, page_size)
            .await
    }
}

/// 投稿詳細画面のサービス
///
/// 投稿本体への操作は楽観的に反映してバスへ流す。コメントはスレッド単位で
/// ページングされるため、確定後は `invalidate_comments` で取り直す。
pub struct PostDetailService {
    post_id: String,
    post: watch::Sender<Option<Post>>,
    post_mutator: Arc<OptimisticMutator<Post>>,
    post_bus: Arc<EventBus<PostEvent>>,
    posts: Arc<dyn PostInteractionGateway>,
    comments: Arc<dyn CommentGateway>,
    comment_pager: Pager<Comment>,
    comment_list: Arc<MergedList<Comment>>,
    comment_mutator: Arc<OptimisticMutator<Comment>>,
    comment_bus: Arc<EventBus<CommentEvent>>,
    refresh_trigger: watch::Sender<u64>,
    submitting_comment: AtomicBool,
    comment_actions: Mutex<HashMap<String, usize>>,
    retry: RetryPolicy,
    scope: ScreenScope,
}

impl PostDetailService {
    pub fn new(
        config: &AppConfig,
        post_id: impl Into<String>,
        posts: Arc<dyn PostInteractionGateway>,
        comments: Arc<dyn CommentGateway>,
        post_bus: Arc<EventBus<PostEvent>>,
        comment_bus: Arc<EventBus<CommentEvent>>,
    ) -> Self {
        let post_id = post_id.into();
        let scope = ScreenScope::new("post_detail");
        let retry = RetryPolicy::new(config.retry);

        let post_overlay = Arc::new(OverlayCache::from_config(&config.overlay));
        let comment_overlay = Arc::new(OverlayCache::from_config(&config.overlay));
        let (post, _) = watch::channel(None);
        let (refresh_trigger, _) = watch::channel(0);

        let comment_loader = Arc::new(CommentPageLoader {
            gateway: Arc::clone(&comments),
            post_id: post_id.clone(),
        });
        let comment_pager = Pager::builder(
            config.comments,
            Arc::new(RetryingPageLoader::new(comment_loader, retry)),
        )
        .cancel_with(scope.token())
        .build();

        let comment_list = MergedList::new(Arc::clone(&comment_overlay));
        comment_list.start(&scope, &comment_pager);

        let shown = post.clone();
        let watched_id = post_id.clone();
        let post_mutator = Arc::new(
            OptimisticMutator::new(post_overlay, Arc::clone(&post_bus), retry).on_change(
                move |current: &Post| {
                    if current.id == watched_id {
                        shown.send_replace(Some(current.clone()));
                    }
                },
            ),
        );
        let comment_mutator = Arc::new(
            OptimisticMutator::new(comment_overlay, Arc::clone(&comment_bus), retry)
                .with_origin(post_mutator.origin()),
        );

        spawn_post_listener(
            &scope,
            post_bus.subscribe_as(post_mutator.origin()),
            post_id.clone(),
            Arc::clone(&post_mutator),
            post.clone(),
        );
        spawn_comment_listener(
            &scope,
            comment_bus.subscribe_as(post_mutator.origin()),
            post_id.clone(),
            Arc::clone(&comment_mutator),
            Arc::clone(&comment_list),
        );

        Self {
            post_id,
            post,
            post_mutator,
            post_bus,
            posts,
            comments,
            comment_pager,
            comment_list,
            comment_mutator,
            comment_bus,
            refresh_trigger,
            submitting_comment: AtomicBool::new(false),
            comment_actions: Mutex::new(HashMap::new()),
            retry,
            scope,
        }
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    /// サーバーから投稿を取得して表示中の値を置き換える
    pub async fn load_post(&self) -> Result<Post> {
        let post = self
            .retry
            .execute(|_| self.posts.fetch_post(&self.post_id))
            .await
            .into_result()?;
        self.show(post.clone()).await;
        debug!(post_id = %self.post_id, "post loaded");
        Ok(post)
    }

    /// 一覧で既に持っている値で画面を開く
    pub async fn open_with(&self, post: Post) {
        self.show(post).await;
    }

    pub async fn current_post(&self) -> Option<Post> {
        self.post_mutator.overlay().get(&self.post_id).await
    }

    pub fn subscribe_post(&self) -> watch::Receiver<Option<Post>> {
        self.post.subscribe()
    }

    pub async fn toggle_reaction(&self, reaction: ReactionType) -> MutationOutcome<Post> {
        let Some(post) = self.current_post().await else {
            return self.missing_post();
        };
        let gateway = Arc::clone(&self.posts);
        let outcome = self
            .post_mutator
            .mutate(
                &post,
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
            self.post_bus.emit_from(
                self.post_mutator.origin(),
                MutationEvent::Liked {
                    id: updated.id.clone(),
                    reaction: updated.user_reaction(),
                },
            );
        }
        outcome
    }

    pub async fn vote_poll(&self, option_index: usize) -> MutationOutcome<Post> {
        let Some(post) = self.current_post().await else {
            return self.missing_post();
        };
        let gateway = Arc::clone(&self.posts);
        let outcome = self
            .post_mutator
            .mutate(
                &post,
                |current| current.with_poll_vote(option_index),
                |mutation| {
                    let gateway = Arc::clone(&gateway);
                    async move { gateway.submit_vote(&mutation.after.id, option_index).await }
                },
            )
            .await;

        if outcome.is_confirmed() {
            self.post_bus.emit_from(
                self.post_mutator.origin(),
                MutationEvent::PollVoted {
                    id: self.post_id.clone(),
                    option_index: Some(option_index),
                },
            );
        }
        outcome
    }

    pub async fn revoke_vote(&self) -> MutationOutcome<Post> {
        let Some(post) = self.current_post().await else {
            return self.missing_post();
        };
        let gateway = Arc::clone(&self.posts);
        let outcome = self
            .post_mutator
            .mutate(
                &post,
                |current| current.with_vote_revoked(),
                |mutation| {
                    let gateway = Arc::clone(&gateway);
                    async move { gateway.revoke_vote(&mutation.after.id).await }
                },
            )
            .await;

        if outcome.is_confirmed() {
            self.post_bus.emit_from(
                self.post_mutator.origin(),
                MutationEvent::PollVoted {
                    id: self.post_id.clone(),
                    option_index: None,
                },
            );
        }
        outcome
    }

    pub fn comment_pager(&self) -> &Pager<Comment> {
        &self.comment_pager
    }

    pub fn subscribe_comments(&self) -> watch::Receiver<PagerState<Comment>> {
        self.comment_list.subscribe()
    }

    pub async fn current_comments(&self) -> PagerState<Comment> {
        self.comment_list.merge(self.comment_pager.state()).await
    }

    pub fn load_more_comments(&self) -> Option<JoinHandle<()>> {
        self.comment_pager.load_next_page()
    }

    /// コメント一覧を作り直す。UI はトリガー値の変化で再購読する。
    pub async fn invalidate_comments(&self) -> JoinHandle<()> {
        self.comment_mutator.overlay().clear().await;
        self.refresh_trigger
            .send_modify(|trigger| *trigger = trigger.wrapping_add(1));
        self.comment_list.refresh(&self.scope, &self.comment_pager)
    }

    pub fn refresh_trigger(&self) -> u64 {
        *self.refresh_trigger.borrow()
    }

    pub fn subscribe_refresh_trigger(&self) -> watch::Receiver<u64> {
        self.refresh_trigger.subscribe()
    }

    /// 操作中のコメント ID
    pub fn comment_actions_loading(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.comment_actions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_comment_action_loading(&self, comment_id: &str) -> bool {
        self.comment_actions.lock().contains_key(comment_id)
    }

    pub fn is_submitting_comment(&self) -> bool {
        self.submitting_comment.load(Ordering::SeqCst)
    }

    /// コメントを投稿する。送信中の二重投稿は拒否する。
    pub async fn add_comment(&self, content: &str, parent_id: Option<&str>) -> Result<Comment> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::validation(
                ValidationFailureKind::EmptyContent,
                "Comment cannot be empty",
            ));
        }
        if self
            .submitting_comment
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::validation(
                ValidationFailureKind::ActionInFlight,
                "A comment is already being submitted",
            ));
        }
        let _submitting = SubmissionGuard(&self.submitting_comment);

        let comment = self
            .retry
            .execute(|_| {
                self.comments
                    .create_comment(&self.post_id, content, parent_id)
            })
            .await
            .into_result()?;

        self.adjust_comment_count(1).await;
        self.invalidate_comments().await;
        info!(post_id = %self.post_id, comment_id = %comment.id, "comment added");
        Ok(comment)
    }

    pub async fn edit_comment(
        &self,
        comment: &Comment,
        content: &str,
    ) -> MutationOutcome<Comment> {
        let content = content.trim().to_string();
        if content.is_empty() {
            return MutationOutcome::Rejected(AppError::validation(
                ValidationFailureKind::EmptyContent,
                "Comment cannot be empty",
            ));
        }
        let _loading = self.begin_comment_action(&comment.id);

        let gateway = Arc::clone(&self.comments);
        let outcome = self
            .comment_mutator
            .mutate(
                comment,
                |current| {
                    let mut edited = current.clone();
                    edited.content = content.clone();
                    edited.is_edited = true;
                    Ok(edited)
                },
                |mutation| {
                    let gateway = Arc::clone(&gateway);
                    async move {
                        gateway
                            .edit_comment(&mutation.after.id, &mutation.after.content)
                            .await
                    }
                },
            )
            .await;

        if outcome.is_confirmed() {
            self.invalidate_comments().await;
        }
        outcome
    }

    /// 削除はサーバー確定後に反映する
    pub async fn delete_comment(&self, comment_id: &str) -> Result<()> {
        let _loading = self.begin_comment_action(comment_id);

        self.retry
            .execute(|_| self.comments.delete_comment(comment_id))
            .await
            .into_result()?;

        self.comment_mutator.discard(comment_id).await;
        self.comment_list.hide(comment_id);
        self.comment_bus.emit_from(
            self.comment_mutator.origin(),
            MutationEvent::Deleted {
                id: comment_id.to_string(),
            },
        );
        self.adjust_comment_count(-1).await;
        self.invalidate_comments().await;
        info!(post_id = %self.post_id, comment_id, "comment deleted");
        Ok(())
    }

    pub async fn toggle_comment_reaction(
        &self,
        comment: &Comment,
        reaction: ReactionType,
    ) -> MutationOutcome<Comment> {
        let _loading = self.begin_comment_action(&comment.id);

        let gateway = Arc::clone(&self.comments);
        let outcome = self
            .comment_mutator
            .mutate(
                comment,
                |current| Ok(current.with_reaction_toggled(reaction)),
                |mutation| {
                    let gateway = Arc::clone(&gateway);
                    async move {
                        gateway
                            .toggle_comment_reaction(
                                &mutation.after.id,
                                reaction,
                                mutation.before.user_reaction,
                            )
                            .await
                    }
                },
            )
            .await;

        if outcome.is_confirmed() {
            self.invalidate_comments().await;
        }
        outcome
    }

    pub fn close(&self) {
        self.scope.close();
    }

    async fn show(&self, post: Post) {
        self.post_mutator.accept(post).await;
    }

    /// サーバーで確定したコメント数の変化を他画面にも反映する
    ///
    /// 進行中のミューテーションの後ろに並び、その巻き戻し後の値を基準にする。
    async fn adjust_comment_count(&self, delta: i64) {
        let Some(post) = self.current_post().await else {
            return;
        };
        self.post_mutator
            .mutate(
                &post,
                |current| {
                    let mut adjusted = current.clone();
                    let next = (i64::from(current.comment_count) + delta)
                        .clamp(0, i64::from(u32::MAX));
                    adjusted.comment_count = next as u32;
                    Ok(adjusted)
                },
                |_| async { Ok(()) },
            )
            .await;
    }

    fn missing_post(&self) -> MutationOutcome<Post> {
        MutationOutcome::Rejected(AppError::NotFound(format!(
            "post {} is not loaded",
            self.post_id
        )))
    }

    fn begin_comment_action(&self, comment_id: &str) -> CommentActionGuard<'_> {
        *self
            .comment_actions
            .lock()
            .entry(comment_id.to_string())
            .or_insert(0) += 1;
        CommentActionGuard {
            actions: &self.comment_actions,
            comment_id: comment_id.to_string(),
        }
    }
}

struct SubmissionGuard<'a>(&'a AtomicBool);

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct CommentActionGuard<'a> {
    actions: &'a Mutex<HashMap<String, usize>>,
    comment_id: String,
}

impl Drop for CommentActionGuard<'_> {
    fn drop(&mut self) {
        let mut actions = self.actions.lock();
        if let Some(count) = actions.get_mut(&self.comment_id) {
            *count -= 1;
            if *count == 0 {
                actions.remove(&self.comment_id);
            }
        }
    }
}

/// 他画面での変更を表示中の投稿に取り込む。表示値の更新はミューテーター経由。
fn spawn_post_listener(
    scope: &ScreenScope,
    mut events: EventSubscription<PostEvent>,
    post_id: String,
    mutator: Arc<OptimisticMutator<Post>>,
    shown: watch::Sender<Option<Post>>,
) {
    scope.spawn(async move {
        while let Some(event) = events.recv().await {
            if event.entity_id() != post_id {
                continue;
            }
            match event {
                MutationEvent::Updated(post) => mutator.accept(post).await,
                MutationEvent::Deleted { .. } => {
                    mutator.discard(&post_id).await;
                    shown.send_replace(None);
                }
                MutationEvent::Liked { .. }
                | MutationEvent::PollVoted { .. }
                | MutationEvent::Failed { .. } => {}
            }
        }
    });
}

fn spawn_comment_listener(
    scope: &ScreenScope,
    mut events: EventSubscription<CommentEvent>,
    post_id: String,
    mutator: Arc<OptimisticMutator<Comment>>,
    list: Arc<MergedList<Comment>>,
) {
    scope.spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                MutationEvent::Updated(comment) if comment.post_id == post_id => {
                    mutator.accept(comment).await;
                }
                MutationEvent::Deleted { id } => {
                    mutator.discard(&id).await;
                    list.hide(&id);
                }
                _ => {}
            }
        }
    });
}
