//! Deck — the queue engine. Append-only cards, a read pointer, and
//! low-watermark preloading, with broadcast to presentation clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::Stream;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{Card, CardPayload, DeckEvent, SwipeDirection};
use super::stack::{self, StackSlot, VISIBLE_WINDOW};
use crate::config::DeckConfig;
use crate::error::{AuthError, ConfigError, FetchError, Result};
use crate::providers::CardProvider;

/// Cards plus the read pointer. `current_index <= cards.len()` always.
struct DeckState<T> {
    cards: Vec<Card<T>>,
    current_index: usize,
}

impl<T: CardPayload> DeckState<T> {
    fn current(&self) -> Option<&Card<T>> {
        self.cards.get(self.current_index)
    }

    fn remaining(&self) -> usize {
        self.cards.len().saturating_sub(self.current_index)
    }
}

/// Read-only view of a deck for presentation clients.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(bound = "T: CardPayload + serde::Serialize")]
pub struct DeckSnapshot<T> {
    pub current: Option<Card<T>>,
    pub remaining: usize,
    pub window: Vec<StackSlot<T>>,
}

/// Ordered, growing collection of cards with a single current-card pointer.
///
/// Swipes are serialized by `commit_lock` (held across the provider hook and
/// the pointer advance). Every fetch holds `fetch_lock` across the provider
/// call and the append, so pages land in the order they were requested.
pub struct Deck<P: CardProvider> {
    id: Uuid,
    provider: Arc<P>,
    config: DeckConfig,
    state: RwLock<DeckState<P::Payload>>,
    commit_lock: Mutex<()>,
    fetch_lock: Mutex<()>,
    preload: Mutex<Option<JoinHandle<()>>>,
    authenticated: AtomicBool,
    tx: broadcast::Sender<DeckEvent>,
}

impl<P: CardProvider> Deck<P> {
    /// Create an empty, unauthenticated deck.
    pub fn new(provider: Arc<P>, config: DeckConfig) -> std::result::Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let (tx, _rx) = broadcast::channel(config.event_capacity);
        Ok(Arc::new(Self {
            id: Uuid::new_v4(),
            provider,
            config,
            state: RwLock::new(DeckState {
                cards: Vec::new(),
                current_index: 0,
            }),
            commit_lock: Mutex::new(()),
            fetch_lock: Mutex::new(()),
            preload: Mutex::new(None),
            authenticated: AtomicBool::new(false),
            tx,
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Subscribe to deck events. Each presentation client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<DeckEvent> {
        self.tx.subscribe()
    }

    /// Deck events as a stream. Lagged events are skipped.
    pub fn events(&self) -> impl Stream<Item = DeckEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|event| event.ok())
    }

    /// Run the provider's authentication. Must succeed before `initialize`.
    ///
    /// Safe to call again, e.g. after returning from a redirect.
    pub async fn authenticate(&self) -> Result<()> {
        match self.provider.authenticate().await {
            Ok(()) => {
                self.authenticated.store(true, Ordering::SeqCst);
                info!(deck_id = %self.id, provider = self.provider.name(), "Deck authenticated");
                let _ = self.tx.send(DeckEvent::Authenticated {
                    provider: self.provider.name().to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.authenticated.store(false, Ordering::SeqCst);
                warn!(deck_id = %self.id, provider = self.provider.name(), error = %e, "Authentication failed");
                Err(e.into())
            }
        }
    }

    /// Fetch and append the first page. Returns the number of cards appended.
    ///
    /// Not guarded against repeat calls: a second call appends another page.
    pub async fn initialize(&self) -> Result<usize> {
        let appended = self.refill().await?;
        info!(deck_id = %self.id, cards = appended, "Deck initialized");
        Ok(appended)
    }

    /// Fetch the next page now and append it. Used to retry after a failed preload.
    ///
    /// A provider that rejects the session as unauthorized drops the deck
    /// back to unauthenticated; the error is reported as `AuthError::Expired`
    /// and `authenticate` must succeed again before the next refill.
    pub async fn refill(&self) -> Result<usize> {
        if !self.is_authenticated() {
            return Err(AuthError::NotAuthenticated.into());
        }
        match self.fetch_and_append().await {
            Ok(count) => Ok(count),
            Err(FetchError::Unauthorized { provider }) => Err(AuthError::Expired { provider }.into()),
            Err(e) => Err(e.into()),
        }
    }

    /// The card at the read pointer, if any.
    pub async fn current_card(&self) -> Option<Card<P::Payload>> {
        self.state.read().await.current().cloned()
    }

    /// `cards.len() - current_index`.
    pub async fn remaining(&self) -> usize {
        self.state.read().await.remaining()
    }

    /// Total cards ever appended.
    pub async fn len(&self) -> usize {
        self.state.read().await.cards.len()
    }

    /// Position of the read pointer.
    pub async fn position(&self) -> usize {
        self.state.read().await.current_index
    }

    /// Up to three cards starting at the current one, with stack offsets.
    pub async fn visible_window(&self) -> Vec<StackSlot<P::Payload>> {
        let state = self.state.read().await;
        stack::window(&state.cards, state.current_index, VISIBLE_WINDOW)
    }

    pub async fn snapshot(&self) -> DeckSnapshot<P::Payload> {
        let state = self.state.read().await;
        DeckSnapshot {
            current: state.current().cloned(),
            remaining: state.remaining(),
            window: stack::window(&state.cards, state.current_index, VISIBLE_WINDOW),
        }
    }

    pub async fn swipe_left(self: &Arc<Self>) -> Result<Option<Card<P::Payload>>> {
        self.swipe(SwipeDirection::Left).await
    }

    pub async fn swipe_right(self: &Arc<Self>) -> Result<Option<Card<P::Payload>>> {
        self.swipe(SwipeDirection::Right).await
    }

    /// Commit the current card in `direction`.
    ///
    /// Runs the provider hook for the current card, then advances the pointer
    /// and checks the preload watermark. If the hook fails the pointer stays
    /// put and the error is returned. Returns the committed card, or `None`
    /// when there was no current card.
    pub async fn swipe(
        self: &Arc<Self>,
        direction: SwipeDirection,
    ) -> Result<Option<Card<P::Payload>>> {
        self.commit(direction, None).await
    }

    /// Like `swipe`, but only when `card_id` is still the current card.
    ///
    /// The check and the commit happen under the same lock, so a swipe from
    /// another client can never slip in between. Returns `None` when the deck
    /// is empty or has moved past `card_id`.
    pub async fn swipe_if_current(
        self: &Arc<Self>,
        card_id: &str,
        direction: SwipeDirection,
    ) -> Result<Option<Card<P::Payload>>> {
        self.commit(direction, Some(card_id)).await
    }

    async fn commit(
        self: &Arc<Self>,
        direction: SwipeDirection,
        expected: Option<&str>,
    ) -> Result<Option<Card<P::Payload>>> {
        let _commit = self.commit_lock.lock().await;

        let Some(card) = self.current_card().await else {
            debug!(deck_id = %self.id, %direction, "Swipe ignored: no current card");
            return Ok(None);
        };
        if let Some(expected) = expected.filter(|id| *id != card.id()) {
            debug!(
                deck_id = %self.id,
                expected,
                current = %card.id(),
                %direction,
                "Swipe ignored: card is no longer current"
            );
            return Ok(None);
        }

        let hook = match direction {
            SwipeDirection::Left => self.provider.on_left_commit(&card).await,
            SwipeDirection::Right => self.provider.on_right_commit(&card).await,
        };
        if let Err(e) = hook {
            warn!(
                deck_id = %self.id,
                card_id = %card.id(),
                %direction,
                error = %e,
                "Commit hook failed, card stays current"
            );
            return Err(e.into());
        }

        let remaining = {
            let mut state = self.state.write().await;
            state.current_index += 1;
            state.remaining()
        };

        info!(deck_id = %self.id, card_id = %card.id(), %direction, remaining, "Card swiped");

        let _ = self.tx.send(DeckEvent::Swiped {
            card: card.metadata().clone(),
            direction,
            remaining,
        });

        if remaining <= self.config.preload_threshold {
            self.trigger_preload().await;
        }

        Ok(Some(card))
    }

    /// Wait for the in-flight background preload, if any.
    pub async fn settle_preload(&self) {
        let handle = self.preload.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(deck_id = %self.id, error = %e, "Preload task did not complete");
            }
        }
    }

    /// Spawn a background refill unless one is already running.
    async fn trigger_preload(self: &Arc<Self>) {
        if !self.is_authenticated() {
            debug!(deck_id = %self.id, "Preload skipped: not authenticated");
            return;
        }
        let mut slot = self.preload.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!(deck_id = %self.id, "Preload already in flight");
            return;
        }

        debug!(deck_id = %self.id, "Preload triggered");
        let deck = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            if let Err(e) = deck.fetch_and_append().await {
                warn!(deck_id = %deck.id, error = %e, "Preload failed");
                let _ = deck.tx.send(DeckEvent::PreloadFailed {
                    reason: e.to_string(),
                });
            }
        }));
    }

    /// The provider no longer accepts the session. Require a fresh `authenticate`.
    fn expire_session(&self) {
        if self.authenticated.swap(false, Ordering::SeqCst) {
            warn!(deck_id = %self.id, provider = self.provider.name(), "Session expired, re-authentication required");
            let _ = self.tx.send(DeckEvent::SessionExpired {
                provider: self.provider.name().to_string(),
            });
        }
    }

    async fn fetch_and_append(&self) -> std::result::Result<usize, FetchError> {
        let _fetch = self.fetch_lock.lock().await;

        let batch = match self.provider.fetch_next_page(self.config.page_size).await {
            Ok(batch) => batch,
            Err(e @ FetchError::Unauthorized { .. }) => {
                self.expire_session();
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let count = batch.len();
        if count > self.config.page_size {
            debug!(deck_id = %self.id, count, page_size = self.config.page_size, "Provider returned an oversized page");
        }

        let (total, remaining) = {
            let mut state = self.state.write().await;
            state.cards.extend(batch);
            (state.cards.len(), state.remaining())
        };

        if count == 0 {
            debug!(deck_id = %self.id, remaining, "Provider exhausted for now");
            let _ = self.tx.send(DeckEvent::Exhausted { remaining });
        } else {
            info!(deck_id = %self.id, count, total, remaining, "Cards appended");
            let _ = self.tx.send(DeckEvent::CardsAppended {
                count,
                total,
                remaining,
            });
        }

        Ok(count)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::{CommitError, DeckError};

    #[derive(Debug, serde::Serialize)]
    pub(crate) struct TestCard {
        pub id: String,
    }

    impl CardPayload for TestCard {
        fn id(&self) -> &str {
            &self.id
        }
        fn describe(&self) -> String {
            format!("test card {}", self.id)
        }
    }

    pub(crate) fn cards(ids: &[&str]) -> Vec<Card<TestCard>> {
        ids.iter()
            .map(|id| Card::new(TestCard { id: id.to_string() }))
            .collect()
    }

    /// Scripted provider: hands out pages in order, records commits.
    #[derive(Default)]
    pub(crate) struct MockProvider {
        pages: Mutex<VecDeque<Vec<Card<TestCard>>>>,
        pub fetches: AtomicUsize,
        pub fail_fetch: AtomicBool,
        pub fail_commits: AtomicBool,
        pub reject_auth: AtomicBool,
        /// When set, fetches fail as if the session had been revoked.
        pub revoked: AtomicBool,
        pub commits: Mutex<Vec<(SwipeDirection, String)>>,
        /// When set, the first fetch waits for a notification before returning.
        gate: Option<Arc<Notify>>,
        /// When set, every commit hook waits for a notification.
        commit_gate: Option<Arc<Notify>>,
    }

    impl MockProvider {
        pub(crate) fn with_pages(pages: Vec<Vec<Card<TestCard>>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                ..Default::default()
            }
        }

        pub(crate) fn gated(pages: Vec<Vec<Card<TestCard>>>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::with_pages(pages)
            }
        }

        pub(crate) fn with_commit_gate(pages: Vec<Vec<Card<TestCard>>>, gate: Arc<Notify>) -> Self {
            Self {
                commit_gate: Some(gate),
                ..Self::with_pages(pages)
            }
        }

        async fn record(&self, direction: SwipeDirection, card: &Card<TestCard>) -> std::result::Result<(), CommitError> {
            if let Some(gate) = &self.commit_gate {
                gate.notified().await;
            }
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(CommitError::HookFailed {
                    provider: "mock".into(),
                    card_id: card.id().to_string(),
                    reason: "archive call failed".into(),
                });
            }
            self.commits
                .lock()
                .await
                .push((direction, card.id().to_string()));
            Ok(())
        }
    }

    #[async_trait]
    impl CardProvider for MockProvider {
        type Payload = TestCard;

        fn name(&self) -> &str {
            "mock"
        }

        async fn authenticate(&self) -> std::result::Result<(), AuthError> {
            if self.reject_auth.load(Ordering::SeqCst) {
                return Err(AuthError::Rejected {
                    provider: "mock".into(),
                    reason: "bad credentials".into(),
                });
            }
            Ok(())
        }

        async fn fetch_next_page(
            &self,
            _page_size: usize,
        ) -> std::result::Result<Vec<Card<TestCard>>, FetchError> {
            let call = self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.revoked.load(Ordering::SeqCst) {
                return Err(FetchError::Unauthorized {
                    provider: "mock".into(),
                });
            }
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(FetchError::Provider {
                    provider: "mock".into(),
                    reason: "connection reset".into(),
                });
            }
            let page = self.pages.lock().await.pop_front().unwrap_or_default();
            if call == 0 {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
            }
            Ok(page)
        }

        async fn on_left_commit(&self, card: &Card<TestCard>) -> std::result::Result<(), CommitError> {
            self.record(SwipeDirection::Left, card).await
        }

        async fn on_right_commit(&self, card: &Card<TestCard>) -> std::result::Result<(), CommitError> {
            self.record(SwipeDirection::Right, card).await
        }
    }

    pub(crate) async fn ready_deck(
        pages: Vec<Vec<Card<TestCard>>>,
        page_size: usize,
        threshold: usize,
    ) -> Arc<Deck<MockProvider>> {
        ready_deck_with(MockProvider::with_pages(pages), page_size, threshold).await
    }

    pub(crate) async fn ready_deck_with(
        provider: MockProvider,
        page_size: usize,
        threshold: usize,
    ) -> Arc<Deck<MockProvider>> {
        let deck = Deck::new(Arc::new(provider), DeckConfig::new(page_size, threshold)).unwrap();
        deck.authenticate().await.unwrap();
        deck.initialize().await.unwrap();
        deck
    }

    #[tokio::test]
    async fn initialize_fills_first_page() {
        let deck = ready_deck(vec![cards(&["c1", "c2", "c3"])], 10, 0).await;
        assert_eq!(deck.remaining().await, 3);
        assert_eq!(deck.current_card().await.unwrap().id(), "c1");
        assert_eq!(deck.position().await, 0);
    }

    #[tokio::test]
    async fn initialize_requires_authentication() {
        let deck = Deck::new(
            Arc::new(MockProvider::with_pages(vec![cards(&["c1"])])),
            DeckConfig::default(),
        )
        .unwrap();

        let err = deck.initialize().await.unwrap_err();
        assert!(matches!(err, DeckError::Auth(AuthError::NotAuthenticated)));
        assert!(deck.current_card().await.is_none());
        assert_eq!(deck.provider().fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_auth_leaves_deck_empty() {
        let provider = Arc::new(MockProvider::with_pages(vec![cards(&["c1"])]));
        provider.reject_auth.store(true, Ordering::SeqCst);
        let deck = Deck::new(provider, DeckConfig::default()).unwrap();

        assert!(matches!(
            deck.authenticate().await,
            Err(DeckError::Auth(AuthError::Rejected { .. }))
        ));
        assert!(!deck.is_authenticated());
        assert!(deck.initialize().await.is_err());
        assert_eq!(deck.remaining().await, 0);

        // Re-authentication unlocks the deck.
        deck.provider().reject_auth.store(false, Ordering::SeqCst);
        deck.authenticate().await.unwrap();
        assert_eq!(deck.initialize().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn initialize_twice_appends_again() {
        let deck = ready_deck(vec![cards(&["c1"]), cards(&["c2"])], 10, 0).await;
        deck.initialize().await.unwrap();
        assert_eq!(deck.len().await, 2);
        assert_eq!(deck.current_card().await.unwrap().id(), "c1");
    }

    #[tokio::test]
    async fn swipe_commits_current_card_then_advances() {
        let deck = ready_deck(vec![cards(&["c1", "c2"])], 10, 0).await;

        let committed = deck.swipe_right().await.unwrap().unwrap();
        assert_eq!(committed.id(), "c1");
        assert_eq!(deck.current_card().await.unwrap().id(), "c2");

        deck.swipe_left().await.unwrap();
        let commits = deck.provider().commits.lock().await.clone();
        assert_eq!(
            commits,
            vec![
                (SwipeDirection::Right, "c1".to_string()),
                (SwipeDirection::Left, "c2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn swipe_if_current_skips_a_card_that_moved_on() {
        let deck = ready_deck(vec![cards(&["c1", "c2"])], 10, 0).await;
        deck.swipe_left().await.unwrap();

        assert!(deck.swipe_if_current("c1", SwipeDirection::Right).await.unwrap().is_none());
        assert_eq!(deck.current_card().await.unwrap().id(), "c2");

        let committed = deck
            .swipe_if_current("c2", SwipeDirection::Right)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(committed.id(), "c2");
        let commits = deck.provider().commits.lock().await.clone();
        assert_eq!(
            commits,
            vec![
                (SwipeDirection::Left, "c1".to_string()),
                (SwipeDirection::Right, "c2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn swipe_if_current_waits_for_an_in_flight_commit() {
        let gate = Arc::new(Notify::new());
        let provider = MockProvider::with_commit_gate(vec![cards(&["c1", "c2"])], Arc::clone(&gate));
        let deck = ready_deck_with(provider, 10, 0).await;

        let left = {
            let deck = Arc::clone(&deck);
            tokio::spawn(async move { deck.swipe_left().await })
        };
        let guarded = {
            let deck = Arc::clone(&deck);
            tokio::spawn(async move { deck.swipe_if_current("c1", SwipeDirection::Right).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        assert_eq!(left.await.unwrap().unwrap().unwrap().id(), "c1");
        assert!(guarded.await.unwrap().unwrap().is_none());
        assert_eq!(deck.current_card().await.unwrap().id(), "c2");
        assert_eq!(deck.provider().commits.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn swipe_on_empty_deck_is_noop() {
        let deck = ready_deck(vec![], 10, 5).await;
        assert!(deck.current_card().await.is_none());
        assert!(deck.swipe_left().await.unwrap().is_none());
        assert_eq!(deck.position().await, 0);
        assert!(deck.provider().commits.lock().await.is_empty());
    }

    #[tokio::test]
    async fn pointer_never_passes_the_end() {
        let deck = ready_deck(vec![cards(&["c1", "c2", "c3"])], 10, 0).await;
        for i in 0..10 {
            let direction = if i % 3 == 0 {
                SwipeDirection::Left
            } else {
                SwipeDirection::Right
            };
            deck.swipe(direction).await.unwrap();
            deck.settle_preload().await;
            assert!(deck.position().await <= deck.len().await);
        }
        assert_eq!(deck.position().await, 3);
        assert_eq!(deck.remaining().await, 0);
    }

    #[tokio::test]
    async fn failed_commit_hook_does_not_advance() {
        let deck = ready_deck(vec![cards(&["c1", "c2"])], 10, 0).await;
        deck.provider().fail_commits.store(true, Ordering::SeqCst);

        let err = deck.swipe_left().await.unwrap_err();
        assert!(matches!(err, DeckError::Commit(CommitError::HookFailed { .. })));
        assert_eq!(deck.position().await, 0);
        assert_eq!(deck.current_card().await.unwrap().id(), "c1");

        // Retry succeeds on the same card.
        deck.provider().fail_commits.store(false, Ordering::SeqCst);
        let committed = deck.swipe_left().await.unwrap().unwrap();
        assert_eq!(committed.id(), "c1");
    }

    #[tokio::test]
    async fn low_watermark_with_empty_next_page() {
        let deck = ready_deck(vec![cards(&["c1", "c2", "c3"]), vec![]], 10, 5).await;
        let mut rx = deck.subscribe();

        deck.swipe_left().await.unwrap();
        assert_eq!(deck.current_card().await.unwrap().id(), "c2");
        assert_eq!(deck.remaining().await, 2);

        deck.settle_preload().await;
        assert_eq!(deck.provider().fetches.load(Ordering::SeqCst), 2);
        assert_eq!(deck.len().await, 3);

        assert!(matches!(rx.recv().await.unwrap(), DeckEvent::Swiped { remaining: 2, .. }));
        assert_eq!(rx.recv().await.unwrap(), DeckEvent::Exhausted { remaining: 2 });
    }

    #[tokio::test]
    async fn one_fetch_per_low_watermark_swipe() {
        let deck = ready_deck(
            vec![cards(&["c1", "c2"]), cards(&["c3"]), cards(&["c4"])],
            2,
            1,
        )
        .await;

        // remaining 2 → 1: at the threshold.
        deck.swipe_right().await.unwrap();
        deck.settle_preload().await;
        assert_eq!(deck.provider().fetches.load(Ordering::SeqCst), 2);
        assert_eq!(deck.remaining().await, 2);

        // remaining 2 → 1 again.
        deck.swipe_right().await.unwrap();
        deck.settle_preload().await;
        assert_eq!(deck.provider().fetches.load(Ordering::SeqCst), 3);

        let ids: Vec<String> = deck
            .visible_window()
            .await
            .iter()
            .map(|slot| slot.card.id().to_string())
            .collect();
        assert_eq!(ids, vec!["c3", "c4"]);
    }

    #[tokio::test]
    async fn above_watermark_does_not_fetch() {
        let deck = ready_deck(vec![cards(&["c1", "c2", "c3", "c4"])], 10, 1).await;
        deck.swipe_left().await.unwrap();
        deck.settle_preload().await;
        assert_eq!(deck.provider().fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn preload_failure_is_non_fatal_and_retryable() {
        let deck = ready_deck(vec![cards(&["c1", "c2"]), cards(&["c3"])], 10, 5).await;
        let mut rx = deck.subscribe();
        deck.provider().fail_fetch.store(true, Ordering::SeqCst);

        deck.swipe_left().await.unwrap();
        deck.settle_preload().await;

        assert_eq!(deck.current_card().await.unwrap().id(), "c2");
        assert_eq!(deck.remaining().await, 1);
        let _swiped = rx.recv().await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), DeckEvent::PreloadFailed { .. }));

        deck.provider().fail_fetch.store(false, Ordering::SeqCst);
        assert_eq!(deck.refill().await.unwrap(), 1);
        assert_eq!(deck.remaining().await, 2);
    }

    #[tokio::test]
    async fn revoked_session_requires_authentication_again() {
        let deck = ready_deck(vec![cards(&["c1"]), cards(&["c2"])], 10, 0).await;
        let mut rx = deck.subscribe();
        deck.provider().revoked.store(true, Ordering::SeqCst);

        let err = deck.refill().await.unwrap_err();
        assert!(matches!(err, DeckError::Auth(AuthError::Expired { .. })));
        assert!(!deck.is_authenticated());
        assert_eq!(
            rx.recv().await.unwrap(),
            DeckEvent::SessionExpired {
                provider: "mock".into()
            }
        );

        // No further provider calls until the deck signs in again.
        let err = deck.refill().await.unwrap_err();
        assert!(matches!(err, DeckError::Auth(AuthError::NotAuthenticated)));
        assert_eq!(deck.provider().fetches.load(Ordering::SeqCst), 2);

        deck.provider().revoked.store(false, Ordering::SeqCst);
        deck.authenticate().await.unwrap();
        assert_eq!(deck.refill().await.unwrap(), 1);
        assert_eq!(deck.remaining().await, 2);
    }

    #[tokio::test]
    async fn revoked_session_during_preload_stops_further_preloads() {
        let deck = ready_deck(vec![cards(&["c1", "c2", "c3"])], 10, 5).await;
        deck.provider().revoked.store(true, Ordering::SeqCst);

        deck.swipe_left().await.unwrap();
        deck.settle_preload().await;
        assert!(!deck.is_authenticated());
        assert_eq!(deck.provider().fetches.load(Ordering::SeqCst), 2);

        // Still at the watermark, but no fetch is attempted without a session.
        deck.swipe_left().await.unwrap();
        deck.settle_preload().await;
        assert_eq!(deck.provider().fetches.load(Ordering::SeqCst), 2);
        assert_eq!(deck.current_card().await.unwrap().id(), "c3");
    }

    #[tokio::test]
    async fn slow_preload_appends_after_deck_empties() {
        let gate = Arc::new(Notify::new());
        let provider = MockProvider::gated(vec![cards(&["late"])], Arc::clone(&gate));
        let deck = Deck::new(Arc::new(provider), DeckConfig::new(5, 5)).unwrap();
        deck.authenticate().await.unwrap();

        let background = {
            let deck = Arc::clone(&deck);
            tokio::spawn(async move { deck.initialize().await })
        };

        while deck.provider().fetches.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(deck.current_card().await.is_none());

        gate.notify_one();
        assert_eq!(background.await.unwrap().unwrap(), 1);
        assert_eq!(deck.current_card().await.unwrap().id(), "late");
    }

    #[tokio::test]
    async fn concurrent_refills_append_in_request_order() {
        let gate = Arc::new(Notify::new());
        let provider = MockProvider::gated(
            vec![cards(&["a1", "a2"]), cards(&["b1"])],
            Arc::clone(&gate),
        );
        let deck = Deck::new(Arc::new(provider), DeckConfig::new(5, 0)).unwrap();
        deck.authenticate().await.unwrap();

        let first = {
            let deck = Arc::clone(&deck);
            tokio::spawn(async move { deck.refill().await })
        };
        while deck.provider().fetches.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = {
            let deck = Arc::clone(&deck);
            tokio::spawn(async move { deck.refill().await })
        };

        // The second refill is queued behind the first fetch.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(deck.provider().fetches.load(Ordering::SeqCst), 1);

        gate.notify_one();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let ids: Vec<String> = deck
            .visible_window()
            .await
            .iter()
            .map(|slot| slot.card.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a1", "a2", "b1"]);
    }

    #[tokio::test]
    async fn events_stream_reports_appends() {
        let deck = Deck::new(
            Arc::new(MockProvider::with_pages(vec![cards(&["c1", "c2"])])),
            DeckConfig::default(),
        )
        .unwrap();
        let mut events = Box::pin(deck.events());

        deck.authenticate().await.unwrap();
        deck.initialize().await.unwrap();

        assert_eq!(
            events.next().await.unwrap(),
            DeckEvent::Authenticated {
                provider: "mock".into()
            }
        );
        assert_eq!(
            events.next().await.unwrap(),
            DeckEvent::CardsAppended {
                count: 2,
                total: 2,
                remaining: 2
            }
        );
    }

    #[tokio::test]
    async fn snapshot_reflects_pointer() {
        let deck = ready_deck(vec![cards(&["c1", "c2", "c3", "c4"])], 10, 0).await;
        deck.swipe_left().await.unwrap();

        let snapshot = deck.snapshot().await;
        assert_eq!(snapshot.current.as_ref().unwrap().id(), "c2");
        assert_eq!(snapshot.remaining, 3);
        assert_eq!(snapshot.window.len(), 3);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["current"]["metadata"]["id"], "c2");
        assert_eq!(json["window"][2]["card"]["payload"]["id"], "c4");
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let result = Deck::new(Arc::new(MockProvider::default()), DeckConfig::new(0, 0));
        assert!(result.is_err());
    }
}
