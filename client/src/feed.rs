//! Per-view subscription state machine.
//!
//! A [`ChatFeed`] keeps one channel or conversation's [`MessageCache`] fresh.
//! While the shared socket is up it listens on the container's two topics;
//! when the socket drops it re-fetches the newest page on a fixed interval
//! until the socket comes back.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use parley_core::SubscriptionHandle;
use parley_proto::{
    topics::{self, TopicKind},
    Event, Message, Scope,
};
use tokio::{
    sync::{mpsc, watch},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    cache::MessageCache,
    connection::Link,
    error::ClientResult,
    fetch::PageSource,
    socket::{JoinGuard, Socket},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// The live channel has not been up yet.
    Disconnected,
    Live,
    /// The live channel was lost; the newest page is re-fetched on a timer.
    Polling,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub poll_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Pages a refresh fetches before it stops trying to meet the cache.
const CATCH_UP_PAGES: usize = 5;

/// Both topics of a container, held while live.
struct LiveTopics {
    _handles: [SubscriptionHandle; 2],
    _joins: [JoinGuard; 2],
}

struct Shared {
    scope: Scope,
    container_id: Uuid,
    cache: Mutex<MessageCache>,
    closed: AtomicBool,
    live: Mutex<Option<LiveTopics>>,
    revision: watch::Sender<u64>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn mutate(&self, f: impl FnOnce(&mut MessageCache) -> bool) -> bool {
        if self.is_closed() {
            return false;
        }
        let changed = f(&mut self.cache.lock());
        if changed {
            self.bump();
        }
        changed
    }

    /// Listen on both topics locally, then join them on the server. Any
    /// previous registration is released only after the new one is in place.
    fn attach(&self, socket: &Socket, tx: &mpsc::UnboundedSender<Event>) {
        if self.is_closed() {
            return;
        }
        let [create, update] = topics::container_topics(&self.container_id);
        let handles = [
            socket.bus().attach(&create, tx.clone()),
            socket.bus().attach(&update, tx.clone()),
        ];
        let joins = [socket.join(&create), socket.join(&update)];
        let previous = self.live.lock().replace(LiveTopics {
            _handles: handles,
            _joins: joins,
        });
        drop(previous);
    }

    fn detach(&self) {
        let previous = self.live.lock().take();
        drop(previous);
    }

    fn apply(&self, event: Event) {
        let Some(topic) = topics::parse(&event.topic) else {
            return;
        };
        if topic.container_id != self.container_id {
            return;
        }
        match topic.kind {
            TopicKind::Create => self.mutate(|c| c.merge_created(event.payload)),
            TopicKind::Update => self.mutate(|c| c.merge_updated(event.payload)),
        };
    }

    /// Re-fetch the newest page. When more than a page arrived since the
    /// cache was last fresh, keeps paging back until the fetched window
    /// meets the cache, or gives up after [`CATCH_UP_PAGES`] and restarts
    /// the cache from the window.
    async fn refresh(&self, source: &dyn PageSource) -> ClientResult<()> {
        let mut window = source.fetch(self.scope, self.container_id, None).await?;
        let mut pages = 1;
        loop {
            let gap = self.cache.lock().leaves_gap(&window);
            let Some(cursor) = window.next_cursor.filter(|_| gap) else {
                break;
            };
            if pages == CATCH_UP_PAGES {
                debug!(container = %self.container_id, pages, "too far behind, dropping cached history");
                self.mutate(|c| {
                    c.reset(window);
                    true
                });
                return Ok(());
            }
            let older = source
                .fetch(self.scope, self.container_id, Some(cursor))
                .await?;
            window.items.extend(older.items);
            window.next_cursor = older.next_cursor;
            pages += 1;
        }
        self.mutate(|c| {
            c.replace_newest(window);
            true
        });
        Ok(())
    }
}

/// Live view of one channel or conversation.
pub struct ChatFeed {
    shared: Arc<Shared>,
    source: Arc<dyn PageSource>,
    state: watch::Receiver<FeedState>,
    cancel: CancellationToken,
}

impl ChatFeed {
    /// Open a feed and start its driver task. The newest page is loaded once
    /// right away, whatever the connection state.
    pub fn open(
        socket: Socket,
        source: Arc<dyn PageSource>,
        scope: Scope,
        container_id: Uuid,
        config: FeedConfig,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            scope,
            container_id,
            cache: Mutex::new(MessageCache::new()),
            closed: AtomicBool::new(false),
            live: Mutex::new(None),
            revision,
        });
        let (state_tx, state) = watch::channel(FeedState::Disconnected);
        let cancel = CancellationToken::new();
        tokio::spawn(drive(
            shared.clone(),
            socket,
            source.clone(),
            config,
            state_tx,
            cancel.clone(),
        ));
        Self {
            shared,
            source,
            state,
            cancel,
        }
    }

    pub fn scope(&self) -> Scope {
        self.shared.scope
    }

    pub fn container_id(&self) -> Uuid {
        self.shared.container_id
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    /// Bumped on every cache change.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Snapshot of the cached messages, newest first.
    pub fn messages(&self) -> Vec<Message> {
        self.shared.cache.lock().iter().cloned().collect()
    }

    pub fn with_cache<R>(&self, f: impl FnOnce(&MessageCache) -> R) -> R {
        f(&self.shared.cache.lock())
    }

    /// Merge the caller's own create response; duplicates of a live event
    /// are suppressed.
    pub fn merge_created(&self, message: Message) -> bool {
        self.shared.mutate(|c| c.merge_created(message))
    }

    pub fn merge_updated(&self, message: Message) -> bool {
        self.shared.mutate(|c| c.merge_updated(message))
    }

    /// Fetch the next older page. Returns the number of new messages, zero
    /// once history is exhausted.
    pub async fn load_older(&self) -> ClientResult<usize> {
        let Some(cursor) = self.shared.cache.lock().older_cursor() else {
            return Ok(0);
        };
        let page = self
            .source
            .fetch(self.shared.scope, self.shared.container_id, Some(cursor))
            .await?;
        let mut added = 0;
        self.shared.mutate(|c| {
            added = c.push_older(page);
            true
        });
        Ok(added)
    }

    /// Stop the feed. Subscriptions are released before this returns and no
    /// later event touches the cache.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.detach();
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl Drop for ChatFeed {
    fn drop(&mut self) {
        self.close();
    }
}

async fn drive(
    shared: Arc<Shared>,
    socket: Socket,
    source: Arc<dyn PageSource>,
    config: FeedConfig,
    state_tx: watch::Sender<FeedState>,
    cancel: CancellationToken,
) {
    let (tx, mut events) = mpsc::unbounded_channel::<Event>();
    let mut link_rx = socket.connection().watch();
    let mut state = FeedState::Disconnected;
    let mut generation = 0;
    let mut needs_refresh = true;

    'outer: loop {
        let link: Link = *link_rx.borrow_and_update();
        let next = match (link.live, state) {
            (true, _) => FeedState::Live,
            (false, FeedState::Disconnected) => FeedState::Disconnected,
            (false, _) => FeedState::Polling,
        };
        match (state, next) {
            (FeedState::Live, FeedState::Live) if link.generation != generation => {
                // the server forgot our subscriptions when the old socket died
                shared.attach(&socket, &tx);
                needs_refresh = true;
            }
            (FeedState::Live, FeedState::Live) => {}
            (from, FeedState::Live) => {
                shared.attach(&socket, &tx);
                needs_refresh |= from == FeedState::Polling;
            }
            (FeedState::Live, _) => {
                shared.detach();
                // polling reconciles anything still queued
                while events.try_recv().is_ok() {}
            }
            _ => {}
        }
        generation = link.generation;
        if state != next {
            debug!(container = %shared.container_id, from = ?state, to = ?next, "feed state");
            state = next;
            state_tx.send_replace(state);
        }
        if needs_refresh {
            needs_refresh = false;
            if let Err(e) = shared.refresh(source.as_ref()).await {
                warn!(container = %shared.container_id, error = %e, "refresh failed");
            }
        }

        if state == FeedState::Polling {
            let start = Instant::now() + config.poll_interval;
            let mut ticker = interval_at(start, config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    changed = link_rx.changed() => {
                        if changed.is_err() {
                            break 'outer;
                        }
                        continue 'outer;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = shared.refresh(source.as_ref()).await {
                            debug!(container = %shared.container_id, error = %e, "poll failed");
                        }
                    }
                }
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                changed = link_rx.changed() => {
                    if changed.is_err() {
                        break 'outer;
                    }
                    continue 'outer;
                }
                Some(event) = events.recv() => {
                    if !shared.is_closed() {
                        shared.apply(event);
                    }
                }
            }
        }
    }
    shared.detach();
}
