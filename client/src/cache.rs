//! Paged, time-ordered message cache and its merge rules.

use std::collections::HashSet;

use parley_proto::{Message, MessagePage};
use uuid::Uuid;

/// One fetched page. `items` are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Message>,
    pub next_cursor: Option<Uuid>,
}

impl From<MessagePage> for Page {
    fn from(page: MessagePage) -> Self {
        Self {
            items: page.items,
            next_cursor: page.next_cursor,
        }
    }
}

/// Pages ordered newest to oldest. Every id appears at most once and the
/// concatenation of all pages is strictly descending by `(created_at, id)`.
#[derive(Debug, Clone, Default)]
pub struct MessageCache {
    pages: Vec<Page>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Messages from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.pages.iter().flat_map(|p| p.items.iter())
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(|p| p.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.iter().any(|m| m.id == id)
    }

    /// Cursor for the next older page, if the oldest page says there is one.
    pub fn older_cursor(&self) -> Option<Uuid> {
        self.pages.last().and_then(|p| p.next_cursor)
    }

    /// Insert a newly created message into the newest page unless its id is
    /// already cached. Returns whether the cache changed.
    pub fn merge_created(&mut self, message: Message) -> bool {
        if self.contains(message.id) {
            return false;
        }
        let Some(newest) = self.pages.first_mut() else {
            self.pages.push(Page {
                items: vec![message],
                next_cursor: None,
            });
            return true;
        };
        let key = message.order_key();
        let pos = newest
            .items
            .iter()
            .position(|m| m.order_key() < key)
            .unwrap_or(newest.items.len());
        newest.items.insert(pos, message);
        true
    }

    /// Replace a cached message in place. Unknown ids are ignored.
    pub fn merge_updated(&mut self, message: Message) -> bool {
        match self
            .pages
            .iter_mut()
            .flat_map(|p| p.items.iter_mut())
            .find(|m| m.id == message.id)
        {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    /// True when `window` is a full newest-first window whose oldest item is
    /// not cached. Messages may then exist between the window and the cache.
    pub fn leaves_gap(&self, window: &MessagePage) -> bool {
        if self.is_empty() || window.next_cursor.is_none() {
            return false;
        }
        window.items.last().map_or(false, |m| !self.contains(m.id))
    }

    /// Drop every cached page and start over from `fetched`.
    pub fn reset(&mut self, fetched: MessagePage) {
        self.pages = vec![fetched.into()];
    }

    /// Merge a freshly fetched newest page.
    ///
    /// The fetched items replace the window of the newest cached page they
    /// cover. Cached items older than that window survive, and ids that moved
    /// into the newest page are dropped from older pages.
    pub fn replace_newest(&mut self, fetched: MessagePage) {
        if self.pages.is_empty() {
            self.pages.push(fetched.into());
            return;
        }
        let Some(oldest) = fetched.items.last().map(Message::order_key) else {
            // an empty container stays as cached; soft deletes never shrink it
            return;
        };
        let ids: HashSet<Uuid> = fetched.items.iter().map(|m| m.id).collect();
        let only_page = self.pages.len() == 1;
        let newest = &mut self.pages[0];
        let kept: Vec<Message> = newest
            .items
            .drain(..)
            .filter(|m| m.order_key() < oldest && !ids.contains(&m.id))
            .collect();
        if kept.is_empty() && only_page {
            newest.next_cursor = fetched.next_cursor;
        }
        newest.items = fetched.items;
        newest.items.extend(kept);
        for page in self.pages.iter_mut().skip(1) {
            page.items.retain(|m| !ids.contains(&m.id));
        }
    }

    /// Append an older page, dropping anything already cached. Returns the
    /// number of messages added.
    pub fn push_older(&mut self, fetched: MessagePage) -> usize {
        let mut page = Page::from(fetched);
        page.items.retain(|m| !self.contains(m.id));
        let added = page.items.len();
        self.pages.push(page);
        added
    }
}
