//! Collection listing
//!
//! Turns page-at-a-time fetches into one lazy stream of entries, following
//! continuation tokens until the listing is exhausted.

use futures::stream::{self, Stream, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{CollectionId, LedgerEntry, PageState};
use crate::ledger::retry::RetryPolicy;
use crate::ledger::transport::LedgerTransport;

pub type EntryStream = Pin<Box<dyn Stream<Item = LedgerResult<LedgerEntry>> + Send>>;

/// How a listing copes with a ledger that is still loading a range.
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub retry: RetryPolicy,
    pub loading_poll_interval: Duration,
    pub max_loading_polls: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::none(),
            loading_poll_interval: Duration::from_millis(500),
            max_loading_polls: 20,
        }
    }
}

enum Cursor {
    Start,
    Continue(String),
    Exhausted,
}

struct Pager {
    transport: Arc<dyn LedgerTransport>,
    collection: CollectionId,
    options: ListOptions,
    buffered: VecDeque<LedgerResult<LedgerEntry>>,
    cursor: Cursor,
    loading_polls: usize,
    followed: HashSet<String>,
}

impl Pager {
    /// Next listed item. A page-level failure is yielded once and ends the
    /// listing; per-entry failures pass through in their slot.
    async fn next_item(&mut self) -> Option<LedgerResult<LedgerEntry>> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(item);
            }
            match self.fetch_next_page().await {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(err) => {
                    self.cursor = Cursor::Exhausted;
                    return Some(Err(err));
                }
            }
        }
    }

    /// Fetch one page into the buffer. `Ok(false)` once the listing is done.
    async fn fetch_next_page(&mut self) -> LedgerResult<bool> {
        let continuation = match std::mem::replace(&mut self.cursor, Cursor::Exhausted) {
            Cursor::Start => None,
            Cursor::Continue(token) => Some(token),
            Cursor::Exhausted => return Ok(false),
        };

        let transport = &self.transport;
        let collection = &self.collection;
        let token = continuation.as_deref();
        let page = self
            .options
            .retry
            .run("ledger page fetch", move || transport.fetch_page(collection, token))
            .await?;

        debug!(
            "Fetched {} entries from {} (more: {})",
            page.entries.len(),
            self.collection,
            page.continuation.is_some()
        );

        if page.state == PageState::Loading {
            self.loading_polls += 1;
            if self.loading_polls > self.options.max_loading_polls {
                return Err(LedgerError::TransientNetworkFailure(format!(
                    "Ledger still loading {} after {} polls",
                    self.collection, self.options.max_loading_polls
                )));
            }
            tokio::time::sleep(self.options.loading_poll_interval).await;
        } else {
            self.loading_polls = 0;
            if let Some(token) = &continuation {
                self.followed.insert(token.clone());
            }
            // A ready page must not link back to a page already read.
            if let Some(next) = &page.continuation {
                if self.followed.contains(next) {
                    return Err(LedgerError::UnexpectedResponse(format!(
                        "Listing of {} links back to an already read page",
                        self.collection
                    )));
                }
            }
        }

        self.cursor = match page.continuation {
            Some(token) => Cursor::Continue(token),
            // A loading page without a link is retried from where we were.
            None if page.state == PageState::Loading => match continuation {
                Some(token) => Cursor::Continue(token),
                None => Cursor::Start,
            },
            None => Cursor::Exhausted,
        };
        self.buffered.extend(page.entries);
        Ok(true)
    }
}

/// Stream every entry of `collection` in ledger order. Each call starts a
/// fresh listing from the beginning.
pub fn list_entries(transport: Arc<dyn LedgerTransport>, collection: CollectionId) -> EntryStream {
    list_entries_with_options(transport, collection, ListOptions::default())
}

/// Like [`list_entries`], retrying transient page failures per `options`.
///
/// `Err(MalformedEntry)` items stand for single entries and the stream goes
/// on. Any other error is the last item.
pub fn list_entries_with_options(
    transport: Arc<dyn LedgerTransport>,
    collection: CollectionId,
    options: ListOptions,
) -> EntryStream {
    let pager = Pager {
        transport,
        collection,
        options,
        buffered: VecDeque::new(),
        cursor: Cursor::Start,
        loading_polls: 0,
        followed: HashSet::new(),
    };

    stream::unfold(pager, |mut pager| async move {
        pager.next_item().await.map(|item| (item, pager))
    })
    .boxed()
}
