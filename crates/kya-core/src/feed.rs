//! Change feed over open suggestions.
//!
//! The feed owns the in-memory cursor. [`ChangeFeed::poll`] never advances it
//! past records it returns; the caller reports each delivered id through
//! [`ChangeFeed::mark_delivered`] once the record reached the presentation
//! layer. The only advance `poll` performs itself is seeding.

use std::sync::Arc;

use crate::cursor::Cursor;
use crate::datastore::SuggestionSource;
use crate::error::Result;
use crate::suggestion::SuggestionRecord;

enum Fetch {
    Seed(Option<i64>),
    Records(Vec<SuggestionRecord>),
}

pub struct ChangeFeed {
    source: Arc<dyn SuggestionSource>,
    cursor: Cursor,
}

impl ChangeFeed {
    pub fn new(source: Arc<dyn SuggestionSource>, cursor: Cursor) -> Self {
        Self { source, cursor }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Fetch open suggestions newer than the cursor, ascending by id.
    ///
    /// An unseeded cursor is seeded to the current maximum open id (0 when
    /// there is none) and the call returns nothing, so an existing backlog
    /// never notifies. Datastore failures are logged and yield an empty
    /// batch; a failed seed is retried on the next call.
    pub async fn poll(&mut self) -> Vec<SuggestionRecord> {
        let source = Arc::clone(&self.source);
        let cursor = self.cursor;
        let fetched = tokio::task::spawn_blocking(move || fetch(source.as_ref(), cursor)).await;
        match fetched {
            Ok(Ok(fetch)) => self.accept(fetch),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, cursor = %self.cursor, "suggestion poll failed");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "suggestion poll task panicked");
                Vec::new()
            }
        }
    }

    /// Record that `id` was handed to the presentation layer.
    pub fn mark_delivered(&mut self, id: i64) {
        self.cursor = self.cursor.advanced_to(id);
    }

    fn accept(&mut self, fetch: Fetch) -> Vec<SuggestionRecord> {
        match fetch {
            Fetch::Seed(max) => {
                self.cursor = self.cursor.advanced_to(max.unwrap_or(0));
                tracing::info!(cursor = %self.cursor, "seeded suggestion cursor; existing backlog skipped");
                Vec::new()
            }
            Fetch::Records(mut records) => {
                let cursor = self.cursor;
                records.retain(|r| cursor.admits(r.id));
                records.sort_by_key(|r| r.id);
                records.dedup_by_key(|r| r.id);
                records
            }
        }
    }
}

fn fetch(source: &dyn SuggestionSource, cursor: Cursor) -> Result<Fetch> {
    match cursor {
        Cursor::Unseeded => Ok(Fetch::Seed(source.max_open_id()?)),
        Cursor::Seen(last) => Ok(Fetch::Records(source.open_since(last)?)),
    }
}
