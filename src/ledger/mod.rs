//! Append-only message ledger
//!
//! Holds the ordered history of a session. Ids come from a counter that only
//! moves forward, so the entries always form a contiguous, ascending run of
//! ids even after the oldest ones are trimmed away.

pub mod query;

pub use query::{Direction, HistoryQuery, QueryMode, QueryResult, DEFAULT_AROUND_CONTEXT};

use crate::error::Result;
use crate::types::{Message, MessageExtra, MessageId, MessageType, Role};
use chrono::Utc;
use std::collections::VecDeque;
use tracing::debug;

/// Entries kept when no explicit bound is configured
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// Ordered store of session messages
#[derive(Debug)]
pub struct Ledger {
    entries: VecDeque<Message>,
    next_id: u64,
    max_history: usize,
}

impl Ledger {
    /// Create an empty ledger keeping at most `max_history` entries
    pub fn new(max_history: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 0,
            max_history: max_history.max(1),
        }
    }

    /// Append a new entry and trim the head past the bound
    pub fn append(
        &mut self,
        role: Role,
        content: impl Into<String>,
        message_type: MessageType,
        extra: MessageExtra,
    ) -> Message {
        let message = Message {
            id: MessageId(self.next_id),
            role,
            content: content.into(),
            time: Utc::now(),
            message_type,
            tool_use_id: extra.tool_use_id,
            parent_tool_use_id: extra.parent_tool_use_id,
            status: extra.status,
            error: extra.error,
        };
        self.next_id += 1;
        self.entries.push_back(message.clone());

        if self.entries.len() > self.max_history {
            let excess = self.entries.len() - self.max_history;
            self.entries.drain(..excess);
            debug!("Ledger trimmed {} oldest entries", excess);
        }

        message
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Id the next append will receive
    pub fn next_id(&self) -> MessageId {
        MessageId(self.next_id)
    }

    /// Copy of every retained entry, oldest first
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.iter().cloned().collect()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.position(id).and_then(|idx| self.entries.get(idx))
    }

    /// Validate `query` and return the selected page
    pub fn query(&self, query: &HistoryQuery) -> Result<QueryResult> {
        let mode = query.mode()?;
        Ok(self.query_mode(mode))
    }

    /// Run an already validated query
    pub fn query_mode(&self, mode: QueryMode) -> QueryResult {
        let total = self.entries.len();

        let (start, end, has_more) = match mode {
            QueryMode::All => (0, total, false),
            QueryMode::Window { limit, direction } => {
                let take = limit.min(total);
                let has_more = limit < total;
                match direction {
                    Direction::Head => (0, take, has_more),
                    Direction::Tail => (total - take, total, has_more),
                }
            }
            QueryMode::Around { id, context } => match self.position(id) {
                Some(idx) => {
                    let start = idx.saturating_sub(context);
                    let end = idx.saturating_add(context).saturating_add(1).min(total);
                    (start, end, start > 0 || end < total)
                }
                None => (0, 0, false),
            },
            QueryMode::After { cursor, limit } => {
                let start = self.entries.partition_point(|m| m.id <= cursor);
                let remaining = total - start;
                let take = limit.map_or(remaining, |l| l.min(remaining));
                (start, start + take, take < remaining)
            }
            QueryMode::Before { cursor, limit } => {
                let end = self.entries.partition_point(|m| m.id < cursor);
                let take = limit.map_or(end, |l| l.min(end));
                let start = end - take;
                (start, end, start > 0)
            }
        };

        QueryResult {
            messages: self.entries.range(start..end).cloned().collect(),
            total,
            has_more,
        }
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.entries.binary_search_by_key(&id, |m| m.id).ok()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}
