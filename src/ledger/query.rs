//! Pagination parameters and their validation
//!
//! A [`HistoryQuery`] is the raw parameter bag coming from a caller. It must
//! resolve to exactly one [`QueryMode`] before the ledger is touched.

use crate::error::{RelayError, Result};
use crate::types::{Message, MessageId};
use serde::{Deserialize, Serialize};

/// Context applied on each side of an `around` query when none is given
pub const DEFAULT_AROUND_CONTEXT: usize = 10;

/// Which end of the ledger a `limit` query reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Head,
    #[default]
    Tail,
}

/// Raw pagination parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub around: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<MessageId>,
}

/// A validated query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Whole ledger
    All,
    /// First or last `limit` entries
    Window { limit: usize, direction: Direction },
    /// Entries surrounding a message id
    Around { id: MessageId, context: usize },
    /// Entries strictly newer than the cursor
    After {
        cursor: MessageId,
        limit: Option<usize>,
    },
    /// Entries strictly older than the cursor
    Before {
        cursor: MessageId,
        limit: Option<usize>,
    },
}

impl HistoryQuery {
    /// Last `limit` entries
    pub fn tail(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// First `limit` entries
    pub fn head(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            direction: Some(Direction::Head),
            ..Default::default()
        }
    }

    pub fn around(id: u64, context: usize) -> Self {
        Self {
            around: Some(MessageId(id)),
            context: Some(context),
            ..Default::default()
        }
    }

    pub fn after(cursor: u64) -> Self {
        Self {
            after: Some(MessageId(cursor)),
            ..Default::default()
        }
    }

    pub fn before(cursor: u64) -> Self {
        Self {
            before: Some(MessageId(cursor)),
            ..Default::default()
        }
    }

    /// Cap a cursor query
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resolve the parameter bag to a single mode
    pub fn mode(&self) -> Result<QueryMode> {
        let has_cursor = self.after.is_some() || self.before.is_some();
        let has_around = self.around.is_some() || self.context.is_some();

        if self.after.is_some() && self.before.is_some() {
            return Err(RelayError::InvalidQuery(
                "after and before cannot be combined".to_string(),
            ));
        }
        if has_cursor && (has_around || self.direction.is_some()) {
            return Err(RelayError::InvalidQuery(
                "after/before cannot be combined with around, context or direction".to_string(),
            ));
        }
        if self.limit == Some(0) {
            return Err(RelayError::InvalidQuery(
                "limit must be a positive integer".to_string(),
            ));
        }

        if let Some(cursor) = self.after {
            return Ok(QueryMode::After {
                cursor,
                limit: self.limit,
            });
        }
        if let Some(cursor) = self.before {
            return Ok(QueryMode::Before {
                cursor,
                limit: self.limit,
            });
        }

        if has_around {
            if self.limit.is_some() || self.direction.is_some() {
                return Err(RelayError::InvalidQuery(
                    "around/context cannot be combined with limit or direction".to_string(),
                ));
            }
            let id = self.around.ok_or_else(|| {
                RelayError::InvalidQuery("context requires around".to_string())
            })?;
            return Ok(QueryMode::Around {
                id,
                context: self.context.unwrap_or(DEFAULT_AROUND_CONTEXT),
            });
        }

        match (self.limit, self.direction) {
            (Some(limit), direction) => Ok(QueryMode::Window {
                limit,
                direction: direction.unwrap_or_default(),
            }),
            (None, Some(_)) => Err(RelayError::InvalidQuery(
                "direction requires limit".to_string(),
            )),
            (None, None) => Ok(QueryMode::All),
        }
    }
}

/// A page of ledger entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub messages: Vec<Message>,
    /// Current ledger length, independent of the page
    pub total: usize,
    pub has_more: bool,
}

impl QueryResult {
    pub fn ids(&self) -> Vec<u64> {
        self.messages.iter().map(|m| m.id.value()).collect()
    }
}
