//! Stream naming.
//!
//! Stream names are derived from a category, an optional entity id and the
//! kind of message, and can be parsed back into those parts:
//!
//! | Kind | Stream name |
//! |---|---|
//! | Command, category-wide | `{category}:command` |
//! | Command, entity-scoped | `{category}:command-{entity_id}` |
//! | Event | `{category}-{entity_id}` |
//! | Position checkpoint | `{subscriber_id}+position` |

use uuid::Uuid;

/// Appended to a category to form its command stream.
pub const COMMAND_SUFFIX: &str = ":command";

/// Appended to a subscriber id to form its checkpoint stream.
pub const POSITION_SUFFIX: &str = "+position";

/// Separates the category from the entity id.
pub const CATEGORY_SEPARATOR: char = '-';

pub fn command_stream_name(category: &str, entity_id: Option<Uuid>) -> String {
    match entity_id {
        Some(id) => format!("{category}{COMMAND_SUFFIX}{CATEGORY_SEPARATOR}{id}"),
        None => format!("{category}{COMMAND_SUFFIX}"),
    }
}

pub fn event_stream_name(category: &str, entity_id: Uuid) -> String {
    format!("{category}{CATEGORY_SEPARATOR}{entity_id}")
}

pub fn position_stream_name(subscriber_id: &str) -> String {
    format!("{subscriber_id}{POSITION_SUFFIX}")
}

/// A stream name split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamName {
    /// Category with any `:command` suffix removed.
    pub category: String,
    /// `None` when absent or when the id part is not a valid UUID.
    pub entity_id: Option<Uuid>,
    pub is_command: bool,
}

/// Split a stream name on its first `-`.
pub fn split_stream_name(stream_name: &str) -> (&str, Option<&str>) {
    match stream_name.split_once(CATEGORY_SEPARATOR) {
        Some((head, tail)) => (head, Some(tail)),
        None => (stream_name, None),
    }
}

impl StreamName {
    /// Split on the first `-`. The left part is the category, the right
    /// part (if any) the entity id.
    pub fn parse(stream_name: &str) -> Self {
        let (head, tail) = split_stream_name(stream_name);

        let (category, is_command) = match head.strip_suffix(COMMAND_SUFFIX) {
            Some(category) => (category, true),
            None => (head, false),
        };

        Self {
            category: category.to_string(),
            entity_id: tail.and_then(|id| Uuid::parse_str(id).ok()),
            is_command,
        }
    }
}
