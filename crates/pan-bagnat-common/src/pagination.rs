//! Opaque keyset-pagination tokens.
//!
//! A page token is the base64 of the JSON `{orderBy, filter, lastEntity,
//! limit}`. The caller fetches `limit+1` rows; when the extra row exists,
//! the last *returned* row becomes `lastEntity` of the next token. Cursor
//! comparison in SQL is a strict tuple compare on `(order field, id)`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Sort direction for a keyset-ordered listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    /// Comparison operator for the keyset predicate.
    pub fn as_cmp(&self) -> &'static str {
        match self {
            Self::Asc => ">",
            Self::Desc => "<",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Cursor {
    #[serde(rename = "orderBy")]
    pub order_by: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub filter: String,
    /// The last entity of the previous page, if any.
    #[serde(rename = "lastEntity")]
    pub last: Option<serde_json::Value>,
    pub limit: i64,
}

impl Cursor {
    pub fn new(order_by: &str, direction: Direction, filter: &str, limit: i64) -> Self {
        Self {
            order_by: order_by.to_string(),
            direction,
            filter: filter.to_string(),
            last: None,
            limit,
        }
    }

    /// Encode into the opaque wire token.
    pub fn encode(&self) -> String {
        // Cursor serialization cannot fail: every field is plain data.
        let json = serde_json::to_vec(self).unwrap_or_default();
        STANDARD.encode(json)
    }

    /// Decode a wire token. Anything that is not base64(JSON of a cursor)
    /// yields `PaginationTokenInvalid`.
    pub fn decode(token: &str) -> Result<Self, Error> {
        let raw = STANDARD
            .decode(token)
            .map_err(|_| Error::PaginationTokenInvalid)?;
        serde_json::from_slice(&raw).map_err(|_| Error::PaginationTokenInvalid)
    }

    /// Token for the page after this one, anchored at `last_entity`.
    pub fn next_with(&self, last_entity: serde_json::Value) -> Self {
        Self {
            last: Some(last_entity),
            ..self.clone()
        }
    }
}

/// A page of results plus the token for the next page, if any.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_roundtrip() {
        let mut cursor = Cursor::new("name", Direction::Desc, "web", 25);
        cursor.last = Some(serde_json::json!({"id": "module_42", "name": "demo"}));
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_cursor_roundtrip_without_last() {
        let cursor = Cursor::new("created_at", Direction::Asc, "", 100);
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
        assert!(decoded.last.is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Cursor::decode("not-a-base64!!!"),
            Err(Error::PaginationTokenInvalid)
        ));
        // Valid base64 of something that is not a cursor.
        let bogus = STANDARD.encode(b"[1,2,3]");
        assert!(matches!(
            Cursor::decode(&bogus),
            Err(Error::PaginationTokenInvalid)
        ));
    }

    #[test]
    fn test_next_with_keeps_shape() {
        let cursor = Cursor::new("name", Direction::Asc, "f", 10);
        let next = cursor.next_with(serde_json::json!({"id": "x"}));
        assert_eq!(next.order_by, "name");
        assert_eq!(next.filter, "f");
        assert_eq!(next.limit, 10);
        assert!(next.last.is_some());
    }

    #[test]
    fn test_direction_sql_fragments() {
        assert_eq!(Direction::Asc.as_cmp(), ">");
        assert_eq!(Direction::Desc.as_cmp(), "<");
        assert_eq!(Direction::Desc.as_sql(), "DESC");
    }
}
