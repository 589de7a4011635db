//! Remote relational store boundary.
//!
//! Every cost-center store talks to the remote store through the narrow
//! [`RowStoreClient`] interface: table-scoped reads with ordering/filtering,
//! row mutations, key-based upsert, and a remote-procedure call. The trait is
//! dyn-compatible (explicit boxed futures) so stores hold an
//! `Arc<dyn RowStoreClient>` and tests substitute an in-memory double.
//!
//! Remote failures arrive as a message string; [`RemoteErrorKind`] classifies
//! the interesting classes (missing column, strict-integer rejection,
//! duplicate key, ...) by case-insensitive substring match, which is what the
//! probing adapter and the seeding paths branch on.

use crate::model::RemoteRow;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Classified remote failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// A referenced column does not exist; a probing signal during column
    /// discovery, a hard error everywhere else.
    MissingColumn,
    /// A referenced table/relation does not exist.
    MissingTable,
    /// A numeric payload was rejected by a strict integer column.
    InvalidInteger,
    /// Unique/key constraint violation.
    Duplicate,
    /// Permission or row-level security rejection.
    Permission,
    /// The request was cancelled locally; silent, non-error outcome.
    Aborted,
    /// Network-level failure.
    Transport,
    /// Anything else.
    Other,
}

/// A structured remote error with its classified kind.
#[derive(Debug, Clone, Error)]
#[error("remote store error: {message}")]
pub struct RemoteError {
    /// Classified failure class.
    pub kind: RemoteErrorKind,
    /// The remote message, preserved verbatim for surfacing to callers.
    pub message: String,
}

impl RemoteError {
    /// Build an error, classifying `message` by its text.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify(&message);
        Self { kind, message }
    }

    /// Build an error with an explicit kind.
    #[must_use]
    pub fn with_kind(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A local cancellation, treated as a silent outcome by stores.
    #[must_use]
    pub fn aborted() -> Self {
        Self {
            kind: RemoteErrorKind::Aborted,
            message: "request aborted".to_string(),
        }
    }
}

/// Classify a remote message string.
#[must_use]
pub fn classify(message: &str) -> RemoteErrorKind {
    let m = message.to_lowercase();
    if m.contains("does not exist") {
        if m.contains("column") {
            return RemoteErrorKind::MissingColumn;
        }
        if m.contains("relation") || m.contains("table") {
            return RemoteErrorKind::MissingTable;
        }
    }
    if m.contains("invalid input syntax for type integer")
        || (m.contains("invalid") && m.contains("integer"))
    {
        return RemoteErrorKind::InvalidInteger;
    }
    if m.contains("already exists") || m.contains("duplicate key") {
        return RemoteErrorKind::Duplicate;
    }
    if m.contains("permission denied") || m.contains("row-level security") {
        return RemoteErrorKind::Permission;
    }
    if m.contains("abort") {
        return RemoteErrorKind::Aborted;
    }
    if m.contains("connection") || m.contains("network") || m.contains("timed out") {
        return RemoteErrorKind::Transport;
    }
    RemoteErrorKind::Other
}

/// Equality filter plus ordering for a table-scoped read.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Equality matches, all of which must hold.
    pub eq: Vec<(String, Value)>,
    /// Order columns, ascending, applied in sequence.
    pub order: Vec<String>,
    /// Row cap.
    pub limit: Option<usize>,
}

impl Filter {
    /// An empty filter matching every row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `column = value`.
    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.eq.push((column.into(), value.into()));
        self
    }

    /// Order by `column` ascending; later calls break ties of earlier ones.
    #[must_use]
    pub fn order(mut self, column: impl Into<String>) -> Self {
        self.order.push(column.into());
        self
    }

    /// Cap the number of returned rows.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Boxed future alias used by the client trait.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Narrow typed interface to the remote relational store.
///
/// Implementations must be `Send + Sync`; every cost-center store depends
/// only on this trait, which is what makes the in-memory test double work.
/// Methods return boxed futures (not `async fn`) so the trait stays
/// dyn-compatible behind `Arc<dyn RowStoreClient>`.
pub trait RowStoreClient: Send + Sync {
    /// Read rows from `table` matching `filter`, in the filter's order.
    fn select<'a>(&'a self, table: &'a str, filter: &'a Filter) -> ClientFuture<'a, Vec<RemoteRow>>;

    /// Insert a row and return the authoritative echo.
    fn insert<'a>(&'a self, table: &'a str, row: RemoteRow) -> ClientFuture<'a, RemoteRow>;

    /// Patch the row with the given id and return the authoritative echo.
    fn update<'a>(&'a self, table: &'a str, id: &'a str, patch: RemoteRow)
    -> ClientFuture<'a, RemoteRow>;

    /// Patch every row matching `filter`; returns the number of rows touched.
    fn update_where<'a>(
        &'a self,
        table: &'a str,
        filter: &'a Filter,
        patch: RemoteRow,
    ) -> ClientFuture<'a, u64>;

    /// Delete the row with the given id.
    fn delete<'a>(&'a self, table: &'a str, id: &'a str) -> ClientFuture<'a, ()>;

    /// Insert-or-replace keyed by `key_column`, returning the stored row.
    fn upsert<'a>(
        &'a self,
        table: &'a str,
        key_column: &'a str,
        row: RemoteRow,
    ) -> ClientFuture<'a, RemoteRow>;

    /// Call a remote procedure with a JSON argument object.
    fn rpc<'a>(&'a self, function: &'a str, args: RemoteRow) -> ClientFuture<'a, Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_missing_column() {
        let e = RemoteError::new("column \"origin\" does not exist");
        assert_eq!(e.kind, RemoteErrorKind::MissingColumn);
    }

    #[test]
    fn classifies_missing_table() {
        let e = RemoteError::new("relation \"transport_rows\" does not exist");
        assert_eq!(e.kind, RemoteErrorKind::MissingTable);
    }

    #[test]
    fn classifies_invalid_integer() {
        let e = RemoteError::new("invalid input syntax for type integer: \"12.5\"");
        assert_eq!(e.kind, RemoteErrorKind::InvalidInteger);
    }

    #[test]
    fn classifies_duplicate() {
        let e = RemoteError::new("duplicate key value violates unique constraint");
        assert_eq!(e.kind, RemoteErrorKind::Duplicate);
    }

    #[test]
    fn classifies_other() {
        let e = RemoteError::new("something odd happened");
        assert_eq!(e.kind, RemoteErrorKind::Other);
    }

    #[test]
    fn filter_builder_collects() {
        let f = Filter::new()
            .eq("event_id", "ev1")
            .order("created_at")
            .order("id")
            .limit(10);
        assert_eq!(f.eq.len(), 1);
        assert_eq!(f.order, vec!["created_at", "id"]);
        assert_eq!(f.limit, Some(10));
    }
}
