//! `PostgreSQL` row-store client for the banchetto pricing engine.
//!
//! Implements the [`RowStoreClient`] boundary over a sqlx connection pool.
//! Rows travel as JSON objects in both directions: reads go through
//! `row_to_json`, writes through `jsonb_populate_record` with an explicit
//! column list so absent keys keep their column defaults (ids, creation
//! timestamps).
//!
//! Statements are assembled dynamically from table/column names that pass a
//! strict identifier check; every value reaches the server as a bind
//! parameter. Database failures keep their server message verbatim, which is
//! what the error classifier in `banchetto-core` operates on.
//!
//! # Example
//!
//! ```ignore
//! use banchetto_postgres::PgRowClient;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PgRowClient::connect("postgres://localhost/banchetto").await?;
//!     Ok(())
//! }
//! ```

use banchetto_core::client::{
    ClientFuture, Filter, RemoteError, RemoteErrorKind, RowStoreClient,
};
use banchetto_core::model::RemoteRow;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// [`RowStoreClient`] backed by a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PgRowClient {
    pool: PgPool,
}

impl PgRowClient {
    /// Connect with default pool options.
    ///
    /// # Errors
    /// Returns a transport-class [`RemoteError`] when the pool cannot be
    /// established.
    pub async fn connect(url: &str) -> Result<Self, RemoteError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(map_sqlx)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Validate a SQL identifier: lowercase ASCII, digits, underscores, starting
/// with a letter or underscore. Everything the engine owns complies; anything
/// else is rejected before it reaches a statement.
fn ident(name: &str) -> Result<&str, RemoteError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(RemoteError::with_kind(
            RemoteErrorKind::Other,
            format!("invalid identifier: {name:?}"),
        ))
    }
}

/// Render a filter value for a `::text` comparison bind.
fn bind_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn map_sqlx(err: sqlx::Error) -> RemoteError {
    match &err {
        sqlx::Error::Database(db) => RemoteError::new(db.message()),
        sqlx::Error::RowNotFound => {
            RemoteError::with_kind(RemoteErrorKind::Other, "no matching row")
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            RemoteError::with_kind(RemoteErrorKind::Transport, err.to_string())
        }
        _ => RemoteError::new(err.to_string()),
    }
}

fn object_from(value: Value) -> Result<RemoteRow, RemoteError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RemoteError::with_kind(
            RemoteErrorKind::Other,
            format!("expected a row object, got {other}"),
        )),
    }
}

/// Build the select statement and its text binds.
fn select_sql(table: &str, filter: &Filter) -> Result<(String, Vec<String>), RemoteError> {
    let table = ident(table)?;
    let mut sql = format!("SELECT row_to_json(t.*) FROM {table} t");
    let mut binds = Vec::new();
    for (index, (column, value)) in filter.eq.iter().enumerate() {
        let column = ident(column)?;
        let keyword = if index == 0 { "WHERE" } else { "AND" };
        sql.push_str(&format!(" {keyword} t.{column}::text = ${}", index + 1));
        binds.push(bind_text(value));
    }
    if !filter.order.is_empty() {
        let mut order_parts = Vec::with_capacity(filter.order.len());
        for column in &filter.order {
            order_parts.push(format!("t.{} ASC", ident(column)?));
        }
        sql.push_str(&format!(" ORDER BY {}", order_parts.join(", ")));
    }
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok((sql, binds))
}

/// Comma-joined, validated column list of a payload.
fn column_list(payload: &RemoteRow) -> Result<String, RemoteError> {
    let mut columns = Vec::with_capacity(payload.len());
    for key in payload.keys() {
        columns.push(ident(key)?.to_string());
    }
    Ok(columns.join(", "))
}

impl RowStoreClient for PgRowClient {
    fn select<'a>(
        &'a self,
        table: &'a str,
        filter: &'a Filter,
    ) -> ClientFuture<'a, Vec<RemoteRow>> {
        Box::pin(async move {
            let (sql, binds) = select_sql(table, filter)?;
            let mut query = sqlx::query_scalar::<_, Value>(&sql);
            for bind in binds {
                query = query.bind(bind);
            }
            let values = query.fetch_all(&self.pool).await.map_err(map_sqlx)?;
            values.into_iter().map(object_from).collect()
        })
    }

    fn insert<'a>(&'a self, table: &'a str, row: RemoteRow) -> ClientFuture<'a, RemoteRow> {
        Box::pin(async move {
            let table = ident(table)?;
            let columns = column_list(&row)?;
            let sql = format!(
                "INSERT INTO {table} ({columns}) \
                 SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1) \
                 RETURNING row_to_json({table}.*)"
            );
            let echo = sqlx::query_scalar::<_, Value>(&sql)
                .bind(Value::Object(row))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;
            object_from(echo)
        })
    }

    fn update<'a>(
        &'a self,
        table: &'a str,
        id: &'a str,
        patch: RemoteRow,
    ) -> ClientFuture<'a, RemoteRow> {
        Box::pin(async move {
            let table = ident(table)?;
            let columns = column_list(&patch)?;
            let sql = format!(
                "UPDATE {table} t \
                 SET ({columns}) = (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $2)) \
                 WHERE t.id::text = $1 \
                 RETURNING row_to_json(t.*)"
            );
            let echo = sqlx::query_scalar::<_, Value>(&sql)
                .bind(id)
                .bind(Value::Object(patch))
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
            match echo {
                Some(value) => object_from(value),
                None => Err(RemoteError::with_kind(
                    RemoteErrorKind::Other,
                    format!("no row with id {id}"),
                )),
            }
        })
    }

    fn update_where<'a>(
        &'a self,
        table: &'a str,
        filter: &'a Filter,
        patch: RemoteRow,
    ) -> ClientFuture<'a, u64> {
        Box::pin(async move {
            let table = ident(table)?;
            let columns = column_list(&patch)?;
            let mut sql = format!(
                "UPDATE {table} t \
                 SET ({columns}) = (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1))"
            );
            let mut binds = Vec::new();
            for (index, (column, value)) in filter.eq.iter().enumerate() {
                let column = ident(column)?;
                let keyword = if index == 0 { "WHERE" } else { "AND" };
                // $1 is the payload
                sql.push_str(&format!(" {keyword} t.{column}::text = ${}", index + 2));
                binds.push(bind_text(value));
            }
            let mut query = sqlx::query(&sql).bind(Value::Object(patch));
            for bind in binds {
                query = query.bind(bind);
            }
            let result = query.execute(&self.pool).await.map_err(map_sqlx)?;
            Ok(result.rows_affected())
        })
    }

    fn delete<'a>(&'a self, table: &'a str, id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let table = ident(table)?;
            let sql = format!("DELETE FROM {table} WHERE id::text = $1");
            sqlx::query(&sql)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
            Ok(())
        })
    }

    fn upsert<'a>(
        &'a self,
        table: &'a str,
        key_column: &'a str,
        row: RemoteRow,
    ) -> ClientFuture<'a, RemoteRow> {
        Box::pin(async move {
            let table = ident(table)?;
            let key_column = ident(key_column)?;
            let columns = column_list(&row)?;
            let sql = format!(
                "INSERT INTO {table} ({columns}) \
                 SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1) \
                 ON CONFLICT ({key_column}) DO UPDATE \
                 SET ({columns}) = (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1)) \
                 RETURNING row_to_json({table}.*)"
            );
            let echo = sqlx::query_scalar::<_, Value>(&sql)
                .bind(Value::Object(row))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;
            object_from(echo)
        })
    }

    fn rpc<'a>(&'a self, function: &'a str, args: RemoteRow) -> ClientFuture<'a, Value> {
        Box::pin(async move {
            let function = ident(function)?;
            let sql = format!("SELECT to_jsonb({function}($1::jsonb))");
            sqlx::query_scalar::<_, Value>(&sql)
                .bind(Value::Object(args))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifiers_are_strict() {
        assert!(ident("transport_rows").is_ok());
        assert!(ident("a1_b2").is_ok());
        assert!(ident("Rows").is_err());
        assert!(ident("rows; DROP TABLE x").is_err());
        assert!(ident("").is_err());
        assert!(ident("1abc").is_err());
    }

    #[test]
    fn select_sql_orders_and_binds() {
        let filter = Filter::new()
            .eq("event_id", "ev1")
            .order("created_at")
            .order("id")
            .limit(5);
        let (sql, binds) = select_sql("equipment_rows", &filter).unwrap();
        assert_eq!(
            sql,
            "SELECT row_to_json(t.*) FROM equipment_rows t \
             WHERE t.event_id::text = $1 \
             ORDER BY t.created_at ASC, t.id ASC LIMIT 5"
        );
        assert_eq!(binds, vec!["ev1"]);
    }

    #[test]
    fn bind_text_renders_scalars() {
        assert_eq!(bind_text(&json!("ev1")), "ev1");
        assert_eq!(bind_text(&json!(42)), "42");
        assert_eq!(bind_text(&json!(true)), "true");
    }

    #[test]
    fn column_list_validates_every_key() {
        let row: RemoteRow = [
            ("event_id".to_string(), json!("ev1")),
            ("quantity".to_string(), json!(3)),
        ]
        .into_iter()
        .collect();
        assert_eq!(column_list(&row).unwrap(), "event_id, quantity");

        let bad: RemoteRow = [("bad--col".to_string(), json!(1))].into_iter().collect();
        assert!(column_list(&bad).is_err());
    }
}
