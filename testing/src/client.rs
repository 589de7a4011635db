//! In-memory remote store double.
//!
//! Substitutes the production row-store client in tests. Beyond plain CRUD it
//! can imitate the remote store's awkward corners: declared column sets per
//! table (so a query against an undeclared column fails exactly like a
//! missing remote column), strict integer columns, and one-shot fault
//! injection. Every operation is appended to an op log tests can inspect.

use banchetto_core::client::{ClientFuture, Filter, RemoteError, RemoteErrorKind, RowStoreClient};
use banchetto_core::model::RemoteRow;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

type RpcHandler = dyn Fn(RemoteRow) -> Result<Value, RemoteError> + Send + Sync;

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<RemoteRow>>,
    columns: HashMap<String, HashSet<String>>,
    strict_int: HashMap<String, HashSet<String>>,
    fail_next: VecDeque<RemoteError>,
    rpc: HashMap<String, Arc<RpcHandler>>,
    ops: Vec<String>,
    next_id: u64,
    next_created: u64,
}

/// In-memory [`RowStoreClient`] with schema-variant and fault injection.
#[derive(Clone, Default)]
pub struct InMemoryRowClient {
    state: Arc<Mutex<State>>,
}

fn created_base() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_454) // 2026-01-01
}

impl InMemoryRowClient {
    /// An empty store accepting any column on any table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Declare the column set of `table`. Once declared, referencing any
    /// other column fails with a missing-column error, like a real schema.
    pub fn with_columns(&self, table: &str, columns: &[&str]) {
        self.lock().columns.insert(
            table.to_string(),
            columns.iter().map(ToString::to_string).collect(),
        );
    }

    /// Declare `column` of `table` as a strict integer column: fractional
    /// numeric payloads are rejected the way a strict remote type is.
    pub fn with_strict_integer(&self, table: &str, column: &str) {
        self.lock()
            .strict_int
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string());
    }

    /// Make the next operation (of any kind) fail with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().fail_next.push_back(error);
    }

    /// Register a remote-procedure handler.
    pub fn on_rpc<F>(&self, function: &str, handler: F)
    where
        F: Fn(RemoteRow) -> Result<Value, RemoteError> + Send + Sync + 'static,
    {
        self.lock()
            .rpc
            .insert(function.to_string(), Arc::new(handler));
    }

    /// Insert rows verbatim, without id/timestamp assignment.
    pub fn seed(&self, table: &str, rows: Vec<RemoteRow>) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Snapshot of a table's rows, unordered.
    #[must_use]
    pub fn table(&self, table: &str) -> Vec<RemoteRow> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// The operation log, most recent last.
    #[must_use]
    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    /// How many selects have touched `table`.
    #[must_use]
    pub fn selects_for(&self, table: &str) -> usize {
        let prefix = format!("select:{table}");
        self.lock()
            .ops
            .iter()
            .filter(|op| op.starts_with(&prefix))
            .count()
    }

    fn check_fault(state: &mut State) -> Result<(), RemoteError> {
        match state.fail_next.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_columns(
        state: &State,
        table: &str,
        referenced: impl Iterator<Item = String>,
    ) -> Result<(), RemoteError> {
        let Some(declared) = state.columns.get(table) else {
            return Ok(());
        };
        for column in referenced {
            if !declared.contains(&column) {
                return Err(RemoteError::new(format!(
                    "column \"{column}\" does not exist"
                )));
            }
        }
        Ok(())
    }

    fn check_strict_ints(
        state: &State,
        table: &str,
        patch: &RemoteRow,
    ) -> Result<(), RemoteError> {
        let Some(strict) = state.strict_int.get(table) else {
            return Ok(());
        };
        for column in strict {
            if let Some(value) = patch.get(column) {
                if let Some(number) = value.as_f64() {
                    if number.fract() != 0.0 {
                        return Err(RemoteError::new(format!(
                            "invalid input syntax for type integer: \"{number}\""
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn do_select(&self, table: &str, filter: &Filter) -> Result<Vec<RemoteRow>, RemoteError> {
        let mut state = self.lock();
        state
            .ops
            .push(format!("select:{table}:order={}", filter.order.join(",")));
        Self::check_fault(&mut state)?;
        let referenced = filter
            .eq
            .iter()
            .map(|(c, _)| c.clone())
            .chain(filter.order.iter().cloned());
        Self::check_columns(&state, table, referenced)?;

        let mut rows: Vec<RemoteRow> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        filter
                            .eq
                            .iter()
                            .all(|(col, value)| row.get(col) == Some(value))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            for column in &filter.order {
                let ord = value_cmp(a.get(column), b.get(column));
                if ord != CmpOrdering::Equal {
                    return ord;
                }
            }
            CmpOrdering::Equal
        });
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn do_insert(&self, table: &str, mut row: RemoteRow) -> Result<RemoteRow, RemoteError> {
        let mut state = self.lock();
        state.ops.push(format!("insert:{table}"));
        Self::check_fault(&mut state)?;
        Self::check_columns(&state, table, row.keys().cloned())?;
        Self::check_strict_ints(&state, table, &row)?;

        if !row.contains_key("id") {
            state.next_id += 1;
            row.insert("id".into(), json!(format!("r{:04}", state.next_id)));
        }
        if !row.contains_key("created_at") {
            let at = created_base() + Duration::seconds(i64::try_from(state.next_created).unwrap_or(0));
            state.next_created += 1;
            row.insert("created_at".into(), json!(at.to_rfc3339()));
        }
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    fn do_update(
        &self,
        table: &str,
        id: &str,
        patch: RemoteRow,
    ) -> Result<RemoteRow, RemoteError> {
        let mut state = self.lock();
        state.ops.push(format!("update:{table}:{id}"));
        Self::check_fault(&mut state)?;
        Self::check_columns(&state, table, patch.keys().cloned())?;
        Self::check_strict_ints(&state, table, &patch)?;

        let rows = state.tables.entry(table.to_string()).or_default();
        let Some(row) = rows
            .iter_mut()
            .find(|row| row.get("id").and_then(Value::as_str) == Some(id))
        else {
            return Err(RemoteError::with_kind(
                RemoteErrorKind::Other,
                format!("no row with id {id}"),
            ));
        };
        for (key, value) in patch {
            row.insert(key, value);
        }
        Ok(row.clone())
    }

    fn do_update_where(
        &self,
        table: &str,
        filter: &Filter,
        patch: RemoteRow,
    ) -> Result<u64, RemoteError> {
        let mut state = self.lock();
        state.ops.push(format!("update_where:{table}"));
        Self::check_fault(&mut state)?;
        let referenced = filter
            .eq
            .iter()
            .map(|(c, _)| c.clone())
            .chain(patch.keys().cloned());
        Self::check_columns(&state, table, referenced)?;
        Self::check_strict_ints(&state, table, &patch)?;

        let rows = state.tables.entry(table.to_string()).or_default();
        let mut touched = 0;
        for row in rows.iter_mut() {
            if filter
                .eq
                .iter()
                .all(|(col, value)| row.get(col) == Some(value))
            {
                for (key, value) in &patch {
                    row.insert(key.clone(), value.clone());
                }
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn do_delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.ops.push(format!("delete:{table}:{id}"));
        Self::check_fault(&mut state)?;
        if let Some(rows) = state.tables.get_mut(table) {
            rows.retain(|row| row.get("id").and_then(Value::as_str) != Some(id));
        }
        Ok(())
    }

    fn do_upsert(
        &self,
        table: &str,
        key_column: &str,
        row: RemoteRow,
    ) -> Result<RemoteRow, RemoteError> {
        let mut state = self.lock();
        state.ops.push(format!("upsert:{table}:{key_column}"));
        Self::check_fault(&mut state)?;
        Self::check_columns(&state, table, row.keys().cloned())?;
        Self::check_strict_ints(&state, table, &row)?;

        let key_value = row.get(key_column).cloned().unwrap_or(Value::Null);
        let next_id = {
            state.next_id += 1;
            state.next_id
        };
        let rows = state.tables.entry(table.to_string()).or_default();
        if let Some(existing) = rows
            .iter_mut()
            .find(|r| r.get(key_column).cloned().unwrap_or(Value::Null) == key_value)
        {
            for (key, value) in row {
                existing.insert(key, value);
            }
            return Ok(existing.clone());
        }
        let mut row = row;
        if !row.contains_key("id") {
            row.insert("id".into(), json!(format!("r{next_id:04}")));
        }
        rows.push(row.clone());
        Ok(row)
    }

    fn do_rpc(&self, function: &str, args: RemoteRow) -> Result<Value, RemoteError> {
        let handler = {
            let mut state = self.lock();
            state.ops.push(format!("rpc:{function}"));
            Self::check_fault(&mut state)?;
            state.rpc.get(function).cloned()
        };
        match handler {
            Some(handler) => handler(args),
            None => Err(RemoteError::new(format!(
                "function {function} does not exist"
            ))),
        }
    }
}

/// Total order over JSON values: nulls, then numbers, then strings, then
/// booleans, then everything else by rendered text.
fn value_cmp(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Bool(_)) => 3,
            Some(_) => 4,
        }
    }
    match rank(a).cmp(&rank(b)) {
        CmpOrdering::Equal => match (a, b) {
            (Some(Value::Number(x)), Some(Value::Number(y))) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(CmpOrdering::Equal),
            (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
            (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
            (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
            _ => CmpOrdering::Equal,
        },
        other => other,
    }
}

impl RowStoreClient for InMemoryRowClient {
    fn select<'a>(
        &'a self,
        table: &'a str,
        filter: &'a Filter,
    ) -> ClientFuture<'a, Vec<RemoteRow>> {
        Box::pin(async move { self.do_select(table, filter) })
    }

    fn insert<'a>(&'a self, table: &'a str, row: RemoteRow) -> ClientFuture<'a, RemoteRow> {
        Box::pin(async move { self.do_insert(table, row) })
    }

    fn update<'a>(
        &'a self,
        table: &'a str,
        id: &'a str,
        patch: RemoteRow,
    ) -> ClientFuture<'a, RemoteRow> {
        Box::pin(async move { self.do_update(table, id, patch) })
    }

    fn update_where<'a>(
        &'a self,
        table: &'a str,
        filter: &'a Filter,
        patch: RemoteRow,
    ) -> ClientFuture<'a, u64> {
        Box::pin(async move { self.do_update_where(table, filter, patch) })
    }

    fn delete<'a>(&'a self, table: &'a str, id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move { self.do_delete(table, id) })
    }

    fn upsert<'a>(
        &'a self,
        table: &'a str,
        key_column: &'a str,
        row: RemoteRow,
    ) -> ClientFuture<'a, RemoteRow> {
        Box::pin(async move { self.do_upsert(table, key_column, row) })
    }

    fn rpc<'a>(&'a self, function: &'a str, args: RemoteRow) -> ClientFuture<'a, Value> {
        Box::pin(async move { self.do_rpc(function, args) })
    }
}
