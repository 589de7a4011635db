//! Schema probing for the transport table.
//!
//! The transport table's column names for origin/destination/round-trip vary
//! across historical schema versions, and some deployments type the numeric
//! columns as strict integers. Two small policies absorb that variance:
//!
//! - [`ColumnProbe`] discovers which candidate column triple the table
//!   actually exposes, as an explicit state machine
//!   (`Unprobed → Probing(index) → Resolved(mapping)`), and caches the result
//!   for the rest of the session. Only missing-column errors advance the
//!   probe; anything else propagates immediately.
//! - [`IntegerCoercion`] remembers which numeric fields the remote rejected
//!   as non-integers; those fields are rounded on every later write, and the
//!   rejected write is retried exactly once.

use banchetto_core::client::{Filter, RemoteError, RemoteErrorKind, RowStoreClient};
use banchetto_core::model::RemoteRow;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;

/// One candidate set of transport column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnTriple {
    /// Origin column.
    pub origin: &'static str,
    /// Destination column.
    pub destination: &'static str,
    /// Round-trip flag column.
    pub round_trip: &'static str,
}

/// Candidate column triples, probed in order.
pub const CANDIDATE_COLUMNS: [ColumnTriple; 3] = [
    ColumnTriple {
        origin: "origin",
        destination: "destination",
        round_trip: "round_trip",
    },
    ColumnTriple {
        origin: "from_address",
        destination: "to_address",
        round_trip: "roundtrip",
    },
    ColumnTriple {
        origin: "start_point",
        destination: "end_point",
        round_trip: "is_round_trip",
    },
];

#[derive(Debug, Clone, Copy)]
enum ProbeState {
    Unprobed,
    Probing(usize),
    Resolved(ColumnTriple),
}

/// Session-scoped column discovery for one table.
pub struct ColumnProbe {
    state: AsyncMutex<ProbeState>,
}

impl Default for ColumnProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnProbe {
    /// A probe that has not yet touched the table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AsyncMutex::new(ProbeState::Unprobed),
        }
    }

    /// Resolve the table's column triple, probing on first use.
    ///
    /// A candidate is rejected only by a missing-column error; any other
    /// error class is propagated, leaving the probe where it was so the next
    /// call resumes from the same candidate.
    ///
    /// # Errors
    /// Propagates non-schema remote errors, and reports a missing-column
    /// error when no candidate matches.
    pub async fn resolve(
        &self,
        client: &dyn RowStoreClient,
        table: &str,
    ) -> Result<ColumnTriple, RemoteError> {
        let mut state = self.state.lock().await;
        if let ProbeState::Resolved(columns) = *state {
            return Ok(columns);
        }
        let start = match *state {
            ProbeState::Probing(index) => index,
            _ => 0,
        };
        for (index, candidate) in CANDIDATE_COLUMNS.iter().enumerate().skip(start) {
            *state = ProbeState::Probing(index);
            let filter = Filter::new()
                .order(candidate.origin)
                .order(candidate.destination)
                .order(candidate.round_trip)
                .limit(1);
            match client.select(table, &filter).await {
                Ok(_) => {
                    tracing::debug!(table, index, "transport columns resolved");
                    *state = ProbeState::Resolved(*candidate);
                    return Ok(*candidate);
                }
                Err(err) if err.kind == RemoteErrorKind::MissingColumn => {
                    tracing::debug!(table, index, %err, "candidate columns missing; trying next");
                }
                Err(err) => return Err(err),
            }
        }
        *state = ProbeState::Unprobed;
        Err(RemoteError::with_kind(
            RemoteErrorKind::MissingColumn,
            format!("no known column set matches table {table}"),
        ))
    }
}

/// Rename the canonical origin/destination/round-trip keys of a write payload
/// to the discovered remote columns.
#[must_use]
pub fn to_remote_shape(mut patch: RemoteRow, columns: &ColumnTriple) -> RemoteRow {
    for (canonical, actual) in [
        ("origin", columns.origin),
        ("destination", columns.destination),
        ("round_trip", columns.round_trip),
    ] {
        if canonical != actual {
            if let Some(value) = patch.remove(canonical) {
                patch.insert(actual.to_string(), value);
            }
        }
    }
    patch
}

/// Map a remote row's discovered columns back to the canonical shape.
#[must_use]
pub fn to_canonical_shape(row: &RemoteRow, columns: &ColumnTriple) -> RemoteRow {
    let mut out = row.clone();
    for (canonical, actual) in [
        ("origin", columns.origin),
        ("destination", columns.destination),
        ("round_trip", columns.round_trip),
    ] {
        if canonical != actual {
            if let Some(value) = out.remove(actual) {
                out.insert(canonical.to_string(), value);
            }
        }
    }
    out
}

/// Session memory of fields that must be written as integers.
#[derive(Default)]
pub struct IntegerCoercion {
    fields: Mutex<HashSet<String>>,
}

impl IntegerCoercion {
    /// An empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.fields.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Round the remembered fields of `patch` in place.
    pub fn apply(&self, patch: &mut RemoteRow) {
        let fields = self.lock();
        for field in fields.iter() {
            if let Some(number) = patch.get(field).and_then(Value::as_f64) {
                patch.insert(field.clone(), json!(number.round()));
            }
        }
    }

    /// Round every fractional numeric field of `patch`, remember those fields
    /// for the rest of the session, and report which were touched.
    pub fn round_fractional(&self, patch: &mut RemoteRow) -> Vec<String> {
        let mut touched = Vec::new();
        let rounded: Vec<(String, f64)> = patch
            .iter()
            .filter_map(|(key, value)| {
                value
                    .as_f64()
                    .filter(|n| n.fract() != 0.0)
                    .map(|n| (key.clone(), n.round()))
            })
            .collect();
        let mut fields = self.lock();
        for (key, value) in rounded {
            patch.insert(key.clone(), json!(value));
            fields.insert(key.clone());
            touched.push(key);
        }
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banchetto_core::model::tables;
    use banchetto_testing::InMemoryRowClient;

    const SHARED: [&str; 8] = [
        "id",
        "event_id",
        "created_at",
        "distance_km",
        "vehicle_key",
        "trips",
        "markup_x",
        "notes",
    ];

    fn legacy_columns() -> Vec<&'static str> {
        let mut columns = SHARED.to_vec();
        columns.extend(["from_address", "to_address", "roundtrip"]);
        columns
    }

    #[tokio::test]
    async fn resolves_second_candidate_and_caches() {
        let client = InMemoryRowClient::new();
        client.with_columns(tables::TRANSPORT_ROWS, &legacy_columns());

        let probe = ColumnProbe::new();
        let columns = probe
            .resolve(&client, tables::TRANSPORT_ROWS)
            .await
            .unwrap();
        assert_eq!(columns, CANDIDATE_COLUMNS[1]);
        let probing_selects = client.selects_for(tables::TRANSPORT_ROWS);
        assert_eq!(probing_selects, 2);

        // cached: no further probing selects
        let again = probe
            .resolve(&client, tables::TRANSPORT_ROWS)
            .await
            .unwrap();
        assert_eq!(again, CANDIDATE_COLUMNS[1]);
        assert_eq!(client.selects_for(tables::TRANSPORT_ROWS), probing_selects);
    }

    #[tokio::test]
    async fn non_schema_errors_propagate() {
        let client = InMemoryRowClient::new();
        client.fail_next(RemoteError::new("connection reset"));
        let probe = ColumnProbe::new();
        let err = probe
            .resolve(&client, tables::TRANSPORT_ROWS)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Transport);
    }

    #[test]
    fn shape_mapping_round_trips() {
        let columns = CANDIDATE_COLUMNS[1];
        let mut patch = RemoteRow::new();
        patch.insert("origin".into(), json!("Depot"));
        patch.insert("destination".into(), json!("Villa"));
        patch.insert("round_trip".into(), json!(true));
        patch.insert("distance_km".into(), json!(12.0));

        let remote = to_remote_shape(patch, &columns);
        assert_eq!(remote["from_address"], json!("Depot"));
        assert!(!remote.contains_key("origin"));

        let canonical = to_canonical_shape(&remote, &columns);
        assert_eq!(canonical["origin"], json!("Depot"));
        assert_eq!(canonical["round_trip"], json!(true));
    }

    #[test]
    fn coercion_remembers_rounded_fields() {
        let coercion = IntegerCoercion::new();
        let mut patch = RemoteRow::new();
        patch.insert("distance_km".into(), json!(12.5));
        patch.insert("trips".into(), json!(2.0));

        let touched = coercion.round_fractional(&mut patch);
        assert_eq!(touched, vec!["distance_km".to_string()]);
        assert_eq!(patch["distance_km"], json!(13.0));

        // remembered for later writes
        let mut next = RemoteRow::new();
        next.insert("distance_km".into(), json!(7.4));
        coercion.apply(&mut next);
        assert_eq!(next["distance_km"], json!(7.0));
    }
}
