//! Integration tests against a live `PostgreSQL`.
//!
//! Gated on `DATABASE_URL` and ignored by default; point the variable at a
//! scratch database and run with `cargo test -p banchetto-postgres -- --ignored`.

use banchetto_core::client::{Filter, RemoteErrorKind, RowStoreClient};
use banchetto_core::model::RemoteRow;
use banchetto_postgres::PgRowClient;
use serde_json::{Value, json};

fn patch(entries: &[(&str, Value)]) -> RemoteRow {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

async fn client() -> PgRowClient {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
    let client = PgRowClient::connect(&url).await.expect("connect");
    let pool = sqlx::PgPool::connect(&url).await.expect("pool");
    sqlx::query("DROP TABLE IF EXISTS pg_client_scratch")
        .execute(&pool)
        .await
        .expect("drop");
    sqlx::query(
        "CREATE TABLE pg_client_scratch (
             id text PRIMARY KEY DEFAULT gen_random_uuid()::text,
             event_id text NOT NULL,
             name text,
             quantity double precision,
             created_at timestamptz NOT NULL DEFAULT now()
         )",
    )
    .execute(&pool)
    .await
    .expect("create");
    client
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch database"]
async fn insert_select_update_delete_round_trip() {
    let client = client().await;

    let echo = client
        .insert(
            "pg_client_scratch",
            patch(&[
                ("event_id", json!("ev1")),
                ("name", json!("Tables")),
                ("quantity", json!(4.0)),
            ]),
        )
        .await
        .expect("insert");
    let id = echo["id"].as_str().expect("assigned id").to_string();
    assert!(echo["created_at"].is_string() || echo["created_at"].is_object());

    let rows = client
        .select(
            "pg_client_scratch",
            &Filter::new().eq("event_id", "ev1").order("created_at").order("id"),
        )
        .await
        .expect("select");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("Tables"));

    let updated = client
        .update(
            "pg_client_scratch",
            &id,
            patch(&[("quantity", json!(6.0))]),
        )
        .await
        .expect("update");
    assert_eq!(updated["quantity"], json!(6.0));

    client
        .delete("pg_client_scratch", &id)
        .await
        .expect("delete");
    let rows = client
        .select("pg_client_scratch", &Filter::new().eq("event_id", "ev1"))
        .await
        .expect("select after delete");
    assert!(rows.is_empty());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch database"]
async fn missing_column_classifies_for_probing() {
    let client = client().await;
    let err = client
        .select("pg_client_scratch", &Filter::new().order("no_such_column"))
        .await
        .expect_err("missing column must fail");
    assert_eq!(err.kind, RemoteErrorKind::MissingColumn);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch database"]
async fn upsert_replaces_by_key() {
    let client = client().await;
    client
        .upsert(
            "pg_client_scratch",
            "id",
            patch(&[("id", json!("fixed")), ("event_id", json!("ev1")), ("quantity", json!(1.0))]),
        )
        .await
        .expect("first upsert");
    let echo = client
        .upsert(
            "pg_client_scratch",
            "id",
            patch(&[("id", json!("fixed")), ("event_id", json!("ev1")), ("quantity", json!(2.0))]),
        )
        .await
        .expect("second upsert");
    assert_eq!(echo["quantity"], json!(2.0));

    let rows = client
        .select("pg_client_scratch", &Filter::new().eq("id", "fixed"))
        .await
        .expect("select");
    assert_eq!(rows.len(), 1);
}
