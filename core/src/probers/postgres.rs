//! PostgreSQL prober. Uses `sqlx`, the same Postgres stack used for the
//! controller's own store.

use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use sqlx::{Column, ConnectOptions, Row};

use crate::model::{Check, CheckKind, CheckResult};

pub async fn probe_postgres(check: &Check, timeout: Duration) -> CheckResult {
    let (conn_string, query, expected) = match &check.kind {
        CheckKind::Postgres {
            postgres_conn_string,
            postgres_query,
            expected_query_value,
        } => (postgres_conn_string, postgres_query, expected_query_value),
        _ => unreachable!("probe_postgres called on non-postgres check"),
    };

    let start = std::time::Instant::now();

    let connect_fut = async {
        let opts: PgConnectOptions = conn_string
            .parse()
            .map_err(|e: sqlx::Error| e.to_string())?;
        opts.connect().await.map_err(|e| e.to_string())
    };

    let mut conn = match tokio::time::timeout(timeout, connect_fut).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return CheckResult::failure(check.id(), 0, start.elapsed().as_millis() as u32, e),
        Err(_) => return CheckResult::failure(check.id(), 0, start.elapsed().as_millis() as u32, "connection timed out"),
    };

    let Some(query) = query.as_deref().filter(|q| !q.is_empty()) else {
        // Liveness ping only.
        let ping = tokio::time::timeout(timeout, sqlx::query("SELECT 1").execute(&mut conn)).await;
        let elapsed_ms = start.elapsed().as_millis() as u32;
        return match ping {
            Ok(Ok(_)) => CheckResult::success(check.id(), 200, elapsed_ms),
            Ok(Err(e)) => CheckResult::failure(check.id(), 0, elapsed_ms, e.to_string()),
            Err(_) => CheckResult::failure(check.id(), 0, elapsed_ms, "query timed out"),
        };
    };

    let fetch = tokio::time::timeout(timeout, sqlx::query(query).fetch_all(&mut conn)).await;
    let elapsed_ms = start.elapsed().as_millis() as u32;

    let rows = match fetch {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => return CheckResult::failure(check.id(), 0, elapsed_ms, e.to_string()),
        Err(_) => return CheckResult::failure(check.id(), 0, elapsed_ms, "query timed out"),
    };

    if rows.len() != 1 {
        return CheckResult::failure(
            check.id(),
            0,
            elapsed_ms,
            format!("expected exactly one row, got {}", rows.len()),
        );
    }

    let row = &rows[0];
    if row.columns().len() != 1 {
        return CheckResult::failure(check.id(), 0, elapsed_ms, "expected exactly one column");
    }

    let value: String = match row.try_get::<String, _>(0) {
        Ok(v) => v,
        Err(_) => match row.try_get::<i64, _>(0) {
            Ok(v) => v.to_string(),
            Err(e) => return CheckResult::failure(check.id(), 0, elapsed_ms, format!("non-string-coercible column: {e}")),
        },
    };

    if let Some(expected) = expected {
        if !expected.is_empty() && expected != &value {
            return CheckResult::failure(
                check.id(),
                0,
                elapsed_ms,
                format!("expected value '{expected}', got '{value}'"),
            )
            .with_body(value);
        }
    }

    CheckResult::success(check.id(), 200, elapsed_ms).with_body(value)
}
