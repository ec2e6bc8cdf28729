//! Postgres-backed feature store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres};
use tracing::debug;

use super::store::{ColumnKind, ColumnSpec, FeatureStore, SqlValue, TableSpec};

/// Rows per INSERT statement when bulk-writing a table.
const INSERT_BATCH_SIZE: usize = 500;

#[derive(Clone, Debug)]
pub struct PostgresFeatureStore {
    pool: PgPool,
}

impl PostgresFeatureStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn ddl_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Text => "TEXT",
        ColumnKind::Double => "DOUBLE PRECISION",
        ColumnKind::BigInt => "BIGINT",
        ColumnKind::Bool => "BOOLEAN",
        ColumnKind::Jsonb => "JSONB",
    }
}

fn bind_column<'q>(
    query: Query<'q, Postgres, PgArguments>,
    column: &ColumnSpec,
    value: Option<&Value>,
) -> Query<'q, Postgres, PgArguments> {
    let value = value.filter(|v| !v.is_null());
    match column.kind {
        ColumnKind::Text => query.bind(value.and_then(Value::as_str).map(str::to_owned)),
        ColumnKind::Double => query.bind(value.and_then(Value::as_f64)),
        ColumnKind::BigInt => query.bind(value.and_then(Value::as_i64)),
        ColumnKind::Bool => query.bind(value.and_then(Value::as_bool)),
        ColumnKind::Jsonb => query.bind(value.cloned().map(Json)),
    }
}

/// Multi-row INSERT for one batch: `INSERT INTO t (c1, c2) VALUES ($1, $2), ...`.
fn insert_statement(spec: &TableSpec, rows: usize) -> String {
    let columns: Vec<&str> = spec.columns.iter().map(|c| c.name).collect();
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", spec.name, columns.join(", "));
    let width = spec.columns.len();
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..width {
            if col > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!("${}", row * width + col + 1));
        }
        sql.push(')');
    }
    sql
}

async fn insert_rows(conn: &mut PgConnection, spec: &TableSpec, rows: &[Value]) -> Result<()> {
    for batch in rows.chunks(INSERT_BATCH_SIZE) {
        let sql = insert_statement(spec, batch.len());
        let mut query = sqlx::query(&sql);
        for row in batch {
            for column in spec.columns {
                query = bind_column(query, column, row.get(column.name));
            }
        }
        query
            .execute(&mut *conn)
            .await
            .with_context(|| format!("bulk insert into '{}' failed", spec.name))?;
    }
    Ok(())
}

#[async_trait]
impl FeatureStore for PostgresFeatureStore {
    async fn create_table(&self, spec: &TableSpec) -> Result<()> {
        let mut columns: Vec<String> = spec
            .columns
            .iter()
            .map(|c| {
                let null = if c.nullable { "" } else { " NOT NULL" };
                format!("{} {}{}", c.name, ddl_type(c.kind), null)
            })
            .collect();
        if !spec.primary_key.is_empty() {
            columns.push(format!("PRIMARY KEY ({})", spec.primary_key.join(", ")));
        }
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            spec.name,
            columns.join(", ")
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to create table '{}'", spec.name))?;

        for index in spec.indexes {
            let ddl = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                index.name,
                spec.name,
                index.columns.join(", ")
            );
            sqlx::query(&ddl)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to create index '{}'", index.name))?;
        }
        debug!(table = spec.name, "ensured feature table");
        Ok(())
    }

    async fn table_exists(&self, spec: &TableSpec) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(spec.name)
        .fetch_one(&self.pool)
        .await
        .context("failed to check table existence")?;
        Ok(exists)
    }

    async fn insert(&self, spec: &TableSpec, rows: &[Value]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.acquire().await.context("pool acquire failed")?;
        insert_rows(&mut conn, spec, rows).await
    }

    async fn replace_all(&self, spec: &TableSpec, rows: &[Value]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;
        sqlx::query(&format!("DELETE FROM {}", spec.name))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to clear table '{}'", spec.name))?;
        insert_rows(&mut tx, spec, rows).await?;
        tx.commit().await.context("commit failed")?;
        debug!(table = spec.name, rows = rows.len(), "replaced table contents");
        Ok(())
    }

    async fn select(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Value>> {
        let wrapped = format!("SELECT row_to_json(q) FROM ({sql}) q");
        let mut query = sqlx::query_scalar::<_, Value>(&wrapped);
        for param in params {
            query = match param {
                SqlValue::Text(v) => query.bind(v.clone()),
                SqlValue::Double(v) => query.bind(*v),
                SqlValue::BigInt(v) => query.bind(*v),
                SqlValue::Bool(v) => query.bind(*v),
            };
        }
        query
            .fetch_all(&self.pool)
            .await
            .context("feature store query failed")
    }
}
