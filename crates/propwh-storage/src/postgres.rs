//! Postgres warehouse backed by sqlx.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use propwh_core::{AttributeSet, SnapshotFact, SqlValue, SurrogateKey};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::QueryScalar;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use crate::catalog::{
    lookup_sql, upsert_sql, Catalog, ColumnKind, DimensionTable, KeyPredicate, FACT_TABLE,
    STAGING_TABLE,
};
use crate::report::{
    rank_counts, IntegrityCounts, SampleRow, ValuationStats, WarehouseReport, SAMPLE_ROWS_LIMIT,
    TOP_STATES_LIMIT,
};
use crate::schema::{schema_statements, SchemaReport};
use crate::{StoreError, Warehouse, WarehouseSession};

type KeyQuery<'q> = QueryScalar<'q, Postgres, i64, PgArguments>;

#[derive(Debug, Clone)]
pub struct PgWarehouse {
    pool: PgPool,
    catalog: Catalog,
}

impl PgWarehouse {
    /// A run owns one connection; a second covers `validate` after a load.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            catalog: Catalog::warehouse(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn count(&self, sql: &str) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar::<_, i64>(sql).fetch_one(&self.pool).await?)
    }

    async fn grouped_counts(&self, sql: &str) -> Result<BTreeMap<String, i64>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn ensure_schema(&self) -> Result<SchemaReport, StoreError> {
        let mut report = SchemaReport::default();
        for statement in schema_statements() {
            match sqlx::raw_sql(&statement).execute(&self.pool).await {
                Ok(_) => report.executed += 1,
                Err(err) => {
                    if report.record_failure(err.to_string()) {
                        let head = statement.lines().find(|l| !l.trim_start().starts_with("--"));
                        warn!(statement = head.unwrap_or_default(), error = %err, "schema statement failed");
                    }
                }
            }
        }
        debug!(
            executed = report.executed,
            suppressed = report.suppressed,
            "schema bootstrap finished"
        );
        Ok(report)
    }

    async fn begin(&self) -> Result<Box<dyn WarehouseSession>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSession { tx }))
    }

    async fn report(&self) -> Result<WarehouseReport, StoreError> {
        let staged_records = self.count(&format!("SELECT COUNT(*) FROM {STAGING_TABLE}")).await?;

        let mut dimension_counts = BTreeMap::new();
        for table in self.catalog.tables() {
            let count = self.count(&format!("SELECT COUNT(*) FROM {}", table.name)).await?;
            dimension_counts.insert(table.name.to_string(), count);
        }
        let fact_count = self.count(&format!("SELECT COUNT(*) FROM {FACT_TABLE}")).await?;

        let integrity = IntegrityCounts {
            missing_addresses: self
                .count(&format!(
                    "SELECT COUNT(*) FROM {FACT_TABLE} WHERE address_sk IS NULL"
                ))
                .await?,
            orphan_properties: self
                .count(&format!(
                    "SELECT COUNT(*) FROM {FACT_TABLE} f \
                     LEFT JOIN dim_property p ON f.property_sk = p.property_sk \
                     WHERE p.property_sk IS NULL"
                ))
                .await?,
            valuation_mismatches: self
                .count(&format!(
                    "SELECT COUNT(*) FROM {FACT_TABLE} f \
                     LEFT JOIN dim_valuation v ON f.valuation_sk = v.valuation_sk \
                     WHERE f.valuation_sk IS NOT NULL AND v.provider IS NULL"
                ))
                .await?,
        };

        let property_types = self
            .grouped_counts(
                "SELECT property_type, COUNT(*) FROM dim_property \
                 WHERE property_type IS NOT NULL GROUP BY property_type",
            )
            .await?;
        let states = self
            .grouped_counts(
                "SELECT state, COUNT(*) FROM dim_address \
                 WHERE state IS NOT NULL GROUP BY state",
            )
            .await?;

        let (count, avg, min, max) = sqlx::query_as::<_, (i64, Option<f64>, Option<f64>, Option<f64>)>(
            "SELECT COUNT(estimate), AVG(estimate), MIN(estimate), MAX(estimate) FROM dim_valuation",
        )
        .fetch_one(&self.pool)
        .await?;
        let valuation_stats = match (avg, min, max) {
            (Some(avg_estimate), Some(min_estimate), Some(max_estimate)) if count > 0 => {
                Some(ValuationStats {
                    count,
                    avg_estimate,
                    min_estimate,
                    max_estimate,
                })
            }
            _ => None,
        };

        type SampleTuple = (
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<f64>,
            Option<f64>,
            NaiveDate,
        );
        let samples = sqlx::query_as::<_, SampleTuple>(&format!(
            "SELECT p.property_bk, p.property_type, a.city, a.state, \
                    v.estimate, t.tax_amount, f.effective_date \
             FROM {FACT_TABLE} f \
             LEFT JOIN dim_property p ON f.property_sk = p.property_sk \
             LEFT JOIN dim_address a ON f.address_sk = a.address_sk \
             LEFT JOIN dim_valuation v ON f.valuation_sk = v.valuation_sk \
             LEFT JOIN dim_tax t ON f.tax_sk = t.tax_sk \
             ORDER BY f.snapshot_sk \
             LIMIT {SAMPLE_ROWS_LIMIT}"
        ))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(
            |(property_bk, property_type, city, state, estimate, tax_amount, effective_date)| {
                SampleRow {
                    property_bk,
                    property_type,
                    city,
                    state,
                    estimate,
                    tax_amount,
                    effective_date,
                }
            },
        )
        .collect();

        Ok(WarehouseReport {
            staged_records,
            dimension_counts,
            fact_count,
            integrity,
            property_types: rank_counts(property_types, None),
            top_states: rank_counts(states, Some(TOP_STATES_LIMIT)),
            valuation_stats,
            samples,
        })
    }
}

/// One load run's transaction. Dropping it without `commit` rolls back.
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl WarehouseSession for PgSession {
    async fn reset_staging(&mut self) -> Result<(), StoreError> {
        sqlx::query(&format!("TRUNCATE TABLE {STAGING_TABLE}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn stage_raw(&mut self, raw: &serde_json::Value) -> Result<i64, StoreError> {
        let sql = format!("INSERT INTO {STAGING_TABLE} (raw_json) VALUES ($1) RETURNING stg_id");
        Ok(sqlx::query_scalar::<_, i64>(&sql)
            .bind(sqlx::types::Json(raw))
            .fetch_one(&mut *self.tx)
            .await?)
    }

    async fn write_dimension(
        &mut self,
        table: &DimensionTable,
        attrs: &AttributeSet,
    ) -> Result<Option<SurrogateKey>, StoreError> {
        let columns = attrs.column_names().collect::<Vec<_>>();
        let sql = if columns.is_empty() {
            format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING {}",
                table.name, table.surrogate_key
            )
        } else {
            upsert_sql(table, &columns)
        };

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for (column, value) in attrs.iter() {
            query = bind_value(query, column_kind(table, column)?, value);
        }
        Ok(query.fetch_optional(&mut *self.tx).await?)
    }

    async fn find_by_natural_key(
        &mut self,
        table: &DimensionTable,
        predicates: &[KeyPredicate],
    ) -> Result<Option<SurrogateKey>, StoreError> {
        let (sql, binds) = lookup_sql(table, predicates);
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for (column, value) in binds {
            query = bind_value(query, column_kind(table, column)?, value);
        }
        Ok(query.fetch_optional(&mut *self.tx).await?)
    }

    async fn last_generated_key(&mut self, table: &DimensionTable) -> Result<SurrogateKey, StoreError> {
        let key = sqlx::query_scalar::<_, Option<i64>>("SELECT currval(pg_get_serial_sequence($1, $2))")
            .bind(table.name)
            .bind(table.surrogate_key)
            .fetch_one(&mut *self.tx)
            .await?;
        key.ok_or(StoreError::MissingKey { table: table.name })
    }

    async fn insert_fact(&mut self, fact: &SnapshotFact) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO {FACT_TABLE} \
             (property_sk, address_sk, hoa_sk, valuation_sk, rehab_sk, tax_sk, effective_date, source_record_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(fact.property_sk)
        .bind(fact.address_sk)
        .bind(fact.hoa_sk)
        .bind(fact.valuation_sk)
        .bind(fact.rehab_sk)
        .bind(fact.tax_sk)
        .bind(fact.effective_date)
        .bind(fact.source_record_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn column_kind(table: &DimensionTable, column: &str) -> Result<ColumnKind, StoreError> {
    table
        .column(column)
        .map(|c| c.kind)
        .ok_or_else(|| StoreError::UnknownColumn {
            table: table.name,
            column: column.to_string(),
        })
}

/// A value coerced to the Postgres type of its column.
#[derive(Debug, Clone, PartialEq)]
enum BindValue {
    Text(Option<String>),
    Integer(Option<i32>),
    Double(Option<f64>),
    Date(Option<NaiveDate>),
    Json(Option<serde_json::Value>),
}

fn coerce(kind: ColumnKind, value: &SqlValue) -> BindValue {
    match kind {
        ColumnKind::Text => BindValue::Text(match value {
            SqlValue::Null => None,
            SqlValue::Text(text) => Some(text.clone()),
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::Float(v) => Some(v.to_string()),
            SqlValue::Date(d) => Some(d.to_string()),
            SqlValue::Json(v) => Some(v.to_string()),
        }),
        ColumnKind::Integer => BindValue::Integer(
            value
                .as_f64()
                .filter(|v| v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64)
                .map(|v| v as i32),
        ),
        ColumnKind::Double => BindValue::Double(value.as_f64()),
        ColumnKind::Date => BindValue::Date(match value {
            SqlValue::Date(d) => Some(*d),
            _ => None,
        }),
        ColumnKind::Json => BindValue::Json(match value {
            SqlValue::Null => None,
            SqlValue::Json(v) => Some(v.clone()),
            SqlValue::Text(text) => Some(serde_json::Value::String(text.clone())),
            other => other.as_f64().map(serde_json::Value::from),
        }),
    }
}

fn bind_value<'q>(query: KeyQuery<'q>, kind: ColumnKind, value: &SqlValue) -> KeyQuery<'q> {
    match coerce(kind, value) {
        BindValue::Text(v) => query.bind(v),
        BindValue::Integer(v) => query.bind(v),
        BindValue::Double(v) => query.bind(v),
        BindValue::Date(v) => query.bind(v),
        BindValue::Json(v) => query.bind(v),
    }
}
