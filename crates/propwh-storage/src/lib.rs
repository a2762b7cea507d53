//! Warehouse storage for the property loader: table catalog, idempotent
//! dimension upserts, and the Postgres and in-memory backends.

pub mod catalog;
pub mod memory;
pub mod postgres;
pub mod report;
pub mod resolver;
pub mod schema;

use async_trait::async_trait;
use propwh_core::{AttributeSet, Dimension, SnapshotFact, SurrogateKey};
use thiserror::Error;

pub use catalog::{Catalog, DimensionTable, KeyPredicate};
pub use memory::MemoryWarehouse;
pub use postgres::PgWarehouse;
pub use report::{IntegrityCounts, SampleRow, ValuationStats, WarehouseReport};
pub use resolver::DimensionResolver;
pub use schema::SchemaReport;

pub const CRATE_NAME: &str = "propwh-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("no table registered for dimension `{}`", .0.as_str())]
    UnknownDimension(Dimension),
    #[error("column `{column}` is not part of {table}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("no generated key available for {table}")]
    MissingKey { table: &'static str },
    #[error("{table}.{column} references missing row {key}")]
    DanglingReference {
        table: &'static str,
        column: &'static str,
        key: SurrogateKey,
    },
    #[error("warehouse state lock poisoned")]
    Poisoned,
}

/// A warehouse a load run can write into.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Idempotent schema/index setup, run outside any load transaction.
    /// Individual statement failures are reported, not raised.
    async fn ensure_schema(&self) -> Result<SchemaReport, StoreError>;

    /// Open the one transaction a run writes through.
    async fn begin(&self) -> Result<Box<dyn WarehouseSession>, StoreError>;

    /// Row counts and integrity checks over committed data.
    async fn report(&self) -> Result<WarehouseReport, StoreError>;
}

/// Writes staged against an open transaction. Nothing is visible to other
/// readers until `commit`.
#[async_trait]
pub trait WarehouseSession: Send {
    /// Clear the raw staging table.
    async fn reset_staging(&mut self) -> Result<(), StoreError>;

    /// Store one raw record, returning its staging id.
    async fn stage_raw(&mut self, raw: &serde_json::Value) -> Result<i64, StoreError>;

    /// Insert `attrs`, or overwrite the row sharing its natural key. Returns
    /// the written row's key when the backend hands one back atomically.
    async fn write_dimension(
        &mut self,
        table: &DimensionTable,
        attrs: &AttributeSet,
    ) -> Result<Option<SurrogateKey>, StoreError>;

    async fn find_by_natural_key(
        &mut self,
        table: &DimensionTable,
        predicates: &[KeyPredicate],
    ) -> Result<Option<SurrogateKey>, StoreError>;

    /// Identifier generated by the most recent insert into `table`.
    /// Only meaningful with a single writer.
    async fn last_generated_key(&mut self, table: &DimensionTable) -> Result<SurrogateKey, StoreError>;

    async fn insert_fact(&mut self, fact: &SnapshotFact) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
