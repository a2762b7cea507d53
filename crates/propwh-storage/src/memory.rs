//! In-memory warehouse with the same transaction and uniqueness rules as the
//! Postgres schema. Backs `--dry-run` loads and the test suites.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use propwh_core::{AttributeSet, SnapshotFact, SurrogateKey};

use crate::catalog::{
    Catalog, DimensionTable, KeyPredicate, DIM_ADDRESS, DIM_PROPERTY, DIM_TAX, DIM_VALUATION,
};
use crate::report::{
    rank_counts, IntegrityCounts, SampleRow, ValuationStats, WarehouseReport, SAMPLE_ROWS_LIMIT,
    TOP_STATES_LIMIT,
};
use crate::{SchemaReport, StoreError, Warehouse, WarehouseSession};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    rows: Vec<(SurrogateKey, AttributeSet)>,
    last_key: SurrogateKey,
}

impl MemoryTable {
    fn contains(&self, key: SurrogateKey) -> bool {
        self.rows.iter().any(|(k, _)| *k == key)
    }

    fn get(&self, key: SurrogateKey) -> Option<&AttributeSet> {
        self.rows.iter().find(|(k, _)| *k == key).map(|(_, row)| row)
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: BTreeMap<&'static str, MemoryTable>,
    facts: Vec<SnapshotFact>,
    staging: Vec<(i64, serde_json::Value)>,
    last_staging_id: i64,
}

impl MemoryState {
    fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.get(name)
    }

    fn check_reference(
        &self,
        table: &DimensionTable,
        column: &'static str,
        key: Option<SurrogateKey>,
    ) -> Result<(), StoreError> {
        match key {
            Some(key) if !self.table(table.name).is_some_and(|t| t.contains(key)) => {
                Err(StoreError::DanglingReference {
                    table: crate::catalog::FACT_TABLE,
                    column,
                    key,
                })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<MemoryState>>,
    catalog: Catalog,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Result<MemoryState, StoreError> {
        Ok(self.state.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }

    /// Committed rows of one dimension table, in insertion order.
    pub fn dimension_rows(&self, table: &str) -> Result<Vec<(SurrogateKey, AttributeSet)>, StoreError> {
        Ok(self
            .snapshot()?
            .table(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default())
    }

    pub fn facts(&self) -> Result<Vec<SnapshotFact>, StoreError> {
        Ok(self.snapshot()?.facts)
    }

    pub fn staged(&self) -> Result<Vec<(i64, serde_json::Value)>, StoreError> {
        Ok(self.snapshot()?.staging)
    }

    fn build_report(&self, state: &MemoryState) -> WarehouseReport {
        let row_count = |name: &str| state.table(name).map(|t| t.rows.len() as i64).unwrap_or(0);

        let dimension_counts = self
            .catalog
            .tables()
            .map(|table| (table.name.to_string(), row_count(table.name)))
            .collect::<BTreeMap<_, _>>();

        let properties = state.table(DIM_PROPERTY.name);
        let valuations = state.table(DIM_VALUATION.name);

        let integrity = IntegrityCounts {
            missing_addresses: state.facts.iter().filter(|f| f.address_sk.is_none()).count() as i64,
            orphan_properties: state
                .facts
                .iter()
                .filter(|f| {
                    f.property_sk
                        .map_or(true, |key| !properties.is_some_and(|t| t.contains(key)))
                })
                .count() as i64,
            valuation_mismatches: state
                .facts
                .iter()
                .filter_map(|f| f.valuation_sk)
                .filter(|key| {
                    valuations
                        .and_then(|t| t.get(*key))
                        .map_or(true, |row| row.get("provider").is_null())
                })
                .count() as i64,
        };

        let mut by_type = BTreeMap::new();
        for (_, row) in properties.map(|t| t.rows.as_slice()).unwrap_or_default() {
            if let Some(kind) = row.get("property_type").as_text() {
                *by_type.entry(kind.to_string()).or_insert(0i64) += 1;
            }
        }

        let mut by_state = BTreeMap::new();
        for (_, row) in state
            .table(DIM_ADDRESS.name)
            .map(|t| t.rows.as_slice())
            .unwrap_or_default()
        {
            if let Some(code) = row.get("state").as_text() {
                *by_state.entry(code.to_string()).or_insert(0i64) += 1;
            }
        }

        let estimates = valuations
            .map(|t| t.rows.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|(_, row)| row.get("estimate").as_f64())
            .collect::<Vec<_>>();
        let valuation_stats = (!estimates.is_empty()).then(|| ValuationStats {
            count: estimates.len() as i64,
            avg_estimate: estimates.iter().sum::<f64>() / estimates.len() as f64,
            min_estimate: estimates.iter().copied().fold(f64::INFINITY, f64::min),
            max_estimate: estimates.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        });

        let text = |table: &DimensionTable, key: Option<SurrogateKey>, column: &str| {
            key.and_then(|key| {
                let value = state.table(table.name)?.get(key)?.get(column);
                value.as_text().map(str::to_string)
            })
        };
        let number = |table: &DimensionTable, key: Option<SurrogateKey>, column: &str| {
            key.and_then(|key| state.table(table.name)?.get(key)?.get(column).as_f64())
        };
        let samples = state
            .facts
            .iter()
            .take(SAMPLE_ROWS_LIMIT)
            .map(|fact| SampleRow {
                property_bk: text(&DIM_PROPERTY, fact.property_sk, "property_bk"),
                property_type: text(&DIM_PROPERTY, fact.property_sk, "property_type"),
                city: text(&DIM_ADDRESS, fact.address_sk, "city"),
                state: text(&DIM_ADDRESS, fact.address_sk, "state"),
                estimate: number(&DIM_VALUATION, fact.valuation_sk, "estimate"),
                tax_amount: number(&DIM_TAX, fact.tax_sk, "tax_amount"),
                effective_date: fact.effective_date,
            })
            .collect();

        WarehouseReport {
            staged_records: state.staging.len() as i64,
            dimension_counts,
            fact_count: state.facts.len() as i64,
            integrity,
            property_types: rank_counts(by_type, None),
            top_states: rank_counts(by_state, Some(TOP_STATES_LIMIT)),
            valuation_stats,
            samples,
        }
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn ensure_schema(&self) -> Result<SchemaReport, StoreError> {
        Ok(SchemaReport::default())
    }

    async fn begin(&self) -> Result<Box<dyn WarehouseSession>, StoreError> {
        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.state),
            working: self.snapshot()?,
            catalog: self.catalog.clone(),
            last_generated: HashMap::new(),
        }))
    }

    async fn report(&self) -> Result<WarehouseReport, StoreError> {
        let state = self.snapshot()?;
        Ok(self.build_report(&state))
    }
}

/// Works on a private copy of the committed state; `commit` swaps it in.
pub struct MemorySession {
    shared: Arc<Mutex<MemoryState>>,
    working: MemoryState,
    catalog: Catalog,
    last_generated: HashMap<&'static str, SurrogateKey>,
}

#[async_trait]
impl WarehouseSession for MemorySession {
    async fn reset_staging(&mut self) -> Result<(), StoreError> {
        self.working.staging.clear();
        Ok(())
    }

    async fn stage_raw(&mut self, raw: &serde_json::Value) -> Result<i64, StoreError> {
        self.working.last_staging_id += 1;
        let id = self.working.last_staging_id;
        self.working.staging.push((id, raw.clone()));
        Ok(id)
    }

    async fn write_dimension(
        &mut self,
        table: &DimensionTable,
        attrs: &AttributeSet,
    ) -> Result<Option<SurrogateKey>, StoreError> {
        let stored = self.working.tables.entry(table.name).or_default();

        // Unique constraints are NULLS NOT DISTINCT, as in the Postgres schema.
        let conflict = if table.natural_key.is_empty() {
            None
        } else {
            stored.rows.iter().position(|(_, row)| {
                table
                    .natural_key
                    .iter()
                    .all(|column| row.get(column).not_distinct(attrs.get(column)))
            })
        };

        match conflict {
            Some(idx) => {
                let (key, row) = &mut stored.rows[idx];
                for (column, value) in attrs.iter() {
                    row.set(column, value.clone());
                }
                Ok(Some(*key))
            }
            None => {
                stored.last_key += 1;
                let key = stored.last_key;
                stored.rows.push((key, attrs.clone()));
                self.last_generated.insert(table.name, key);
                Ok(Some(key))
            }
        }
    }

    async fn find_by_natural_key(
        &mut self,
        table: &DimensionTable,
        predicates: &[KeyPredicate],
    ) -> Result<Option<SurrogateKey>, StoreError> {
        Ok(self.working.table(table.name).and_then(|stored| {
            stored
                .rows
                .iter()
                .find(|(_, row)| predicates.iter().all(|p| p.matches(row.get(p.column()))))
                .map(|(key, _)| *key)
        }))
    }

    async fn last_generated_key(&mut self, table: &DimensionTable) -> Result<SurrogateKey, StoreError> {
        self.last_generated
            .get(table.name)
            .copied()
            .ok_or(StoreError::MissingKey { table: table.name })
    }

    async fn insert_fact(&mut self, fact: &SnapshotFact) -> Result<(), StoreError> {
        use propwh_core::Dimension;

        let references = [
            (Dimension::Property, "property_sk", fact.property_sk),
            (Dimension::Address, "address_sk", fact.address_sk),
            (Dimension::Hoa, "hoa_sk", fact.hoa_sk),
            (Dimension::Valuation, "valuation_sk", fact.valuation_sk),
            (Dimension::Rehab, "rehab_sk", fact.rehab_sk),
            (Dimension::Tax, "tax_sk", fact.tax_sk),
        ];
        for (dimension, column, key) in references {
            if let Some(table) = self.catalog.table(dimension) {
                self.working.check_reference(table, column, key)?;
            }
        }
        self.working.facts.push(fact.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemorySession { shared, working, .. } = *self;
        *shared.lock().map_err(|_| StoreError::Poisoned)? = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
