//! Dimension upserts that converge on one surrogate key per natural key.

use propwh_core::{AttributeSet, Dimension, SurrogateKey};
use tracing::debug;

use crate::catalog::{natural_key_predicates, Catalog, DimensionTable};
use crate::{StoreError, WarehouseSession};

/// Maps attribute sets onto stable surrogate keys.
///
/// Write first (insert, or overwrite on natural-key conflict), then look the
/// row up by its natural key. Tables without a natural key fall back to the
/// key the write returned, then to the store's last generated id; that
/// fallback is only correct with a single writer.
#[derive(Debug, Clone, Default)]
pub struct DimensionResolver {
    catalog: Catalog,
}

impl DimensionResolver {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn upsert(
        &self,
        session: &mut dyn WarehouseSession,
        dimension: Dimension,
        attrs: &AttributeSet,
    ) -> Result<SurrogateKey, StoreError> {
        let table = self
            .catalog
            .table(dimension)
            .ok_or(StoreError::UnknownDimension(dimension))?;
        upsert_into(session, table, attrs).await
    }
}

pub async fn upsert_into(
    session: &mut dyn WarehouseSession,
    table: &DimensionTable,
    attrs: &AttributeSet,
) -> Result<SurrogateKey, StoreError> {
    if let Some(unknown) = attrs.column_names().find(|c| table.column(c).is_none()) {
        return Err(StoreError::UnknownColumn {
            table: table.name,
            column: unknown.to_string(),
        });
    }

    let returned = session.write_dimension(table, attrs).await?;

    if !table.natural_key.is_empty() {
        let predicates = natural_key_predicates(table, attrs);
        if let Some(key) = session.find_by_natural_key(table, &predicates).await? {
            debug!(table = table.name, key, "resolved by natural key");
            return Ok(key);
        }
    }

    let key = match returned {
        Some(key) => key,
        None => session.last_generated_key(table).await?,
    };
    debug!(table = table.name, key, "resolved by generated key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DIM_TAX;
    use crate::{MemoryWarehouse, Warehouse};
    use propwh_core::SqlValue;

    fn hoa(fee: Option<f64>, phone: &str) -> AttributeSet {
        AttributeSet::new()
            .with("hoa_name", None::<String>)
            .with("hoa_monthly_fee", fee)
            .with("hoa_phone", phone)
    }

    #[tokio::test]
    async fn same_natural_key_resolves_to_same_key_and_overwrites() {
        let warehouse = MemoryWarehouse::new();
        let resolver = DimensionResolver::default();
        let mut session = warehouse.begin().await.expect("begin");

        let first = resolver
            .upsert(session.as_mut(), Dimension::Hoa, &hoa(Some(50.0), "555-0100"))
            .await
            .expect("first upsert");
        let second = resolver
            .upsert(session.as_mut(), Dimension::Hoa, &hoa(Some(50.0), "555-0199"))
            .await
            .expect("second upsert");
        session.commit().await.expect("commit");

        assert_eq!(first, second);
        let rows = warehouse.dimension_rows("dim_hoa").expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.get("hoa_phone"), &SqlValue::Text("555-0199".into()));
    }

    #[tokio::test]
    async fn null_fee_resolves_independently_of_non_null_fee() {
        let warehouse = MemoryWarehouse::new();
        let resolver = DimensionResolver::default();
        let mut session = warehouse.begin().await.expect("begin");

        let with_fee = resolver
            .upsert(session.as_mut(), Dimension::Hoa, &hoa(Some(50.0), "a"))
            .await
            .expect("fee upsert");
        let without_fee = resolver
            .upsert(session.as_mut(), Dimension::Hoa, &hoa(None, "b"))
            .await
            .expect("null fee upsert");
        let without_fee_again = resolver
            .upsert(session.as_mut(), Dimension::Hoa, &hoa(None, "c"))
            .await
            .expect("null fee upsert again");

        assert_ne!(with_fee, without_fee);
        assert_eq!(without_fee, without_fee_again);
    }

    #[tokio::test]
    async fn keyless_table_falls_back_to_generated_key() {
        let warehouse = MemoryWarehouse::new();
        let keyless = DimensionTable {
            natural_key: &[],
            ..DIM_TAX
        };
        let mut session = warehouse.begin().await.expect("begin");
        let attrs = AttributeSet::new().with("tax_amount", 100i64);

        let first = upsert_into(session.as_mut(), &keyless, &attrs).await.expect("first");
        let second = upsert_into(session.as_mut(), &keyless, &attrs).await.expect("second");

        assert_ne!(first, second);
        assert_eq!(
            session.last_generated_key(&keyless).await.expect("last key"),
            second
        );
    }

    #[tokio::test]
    async fn unknown_columns_are_rejected_before_writing() {
        let warehouse = MemoryWarehouse::new();
        let resolver = DimensionResolver::default();
        let mut session = warehouse.begin().await.expect("begin");
        let err = resolver
            .upsert(
                session.as_mut(),
                Dimension::Tax,
                &AttributeSet::new().with("tax_rate", 0.02),
            )
            .await
            .expect_err("unknown column");
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }
}
