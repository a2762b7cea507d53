//! Table catalog for the warehouse and the SQL shapes derived from it.

use propwh_core::{AttributeSet, Dimension, SqlValue};

/// Postgres type family a column binds as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Double,
    Date,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind }
}

/// A dimension table: its surrogate key, writable columns and natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionTable {
    pub name: &'static str,
    pub surrogate_key: &'static str,
    pub columns: &'static [Column],
    /// Columns under the table's unique constraint. Empty means "no natural
    /// key", which forces the read-back-last-id fallback.
    pub natural_key: &'static [&'static str],
}

impl DimensionTable {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

pub const DIM_PROPERTY: DimensionTable = DimensionTable {
    name: "dim_property",
    surrogate_key: "property_sk",
    columns: &[
        col("property_bk", ColumnKind::Text),
        col("year_built", ColumnKind::Integer),
        col("property_type", ColumnKind::Text),
        col("square_feet", ColumnKind::Double),
        col("bedrooms", ColumnKind::Double),
        col("bathrooms", ColumnKind::Double),
        col("lot_size_sqft", ColumnKind::Double),
    ],
    natural_key: &["property_bk"],
};

pub const DIM_ADDRESS: DimensionTable = DimensionTable {
    name: "dim_address",
    surrogate_key: "address_sk",
    columns: &[
        col("address_line1", ColumnKind::Text),
        col("address_line2", ColumnKind::Text),
        col("city", ColumnKind::Text),
        col("state", ColumnKind::Text),
        col("postal_code", ColumnKind::Text),
        col("county", ColumnKind::Text),
        col("country", ColumnKind::Text),
        col("latitude", ColumnKind::Double),
        col("longitude", ColumnKind::Double),
    ],
    natural_key: &["address_line1", "city", "state", "postal_code"],
};

pub const DIM_HOA: DimensionTable = DimensionTable {
    name: "dim_hoa",
    surrogate_key: "hoa_sk",
    columns: &[
        col("hoa_name", ColumnKind::Text),
        col("hoa_monthly_fee", ColumnKind::Double),
        col("hoa_phone", ColumnKind::Text),
        col("hoa_email", ColumnKind::Text),
        col("rules_json", ColumnKind::Json),
    ],
    natural_key: &["hoa_name", "hoa_monthly_fee"],
};

pub const DIM_VALUATION: DimensionTable = DimensionTable {
    name: "dim_valuation",
    surrogate_key: "valuation_sk",
    columns: &[
        col("provider", ColumnKind::Text),
        col("estimate", ColumnKind::Double),
        col("estimate_low", ColumnKind::Double),
        col("estimate_high", ColumnKind::Double),
        col("as_of_date", ColumnKind::Date),
    ],
    natural_key: &["provider", "as_of_date", "estimate", "estimate_low", "estimate_high"],
};

pub const DIM_REHAB: DimensionTable = DimensionTable {
    name: "dim_rehab",
    surrogate_key: "rehab_sk",
    columns: &[
        col("total_estimate", ColumnKind::Double),
        col("exterior", ColumnKind::Double),
        col("interior", ColumnKind::Double),
        col("systems", ColumnKind::Double),
        col("as_of_date", ColumnKind::Date),
    ],
    natural_key: &["as_of_date", "total_estimate", "exterior", "interior", "systems"],
};

pub const DIM_TAX: DimensionTable = DimensionTable {
    name: "dim_tax",
    surrogate_key: "tax_sk",
    columns: &[
        col("tax_year", ColumnKind::Integer),
        col("assessed_value", ColumnKind::Double),
        col("tax_amount", ColumnKind::Double),
    ],
    natural_key: &["tax_year", "assessed_value", "tax_amount"],
};

pub const FACT_TABLE: &str = "fact_property_snapshot";
pub const STAGING_TABLE: &str = "stg_properties_raw";

/// Dimension → table mapping handed to the resolver.
#[derive(Debug, Clone)]
pub struct Catalog {
    tables: Vec<(Dimension, DimensionTable)>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::warehouse()
    }
}

impl Catalog {
    /// The six tables of the property warehouse.
    pub fn warehouse() -> Self {
        Self {
            tables: vec![
                (Dimension::Property, DIM_PROPERTY),
                (Dimension::Address, DIM_ADDRESS),
                (Dimension::Hoa, DIM_HOA),
                (Dimension::Valuation, DIM_VALUATION),
                (Dimension::Rehab, DIM_REHAB),
                (Dimension::Tax, DIM_TAX),
            ],
        }
    }

    pub fn with_table(mut self, dimension: Dimension, table: DimensionTable) -> Self {
        match self.tables.iter_mut().find(|(d, _)| *d == dimension) {
            Some(slot) => slot.1 = table,
            None => self.tables.push((dimension, table)),
        }
        self
    }

    pub fn table(&self, dimension: Dimension) -> Option<&DimensionTable> {
        self.tables
            .iter()
            .find(|(d, _)| *d == dimension)
            .map(|(_, table)| table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &DimensionTable> + '_ {
        self.tables.iter().map(|(_, table)| table)
    }
}

/// One conjunct of a natural-key lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPredicate {
    IsNull(&'static str),
    Equals(&'static str, SqlValue),
}

impl KeyPredicate {
    pub fn column(&self) -> &'static str {
        match self {
            KeyPredicate::IsNull(column) | KeyPredicate::Equals(column, _) => *column,
        }
    }

    pub fn matches(&self, value: &SqlValue) -> bool {
        match self {
            KeyPredicate::IsNull(_) => value.is_null(),
            KeyPredicate::Equals(_, expected) => value.sql_eq(expected),
        }
    }
}

/// Natural-key predicates for `attrs`; NULL components become `IS NULL`
/// because `= NULL` never matches.
pub fn natural_key_predicates(table: &DimensionTable, attrs: &AttributeSet) -> Vec<KeyPredicate> {
    table
        .natural_key
        .iter()
        .map(|&column| match attrs.get(column) {
            SqlValue::Null => KeyPredicate::IsNull(column),
            value => KeyPredicate::Equals(column, value.clone()),
        })
        .collect()
}

/// `SELECT <sk> FROM <table> WHERE … LIMIT 1` with `$n` placeholders, plus the
/// values to bind in placeholder order.
pub fn lookup_sql<'a>(
    table: &DimensionTable,
    predicates: &'a [KeyPredicate],
) -> (String, Vec<(&'static str, &'a SqlValue)>) {
    let mut binds = Vec::new();
    let clauses = predicates
        .iter()
        .map(|predicate| match predicate {
            KeyPredicate::IsNull(column) => format!("{column} IS NULL"),
            KeyPredicate::Equals(column, value) => {
                binds.push((*column, value));
                format!("{column} = ${}", binds.len())
            }
        })
        .collect::<Vec<_>>();

    let sql = format!(
        "SELECT {} FROM {} WHERE {} LIMIT 1",
        table.surrogate_key,
        table.name,
        clauses.join(" AND ")
    );
    (sql, binds)
}

/// Insert-or-overwrite statement keyed on the table's natural-key constraint,
/// returning the surrogate key of the written row.
pub fn upsert_sql(table: &DimensionTable, columns: &[&'static str]) -> String {
    let placeholders = (1..=columns.len())
        .map(|idx| format!("${idx}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name,
        columns.join(", "),
        placeholders
    );
    if !table.natural_key.is_empty() {
        let updates = columns
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            table.natural_key.join(", "),
            updates
        ));
    }
    sql.push_str(&format!(" RETURNING {}", table.surrogate_key));
    sql
}
