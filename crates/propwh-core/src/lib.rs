//! Core record model and warehouse row types for the property warehouse loader.

pub mod normalize;

use chrono::NaiveDate;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "propwh-core";

/// Store-generated identifier of a dimension row.
pub type SurrogateKey = i64;

/// Loosely-typed scalar as it shows up in source records.
///
/// `Other` swallows anything that is not a plain scalar (objects, arrays) so a
/// single odd field never fails decoding of the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Other(JsonValue),
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

/// Canonical numeric value: integral results stay integers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(v) => Some(v),
            Number::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Some(v as i64),
            Number::Float(_) => None,
        }
    }
}

/// One valuation provider sub-record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuationCandidate {
    #[serde(rename = "Redfin_Value")]
    pub redfin_value: Option<Scalar>,
    #[serde(rename = "Zestimate")]
    pub zestimate: Option<Scalar>,
    #[serde(rename = "ARV")]
    pub arv: Option<Scalar>,
    #[serde(rename = "List_Price")]
    pub list_price: Option<Scalar>,
    #[serde(rename = "Low_FMR")]
    pub low_fmr: Option<Scalar>,
    #[serde(rename = "High_FMR")]
    pub high_fmr: Option<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoaCandidate {
    #[serde(rename = "HOA")]
    pub fee: Option<Scalar>,
    #[serde(rename = "HOA_Flag")]
    pub flag: Option<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RehabCandidate {
    #[serde(rename = "Rehab_Calculation")]
    pub rehab_calculation: Option<Scalar>,
    #[serde(rename = "Underwriting_Rehab")]
    pub underwriting_rehab: Option<Scalar>,
    #[serde(rename = "Roof_Flag")]
    pub roof_flag: Option<Scalar>,
    #[serde(rename = "Windows_Flag")]
    pub windows_flag: Option<Scalar>,
    #[serde(rename = "Kitchen_Flag")]
    pub kitchen_flag: Option<Scalar>,
    #[serde(rename = "Bathroom_Flag")]
    pub bathroom_flag: Option<Scalar>,
    #[serde(rename = "Paint")]
    pub paint_flag: Option<Scalar>,
    #[serde(rename = "HVAC_Flag")]
    pub hvac_flag: Option<Scalar>,
    #[serde(rename = "Foundation_Flag")]
    pub foundation_flag: Option<Scalar>,
}

/// Typed view of one input property record. Missing keys decode to `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    #[serde(rename = "Street_Address")]
    pub street_address: Option<Scalar>,
    #[serde(rename = "City")]
    pub city: Option<Scalar>,
    #[serde(rename = "State")]
    pub state: Option<Scalar>,
    #[serde(rename = "Zip")]
    pub zip: Option<Scalar>,
    #[serde(rename = "Country")]
    pub country: Option<Scalar>,
    #[serde(rename = "Latitude")]
    pub latitude: Option<Scalar>,
    #[serde(rename = "Longitude")]
    pub longitude: Option<Scalar>,
    #[serde(rename = "Year_Built")]
    pub year_built: Option<Scalar>,
    #[serde(rename = "Property_Type")]
    pub property_type: Option<Scalar>,
    #[serde(rename = "SQFT_Total")]
    pub sqft_total: Option<Scalar>,
    #[serde(rename = "Bed")]
    pub bedrooms: Option<Scalar>,
    #[serde(rename = "Bath")]
    pub bathrooms: Option<Scalar>,
    #[serde(rename = "Taxes")]
    pub taxes: Option<Scalar>,
    #[serde(rename = "Valuation", default, deserialize_with = "lenient_list")]
    pub valuations: Option<Vec<ValuationCandidate>>,
    #[serde(rename = "HOA", default, deserialize_with = "lenient_list")]
    pub hoa: Option<Vec<HoaCandidate>>,
    #[serde(rename = "Rehab", default, deserialize_with = "lenient_list")]
    pub rehab: Option<Vec<RehabCandidate>>,
}

/// Sub-lists that are not arrays read as absent; non-object entries are skipped.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::Array(items)) => Some(
            items
                .into_iter()
                .filter(JsonValue::is_object)
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        ),
        _ => None,
    })
}

/// Column value handed to the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Json(JsonValue),
}

static NULL_VALUE: SqlValue = SqlValue::Null;

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int(v) => Some(*v as f64),
            SqlValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// SQL `=`: NULL is never equal to anything, numbers compare across int/float.
    pub fn sql_eq(&self, other: &SqlValue) -> bool {
        match (self, other) {
            (SqlValue::Null, _) | (_, SqlValue::Null) => false,
            (SqlValue::Int(_) | SqlValue::Float(_), SqlValue::Int(_) | SqlValue::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (a, b) => a == b,
        }
    }

    /// `IS NOT DISTINCT FROM`: like `sql_eq` but two NULLs match.
    pub fn not_distinct(&self, other: &SqlValue) -> bool {
        (self.is_null() && other.is_null()) || self.sql_eq(other)
    }
}

impl From<Number> for SqlValue {
    fn from(value: Number) -> Self {
        match value {
            Number::Int(v) => SqlValue::Int(v),
            Number::Float(v) => SqlValue::Float(v),
        }
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

impl From<JsonValue> for SqlValue {
    fn from(value: JsonValue) -> Self {
        SqlValue::Json(value)
    }
}

/// Ordered column → value map for one dimension row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributeSet {
    columns: Vec<(&'static str, SqlValue)>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &'static str, value: impl Into<SqlValue>) {
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    /// Value for `column`; columns that were never set read as NULL.
    pub fn get(&self, column: &str) -> &SqlValue {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
            .unwrap_or(&NULL_VALUE)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &SqlValue)> + '_ {
        self.columns.iter().map(|(name, value)| (*name, value))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn has_any_value(&self) -> bool {
        self.columns.iter().any(|(_, value)| !value.is_null())
    }
}

/// The six dimensions of the property warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Property,
    Address,
    Hoa,
    Valuation,
    Rehab,
    Tax,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Property,
        Dimension::Address,
        Dimension::Hoa,
        Dimension::Valuation,
        Dimension::Rehab,
        Dimension::Tax,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Property => "property",
            Dimension::Address => "address",
            Dimension::Hoa => "hoa",
            Dimension::Valuation => "valuation",
            Dimension::Rehab => "rehab",
            Dimension::Tax => "tax",
        }
    }
}

/// One `fact_property_snapshot` row. Facts are insert-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotFact {
    pub property_sk: Option<SurrogateKey>,
    pub address_sk: Option<SurrogateKey>,
    pub hoa_sk: Option<SurrogateKey>,
    pub valuation_sk: Option<SurrogateKey>,
    pub rehab_sk: Option<SurrogateKey>,
    pub tax_sk: Option<SurrogateKey>,
    pub effective_date: NaiveDate,
    pub source_record_id: Option<i64>,
}
