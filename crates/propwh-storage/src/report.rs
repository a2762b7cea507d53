//! Post-load validation report: row counts, integrity checks and summaries.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

pub const TOP_STATES_LIMIT: usize = 10;
pub const SAMPLE_ROWS_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityCounts {
    /// Facts with a null `address_sk`.
    pub missing_addresses: i64,
    /// Facts whose `property_sk` has no `dim_property` row.
    pub orphan_properties: i64,
    /// Facts with a valuation key whose row is missing or has no provider.
    pub valuation_mismatches: i64,
}

impl IntegrityCounts {
    pub fn total(&self) -> i64 {
        self.missing_addresses + self.orphan_properties + self.valuation_mismatches
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuationStats {
    pub count: i64,
    pub avg_estimate: f64,
    pub min_estimate: f64,
    pub max_estimate: f64,
}

/// One fact joined to its property, address, valuation and tax rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRow {
    pub property_bk: Option<String>,
    pub property_type: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub estimate: Option<f64>,
    pub tax_amount: Option<f64>,
    pub effective_date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarehouseReport {
    pub staged_records: i64,
    pub dimension_counts: BTreeMap<String, i64>,
    pub fact_count: i64,
    pub integrity: IntegrityCounts,
    pub property_types: Vec<(String, i64)>,
    pub top_states: Vec<(String, i64)>,
    pub valuation_stats: Option<ValuationStats>,
    /// First facts in load order, at most `SAMPLE_ROWS_LIMIT`.
    pub samples: Vec<SampleRow>,
}

impl WarehouseReport {
    pub fn dimension_total(&self) -> i64 {
        self.dimension_counts.values().sum()
    }

    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.staged_records == 0 {
            issues.push("no records in staging".to_string());
        }
        if self.fact_count == 0 {
            issues.push("no facts loaded".to_string());
        }
        let integrity = &self.integrity;
        if integrity.missing_addresses > 0 {
            issues.push(format!("{} facts missing address", integrity.missing_addresses));
        }
        if integrity.orphan_properties > 0 {
            issues.push(format!("{} facts with orphan property", integrity.orphan_properties));
        }
        if integrity.valuation_mismatches > 0 {
            issues.push(format!(
                "{} facts with mismatched valuation",
                integrity.valuation_mismatches
            ));
        }
        issues
    }

    pub fn is_clean(&self) -> bool {
        self.issues().is_empty()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("# Warehouse Validation\n\n");
        out.push_str(&format!("- staged records: {}\n", self.staged_records));
        for (table, count) in &self.dimension_counts {
            out.push_str(&format!("- {table}: {count}\n"));
        }
        out.push_str(&format!("- fact_property_snapshot: {}\n", self.fact_count));

        out.push_str("\n## Integrity\n\n");
        out.push_str(&format!(
            "- missing addresses: {}\n- orphan properties: {}\n- valuation mismatches: {}\n",
            self.integrity.missing_addresses,
            self.integrity.orphan_properties,
            self.integrity.valuation_mismatches
        ));

        if !self.property_types.is_empty() {
            out.push_str("\n## Properties By Type\n\n");
            for (kind, count) in &self.property_types {
                out.push_str(&format!("- {kind}: {count}\n"));
            }
        }
        if !self.top_states.is_empty() {
            out.push_str("\n## Top States\n\n");
            for (state, count) in &self.top_states {
                out.push_str(&format!("- {state}: {count}\n"));
            }
        }
        if let Some(stats) = &self.valuation_stats {
            out.push_str("\n## Valuations\n\n");
            out.push_str(&format!(
                "- count: {}\n- avg: {:.2}\n- min: {:.2}\n- max: {:.2}\n",
                stats.count, stats.avg_estimate, stats.min_estimate, stats.max_estimate
            ));
        }

        if !self.samples.is_empty() {
            out.push_str("\n## Sample Rows\n\n");
            out.push_str("| property | type | city | state | estimate | tax | effective |\n");
            out.push_str("|---|---|---|---|---|---|---|\n");
            for row in &self.samples {
                out.push_str(&format!(
                    "| {} | {} | {} | {} | {} | {} | {} |\n",
                    short_key(row.property_bk.as_deref()),
                    row.property_type.as_deref().unwrap_or("-"),
                    row.city.as_deref().unwrap_or("-"),
                    row.state.as_deref().unwrap_or("-"),
                    money(row.estimate),
                    money(row.tax_amount),
                    row.effective_date
                ));
            }
        }

        let issues = self.issues();
        out.push_str("\n## Issues\n\n");
        if issues.is_empty() {
            out.push_str("- none\n");
        } else {
            for issue in issues {
                out.push_str(&format!("- {issue}\n"));
            }
        }
        out
    }
}

fn short_key(key: Option<&str>) -> &str {
    match key {
        Some(key) => key.get(..12).unwrap_or(key),
        None => "-",
    }
}

fn money(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

/// Counts sorted descending, ties by label, optionally truncated.
pub fn rank_counts(counts: BTreeMap<String, i64>, limit: Option<usize>) -> Vec<(String, i64)> {
    let mut ranked = counts.into_iter().collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if let Some(limit) = limit {
        ranked.truncate(limit);
    }
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_flags_missing_data() {
        let report = WarehouseReport::default();
        assert_eq!(report.issues(), vec!["no records in staging", "no facts loaded"]);
        assert!(!report.is_clean());
    }

    #[test]
    fn integrity_violations_become_issues() {
        let report = WarehouseReport {
            staged_records: 3,
            fact_count: 3,
            integrity: IntegrityCounts {
                missing_addresses: 0,
                orphan_properties: 2,
                valuation_mismatches: 1,
            },
            ..WarehouseReport::default()
        };
        assert_eq!(report.integrity.total(), 3);
        assert_eq!(
            report.issues(),
            vec!["2 facts with orphan property", "1 facts with mismatched valuation"]
        );
        assert!(report.render_text().contains("- orphan properties: 2"));
    }

    #[test]
    fn sample_rows_render_as_a_table() {
        let report = WarehouseReport {
            staged_records: 1,
            fact_count: 1,
            samples: vec![SampleRow {
                property_bk: Some("4c7cd6ccf7b9e3192e416ab9".to_string()),
                property_type: Some("Condo".to_string()),
                city: Some("Austin".to_string()),
                state: Some("TX".to_string()),
                estimate: Some(310000.0),
                tax_amount: None,
                effective_date: NaiveDate::default(),
            }],
            ..WarehouseReport::default()
        };
        let text = report.render_text();
        assert!(text.contains("## Sample Rows"));
        assert!(text.contains("| 4c7cd6ccf7b9 | Condo | Austin | TX | 310000.00 | - | 1970-01-01 |"));
    }

    #[test]
    fn rank_counts_orders_by_count_then_label() {
        let counts = BTreeMap::from([
            ("TX".to_string(), 3),
            ("CA".to_string(), 3),
            ("FL".to_string(), 5),
            ("NY".to_string(), 1),
        ]);
        assert_eq!(
            rank_counts(counts, Some(3)),
            vec![("FL".to_string(), 5), ("CA".to_string(), 3), ("TX".to_string(), 3)]
        );
    }
}
