use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use propwh_core::SqlValue;
use propwh_etl::{EtlConfig, LoadPipeline, RunStage};
use propwh_storage::{MemoryWarehouse, Warehouse};

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

fn fixture_config() -> EtlConfig {
    EtlConfig {
        database_url: String::new(),
        input_path: fixtures_dir().join("sample_properties.json"),
        config_path: fixtures_dir().join("etl_config.yaml"),
        progress_every: 2,
    }
}

#[tokio::test]
async fn fixture_loads_into_a_clean_warehouse() {
    let warehouse = MemoryWarehouse::new();
    let summary = LoadPipeline::new(fixture_config())
        .run(&warehouse)
        .await
        .expect("load fixture");

    assert_eq!(summary.stage, RunStage::Committed);
    assert_eq!(summary.records, 5);
    assert_eq!(summary.facts, 5);

    let report = warehouse.report().await.expect("report");
    assert_eq!(report.staged_records, 5);
    assert_eq!(report.fact_count, 5);
    assert_eq!(report.dimension_counts["dim_property"], 4);
    assert_eq!(report.dimension_counts["dim_address"], 4);
    assert_eq!(report.dimension_counts["dim_hoa"], 2);
    assert_eq!(report.dimension_counts["dim_valuation"], 3);
    assert_eq!(report.dimension_counts["dim_rehab"], 1);
    assert_eq!(report.dimension_counts["dim_tax"], 1);
    assert!(report.is_clean(), "{:?}", report.issues());

    assert_eq!(report.top_states[0], ("TX".to_string(), 2));
    assert_eq!(report.property_types[0], ("Condo".to_string(), 2));
    let stats = report.valuation_stats.expect("valuation stats");
    assert_eq!(stats.count, 3);
    assert_eq!(stats.min_estimate, 245000.0);
    assert_eq!(stats.max_estimate, 310000.0);

    assert_eq!(report.samples.len(), 5);
    assert_eq!(report.samples[0].city.as_deref(), Some("Austin"));
    assert_eq!(report.samples[0].estimate, Some(310000.0));
    assert!(report.samples.iter().all(|row| row.effective_date.to_string() == "1970-01-01"));
}

#[tokio::test]
async fn fixture_dimensions_carry_aggregated_values() {
    let warehouse = MemoryWarehouse::new();
    LoadPipeline::new(fixture_config())
        .run(&warehouse)
        .await
        .expect("load fixture");

    let facts = warehouse.facts().expect("facts");
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("date");
    assert!(facts.iter().all(|f| f.effective_date == epoch));
    assert_eq!(facts[0].property_sk, facts[4].property_sk);
    assert_eq!(facts[0].hoa_sk, facts[1].hoa_sk);
    assert_ne!(facts[0].hoa_sk, facts[2].hoa_sk);
    assert_eq!(facts[2].tax_sk, None);
    assert_eq!(facts[3].valuation_sk, None);
    assert_eq!(facts[3].rehab_sk, None);

    let valuations = warehouse.dimension_rows("dim_valuation").expect("valuations");
    let estimates = valuations
        .iter()
        .map(|(_, row)| row.get("estimate").clone())
        .collect::<Vec<_>>();
    assert_eq!(
        estimates,
        vec![SqlValue::Int(310000), SqlValue::Int(245000), SqlValue::Int(300000)]
    );

    let rehab = warehouse.dimension_rows("dim_rehab").expect("rehab");
    assert_eq!(rehab[0].1.get("total_estimate"), &SqlValue::Int(15500));
    assert_eq!(rehab[0].1.get("exterior").as_f64(), Some(1.0));
    assert_eq!(rehab[0].1.get("interior").as_f64(), Some(2.0));
    assert_eq!(rehab[0].1.get("systems").as_f64(), Some(1.0));

    let addresses = warehouse.dimension_rows("dim_address").expect("addresses");
    let countries = addresses
        .iter()
        .filter_map(|(_, row)| row.get("country").as_text().map(str::to_string))
        .collect::<Vec<_>>();
    assert_eq!(countries, vec!["USA", "USA", "United States", "USA"]);
}

#[tokio::test]
async fn reloading_the_fixture_only_adds_facts() {
    let warehouse = MemoryWarehouse::new();
    let pipeline = LoadPipeline::new(fixture_config());
    pipeline.run(&warehouse).await.expect("first load");
    let first = warehouse.report().await.expect("report");
    pipeline.run(&warehouse).await.expect("second load");
    let second = warehouse.report().await.expect("report");

    assert_eq!(first.dimension_counts, second.dimension_counts);
    assert_eq!(second.fact_count, 2 * first.fact_count);
}
