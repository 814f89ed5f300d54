use std::fs;

use datapackage_pipeline::datapackage::file_digest;
use datapackage_pipeline::prelude::*;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
struct Price {
    date: String,
    value: f64,
    source: String,
}

impl ScrapedItem for Price {
    fn to_json_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn price(date: &str, value: f64) -> Price {
    Price {
        date: date.to_string(),
        value,
        source: "exchange".to_string(),
    }
}

fn schema() -> ItemSchema {
    ItemSchema::new(vec![
        FieldSchema::new("date", FieldType::Date),
        FieldSchema::new("value", FieldType::Number).with_title("Closing value"),
        FieldSchema::new("source", FieldType::String),
    ])
}

fn chain(config: &JobConfig) -> PipelineChain<Price> {
    PipelineChain::new()
        .add_pipeline(CsvExporterPipeline::from_config(config, &schema()).unwrap())
        .add_pipeline(DataPackagePipeline::from_config(config, &schema()).unwrap())
}

async fn run_job(config: &JobConfig, items: Vec<Price>) {
    let pipelines = chain(config);
    for item in items {
        assert!(pipelines.process_item(item).await.unwrap().is_some());
    }
    pipelines.close().await.unwrap();
}

#[tokio::test]
async fn job_produces_sorted_csv_and_matching_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let config = JobConfig::from_json_str(&format!(
        r#"{{
            "job_name": "prices",
            "project": "market",
            "output_dir": {:?},
            "csv": {{"header": ["date", "value"], "sort_by": "value"}},
            "data_package": {{"title": "Market prices"}}
        }}"#,
        dir.path().to_string_lossy()
    ))
    .unwrap();

    run_job(
        &config,
        vec![
            price("2024-01-03", 3.5),
            price("2024-01-01", 1.5),
            price("2024-01-02", 2.5),
            price("2024-01-01", 1.5),
        ],
    )
    .await;

    let csv_path = dir.path().join("market/prices.csv");
    assert_eq!(
        fs::read_to_string(&csv_path).unwrap(),
        "date,value\n2024-01-01,1.5\n2024-01-02,2.5\n2024-01-03,3.5\n"
    );

    let package = DataPackage::load(dir.path().join("market/datapackage.json")).unwrap();
    assert_eq!(package.name(), Some("prices"));
    assert_eq!(package.title(), Some("Market prices"));
    assert_eq!(package.resources().len(), 1);

    let resource = package.resource("prices").unwrap();
    assert_eq!(resource.name, "prices");
    assert_eq!(resource.bytes, Some(fs::metadata(&csv_path).unwrap().len()));
    assert_eq!(
        resource.hash,
        Some(format!("md5-{}", file_digest(&csv_path).unwrap()))
    );
    assert_eq!(
        resource.fields,
        Some(vec![
            json!({"name": "date", "title": "Date", "type": "date"}),
            json!({"name": "value", "title": "Closing value", "type": "number"}),
        ])
    );
}

#[tokio::test]
async fn repeated_jobs_accumulate_into_one_file_and_one_resource() {
    let dir = tempfile::tempdir().unwrap();
    let config = JobConfig::new("prices").with_output_dir(dir.path());

    run_job(&config, vec![price("2024-01-01", 1.5)]).await;
    let first = DataPackage::load(config.datapackage_path()).unwrap();

    run_job(&config, vec![price("2024-01-01", 1.5), price("2024-01-02", 2.5)]).await;
    let second = DataPackage::load(config.datapackage_path()).unwrap();

    assert_eq!(
        fs::read_to_string(config.csv_path()).unwrap(),
        "date,value,source\n2024-01-01,1.5,exchange\n2024-01-02,2.5,exchange\n"
    );
    let (first, second) = (
        first.resource("prices").unwrap(),
        second.resource("prices").unwrap(),
    );
    assert_ne!(first.hash, second.hash);
    assert_eq!(
        second.bytes,
        Some(fs::metadata(config.csv_path()).unwrap().len())
    );

    run_job(&config, vec![price("2024-01-02", 2.5)]).await;
    let third = DataPackage::load(config.datapackage_path()).unwrap();
    assert_eq!(third.resources().len(), 1);
    assert_eq!(third.resource("prices").unwrap().hash, second.hash);
}

#[tokio::test]
async fn strict_manifest_fails_the_job_after_csv_is_finalized() {
    let dir = tempfile::tempdir().unwrap();
    let config = JobConfig::new("prices")
        .with_output_dir(dir.path())
        .with_data_package(DataPackageOptions {
            hash_format: HashFormat::Bare,
            entry_policy: EntryPolicy::RequireExisting,
            ..Default::default()
        });

    let pipelines = chain(&config);
    pipelines.process_item(price("2024-01-01", 1.5)).await.unwrap();
    pipelines.process_item(price("2024-01-01", 1.5)).await.unwrap();
    let err = pipelines.close().await.unwrap_err();

    assert!(matches!(err, PipelineError::ResourceNotFound { .. }));
    assert_eq!(
        fs::read_to_string(config.csv_path()).unwrap(),
        "date,value,source\n2024-01-01,1.5,exchange\n"
    );
}
