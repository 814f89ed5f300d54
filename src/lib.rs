//! # datapackage-pipeline
//!
//! Output pipelines for scraped items: a CSV exporter that deduplicates and
//! sorts its file when the job ends, and a pipeline that keeps a
//! `datapackage.json` manifest describing that file.
//!
//! Both pipelines read their paths from the same [`JobConfig`], so they agree
//! on `<output_dir>/<project>/<job>.csv`. Register the CSV exporter first:
//! pipelines are closed in order and the manifest hashes the finished file.
//!
//! ## Example
//!
//! ```rust,ignore
//! use datapackage_pipeline::prelude::*;
//!
//! let config = JobConfig::from_json_file("settings.json")?;
//! let schema = ItemSchema::new(vec![
//!     FieldSchema::new("name", FieldType::String),
//!     FieldSchema::new("price", FieldType::Number),
//! ]);
//!
//! let pipelines = PipelineChain::new()
//!     .add_pipeline(CsvExporterPipeline::from_config(&config, &schema)?)
//!     .add_pipeline(DataPackagePipeline::from_config(&config, &schema)?);
//!
//! for item in items {
//!     pipelines.process_item(item).await?;
//! }
//! pipelines.close().await?;
//! ```

pub mod config;
pub mod error;
pub mod item;
pub mod pipeline;
pub mod schema;
pub mod utils;

#[cfg(feature = "pipeline-csv")]
pub mod csv_exporter;

#[cfg(feature = "pipeline-datapackage")]
pub mod datapackage;

pub use config::JobConfig;
pub use error::PipelineError;

pub mod prelude {
    pub use crate::config::{
        CsvOptions, DataPackageOptions, EntryPolicy, HashFormat, JobConfig,
    };
    #[cfg(feature = "pipeline-csv")]
    pub use crate::csv_exporter::{finalize_csv, CsvExporterPipeline, SortOrder};
    #[cfg(feature = "pipeline-datapackage")]
    pub use crate::datapackage::{
        DataPackage, DataPackagePipeline, ManifestSource, Resource, ResourceTarget,
    };
    pub use crate::error::PipelineError;
    pub use crate::item::ScrapedItem;
    pub use crate::pipeline::{Pipeline, PipelineChain};
    pub use crate::schema::{Constraints, FieldSchema, FieldType, ItemSchema};
}
