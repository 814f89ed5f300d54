//! Job configuration for the output pipelines.
//!
//! A [`JobConfig`] replaces the host framework's settings dictionary. Both
//! pipelines derive their file paths from it, so the CSV exporter and the
//! data package pipeline always agree on where the CSV lives.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::PipelineError;
use crate::schema::ItemSchema;

/// Name of the manifest written next to the job CSV files.
pub const DATAPACKAGE_FILE_NAME: &str = "datapackage.json";

/// How the content hash of the CSV is rendered in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashFormat {
    /// `md5-<hex>`
    #[default]
    Prefixed,
    /// `<hex>`
    Bare,
}

/// What to do when the manifest has no resource named after the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPolicy {
    #[default]
    CreateIfMissing,
    RequireExisting,
}

/// CSV layout and finalization options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    pub header: Option<Vec<String>>,
    pub sort_by: Option<String>,
    pub sort_ascending: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            header: None,
            sort_by: None,
            sort_ascending: true,
        }
    }
}

/// Base metadata and update behaviour for `datapackage.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DataPackageOptions {
    pub name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Existing manifest copied verbatim when none exists yet.
    pub template: Option<PathBuf>,
    pub hash_format: HashFormat,
    pub entry_policy: EntryPolicy,
}

/// Everything the output stage of one job needs to know.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub job_name: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub csv: CsvOptions,
    #[serde(default)]
    pub data_package: DataPackageOptions,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./")
}

impl JobConfig {
    pub fn new(job_name: impl Into<String>) -> Self {
        JobConfig {
            job_name: job_name.into(),
            project: None,
            output_dir: default_output_dir(),
            csv: CsvOptions::default(),
            data_package: DataPackageOptions::default(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, PipelineError> {
        let config: JobConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_header<S: Into<String>>(mut self, header: impl IntoIterator<Item = S>) -> Self {
        self.csv.header = Some(header.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_sort(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.csv.sort_by = Some(column.into());
        self.csv.sort_ascending = ascending;
        self
    }

    pub fn with_data_package(mut self, options: DataPackageOptions) -> Self {
        self.data_package = options;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.job_name.trim().is_empty() {
            return Err(PipelineError::Config("job_name must not be empty".into()));
        }
        if let Some(header) = &self.csv.header {
            if header.is_empty() {
                return Err(PipelineError::Config("csv.header must not be empty".into()));
            }
        }
        Ok(())
    }

    /// The project name, falling back to the job name.
    pub fn project_name(&self) -> &str {
        self.project.as_deref().unwrap_or(&self.job_name)
    }

    /// `<output_dir>/<project>`
    pub fn project_dir(&self) -> PathBuf {
        self.output_dir.join(self.project_name())
    }

    /// `<output_dir>/<project>/<job>.csv`
    pub fn csv_path(&self) -> PathBuf {
        self.project_dir().join(format!("{}.csv", self.job_name))
    }

    /// `<output_dir>/<project>/datapackage.json`
    pub fn datapackage_path(&self) -> PathBuf {
        self.project_dir().join(DATAPACKAGE_FILE_NAME)
    }

    /// The configured header, or the schema's field names.
    pub fn header(&self, schema: &ItemSchema) -> Vec<String> {
        match &self.csv.header {
            Some(header) => header.clone(),
            None => schema.field_names(),
        }
    }

    /// Manifest `name`, defaulting to the job name.
    pub fn package_name(&self) -> &str {
        self.data_package.name.as_deref().unwrap_or(&self.job_name)
    }
}
