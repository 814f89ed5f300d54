//! Item Pipeline maintaining a `datapackage.json` manifest for a job's CSV.
//!
//! This module provides the `DataPackagePipeline`. It never touches items;
//! it makes sure the manifest exists when the job starts and, when the job
//! closes, records the CSV's schema, size, content hash and update time in
//! the resource entry named after the job.
//!
//! Key features include:
//! - Manifest bootstrap: a fresh `{name, title, description, resources}`
//!   document, or a byte-for-byte copy of a template manifest.
//! - One resource per job: entries are matched by `name` and updated in
//!   place; a missing entry is either appended or reported, depending on the
//!   configured [`EntryPolicy`].
//! - Unknown keys in the manifest and in existing resources survive rewrites.
//!
//! The pipeline hashes whatever is on disk when it closes, so it has to be
//! closed after the CSV exporter for the same job.

use crate::config::{EntryPolicy, HashFormat, JobConfig};
use crate::error::PipelineError;
use crate::item::ScrapedItem;
use crate::pipeline::Pipeline;
use crate::schema::ItemSchema;
use crate::utils::{replace_file, validate_output_dir};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Indentation of a freshly created manifest.
const CREATE_INDENT: &[u8] = b"    ";
/// Indentation used when rewriting an existing manifest.
const UPDATE_INDENT: &[u8] = b"  ";

/// One resource entry, as read back from the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `datapackage.json` document.
///
/// Held as a raw JSON object: keys this crate does not manage, their order
/// and their `null`s are written back as they were read. Only the job's own
/// resource entry is modified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPackage {
    document: Map<String, Value>,
}

impl DataPackage {
    /// A new manifest with no resources.
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let mut document = Map::new();
        document.insert("name".into(), Value::String(name.into()));
        document.insert("title".into(), Value::String(title.into()));
        document.insert("description".into(), Value::String(description.into()));
        document.insert("resources".into(), Value::Array(Vec::new()));
        DataPackage { document }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(io::BufReader::new(file))?)
    }

    /// Rewrites the manifest at `path` with two-space indentation.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let rendered = self.to_pretty_string(UPDATE_INDENT)?;
        replace_file(path.as_ref(), |file| file.write_all(rendered.as_bytes()))?;
        Ok(())
    }

    fn to_pretty_string(&self, indent: &[u8]) -> Result<String, PipelineError> {
        let mut buf = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(indent));
        self.serialize(&mut ser)?;
        String::from_utf8(buf).map_err(|e| PipelineError::Other(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.get("title").and_then(Value::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.get("description").and_then(Value::as_str)
    }

    /// The raw `resources` entries; empty when the key is absent.
    pub fn resources(&self) -> &[Value] {
        match self.document.get("resources") {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn resource_index(&self, name: &str) -> Option<usize> {
        self.resources()
            .iter()
            .position(|r| r.get("name").and_then(Value::as_str) == Some(name))
    }

    pub fn resource(&self, name: &str) -> Option<Resource> {
        let entry = &self.resources()[self.resource_index(name)?];
        serde_json::from_value(entry.clone()).ok()
    }

    /// Returns the entry called `name`, appending an empty one first when
    /// `policy` allows it. `Ok(None)` means the entry is missing and may not
    /// be created.
    pub fn upsert_resource(
        &mut self,
        name: &str,
        policy: EntryPolicy,
    ) -> Result<Option<&mut Map<String, Value>>, PipelineError> {
        let index = self.resource_index(name);
        let resources = self
            .document
            .entry("resources")
            .or_insert_with(|| Value::Array(Vec::new()));
        let Value::Array(resources) = resources else {
            return Err(PipelineError::Other(
                "manifest `resources` is not an array".to_string(),
            ));
        };
        let index = match (index, policy) {
            (Some(index), _) => index,
            (None, EntryPolicy::CreateIfMissing) => {
                debug!("Appending new resource '{}' to manifest.", name);
                let mut entry = Map::new();
                entry.insert("name".into(), Value::String(name.to_string()));
                resources.push(Value::Object(entry));
                resources.len() - 1
            }
            (None, EntryPolicy::RequireExisting) => return Ok(None),
        };
        resources[index]
            .as_object_mut()
            .map(Some)
            .ok_or_else(|| PipelineError::Other(format!("resource '{}' is not an object", name)))
    }
}

/// MD5 digest of the file at `path`, as lowercase hex.
pub fn file_digest(path: impl AsRef<Path>) -> io::Result<String> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Renders a hex digest the way the manifest stores it.
pub fn format_hash(hex: &str, format: HashFormat) -> String {
    match format {
        HashFormat::Prefixed => format!("md5-{}", hex),
        HashFormat::Bare => hex.to_string(),
    }
}

/// ISO-8601 without offset; the fraction is left out on whole seconds.
fn isoformat(at: NaiveDateTime) -> String {
    if at.nanosecond() / 1_000 == 0 {
        at.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

fn timestamp_now() -> String {
    isoformat(chrono::Local::now().naive_local())
}

/// Where a missing manifest comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestSource {
    /// Start from `{name, title, description, resources: []}`.
    Base {
        name: String,
        title: String,
        description: String,
    },
    /// Copy this file verbatim.
    Template(PathBuf),
}

impl ManifestSource {
    /// Creates `manifest_path` unless a file is already there. Returns
    /// whether a new manifest was written.
    pub fn ensure(&self, manifest_path: &Path) -> Result<bool, PipelineError> {
        if manifest_path.is_file() {
            debug!("Manifest {:?} already exists.", manifest_path);
            return Ok(false);
        }
        validate_output_dir(manifest_path)?;
        match self {
            ManifestSource::Template(template) => {
                info!("Copying manifest template {:?} to {:?}", template, manifest_path);
                fs::copy(template, manifest_path)?;
            }
            ManifestSource::Base {
                name,
                title,
                description,
            } => {
                info!("Creating manifest {:?}", manifest_path);
                let package = DataPackage::new(name.clone(), title.clone(), description.clone());
                fs::write(manifest_path, package.to_pretty_string(CREATE_INDENT)?)?;
            }
        }
        Ok(true)
    }
}

/// The resource a job owns in a manifest, and how to refresh it.
#[derive(Debug, Clone)]
pub struct ResourceTarget {
    pub csv_path: PathBuf,
    pub manifest_path: PathBuf,
    pub resource_name: String,
    pub fields: Vec<Value>,
    pub hash_format: HashFormat,
    pub entry_policy: EntryPolicy,
}

impl ResourceTarget {
    /// Loads the manifest, refreshes this job's resource from the CSV on disk
    /// and writes the manifest back. Returns the updated resource.
    pub fn sync(&self) -> Result<Resource, PipelineError> {
        let mut package = DataPackage::load(&self.manifest_path)?;
        let hash = format_hash(&file_digest(&self.csv_path)?, self.hash_format);
        let bytes = fs::metadata(&self.csv_path)?.len();

        let entry = package
            .upsert_resource(&self.resource_name, self.entry_policy)?
            .ok_or_else(|| PipelineError::ResourceNotFound {
                name: self.resource_name.clone(),
                path: self.manifest_path.clone(),
            })?;
        entry.insert("name".into(), Value::String(self.resource_name.clone()));
        entry.insert("hash".into(), Value::String(hash));
        entry.insert("bytes".into(), Value::from(bytes));
        entry.insert("last_updated".into(), Value::String(timestamp_now()));
        entry.insert("fields".into(), Value::Array(self.fields.clone()));
        let updated: Resource = serde_json::from_value(Value::Object(entry.clone()))?;

        package.save(&self.manifest_path)?;
        Ok(updated)
    }
}

/// A pass-through pipeline that keeps `datapackage.json` in step with the
/// job's CSV file.
pub struct DataPackagePipeline<I> {
    target: Arc<ResourceTarget>,
    _phantom: PhantomData<I>,
}

impl<I: ScrapedItem> DataPackagePipeline<I> {
    /// Creates a new `DataPackagePipeline`, writing the manifest from `source`
    /// if it does not exist yet.
    pub fn new(target: ResourceTarget, source: &ManifestSource) -> Result<Self, PipelineError> {
        info!(
            "Initializing DataPackagePipeline for manifest: {:?}, resource: {}",
            target.manifest_path, target.resource_name
        );
        source.ensure(&target.manifest_path)?;
        Ok(DataPackagePipeline {
            target: Arc::new(target),
            _phantom: PhantomData,
        })
    }

    /// Builds the pipeline from a job configuration. Resource fields are the
    /// schema fields present in the CSV header.
    pub fn from_config(config: &JobConfig, schema: &ItemSchema) -> Result<Self, PipelineError> {
        config.validate()?;
        let options = &config.data_package;
        let source = match &options.template {
            Some(template) => ManifestSource::Template(template.clone()),
            None => ManifestSource::Base {
                name: config.package_name().to_string(),
                title: options.title.clone().unwrap_or_default(),
                description: options.description.clone().unwrap_or_default(),
            },
        };
        let target = ResourceTarget {
            csv_path: config.csv_path(),
            manifest_path: config.datapackage_path(),
            resource_name: config.job_name.clone(),
            fields: schema.descriptors_for(&config.header(schema)),
            hash_format: options.hash_format,
            entry_policy: options.entry_policy,
        };
        Self::new(target, &source)
    }

    pub fn target(&self) -> &ResourceTarget {
        &self.target
    }
}

#[async_trait]
impl<I: ScrapedItem> Pipeline<I> for DataPackagePipeline<I> {
    fn name(&self) -> &str {
        "DataPackagePipeline"
    }

    async fn process_item(&self, item: I) -> Result<Option<I>, PipelineError> {
        Ok(Some(item))
    }

    async fn close(&self) -> Result<(), PipelineError> {
        info!("Closing DataPackagePipeline.");
        let target = Arc::clone(&self.target);
        let resource = tokio::task::spawn_blocking(move || target.sync())
            .await
            .map_err(|e| PipelineError::Other(format!("spawn_blocking failed: {}", e)))??;
        info!(
            "Manifest {:?} updated: resource '{}' is {} bytes ({}).",
            self.target.manifest_path,
            resource.name,
            resource.bytes.unwrap_or_default(),
            resource.hash.as_deref().unwrap_or_default()
        );
        Ok(())
    }
}
