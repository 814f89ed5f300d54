//! Scraped items as seen by the output pipelines.

use std::fmt::Debug;

use serde_json::{Map, Value};

/// A record produced by a spider.
///
/// Pipelines only need a JSON view of the item: an object mapping field
/// names to scalar values. Field order in the CSV comes from the configured
/// header, not from the object.
pub trait ScrapedItem: Debug + Send + Sync + 'static {
    fn to_json_value(&self) -> Value;
}

impl ScrapedItem for Map<String, Value> {
    fn to_json_value(&self) -> Value {
        Value::Object(self.clone())
    }
}

impl ScrapedItem for Value {
    fn to_json_value(&self) -> Value {
        self.clone()
    }
}
