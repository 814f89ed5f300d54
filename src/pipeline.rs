//! Trait for defining item processing pipelines.
//!
//! The host framework builds its pipelines when a job starts, hands every
//! scraped item to `process_item` in order, and calls `close` exactly once
//! when the job ends. Output pipelines in this crate do their heavy lifting
//! in `close`: the CSV exporter deduplicates and sorts its file there, and
//! the data package pipeline hashes that file into the manifest.
//!
//! [`PipelineChain`] reproduces that lifecycle for a fixed list of pipelines,
//! which is also how the tests drive a whole job.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::item::ScrapedItem;

/// The `Pipeline` trait defines the contract for item processing pipelines.
#[async_trait]
pub trait Pipeline<I: ScrapedItem>: Send + Sync + 'static {
    /// Returns the name of the pipeline.
    fn name(&self) -> &str;

    /// Processes a single scraped item.
    ///
    /// Returning `Ok(None)` drops the item so later pipelines never see it.
    async fn process_item(&self, item: I) -> Result<Option<I>, PipelineError>;

    /// Called once when the job is finished.
    async fn close(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Ordered set of pipelines run for one job.
pub struct PipelineChain<I: ScrapedItem> {
    pipelines: Vec<Box<dyn Pipeline<I>>>,
}

impl<I: ScrapedItem> Default for PipelineChain<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ScrapedItem> PipelineChain<I> {
    pub fn new() -> Self {
        PipelineChain {
            pipelines: Vec::new(),
        }
    }

    pub fn add_pipeline(mut self, pipeline: impl Pipeline<I>) -> Self {
        self.pipelines.push(Box::new(pipeline));
        self
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Feeds `item` through every pipeline until one of them drops it.
    pub async fn process_item(&self, item: I) -> Result<Option<I>, PipelineError> {
        let mut current = item;
        for pipeline in &self.pipelines {
            match pipeline.process_item(current).await? {
                Some(next) => current = next,
                None => {
                    debug!("Item dropped by {}.", pipeline.name());
                    return Ok(None);
                }
            }
        }
        Ok(Some(current))
    }

    /// Closes the pipelines in registration order, stopping at the first
    /// failure.
    pub async fn close(&self) -> Result<(), PipelineError> {
        for pipeline in &self.pipelines {
            info!("Closing pipeline {}.", pipeline.name());
            pipeline.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    struct Recorder {
        label: &'static str,
        drop_field: Option<&'static str>,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Pipeline<Value> for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        async fn process_item(&self, item: Value) -> Result<Option<Value>, PipelineError> {
            self.log.lock().unwrap().push(format!("{}:item", self.label));
            match self.drop_field {
                Some(field) if item.get(field).is_some() => Ok(None),
                _ => Ok(Some(item)),
            }
        }

        async fn close(&self) -> Result<(), PipelineError> {
            self.log.lock().unwrap().push(format!("{}:close", self.label));
            Ok(())
        }
    }

    fn chain(log: &Arc<Mutex<Vec<String>>>) -> PipelineChain<Value> {
        PipelineChain::new()
            .add_pipeline(Recorder {
                label: "first",
                drop_field: Some("skip"),
                log: Arc::clone(log),
            })
            .add_pipeline(Recorder {
                label: "second",
                drop_field: None,
                log: Arc::clone(log),
            })
    }

    #[tokio::test]
    async fn items_flow_through_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&log);
        assert_eq!(chain.len(), 2);

        let out = chain.process_item(json!({"a": 1})).await.unwrap();
        assert_eq!(out, Some(json!({"a": 1})));
        chain.close().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:item", "second:item", "first:close", "second:close"]
        );
    }

    #[tokio::test]
    async fn dropped_items_skip_later_pipelines() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&log);

        let out = chain.process_item(json!({"skip": true})).await.unwrap();
        assert!(out.is_none());
        assert_eq!(*log.lock().unwrap(), vec!["first:item"]);
    }
}
