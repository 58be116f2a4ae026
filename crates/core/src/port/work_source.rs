// Work-item Source Port
// Enumerates the images of an external dataset

use crate::domain::WorkItem;
use async_trait::async_trait;
use thiserror::Error;

/// Enumeration errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("dataset '{0}' not found")]
    NotFound(String),

    #[error("images not found in dataset '{dataset}': {missing:?}")]
    MissingImages {
        dataset: String,
        missing: Vec<String>,
    },

    #[error("dataset '{dataset}' unreadable: {reason}")]
    Unreadable { dataset: String, reason: String },
}

/// Work-item source
///
/// Implementations must be idempotent and free of side effects.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// List the work items of a dataset, optionally restricted to `image_ids`
    async fn enumerate(
        &self,
        dataset_name: &str,
        image_ids: Option<&[String]>,
    ) -> Result<Vec<WorkItem>, SourceError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;

    /// In-memory dataset registry
    #[derive(Default)]
    pub struct StaticWorkSource {
        datasets: HashMap<String, Vec<WorkItem>>,
    }

    impl StaticWorkSource {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a dataset whose images live under `/datasets/<name>/<id>.jpg`
        pub fn with_dataset<I, S>(mut self, name: &str, image_ids: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let items = image_ids
                .into_iter()
                .map(|id| {
                    let id = id.into();
                    let path = format!("/datasets/{}/{}.jpg", name, id);
                    WorkItem::new(id, path)
                })
                .collect();
            self.datasets.insert(name.to_string(), items);
            self
        }
    }

    #[async_trait]
    impl WorkSource for StaticWorkSource {
        async fn enumerate(
            &self,
            dataset_name: &str,
            image_ids: Option<&[String]>,
        ) -> Result<Vec<WorkItem>, SourceError> {
            let items = self
                .datasets
                .get(dataset_name)
                .ok_or_else(|| SourceError::NotFound(dataset_name.to_string()))?;

            let Some(ids) = image_ids else {
                return Ok(items.clone());
            };

            let missing: Vec<String> = ids
                .iter()
                .filter(|id| !items.iter().any(|item| &item.image_id == *id))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(SourceError::MissingImages {
                    dataset: dataset_name.to_string(),
                    missing,
                });
            }

            Ok(items
                .iter()
                .filter(|item| ids.contains(&item.image_id))
                .cloned()
                .collect())
        }
    }
}
