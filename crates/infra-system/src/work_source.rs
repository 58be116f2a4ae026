// Directory-backed work-item source
// <root>/<dataset_name>/ holds the images of one dataset

use annobatch_core::domain::WorkItem;
use annobatch_core::port::{SourceError, WorkSource};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File extensions treated as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "webp", "tif", "tiff"];

/// Enumerates image files of `<root>/<dataset_name>/`
///
/// The image ID is the file stem. Items are sorted by image ID; when two
/// files share a stem (`cat.jpg`, `cat.png`) the first path in sort order wins.
pub struct DirectoryWorkSource {
    root: PathBuf,
}

impl DirectoryWorkSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_dir(&self, dataset_name: &str) -> Result<PathBuf, SourceError> {
        // Dataset names are single path components
        let valid = !dataset_name.is_empty()
            && dataset_name != "."
            && dataset_name != ".."
            && !dataset_name.contains(['/', '\\']);
        if !valid {
            return Err(SourceError::NotFound(dataset_name.to_string()));
        }
        Ok(self.root.join(dataset_name))
    }

    async fn scan(&self, dataset_name: &str) -> Result<Vec<WorkItem>, SourceError> {
        let dir = self.dataset_dir(dataset_name)?;
        let unreadable = |e: std::io::Error| SourceError::Unreadable {
            dataset: dataset_name.to_string(),
            reason: e.to_string(),
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SourceError::NotFound(dataset_name.to_string()))
            }
            Err(e) => return Err(unreadable(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
            let path = entry.path();
            if !entry.file_type().await.map_err(unreadable)?.is_file() || !is_image(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((stem.to_string(), path.clone()));
            }
        }
        files.sort();

        let mut seen = HashSet::new();
        let items = files
            .into_iter()
            .filter(|(image_id, path)| {
                let first = seen.insert(image_id.clone());
                if !first {
                    warn!(image_id = %image_id, path = %path.display(), "Duplicate image ID ignored");
                }
                first
            })
            .map(|(image_id, path)| WorkItem::new(image_id, path.to_string_lossy()))
            .collect();
        Ok(items)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[async_trait]
impl WorkSource for DirectoryWorkSource {
    async fn enumerate(
        &self,
        dataset_name: &str,
        image_ids: Option<&[String]>,
    ) -> Result<Vec<WorkItem>, SourceError> {
        let items = self.scan(dataset_name).await?;
        debug!(dataset = %dataset_name, images = items.len(), "Dataset scanned");

        let Some(ids) = image_ids else {
            return Ok(items);
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
            .into_iter()
            .filter(|item| ids.contains(&item.image_id))
            .collect())
    }
}
