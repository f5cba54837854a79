//! Reference sources: the HTTP image backend and a local directory.

use crate::references::{ReferenceError, ReferenceRecord, ReferenceSource};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Backend serving `GET /images` (identity list) and `GET /image/:id` (raw bytes).
pub struct HttpReferenceSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReferenceSource {
    pub fn new(base_url: &str) -> Result<Self, ReferenceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("facegated/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn list_url(&self) -> String {
        format!("{}/images", self.base_url)
    }

    fn image_url(&self, id: &str) -> String {
        format!("{}/image/{id}", self.base_url)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ReferenceError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ReferenceError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ReferenceSource for HttpReferenceSource {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn list(&self) -> Result<Vec<ReferenceRecord>, ReferenceError> {
        let response = self.get(&self.list_url()).await?;
        Ok(response.json().await?)
    }

    async fn fetch(&self, record: &ReferenceRecord) -> Result<Vec<u8>, ReferenceError> {
        let response = self.get(&self.image_url(&record.id)).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Image files in a local directory. The file name is the id and the stem is the label.
pub struct DirReferenceSource {
    dir: PathBuf,
}

impl DirReferenceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn io_error(path: &Path, source: std::io::Error) -> ReferenceError {
        ReferenceError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl ReferenceSource for DirReferenceSource {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    async fn list(&self) -> Result<Vec<ReferenceRecord>, ReferenceError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Self::io_error(&self.dir, e))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::io_error(&self.dir, e))?
        {
            let path = entry.path();
            if !is_image(&path) {
                continue;
            }
            let (Some(id), Some(name)) = (
                path.file_name().and_then(|n| n.to_str()),
                path.file_stem().and_then(|n| n.to_str()),
            ) else {
                continue;
            };
            records.push(ReferenceRecord {
                id: id.to_string(),
                name: name.to_string(),
            });
        }

        // read_dir order is unspecified; sort for a stable tie-break order
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn fetch(&self, record: &ReferenceRecord) -> Result<Vec<u8>, ReferenceError> {
        let path = self.dir.join(&record.id);
        tokio::fs::read(&path).await.map_err(|e| Self::io_error(&path, e))
    }
}
