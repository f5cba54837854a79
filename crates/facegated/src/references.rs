//! Reference identities: where they come from and how they are loaded.

use crate::deadline::{self, Elapsed};
use crate::engine::{EngineError, EngineHandle};
use async_trait::async_trait;
use facegate_core::{Descriptor, ReferenceIdentity};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Timeout(#[from] Elapsed),
    #[error("descriptor extraction failed: {0}")]
    Engine(#[from] EngineError),
    #[error("worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One identity record as listed by a reference source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

/// A store of labelled reference images.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    async fn list(&self) -> Result<Vec<ReferenceRecord>, ReferenceError>;

    async fn fetch(&self, record: &ReferenceRecord) -> Result<Vec<u8>, ReferenceError>;
}

/// Turns a decoded reference image into a descriptor.
#[async_trait]
pub trait DescriptorExtractor: Send + Sync {
    async fn extract(&self, image: DynamicImage) -> Result<Option<Descriptor>, EngineError>;
}

#[async_trait]
impl DescriptorExtractor for EngineHandle {
    async fn extract(&self, image: DynamicImage) -> Result<Option<Descriptor>, EngineError> {
        self.describe(image).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    /// Upper bound on items fetched and decoded at once.
    pub concurrency: usize,
    /// Bound on the listing and on each image fetch.
    pub fetch_timeout: Duration,
    pub decode_timeout: Duration,
}

/// Counts reported after a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceStats {
    pub total: usize,
    pub usable: usize,
}

impl ReferenceStats {
    pub fn of(references: &[ReferenceIdentity]) -> Self {
        Self {
            total: references.len(),
            usable: references.iter().filter(|r| r.is_usable()).count(),
        }
    }
}

/// Fetch, decode and describe one record.
async fn load_one(
    source: &dyn ReferenceSource,
    extractor: &dyn DescriptorExtractor,
    record: &ReferenceRecord,
    options: LoaderOptions,
) -> Result<ReferenceIdentity, ReferenceError> {
    let bytes = deadline::within(options.fetch_timeout, "reference fetch", source.fetch(record)).await??;

    let image = deadline::within(
        options.decode_timeout,
        "reference decode",
        tokio::task::spawn_blocking(move || image::load_from_memory(&bytes)),
    )
    .await???;

    let descriptor = extractor.extract(image).await?;
    if descriptor.is_none() {
        tracing::warn!(id = %record.id, label = %record.name, "no face detected in reference image");
    } else {
        tracing::debug!(id = %record.id, label = %record.name, "reference face detected");
    }

    Ok(ReferenceIdentity::new(record.name.clone(), descriptor))
}

/// Load every reference the source lists.
///
/// Items run on a worker pool of `options.concurrency`. Each item is bounded
/// by its own timeouts, and a failed item is logged and left out. The
/// result keeps the source's listing order. Only a failed listing fails the load.
pub async fn load_references(
    source: Arc<dyn ReferenceSource>,
    extractor: Arc<dyn DescriptorExtractor>,
    options: LoaderOptions,
) -> Result<Vec<ReferenceIdentity>, ReferenceError> {
    let records = deadline::within(options.fetch_timeout, "reference list", source.list()).await??;
    tracing::info!(source = %source.describe(), count = records.len(), "loading references");

    let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut workers = JoinSet::new();

    for (index, record) in records.into_iter().enumerate() {
        let source = Arc::clone(&source);
        let extractor = Arc::clone(&extractor);
        let permits = Arc::clone(&permits);
        workers.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return (index, None);
            };
            match load_one(source.as_ref(), extractor.as_ref(), &record, options).await {
                Ok(identity) => (index, Some(identity)),
                Err(e) => {
                    tracing::warn!(id = %record.id, label = %record.name, error = %e, "reference skipped");
                    (index, None)
                }
            }
        });
    }

    let mut loaded = Vec::new();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((index, Some(identity))) => loaded.push((index, identity)),
            Ok((_, None)) => {}
            Err(e) => tracing::warn!(error = %e, "reference worker panicked"),
        }
    }
    loaded.sort_by_key(|(index, _)| *index);

    let references: Vec<ReferenceIdentity> = loaded.into_iter().map(|(_, identity)| identity).collect();
    let stats = ReferenceStats::of(&references);
    tracing::info!(total = stats.total, usable = stats.usable, "references loaded");
    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Item {
        /// PNG of the given width, served after a delay in milliseconds.
        Image { width: u32, delay_ms: u64 },
        Garbage,
        Missing,
    }

    struct ScriptedSource {
        records: Vec<ReferenceRecord>,
        items: HashMap<String, Item>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedSource {
        fn new<N: Into<String>>(items: Vec<(N, Item)>) -> Self {
            let items: Vec<(String, Item)> = items.into_iter().map(|(n, i)| (n.into(), i)).collect();
            let records = items
                .iter()
                .map(|(name, _)| ReferenceRecord {
                    id: format!("id-{name}"),
                    name: name.clone(),
                })
                .collect();
            let items = items
                .into_iter()
                .map(|(name, item)| (format!("id-{name}"), item))
                .collect();
            Self {
                records,
                items,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    fn png(width: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::new_luma8(width, 1)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[async_trait]
    impl ReferenceSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".into()
        }

        async fn list(&self) -> Result<Vec<ReferenceRecord>, ReferenceError> {
            Ok(self.records.clone())
        }

        async fn fetch(&self, record: &ReferenceRecord) -> Result<Vec<u8>, ReferenceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let result = match &self.items[&record.id] {
                Item::Image { width, delay_ms } => {
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                    Ok(png(*width))
                }
                Item::Garbage => Ok(b"not an image".to_vec()),
                Item::Missing => Err(ReferenceError::Status {
                    url: record.id.clone(),
                    status: 404,
                }),
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Descriptor is the image width; a width of 1 means "no face".
    struct WidthExtractor;

    #[async_trait]
    impl DescriptorExtractor for WidthExtractor {
        async fn extract(&self, image: DynamicImage) -> Result<Option<Descriptor>, EngineError> {
            Ok(match image.width() {
                1 => None,
                w => Some(Descriptor::new(vec![w as f32])),
            })
        }
    }

    fn options(concurrency: usize) -> LoaderOptions {
        LoaderOptions {
            concurrency,
            fetch_timeout: Duration::from_secs(1),
            decode_timeout: Duration::from_secs(5),
        }
    }

    async fn load(source: ScriptedSource, concurrency: usize) -> (Vec<ReferenceIdentity>, Arc<ScriptedSource>) {
        let source = Arc::new(source);
        let references = load_references(source.clone(), Arc::new(WidthExtractor), options(concurrency))
            .await
            .unwrap();
        (references, source)
    }

    fn labels(references: &[ReferenceIdentity]) -> Vec<&str> {
        references.iter().map(|r| r.label.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_listing_order() {
        // later items finish first
        let (references, _) = load(
            ScriptedSource::new(vec![
                ("a", Item::Image { width: 2, delay_ms: 300 }),
                ("b", Item::Image { width: 3, delay_ms: 200 }),
                ("c", Item::Image { width: 4, delay_ms: 100 }),
            ]),
            3,
        )
        .await;
        assert_eq!(labels(&references), vec!["a", "b", "c"]);
        assert_eq!(references[0].descriptor, Some(Descriptor::new(vec![2.0])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated() {
        let (references, _) = load(
            ScriptedSource::new(vec![
                ("good", Item::Image { width: 5, delay_ms: 0 }),
                ("garbage", Item::Garbage),
                ("missing", Item::Missing),
                ("slow", Item::Image { width: 6, delay_ms: 5_000 }),
                ("blank", Item::Image { width: 1, delay_ms: 0 }),
            ]),
            2,
        )
        .await;
        assert_eq!(labels(&references), vec!["good", "blank"]);
        assert!(references[0].is_usable());
        assert!(!references[1].is_usable());
        assert_eq!(ReferenceStats::of(&references), ReferenceStats { total: 2, usable: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let items = (0..8)
            .map(|i| (format!("r{i}"), Item::Image { width: 2, delay_ms: 50 }))
            .collect();
        let (references, source) = load(ScriptedSource::new(items), 2).await;
        assert_eq!(references.len(), 8);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_faceless_yields_no_usable_references() {
        let (references, _) = load(
            ScriptedSource::new(vec![
                ("x", Item::Image { width: 1, delay_ms: 0 }),
                ("y", Item::Garbage),
            ]),
            4,
        )
        .await;
        assert_eq!(ReferenceStats::of(&references).usable, 0);
    }

    #[test]
    fn test_record_wire_format() {
        let records: Vec<ReferenceRecord> =
            serde_json::from_str(r#"[{"_id":"65f0","name":"Alice","extra":true}]"#).unwrap();
        assert_eq!(
            records,
            vec![ReferenceRecord {
                id: "65f0".into(),
                name: "Alice".into()
            }]
        );
    }
}
