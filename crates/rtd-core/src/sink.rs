//! Destinations for generated artifacts.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;

use rtd_common::Timestamp;

use crate::error::CoreResult;

/// One generator output, ready to publish.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    /// Target name, usually a file name such as `gauge-data.txt`.
    pub name: String,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Packet time the artifact describes.
    pub timestamp: Timestamp,
}

impl Artifact {
    pub fn json(name: impl Into<String>, body: String, timestamp: Timestamp) -> Self {
        Self {
            name: name.into(),
            content_type: "application/json".to_string(),
            body: body.into_bytes(),
            timestamp,
        }
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Something that takes a finished artifact somewhere.
///
/// A failing sink is logged by the worker and never stops it.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, artifact: &Artifact) -> CoreResult<()>;
}

/// Keeps every published artifact in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    published: Mutex<Vec<Artifact>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<Artifact> {
        self.published.lock().await.clone()
    }

    pub async fn latest(&self) -> Option<Artifact> {
        self.published.lock().await.last().cloned()
    }
}

#[async_trait]
impl SnapshotSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, artifact: &Artifact) -> CoreResult<()> {
        self.published.lock().await.push(artifact.clone());
        Ok(())
    }
}
