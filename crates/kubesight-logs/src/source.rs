//! Upstream chunk sources

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use thiserror::Error;

use kubesight_k8s::{KubeClient, LogRequest};
use kubesight_types::{SourceMode, StreamParams};

/// Raw text chunks from one upstream, in arrival order
///
/// A chunk may hold several lines. Dropping the stream closes the upstream.
pub type ChunkStream = BoxStream<'static, Result<String, SourceError>>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open log stream: {0}")]
    Open(String),

    #[error("log stream failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("{0}")]
    Unsupported(&'static str),
}

/// Something that can open a chunk stream for a session
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn open(&self, params: &StreamParams) -> Result<ChunkStream, SourceError>;
}

/// Container logs from the cluster API
pub struct KubeSource {
    client: KubeClient,
    /// Backlog size when no lookback is given
    tail_lines: Option<i64>,
}

impl KubeSource {
    pub fn new(client: KubeClient, tail_lines: Option<i64>) -> Self {
        Self { client, tail_lines }
    }

    fn request(&self, params: &StreamParams) -> LogRequest {
        LogRequest {
            key: params.key.clone(),
            since_seconds: params.since.map(|since| since.as_seconds()),
            tail_lines: self.tail_lines,
            follow: params.follow,
        }
    }
}

#[async_trait]
impl SourceProvider for KubeSource {
    async fn open(&self, params: &StreamParams) -> Result<ChunkStream, SourceError> {
        if params.mode != SourceMode::Cluster {
            return Err(SourceError::Unsupported("cluster source cannot play demo scenarios"));
        }

        let lines = self
            .client
            .log_lines(&self.request(params))
            .await
            .map_err(|e| SourceError::Open(format!("{e:#}")))?;

        Ok(lines.map(|line| line.map_err(SourceError::from)).boxed())
    }
}
