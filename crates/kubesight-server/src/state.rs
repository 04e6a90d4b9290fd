use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use kubesight_analysis::{AnalysisBridge, ReasoningClient};
use kubesight_logs::{Redactor, SessionRegistry, SourceProvider};
use kubesight_types::{SourceMode, TriggerConfig};

/// `[server]` section of the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: String,
    /// Idle seconds before a WebSocket gets a ping
    pub keepalive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7878".to_string(),
            keepalive_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }
}

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    /// Cluster log source, absent in demo-only mode
    pub cluster: Option<Arc<dyn SourceProvider>>,
    /// Cluster label reported with analysis requests
    pub cluster_label: Option<String>,
    pub demo: Arc<dyn SourceProvider>,
    /// Reasoning service, absent when analysis is disabled
    pub reasoning: Option<Arc<dyn ReasoningClient>>,
    pub redactor: Redactor,
    pub trigger: TriggerConfig,
    pub keepalive: Duration,
    /// Cancelled when the process shuts down
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(registry: SessionRegistry, demo: Arc<dyn SourceProvider>) -> Self {
        Self {
            registry,
            cluster: None,
            cluster_label: None,
            demo,
            reasoning: None,
            redactor: Redactor::new(),
            trigger: TriggerConfig::default(),
            keepalive: ServerConfig::default().keepalive(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_cluster(mut self, source: Arc<dyn SourceProvider>, label: Option<String>) -> Self {
        self.cluster = Some(source);
        self.cluster_label = label;
        self
    }

    pub fn with_reasoning(mut self, client: Arc<dyn ReasoningClient>) -> Self {
        self.reasoning = Some(client);
        self
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerConfig) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Source able to serve `mode`, if one is configured
    pub fn provider_for(&self, mode: SourceMode) -> Option<Arc<dyn SourceProvider>> {
        match mode {
            SourceMode::Cluster => self.cluster.clone(),
            SourceMode::Demo(_) => Some(Arc::clone(&self.demo)),
        }
    }

    /// A fresh analysis bridge for one viewer connection
    pub fn bridge(&self) -> Option<AnalysisBridge> {
        self.reasoning.clone().map(AnalysisBridge::new)
    }
}
