//! One live log session: an upstream, its redaction and filtering, and the
//! analysis trigger fed by it.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use kubesight_analysis::{AnalysisBridge, AnalysisStream, Fragment};
use kubesight_types::{
    AnalysisMeta, AnalysisOutcome, AnalysisRequest, ControlEvent, SessionKey, SessionState,
    StreamEvent, StreamParams, TriggerConfig,
};

use crate::filter::LineFilter;
use crate::redact::Redactor;
use crate::source::SourceProvider;
use crate::trigger::{AnalysisTrigger, TriggerDecision};

pub type SessionId = u64;

pub(crate) type SessionMap = Mutex<HashMap<SessionKey, Session>>;

/// Where a session delivers its events
///
/// `deliver` waits while the viewer is behind and returns `false` once the
/// receiving side is gone; the session then treats its viewer as
/// disconnected.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: StreamEvent) -> bool;
}

#[async_trait]
impl EventSink for mpsc::Sender<StreamEvent> {
    async fn deliver(&self, event: StreamEvent) -> bool {
        self.send(event).await.is_ok()
    }
}

/// Viewer requests forwarded to a running session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    /// Drop buffered lines and reset the trigger
    Clear,
    /// Analyze the current tail window now
    Analyze { question: Option<String> },
}

/// Everything needed to start a session
pub struct SessionSpec {
    pub params: StreamParams,
    /// Cluster label reported with analysis requests
    pub cluster: Option<String>,
    pub trigger: TriggerConfig,
    pub provider: Arc<dyn SourceProvider>,
    pub sink: Arc<dyn EventSink>,
    /// Analysis bridge of the owning connection, if analysis is available
    pub bridge: Option<AnalysisBridge>,
    pub redactor: Redactor,
}

impl SessionSpec {
    pub fn new(
        params: StreamParams,
        provider: Arc<dyn SourceProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            params,
            cluster: None,
            trigger: TriggerConfig::default(),
            provider,
            sink,
            bridge: None,
            redactor: Redactor::new(),
        }
    }

    pub fn with_cluster(mut self, cluster: Option<String>) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerConfig) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_bridge(mut self, bridge: Option<AnalysisBridge>) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }
}

/// Registry-side handle of a running session
pub struct Session {
    id: SessionId,
    key: SessionKey,
    state: Arc<RwLock<SessionState>>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    bridge: Option<AnalysisBridge>,
}

impl Session {
    pub(crate) fn spawn(id: SessionId, spec: SessionSpec, sessions: Weak<SessionMap>) -> Self {
        let SessionSpec {
            params,
            cluster,
            trigger,
            provider,
            sink,
            bridge,
            redactor,
        } = spec;

        let key = params.key.clone();
        let state = Arc::new(RwLock::new(SessionState::Idle));
        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let filter = params
            .filter
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .map(LineFilter::new);

        let span = tracing::info_span!(
            "session",
            session_id = id,
            namespace = %key.namespace,
            pod = %key.pod,
            container = %key.container,
        );

        let pump = Pump {
            id,
            trigger: AnalysisTrigger::new(trigger, AnalysisMeta::for_key(&key, cluster)),
            key: key.clone(),
            params,
            provider,
            sink,
            redactor,
            filter,
            bridge: bridge.clone(),
            state: Arc::clone(&state),
            commands: commands_rx,
            cancel: cancel.clone(),
            sessions,
        };
        let task = tokio::spawn(pump.run().instrument(span));

        Self {
            id,
            key,
            state,
            commands: commands_tx,
            cancel,
            task,
            bridge,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub(crate) fn command(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Close the upstream, cancel analysis and wait for the task to go away
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Some(bridge) = &self.bridge {
            bridge.cancel();
        }

        // The task may be waiting on the registry lock held by our caller
        self.task.abort();
        let _ = self.task.await;

        let mut state = self.state.write();
        if !state.is_terminal() {
            *state = SessionState::Ended;
        }
        tracing::debug!(session_id = self.id, key = %self.key, "Session stopped");
    }
}

/// Why the pump loop ended
enum Exit {
    /// Stopped by the registry
    Stopped,
    /// The viewer went away
    PeerGone,
    Ended,
    Failed(String),
}

/// The task side of a session
struct Pump {
    id: SessionId,
    key: SessionKey,
    params: StreamParams,
    provider: Arc<dyn SourceProvider>,
    sink: Arc<dyn EventSink>,
    redactor: Redactor,
    filter: Option<LineFilter>,
    trigger: AnalysisTrigger,
    bridge: Option<AnalysisBridge>,
    state: Arc<RwLock<SessionState>>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    cancel: CancellationToken,
    sessions: Weak<SessionMap>,
}

impl Pump {
    async fn run(mut self) {
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            opened = self.provider.open(&self.params) => opened,
        };

        let mut upstream = match opened {
            Ok(upstream) => upstream,
            Err(e) => return self.finish(Exit::Failed(e.to_string())).await,
        };

        *self.state.write() = SessionState::Streaming;
        tracing::info!(
            since = ?self.params.since.map(|since| since.as_seconds()),
            follow = self.params.follow,
            filtered = self.filter.is_some(),
            "Session streaming"
        );

        let exit = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break Exit::Stopped,

                Some(command) = self.commands.recv() => self.handle_command(command),

                chunk = upstream.next() => match chunk {
                    Some(Ok(chunk)) => {
                        if !self.forward(&chunk).await {
                            break Exit::PeerGone;
                        }
                    }
                    Some(Err(e)) => break Exit::Failed(e.to_string()),
                    None => break Exit::Ended,
                },
            }
        };

        // Close the upstream before telling anyone
        drop(upstream);
        self.finish(exit).await;
    }

    /// Redact, filter, forward and buffer one upstream chunk
    ///
    /// Returns `false` if the viewer is gone.
    async fn forward(&mut self, chunk: &str) -> bool {
        let now = Instant::now();
        let mut out = String::with_capacity(chunk.len() + 1);
        let mut requests = Vec::new();

        for line in split_lines(chunk) {
            let line = self.redactor.redact(line);
            if let Some(filter) = &self.filter {
                if !filter.matches(&line) {
                    continue;
                }
            }

            match self.trigger.record(&line, now) {
                TriggerDecision::Fire(request) => requests.push(request),
                TriggerDecision::Cooldown => {
                    tracing::trace!("Analysis suppressed by cooldown");
                }
                TriggerDecision::Pending | TriggerDecision::TooLittle => {}
            }

            out.push_str(&line);
            out.push('\n');
        }

        if !out.is_empty() && !self.sink.deliver(StreamEvent::Chunk(out)).await {
            return false;
        }

        for request in requests {
            self.launch_analysis(request);
        }
        true
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Clear => {
                self.trigger.clear();
                tracing::debug!("Cleared session buffer");
            }
            SessionCommand::Analyze { question } => {
                let question = question.map(|q| self.redactor.redact(&q).into_owned());
                match self.trigger.request_now(question, Instant::now()) {
                    Some(request) => self.launch_analysis(request),
                    None => tracing::debug!("Nothing buffered to analyze"),
                }
            }
        }
    }

    fn launch_analysis(&self, request: AnalysisRequest) {
        let Some(bridge) = &self.bridge else {
            tracing::debug!("No analysis configured, skipping trigger");
            return;
        };
        let stream = bridge.analyze(request);
        tokio::spawn(relay_analysis(stream, Arc::clone(&self.sink)).in_current_span());
    }

    async fn finish(self, exit: Exit) {
        match exit {
            Exit::Stopped => {
                *self.state.write() = SessionState::Ended;
                return;
            }
            Exit::PeerGone => {
                *self.state.write() = SessionState::Ended;
                if let Some(bridge) = &self.bridge {
                    bridge.cancel();
                }
                tracing::info!("Viewer gone, closing session");
            }
            Exit::Ended => {
                *self.state.write() = SessionState::Ended;
                self.sink
                    .deliver(StreamEvent::Control(ControlEvent::StreamEnded))
                    .await;
                tracing::info!("Upstream ended");
            }
            Exit::Failed(message) => {
                *self.state.write() = SessionState::Errored;
                tracing::warn!(error = %message, "Session failed");
                self.sink
                    .deliver(StreamEvent::Control(ControlEvent::Error(message)))
                    .await;
            }
        }

        self.deregister().await;
    }

    async fn deregister(&self) {
        let Some(sessions) = self.sessions.upgrade() else {
            return;
        };
        let mut sessions = sessions.lock().await;
        if sessions.get(&self.key).is_some_and(|s| s.id == self.id) {
            sessions.remove(&self.key);
        }
    }
}

/// Lines of one upstream chunk
///
/// An empty chunk is one blank line; a single trailing newline does not add
/// another.
fn split_lines(chunk: &str) -> impl Iterator<Item = &str> {
    chunk
        .strip_suffix('\n')
        .unwrap_or(chunk)
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
}

/// Forward one analysis to the viewer as control events
async fn relay_analysis(mut stream: AnalysisStream, sink: Arc<dyn EventSink>) {
    let id = stream.id();
    if !sink
        .deliver(StreamEvent::Control(ControlEvent::AnalysisStarted { id }))
        .await
    {
        return;
    }

    while let Some(fragment) = stream.next().await {
        let text = match fragment {
            Fragment::Text(text) => text,
            Fragment::Error(message) => format!("❌ Analysis failed: {message}"),
        };
        let event = ControlEvent::AnalysisFragment { id, text };
        if !sink.deliver(StreamEvent::Control(event)).await {
            return;
        }
    }

    match stream.outcome() {
        Some(AnalysisOutcome::Aborted) | None => {}
        Some(outcome) => {
            sink.deliver(StreamEvent::Control(ControlEvent::AnalysisFinished {
                id,
                outcome,
            }))
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(chunk: &str) -> Vec<&str> {
        split_lines(chunk).collect()
    }

    #[test]
    fn test_split_lines_keeps_blank_lines() {
        assert_eq!(lines(""), vec![""]);
        assert_eq!(lines("\n"), vec![""]);
        assert_eq!(lines("a\n\nb"), vec!["a", "", "b"]);
        assert_eq!(lines("a\r\nb\n"), vec!["a", "b"]);
    }
}
