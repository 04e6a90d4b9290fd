use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kubesight_types::{AnalysisOutcome, AnalysisRequest};

use crate::client::ReasoningClient;
use crate::error::AnalysisError;
use crate::prompt::{Prompt, build_prompt};

/// Fragments buffered between the upstream call and the consumer
const FRAGMENT_BUFFER: usize = 64;

/// One piece of an analysis answer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    /// Terminal failure; nothing follows it
    Error(String),
}

impl Fragment {
    /// Render as plain text, failures as a `❌` line
    pub fn into_text(self) -> String {
        match self {
            Fragment::Text(text) => text,
            Fragment::Error(message) => format!("\n❌ Analysis failed: {}\n", message),
        }
    }
}

struct InFlight {
    id: u64,
    cancel: CancellationToken,
}

/// Runs analysis calls for one viewer, at most one at a time
///
/// Starting a new analysis cancels the one in flight. Cloning the bridge
/// shares that slot.
#[derive(Clone)]
pub struct AnalysisBridge {
    client: Arc<dyn ReasoningClient>,
    inflight: Arc<Mutex<Option<InFlight>>>,
    next_id: Arc<AtomicU64>,
}

impl AnalysisBridge {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self {
            client,
            inflight: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start analyzing `request`, superseding any call in flight
    ///
    /// Must be called from within a tokio runtime.
    pub fn analyze(&self, request: AnalysisRequest) -> AnalysisStream {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        let previous = self.inflight.lock().replace(InFlight {
            id,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
            tracing::debug!(
                analysis_id = previous.id,
                superseded_by = id,
                "Superseded in-flight analysis"
            );
        }

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let prompt = build_prompt(&request);

        tracing::info!(
            analysis_id = id,
            namespace = %request.meta.namespace,
            pod = %request.meta.pod,
            container = %request.meta.container,
            excerpt_len = request.recent_log_chunk.len(),
            "Starting analysis"
        );

        tokio::spawn(run_call(
            Arc::clone(&self.client),
            prompt,
            tx,
            cancel.clone(),
            Arc::clone(&self.inflight),
            id,
        ));

        AnalysisStream {
            id,
            rx,
            cancel,
            outcome: None,
        }
    }

    /// Cancel the call in flight, if any. Does not wait for it to stop.
    pub fn cancel(&self) {
        if let Some(inflight) = self.inflight.lock().take() {
            inflight.cancel.cancel();
            tracing::debug!(analysis_id = inflight.id, "Cancelled analysis");
        }
    }

    /// Whether a call is currently running
    pub fn is_busy(&self) -> bool {
        self.inflight.lock().is_some()
    }
}

async fn run_call(
    client: Arc<dyn ReasoningClient>,
    prompt: Prompt,
    out: mpsc::Sender<Fragment>,
    cancel: CancellationToken,
    inflight: Arc<Mutex<Option<InFlight>>>,
    id: u64,
) {
    match pump_call(client.as_ref(), prompt, &out, &cancel).await {
        Some(Ok(())) => tracing::debug!(analysis_id = id, "Analysis complete"),
        Some(Err(e)) => {
            tracing::warn!(analysis_id = id, error = %e, "Analysis failed");
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = out.send(Fragment::Error(e.to_string())) => {}
            }
        }
        None => tracing::debug!(analysis_id = id, "Analysis aborted"),
    }

    let mut slot = inflight.lock();
    if slot.as_ref().is_some_and(|f| f.id == id) {
        *slot = None;
    }
}

/// Drive the upstream call, forwarding fragments in arrival order
///
/// Returns `None` when cancelled or when the consumer went away.
async fn pump_call(
    client: &dyn ReasoningClient,
    prompt: Prompt,
    out: &mpsc::Sender<Fragment>,
    cancel: &CancellationToken,
) -> Option<Result<(), AnalysisError>> {
    let (text_tx, mut text_rx) = mpsc::channel::<String>(FRAGMENT_BUFFER);
    let call = client.stream(prompt, text_tx);
    tokio::pin!(call);

    let mut result = None;
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return None,

            text = text_rx.recv() => match text {
                Some(text) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        sent = out.send(Fragment::Text(text)) => sent.ok()?,
                    }
                }
                // The call finished and dropped its sender
                None => break,
            },

            done = &mut call, if result.is_none() => result = Some(done),
        }
    }

    match result {
        Some(result) => Some(result),
        None => Some(call.await),
    }
}

/// Incrementally produced answer of one analysis call
///
/// Dropping the stream cancels the call.
pub struct AnalysisStream {
    id: u64,
    rx: mpsc::Receiver<Fragment>,
    cancel: CancellationToken,
    outcome: Option<AnalysisOutcome>,
}

impl AnalysisStream {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next fragment, or `None` once the call is over
    ///
    /// After the call has been cancelled this always returns `None`.
    pub async fn next(&mut self) -> Option<Fragment> {
        if self.outcome.is_some() {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.outcome = Some(AnalysisOutcome::Aborted);
            return None;
        }

        let fragment = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            fragment = self.rx.recv() => fragment,
        };

        match fragment {
            Some(Fragment::Error(message)) => {
                self.outcome = Some(AnalysisOutcome::Failed);
                Some(Fragment::Error(message))
            }
            Some(fragment) => Some(fragment),
            None => {
                self.outcome = Some(if self.cancel.is_cancelled() {
                    AnalysisOutcome::Aborted
                } else {
                    AnalysisOutcome::Complete
                });
                None
            }
        }
    }

    /// How the call ended, once `next` has returned `None` or an error
    pub fn outcome(&self) -> Option<AnalysisOutcome> {
        self.outcome
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Adapt into a stream of plain text, errors rendered in-band
    pub fn into_text_stream(self) -> impl Stream<Item = String> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            let fragment = stream.next().await?;
            Some((fragment.into_text(), stream))
        })
    }
}

impl Drop for AnalysisStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
