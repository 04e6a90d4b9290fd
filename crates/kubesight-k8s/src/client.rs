use anyhow::{Context, Result};
use futures::stream::{self, BoxStream};
use futures::{AsyncBufRead, AsyncBufReadExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::LogParams;
use kube::config::{KubeConfigOptions, Kubeconfig};

use kubesight_types::SessionKey;

/// Lines read from a container log, in upstream order
pub type LogLines = BoxStream<'static, std::io::Result<String>>;

/// What to read from one container
#[derive(Clone, Debug)]
pub struct LogRequest {
    pub key: SessionKey,
    /// Start this many seconds back (takes precedence over `tail_lines`)
    pub since_seconds: Option<i64>,
    pub tail_lines: Option<i64>,
    pub follow: bool,
}

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
    context: Option<String>,
}

impl KubeClient {
    /// Connect using the given kubeconfig context, or the current one
    ///
    /// Falls back to in-cluster configuration when no kubeconfig exists and
    /// no context was requested.
    pub async fn connect(context: Option<&str>) -> Result<Self> {
        let (config, context) = match Kubeconfig::read() {
            Ok(kubeconfig) => {
                let context = context
                    .map(str::to_string)
                    .or_else(|| kubeconfig.current_context.clone());
                let config = kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: context.clone(),
                        ..Default::default()
                    },
                )
                .await
                .context(format!(
                    "Failed to create config for context: {}",
                    context.as_deref().unwrap_or("<current>")
                ))?;
                (config, context)
            }
            Err(e) if context.is_none() => {
                tracing::debug!(error = %e, "No kubeconfig, trying in-cluster config");
                let config = kube::Config::incluster()
                    .context("Failed to read kubeconfig and not running in a cluster")?;
                (config, None)
            }
            Err(e) => {
                return Err(e).context("Failed to read kubeconfig. Is kubectl configured?");
            }
        };

        let client = kube::Client::try_from(config).context(format!(
            "Failed to create client for context: {}",
            context.as_deref().unwrap_or("<in-cluster>")
        ))?;

        tracing::info!(context = ?context, "Kubernetes client ready");

        Ok(Self { client, context })
    }

    /// The kubeconfig context this client was built from
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Open a log stream for one container
    ///
    /// The returned stream owns the upstream connection; dropping it closes
    /// the connection.
    pub async fn log_lines(&self, request: &LogRequest) -> Result<LogLines> {
        let key = &request.key;
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &key.namespace);

        let params = LogParams {
            follow: request.follow,
            container: Some(key.container.clone()),
            // Use since_seconds if provided, otherwise use tail_lines
            tail_lines: if request.since_seconds.is_some() {
                None
            } else {
                request.tail_lines
            },
            since_seconds: request.since_seconds,
            ..Default::default()
        };

        let stream = pods
            .log_stream(&key.pod, &params)
            .await
            .context(format!("Failed to open log stream for {}", key))?;

        tracing::debug!(
            namespace = %key.namespace,
            pod = %key.pod,
            container = %key.container,
            follow = request.follow,
            since_seconds = ?request.since_seconds,
            "Opened container log stream"
        );

        Ok(lossy_lines(Box::pin(stream)))
    }
}

/// Split a byte stream into lines
///
/// Invalid UTF-8 is replaced rather than treated as a read error. Trailing
/// `\n` and `\r\n` are stripped. The stream ends after the first read error.
pub fn lossy_lines<R>(reader: R) -> LogLines
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    stream::unfold(Some((reader, Vec::new())), |state| async move {
        let (mut reader, mut buf) = state?;
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                Some((Ok(line), Some((reader, buf))))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use futures::executor::block_on;
    use futures::io::Cursor;

    fn read_all(bytes: &'static [u8]) -> Vec<String> {
        block_on(lossy_lines(Cursor::new(bytes)).try_collect()).unwrap()
    }

    #[test]
    fn test_invalid_utf8_does_not_end_the_stream() {
        let lines = read_all(b"ok line\nbad \xff byte\nnext line\n");
        assert_eq!(lines, vec!["ok line", "bad \u{fffd} byte", "next line"]);
    }

    #[test]
    fn test_keeps_blank_lines_and_unterminated_tail() {
        let lines = read_all(b"first\r\n\nlast");
        assert_eq!(lines, vec!["first", "", "last"]);
    }
}
