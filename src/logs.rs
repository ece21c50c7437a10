use crate::domain::{ContainerRuntime, LogSink};
use anyhow::Result;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of attaching the log forwarder, recorded on the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogAttachment {
    /// No sink configured.
    Disabled,
    Attached,
    /// Attaching failed; the container started anyway.
    Failed(String),
}

/// Default sink: republishes container output through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn accept(&self, line: &str) {
        info!(target: "tntbox::container", "{line}");
    }
}

/// Background task copying a container's output into a [`LogSink`].
#[derive(Debug)]
pub struct LogForwarder {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LogForwarder {
    pub async fn attach(
        runtime: &dyn ContainerRuntime,
        id: &str,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        let mut stream = runtime.follow_logs(id).await?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let id = id.to_string();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    line = stream.next() => match line {
                        Some(line) => sink.accept(&line),
                        None => {
                            debug!("log stream of {id} ended");
                            break;
                        }
                    },
                }
            }
        });

        Ok(Self { cancel, task })
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops forwarding. Lines not yet read are dropped.
    pub fn shutdown(self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContainerSpec, ContainerState};
    use crate::test_support::{MockRuntime, RecordingSink};
    use std::time::Duration;

    #[tokio::test]
    async fn test_forwarder_copies_lines_into_sink() {
        let runtime = MockRuntime::new();
        let id = runtime.create(&ContainerSpec::default()).await.unwrap();
        runtime.set_logs(&id, "booting\nentering the event loop\n");

        let sink = Arc::new(RecordingSink::default());
        let forwarder = LogForwarder::attach(&runtime, &id, sink.clone())
            .await
            .unwrap();

        for _ in 0..50 {
            if forwarder.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(forwarder.is_finished());
        assert_eq!(sink.lines(), vec!["booting", "entering the event loop"]);
        assert_eq!(runtime.get_state(&id), Some(ContainerState::Created));
    }

    #[tokio::test]
    async fn test_attach_failure_is_reported() {
        let runtime = MockRuntime::new();
        let id = runtime.create(&ContainerSpec::default()).await.unwrap();
        runtime.set_fail_on("follow_logs");

        let sink = Arc::new(RecordingSink::default());
        let err = LogForwarder::attach(&runtime, &id, sink).await.unwrap_err();
        assert!(err.to_string().contains("follow_logs"));
    }
}
