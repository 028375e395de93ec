//! Launch flows: create a container, start it, stream its output.
//!
//! Two shapes exist. Exec-based flows (`notebook`, `engine_dryrun`) keep a
//! container alive and dispatch a command inside it, forwarding the exec
//! output stream. The generate flow starts a container and follows its own
//! log output. Both walk the same state sequence and stop at the first
//! error: the error is logged, nothing is retried, and a container that
//! already reached the running state stays running.

use crate::config::{
    dryrun_command, notebook_command, ContainerHandle, FlowState, LaunchReport, LaunchSpec,
    AUTOML_IMAGE,
};
use crate::docker::{EngineClient, LogStream};
use crate::error::LaunchError;
use crate::sink::LogSink;
use bollard::container::{Config, CreateContainerOptions, ListContainersOptions, LogsOptions};
use bollard::exec::CreateExecOptions;
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, error, info};

/// Drives launch flows against an explicit engine client.
pub struct Launcher {
    client: EngineClient,
}

impl Launcher {
    /// Creates a launcher over an already-connected client.
    pub fn new(client: EngineClient) -> Self {
        Self { client }
    }

    /// Connects to the local engine and wraps it in a launcher.
    pub async fn connect() -> anyhow::Result<Self> {
        Ok(Self::new(EngineClient::connect().await?))
    }

    /// Runs the notebook server inside an engine container and forwards
    /// its output to the sink until the stream ends.
    pub async fn notebook(&self, sink: &mut dyn LogSink) -> LaunchReport {
        info!(image = %AUTOML_IMAGE, "Starting notebook flow");
        match self.exec_flow(notebook_command(), sink).await {
            Ok(container) => completed(container),
            Err(e) => failed("notebook", &e),
        }
    }

    /// Runs an engine dry run inside an engine container and forwards its
    /// output to the sink until the stream ends.
    pub async fn engine_dryrun(&self, sink: &mut dyn LogSink) -> LaunchReport {
        info!(image = %AUTOML_IMAGE, "Starting engine dry-run flow");
        match self.exec_flow(dryrun_command(), sink).await {
            Ok(container) => completed(container),
            Err(e) => failed("engine-dryrun", &e),
        }
    }

    /// Starts a fresh engine container and follows its own log output,
    /// forwarding every chunk to the sink as it is produced.
    pub async fn engine_generate(&self, sink: &mut dyn LogSink) -> LaunchReport {
        info!(image = %AUTOML_IMAGE, "Starting engine-generate flow");
        match self.logs_flow(sink).await {
            Ok(container) => completed(container),
            Err(e) => failed("engine-generate", &e),
        }
    }

    /// Exec-shaped flow: ensure a running container, dispatch `command`
    /// inside it, attach to the exec stream and forward it.
    async fn exec_flow(
        &self,
        command: Vec<String>,
        sink: &mut dyn LogSink,
    ) -> Result<ContainerHandle, LaunchError> {
        let handle = self.ensure_running(&LaunchSpec::keep_alive()).await?;

        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(command),
            ..Default::default()
        };
        let exec_id = self
            .client
            .engine
            .create_exec(&handle.container_id, options)
            .await
            .map_err(LaunchError::Engine)?;
        debug!(
            state = ?FlowState::Executing,
            exec_id = %exec_id,
            container_id = %handle.container_id,
            "Command dispatched"
        );

        let stream = self
            .client
            .engine
            .start_exec(&exec_id)
            .await
            .map_err(LaunchError::Engine)?;
        debug!(state = ?FlowState::Streaming, container_id = %handle.container_id, "Forwarding exec output");

        let forwarded = forward_stream(stream, sink).await?;
        debug!(container_id = %handle.container_id, chunks = forwarded, "Exec stream ended");
        Ok(handle)
    }

    /// Logs-shaped flow: create and start a container, then follow its
    /// log output indefinitely.
    async fn logs_flow(&self, sink: &mut dyn LogSink) -> Result<ContainerHandle, LaunchError> {
        let handle = self.create_and_start(&LaunchSpec::engine()).await?;

        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let stream = self.client.engine.logs_stream(&handle.container_id, options);
        debug!(state = ?FlowState::Streaming, container_id = %handle.container_id, "Following container logs");

        let forwarded = forward_stream(stream, sink).await?;
        debug!(container_id = %handle.container_id, chunks = forwarded, "Log stream ended");
        Ok(handle)
    }

    /// Returns a handle to a running container for `spec`, adopting an
    /// already-running container from the same image when one exists.
    async fn ensure_running(&self, spec: &LaunchSpec) -> Result<ContainerHandle, LaunchError> {
        let mut filters = HashMap::new();
        filters.insert("ancestor".to_string(), vec![spec.image.clone()]);
        filters.insert("status".to_string(), vec!["running".to_string()]);
        let options = ListContainersOptions::<String> {
            filters,
            ..Default::default()
        };

        let running = self
            .client
            .engine
            .list_containers(Some(options))
            .await
            .map_err(LaunchError::Engine)?;

        for summary in running {
            if let Some(id) = summary.id {
                info!(container_id = %id, image = %spec.image, "Reusing running engine container");
                return Ok(ContainerHandle {
                    container_id: id,
                    image: spec.image.clone(),
                    started_at: Utc::now(),
                    reused: true,
                });
            }
        }

        self.create_and_start(spec).await
    }

    /// Creates and starts a container from `spec`.
    async fn create_and_start(&self, spec: &LaunchSpec) -> Result<ContainerHandle, LaunchError> {
        spec.validate().map_err(LaunchError::InvalidSpec)?;

        let options = spec.name.clone().map(|name| CreateContainerOptions {
            name,
            platform: None,
        });
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.cmd.clone(),
            env: spec.env.clone(),
            ..Default::default()
        };

        let response = self
            .client
            .engine
            .create_container(options, config)
            .await
            .map_err(LaunchError::Engine)?;
        debug!(state = ?FlowState::Created, container_id = %response.id, image = %spec.image, "Container created");

        self.client
            .engine
            .start_container(&response.id)
            .await
            .map_err(LaunchError::Engine)?;
        debug!(state = ?FlowState::Started, container_id = %response.id, "Container started");

        Ok(ContainerHandle {
            container_id: response.id,
            image: spec.image.clone(),
            started_at: Utc::now(),
            reused: false,
        })
    }
}

/// Forwards every chunk of `stream` to `sink` until the stream ends or
/// errors. Returns the number of chunks forwarded.
async fn forward_stream(
    mut stream: LogStream,
    sink: &mut dyn LogSink,
) -> Result<usize, LaunchError> {
    let mut forwarded = 0usize;
    while let Some(item) = stream.next().await {
        let chunk = item.map_err(LaunchError::Stream)?;
        sink.write_chunk(&chunk.into_bytes());
        forwarded += 1;
    }
    Ok(forwarded)
}

fn completed(container: ContainerHandle) -> LaunchReport {
    debug!(state = ?FlowState::Completed, container_id = %container.container_id, "Flow completed");
    LaunchReport {
        state: FlowState::Completed,
        container: Some(container),
    }
}

/// Terminal error handling for every flow: one log line, no retry, no
/// rollback of a container that already started.
fn failed(flow: &str, e: &LaunchError) -> LaunchReport {
    error!(flow = flow, error = %e, "Launch flow failed; any started container is left running");
    LaunchReport {
        state: FlowState::Failed,
        container: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::EngineBridge;
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use bollard::errors::Error as DockerError;
    use bollard::models::{ContainerCreateResponse, ContainerSummary};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct StubBridge {
        inner: Arc<StubInner>,
    }

    #[derive(Default)]
    struct StubInner {
        calls: Mutex<Vec<&'static str>>,
        running: Mutex<Vec<ContainerSummary>>,
        chunks: Mutex<Vec<Vec<u8>>>,
        exec_cmds: Mutex<Vec<Vec<String>>>,
        fail_create: AtomicBool,
        fail_stream: AtomicBool,
    }

    impl StubBridge {
        fn with_chunks(chunks: &[&str]) -> Self {
            let bridge = StubBridge::default();
            *bridge.inner.chunks.lock().unwrap() =
                chunks.iter().map(|c| c.as_bytes().to_vec()).collect();
            bridge
        }

        fn add_running(&self, id: &str) {
            self.inner.running.lock().unwrap().push(ContainerSummary {
                id: Some(id.to_string()),
                ..Default::default()
            });
        }

        fn fail_create(&self) {
            self.inner.fail_create.store(true, Ordering::SeqCst);
        }

        fn fail_stream(&self) {
            self.inner.fail_stream.store(true, Ordering::SeqCst);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.inner.calls.lock().unwrap().clone()
        }

        fn exec_cmds(&self) -> Vec<Vec<String>> {
            self.inner.exec_cmds.lock().unwrap().clone()
        }

        fn record(&self, call: &'static str) {
            self.inner.calls.lock().unwrap().push(call);
        }

        fn output_stream(&self) -> LogStream {
            let chunks = self.inner.chunks.lock().unwrap().clone();
            let mut items: Vec<Result<bollard::container::LogOutput, DockerError>> = chunks
                .into_iter()
                .map(|c| {
                    Ok(bollard::container::LogOutput::StdOut {
                        message: Bytes::from(c),
                    })
                })
                .collect();
            if self.inner.fail_stream.load(Ordering::SeqCst) {
                items.push(Err(stub_error("stream interrupted")));
            }
            futures::stream::iter(items).boxed()
        }
    }

    fn stub_error(message: &str) -> DockerError {
        DockerError::IOError {
            err: std::io::Error::new(std::io::ErrorKind::Other, message.to_string()),
        }
    }

    #[async_trait]
    impl EngineBridge for StubBridge {
        async fn ping(&self) -> Result<(), DockerError> {
            Ok(())
        }

        async fn create_container(
            &self,
            _options: Option<CreateContainerOptions<String>>,
            _config: Config<String>,
        ) -> Result<ContainerCreateResponse, DockerError> {
            self.record("create");
            if self.inner.fail_create.load(Ordering::SeqCst) {
                return Err(stub_error("create refused"));
            }
            Ok(ContainerCreateResponse {
                id: "stub-container".to_string(),
                warnings: Vec::new(),
            })
        }

        async fn start_container(&self, _id: &str) -> Result<(), DockerError> {
            self.record("start");
            Ok(())
        }

        async fn create_exec(
            &self,
            _id: &str,
            options: CreateExecOptions<String>,
        ) -> Result<String, DockerError> {
            self.record("exec-create");
            self.inner
                .exec_cmds
                .lock()
                .unwrap()
                .push(options.cmd.unwrap_or_default());
            Ok("stub-exec".to_string())
        }

        async fn start_exec(&self, _exec_id: &str) -> Result<LogStream, DockerError> {
            self.record("exec-start");
            Ok(self.output_stream())
        }

        fn logs_stream(&self, _id: &str, _options: LogsOptions<String>) -> LogStream {
            self.record("logs");
            self.output_stream()
        }

        async fn list_containers(
            &self,
            _options: Option<ListContainersOptions<String>>,
        ) -> Result<Vec<ContainerSummary>, DockerError> {
            self.record("list");
            Ok(self.inner.running.lock().unwrap().clone())
        }
    }

    fn launcher_over(bridge: StubBridge) -> Launcher {
        Launcher::new(EngineClient::with_bridge(bridge))
    }

    #[tokio::test]
    async fn engine_generate_forwards_chunks_in_order() {
        let bridge = StubBridge::with_chunks(&["a", "b"]);
        let launcher = launcher_over(bridge.clone());
        let mut sink = MemorySink::new();

        let report = launcher.engine_generate(&mut sink).await;

        assert_eq!(report.state, FlowState::Completed);
        assert_eq!(sink.chunks(), &[b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(bridge.calls(), vec!["create", "start", "logs"]);

        let container = report.container.expect("handle on completion");
        assert_eq!(container.container_id, "stub-container");
        assert!(!container.reused);
    }

    #[tokio::test]
    async fn engine_generate_failing_create_forwards_nothing() {
        let bridge = StubBridge::with_chunks(&["a", "b"]);
        bridge.fail_create();
        let launcher = launcher_over(bridge.clone());
        let mut sink = MemorySink::new();

        let report = launcher.engine_generate(&mut sink).await;

        assert_eq!(report.state, FlowState::Failed);
        assert!(report.container.is_none());
        assert!(sink.chunks().is_empty());
        // The flow stops at the failed create; start and logs are never
        // reached.
        assert_eq!(bridge.calls(), vec!["create"]);
    }

    #[tokio::test]
    async fn notebook_execs_inside_fresh_container() {
        let bridge = StubBridge::with_chunks(&["a", "b"]);
        let launcher = launcher_over(bridge.clone());
        let mut sink = MemorySink::new();

        let report = launcher.notebook(&mut sink).await;

        assert_eq!(report.state, FlowState::Completed);
        assert_eq!(sink.as_text(), "ab");
        assert_eq!(
            bridge.calls(),
            vec!["list", "create", "start", "exec-create", "exec-start"]
        );

        let cmds = bridge.exec_cmds();
        assert_eq!(cmds.len(), 1);
        assert!(cmds[0][2].contains("marvin notebook"));
    }

    #[tokio::test]
    async fn notebook_reuses_running_container() {
        let bridge = StubBridge::with_chunks(&["hello"]);
        bridge.add_running("already-up");
        let launcher = launcher_over(bridge.clone());
        let mut sink = MemorySink::new();

        let report = launcher.notebook(&mut sink).await;

        assert_eq!(report.state, FlowState::Completed);
        // No create/start when a running container from the image exists.
        assert_eq!(bridge.calls(), vec!["list", "exec-create", "exec-start"]);

        let container = report.container.expect("handle on completion");
        assert_eq!(container.container_id, "already-up");
        assert!(container.reused);
    }

    #[tokio::test]
    async fn notebook_failing_create_stops_before_exec() {
        let bridge = StubBridge::with_chunks(&["a"]);
        bridge.fail_create();
        let launcher = launcher_over(bridge.clone());
        let mut sink = MemorySink::new();

        let report = launcher.notebook(&mut sink).await;

        assert_eq!(report.state, FlowState::Failed);
        assert!(sink.chunks().is_empty());
        assert_eq!(bridge.calls(), vec!["list", "create"]);
    }

    #[tokio::test]
    async fn dryrun_dispatches_dryrun_command() {
        let bridge = StubBridge::with_chunks(&["ok"]);
        let launcher = launcher_over(bridge.clone());
        let mut sink = MemorySink::new();

        let report = launcher.engine_dryrun(&mut sink).await;

        assert_eq!(report.state, FlowState::Completed);
        let cmds = bridge.exec_cmds();
        assert_eq!(cmds.len(), 1);
        assert!(cmds[0][2].contains("marvin engine-dryrun"));
    }

    #[tokio::test]
    async fn mid_stream_error_fails_after_forwarding_earlier_chunks() {
        let bridge = StubBridge::with_chunks(&["a", "b"]);
        bridge.fail_stream();
        let launcher = launcher_over(bridge.clone());
        let mut sink = MemorySink::new();

        let report = launcher.engine_generate(&mut sink).await;

        // Chunks delivered before the disconnect already reached the
        // sink; the flow still terminates as failed.
        assert_eq!(report.state, FlowState::Failed);
        assert_eq!(sink.chunks(), &[b"a".to_vec(), b"b".to_vec()]);
    }
}
