//! Docker engine client for the launcher.
//!
//! All engine access goes through the [`EngineBridge`] trait so flows can
//! run against the real daemon in production and against stub bridges in
//! tests. [`BollardBridge`] is the production implementation, a thin
//! delegation layer over [`bollard::Docker`].

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateResponse, ContainerSummary};
use bollard::Docker;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

/// Lazy, unbounded stream of output chunks produced by the engine.
///
/// Ends only when the engine closes it or it errors; there is no
/// client-side cancellation and a stream cannot be restarted.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogOutput, DockerError>> + Send>>;

/// Engine operations the launcher consumes.
#[async_trait]
pub trait EngineBridge: Send + Sync {
    /// Connectivity check against the engine daemon.
    async fn ping(&self) -> Result<(), DockerError>;

    /// Creates a container and returns the engine's create response.
    async fn create_container(
        &self,
        options: Option<CreateContainerOptions<String>>,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError>;

    /// Starts a created container.
    async fn start_container(&self, id: &str) -> Result<(), DockerError>;

    /// Registers a command to run inside a running container and returns
    /// the exec id.
    async fn create_exec(
        &self,
        id: &str,
        options: CreateExecOptions<String>,
    ) -> Result<String, DockerError>;

    /// Starts a registered exec attached (not detached) and returns its
    /// output stream.
    async fn start_exec(&self, exec_id: &str) -> Result<LogStream, DockerError>;

    /// Attaches to a container's own log output.
    fn logs_stream(&self, id: &str, options: LogsOptions<String>) -> LogStream;

    /// Lists containers matching the given options.
    async fn list_containers(
        &self,
        options: Option<ListContainersOptions<String>>,
    ) -> Result<Vec<ContainerSummary>, DockerError>;
}

/// Production bridge delegating to the bollard Docker client.
#[derive(Clone)]
struct BollardBridge {
    docker: Docker,
}

impl BollardBridge {
    fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl EngineBridge for BollardBridge {
    async fn ping(&self) -> Result<(), DockerError> {
        self.docker.ping().await.map(|_| ())
    }

    async fn create_container(
        &self,
        options: Option<CreateContainerOptions<String>>,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError> {
        self.docker.create_container(options, config).await
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
    }

    async fn create_exec(
        &self,
        id: &str,
        options: CreateExecOptions<String>,
    ) -> Result<String, DockerError> {
        let exec = self.docker.create_exec(id, options).await?;
        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<LogStream, DockerError> {
        let options = StartExecOptions {
            detach: false,
            ..Default::default()
        };
        match self.docker.start_exec(exec_id, Some(options)).await? {
            StartExecResults::Attached { output, .. } => Ok(output),
            // detach is false above, so the engine always attaches; an
            // unexpected detached result behaves like an ended stream.
            StartExecResults::Detached => Ok(futures::stream::empty().boxed()),
        }
    }

    fn logs_stream(&self, id: &str, options: LogsOptions<String>) -> LogStream {
        Box::pin(self.docker.logs(id, Some(options)))
    }

    async fn list_containers(
        &self,
        options: Option<ListContainersOptions<String>>,
    ) -> Result<Vec<ContainerSummary>, DockerError> {
        self.docker.list_containers(options).await
    }
}

/// Handle to the container engine, passed explicitly to every flow.
///
/// Socket path and TLS material are resolved by bollard from the
/// execution environment (`DOCKER_HOST`, `DOCKER_CERT_PATH`) when the
/// client connects.
pub struct EngineClient {
    pub(crate) engine: Arc<dyn EngineBridge>,
}

impl EngineClient {
    fn from_bridge(engine: Arc<dyn EngineBridge>) -> Self {
        Self { engine }
    }

    /// Creates a client backed by a custom bridge implementation.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # fn demo(bridge: impl engine_launcher::EngineBridge + 'static) {
    /// let client = engine_launcher::EngineClient::with_bridge(bridge);
    /// # }
    /// ```
    pub fn with_bridge(engine: impl EngineBridge + 'static) -> Self {
        Self::from_bridge(Arc::new(engine))
    }

    /// Connects to the local engine daemon and verifies it responds.
    pub async fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;

        let bridge = Arc::new(BollardBridge::new(docker));
        bridge.ping().await?;
        info!("Connected to Docker engine");

        Ok(Self::from_bridge(bridge))
    }
}
