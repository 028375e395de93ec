//! Launch specs, container handles and flow states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Image every launcher flow runs against.
pub const AUTOML_IMAGE: &str = "marvinaiplatform/marvin-automl:0.0.1";

/// Name given to the toolbox container when the launcher creates one.
pub const TOOLBOX_CONTAINER_NAME: &str = "docker-api-test";

/// Keep-alive command for the container backing exec-based flows. The
/// container itself does nothing useful; it only has to stay up so that
/// commands can be dispatched inside it.
const KEEP_ALIVE_CMD: &str = "tail -f /var/log/dmesg";

/// Shell preamble shared by every engine command: the engine virtualenv
/// must be active and the working directory must be the engine checkout.
const ENGINE_ENV_PREAMBLE: &str =
    "source /usr/local/bin/virtualenvwrapper.sh ; workon marvin-engine-env ; cd /opt/marvin/engine/";

/// Builds the `/bin/bash -c` argv for a command run inside the engine
/// environment.
fn engine_shell_command(subcommand: &str) -> Vec<String> {
    vec![
        "/bin/bash".to_string(),
        "-c".to_string(),
        format!("{ENGINE_ENV_PREAMBLE} ; {subcommand}"),
    ]
}

/// Argv for the notebook server, dispatched inside a running container.
pub fn notebook_command() -> Vec<String> {
    engine_shell_command("marvin notebook --allow-root -p 9999")
}

/// Argv for an engine dry run, dispatched inside a running container.
pub fn dryrun_command() -> Vec<String> {
    engine_shell_command("marvin engine-dryrun")
}

/// Everything the engine needs to create one container.
///
/// A spec is built by the caller, submitted to a single launch flow and
/// not persisted anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Image reference, e.g. `marvinaiplatform/marvin-automl:0.0.1`.
    pub image: String,
    /// Container name; the engine picks one when absent.
    pub name: Option<String>,
    /// Command overriding the image entrypoint.
    pub cmd: Option<Vec<String>>,
    /// Environment overrides in `KEY=value` form.
    pub env: Option<Vec<String>>,
}

impl LaunchSpec {
    /// Creates a spec for the given image with no name, command or
    /// environment overrides.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            cmd: None,
            env: None,
        }
    }

    /// Spec for the container backing exec-based flows: the fixed AutoML
    /// image kept alive by a no-op tail so commands can run inside it.
    pub fn keep_alive() -> Self {
        Self::new(AUTOML_IMAGE)
            .with_name(TOOLBOX_CONTAINER_NAME)
            .with_cmd(vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                KEEP_ALIVE_CMD.to_string(),
            ])
    }

    /// Spec for the engine-generate flow: the image's own entrypoint
    /// produces the output, so no command override is set.
    pub fn engine() -> Self {
        Self::new(AUTOML_IMAGE).with_name(TOOLBOX_CONTAINER_NAME)
    }

    /// Sets the container name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the command run as the container process.
    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = Some(cmd);
        self
    }

    /// Sets environment overrides.
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Validates the spec before it is submitted to the engine.
    pub fn validate(&self) -> Result<(), String> {
        if self.image.trim().is_empty() {
            return Err("image reference is empty".to_string());
        }
        if let Some(cmd) = &self.cmd {
            if cmd.is_empty() {
                return Err("command override is present but empty".to_string());
            }
        }
        if let Some(env) = &self.env {
            for entry in env {
                if !entry.contains('=') {
                    return Err(format!("environment entry '{entry}' is not KEY=value"));
                }
            }
        }
        Ok(())
    }
}

/// Engine-assigned reference to a created or adopted container.
///
/// Returned to the caller by every successful flow. Nothing holds on to
/// it afterwards: the container is released implicitly when the process
/// exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Engine-assigned container id.
    pub container_id: String,
    /// Image the container was created from.
    pub image: String,
    /// When the launcher started the container, or adopted it if it was
    /// already running.
    pub started_at: DateTime<Utc>,
    /// True when an already-running container was reused instead of
    /// creating a fresh one.
    pub reused: bool,
}

/// States a launch flow moves through.
///
/// Every invocation walks Created → Started → (Executing →) Streaming and
/// terminates in `Completed` when the stream ends or `Failed` on the
/// first error at any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    /// Descriptor submitted, container created.
    Created,
    /// Container running.
    Started,
    /// Command dispatched inside the running container.
    Executing,
    /// Output chunks being forwarded to the sink.
    Streaming,
    /// Stream ended normally.
    Completed,
    /// An engine or stream error ended the flow; the error was logged and
    /// any container already started stays running.
    Failed,
}

impl FlowState {
    /// Whether the flow has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowState::Completed | FlowState::Failed)
    }
}

/// Terminal record of one launch flow.
#[derive(Debug, Clone)]
pub struct LaunchReport {
    /// Terminal state, `Completed` or `Failed`.
    pub state: FlowState,
    /// Handle to the launched container, present on completion. On
    /// failure the container, if one was already created, is left
    /// running and unreferenced.
    pub container: Option<ContainerHandle>,
}
