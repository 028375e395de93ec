//! Engine Launcher
//!
//! Starts Marvin engine containers and streams their output. Provides:
//! - An [`EngineBridge`] trait over the container-engine API, with a
//!   bollard-backed production implementation
//! - Launch flows: `notebook` and `engine_dryrun` (exec a command inside
//!   a running container), `engine_generate` (follow a container's own
//!   logs)
//! - Output forwarding to a pluggable [`LogSink`]
//!
//! Failure policy throughout: the first error terminates the flow, is
//! logged, and is reported as the `Failed` terminal state. Nothing is
//! retried and containers that already started are not cleaned up.

pub mod config;
pub mod docker;
pub mod error;
pub mod launcher;
pub mod sink;

pub use config::{
    dryrun_command, notebook_command, ContainerHandle, FlowState, LaunchReport, LaunchSpec,
    AUTOML_IMAGE, TOOLBOX_CONTAINER_NAME,
};
pub use docker::{EngineBridge, EngineClient, LogStream};
pub use error::LaunchError;
pub use launcher::Launcher;
pub use sink::{ConsoleSink, LogSink, MemorySink};
