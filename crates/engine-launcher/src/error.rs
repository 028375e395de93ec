//! Error types for the launcher.

use bollard::errors::Error as DockerError;
use thiserror::Error;

/// Errors produced while driving a launch flow.
///
/// The two engine-facing variants distinguish where the failure occurred:
/// [`LaunchError::Engine`] covers request/response failures (socket, TLS,
/// malformed response) on any of the create/start/exec calls, while
/// [`LaunchError::Stream`] covers a log stream that errored mid-transfer
/// after it was successfully attached.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// An engine API call failed before a stream was attached.
    #[error("engine request failed: {0}")]
    Engine(#[source] DockerError),

    /// The attached log stream reported an error mid-transfer.
    #[error("log stream failed: {0}")]
    Stream(#[source] DockerError),

    /// The launch spec was rejected before any engine call was made.
    #[error("invalid launch spec: {0}")]
    InvalidSpec(String),
}
