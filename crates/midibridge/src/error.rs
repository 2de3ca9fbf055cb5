//! Error types returned by the MIDI bridge.

use thiserror::Error;

/// Failure opening a connection to an endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The index is outside the current enumeration. Re-list devices and retry.
    #[error("MIDI device index {index} out of range ({count} devices available)")]
    InvalidIndex { index: usize, count: usize },
    /// Neither a source nor a destination resolved for the index.
    #[error("no MIDI endpoint for device {index}")]
    NoEndpoint { index: usize },
    /// No device name matched a lookup by name.
    #[error("no MIDI device matching '{name}'")]
    UnknownDevice { name: String },
    /// The native connect call was rejected.
    #[error("failed to connect MIDI device {index}: {reason}")]
    ConnectFailed { index: usize, reason: String },
    /// The native client could not be created. Permanent for the session.
    #[error("MIDI client initialisation failed: {0}")]
    ClientInitFailed(String),
    /// The native input port could not be created. Permanent for the session.
    #[error("MIDI port initialisation failed: {0}")]
    PortInitFailed(String),
}

/// Failure installing the hotplug notification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to install MIDI hotplug notification: {reason}")]
pub struct InstallError {
    pub reason: String,
}

/// Renders an error chain on one line.
pub(crate) fn describe(err: &anyhow::Error) -> String {
    format!("{err:#}")
}
