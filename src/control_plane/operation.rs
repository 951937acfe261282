//! In-flight asynchronous operations.

use serde::Deserialize;

use super::{ControlPlaneError, HttpMethod};

/// Observed state of an asynchronous operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OperationState {
    /// Any non-terminal status reported by the remote side (`InProgress`,
    /// `Accepted`, ...).
    Pending(String),
    /// Terminal success.
    Succeeded,
    /// Terminal failure.
    Failed,
}

impl OperationState {
    /// Whether polling can stop.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl From<&str> for OperationState {
    fn from(status: &str) -> Self {
        match status {
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            other => Self::Pending(other.to_owned()),
        }
    }
}

#[derive(Deserialize)]
struct StatusDocument {
    status: String,
}

/// One remote mutation whose completion is being tracked.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AsyncOperation {
    /// Verb of the submitted request.
    pub method: HttpMethod,
    /// Target URI of the submitted request.
    pub uri: String,
    /// Completion-status link returned by the remote side.
    pub status_link: String,
    /// Last observed state.
    pub state: OperationState,
}

impl AsyncOperation {
    /// Starts tracking an accepted request.
    #[must_use]
    pub fn new(method: HttpMethod, uri: &str, status_link: &str) -> Self {
        Self {
            method,
            uri: uri.to_owned(),
            status_link: status_link.to_owned(),
            state: OperationState::Pending(String::from("Accepted")),
        }
    }

    /// Updates the state from a status document.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Decode`] when the document carries no
    /// `status` field.
    pub fn observe(&mut self, body: &str) -> Result<&OperationState, ControlPlaneError> {
        let document: StatusDocument = serde_json::from_str(body)
            .map_err(|err| ControlPlaneError::decode("operation status", &err))?;
        self.state = OperationState::from(document.status.as_str());
        Ok(&self.state)
    }
}
