use thiserror::Error;

/// Fatal conditions of a capture run. Every variant ends the worker; no
/// reconnection is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("failed to open the video source {source_id}: {reason}")]
    Connection { source_id: String, reason: String },
    #[error("failed to grab the next frame from {source_id}: {reason}")]
    Grab { source_id: String, reason: String },
    #[error("failed to retrieve the next frame from {source_id}: {reason}")]
    Retrieve { source_id: String, reason: String },
    #[error("capture loop for {source_id} aborted: {reason}")]
    Unexpected { source_id: String, reason: String },
}

impl CaptureError {
    pub fn source_id(&self) -> &str {
        match self {
            Self::Connection { source_id, .. }
            | Self::Grab { source_id, .. }
            | Self::Retrieve { source_id, .. }
            | Self::Unexpected { source_id, .. } => source_id,
        }
    }
}

/// Notifications emitted by the run loop to the worker's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The source opened and the loop is about to grab.
    Ready { source_id: String },
    /// The loop hit a fatal error. Followed by `Closed` if the source had
    /// been opened.
    Failed(CaptureError),
    /// The source handle has been released.
    Closed { source_id: String },
}
