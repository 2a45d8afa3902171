use serde::{Deserialize, Serialize};

use crate::shared::constants::{CAPTURE_THREAD_NAME, DEFAULT_RESOLUTION};
use crate::shared::resolution::Resolution;

/// Settings for one capture worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    source_id: String,
    #[serde(default = "default_resolution")]
    resolution: Resolution,
    #[serde(default = "default_thread_name")]
    thread_name: String,
}

fn default_resolution() -> Resolution {
    DEFAULT_RESOLUTION
}

fn default_thread_name() -> String {
    CAPTURE_THREAD_NAME.to_string()
}

impl CaptureConfig {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            resolution: default_resolution(),
            thread_name: default_thread_name(),
        }
    }

    /// Set the path, URL, or device the worker opens.
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    /// Set the size every captured frame is resized to.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the name of the background capture thread.
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}
