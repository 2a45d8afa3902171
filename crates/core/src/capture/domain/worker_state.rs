use std::fmt;

/// Lifecycle of a capture worker as observed by its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Created,
    RunningActive,
    RunningPaused,
    Stopping,
    Stopped,
}

impl WorkerState {
    pub fn is_stopped(self) -> bool {
        self == Self::Stopped
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::RunningActive => "running",
            Self::RunningPaused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
