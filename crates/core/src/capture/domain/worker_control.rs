use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::capture::domain::worker_state::WorkerState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

#[derive(Debug)]
struct ControlState {
    lifecycle: Lifecycle,
    paused: bool,
    stop_requested: bool,
}

/// Pause gate and stop signal shared between a worker's owner and its
/// run loop.
///
/// The owner flips flags without waiting; the run loop blocks in
/// [`wait_until_active`](Self::wait_until_active) while paused and is woken
/// by either `resume` or `request_stop`.
#[derive(Debug)]
pub struct WorkerControl {
    state: Mutex<ControlState>,
    changed: Condvar,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                lifecycle: Lifecycle::Created,
                paused: false,
                stop_requested: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Moves Created to Running. Returns the current state otherwise.
    pub fn begin(&self) -> Result<(), WorkerState> {
        let mut state = self.lock();
        if state.lifecycle != Lifecycle::Created {
            return Err(observe(&state));
        }
        state.lifecycle = Lifecycle::Running;
        Ok(())
    }

    /// Closes the gate. Returns `true` if this call changed anything.
    pub fn pause(&self) -> bool {
        let mut state = self.lock();
        if state.paused || state.lifecycle == Lifecycle::Stopped {
            return false;
        }
        state.paused = true;
        true
    }

    /// Opens the gate, waking a paused run loop. Returns `true` if this call
    /// changed anything.
    pub fn resume(&self) -> bool {
        let mut state = self.lock();
        if !state.paused || state.lifecycle == Lifecycle::Stopped {
            return false;
        }
        state.paused = false;
        self.changed.notify_all();
        true
    }

    /// Asks the run loop to exit at its next checkpoint. A worker that was
    /// never started goes straight to Stopped. Returns `true` if this call
    /// changed anything.
    pub fn request_stop(&self) -> bool {
        let mut state = self.lock();
        let lifecycle = state.lifecycle;
        match lifecycle {
            Lifecycle::Stopped => false,
            _ if state.stop_requested => false,
            Lifecycle::Created => {
                state.lifecycle = Lifecycle::Stopped;
                true
            }
            Lifecycle::Running => {
                state.stop_requested = true;
                self.changed.notify_all();
                true
            }
        }
    }

    /// Blocks while the gate is closed. Returns `false` once a stop has been
    /// requested, `true` when the loop may grab the next frame.
    pub fn wait_until_active(&self) -> bool {
        let state = self
            .changed
            .wait_while(self.lock(), |s| s.paused && !s.stop_requested)
            .unwrap_or_else(PoisonError::into_inner);
        !state.stop_requested
    }

    /// Marks the run loop as finished.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.lifecycle = Lifecycle::Stopped;
        self.changed.notify_all();
    }

    pub fn state(&self) -> WorkerState {
        observe(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WorkerControl {
    fn default() -> Self {
        Self::new()
    }
}

fn observe(state: &ControlState) -> WorkerState {
    match state.lifecycle {
        Lifecycle::Created => WorkerState::Created,
        Lifecycle::Stopped => WorkerState::Stopped,
        Lifecycle::Running if state.stop_requested => WorkerState::Stopping,
        Lifecycle::Running if state.paused => WorkerState::RunningPaused,
        Lifecycle::Running => WorkerState::RunningActive,
    }
}
