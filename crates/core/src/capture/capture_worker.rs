use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::capture::domain::capture_config::CaptureConfig;
use crate::capture::domain::capture_event::{CaptureError, CaptureEvent};
use crate::capture::domain::frame_slot::FrameSlot;
use crate::capture::domain::worker_control::WorkerControl;
use crate::capture::domain::worker_state::WorkerState;
use crate::shared::frame::Frame;
use crate::shared::resolution::Resolution;
use crate::video::domain::frame_resizer::FrameResizer;
use crate::video::domain::video_source::VideoSource;
use crate::video::infrastructure::image_resizer::ImageResizer;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("capture worker cannot start: already {0}")]
    AlreadyStarted(WorkerState),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// State shared between the owner side and the run loop.
#[derive(Default)]
struct Shared {
    slot: FrameSlot,
    control: WorkerControl,
    captured: AtomicU64,
}

/// Pulls frames from a [`VideoSource`] on a dedicated thread and keeps only
/// the most recent one for the owner.
///
/// Layout: `source → grab/retrieve → resize → FrameSlot → read()`
///
/// The source is opened, driven, and released exclusively on the capture
/// thread. The owner polls [`read`](Self::read) at its own pace and steers
/// the loop with `pause`, `resume` and `stop`, none of which wait for the
/// loop. Fatal conditions and lifecycle transitions are reported on the
/// channel returned by [`events`](Self::events).
pub struct CaptureWorker {
    config: CaptureConfig,
    pending: Option<(Box<dyn VideoSource>, Box<dyn FrameResizer>)>,
    controller: CaptureController,
    events_tx: Sender<CaptureEvent>,
    events_rx: Receiver<CaptureEvent>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn new(source: Box<dyn VideoSource>, config: CaptureConfig) -> Self {
        Self::with_resizer(source, Box::new(ImageResizer::new()), config)
    }

    pub fn with_resizer(
        source: Box<dyn VideoSource>,
        resizer: Box<dyn FrameResizer>,
        config: CaptureConfig,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let controller = CaptureController {
            source_id: Arc::from(config.source_id()),
            shared: Arc::new(Shared::default()),
        };
        Self {
            config,
            pending: Some((source, resizer)),
            controller,
            events_tx,
            events_rx,
            handle: None,
        }
    }

    /// Spawns the capture thread, which opens the source and starts grabbing.
    ///
    /// Source failures, including a failure to open, are reported on the
    /// event channel rather than returned here.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        self.controller
            .shared
            .control
            .begin()
            .map_err(WorkerError::AlreadyStarted)?;
        let Some((source, resizer)) = self.pending.take() else {
            return Err(WorkerError::AlreadyStarted(self.state()));
        };

        let run_loop = RunLoop {
            source_id: self.config.source_id().to_string(),
            resolution: self.config.resolution(),
            source,
            resizer,
            shared: Arc::clone(&self.controller.shared),
            events: self.events_tx.clone(),
        };

        let spawned = thread::Builder::new()
            .name(self.config.thread_name().to_string())
            .spawn(move || run_loop.run());

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.controller.shared.control.finish();
                Err(WorkerError::Spawn(e))
            }
        }
    }

    /// Returns the latest frame, or `None` if nothing new arrived since the
    /// previous call. Never blocks on the capture thread.
    pub fn read(&self) -> Option<Frame> {
        self.controller.read()
    }

    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn state(&self) -> WorkerState {
        self.controller.state()
    }

    /// Receiver for lifecycle and failure notifications.
    pub fn events(&self) -> Receiver<CaptureEvent> {
        self.events_rx.clone()
    }

    /// Cloneable handle for driving the worker from other threads.
    pub fn controller(&self) -> CaptureController {
        self.controller.clone()
    }

    pub fn frames_captured(&self) -> u64 {
        self.controller.frames_captured()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.controller.frames_dropped()
    }

    pub fn source_id(&self) -> &str {
        self.config.source_id()
    }

    pub fn resolution(&self) -> Resolution {
        self.config.resolution()
    }

    /// Blocks until the capture thread has exited.
    ///
    /// Does not request a stop; call [`stop`](Self::stop) first unless the
    /// source is expected to end on its own.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Capture thread for {} panicked", self.config.source_id());
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        // The thread is left to observe the stop on its own; joining here
        // could hang on a blocked grab.
        self.controller.shared.control.request_stop();
    }
}

/// Owner-side controls of a [`CaptureWorker`], usable from any thread.
#[derive(Clone)]
pub struct CaptureController {
    source_id: Arc<str>,
    shared: Arc<Shared>,
}

impl CaptureController {
    pub fn read(&self) -> Option<Frame> {
        self.shared.slot.take()
    }

    pub fn pause(&self) {
        if self.shared.control.pause() {
            log::info!("Pause capture: {}", self.source_id);
        }
    }

    pub fn resume(&self) {
        if self.shared.control.resume() {
            log::info!("Resume capture: {}", self.source_id);
        }
    }

    pub fn stop(&self) {
        if self.shared.control.request_stop() {
            log::info!("Stop capture: {}", self.source_id);
        }
    }

    pub fn state(&self) -> WorkerState {
        self.shared.control.state()
    }

    pub fn frames_captured(&self) -> u64 {
        self.shared.captured.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.shared.slot.dropped()
    }
}

/// Everything the capture thread owns.
struct RunLoop {
    source_id: String,
    resolution: Resolution,
    source: Box<dyn VideoSource>,
    resizer: Box<dyn FrameResizer>,
    shared: Arc<Shared>,
    events: Sender<CaptureEvent>,
}

impl RunLoop {
    fn run(mut self) {
        let source_id = self.source_id.clone();

        let opened = panic::catch_unwind(AssertUnwindSafe(|| self.source.open(&source_id)));
        let open_failure = match opened {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        if let Some(reason) = open_failure {
            let err = CaptureError::Connection { source_id, reason };
            log::error!("{err}");
            self.shared.control.finish();
            self.emit(CaptureEvent::Failed(err));
            return;
        }

        log::info!("Connection success: {source_id}");
        self.emit(CaptureEvent::Ready {
            source_id: source_id.clone(),
        });

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            acquire(
                &mut *self.source,
                &*self.resizer,
                self.resolution,
                &source_id,
                &self.shared,
            )
        }));
        let mut failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(CaptureError::Unexpected {
                source_id: source_id.clone(),
                reason: panic_message(payload.as_ref()),
            }),
        };
        if let Some(err) = &failure {
            log::error!("{err}");
        }

        // Release runs exactly once, after both normal and failed exits.
        let released = panic::catch_unwind(AssertUnwindSafe(|| self.source.release()));
        match released {
            Ok(()) => log::info!("Connection closed: {source_id}"),
            Err(payload) => {
                let err = CaptureError::Unexpected {
                    source_id: source_id.clone(),
                    reason: format!("release failed: {}", panic_message(payload.as_ref())),
                };
                log::error!("{err}");
                failure.get_or_insert(err);
            }
        }

        if let Some(err) = failure {
            self.emit(CaptureEvent::Failed(err));
        }
        self.shared.control.finish();
        self.emit(CaptureEvent::Closed { source_id });
    }

    fn emit(&self, event: CaptureEvent) {
        // A dropped owner is not an error for the loop.
        let _ = self.events.send(event);
    }
}

/// Grab, retrieve, resize, deposit until stopped or a step fails.
fn acquire(
    source: &mut dyn VideoSource,
    resizer: &dyn FrameResizer,
    resolution: Resolution,
    source_id: &str,
    shared: &Shared,
) -> Result<(), CaptureError> {
    log::info!("Run capture loop: {source_id} at {resolution}");

    while shared.control.wait_until_active() {
        match source.grab() {
            Ok(true) => {}
            Ok(false) => {
                return Err(CaptureError::Grab {
                    source_id: source_id.to_string(),
                    reason: "source yielded no frame".to_string(),
                })
            }
            Err(e) => {
                return Err(CaptureError::Grab {
                    source_id: source_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }

        let raw = source.retrieve().map_err(|e| CaptureError::Retrieve {
            source_id: source_id.to_string(),
            reason: e.to_string(),
        })?;

        let frame = resizer
            .resize(raw, resolution)
            .map_err(|e| CaptureError::Unexpected {
                source_id: source_id.to_string(),
                reason: format!("resize failed: {e}"),
            })?;

        let index = shared.captured.fetch_add(1, Ordering::Relaxed);
        shared.slot.deposit(frame.with_index(index));
    }

    log::info!("Capture loop stopped: {source_id}");
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use crate::video::domain::video_source::SourceError;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Probe {
        opens: AtomicUsize,
        grabs: AtomicUsize,
        retrieves: AtomicUsize,
        releases: AtomicUsize,
    }

    impl Probe {
        fn grabs(&self) -> usize {
            self.grabs.load(Ordering::SeqCst)
        }

        fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    enum Step {
        Frame,
        End,
        Fail,
        Panic,
    }

    /// In-memory source producing 4x4 RGB frames whose pixels hold the grab
    /// number. `script` decides what the n-th grab (1-based) does; grabs past
    /// the end of the script yield frames.
    struct ScriptedSource {
        probe: Arc<Probe>,
        fail_open: bool,
        open_delay: Duration,
        grab_delay: Duration,
        script: Vec<(usize, Step)>,
        fail_retrieve_at: Option<usize>,
        panic_on_release: bool,
        last_grab: usize,
    }

    impl ScriptedSource {
        fn new(probe: &Arc<Probe>) -> Self {
            Self {
                probe: Arc::clone(probe),
                fail_open: false,
                open_delay: Duration::ZERO,
                grab_delay: Duration::from_millis(1),
                script: Vec::new(),
                fail_retrieve_at: None,
                panic_on_release: false,
                last_grab: 0,
            }
        }

        fn failing_open(mut self) -> Self {
            self.fail_open = true;
            self
        }

        fn open_delay(mut self, delay: Duration) -> Self {
            self.open_delay = delay;
            self
        }

        fn grab_delay(mut self, delay: Duration) -> Self {
            self.grab_delay = delay;
            self
        }

        fn on_grab(mut self, n: usize, step: Step) -> Self {
            self.script.push((n, step));
            self
        }

        fn fail_retrieve_at(mut self, n: usize) -> Self {
            self.fail_retrieve_at = Some(n);
            self
        }

        fn panicking_release(mut self) -> Self {
            self.panic_on_release = true;
            self
        }
    }

    impl VideoSource for ScriptedSource {
        fn open(&mut self, _source_id: &str) -> Result<(), SourceError> {
            self.probe.opens.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.open_delay);
            if self.fail_open {
                return Err("device not found".into());
            }
            Ok(())
        }

        fn grab(&mut self) -> Result<bool, SourceError> {
            let n = self.probe.grabs.fetch_add(1, Ordering::SeqCst) + 1;
            self.last_grab = n;
            thread::sleep(self.grab_delay);
            match self.script.iter().find(|(at, _)| *at == n).map(|(_, s)| s) {
                None | Some(Step::Frame) => Ok(true),
                Some(Step::End) => Ok(false),
                Some(Step::Fail) => Err("stream interrupted".into()),
                Some(Step::Panic) => panic!("driver crashed"),
            }
        }

        fn retrieve(&mut self) -> Result<Frame, SourceError> {
            self.probe.retrieves.fetch_add(1, Ordering::SeqCst);
            if self.fail_retrieve_at == Some(self.last_grab) {
                return Err("corrupt frame".into());
            }
            let value = self.last_grab as u8;
            Ok(Frame::new(vec![value; 4 * 4 * 3], 4, 4, 3, 0))
        }

        fn release(&mut self) {
            self.probe.releases.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_release {
                panic!("handle already freed");
            }
        }
    }

    fn config(width: u32, height: u32) -> CaptureConfig {
        CaptureConfig::new("scripted://test")
            .with_resolution(Resolution::new(width, height).unwrap())
            .with_thread_name("capture-test")
    }

    fn worker(source: ScriptedSource) -> CaptureWorker {
        CaptureWorker::new(Box::new(source), config(4, 4))
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + TIMEOUT;
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn drain(events: &Receiver<CaptureEvent>) -> Vec<CaptureEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.recv_timeout(TIMEOUT) {
            let closed = matches!(event, CaptureEvent::Closed { .. });
            seen.push(event);
            if closed {
                break;
            }
        }
        seen
    }

    #[test]
    fn test_open_failure_reports_connection_error() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe).failing_open());
        let events = w.events();

        w.start().unwrap();

        let event = events.recv_timeout(TIMEOUT).unwrap();
        assert!(matches!(
            event,
            CaptureEvent::Failed(CaptureError::Connection { ref reason, .. }) if reason == "device not found"
        ));
        w.join();
        assert_eq!(w.state(), WorkerState::Stopped);
        assert_eq!(probe.grabs(), 0);
        assert_eq!(probe.releases(), 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_grab_failure_on_fifth_call_stops_worker() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe).on_grab(5, Step::Fail));
        let events = w.events();

        w.start().unwrap();
        let seen = drain(&events);
        w.join();

        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0], CaptureEvent::Ready { .. }));
        assert!(matches!(
            seen[1],
            CaptureEvent::Failed(CaptureError::Grab { ref reason, .. }) if reason == "stream interrupted"
        ));
        assert!(matches!(seen[2], CaptureEvent::Closed { .. }));
        assert_eq!(w.state(), WorkerState::Stopped);
        assert_eq!(probe.grabs(), 5);
        assert_eq!(probe.releases(), 1);
        assert_eq!(w.frames_captured(), 4);
    }

    #[test]
    fn test_end_of_stream_is_a_grab_failure() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe).on_grab(3, Step::End));
        let events = w.events();

        w.start().unwrap();
        let seen = drain(&events);

        assert!(seen
            .iter()
            .any(|e| matches!(e, CaptureEvent::Failed(CaptureError::Grab { .. }))));
        w.join();
        assert_eq!(probe.releases(), 1);
    }

    #[test]
    fn test_retrieve_failure_stops_worker() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe).fail_retrieve_at(2));
        let events = w.events();

        w.start().unwrap();
        let seen = drain(&events);
        w.join();

        assert!(matches!(
            seen[1],
            CaptureEvent::Failed(CaptureError::Retrieve { .. })
        ));
        assert_eq!(w.state(), WorkerState::Stopped);
        assert_eq!(probe.grabs(), 2);
        assert_eq!(probe.releases(), 1);
        assert_eq!(w.frames_captured(), 1);
    }

    #[test]
    fn test_panicking_source_takes_fatal_path_and_releases() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe).on_grab(2, Step::Panic));
        let events = w.events();

        w.start().unwrap();
        let seen = drain(&events);
        w.join();

        assert!(matches!(
            seen[1],
            CaptureEvent::Failed(CaptureError::Unexpected { ref reason, .. }) if reason.contains("driver crashed")
        ));
        assert!(matches!(seen[2], CaptureEvent::Closed { .. }));
        assert_eq!(w.state(), WorkerState::Stopped);
        assert_eq!(probe.releases(), 1);
    }

    #[test]
    fn test_panicking_release_keeps_pending_failure_and_stops() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(
            ScriptedSource::new(&probe)
                .on_grab(1, Step::End)
                .panicking_release(),
        );
        let events = w.events();

        w.start().unwrap();
        let seen = drain(&events);
        w.join();

        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0], CaptureEvent::Ready { .. }));
        assert!(matches!(
            seen[1],
            CaptureEvent::Failed(CaptureError::Grab { .. })
        ));
        assert!(matches!(seen[2], CaptureEvent::Closed { .. }));
        assert_eq!(w.state(), WorkerState::Stopped);
        assert_eq!(probe.releases(), 1);
    }

    #[test]
    fn test_panicking_release_after_stop_is_reported() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe).panicking_release());
        let events = w.events();

        w.start().unwrap();
        wait_until(|| w.frames_captured() > 0);
        w.stop();
        let seen = drain(&events);
        w.join();

        assert!(matches!(
            seen[1],
            CaptureEvent::Failed(CaptureError::Unexpected { ref reason, .. }) if reason.contains("handle already freed")
        ));
        assert!(matches!(seen[2], CaptureEvent::Closed { .. }));
        assert_eq!(w.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_resize_failure_takes_fatal_path() {
        struct FailingResizer;
        impl FrameResizer for FailingResizer {
            fn resize(&self, _frame: Frame, _target: Resolution) -> Result<Frame, SourceError> {
                Err("out of memory".into())
            }
        }

        let probe = Arc::new(Probe::default());
        let mut w = CaptureWorker::with_resizer(
            Box::new(ScriptedSource::new(&probe)),
            Box::new(FailingResizer),
            config(2, 2),
        );
        let events = w.events();

        w.start().unwrap();
        let seen = drain(&events);
        w.join();

        assert!(matches!(
            seen[1],
            CaptureEvent::Failed(CaptureError::Unexpected { .. })
        ));
        assert_eq!(probe.releases(), 1);
    }

    #[test]
    fn test_read_returns_latest_then_none() {
        let probe = Arc::new(Probe::default());
        let source = ScriptedSource::new(&probe)
            .grab_delay(Duration::from_millis(100))
            .on_grab(3, Step::End);
        let mut w = worker(source);

        w.start().unwrap();
        w.join();

        let frame = w.read().unwrap();
        assert_eq!(frame.index(), 1);
        assert!(frame.data().iter().all(|&v| v == 2));
        assert_eq!(w.read(), None);
        assert_eq!(w.frames_dropped(), 1);
    }

    #[test]
    fn test_read_before_start_returns_none() {
        let probe = Arc::new(Probe::default());
        let w = worker(ScriptedSource::new(&probe));
        assert_eq!(w.read(), None);
        assert_eq!(w.state(), WorkerState::Created);
    }

    #[test]
    fn test_frames_are_resized_to_target() {
        let probe = Arc::new(Probe::default());
        let mut w = CaptureWorker::new(Box::new(ScriptedSource::new(&probe)), config(2, 3));

        w.start().unwrap();
        wait_until(|| w.frames_captured() > 0);
        let frame = loop {
            if let Some(f) = w.read() {
                break f;
            }
        };
        w.stop();
        w.join();

        assert_eq!((frame.width(), frame.height()), (2, 3));
        assert_eq!(frame.channels(), 3);
    }

    #[test]
    fn test_sequence_indices_increase() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe));

        w.start().unwrap();
        let mut indices = Vec::new();
        wait_until(|| {
            if let Some(f) = w.read() {
                indices.push(f.index());
            }
            indices.len() >= 3
        });
        w.stop();
        w.join();

        assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_no_grabs_while_paused() {
        let probe = Arc::new(Probe::default());
        let source = ScriptedSource::new(&probe).open_delay(Duration::from_millis(50));
        let mut w = worker(source);

        w.start().unwrap();
        w.pause();
        thread::sleep(Duration::from_millis(250));
        assert_eq!(probe.grabs(), 0);
        assert_eq!(w.state(), WorkerState::RunningPaused);

        w.resume();
        wait_until(|| probe.grabs() > 0);
        assert_eq!(w.state(), WorkerState::RunningActive);

        w.stop();
        w.join();
        assert_eq!(probe.releases(), 1);
    }

    #[test]
    fn test_pause_mid_run_halts_grabbing() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe));

        w.start().unwrap();
        wait_until(|| probe.grabs() >= 3);
        w.pause();
        // Allow an in-flight grab to complete.
        thread::sleep(Duration::from_millis(50));
        let paused_at = probe.grabs();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(probe.grabs(), paused_at);

        w.resume();
        wait_until(|| probe.grabs() > paused_at);
        w.stop();
        w.join();
    }

    #[test]
    fn test_pause_twice_stays_paused_and_resume_when_active_is_noop() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe));

        w.start().unwrap();
        w.resume();
        assert_eq!(w.state(), WorkerState::RunningActive);

        w.pause();
        w.pause();
        assert_eq!(w.state(), WorkerState::RunningPaused);

        w.resume();
        assert_eq!(w.state(), WorkerState::RunningActive);

        w.stop();
        w.join();
    }

    #[test]
    fn test_pause_before_start_never_grabs() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe));
        let events = w.events();

        w.pause();
        w.start().unwrap();
        assert!(matches!(
            events.recv_timeout(TIMEOUT).unwrap(),
            CaptureEvent::Ready { .. }
        ));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(probe.grabs(), 0);

        w.stop();
        w.join();
        assert_eq!(probe.grabs(), 0);
        assert_eq!(probe.releases(), 1);
    }

    #[test]
    fn test_stop_is_idempotent_and_final() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe));
        let events = w.events();

        w.start().unwrap();
        wait_until(|| w.frames_captured() > 0);
        w.stop();
        w.stop();
        w.join();
        w.stop();

        let grabs_after_stop = probe.grabs();
        w.resume();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(w.state(), WorkerState::Stopped);
        assert_eq!(probe.grabs(), grabs_after_stop);
        assert_eq!(probe.releases(), 1);
        let _ = w.read();
        assert_eq!(w.read(), None);

        let seen = drain(&events);
        assert!(matches!(seen.last(), Some(CaptureEvent::Closed { .. })));
        assert!(!seen
            .iter()
            .any(|e| matches!(e, CaptureEvent::Failed(_))));
    }

    #[test]
    fn test_stop_wakes_paused_loop() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe));

        w.pause();
        w.start().unwrap();
        w.stop();
        w.join();

        assert_eq!(w.state(), WorkerState::Stopped);
        assert_eq!(probe.grabs(), 0);
        assert_eq!(probe.releases(), 1);
    }

    #[test]
    fn test_stopping_is_visible_during_blocked_grab() {
        let probe = Arc::new(Probe::default());
        let source = ScriptedSource::new(&probe).grab_delay(Duration::from_millis(300));
        let mut w = worker(source);

        w.start().unwrap();
        wait_until(|| probe.grabs() >= 1);
        w.stop();
        assert_eq!(w.state(), WorkerState::Stopping);

        w.join();
        assert_eq!(w.state(), WorkerState::Stopped);
        assert_eq!(probe.grabs(), 1);
        assert_eq!(probe.releases(), 1);
    }

    #[test]
    fn test_stop_before_start_prevents_start() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe));

        w.stop();
        assert_eq!(w.state(), WorkerState::Stopped);
        assert!(matches!(
            w.start(),
            Err(WorkerError::AlreadyStarted(WorkerState::Stopped))
        ));
        assert_eq!(probe.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_twice_errors() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe));

        w.start().unwrap();
        assert!(matches!(w.start(), Err(WorkerError::AlreadyStarted(_))));

        w.stop();
        w.join();
        assert_eq!(probe.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_controller_drives_worker_from_another_thread() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe));
        w.start().unwrap();

        let controller = w.controller();
        let consumer = thread::spawn(move || {
            let deadline = Instant::now() + TIMEOUT;
            let frame = loop {
                if let Some(f) = controller.read() {
                    break f;
                }
                assert!(Instant::now() < deadline);
                thread::sleep(Duration::from_millis(1));
            };
            controller.stop();
            frame
        });

        let frame = consumer.join().unwrap();
        w.join();
        assert_eq!(frame.width(), 4);
        assert_eq!(w.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_drop_signals_stop() {
        let probe = Arc::new(Probe::default());
        let mut w = worker(ScriptedSource::new(&probe));
        w.start().unwrap();
        wait_until(|| probe.grabs() > 0);

        drop(w);
        wait_until(|| probe.releases() == 1);
    }

    #[test]
    fn test_accessors() {
        let probe = Arc::new(Probe::default());
        let w = worker(ScriptedSource::new(&probe));
        assert_eq!(w.source_id(), "scripted://test");
        assert_eq!(w.resolution().to_tuple(), (4, 4));
        assert_eq!(w.frames_captured(), 0);
        assert_eq!(w.frames_dropped(), 0);
    }

    #[test]
    fn test_panic_message_formats_payloads() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "panic: boom");
        let s: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(s.as_ref()), "panic: bang");
        let s: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(s.as_ref()), "panic with non-string payload");
    }
}
