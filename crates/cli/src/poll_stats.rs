use std::time::{Duration, Instant};

/// Consumer-side counters for the polling loop.
///
/// Reports are throttled to one per `interval` to keep log output readable
/// at high poll rates.
pub struct PollStats {
    interval: Duration,
    start_time: Instant,
    last_report: Instant,
    polls: u64,
    frames_read: u64,
    empty_polls: u64,
}

impl PollStats {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            start_time: now,
            last_report: now,
            polls: 0,
            frames_read: 0,
            empty_polls: 0,
        }
    }

    pub fn record(&mut self, got_frame: bool) {
        self.polls += 1;
        if got_frame {
            self.frames_read += 1;
        } else {
            self.empty_polls += 1;
        }
    }

    /// Returns `true` once per interval; the caller logs a report.
    pub fn report_due(&mut self) -> bool {
        if self.last_report.elapsed() < self.interval {
            return false;
        }
        self.last_report = Instant::now();
        true
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn empty_polls(&self) -> u64 {
        self.empty_polls
    }

    /// One-line summary including worker-side counters.
    pub fn summary_string(&self, captured: u64, dropped: u64) -> String {
        let secs = self.start_time.elapsed().as_secs_f64();
        let mut line = format!(
            "read {} frames in {} polls ({} empty), captured {captured}, dropped {dropped}",
            self.frames_read, self.polls, self.empty_polls
        );
        if secs > 0.0 && self.frames_read > 0 {
            line.push_str(&format!(", {:.1} fps read", self.frames_read as f64 / secs));
        }
        line
    }
}
