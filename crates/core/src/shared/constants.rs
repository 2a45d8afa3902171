use crate::shared::resolution::Resolution;

/// Target size used when a capture config does not name one.
pub const DEFAULT_RESOLUTION: Resolution = Resolution::VGA;

/// Name given to the background capture thread.
pub const CAPTURE_THREAD_NAME: &str = "framegrab-capture";

/// Channel count of frames produced by the ffmpeg source (packed RGB24).
pub const RGB_CHANNELS: u8 = 3;
