use crate::shared::frame::Frame;

/// Error type crossing the video-source boundary.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// A grab/retrieve video source: camera device, file, or network stream.
///
/// Implementations handle the I/O details while the capture loop drives
/// them through a fixed protocol: `open` once, then `grab` followed by
/// `retrieve` for every frame, and `release` when done. The capture loop
/// owns the source exclusively on its own thread, so implementations need
/// `Send` but not `Sync`.
pub trait VideoSource: Send {
    /// Connects to the source named by `source_id` (path, URL, device).
    fn open(&mut self, source_id: &str) -> Result<(), SourceError>;

    /// Advances to the next frame without decoding it into pixels.
    ///
    /// Returns `Ok(false)` when the source has no further frame to offer.
    fn grab(&mut self) -> Result<bool, SourceError>;

    /// Converts the most recently grabbed frame into pixel data.
    fn retrieve(&mut self) -> Result<Frame, SourceError>;

    /// Releases the underlying handle. Must tolerate repeated calls.
    fn release(&mut self);
}
