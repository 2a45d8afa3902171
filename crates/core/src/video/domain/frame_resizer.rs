use crate::shared::frame::Frame;
use crate::shared::resolution::Resolution;
use crate::video::domain::video_source::SourceError;

/// Scales a retrieved frame to the capture target size.
pub trait FrameResizer: Send {
    fn resize(&self, frame: Frame, target: Resolution) -> Result<Frame, SourceError>;
}
