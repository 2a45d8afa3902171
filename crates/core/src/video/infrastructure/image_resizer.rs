use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Pixel, Rgb, Rgba};

use crate::shared::frame::Frame;
use crate::shared::resolution::Resolution;
use crate::video::domain::frame_resizer::FrameResizer;
use crate::video::domain::video_source::SourceError;

/// Resizes frames on the CPU with the `image` crate.
///
/// Bilinear (`Triangle`) filtering by default. Frames that already have the
/// target size are passed through without copying.
pub struct ImageResizer {
    filter: FilterType,
}

impl ImageResizer {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Triangle,
        }
    }

    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> FilterType {
        self.filter
    }
}

impl Default for ImageResizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameResizer for ImageResizer {
    fn resize(&self, frame: Frame, target: Resolution) -> Result<Frame, SourceError> {
        if frame.has_resolution(target) {
            return Ok(frame);
        }

        let (width, height, channels, index) =
            (frame.width(), frame.height(), frame.channels(), frame.index());
        let data = frame.into_data();

        let scaled = match channels {
            1 => scale::<Luma<u8>>(data, width, height, target, self.filter)?,
            3 => scale::<Rgb<u8>>(data, width, height, target, self.filter)?,
            4 => scale::<Rgba<u8>>(data, width, height, target, self.filter)?,
            other => return Err(format!("unsupported channel count: {other}").into()),
        };

        Ok(Frame::new(
            scaled,
            target.width(),
            target.height(),
            channels,
            index,
        ))
    }
}

fn scale<P>(
    data: Vec<u8>,
    width: u32,
    height: u32,
    target: Resolution,
    filter: FilterType,
) -> Result<Vec<u8>, SourceError>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let buffer: ImageBuffer<P, Vec<u8>> = ImageBuffer::from_raw(width, height, data)
        .ok_or("frame data does not match its dimensions")?;
    Ok(imageops::resize(&buffer, target.width(), target.height(), filter).into_raw())
}
