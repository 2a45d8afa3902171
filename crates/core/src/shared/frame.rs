use crate::shared::resolution::Resolution;

/// A single decoded frame: tightly packed pixel bytes in row-major order.
///
/// `channels` is 1 (gray), 3 (RGB) or 4 (RGBA). The capture layer treats
/// the pixel data as opaque; conversion happens inside the source adapters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: u64) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Sequence number assigned by the capture loop, starting at 0.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    /// Returns `true` when the frame dimensions equal `resolution`.
    pub fn has_resolution(&self, resolution: Resolution) -> bool {
        self.width == resolution.width() && self.height == resolution.height()
    }
}
