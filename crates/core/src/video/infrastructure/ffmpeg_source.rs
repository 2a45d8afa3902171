use std::ffi::CString;
use std::path::Path;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame::video::Video;

use crate::shared::constants::RGB_CHANNELS;
use crate::shared::frame::Frame;
use crate::shared::resolution::Resolution;
use crate::video::domain::video_source::{SourceError, VideoSource};

/// Grabs and decodes frames via ffmpeg-next (libavformat + libavcodec).
///
/// Accepts anything libavformat can open: file paths, network URLs such as
/// `rtsp://` or `http://`, and capture devices (see [`SourceLocator`]).
/// `grab` decodes into an internal pending frame; `retrieve` converts that
/// frame to packed RGB24.
pub struct FfmpegSource {
    input_ctx: Option<ffmpeg_next::format::context::Input>,
    decoder: Option<ffmpeg_next::decoder::Video>,
    scaler: Option<ScalerState>,
    pending: Option<Video>,
    video_stream_index: usize,
    flushing: bool,
}

struct ScalerState {
    context: scaling::Context,
    format: Pixel,
    width: u32,
    height: u32,
}

// Safety: FfmpegSource is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    pub fn new() -> Self {
        Self {
            input_ctx: None,
            decoder: None,
            scaler: None,
            pending: None,
            video_stream_index: 0,
            flushing: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.input_ctx.is_some()
    }

    /// Coded size of the opened video stream, if known.
    pub fn native_resolution(&self) -> Option<Resolution> {
        let decoder = self.decoder.as_ref()?;
        Resolution::new(decoder.width(), decoder.height()).ok()
    }

    fn scaler_for(&mut self, decoded: &Video) -> Result<&mut scaling::Context, SourceError> {
        let (format, width, height) = (decoded.format(), decoded.width(), decoded.height());
        let stale = match &self.scaler {
            Some(s) => s.format != format || s.width != width || s.height != height,
            None => true,
        };
        if stale {
            let context = scaling::Context::get(
                format,
                width,
                height,
                Pixel::RGB24,
                width,
                height,
                scaling::Flags::BILINEAR,
            )?;
            self.scaler = Some(ScalerState {
                context,
                format,
                width,
                height,
            });
        }
        match self.scaler.as_mut() {
            Some(s) => Ok(&mut s.context),
            None => Err("FfmpegSource: scaler unavailable".into()),
        }
    }
}

impl Default for FfmpegSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSource for FfmpegSource {
    fn open(&mut self, source_id: &str) -> Result<(), SourceError> {
        self.release();
        ffmpeg_next::init()?;

        let ictx = match SourceLocator::parse(source_id) {
            SourceLocator::Device { demuxer, device } => open_device(demuxer, &device)?,
            SourceLocator::Url(url) => ffmpeg_next::format::input(Path::new(url))?,
        };

        let (video_stream_index, decoder) = {
            let stream = ictx
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or("No video stream found")?;
            let codec_ctx =
                ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
            (stream.index(), codec_ctx.decoder().video()?)
        };

        self.video_stream_index = video_stream_index;
        self.decoder = Some(decoder);
        self.input_ctx = Some(ictx);
        if let Some(native) = self.native_resolution() {
            log::debug!("Opened {source_id}: {native} native");
        }
        Ok(())
    }

    fn grab(&mut self) -> Result<bool, SourceError> {
        let (Some(ictx), Some(decoder)) = (self.input_ctx.as_mut(), self.decoder.as_mut()) else {
            return Err("FfmpegSource: not opened".into());
        };

        loop {
            let mut decoded = Video::empty();
            if decoder.receive_frame(&mut decoded).is_ok() {
                self.pending = Some(decoded);
                return Ok(true);
            }

            if self.flushing {
                return Ok(false);
            }

            let Some((stream, packet)) = ictx.packets().next() else {
                let _ = decoder.send_eof();
                self.flushing = true;
                continue;
            };

            if stream.index() != self.video_stream_index {
                continue;
            }

            // Corrupt packets are skipped; the decoder resyncs on the next keyframe.
            let _ = decoder.send_packet(&packet);
        }
    }

    fn retrieve(&mut self) -> Result<Frame, SourceError> {
        let decoded = self
            .pending
            .take()
            .ok_or("FfmpegSource: no grabbed frame to retrieve")?;
        let (width, height) = (decoded.width(), decoded.height());

        let mut rgb_frame = Video::empty();
        self.scaler_for(&decoded)?.run(&decoded, &mut rgb_frame)?;

        let pixels = extract_rgb_pixels(&rgb_frame, width, height);
        Ok(Frame::new(pixels, width, height, RGB_CHANNELS, 0))
    }

    fn release(&mut self) {
        if !self.is_open() {
            return;
        }
        self.pending = None;
        self.scaler = None;
        self.decoder = None;
        self.input_ctx = None;
        self.flushing = false;
    }
}

/// Capture demuxers accepted as an explicit `<demuxer>:<device>` prefix.
const DEVICE_DEMUXERS: [&str; 3] = ["v4l2", "avfoundation", "dshow"];

/// How a source id maps onto libavformat.
///
/// - `v4l2:/dev/video2`, `avfoundation:0`, `dshow:video=USB Camera` name the
///   capture demuxer explicitly.
/// - `/dev/videoN` is a V4L2 device.
/// - A bare camera index such as `0` is the platform's N-th camera.
/// - Anything else is handed to libavformat as a file path or URL.
#[derive(Debug, PartialEq, Eq)]
pub enum SourceLocator<'a> {
    Device {
        demuxer: &'static str,
        device: String,
    },
    Url(&'a str),
}

impl<'a> SourceLocator<'a> {
    pub fn parse(source_id: &'a str) -> Self {
        if let Some((prefix, device)) = source_id.split_once(':') {
            if let Some(demuxer) = DEVICE_DEMUXERS.into_iter().find(|d| *d == prefix) {
                return Self::Device {
                    demuxer,
                    device: device.to_string(),
                };
            }
        }

        if source_id.starts_with("/dev/video") {
            return Self::Device {
                demuxer: "v4l2",
                device: source_id.to_string(),
            };
        }

        if !source_id.is_empty() && source_id.bytes().all(|b| b.is_ascii_digit()) {
            if cfg!(target_os = "linux") {
                return Self::Device {
                    demuxer: "v4l2",
                    device: format!("/dev/video{source_id}"),
                };
            }
            if cfg!(target_os = "macos") {
                return Self::Device {
                    demuxer: "avfoundation",
                    device: source_id.to_string(),
                };
            }
        }

        Self::Url(source_id)
    }
}

fn open_device(
    demuxer: &str,
    device: &str,
) -> Result<ffmpeg_next::format::context::Input, SourceError> {
    ffmpeg_next::device::register_all();

    let name = CString::new(demuxer)?;
    // Safety: av_find_input_format only reads the name and returns a static
    // descriptor or null.
    let format = unsafe { ffmpeg_next::ffi::av_find_input_format(name.as_ptr()) };
    if format.is_null() {
        return Err(format!("Capture device support not built in: {demuxer}").into());
    }
    // Safety: non-null descriptors returned above live for the whole process.
    let format =
        ffmpeg_next::Format::Input(unsafe { ffmpeg_next::format::Input::wrap(format as *mut _) });

    let opened =
        ffmpeg_next::format::open_with(Path::new(device), &format, ffmpeg_next::Dictionary::new())?;
    match opened {
        ffmpeg_next::format::context::Context::Input(ictx) => Ok(ictx),
        ffmpeg_next::format::context::Context::Output(_) => {
            Err(format!("{demuxer} opened {device} for output").into())
        }
    }
}

/// Copies pixel data from an ffmpeg frame into a contiguous RGB buffer.
///
/// ffmpeg frames may pad each row (stride > width*3); the padding is dropped.
fn extract_rgb_pixels(rgb_frame: &Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}
