pub mod ffmpeg_source;
pub mod image_resizer;
