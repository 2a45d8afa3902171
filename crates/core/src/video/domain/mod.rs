pub mod frame_resizer;
pub mod video_source;
