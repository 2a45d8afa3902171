//! Background frame acquisition.
//!
//! A [`CaptureWorker`](capture::capture_worker::CaptureWorker) drives a
//! [`VideoSource`](video::domain::video_source::VideoSource) on its own
//! thread and hands the owner only the most recent frame through a
//! single-slot buffer.

pub mod capture;
pub mod shared;
pub mod video;
