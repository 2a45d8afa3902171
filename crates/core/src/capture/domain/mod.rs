pub mod capture_config;
pub mod capture_event;
pub mod frame_slot;
pub mod worker_control;
pub mod worker_state;
