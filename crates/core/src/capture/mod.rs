pub mod capture_worker;
pub mod domain;
