pub mod infrastructure;
pub mod job;
