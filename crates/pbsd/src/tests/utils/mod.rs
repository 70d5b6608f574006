pub mod env;
pub mod job;
