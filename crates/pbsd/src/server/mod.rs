pub mod attrdefs;
pub mod comm;
pub mod core;
pub mod job;
pub mod load;
pub mod preempt;
pub mod queue;
pub mod request;
pub mod start;
