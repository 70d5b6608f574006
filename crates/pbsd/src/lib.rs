#![deny(clippy::await_holding_refcell_ref)]

#[macro_use]
pub mod common;
pub mod server;

#[cfg(test)]
mod tests;

pub use attrdb::{Map, Set};
pub use crate::common::WrappedRcRefCell;

define_id_type!(ConnectionId, u32);
define_id_type!(PreemptBatchId, u64);

pub type Error = common::error::PbsError;
pub type Result<T> = std::result::Result<T, Error>;
