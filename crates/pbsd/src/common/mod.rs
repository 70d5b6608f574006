#[macro_use]
pub(crate) mod index;

pub mod config;
pub mod error;
pub(crate) mod parser;
pub mod setup;
pub(crate) mod wrapped;

pub use wrapped::WrappedRcRefCell;
