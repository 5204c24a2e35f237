#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod coalesce;
pub mod config;
pub mod endpoint;
mod engine;
pub mod error;
mod header;
pub mod reader;
pub mod retry;

pub use engine::{PendingRead, RangeReader};
