pub mod graph;
pub mod algos;
pub mod cluster;
pub mod error;
pub mod io;
pub mod partition;
pub mod partitioned;
pub mod pipeline;
pub mod ranks;
pub mod bitset;
mod progress;

pub use crate::error::{RankError, Result};
