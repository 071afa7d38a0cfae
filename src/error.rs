//! Error type shared by loading, partitioning, coordination and output.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::cluster::PartitionId;
use crate::graph::NodeID;

pub type Result<T> = std::result::Result<T, RankError>;

#[derive(Error, Debug)]
pub enum RankError {
    /// Invalid or missing option, caught before any work starts.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error
    },

    #[error("{}:{line}: Malformed edge: {content:?}", path.display())]
    MalformedEdge {
        path: PathBuf,
        line: usize,
        content: String
    },

    #[error("Edge ({src}, {dst}) references a vertex outside of 0..{vertex_count}")]
    VertexOutOfRange {
        src: NodeID,
        dst: NodeID,
        vertex_count: usize
    },

    #[error("Partition {partition}: {reason}")]
    Coordination {
        partition: PartitionId,
        reason: String
    },

    #[error("Partition {partition} aborted the run")]
    Aborted {
        partition: PartitionId
    }
}

impl RankError {
    pub fn config(msg: impl Into<String>) -> Self {
        RankError::Config(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RankError::Io { path: path.into(), source }
    }

    pub fn coordination(partition: PartitionId, reason: impl Into<String>) -> Self {
        RankError::Coordination { partition, reason: reason.into() }
    }
}
