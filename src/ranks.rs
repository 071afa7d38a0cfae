//! Final rank values, kept in the partition that computed them.
use float_ord::FloatOrd;
use rayon::prelude::*;

use crate::cluster::PartitionId;
use crate::graph::NodeID;

/// The ranks owned by one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct RankSegment {
    partition: PartitionId,
    vertices: Vec<NodeID>,
    values: Vec<f64>
}

impl RankSegment {
    pub fn new(partition: PartitionId, vertices: Vec<NodeID>, values: Vec<f64>) -> Self {
        assert_eq!(vertices.len(), values.len());
        RankSegment { partition, vertices, values }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> &[NodeID] {
        &self.vertices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item=(NodeID, f64)> + '_ {
        self.vertices.iter().copied().zip(self.values.iter().copied())
    }

    /// Visits every `(vertex, value)` pair in parallel.  The segment is cut into
    /// `handles.len()` contiguous chunks and chunk `i` is processed with
    /// exclusive access to `handles[i]`, so per-worker resources such as
    /// output streams never need locking.  Handles remain owned by the caller
    /// whatever the outcome.  The first error stops the visit and is returned.
    pub fn for_each_with<H, E, F>(&self, handles: &mut [H], f: F) -> Result<(), E>
    where
        H: Send,
        E: Send,
        F: Fn(&mut H, NodeID, f64) -> Result<(), E> + Sync
    {
        assert!(!handles.is_empty() || self.is_empty(), "No handle to visit the segment with");
        let len = self.len();
        let chunk = ((len + handles.len().max(1) - 1) / handles.len().max(1)).max(1);

        handles.par_iter_mut().enumerate().try_for_each(|(i, handle)| {
            let start = (i * chunk).min(len);
            let stop = ((i + 1) * chunk).min(len);
            for j in start..stop {
                f(handle, self.vertices[j], self.values[j])?;
            }
            Ok(())
        })
    }
}

/// The whole rank vector, one segment per partition in partition order.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedRanks {
    segments: Vec<RankSegment>
}

impl PartitionedRanks {
    pub fn new(mut segments: Vec<RankSegment>) -> Self {
        segments.sort_by_key(|s| s.partition);
        PartitionedRanks { segments }
    }

    pub fn segments(&self) -> &[RankSegment] {
        &self.segments
    }

    pub fn partitions(&self) -> usize {
        self.segments.len()
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item=(NodeID, f64)> + '_ {
        self.segments.iter().flat_map(|s| s.iter())
    }

    pub fn get(&self, v: NodeID) -> Option<f64> {
        self.segments.iter().find_map(|s| {
            s.vertices.binary_search(&v).ok().map(|idx| s.values[idx])
        })
    }

    pub fn sum(&self) -> f64 {
        self.segments.iter().map(|s| s.values.iter().sum::<f64>()).sum()
    }

    /// Ranks indexed by vertex id.
    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.; self.len()];
        self.iter().for_each(|(v, r)| dense[v] = r);
        dense
    }

    /// Highest ranked vertices, ties broken by vertex id.
    pub fn top_k(&self, k: usize) -> Vec<(NodeID, f64)> {
        let mut scores: Vec<_> = self.iter().collect();
        scores.sort_by_key(|(v, r)| (FloatOrd(-*r), *v));
        scores.truncate(k);
        scores
    }
}
