//! Vertex to partition assignment.
//!
//! Two strategies are supported.  With a non-negative `alpha` we run a
//! sequence-balance heuristic: vertices are visited in ascending id order and
//! each one goes to the partition currently holding the least weight, where the
//! weight of a vertex is its in- or out-degree plus `alpha`.  Small values of
//! `alpha` balance edges, large values balance vertex counts.  A negative
//! `alpha` disables weighting and vertices are spread by hashing their id.
//!
//! Both strategies are deterministic: they only depend on the degrees, the
//! number of partitions and `alpha`.
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::cluster::PartitionId;
use crate::error::{RankError, Result};
use crate::graph::{Degrees, NodeID};

/// Which degree the partitioner balances.  It also decides edge ownership: an
/// edge lives with the owner of the endpoint whose degree was balanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Balance {
    /// Balance in-degrees; an edge belongs to the owner of its destination.
    In,
    /// Balance out-degrees; an edge belongs to the owner of its source.
    Out
}

impl Balance {
    pub fn from_part_by_in(part_by_in: bool) -> Self {
        if part_by_in { Balance::In } else { Balance::Out }
    }
}

#[derive(Debug, Clone)]
pub struct Partitioner {
    partitions: usize,
    alpha: i32,
    balance: Balance
}

impl Partitioner {
    pub fn new(partitions: usize, alpha: i32, balance: Balance) -> Result<Self> {
        if partitions == 0 {
            return Err(RankError::config("The number of partitions must be positive"))
        }
        Ok(Partitioner { partitions, alpha, balance })
    }

    pub fn partition(&self, degrees: &Degrees) -> PartitionAssignment {
        let n = degrees.len();
        let weights = match self.balance {
            Balance::In => degrees.in_degrees(),
            Balance::Out => degrees.out_degrees()
        };

        let mut owner = Vec::with_capacity(n);
        let mut loads = vec![0u64; self.partitions];
        if self.alpha >= 0 {
            let alpha = self.alpha as u64;

            // Min-heap on (load, partition) so ties go to the lowest id
            let mut heap: BinaryHeap<Reverse<(u64, PartitionId)>> = (0..self.partitions)
                .map(|p| Reverse((0, p)))
                .collect();

            for w in weights.iter() {
                let w = w.saturating_add(alpha);
                let Reverse((load, p)) = heap.pop().expect("heap holds every partition");
                let load = load.saturating_add(w);
                owner.push(p);
                loads[p] = load;
                heap.push(Reverse((load, p)));
            }
        } else {
            for (v, w) in weights.iter().enumerate() {
                let p = (mix64(v as u64) % self.partitions as u64) as PartitionId;
                owner.push(p);
                loads[p] = loads[p].saturating_add(*w);
            }
        }

        PartitionAssignment::new(owner, loads, self.balance)
    }
}

/// Avalanching 64-bit mixer (the murmur3 finalizer).  Platform independent,
/// unlike the std hashers.
fn mix64(x: u64) -> u64 {
    let mut state = x;
    state ^= state >> 33;
    state = state.wrapping_mul(0xff51_afd7_ed55_8ccd);
    state ^= state >> 33;
    state = state.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    state ^= state >> 33;
    state
}

/// Result of partitioning: who owns each vertex, and what each partition owns.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionAssignment {
    owner: Vec<PartitionId>,
    owned: Vec<Vec<NodeID>>,
    loads: Vec<u64>,
    balance: Balance
}

impl PartitionAssignment {
    fn new(owner: Vec<PartitionId>, loads: Vec<u64>, balance: Balance) -> Self {
        let mut owned = vec![Vec::new(); loads.len()];
        owner.iter().enumerate().for_each(|(v, p)| owned[*p].push(v));
        PartitionAssignment { owner, owned, loads, balance }
    }

    pub fn partitions(&self) -> usize {
        self.loads.len()
    }

    pub fn len(&self) -> usize {
        self.owner.len()
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn owner(&self, v: NodeID) -> PartitionId {
        self.owner[v]
    }

    /// Vertices owned by `p`, ascending.
    pub fn owned(&self, p: PartitionId) -> &[NodeID] {
        &self.owned[p]
    }

    /// Weight placed on each partition.
    pub fn loads(&self) -> &[u64] {
        &self.loads
    }

    /// Partition storing the arc `src -> dst`.
    pub fn edge_owner(&self, src: NodeID, dst: NodeID) -> PartitionId {
        match self.balance {
            Balance::In => self.owner[dst],
            Balance::Out => self.owner[src]
        }
    }

    /// Ratio between the heaviest partition load and the mean load; 1 when
    /// there is nothing to balance.
    pub fn imbalance(&self) -> f64 {
        let total: f64 = self.loads.iter().map(|l| *l as f64).sum();
        if total == 0. {
            return 1.
        }
        let mean = total / self.loads.len() as f64;
        let max = self.loads.iter().copied().max().unwrap_or(0);
        max as f64 / mean
    }
}
