//! The share of the graph held by one partition.
//!
//! Rows and columns of the local CSR are *slots*.  The first `num_owned` slots
//! are the owned vertices in ascending global id; the remaining slots stand for
//! vertices owned by peers, grouped by peer (ascending partition id) and sorted
//! by global id inside a group.  A peer group is the unit of exchange: the same
//! ordered vertex list is agreed on with the peer during the handshake, so the
//! values that travel each epoch need no ids.
//!
//! The meaning of rows and columns depends on the layout:
//!
//! * `Balance::In` (pull): rows are owned vertices, columns are the slots of
//!   their in-neighbours.  Remote slots receive `rank / out_degree` from the
//!   owning peer every epoch.
//! * `Balance::Out` (push): rows are the slots of out-neighbours, columns are
//!   the owned sources pointing at them.  Remote rows are partial sums that get
//!   shipped to the owning peer every epoch.
//!
//! In both cases a local sparse product over the rows computes everything the
//! partition needs, and the order of every floating point sum is fixed by the
//! structure alone.
use hashbrown::HashMap;
use log::debug;

use crate::cluster::{ClusterInfo, PartitionId};
use crate::error::{RankError, Result};
use crate::graph::{Degrees, EdgeList, Graph, GraphInfo, NodeID, CSR};
use crate::partition::{Balance, PartitionAssignment};

/// Remote vertices of one peer, mapped onto a contiguous slot range.
#[derive(Debug, Clone)]
pub struct PeerSlots {
    pub partition: PartitionId,
    pub start: usize,
    pub vertices: Vec<NodeID>
}

impl PeerSlots {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..(self.start + self.vertices.len())
    }
}

#[derive(Debug)]
pub struct PartitionGraph {
    cluster: ClusterInfo,
    info: GraphInfo,
    balance: Balance,
    owned: Vec<NodeID>,
    local_ids: HashMap<NodeID, usize>,
    out_degree: Vec<u64>,
    peers: Vec<PeerSlots>,
    csr: CSR
}

impl PartitionGraph {

    /// Extracts the arcs this partition is responsible for and compresses them.
    pub fn build(
        cluster: &ClusterInfo,
        edge_list: &EdgeList,
        degrees: &Degrees,
        assignment: &PartitionAssignment
    ) -> Self {
        let me = cluster.partition_id;
        let balance = assignment.balance();
        let owned = assignment.owned(me).to_vec();
        let local_ids: HashMap<NodeID, usize> = owned.iter()
            .enumerate()
            .map(|(i, v)| (*v, i))
            .collect();
        let out_degree = owned.iter().map(|v| degrees.out_degrees()[*v]).collect();

        // Arcs stored here, and the remote endpoint of each one
        let local_arcs: Vec<(NodeID, NodeID)> = edge_list.arcs()
            .filter(|(src, dst)| assignment.edge_owner(*src, *dst) == me)
            .collect();

        let remote_end = |(src, dst): (NodeID, NodeID)| match balance {
            Balance::In => src,
            Balance::Out => dst
        };

        let mut remote: Vec<Vec<NodeID>> = vec![Vec::new(); cluster.partitions];
        for arc in local_arcs.iter() {
            let v = remote_end(*arc);
            let p = assignment.owner(v);
            if p != me {
                remote[p].push(v);
            }
        }

        // Lay out the remote slots after the owned ones
        let mut slots: HashMap<NodeID, usize> = HashMap::new();
        let mut peers = Vec::with_capacity(cluster.partitions.saturating_sub(1));
        let mut next_slot = owned.len();
        for (partition, mut vertices) in remote.into_iter().enumerate() {
            if partition == me {
                continue
            }
            vertices.sort_unstable();
            vertices.dedup();
            for (i, v) in vertices.iter().enumerate() {
                slots.insert(*v, next_slot + i);
            }
            let start = next_slot;
            next_slot += vertices.len();
            peers.push(PeerSlots { partition, start, vertices });
        }

        let slot_of = |v: NodeID| -> usize {
            local_ids.get(&v).or_else(|| slots.get(&v)).copied()
                .expect("every endpoint is owned or has a remote slot")
        };

        let (num_rows, entries): (usize, Vec<(usize, usize)>) = match balance {
            Balance::In => {
                let entries = local_arcs.iter()
                    .map(|(src, dst)| (local_ids[dst], slot_of(*src)))
                    .collect();
                (owned.len(), entries)
            },
            Balance::Out => {
                let entries = local_arcs.iter()
                    .map(|(src, dst)| (slot_of(*dst), local_ids[src]))
                    .collect();
                (next_slot, entries)
            }
        };

        let csr = CSR::construct_from_edges(num_rows, &entries);

        debug!("Partition {}: {} owned vertices, {} local arcs, {} remote slots",
               me, owned.len(), csr.edges(), next_slot - owned.len());

        PartitionGraph {
            cluster: *cluster,
            info: *edge_list.info(),
            balance,
            owned,
            local_ids,
            out_degree,
            peers,
            csr
        }
    }

    pub fn cluster(&self) -> &ClusterInfo {
        &self.cluster
    }

    pub fn info(&self) -> &GraphInfo {
        &self.info
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn num_owned(&self) -> usize {
        self.owned.len()
    }

    /// Owned vertices plus remote slots.
    pub fn num_slots(&self) -> usize {
        self.owned.len() + self.peers.iter().map(|p| p.vertices.len()).sum::<usize>()
    }

    pub fn owned(&self) -> &[NodeID] {
        &self.owned
    }

    pub fn global_id(&self, local: usize) -> NodeID {
        self.owned[local]
    }

    pub fn local_id(&self, v: NodeID) -> Option<usize> {
        self.local_ids.get(&v).copied()
    }

    /// Out-degree of an owned vertex in the whole graph, not just locally.
    pub fn out_degree(&self, local: usize) -> usize {
        self.out_degree[local] as usize
    }

    /// One entry per peer, ascending partition id, possibly with no vertices.
    pub fn peers(&self) -> &[PeerSlots] {
        &self.peers
    }

    pub fn peer(&self, partition: PartitionId) -> Option<&PeerSlots> {
        self.peers.iter().find(|p| p.partition == partition)
    }

    /// Rows that hold at least one local arc.
    pub fn active_rows(&self) -> impl Iterator<Item=usize> + '_ {
        self.csr.non_empty_rows()
    }

    /// Converts the vertex list a peer agreed on into local ids.  Every vertex
    /// must be owned here.
    pub fn resolve_routes(&self, from: PartitionId, vertices: &[NodeID]) -> Result<Vec<usize>> {
        vertices.iter().map(|v| {
            self.local_id(*v).ok_or_else(|| RankError::coordination(
                self.cluster.partition_id,
                format!("Partition {} routed vertex {} which is not owned here", from, v)))
        }).collect()
    }
}

impl Graph for PartitionGraph {
    fn len(&self) -> usize {
        self.csr.len()
    }

    fn edges(&self) -> usize {
        self.csr.edges()
    }

    fn degree(&self, idx: usize) -> usize {
        self.csr.degree(idx)
    }

    fn get_edges(&self, idx: usize) -> &[NodeID] {
        self.csr.get_edges(idx)
    }
}

#[cfg(test)]
mod partitioned_tests {
    use super::*;
    use crate::partition::Partitioner;

    fn build(edges: Vec<(usize, usize)>, n: usize, directed: bool, partitions: usize, balance: Balance)
        -> (EdgeList, Vec<PartitionGraph>)
    {
        let info = GraphInfo::new(n, edges.len(), directed);
        let el = EdgeList::from_parts(info, edges);
        let degrees = Degrees::from_edges(&el);
        let pa = Partitioner::new(partitions, 1, balance).unwrap().partition(&degrees);
        let graphs = (0..partitions)
            .map(|p| PartitionGraph::build(&ClusterInfo::new(p, partitions, 1), &el, &degrees, &pa))
            .collect();
        (el, graphs)
    }

    /// Maps every local entry back to a global (src, dst) arc.
    fn global_arcs(g: &PartitionGraph) -> Vec<(NodeID, NodeID)> {
        let global_of_slot = |slot: usize| -> NodeID {
            if slot < g.num_owned() {
                g.global_id(slot)
            } else {
                let peer = g.peers().iter().find(|p| p.range().contains(&slot)).unwrap();
                peer.vertices[slot - peer.start]
            }
        };
        let mut arcs = Vec::new();
        for row in 0..g.len() {
            for col in g.get_edges(row) {
                arcs.push(match g.balance() {
                    Balance::In => (global_of_slot(*col), g.global_id(row)),
                    Balance::Out => (g.global_id(*col), global_of_slot(row))
                });
            }
        }
        arcs
    }

    fn sample_edges() -> Vec<(usize, usize)> {
        vec![(0, 1), (1, 2), (2, 0), (2, 3), (3, 3), (4, 1), (4, 1), (5, 0)]
    }

    #[test]
    fn test_union_is_the_edge_set() {
        for balance in [Balance::In, Balance::Out].iter() {
            for directed in [true, false].iter() {
                let (el, graphs) = build(sample_edges(), 7, *directed, 3, *balance);
                let mut expected: Vec<_> = el.arcs().collect();
                let mut found: Vec<_> = graphs.iter().flat_map(|g| global_arcs(g)).collect();
                expected.sort();
                found.sort();
                assert_eq!(found, expected);
            }
        }
    }

    #[test]
    fn test_pull_layout() {
        let (_el, graphs) = build(sample_edges(), 7, true, 2, Balance::In);
        for g in graphs.iter() {
            assert_eq!(g.len(), g.num_owned());
            // In-edges of owned vertices only
            for row in g.active_rows() {
                assert!(g.degree(row) > 0);
            }
            for peer in g.peers() {
                assert!(peer.vertices.windows(2).all(|w| w[0] < w[1]));
                assert_ne!(peer.partition, g.cluster().partition_id);
            }
        }
        let total: usize = graphs.iter().map(|g| g.edges()).sum();
        assert_eq!(total, 8);
    }

    #[test]
    fn test_push_layout_rows_cover_slots() {
        let (_el, graphs) = build(sample_edges(), 7, true, 3, Balance::Out);
        for g in graphs.iter() {
            assert_eq!(g.len(), g.num_slots());
            assert_eq!(g.peers().len(), 2);
            for v in g.owned() {
                let local = g.local_id(*v).unwrap();
                assert_eq!(g.global_id(local), *v);
            }
        }
    }

    #[test]
    fn test_out_degree_is_global() {
        let (_el, graphs) = build(sample_edges(), 7, true, 3, Balance::In);
        for g in graphs.iter() {
            for (local, v) in g.owned().iter().enumerate() {
                let expected = sample_edges().iter().filter(|(s, _)| s == v).count();
                assert_eq!(g.out_degree(local), expected);
            }
        }
    }

    #[test]
    fn test_duplicates_and_self_loops_preserved() {
        let (_el, graphs) = build(sample_edges(), 7, true, 1, Balance::In);
        let g = &graphs[0];
        assert_eq!(g.get_edges(1), &[0, 4, 4]);
        assert_eq!(g.get_edges(3), &[2, 3]);
        assert_eq!(g.get_edges(6), &[] as &[NodeID]);
        assert!(g.peers().is_empty());
    }

    #[test]
    fn test_resolve_routes() {
        let (_el, graphs) = build(sample_edges(), 7, true, 2, Balance::In);
        let g = &graphs[0];
        let routes = g.resolve_routes(1, g.owned()).unwrap();
        assert_eq!(routes, (0..g.num_owned()).collect::<Vec<_>>());

        let foreign = graphs[1].owned()[0];
        assert!(matches!(g.resolve_routes(1, &[foreign]), Err(RankError::Coordination { .. })));
    }
}
