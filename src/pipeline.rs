//! Runs PageRank over a loaded edge list on a simulated cluster.
use log::{debug, info};

use crate::algos::pagerank::{IterationState, PageRank, PageRankOpts};
use crate::cluster::launch;
use crate::error::{RankError, Result};
use crate::graph::{Degrees, EdgeList};
use crate::partition::{Balance, Partitioner};
use crate::partitioned::PartitionGraph;
use crate::ranks::PartitionedRanks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterOpts {
    /// Number of simulated cluster members
    pub partitions: usize,

    /// Workers per partition
    pub threads: usize,

    /// Sequence balance weight; negative hashes vertices instead
    pub alpha: i32,

    /// Balance in-degrees and pull values, instead of balancing out-degrees
    /// and pushing partial sums
    pub part_by_in: bool
}

impl Default for ClusterOpts {
    fn default() -> Self {
        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        ClusterOpts { partitions: 1, threads, alpha: -1, part_by_in: false }
    }
}

impl ClusterOpts {
    pub fn validate(&self) -> Result<()> {
        if self.partitions == 0 {
            return Err(RankError::config("partitions must be positive"))
        }
        if self.threads == 0 {
            return Err(RankError::config("threads must be positive"))
        }
        Ok(())
    }

    pub fn balance(&self) -> Balance {
        Balance::from_part_by_in(self.part_by_in)
    }
}

/// Partitions the graph, then runs one cooperating PageRank per partition.
/// Either every partition succeeds or the root cause of the failure is
/// returned.
pub fn run(
    edges: &EdgeList,
    cluster: &ClusterOpts,
    opts: &PageRankOpts,
    indicator: bool
) -> Result<(PartitionedRanks, IterationState)> {
    cluster.validate()?;
    opts.validate()?;

    let degrees = Degrees::from_edges(edges);
    let assignment = Partitioner::new(cluster.partitions, cluster.alpha, cluster.balance())?
        .partition(&degrees);

    info!("Partitioned {} vertices and {} arcs into {} partitions ({:?} balance), load imbalance {:.3}",
          edges.info().vertex_count, edges.num_arcs(), cluster.partitions,
          assignment.balance(), assignment.imbalance());
    for p in 0..assignment.partitions() {
        debug!("Partition {}: {} vertices, load {}", p, assignment.owned(p).len(), assignment.loads()[p]);
    }

    let pagerank = PageRank::with_opts(*opts).indicator(indicator);
    let outputs = launch(cluster.partitions, cluster.threads, |comm| {
        let graph = PartitionGraph::build(comm.info(), edges, &degrees, &assignment);
        let pool = comm.info().thread_pool()?;
        pagerank.compute(&graph, comm, &pool)
    })?;

    let state = outputs.first()
        .map(|(_, state)| *state)
        .ok_or_else(|| RankError::config("No partition reported a result"))?;

    let ranks = PartitionedRanks::new(outputs.into_iter().map(|(segment, _)| segment).collect());
    Ok((ranks, state))
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    use crate::algos::pagerank::State;
    use crate::io::{open_file_for_reading, write_shards, EdgeReader, LoadOpts, OutputOpts};

    #[test]
    fn test_end_to_end() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("edges.csv");
        fs::write(&input, "# star into 0 plus a cycle\n1,0\n2,0\n3,0\n0,1\n4,5\n5,4\n").unwrap();

        let edges = EdgeReader::load(&LoadOpts::new(&input, true)).unwrap();
        let cluster = ClusterOpts { partitions: 3, threads: 2, alpha: 1, part_by_in: true };
        let opts = PageRankOpts { iterations: 200, damping: 0.85, eps: 1e-10 };
        let (ranks, state) = run(&edges, &cluster, &opts, false).unwrap();

        assert_eq!(state.state, State::Converged);
        assert_eq!(ranks.len(), 6);
        assert!((ranks.sum() - 1.).abs() < 1e-9);
        assert_eq!(ranks.top_k(1)[0].0, 0);

        let out = dir.path().join("ranks");
        let paths = write_shards(&ranks, cluster.threads, &OutputOpts::new(&out, 6)).unwrap();
        assert_eq!(paths.len(), 6);

        let mut read_back = Vec::new();
        for path in paths.iter() {
            let mut s = String::new();
            open_file_for_reading(path).unwrap().read_to_string(&mut s).unwrap();
            for line in s.lines() {
                let (v, r) = line.split_once(',').unwrap();
                read_back.push((v.parse::<usize>().unwrap(), r.parse::<f64>().unwrap()));
            }
        }
        read_back.sort_by_key(|(v, _)| *v);
        assert_eq!(read_back.len(), 6);
        for (v, r) in read_back {
            assert_eq!(ranks.get(v), Some(r));
        }
    }

    #[test]
    fn test_layouts_agree() {
        let mut edges = Vec::new();
        for v in 0..60usize {
            edges.push((v, (v * 7 + 3) % 60));
            if v % 4 != 0 {
                edges.push((v, (v * 13 + 1) % 60));
            }
        }
        let info = crate::graph::GraphInfo::new(60, edges.len(), true);
        let el = EdgeList::from_parts(info, edges);
        let opts = PageRankOpts { iterations: 30, damping: 0.85, eps: 0. };

        let single = ClusterOpts { partitions: 1, threads: 1, alpha: -1, part_by_in: false };
        let (expected, _) = run(&el, &single, &opts, false).unwrap();
        for (alpha, part_by_in) in [(-1, true), (0, false), (5, true)].iter() {
            let cluster = ClusterOpts { partitions: 4, threads: 2, alpha: *alpha, part_by_in: *part_by_in };
            let (ranks, state) = run(&el, &cluster, &opts, false).unwrap();
            assert_eq!(state.epoch, 30);
            for (v, r) in expected.iter() {
                assert!((ranks.get(v).unwrap() - r).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_invalid_cluster() {
        let el = EdgeList::from_parts(crate::graph::GraphInfo::new(2, 1, true), vec![(0, 1)]);
        let opts = PageRankOpts::default();
        for cluster in [
            ClusterOpts { partitions: 0, ..Default::default() },
            ClusterOpts { threads: 0, ..Default::default() }
        ].iter() {
            assert!(matches!(run(&el, cluster, &opts, false), Err(RankError::Config(_))));
        }
    }
}
