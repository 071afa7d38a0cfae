//! Partitioned PageRank by power iteration.
//!
//! Every vertex starts at `1 / n`.  Each epoch computes
//!
//! ```text
//! new[v] = (1 - d) / n + d * (sum over u -> v of old[u] / out(u) + D / n)
//! ```
//!
//! where `D` is the rank held by dangling vertices (no out-arcs), which is
//! spread uniformly over the whole graph.  With this convention the ranks
//! always sum to one.
//!
//! Partitions only ever write their own segment of the rank vector.  What they
//! need from peers travels in one exchange round per epoch, which also carries
//! each partition's share of the residual and of the dangling mass; the global
//! values are summed in partition order, so every member reaches the same
//! verdict on the same epoch.  The values shipped in round `N` are computed from
//! the ranks finalized at epoch `N`, and are only consumed by epoch `N + 1`.
use std::fmt::Write;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::bitset::BitSet;
use crate::cluster::{Body, Communicator, Exchange};
use crate::error::{RankError, Result};
use crate::graph::Graph;
use crate::partition::Balance;
use crate::partitioned::PartitionGraph;
use crate::progress::CLProgressBar;
use crate::ranks::RankSegment;

/// Reductions are summed per chunk of this size, then chunk by chunk, so the
/// result does not depend on the number of workers.
const REDUCE_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRankOpts {
    /// Maximum number of epochs
    pub iterations: usize,

    /// Weight of the propagated mass against the uniform restart
    pub damping: f64,

    /// Stop once the global L1 residual falls below this; 0 runs every epoch
    pub eps: f64
}

impl Default for PageRankOpts {
    fn default() -> Self {
        PageRankOpts { iterations: 100, damping: 0.85, eps: 0.001 }
    }
}

impl PageRankOpts {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(RankError::config("iterations must be positive"))
        }
        if !self.damping.is_finite() || !(0.0..=1.0).contains(&self.damping) {
            return Err(RankError::config(format!("damping must be in [0, 1], got {}", self.damping)))
        }
        if !self.eps.is_finite() || self.eps < 0. {
            return Err(RankError::config(format!("eps must be a non-negative number, got {}", self.eps)))
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initializing,
    Running,
    Converged,
    ExhaustedBudget
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Converged | State::ExhaustedBudget)
    }
}

/// Global progress of the iteration; identical on every partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationState {
    pub epoch: usize,
    pub residual: f64,
    pub state: State
}

impl IterationState {
    fn new() -> Self {
        IterationState { epoch: 0, residual: f64::INFINITY, state: State::Initializing }
    }

    fn advance(&mut self, residual: f64, opts: &PageRankOpts) {
        self.residual = residual;
        self.state = if opts.eps > 0. && residual < opts.eps {
            State::Converged
        } else if self.epoch >= opts.iterations {
            State::ExhaustedBudget
        } else {
            State::Running
        };
    }
}

pub struct PageRank {
    opts: PageRankOpts,
    indicator: bool
}

impl PageRank {

    pub fn new(iterations: usize, damping: f64, eps: f64) -> Self {
        PageRank::with_opts(PageRankOpts { iterations, damping, eps })
    }

    pub fn with_opts(opts: PageRankOpts) -> Self {
        PageRank { opts, indicator: false }
    }

    /// Shows a progress bar on the leader partition.
    pub fn indicator(mut self, enabled: bool) -> Self {
        self.indicator = enabled;
        self
    }

    pub fn opts(&self) -> &PageRankOpts {
        &self.opts
    }

    /// Runs the iteration for the partition owning `graph`.  Every partition of
    /// the cluster must call this with the same options, as the epochs are
    /// synchronized through `comm`.
    pub fn compute(
        &self,
        graph: &PartitionGraph,
        comm: &mut Communicator,
        pool: &rayon::ThreadPool
    ) -> Result<(RankSegment, IterationState)> {
        self.opts.validate()?;
        pool.install(|| self.run(graph, comm))
    }

    fn run(&self, graph: &PartitionGraph, comm: &mut Communicator) -> Result<(RankSegment, IterationState)> {
        let cluster = *graph.cluster();
        let n = graph.info().vertex_count;
        let mut state = IterationState::new();

        if n == 0 {
            if cluster.is_leader() {
                warn!("Graph has no vertices, nothing to rank");
            }
            state.state = State::Converged;
            state.residual = 0.;
            return Ok((RankSegment::new(cluster.partition_id, Vec::new(), Vec::new()), state))
        }
        if self.opts.damping == 1. && cluster.is_leader() {
            warn!("damping is 1: ranks are not guaranteed to converge");
        }

        let mut sweep = Sweep::handshake(graph, self.opts.damping, comm)?;

        let mut rank = vec![1. / n as f64; graph.num_owned()];
        let mut next = vec![0f64; graph.num_owned()];

        let outgoing = sweep.prepare(&rank);
        let (_, mut dangling) = sweep.exchange(comm, 0., sweep.dangling_mass(&rank), outgoing)?;
        state.state = State::Running;

        let pb = CLProgressBar::new(self.opts.iterations as u64, self.indicator && cluster.is_leader());
        while !state.state.is_terminal() {
            state.epoch += 1;
            sweep.update(&mut next, dangling);
            let residual = l1_distance(&next, &rank);
            std::mem::swap(&mut rank, &mut next);

            // Values for the next epoch travel with this epoch's reduction
            let outgoing = sweep.prepare(&rank);
            let (residual, total_dangling) = sweep.exchange(comm, residual, sweep.dangling_mass(&rank), outgoing)?;
            dangling = total_dangling;
            state.advance(residual, &self.opts);

            if cluster.is_leader() {
                debug!("Epoch {}: residual {:e}, dangling mass {:e}", state.epoch, residual, dangling);
            }
            pb.update_message(|msg| {
                msg.clear();
                write!(msg, "Residual: {:.5}", residual).expect("Should never fail!");
            });
            pb.inc(1);
        }
        pb.finish();

        if cluster.is_leader() {
            info!("PageRank {:?} after {} epochs, residual {:e}", state.state, state.epoch, state.residual);
        }

        let segment = RankSegment::new(cluster.partition_id, graph.owned().to_vec(), rank);
        Ok((segment, state))
    }

}

/// Per-partition buffers for one run.  `incoming[v]` holds the sum of
/// `old[u] / out(u)` over the in-neighbours `u` of owned vertex `v`, complete
/// once the exchange of the previous epoch was ingested.
struct Sweep<'a> {
    graph: &'a PartitionGraph,
    damping: f64,
    n: f64,
    inv_out: Vec<f64>,
    dangling: BitSet,

    /// Per peer (indexed by partition id), the local ids exchanged with it
    routes: Vec<Vec<usize>>,

    /// Owned contributions or partial sums, one per slot
    slot_values: Vec<f64>,

    /// Owned contributions, push layout only
    contrib: Vec<f64>,

    incoming: Vec<f64>
}

impl <'a> Sweep<'a> {

    /// Agrees with every peer on the order of the values exchanged each epoch.
    fn handshake(graph: &'a PartitionGraph, damping: f64, comm: &mut Communicator) -> Result<Self> {
        let owned = graph.num_owned();
        let me = graph.cluster().partition_id;

        let mut dangling = BitSet::new(owned);
        let inv_out = (0..owned).map(|i| {
            let deg = graph.out_degree(i);
            if deg == 0 {
                dangling.set_bit(i);
                0.
            } else {
                1. / deg as f64
            }
        }).collect();

        let received = comm.all_to_all(|peer| {
            let vertices = graph.peer(peer).map(|p| p.vertices.clone()).unwrap_or_default();
            Body::Routes(vertices)
        })?;

        let mut routes = vec![Vec::new(); graph.cluster().partitions];
        for (q, body) in received.into_iter().enumerate() {
            match body {
                None => {},
                Some(Body::Routes(vertices)) => routes[q] = graph.resolve_routes(q, &vertices)?,
                Some(other) => return Err(RankError::coordination(me, format!("Expected routes from partition {}, got {:?}", q, other)))
            }
        }

        let contrib = match graph.balance() {
            Balance::In => Vec::new(),
            Balance::Out => vec![0.; owned]
        };

        debug!("Partition {}: {} dangling vertices out of {}", me, dangling.count(), owned);

        Ok(Sweep {
            graph,
            damping,
            n: graph.info().vertex_count as f64,
            inv_out,
            dangling,
            routes,
            slot_values: vec![0.; graph.num_slots()],
            contrib,
            incoming: vec![0.; owned]
        })
    }

    /// Computes what every peer needs from the ranks just finalized, returned
    /// per partition id.
    fn prepare(&mut self, rank: &[f64]) -> Vec<Vec<f64>> {
        let graph = self.graph;
        let owned = graph.num_owned();
        let inv_out = &self.inv_out;
        let mut outgoing = vec![Vec::new(); graph.cluster().partitions];

        match graph.balance() {
            Balance::In => {
                self.slot_values[..owned].par_iter_mut()
                    .zip(rank.par_iter().zip(inv_out.par_iter()))
                    .for_each(|(c, (r, inv))| *c = r * inv);

                for (q, route) in self.routes.iter().enumerate() {
                    outgoing[q] = route.iter().map(|i| self.slot_values[*i]).collect();
                }
            },
            Balance::Out => {
                self.contrib.par_iter_mut()
                    .zip(rank.par_iter().zip(inv_out.par_iter()))
                    .for_each(|(c, (r, inv))| *c = r * inv);

                sparse_sums(graph, &self.contrib, &mut self.slot_values);
                self.incoming.copy_from_slice(&self.slot_values[..owned]);
                for peer in graph.peers() {
                    outgoing[peer.partition] = self.slot_values[peer.range()].to_vec();
                }
            }
        }
        outgoing
    }

    /// Folds the values received from peers, in ascending partition order.
    fn ingest(&mut self, inbound: Vec<(usize, Vec<f64>)>) -> Result<()> {
        let graph = self.graph;
        let me = graph.cluster().partition_id;
        let mismatch = |q: usize, got: usize, expected: usize| RankError::coordination(me,
            format!("Partition {} sent {} values, expected {}", q, got, expected));

        match graph.balance() {
            Balance::In => {
                for (q, values) in inbound {
                    let range = graph.peer(q).map(|p| p.range()).unwrap_or(0..0);
                    if values.len() != range.len() {
                        return Err(mismatch(q, values.len(), range.len()))
                    }
                    self.slot_values[range].copy_from_slice(&values);
                }
                sparse_sums(graph, &self.slot_values, &mut self.incoming);
            },
            Balance::Out => {
                for (q, values) in inbound {
                    let route = &self.routes[q];
                    if values.len() != route.len() {
                        return Err(mismatch(q, values.len(), route.len()))
                    }
                    for (i, v) in route.iter().zip(values.iter()) {
                        self.incoming[*i] += v;
                    }
                }
            }
        }
        Ok(())
    }

    /// The epoch barrier: ships `outgoing`, ingests what peers sent and returns
    /// the global residual and dangling mass.
    fn exchange(
        &mut self,
        comm: &mut Communicator,
        residual: f64,
        dangling: f64,
        mut outgoing: Vec<Vec<f64>>
    ) -> Result<(f64, f64)> {
        let me = self.graph.cluster().partition_id;
        let received = comm.all_to_all(|peer| Body::Exchange(Exchange {
            residual,
            dangling,
            values: std::mem::take(&mut outgoing[peer])
        }))?;

        let mut residuals = vec![0f64; received.len()];
        let mut danglings = vec![0f64; received.len()];
        residuals[me] = residual;
        danglings[me] = dangling;

        let mut inbound = Vec::with_capacity(received.len());
        for (q, body) in received.into_iter().enumerate() {
            match body {
                None => {},
                Some(Body::Exchange(ex)) => {
                    residuals[q] = ex.residual;
                    danglings[q] = ex.dangling;
                    inbound.push((q, ex.values));
                },
                Some(other) => return Err(RankError::coordination(me, format!("Expected an exchange from partition {}, got {:?}", q, other)))
            }
        }
        self.ingest(inbound)?;

        Ok((residuals.iter().sum(), danglings.iter().sum()))
    }

    fn dangling_mass(&self, rank: &[f64]) -> f64 {
        self.dangling.iter().map(|i| rank[i]).sum()
    }

    fn update(&self, next: &mut [f64], dangling: f64) {
        let d = self.damping;
        let restart = (1. - d) / self.n;
        let spread = dangling / self.n;
        next.par_iter_mut()
            .zip(self.incoming.par_iter())
            .for_each(|(nv, inc)| *nv = restart + d * (inc + spread));
    }
}

/// `out[row] = sum of values[col]` over the columns of each row.
fn sparse_sums(graph: &PartitionGraph, values: &[f64], out: &mut [f64]) {
    out.par_iter_mut().enumerate().for_each(|(row, o)| {
        *o = graph.get_edges(row).iter().map(|col| values[*col]).sum();
    });
}

fn l1_distance(a: &[f64], b: &[f64]) -> f64 {
    a.par_chunks(REDUCE_CHUNK)
        .zip(b.par_chunks(REDUCE_CHUNK))
        .map(|(ca, cb)| ca.iter().zip(cb.iter()).map(|(x, y)| (x - y).abs()).sum::<f64>())
        .collect::<Vec<_>>()
        .into_iter()
        .sum()
}
