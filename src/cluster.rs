//! Cluster membership and message passing between partitions.
//!
//! Every partition runs on its own thread and owns its data exclusively.  The
//! only way to see another partition's values is to receive them through the
//! [`Communicator`], which delivers messages in rounds: a round completes once
//! one message from every peer has arrived.  Messages that belong to a later
//! round are held back until that round is requested.
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error};

use crate::error::{RankError, Result};
use crate::graph::NodeID;

pub type PartitionId = usize;

/// Identity of one cluster member.  Created once at launch and passed to every
/// component that needs to know who it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterInfo {
    pub partition_id: PartitionId,
    pub partitions: usize,
    pub threads: usize
}

impl ClusterInfo {
    pub fn new(partition_id: PartitionId, partitions: usize, threads: usize) -> Self {
        debug_assert!(partition_id < partitions);
        ClusterInfo { partition_id, partitions, threads }
    }

    /// Partition 0 reports progress and summaries for the whole cluster.
    pub fn is_leader(&self) -> bool {
        self.partition_id == 0
    }

    pub fn peers(&self) -> impl Iterator<Item=PartitionId> {
        let me = self.partition_id;
        (0..self.partitions).filter(move |p| *p != me)
    }

    /// Builds the worker pool local to this partition.
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        let partition = self.partition_id;
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(move |i| format!("p{:04}-w{:04}", partition, i))
            .build()
            .map_err(|e| RankError::coordination(partition, format!("Failed to create thread pool: {}", e)))
    }
}

/// Per-epoch payload: the sender's share of the global reductions plus the
/// values addressed to the receiving peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub residual: f64,
    pub dangling: f64,
    pub values: Vec<f64>
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Ordered list of the receiver's vertices the sender exchanges values for.
    Routes(Vec<NodeID>),
    Exchange(Exchange),
    Abort
}

#[derive(Debug)]
struct Envelope {
    from: PartitionId,
    round: u64,
    body: Body
}

pub struct Communicator {
    info: ClusterInfo,
    inbox: Receiver<Envelope>,
    outboxes: Vec<Option<Sender<Envelope>>>,
    pending: Vec<Envelope>,
    round: u64
}

impl Communicator {

    /// Creates one connected communicator per partition.
    pub fn connect(partitions: usize, threads: usize) -> Vec<Communicator> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..partitions)
            .map(|_| unbounded::<Envelope>())
            .unzip();

        receivers.into_iter().enumerate().map(|(p, inbox)| {
            // No sender to ourselves: once every peer is gone the inbox disconnects
            let outboxes = senders.iter().enumerate()
                .map(|(q, s)| if q == p { None } else { Some(s.clone()) })
                .collect();

            Communicator {
                info: ClusterInfo::new(p, partitions, threads),
                inbox,
                outboxes,
                pending: Vec::new(),
                round: 0
            }
        }).collect()
    }

    pub fn info(&self) -> &ClusterInfo {
        &self.info
    }

    /// Number of completed rounds.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Sends `make(peer)` to every peer, then blocks until every peer's message
    /// for the same round arrived.  Returns the bodies indexed by partition id;
    /// the slot of this partition is `None`.
    pub fn all_to_all<F>(&mut self, mut make: F) -> Result<Vec<Option<Body>>>
    where
        F: FnMut(PartitionId) -> Body
    {
        let me = self.info.partition_id;
        let round = self.round;
        for peer in self.info.peers() {
            let body = make(peer);
            let sender = self.outboxes[peer].as_ref()
                .ok_or_else(|| RankError::coordination(me, format!("No route to partition {}", peer)))?;

            // A peer that went away has failed; it reports the cause itself
            sender.send(Envelope { from: me, round, body })
                .map_err(|_| RankError::Aborted { partition: peer })?;
        }

        let mut received: Vec<Option<Body>> = (0..self.info.partitions).map(|_| None).collect();
        let mut missing = self.info.partitions - 1;

        // Messages for this round that arrived early
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].round == round {
                let env = self.pending.swap_remove(i);
                self.accept(&mut received, env)?;
                missing -= 1;
            } else {
                i += 1;
            }
        }

        while missing > 0 {
            let env = self.inbox.recv()
                .map_err(|_| RankError::coordination(me, "All peers disconnected mid-round"))?;

            if let Body::Abort = env.body {
                return Err(RankError::Aborted { partition: env.from })
            }

            if env.round == round {
                self.accept(&mut received, env)?;
                missing -= 1;
            } else if env.round > round {
                self.pending.push(env);
            } else {
                return Err(RankError::coordination(me,
                    format!("Stale message from partition {} for round {}", env.from, env.round)))
            }
        }

        self.round += 1;
        Ok(received)
    }

    fn accept(&self, received: &mut [Option<Body>], env: Envelope) -> Result<()> {
        let slot = &mut received[env.from];
        if slot.is_some() {
            return Err(RankError::coordination(self.info.partition_id,
                format!("Duplicate message from partition {} in round {}", env.from, env.round)))
        }
        *slot = Some(env.body);
        Ok(())
    }

    /// Tells every peer this partition is giving up.  Delivery is best effort:
    /// peers that already left are skipped.
    pub fn abort(&self) {
        let me = self.info.partition_id;
        for sender in self.outboxes.iter().flatten() {
            let _ = sender.send(Envelope { from: me, round: u64::MAX, body: Body::Abort });
        }
    }
}

/// Runs `work` once per partition, each on its own thread, and collects the
/// results in partition order.  The run is all or nothing: the first failure
/// makes every other partition fail at its next round.
pub fn launch<T, F>(partitions: usize, threads: usize, work: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&mut Communicator) -> Result<T> + Sync
{
    if partitions == 0 {
        return Err(RankError::config("At least one partition is required"))
    }
    if threads == 0 {
        return Err(RankError::config("At least one thread per partition is required"))
    }

    let comms = Communicator::connect(partitions, threads);
    let work = &work;

    let outcomes: Vec<Result<T>> = thread::scope(|s| {
        let handles: Vec<_> = comms.into_iter().map(|mut comm| {
            let p = comm.info.partition_id;
            let spawned = thread::Builder::new()
                .name(format!("partition-{:04}", p))
                .spawn_scoped(s, move || {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| work(&mut comm)));
                    let out = result.unwrap_or_else(|_| Err(RankError::coordination(p, "Partition panicked")));
                    if out.is_err() {
                        debug!("Partition {} aborting", p);
                        comm.abort();
                    }
                    out
                });
            (p, spawned)
        }).collect();

        handles.into_iter().map(|(p, spawned)| {
            match spawned {
                Ok(handle) => handle.join()
                    .unwrap_or_else(|_| Err(RankError::coordination(p, "Partition panicked"))),
                Err(e) => Err(RankError::coordination(p, format!("Failed to spawn: {}", e)))
            }
        }).collect()
    });

    // Report the root cause rather than the aborts it triggered
    let mut results = Vec::with_capacity(partitions);
    let mut first_abort = None;
    let mut root_cause = None;
    for outcome in outcomes {
        match outcome {
            Ok(v) => results.push(v),
            Err(e @ RankError::Aborted { .. }) => { first_abort.get_or_insert(e); },
            Err(e) => {
                error!("{}", e);
                root_cause.get_or_insert(e);
            }
        }
    }

    match root_cause.or(first_abort) {
        Some(e) => Err(e),
        None => Ok(results)
    }
}

#[cfg(test)]
mod cluster_tests {
    use super::*;

    #[test]
    fn test_cluster_info() {
        let info = ClusterInfo::new(1, 4, 2);
        assert!(!info.is_leader());
        assert_eq!(info.peers().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert!(ClusterInfo::new(0, 1, 1).is_leader());
        assert_eq!(ClusterInfo::new(0, 1, 1).peers().count(), 0);
    }

    #[test]
    fn test_all_to_all_sums() {
        let sums = launch(4, 1, |comm| {
            let me = comm.info().partition_id;
            let mut totals = Vec::new();
            for round in 0..3 {
                let received = comm.all_to_all(|peer| Body::Exchange(Exchange {
                    residual: (me * 10 + round) as f64,
                    dangling: 0.,
                    values: vec![peer as f64]
                }))?;
                let mut total = (me * 10 + round) as f64;
                for (q, body) in received.into_iter().enumerate() {
                    match body {
                        Some(Body::Exchange(ex)) => {
                            assert_eq!(ex.values, vec![me as f64]);
                            total += ex.residual;
                        },
                        None => assert_eq!(q, me),
                        other => panic!("unexpected {:?}", other)
                    }
                }
                totals.push(total);
            }
            assert_eq!(comm.round(), 3);
            Ok(totals)
        }).unwrap();

        // Every partition agrees on every round
        for totals in sums.iter() {
            assert_eq!(totals, &vec![60., 64., 68.]);
        }
    }

    #[test]
    fn test_single_partition_has_no_peers() {
        let out = launch(1, 2, |comm| {
            let received = comm.all_to_all(|_| unreachable!())?;
            assert_eq!(received.len(), 1);
            Ok(comm.info().threads)
        }).unwrap();
        assert_eq!(out, vec![2]);
    }

    #[test]
    fn test_failure_aborts_everyone() {
        let result: Result<Vec<()>> = launch(3, 1, |comm| {
            if comm.info().partition_id == 2 {
                return Err(RankError::config("boom"))
            }
            loop {
                comm.all_to_all(|_| Body::Routes(Vec::new()))?;
            }
        });
        match result {
            Err(RankError::Config(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {:?}", other)
        }
    }

    #[test]
    fn test_panic_aborts_everyone() {
        let result: Result<Vec<()>> = launch(2, 1, |comm| {
            if comm.info().partition_id == 0 {
                panic!("worker died");
            }
            loop {
                comm.all_to_all(|_| Body::Routes(Vec::new()))?;
            }
        });
        match result {
            Err(RankError::Coordination { partition, .. }) => assert_eq!(partition, 0),
            other => panic!("unexpected {:?}", other)
        }
    }

    fn inject(comms: &[Communicator], from: PartitionId, to: PartitionId, round: u64) {
        let sender = comms[from].outboxes[to].as_ref().unwrap();
        sender.send(Envelope { from, round, body: Body::Routes(Vec::new()) }).unwrap();
    }

    #[test]
    fn test_duplicate_message_is_rejected() {
        let mut comms = Communicator::connect(3, 1);
        inject(&comms, 1, 0, 0);
        inject(&comms, 1, 0, 0);
        match comms[0].all_to_all(|_| Body::Routes(Vec::new())) {
            Err(RankError::Coordination { partition, reason }) => {
                assert_eq!(partition, 0);
                assert!(reason.contains("Duplicate message from partition 1"), "{}", reason);
            },
            other => panic!("unexpected {:?}", other)
        }
    }

    #[test]
    fn test_stale_message_is_rejected() {
        let mut comms = Communicator::connect(2, 1);
        inject(&comms, 1, 0, 0);
        inject(&comms, 1, 0, 0);
        assert!(comms[0].all_to_all(|_| Body::Routes(Vec::new())).is_ok());
        assert_eq!(comms[0].round(), 1);
        match comms[0].all_to_all(|_| Body::Routes(Vec::new())) {
            Err(RankError::Coordination { reason, .. }) => assert!(reason.contains("Stale message"), "{}", reason),
            other => panic!("unexpected {:?}", other)
        }
    }

    #[test]
    fn test_early_message_is_held_back() {
        let mut comms = Communicator::connect(2, 1);
        inject(&comms, 1, 0, 1);
        inject(&comms, 1, 0, 0);
        assert!(comms[0].all_to_all(|_| Body::Routes(Vec::new())).is_ok());
        assert_eq!(comms[0].pending.len(), 1);
        assert!(comms[0].all_to_all(|_| Body::Routes(Vec::new())).is_ok());
        assert!(comms[0].pending.is_empty());
    }

    #[test]
    fn test_zero_partitions_is_config_error() {
        let result = launch(0, 1, |_| Ok(()));
        assert!(matches!(result, Err(RankError::Config(_))));
    }
}
