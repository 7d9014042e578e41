//! Stateright model of GUID block leasing
//!
//! Exhaustively explores interleavings of clients leasing blocks from
//! rank-partitioned daemons and issuing ids from them:
//! - IDS_NEVER_REISSUED: no id is handed out twice across all clients
//! - BLOCKS_DISJOINT: no two leased blocks overlap
//! - BLOCKS_WITHIN_RANK: a daemon only leases from its own slice
//!
//! Each step runs the real [`GuidAllocator`] carving logic on a copy of the
//! daemon's `(next, last)` pair.
//!
//! ```bash
//! cargo test stateright_guid -- --ignored --nocapture
//! ```

use crate::guid::{GuidAllocator, GuidBlock};
use stateright::{Model, Property};
use std::collections::BTreeSet;

#[derive(Clone, Debug)]
pub struct LeaseConfig {
    pub uid_max: u64,
    pub comm_size: u32,
    pub block_size: u64,
    /// Daemon rank each client registers with
    pub client_daemons: Vec<usize>,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        LeaseConfig {
            uid_max: 12,
            comm_size: 2,
            block_size: 1,
            client_daemons: vec![0, 0, 1],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientPool {
    pub daemon: usize,
    pub next: u64,
    pub last: u64,
}

impl ClientPool {
    fn is_dry(&self) -> bool {
        self.next > self.last
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LeaseState {
    /// `(next, last)` per daemon rank
    pub daemons: Vec<(u64, u64)>,
    pub clients: Vec<ClientPool>,
    /// Every block granted, with the daemon that granted it
    pub leased: Vec<(usize, GuidBlock)>,
    pub issued: BTreeSet<u64>,
    pub reissued: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LeaseAction {
    Lease { client: usize },
    Issue { client: usize },
}

pub struct GuidLeaseModel {
    pub config: LeaseConfig,
}

impl GuidLeaseModel {
    pub fn new() -> Self {
        Self::with_config(LeaseConfig::default())
    }

    pub fn with_config(config: LeaseConfig) -> Self {
        GuidLeaseModel { config }
    }

    fn rank_range(&self, rank: usize) -> (u64, u64) {
        GuidAllocator::for_rank(self.config.uid_max, rank as u32, self.config.comm_size).bounds()
    }
}

impl Default for GuidLeaseModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for GuidLeaseModel {
    type State = LeaseState;
    type Action = LeaseAction;

    fn init_states(&self) -> Vec<Self::State> {
        let daemons = (0..self.config.comm_size as usize)
            .map(|rank| self.rank_range(rank))
            .collect();
        let clients = self
            .config
            .client_daemons
            .iter()
            .map(|&daemon| ClientPool {
                daemon,
                next: 1,
                last: 0,
            })
            .collect();
        vec![LeaseState {
            daemons,
            clients,
            leased: Vec::new(),
            issued: BTreeSet::new(),
            reissued: false,
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for (client, pool) in state.clients.iter().enumerate() {
            if pool.is_dry() {
                let (next, last) = state.daemons[pool.daemon];
                if next <= last {
                    actions.push(LeaseAction::Lease { client });
                }
            } else {
                actions.push(LeaseAction::Issue { client });
            }
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();
        match action {
            LeaseAction::Lease { client } => {
                let rank = next.clients[client].daemon;
                let (from, last) = next.daemons[rank];
                let daemon = GuidAllocator::new(from, last);
                let block = daemon.claim_block(self.config.block_size).ok()?;
                next.daemons[rank] = daemon.bounds();

                let pool = &mut next.clients[client];
                pool.next = block.from;
                pool.last = block.to;
                next.leased.push((rank, block));
            }
            LeaseAction::Issue { client } => {
                let pool = &mut next.clients[client];
                let ids = GuidAllocator::new(pool.next, pool.last);
                let id = ids.next_id().ok()?;
                (pool.next, pool.last) = ids.bounds();
                if !next.issued.insert(id) {
                    next.reissued = true;
                }
            }
        }
        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("ids_never_reissued", |_: &GuidLeaseModel, state: &LeaseState| {
                !state.reissued
            }),
            Property::always("blocks_disjoint", |_: &GuidLeaseModel, state: &LeaseState| {
                state.leased.iter().enumerate().all(|(i, (_, a))| {
                    state.leased[i + 1..].iter().all(|(_, b)| !a.overlaps(b))
                })
            }),
            Property::always(
                "blocks_within_rank",
                |model: &GuidLeaseModel, state: &LeaseState| {
                    state.leased.iter().all(|(rank, block)| {
                        let (first, last) = model.rank_range(*rank);
                        block.from >= first && block.to <= last
                    })
                },
            ),
            Property::sometimes("every_daemon_exhausted", |_: &GuidLeaseModel, state: &LeaseState| {
                state.daemons.iter().all(|(next, last)| next > last)
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    #[test]
    fn test_initial_ranges_partitioned() {
        let model = GuidLeaseModel::new();
        let state = &model.init_states()[0];
        assert_eq!(state.daemons, vec![(1, 6), (7, 12)]);
    }

    #[test]
    fn test_lease_then_issue() {
        let model = GuidLeaseModel::new();
        let state = model.init_states().remove(0);
        let state = model
            .next_state(&state, LeaseAction::Lease { client: 2 })
            .unwrap();
        assert_eq!(state.leased, vec![(1, GuidBlock::new(7, 8))]);
        assert_eq!(state.daemons[1], (9, 12));
        let state = model
            .next_state(&state, LeaseAction::Issue { client: 2 })
            .unwrap();
        assert!(state.issued.contains(&7));
    }

    #[test]
    #[ignore] // Run with: cargo test stateright_guid -- --ignored --nocapture
    fn stateright_guid_leasing_exhaustive() {
        let model = GuidLeaseModel::new();
        let checker = model.checker().spawn_bfs().join();
        println!("States explored: {}", checker.unique_state_count());
        checker.assert_properties();
    }

    #[test]
    #[ignore]
    fn stateright_guid_leasing_uneven_split() {
        let model = GuidLeaseModel::with_config(LeaseConfig {
            uid_max: 11,
            comm_size: 3,
            block_size: 0,
            client_daemons: vec![0, 1, 1, 2],
        });
        let checker = model.checker().spawn_bfs().join();
        checker.assert_properties();
    }
}
