//! Shared helpers for the in-crate test modules.

use crate::runtime::RandomSource;
use crate::upstream::host::{Host, HostRef, HostSetSnapshot, PrioritySet};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Deterministic [`RandomSource`] fed with an explicit draw sequence.
///
/// Panics when a selection consumes more draws than were fed — the zone
/// sampling paths consume one or two draws depending on the branch, and
/// tests are expected to feed exactly the right number.
#[derive(Default)]
pub(crate) struct SequenceRandom {
    values: Mutex<VecDeque<u64>>,
}

impl SequenceRandom {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn feed(&self, values: &[u64]) {
        self.values.lock().unwrap().extend(values.iter().copied());
    }

    pub(crate) fn remaining(&self) -> usize {
        self.values.lock().unwrap().len()
    }
}

impl RandomSource for SequenceRandom {
    fn next(&self) -> u64 {
        self.values
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected random draw")
    }
}

pub(crate) fn host(address: &str) -> HostRef {
    Host::new(address, 1)
}

pub(crate) fn host_w(address: &str, weight: u32) -> HostRef {
    Host::new(address, weight)
}

pub(crate) fn hosts(addresses: &[&str]) -> Vec<HostRef> {
    addresses.iter().map(|a| host(a)).collect()
}

/// Publish a membership view on one tier. The added/removed lists are not
/// relevant for the engine callbacks, which recompute from snapshots.
pub(crate) fn publish(priority_set: &PrioritySet, priority: u32, snapshot: HostSetSnapshot) {
    priority_set.host_set(priority).update_hosts(snapshot, &[], &[]);
}

/// Snapshot with identical full and healthy lists and no localities.
pub(crate) fn all_healthy(hosts: &[HostRef]) -> HostSetSnapshot {
    HostSetSnapshot {
        hosts: hosts.to_vec(),
        healthy_hosts: hosts.to_vec(),
        ..Default::default()
    }
}

/// Snapshot with identical full and healthy views, localities included.
pub(crate) fn all_healthy_zoned(hosts: &[HostRef], per_locality: &[Vec<HostRef>]) -> HostSetSnapshot {
    HostSetSnapshot {
        hosts: hosts.to_vec(),
        healthy_hosts: hosts.to_vec(),
        hosts_per_locality: per_locality.to_vec(),
        healthy_hosts_per_locality: per_locality.to_vec(),
    }
}
