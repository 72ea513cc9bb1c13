use std::collections::{BTreeMap, HashMap};

#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::types::{InstanceNum, InstanceState, ReplicaId};

/// Replica identity written once at initialization and verified on every
/// restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardState {
    pub replica: ReplicaId,
    pub nodes: Vec<ReplicaId>,
}

/// Durable persistence for replica state.
///
/// Persist calls are synchronous from the protocol's point of view and must
/// not report partial success: an implementation that cannot complete a
/// write durably must panic, halting the replica.
#[cfg_attr(test, automock)]
pub trait Storage {
    fn hard_state(&self) -> Option<HardState>;

    /// Called at most once per process for the initial write; idempotent
    /// thereafter.
    fn persist_hard_state(&mut self, hs: &HardState);

    /// All persisted per-instance records, across all replicas, in no
    /// particular order.
    fn instances(&self) -> Vec<InstanceState>;

    /// Durable write of one instance's latest state; called on every status
    /// advance. After it returns, a restart reproduces the record via
    /// `instances`.
    fn persist_instance(&mut self, is: &InstanceState);
}

/// In-memory reference implementation of [`Storage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    hard_state: Option<HardState>,
    instances: HashMap<ReplicaId, BTreeMap<InstanceNum, InstanceState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn hard_state(&self) -> Option<HardState> {
        self.hard_state.clone()
    }

    fn persist_hard_state(&mut self, hs: &HardState) {
        self.hard_state = Some(hs.clone());
    }

    fn instances(&self) -> Vec<InstanceState> {
        self.instances
            .values()
            .flat_map(|tree| tree.values().cloned())
            .collect()
    }

    fn persist_instance(&mut self, is: &InstanceState) {
        self.instances
            .entry(is.instance_id.replica)
            .or_default()
            .insert(is.instance_id.num, is.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Command, InstanceData, InstanceId, InstanceStatus};

    #[test]
    fn hard_state_round_trip() {
        let mut storage = MemoryStorage::new();
        assert!(storage.hard_state().is_none());

        let hs = HardState {
            replica: ReplicaId(1),
            nodes: (0..3).map(ReplicaId).collect(),
        };
        storage.persist_hard_state(&hs);
        assert_eq!(storage.hard_state(), Some(hs));
    }

    #[test]
    fn persist_instance_keeps_latest_record() {
        let mut storage = MemoryStorage::new();
        let mut is = InstanceState {
            instance_id: InstanceId::new(0, 1),
            status: InstanceStatus::PreAccepted,
            data: InstanceData {
                command: Some(Command::write(7, "a", "1")),
                seq: 1.into(),
                deps: vec![InstanceId::new(1, 1), InstanceId::new(2, 4)],
            },
        };
        storage.persist_instance(&is);

        is.status = InstanceStatus::Committed;
        storage.persist_instance(&is);

        let reloaded = storage.instances();
        assert_eq!(reloaded, vec![is]);
    }
}
