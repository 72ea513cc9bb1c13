use std::collections::{BTreeMap, HashMap};

use super::{
    cmd::Command,
    id::{InstanceId, InstanceNum, ReplicaId, SeqNum},
    instance::Instance,
};

/// Per-replica ordered store of instances, indexed by instance number.
///
/// Locally-owned instance numbers are allocated densely as `max + 1`; slots
/// owned by other replicas may stay sparse until a message references them.
#[derive(Debug)]
pub(crate) struct InstanceSpace {
    commands: HashMap<ReplicaId, BTreeMap<InstanceNum, Instance>>,
}

impl InstanceSpace {
    pub(crate) fn new(nodes: &[ReplicaId]) -> Self {
        Self {
            commands: nodes.iter().map(|r| (*r, BTreeMap::new())).collect(),
        }
    }

    pub(crate) fn insert(&mut self, inst: Instance) {
        let id = inst.id();
        self.commands
            .get_mut(&id.replica)
            .unwrap_or_else(|| panic!("instance {:?} owned by an unknown replica", id))
            .insert(id.num, inst);
    }

    pub(crate) fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.commands.get(&id.replica)?.get(&id.num)
    }

    pub(crate) fn get_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.commands.get_mut(&id.replica)?.get_mut(&id.num)
    }

    pub(crate) fn max_instance(&self, replica: ReplicaId) -> Option<&Instance> {
        self.commands
            .get(&replica)
            .and_then(|tree| tree.values().next_back())
    }

    /// The highest instance number known for `replica`; zero when none.
    pub(crate) fn max_num(&self, replica: ReplicaId) -> InstanceNum {
        self.max_instance(replica)
            .map(|inst| inst.id().num)
            .unwrap_or_default()
    }

    /// The locally known maximum interfering seq num and dependency set for
    /// `cmd`, skipping `ignore` (the instance being recomputed, if any).
    ///
    /// Each replica's column is scanned descending from its max. The scan
    /// stops at the first interfering instance: seq nums do not decrease
    /// along a column, and an instance transitively covers the interferers
    /// below it, so the first hit carries the column's maximum interfering
    /// seq and a sufficient dependency. Placeholder instances whose payload
    /// has not arrived yet cannot be ruled out and are skipped.
    pub(crate) fn seq_and_deps_for(
        &self,
        cmd: &Command,
        ignore: Option<InstanceId>,
    ) -> (SeqNum, Vec<InstanceId>) {
        let mut max_seq = SeqNum::default();
        let mut deps = Vec::new();

        for tree in self.commands.values() {
            for inst in tree.values().rev() {
                if Some(inst.id()) == ignore {
                    continue;
                }
                let Some(other) = &inst.is.data.command else {
                    continue;
                };
                if other.interferes(cmd) {
                    max_seq = max_seq.max(inst.is.data.seq);
                    deps.push(inst.id());
                    break;
                }
            }
        }
        deps.sort_unstable();
        (max_seq, deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::instance::{InstanceData, InstanceState, InstanceStatus};

    fn nodes() -> Vec<ReplicaId> {
        (0..3).map(ReplicaId).collect()
    }

    fn seeded(id: InstanceId, key: &str, seq: u64, deps: Vec<InstanceId>) -> Instance {
        Instance::from_state(InstanceState {
            instance_id: id,
            status: InstanceStatus::PreAccepted,
            data: InstanceData {
                command: Some(Command::write(0, key, "v")),
                seq: seq.into(),
                deps,
            },
        })
    }

    #[test]
    fn max_num_of_empty_column_is_zero() {
        let space = InstanceSpace::new(&nodes());
        assert_eq!(*space.max_num(ReplicaId(0)), 0);
    }

    #[test]
    fn max_num_tracks_highest_instance() {
        let mut space = InstanceSpace::new(&nodes());
        space.insert(seeded(InstanceId::new(0, 1), "a", 1, vec![]));
        space.insert(seeded(InstanceId::new(0, 4), "a", 9, vec![]));
        space.insert(seeded(InstanceId::new(0, 2), "a", 2, vec![]));
        assert_eq!(*space.max_num(ReplicaId(0)), 4);
    }

    #[test]
    fn scan_stops_at_first_interferer_per_column() {
        let mut space = InstanceSpace::new(&nodes());
        space.insert(seeded(InstanceId::new(0, 1), "a", 1, vec![]));
        space.insert(seeded(InstanceId::new(0, 2), "a", 4, vec![]));
        space.insert(seeded(InstanceId::new(1, 1), "b", 2, vec![]));
        space.insert(seeded(InstanceId::new(1, 2), "a", 5, vec![]));

        let (seq, deps) = space.seq_and_deps_for(&Command::write(9, "a", "x"), None);
        assert_eq!(*seq, 5);
        assert_eq!(deps, vec![InstanceId::new(0, 2), InstanceId::new(1, 2)]);
    }

    #[test]
    fn scan_skips_ignored_instance_and_placeholders() {
        let mut space = InstanceSpace::new(&nodes());
        space.insert(seeded(InstanceId::new(0, 1), "a", 1, vec![]));
        space.insert(seeded(InstanceId::new(0, 2), "a", 4, vec![]));
        // Payload for (1, 2) has not arrived yet.
        space.insert(Instance::new(InstanceId::new(1, 2)));

        let (seq, deps) =
            space.seq_and_deps_for(&Command::write(9, "a", "x"), Some(InstanceId::new(0, 2)));
        assert_eq!(*seq, 1);
        assert_eq!(deps, vec![InstanceId::new(0, 1)]);
    }

    #[test]
    fn reads_do_not_interfere_with_reads() {
        let mut space = InstanceSpace::new(&nodes());
        let mut inst = seeded(InstanceId::new(0, 1), "a", 3, vec![]);
        inst.is.data.command = Some(Command::read(0, "a"));
        space.insert(inst);

        let (seq, deps) = space.seq_and_deps_for(&Command::read(9, "a"), None);
        assert_eq!(*seq, 0);
        assert!(deps.is_empty());
    }
}
