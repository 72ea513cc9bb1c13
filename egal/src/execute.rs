use std::collections::{HashMap, HashSet, VecDeque};

use log::trace;
use petgraph::{
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
};

use crate::{
    storage::Storage,
    types::{Command, InstanceId, InstanceSpace, InstanceStatus},
};

/// Turns committed instances into a deterministic total order of commands.
///
/// Committed instances enter the pending queue; a run walks each one's
/// dependency graph restricted to committed vertices, condenses it into
/// strongly connected components and emits the components dependencies
/// first, ordering instances inside a component by (seq, replica, num). An
/// instance whose reachable dependencies include an unknown or uncommitted
/// one stays pending and is retried on the next commit.
#[derive(Debug, Default)]
pub(crate) struct Executor {
    pending: VecDeque<InstanceId>,
    executed: HashSet<InstanceId>,
}

impl Executor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueue a committed instance for execution.
    pub(crate) fn add_exec(&mut self, id: InstanceId) {
        if !self.executed.contains(&id) && !self.pending.contains(&id) {
            self.pending.push_back(id);
        }
    }

    /// Record an instance already executed in a previous incarnation so the
    /// graph walk prunes it.
    pub(crate) fn mark_executed(&mut self, id: InstanceId) {
        self.executed.insert(id);
    }

    /// Drain the pending queue, returning the commands executed this run in
    /// their final order. Every emitted instance is persisted at `Executed`
    /// before its command is returned.
    pub(crate) fn run<S: Storage>(
        &mut self,
        space: &mut InstanceSpace,
        storage: &mut S,
    ) -> Vec<Command> {
        let mut out = Vec::new();
        let mut blocked = VecDeque::new();

        while let Some(start) = self.pending.pop_front() {
            if self.executed.contains(&start) {
                continue;
            }
            match self.executable_order(start, space) {
                Some(order) => {
                    for id in order {
                        if !self.executed.insert(id) {
                            continue;
                        }
                        let inst = space.get_mut(id).unwrap();
                        inst.is.status = InstanceStatus::Executed;
                        let record = inst.is.clone();
                        storage.persist_instance(&record);
                        if let Some(cmd) = record.data.command {
                            out.push(cmd);
                        }
                    }
                }
                None => {
                    trace!("instance {:?} waits for an uncommitted dependency", start);
                    blocked.push_back(start);
                }
            }
        }
        self.pending = blocked;
        out
    }

    /// The execution order for the committed subgraph reachable from
    /// `start`, or `None` while some reachable dependency is unknown or not
    /// yet committed.
    fn executable_order(&self, start: InstanceId, space: &InstanceSpace) -> Option<Vec<InstanceId>> {
        let mut graph = DiGraph::<InstanceId, ()>::new();
        let mut index = HashMap::new();
        let mut queue = VecDeque::new();

        index.insert(start, graph.add_node(start));
        queue.push_back(start);

        while let Some(cur) = queue.pop_front() {
            let cur_ix = index[&cur];
            // Deps are stored sorted, which keeps the traversal order, and
            // with it the component order, identical on every replica.
            for &dep in &space.get(cur)?.is.data.deps {
                if self.executed.contains(&dep) {
                    continue;
                }
                match space.get(dep) {
                    None => return None,
                    Some(inst) if inst.is.status == InstanceStatus::Executed => continue,
                    Some(inst) if inst.is.status < InstanceStatus::Committed => return None,
                    Some(_) => {}
                }
                let dep_ix = *index.entry(dep).or_insert_with(|| {
                    queue.push_back(dep);
                    graph.add_node(dep)
                });
                graph.add_edge(cur_ix, dep_ix, ());
            }
        }

        // Components come back dependencies first.
        let mut order = Vec::new();
        for scc in tarjan_scc(&graph) {
            let mut ids: Vec<InstanceId> = scc.iter().map(|ix: &NodeIndex| graph[*ix]).collect();
            ids.sort_unstable_by_key(|id| {
                let inst = space.get(*id).unwrap();
                (inst.is.data.seq, id.replica, id.num)
            });
            order.extend(ids);
        }
        Some(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::{InstanceData, InstanceState, ReplicaId};
    use crate::types::{Instance, SeqNum};

    fn space() -> InstanceSpace {
        InstanceSpace::new(&(0..3).map(ReplicaId).collect::<Vec<_>>())
    }

    fn committed(
        space: &mut InstanceSpace,
        id: InstanceId,
        key: &str,
        seq: u64,
        deps: Vec<InstanceId>,
    ) -> Command {
        let cmd = Command::write(*id.num + 100 * *id.replica as u64, key, "v");
        space.insert(Instance::from_state(InstanceState {
            instance_id: id,
            status: InstanceStatus::Committed,
            data: InstanceData {
                command: Some(cmd.clone()),
                seq: SeqNum(seq),
                deps,
            },
        }));
        cmd
    }

    #[test]
    fn chain_executes_dependencies_first() {
        let mut space = space();
        let mut storage = MemoryStorage::new();
        let first = committed(&mut space, InstanceId::new(0, 1), "a", 1, vec![]);
        let second = committed(
            &mut space,
            InstanceId::new(0, 2),
            "a",
            2,
            vec![InstanceId::new(0, 1)],
        );

        let mut exec = Executor::new();
        exec.add_exec(InstanceId::new(0, 2));
        let cmds = exec.run(&mut space, &mut storage);
        assert_eq!(cmds, vec![first, second]);
        assert_eq!(
            space.get(InstanceId::new(0, 1)).unwrap().is.status,
            InstanceStatus::Executed
        );
    }

    #[test]
    fn cycle_orders_by_seq_then_replica() {
        let mut space = space();
        let mut storage = MemoryStorage::new();
        // Two concurrent interfering writes that cite each other.
        let by_r0 = committed(
            &mut space,
            InstanceId::new(0, 1),
            "a",
            2,
            vec![InstanceId::new(1, 1)],
        );
        let by_r1 = committed(
            &mut space,
            InstanceId::new(1, 1),
            "a",
            2,
            vec![InstanceId::new(0, 1)],
        );

        let mut exec = Executor::new();
        exec.add_exec(InstanceId::new(1, 1));
        let cmds = exec.run(&mut space, &mut storage);
        assert_eq!(cmds, vec![by_r0, by_r1]);
    }

    #[test]
    fn uncommitted_dependency_pauses_and_resumes() {
        let mut space = space();
        let mut storage = MemoryStorage::new();
        committed(
            &mut space,
            InstanceId::new(0, 2),
            "a",
            2,
            vec![InstanceId::new(1, 1)],
        );
        // (1, 1) exists but has not committed yet.
        space.insert(Instance::new(InstanceId::new(1, 1)));

        let mut exec = Executor::new();
        exec.add_exec(InstanceId::new(0, 2));
        assert!(exec.run(&mut space, &mut storage).is_empty());

        // The dependency commits; the paused instance re-runs.
        let dep = {
            let inst = space.get_mut(InstanceId::new(1, 1)).unwrap();
            let cmd = Command::write(9, "a", "w");
            inst.is.data = InstanceData {
                command: Some(cmd.clone()),
                seq: SeqNum(1),
                deps: vec![],
            };
            inst.is.status = InstanceStatus::Committed;
            cmd
        };
        exec.add_exec(InstanceId::new(1, 1));
        let cmds = exec.run(&mut space, &mut storage);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0], dep);
    }

    #[test]
    fn missing_dependency_pauses() {
        let mut space = space();
        let mut storage = MemoryStorage::new();
        committed(
            &mut space,
            InstanceId::new(0, 1),
            "a",
            1,
            vec![InstanceId::new(2, 5)],
        );

        let mut exec = Executor::new();
        exec.add_exec(InstanceId::new(0, 1));
        assert!(exec.run(&mut space, &mut storage).is_empty());
        // Still pending, not lost.
        assert!(exec.pending.contains(&InstanceId::new(0, 1)));
    }

    #[test]
    fn executed_instances_are_pruned_and_never_reemitted() {
        let mut space = space();
        let mut storage = MemoryStorage::new();
        committed(&mut space, InstanceId::new(0, 1), "a", 1, vec![]);
        space.get_mut(InstanceId::new(0, 1)).unwrap().is.status = InstanceStatus::Executed;
        let second = committed(
            &mut space,
            InstanceId::new(0, 2),
            "a",
            2,
            vec![InstanceId::new(0, 1)],
        );

        let mut exec = Executor::new();
        exec.mark_executed(InstanceId::new(0, 1));
        exec.add_exec(InstanceId::new(0, 2));
        let cmds = exec.run(&mut space, &mut storage);
        assert_eq!(cmds, vec![second]);
    }
}
