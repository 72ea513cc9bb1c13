use std::mem;

use log::{trace, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    config::Configure,
    error::ConfigError,
    execute::Executor,
    message::{
        Accept, AcceptOk, Commit, Message, Payload, PreAccept, PreAcceptOk, PreAcceptReply,
    },
    storage::{HardState, Storage},
    timer::{TickingTimer, TimerKind},
    util::merge_deps,
};

use super::{
    cmd::Command,
    id::{InstanceId, InstanceNum, ReplicaId},
    instance::{Instance, InstanceData, InstanceState, InstanceStatus},
    space::InstanceSpace,
};

/// Everything accumulated since the last drain: outbound messages addressed
/// to specific replicas, and commands executed in their final order. Both
/// lists are handed over atomically and cleared.
#[derive(Debug, Default)]
pub struct Ready {
    pub messages: Vec<Message>,
    pub executed_commands: Vec<Command>,
}

/// The replica state machine.
///
/// A single-threaded driver feeds it through the four entry points `tick`,
/// `step`, `request` and `ready`, and pumps the drained output to the
/// transport and application layers. No handler blocks; outbound messages
/// and executed commands accumulate in the outboxes until drained.
pub struct Replica<S>
where
    S: Storage,
{
    id: ReplicaId,
    nodes: Vec<ReplicaId>,
    storage: S,
    space: InstanceSpace,
    executor: Executor,
    timers: Vec<TickingTimer>,
    /// Outbox of protocol messages to be delivered.
    msgs: Vec<Message>,
    /// Outbox of commands ready to be applied, in order.
    executed_cmds: Vec<Command>,
    /// Local rand source so runs stay reproducible under a fixed seed.
    #[allow(dead_code)] // drawn on only by one-time timers, none armed yet
    rand: StdRng,
}

impl<S> Replica<S>
where
    S: Storage,
{
    /// Brings the replica up from its configuration and durable state.
    ///
    /// Panics when the configuration disagrees with a persisted hard state:
    /// a replica must not come up under a different identity or node set.
    pub fn new(conf: &Configure, mut storage: S) -> Self {
        let id = ReplicaId(conf.index);
        let nodes: Vec<ReplicaId> = (0..conf.peer_cnt).map(ReplicaId).collect();
        if let Err(e) = Self::validate(id, &nodes, &storage, conf) {
            panic!("invalid replica configuration: {}", e);
        }
        if storage.hard_state().is_none() {
            storage.persist_hard_state(&HardState {
                replica: id,
                nodes: nodes.clone(),
            });
        }

        let mut replica = Self {
            id,
            space: InstanceSpace::new(&nodes),
            nodes,
            storage,
            executor: Executor::new(),
            timers: Vec::new(),
            msgs: Vec::new(),
            executed_cmds: Vec::new(),
            rand: StdRng::seed_from_u64(conf.rand_seed),
        };
        replica.init_storage();
        replica.init_timers();
        replica
    }

    fn validate(
        id: ReplicaId,
        nodes: &[ReplicaId],
        storage: &S,
        conf: &Configure,
    ) -> Result<(), ConfigError> {
        if conf.index >= conf.peer_cnt {
            return Err(ConfigError::IndexOutOfRange {
                index: conf.index,
                peer_cnt: conf.peer_cnt,
            });
        }
        if let Some(hs) = storage.hard_state() {
            if hs.replica != id {
                return Err(ConfigError::HardStateIdMismatch);
            }
            if hs.nodes != nodes {
                return Err(ConfigError::HardStateNodesMismatch);
            }
        }
        Ok(())
    }

    /// Reload every persisted instance, then re-enter the current transition
    /// of each locally-owned unfinished instance so in-flight quorums can be
    /// re-gathered. Reply tallies restart from zero: followers may have
    /// forgotten reply state they never persisted.
    fn init_storage(&mut self) {
        let mut local_resume = Vec::new();
        let mut committed_elsewhere = Vec::new();
        for is in self.storage.instances() {
            let id = is.instance_id;
            let status = is.status;
            self.space.insert(Instance::from_state(is));
            if status == InstanceStatus::Executed {
                self.executor.mark_executed(id);
            } else if id.replica == self.id {
                local_resume.push(id);
            } else if status == InstanceStatus::Committed {
                committed_elsewhere.push(id);
            }
        }
        for id in committed_elsewhere {
            self.executor.add_exec(id);
        }
        for id in local_resume {
            self.restart_transition(id);
        }
        let executed = self.executor.run(&mut self.space, &mut self.storage);
        self.executed_cmds.extend(executed);
    }

    // No production timer is armed: commits drive the executor directly and
    // command-leader recovery is out of scope for now.
    fn init_timers(&mut self) {}

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Advance every registered timer by one unit and dispatch the ones that
    /// fire. Infinite timers reset; one-time timers unregister.
    pub fn tick(&mut self) {
        let mut fired = Vec::new();
        self.timers.retain_mut(|t| {
            if t.tick() {
                fired.push(t.kind());
                if t.recurring() {
                    t.reset();
                    true
                } else {
                    false
                }
            } else {
                true
            }
        });
        for kind in fired {
            match kind {
                TimerKind::Execute => {
                    let executed = self.executor.run(&mut self.space, &mut self.storage);
                    self.executed_cmds.extend(executed);
                }
            }
        }
    }

    #[allow(dead_code)] // scaffolding for recovery-after-no-progress events
    pub(crate) fn register_infinite_timer(&mut self, timeout: usize, kind: TimerKind) {
        self.timers.push(TickingTimer::infinite(timeout, kind));
    }

    #[allow(dead_code)] // scaffolding for recovery-after-no-progress events
    pub(crate) fn register_one_time_timer(&mut self, timeout: usize, kind: TimerKind) {
        let jitter = self.rand.gen_range(0..=timeout / 2);
        self.timers
            .push(TickingTimer::one_time(timeout + jitter, kind));
    }

    /// Take on a client command as its command leader: open the next local
    /// instance and drive it into PreAccept.
    pub fn request(&mut self, cmd: Command) {
        self.on_request(cmd);
    }

    /// Consume one inbound protocol message. Invalid messages are logged and
    /// dropped, never requeued.
    pub fn step(&mut self, m: Message) {
        if !self.validate_message(&m) {
            warn!("found invalid message: {:?}", m);
            return;
        }

        let id = m.instance_id;
        if self.space.get(id).is_none() {
            if id.replica == self.id {
                // We should always know about our own instances.
                warn!("unknown local instance number: {:?}", m);
                return;
            }
            self.space.insert(Instance::new(id));
        }

        match m.payload {
            Payload::PreAccept(pa) => self.on_pre_accept(id, pa),
            Payload::PreAcceptOk(_) => self.on_pre_accept_ok(id),
            Payload::PreAcceptReply(par) => self.on_pre_accept_reply(id, par),
            Payload::Accept(a) => self.on_accept(id, a),
            Payload::AcceptOk(_) => self.on_accept_ok(id),
            Payload::Commit(c) => self.on_commit(id, c),
        }
    }

    /// Drain the outboxes accumulated since the last call.
    pub fn ready(&mut self) -> Ready {
        Ready {
            messages: mem::take(&mut self.msgs),
            executed_commands: mem::take(&mut self.executed_cmds),
        }
    }

    pub fn has_ready(&self) -> bool {
        !self.msgs.is_empty() || !self.executed_cmds.is_empty()
    }

    /// Snapshot of one instance's replicated record, if known locally.
    pub fn instance_state(&self, id: InstanceId) -> Option<InstanceState> {
        self.space.get(id).map(|inst| inst.is.clone())
    }

    /// The highest instance number known for `replica`; zero when none.
    pub fn max_instance_num(&self, replica: ReplicaId) -> InstanceNum {
        self.space.max_num(replica)
    }

    /// Hand the storage back, e.g. to restart the replica on top of it.
    pub fn into_storage(self) -> S {
        self.storage
    }

    fn validate_message(&self, m: &Message) -> bool {
        // The message should have us as its destination.
        if m.to != self.id {
            return false;
        }

        if m.is_reply() {
            // Replies come back to the command leader: the instance must be
            // ours.
            m.instance_id.replica == self.id
        } else {
            // Proposals reference an instance owned by another known
            // replica.
            m.instance_id.replica != self.id && self.known_replica(m.instance_id.replica)
        }
    }

    fn known_replica(&self, r: ReplicaId) -> bool {
        self.nodes.contains(&r)
    }

    fn quorum(&self, votes: usize) -> bool {
        // floor(N/2)+1
        votes > self.nodes.len() / 2
    }

    fn fast_quorum(&self, votes: usize) -> bool {
        votes >= self.nodes.len() - 1
    }

    fn on_request(&mut self, cmd: Command) -> InstanceId {
        // The smallest unused local instance number.
        let mut num = self.space.max_num(self.id);
        *num += 1;
        let id = InstanceId {
            replica: self.id,
            num,
        };

        let (mut seq, deps) = self.space.seq_and_deps_for(&cmd, None);
        *seq += 1;
        let mut inst = Instance::new(id);
        inst.is.data = InstanceData {
            command: Some(cmd),
            seq,
            deps,
        };
        self.space.insert(inst);

        self.transition(id, InstanceStatus::PreAccepted);
        id
    }

    fn on_pre_accept(&mut self, id: InstanceId, pa: PreAccept) {
        trace!("handle PreAccept for {:?}", id);
        let Some(cmd) = pa.data.command else {
            warn!("PreAccept without a command for {:?}", id);
            return;
        };

        {
            let inst = self.space.get_mut(id).unwrap();
            if inst.is.status >= InstanceStatus::Accepted {
                // A later phase already superseded this proposal; keep the
                // payload if it was still missing, but do not reply.
                if inst.is.data.command.is_none() {
                    inst.is.data.command = Some(cmd);
                }
                return;
            }
        }

        // Merge the leader's attributes with what is known locally,
        // ignoring the instance itself.
        let (mut local_seq, local_deps) = self.space.seq_and_deps_for(&cmd, Some(id));
        *local_seq += 1;
        let merged_seq = pa.data.seq.max(local_seq);
        let merged_deps = merge_deps(&pa.data.deps, &local_deps);
        let changed = merged_seq != pa.data.seq || merged_deps != pa.data.deps;

        let inst = self.space.get_mut(id).unwrap();
        inst.is.data = InstanceData {
            command: Some(cmd),
            seq: merged_seq,
            deps: merged_deps.clone(),
        };
        inst.is.status = InstanceStatus::PreAccepted;
        self.persist(id);

        if changed {
            self.reply(
                id.replica,
                id,
                Payload::PreAcceptReply(PreAcceptReply {
                    updated_seq: merged_seq,
                    updated_deps: merged_deps,
                }),
            );
        } else {
            trace!("reply PreAcceptOk for {:?}", id);
            self.reply(id.replica, id, Payload::PreAcceptOk(PreAcceptOk {}));
        }
    }

    fn on_pre_accept_ok(&mut self, id: InstanceId) {
        trace!("handle PreAcceptOk for {:?}", id);
        let inst = self.space.get_mut(id).unwrap();
        if inst.is.status != InstanceStatus::PreAccepted {
            // Late reply, e.g. after a fast-path commit.
            return;
        }
        inst.pre_accept_oks += 1;
        self.try_advance_pre_accepted(id);
    }

    fn on_pre_accept_reply(&mut self, id: InstanceId, par: PreAcceptReply) {
        trace!("handle PreAcceptReply for {:?}", id);
        let inst = self.space.get_mut(id).unwrap();
        if inst.is.status != InstanceStatus::PreAccepted {
            return;
        }
        inst.is.data.seq = inst.is.data.seq.max(par.updated_seq);
        inst.is.data.deps = merge_deps(&inst.is.data.deps, &par.updated_deps);
        inst.pre_accept_replies += 1;
        self.try_advance_pre_accepted(id);
    }

    /// Evaluate the quorum thresholds after a PreAccept-phase reply. Votes
    /// count the leader's own implicit agreement. Only the first threshold
    /// crossed takes effect; once the instance leaves PreAccepted, further
    /// replies are ignored.
    fn try_advance_pre_accepted(&mut self, id: InstanceId) {
        let inst = self.space.get(id).unwrap();
        let oks = inst.pre_accept_oks;
        let updated = inst.pre_accept_replies;
        if updated == 0 && self.fast_quorum(oks + 1) {
            // Every reply so far agreed unchanged: commit in one round trip.
            self.transition(id, InstanceStatus::Committed);
        } else if updated > 0 && self.quorum(oks + updated + 1) {
            // Some replica knew more than we did; settle the merged
            // attributes through the slow path.
            self.transition(id, InstanceStatus::Accepted);
        }
    }

    fn on_accept(&mut self, id: InstanceId, a: Accept) {
        trace!("handle Accept for {:?}", id);
        let inst = self.space.get_mut(id).unwrap();
        if inst.is.status >= InstanceStatus::Committed {
            return;
        }
        if inst.is.data.command.is_none() {
            // Accept carries no command; without the PreAccept payload this
            // message cannot be acted on.
            warn!("Accept for {:?} without a known command", id);
            return;
        }
        inst.is.data.seq = a.seq;
        inst.is.data.deps = a.deps;
        inst.is.status = InstanceStatus::Accepted;
        self.persist(id);
        self.reply(id.replica, id, Payload::AcceptOk(AcceptOk {}));
    }

    fn on_accept_ok(&mut self, id: InstanceId) {
        trace!("handle AcceptOk for {:?}", id);
        let inst = self.space.get_mut(id).unwrap();
        if inst.is.status != InstanceStatus::Accepted {
            return;
        }
        inst.accept_oks += 1;
        let votes = inst.accept_oks + 1;
        if self.quorum(votes) {
            self.transition(id, InstanceStatus::Committed);
        }
    }

    fn on_commit(&mut self, id: InstanceId, c: Commit) {
        trace!("handle Commit for {:?}", id);
        let inst = self.space.get_mut(id).unwrap();
        if inst.is.status >= InstanceStatus::Committed {
            return;
        }
        // The commit payload is authoritative.
        inst.is.data = c.data;
        inst.is.status = InstanceStatus::Committed;
        self.persist(id);
        self.prepare_to_execute(id);
    }

    /// Advance `id` to `status`, persist the new record, and emit the
    /// messages that belong to the transition. Persistence always happens
    /// before the outbox grows.
    fn transition(&mut self, id: InstanceId, status: InstanceStatus) {
        let inst = self.space.get_mut(id).unwrap();
        debug_assert!(inst.is.status < status, "instance status may only advance");
        inst.is.status = status;
        self.persist(id);
        self.emit_for_status(id);
    }

    /// Re-emit the outbound messages of the transition `id` is currently in.
    /// Used at startup to re-gather quorums that were in flight at the
    /// crash.
    fn restart_transition(&mut self, id: InstanceId) {
        let inst = self.space.get_mut(id).unwrap();
        inst.reset_tallies();
        self.emit_for_status(id);
    }

    fn emit_for_status(&mut self, id: InstanceId) {
        let inst = self.space.get(id).unwrap();
        let status = inst.is.status;
        let data = inst.is.data.clone();
        match status {
            InstanceStatus::PreAccepted => {
                self.broadcast(id, Payload::PreAccept(PreAccept { data }));
            }
            InstanceStatus::Accepted => {
                self.broadcast(
                    id,
                    Payload::Accept(Accept {
                        seq: data.seq,
                        deps: data.deps,
                    }),
                );
            }
            InstanceStatus::Committed => {
                self.broadcast(id, Payload::Commit(Commit { data }));
                self.prepare_to_execute(id);
            }
            InstanceStatus::None | InstanceStatus::Executed => {}
        }
    }

    fn persist(&mut self, id: InstanceId) {
        let record = self.space.get(id).unwrap().is.clone();
        self.storage.persist_instance(&record);
    }

    fn prepare_to_execute(&mut self, id: InstanceId) {
        debug_assert_eq!(
            self.space.get(id).unwrap().is.status,
            InstanceStatus::Committed
        );
        self.executor.add_exec(id);
        let executed = self.executor.run(&mut self.space, &mut self.storage);
        self.executed_cmds.extend(executed);
    }

    /// Queue `payload` for every other replica, in replica order.
    fn broadcast(&mut self, instance_id: InstanceId, payload: Payload) {
        for &to in &self.nodes {
            if to != self.id {
                self.msgs.push(Message {
                    to,
                    instance_id,
                    payload: payload.clone(),
                });
            }
        }
    }

    fn reply(&mut self, to: ReplicaId, instance_id: InstanceId, payload: Payload) {
        self.msgs.push(Message {
            to,
            instance_id,
            payload,
        });
    }
}
