use serde::{Deserialize, Serialize};

use super::{
    cmd::Command,
    id::{InstanceId, SeqNum},
};

/// The protocol phase of an instance. Status only ever advances, in the
/// declared order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstanceStatus {
    #[default]
    None,
    PreAccepted,
    Accepted,
    Committed,
    Executed,
}

/// The replicated payload of an instance. `deps` is kept sorted ascending
/// and deduplicated; `command` is absent only in placeholder instances
/// created from a message that referenced them before their payload
/// arrived.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceData {
    pub command: Option<Command>,
    pub seq: SeqNum,
    pub deps: Vec<InstanceId>,
}

/// The durable record of one instance, rewritten on every status advance.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceState {
    pub instance_id: InstanceId,
    pub status: InstanceStatus,
    pub data: InstanceData,
}

/// An instance in the local store: the replicated record plus the command
/// leader's reply tallies. Tallies are volatile and reset across restarts.
#[derive(Debug)]
pub(crate) struct Instance {
    pub(crate) is: InstanceState,
    /// PreAccept replies that agreed without change.
    pub(crate) pre_accept_oks: usize,
    /// PreAccept replies that carried an updated (seq, deps).
    pub(crate) pre_accept_replies: usize,
    pub(crate) accept_oks: usize,
}

impl Instance {
    /// A placeholder instance in the `None` state, created when a message
    /// references an id the local replica has not seen yet.
    pub(crate) fn new(instance_id: InstanceId) -> Self {
        Self::from_state(InstanceState {
            instance_id,
            ..InstanceState::default()
        })
    }

    pub(crate) fn from_state(is: InstanceState) -> Self {
        Self {
            is,
            pre_accept_oks: 0,
            pre_accept_replies: 0,
            accept_oks: 0,
        }
    }

    pub(crate) fn id(&self) -> InstanceId {
        self.is.instance_id
    }

    pub(crate) fn reset_tallies(&mut self) {
        self.pre_accept_oks = 0;
        self.pre_accept_replies = 0;
        self.accept_oks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ord() {
        let ss = [
            InstanceStatus::None,
            InstanceStatus::PreAccepted,
            InstanceStatus::Accepted,
            InstanceStatus::Committed,
            InstanceStatus::Executed,
        ];
        for i in 0..ss.len() - 1 {
            for j in (i + 1)..ss.len() {
                assert!(ss[i] < ss[j]);
            }
        }
    }

    #[test]
    fn placeholder_starts_empty() {
        let inst = Instance::new(InstanceId::new(1, 4));
        assert_eq!(inst.is.status, InstanceStatus::None);
        assert!(inst.is.data.command.is_none());
        assert_eq!(*inst.is.data.seq, 0);
        assert!(inst.is.data.deps.is_empty());
    }
}
