use serde::{Deserialize, Serialize};

use crate::types::{Command, CommandResult, InstanceData, InstanceId, ReplicaId, SeqNum};

/// Fast-path proposal from the command leader, carrying the full payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreAccept {
    pub data: InstanceData,
}

/// Follower agreement with the leader's PreAccept, unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreAcceptOk {}

/// Follower response with merged attributes the leader did not know about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreAcceptReply {
    pub updated_seq: SeqNum,
    pub updated_deps: Vec<InstanceId>,
}

/// Slow-path proposal. The command itself is omitted: recipients already
/// hold it from the PreAccept phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Accept {
    pub seq: SeqNum,
    pub deps: Vec<InstanceId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceptOk {}

/// One-shot commit broadcast carrying the authoritative payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    pub data: InstanceData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Payload {
    PreAccept(PreAccept),
    PreAcceptOk(PreAcceptOk),
    PreAcceptReply(PreAcceptReply),
    Accept(Accept),
    AcceptOk(AcceptOk),
    Commit(Commit),
}

/// The protocol envelope: every message is addressed to one replica and
/// references exactly one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub to: ReplicaId,
    pub instance_id: InstanceId,
    pub payload: Payload,
}

impl Message {
    pub fn with_destination(mut self, to: impl Into<ReplicaId>) -> Self {
        self.to = to.into();
        self
    }

    /// Replies flow back to the command leader; proposals flow out from it.
    pub(crate) fn is_reply(&self) -> bool {
        matches!(
            self.payload,
            Payload::PreAcceptOk(_) | Payload::PreAcceptReply(_) | Payload::AcceptOk(_)
        )
    }
}

/// Client request carried on the same wire as protocol traffic. `cmd_id`
/// pairs the response with the request on the submitting connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Propose {
    pub cmd_id: String,
    pub command: Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeResponse {
    pub cmd_id: String,
    pub result: Result<CommandResult, String>,
}

/// Everything that travels over a TCP connection between processes. The
/// protocol core itself only ever sees [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Protocol(Message),
    Propose(Propose),
    ProposeResponse(ProposeResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Command;

    #[test]
    fn encode_decode_is_identity() {
        let data = InstanceData {
            command: Some(Command::write(3, "a", "1")),
            seq: 6.into(),
            deps: vec![InstanceId::new(0, 2), InstanceId::new(1, 2)],
        };
        let variants = vec![
            Payload::PreAccept(PreAccept { data: data.clone() }),
            Payload::PreAcceptOk(PreAcceptOk {}),
            Payload::PreAcceptReply(PreAcceptReply {
                updated_seq: 7.into(),
                updated_deps: data.deps.clone(),
            }),
            Payload::Accept(Accept {
                seq: 7.into(),
                deps: data.deps.clone(),
            }),
            Payload::AcceptOk(AcceptOk {}),
            Payload::Commit(Commit { data }),
        ];
        for payload in variants {
            let msg = Message {
                to: ReplicaId(2),
                instance_id: InstanceId::new(0, 3),
                payload,
            };
            let bytes = bincode::serialize(&msg).unwrap();
            let decoded: Message = bincode::deserialize(&bytes).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn reply_classification() {
        let reply = |payload| Message {
            to: ReplicaId(0),
            instance_id: InstanceId::new(0, 1),
            payload,
        };
        assert!(reply(Payload::PreAcceptOk(PreAcceptOk {})).is_reply());
        assert!(reply(Payload::AcceptOk(AcceptOk {})).is_reply());
        assert!(!reply(Payload::Commit(Commit {
            data: InstanceData::default()
        }))
        .is_reply());
        assert!(!reply(Payload::Accept(Accept {
            seq: 1.into(),
            deps: vec![]
        }))
        .is_reply());
    }
}
