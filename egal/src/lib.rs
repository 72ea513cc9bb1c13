//! Leaderless state-machine replication built on Egalitarian Paxos.
//!
//! Every replica can lead commands; interfering commands are ordered through
//! dependency tracking and sequence numbers rather than through a single
//! elected leader. The protocol core ([`Replica`]) is a plain state machine
//! driven through `tick` / `step` / `request` / `ready`; [`server`] wraps it
//! in a tokio event loop with a TCP transport, and [`client`] talks to it.

pub mod client;
pub mod config;
pub mod error;
mod execute;
pub mod message;
pub mod server;
pub mod storage;
mod timer;
mod types;
mod util;

pub use storage::{HardState, MemoryStorage, Storage};
pub use types::{
    Command, CommandExecutor, CommandResult, InstanceData, InstanceId, InstanceNum, InstanceState,
    InstanceStatus, Key, Ready, Replica, ReplicaId, SeqNum,
};
