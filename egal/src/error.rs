use std::io;
use thiserror::Error;

/// Startup validation failures. Fatal: the replica refuses to come up on a
/// configuration that disagrees with its durable identity.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("replica index {index} is outside the node set of {peer_cnt}")]
    IndexOutOfRange { index: usize, peer_cnt: usize },
    #[error("configured replica id differs from the persisted hard state")]
    HardStateIdMismatch,
    #[error("configured node set differs from the persisted hard state")]
    HardStateNodesMismatch,
}

#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("invalid command {0}")]
    InvalidCommand(String),
    #[error("meet io related error")]
    IoError(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("meet io related error")]
    IoError(#[from] io::Error),
}
