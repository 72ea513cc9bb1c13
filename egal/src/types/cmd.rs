use std::fmt;

use async_trait::async_trait;
use egal_derive::FromInner;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::ExecuteError;

/// An opaque key in the replicated keyspace. Ordering is lexicographic on
/// the raw bytes.
#[derive(
    Debug, Default, Clone, FromInner, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

/// A keyed command submitted by a client and replicated through the
/// protocol. The payload bytes are opaque to the replication layer.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Command {
    pub id: u64,
    pub key: Key,
    pub writing: bool,
    pub data: Vec<u8>,
}

impl Command {
    pub fn write(id: u64, key: impl Into<Key>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            key: key.into(),
            writing: true,
            data: data.into(),
        }
    }

    pub fn read(id: u64, key: impl Into<Key>) -> Self {
        Self {
            id,
            key: key.into(),
            writing: false,
            data: Vec::new(),
        }
    }

    /// Whether the two commands interfere: at least one writes and both
    /// touch the same key. Reads never interfere with reads. Symmetric.
    pub fn interferes(&self, other: &Command) -> bool {
        (self.writing || other.writing) && self.key == other.key
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.writing {
            write!(f, "{{{} writing {}: {:?}}}", self.id, self.key, self.data)
        } else {
            write!(f, "{{{} reading {}}}", self.id, self.key)
        }
    }
}

/// The value observed at a command's key once it executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    pub key: Key,
    pub value: Vec<u8>,
}

/// The application state machine seam. Implementations interpret executed
/// commands in the exact order the replication layer hands them over.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor {
    /// Apply one executed command, returning the value at its key.
    async fn execute(&mut self, cmd: &Command) -> Result<Vec<u8>, ExecuteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_compare() {
        let cases: Vec<(Key, Key, std::cmp::Ordering)> = vec![
            (Key::default(), Key::default(), std::cmp::Ordering::Equal),
            (Key::default(), Key::new(*b"\x00"), std::cmp::Ordering::Less),
            (
                Key::new(*b"\x00"),
                Key::new(*b"\x00"),
                std::cmp::Ordering::Equal,
            ),
            (Key::from("a"), Key::from("b"), std::cmp::Ordering::Less),
            (
                Key::from("a\x00"),
                Key::from("a"),
                std::cmp::Ordering::Greater,
            ),
            (
                Key::from("a\x00"),
                Key::from("a\x01"),
                std::cmp::Ordering::Less,
            ),
        ];
        for (i, (a, b, ord)) in cases.iter().enumerate() {
            assert_eq!(a.cmp(b), *ord, "case {i}: {a}.cmp({b})");
        }
    }

    #[test]
    fn command_interferes() {
        let r_a = Command::read(0, "a");
        let w_a = Command::write(1, "a", "1");
        let r_b = Command::read(2, "b");
        let w_b = Command::write(3, "b", "2");

        let cases = [
            (&r_a, &r_a, false),
            (&r_a, &w_a, true),
            (&r_a, &r_b, false),
            (&r_a, &w_b, false),
            (&w_a, &r_a, true),
            (&w_a, &w_a, true),
            (&w_a, &r_b, false),
            (&w_a, &w_b, false),
        ];
        for (i, (c1, c2, interferes)) in cases.iter().enumerate() {
            assert_eq!(c1.interferes(c2), *interferes, "case {i}: {c1} vs {c2}");
            assert_eq!(c2.interferes(c1), *interferes, "case {i} swapped");
        }
    }
}
