use egal_derive::FromInner;
use serde::{Deserialize, Serialize};

/// The replica id, drawn from the fixed node set
#[derive(
    Debug, Default, Copy, Clone, FromInner, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord,
    Hash,
)]
pub struct ReplicaId(pub usize);

/// Position of an instance within one replica's instance space, starting at
/// one. Zero means "none".
#[derive(
    Debug, Default, Copy, Clone, FromInner, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord,
    Hash,
)]
pub struct InstanceNum(pub u64);

/// The seq num, which breaks dependency cycles while executing. Zero means
/// "none".
#[derive(
    Debug, Default, Copy, Clone, FromInner, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord,
    Hash,
)]
pub struct SeqNum(pub u64);

/// The global instance id, ordered by (replica, num)
#[derive(
    Debug, Default, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct InstanceId {
    pub replica: ReplicaId,
    pub num: InstanceNum,
}

impl InstanceId {
    pub fn new(replica: impl Into<ReplicaId>, num: impl Into<InstanceNum>) -> Self {
        Self {
            replica: replica.into(),
            num: num.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_orders_by_replica_then_num() {
        let mut ids = vec![
            InstanceId::new(1, 2),
            InstanceId::new(0, 3),
            InstanceId::new(1, 1),
            InstanceId::new(0, 1),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                InstanceId::new(0, 1),
                InstanceId::new(0, 3),
                InstanceId::new(1, 1),
                InstanceId::new(1, 2),
            ]
        );
    }

    #[test]
    fn zero_means_none() {
        assert_eq!(*InstanceNum::default(), 0);
        assert_eq!(*SeqNum::default(), 0);
    }
}
