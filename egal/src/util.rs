use itertools::Itertools;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::Mutex,
};

use std::{ops::DerefMut, sync::Arc};

use crate::types::InstanceId;

/// Union of two sorted, deduplicated dependency lists, preserving both
/// properties.
pub(crate) fn merge_deps(lhs: &[InstanceId], rhs: &[InstanceId]) -> Vec<InstanceId> {
    lhs.iter().merge(rhs.iter()).dedup().copied().collect()
}

pub(crate) async fn send_frame<W, M>(conn: &mut W, frame: &M) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let content = bincode::serialize(frame)
        .map_err(|e| panic!("failed to serialize the frame, {}", e))
        .unwrap();
    let len = (content.len() as u64).to_be_bytes();

    conn.write_all(&len).await?;
    conn.write_all(&content).await?;
    Ok(())
}

pub(crate) async fn send_frame_arc<M>(conn: &Arc<Mutex<TcpStream>>, frame: &M) -> std::io::Result<()>
where
    M: Serialize,
{
    let mut conn = conn.lock().await;
    let conn = conn.deref_mut();

    send_frame(conn, frame).await
}

pub(crate) async fn recv_frame<R, M>(conn: &mut R) -> std::io::Result<M>
where
    R: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    let mut len_buf = [0u8; 8];
    conn.read_exact(&mut len_buf).await?;

    let expected_len = u64::from_be_bytes(len_buf);
    let mut buf = vec![0u8; expected_len as usize];
    conn.read_exact(&mut buf).await?;

    Ok(bincode::deserialize(&buf)
        .map_err(|e| panic!("Deserialize frame failed, {}", e))
        .unwrap())
}
