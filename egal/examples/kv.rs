use std::{collections::HashMap, io, time::Duration};

use async_trait::async_trait;
use log::{debug, info};
use tokio::time::{sleep, timeout};

use egal::{
    client::{RpcClient, TcpRpcClient},
    config::Configure,
    error::ExecuteError,
    server::Server,
    Command, CommandExecutor, MemoryStorage,
};

/// A keyed store driven off the executed-command stream.
#[derive(Debug, Default)]
struct KvStore {
    data: HashMap<Vec<u8>, Vec<u8>>,
}

#[async_trait]
impl CommandExecutor for KvStore {
    async fn execute(&mut self, cmd: &Command) -> Result<Vec<u8>, ExecuteError> {
        if cmd.writing {
            self.data
                .insert(cmd.key.as_bytes().to_vec(), cmd.data.clone());
            Ok(cmd.data.clone())
        } else {
            Ok(self
                .data
                .get(cmd.key.as_bytes())
                .cloned()
                .unwrap_or_default())
        }
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();
    let peer = vec![
        "localhost:9000".to_owned(),
        "localhost:9001".to_owned(),
        "localhost:9002".to_owned(),
    ];

    let mut server = Vec::with_capacity(3);
    for c in (0..3).map(|id| Configure::new(3, peer.to_vec(), id, id as u64 + 1)) {
        server.push(Server::new(c, KvStore::default(), MemoryStorage::new()).await);
    }

    let handles: Vec<_> = server
        .into_iter()
        .map(|s| {
            tokio::spawn(timeout(Duration::from_secs(10), async move {
                let _ = s.run().await;
            }))
        })
        .collect();

    debug!("spawn servers");
    sleep(Duration::from_millis(100)).await;

    let mut client = TcpRpcClient::new(Configure::new(3, peer, 0, 1), 0).await;
    let wrote = client.propose(Command::write(1, "k1", "v1")).await;
    info!("wrote {:?}", wrote);

    let read = client.propose(Command::read(2, "k1")).await;
    info!("read back {:?}", read);
    assert_eq!(read.map(|r| r.value), Ok(b"v1".to_vec()));

    // The servers keep running until their timeout expires.
    for h in handles {
        let _ = h.await?;
    }

    Ok(())
}
