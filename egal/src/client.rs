use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use log::{trace, warn};
use tokio::{
    io::WriteHalf,
    net::TcpStream,
    sync::oneshot,
};

use crate::{
    config::Configure,
    message::{Frame, Propose},
    types::{Command, CommandResult},
    util,
};

#[async_trait]
pub trait RpcClient {
    /// Submit a command to a replica and wait for its executed result.
    async fn propose(&mut self, cmd: Command) -> Result<CommandResult, String>;
}

type ResultSender = oneshot::Sender<Result<CommandResult, String>>;

pub struct TcpRpcClient {
    #[allow(dead_code)]
    // this field will be used for reconnects on membership change
    conf: Configure,
    stream: WriteHalf<TcpStream>,
    req_map: Arc<Mutex<HashMap<String, ResultSender>>>,
}

impl TcpRpcClient {
    pub async fn new(conf: Configure, id: usize) -> Self {
        let conn_str = conf
            .peer_addr(id)
            .unwrap_or_else(|| panic!("id {} is not in the configure scope", id));
        let stream = TcpStream::connect(conn_str)
            .await
            .map_err(|e| panic!("connect to node {} failed, {}", id, e))
            .unwrap();

        let req_map: Arc<Mutex<HashMap<String, ResultSender>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let req_map_clone = req_map.clone();
        let (mut read_stream, write_stream) = tokio::io::split(stream);
        tokio::spawn(async move {
            loop {
                match util::recv_frame::<_, Frame>(&mut read_stream).await {
                    Ok(Frame::ProposeResponse(pr)) => {
                        let tx = req_map_clone.lock().unwrap().remove(&pr.cmd_id);
                        match tx {
                            Some(tx) => {
                                let _ = tx.send(pr.result);
                            }
                            None => warn!("response for unknown request {}", pr.cmd_id),
                        }
                    }
                    Ok(frame) => warn!("unexpected frame from the server: {:?}", frame),
                    Err(e) => {
                        trace!("client connection closed, {}", e);
                        return;
                    }
                }
            }
        });

        Self {
            conf,
            stream: write_stream,
            req_map,
        }
    }

    fn register(&self) -> (String, oneshot::Receiver<Result<CommandResult, String>>) {
        let mut map = self.req_map.lock().unwrap();
        let (tx, rx) = oneshot::channel();
        loop {
            let uuid = uuid::Uuid::new_v4();
            let uuid_str = uuid.urn().to_string();
            if map.contains_key(&uuid_str) {
                continue;
            }
            map.insert(uuid_str.clone(), tx);
            return (uuid_str, rx);
        }
    }
}

#[async_trait]
impl RpcClient for TcpRpcClient {
    async fn propose(&mut self, cmd: Command) -> Result<CommandResult, String> {
        trace!("start propose");
        let (cmd_id, rx) = self.register();
        let frame = Frame::Propose(Propose {
            cmd_id,
            command: cmd,
        });
        util::send_frame(&mut self.stream, &frame)
            .await
            .map_err(|e| format!("send propose failed, {}", e))?;
        rx.await.map_err(|_| "connection closed".to_owned())?
    }
}
