use std::{collections::HashMap, marker::PhantomData, sync::Arc, time::Duration};

use futures::stream::{self, StreamExt};
use log::{debug, trace, warn};
use tokio::{
    io::{AsyncWriteExt, WriteHalf},
    net::{TcpListener, TcpStream},
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time,
};

use crate::{
    config::Configure,
    error::RpcError,
    message::{Frame, Message, Propose, ProposeResponse},
    storage::Storage,
    types::{Command, CommandExecutor, CommandResult, Key, Replica, ReplicaId},
    util,
};

/// The interval at which the replica state machine ticks.
const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// One replica process: a TCP endpoint shared by peers and clients, and a
/// single event-loop task that owns the protocol state machine. Peer frames
/// and client proposes flow into the loop through channels; the loop drains
/// the replica's outboxes after every event.
pub struct Server<CE, S>
where
    CE: CommandExecutor + Send + 'static,
    S: Storage + Send + 'static,
{
    listener: TcpListener,
    msg_tx: mpsc::Sender<Message>,
    req_tx: mpsc::Sender<ClientRequest>,
    loop_handle: JoinHandle<()>,
    phantom: PhantomData<(CE, S)>,
}

impl<CE, S> Server<CE, S>
where
    CE: CommandExecutor + Send + 'static,
    S: Storage + Send + 'static,
{
    pub async fn new(conf: Configure, cmd_exe: CE, storage: S) -> Self {
        let addr = conf
            .peer_addr(conf.index())
            .unwrap_or_else(|| panic!("index {} is not in the configure scope", conf.index()))
            .to_owned();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| panic!("bind server address {} error, {}", addr, e))
            .unwrap();

        let replica = Replica::new(&conf, storage);
        let (msg_tx, msg_rx) = mpsc::channel(1024);
        let (req_tx, req_rx) = mpsc::channel(1024);
        let peers = PeerLinks::new(conf);
        let loop_handle = tokio::spawn(event_loop(replica, cmd_exe, peers, msg_rx, req_rx));

        Self {
            listener,
            msg_tx,
            req_tx,
            loop_handle,
            phantom: PhantomData,
        }
    }

    /// Accept peer and client connections until the listener fails.
    pub async fn run(&self) -> Result<(), RpcError> {
        loop {
            let (stream, _) = self.listener.accept().await?;
            trace!("got a connection");
            let msg_tx = self.msg_tx.clone();
            let req_tx = self.req_tx.clone();
            tokio::spawn(async move {
                handle_connection(stream, msg_tx, req_tx).await;
            });
        }
    }

    pub fn stop(&self) {
        self.loop_handle.abort();
    }
}

/// A client propose paired with the channel that reaches its connection's
/// writer task.
struct ClientRequest {
    propose: Propose,
    resp: mpsc::Sender<ProposeResponse>,
}

/// What the event loop remembers about an in-flight request: responses are
/// paired with executed commands through the command's key.
struct PendingRequest {
    cmd_id: String,
    resp: mpsc::Sender<ProposeResponse>,
}

async fn handle_connection(
    stream: TcpStream,
    msg_tx: mpsc::Sender<Message>,
    req_tx: mpsc::Sender<ClientRequest>,
) {
    let (mut read, write) = tokio::io::split(stream);
    let (resp_tx, resp_rx) = mpsc::channel(64);
    tokio::spawn(write_responses(write, resp_rx));

    loop {
        match util::recv_frame::<_, Frame>(&mut read).await {
            Ok(Frame::Protocol(m)) => {
                if msg_tx.send(m).await.is_err() {
                    return;
                }
            }
            Ok(Frame::Propose(propose)) => {
                let req = ClientRequest {
                    propose,
                    resp: resp_tx.clone(),
                };
                if req_tx.send(req).await.is_err() {
                    return;
                }
            }
            Ok(Frame::ProposeResponse(r)) => {
                warn!("unexpected response frame from a peer: {:?}", r);
            }
            Err(e) => {
                trace!("connection closed, {}", e);
                return;
            }
        }
    }
}

async fn write_responses(
    mut write: WriteHalf<TcpStream>,
    mut resp_rx: mpsc::Receiver<ProposeResponse>,
) {
    while let Some(resp) = resp_rx.recv().await {
        if let Err(e) = util::send_frame(&mut write, &Frame::ProposeResponse(resp)).await {
            trace!("client connection closed, {}", e);
            return;
        }
    }
    let _ = write.shutdown().await;
}

async fn event_loop<CE, S>(
    mut replica: Replica<S>,
    mut cmd_exe: CE,
    mut peers: PeerLinks,
    mut msg_rx: mpsc::Receiver<Message>,
    mut req_rx: mpsc::Receiver<ClientRequest>,
) where
    CE: CommandExecutor + Send,
    S: Storage + Send,
{
    let mut tick = time::interval(TICK_INTERVAL);
    let mut pending: HashMap<Key, PendingRequest> = HashMap::new();

    loop {
        tokio::select! {
            _ = tick.tick() => replica.tick(),
            msg = msg_rx.recv() => match msg {
                Some(m) => replica.step(m),
                None => return,
            },
            req = req_rx.recv() => match req {
                Some(req) => {
                    trace!("handle propose {}", req.propose.command);
                    pending.insert(
                        req.propose.command.key.clone(),
                        PendingRequest {
                            cmd_id: req.propose.cmd_id,
                            resp: req.resp,
                        },
                    );
                    replica.request(req.propose.command);
                }
                None => return,
            },
        }

        let ready = replica.ready();
        peers.send_all(ready.messages).await;
        for cmd in ready.executed_commands {
            apply_executed(&mut cmd_exe, &mut pending, cmd).await;
        }
    }
}

/// Apply one executed command to the application state machine and, when the
/// local replica was its command leader, answer the waiting client.
async fn apply_executed<CE>(
    cmd_exe: &mut CE,
    pending: &mut HashMap<Key, PendingRequest>,
    cmd: Command,
) where
    CE: CommandExecutor + Send,
{
    let result = cmd_exe.execute(&cmd).await;
    let Some(waiter) = pending.remove(&cmd.key) else {
        if let Err(e) = result {
            warn!("applying command {} failed, {}", cmd, e);
        }
        return;
    };

    debug!("executed command {} as command leader", cmd);
    let response = ProposeResponse {
        cmd_id: waiter.cmd_id,
        result: result
            .map(|value| CommandResult {
                key: cmd.key.clone(),
                value,
            })
            .map_err(|e| e.to_string()),
    };
    let _ = waiter.resp.send(response).await;
}

/// Outbound connections to the other replicas, established lazily on first
/// send. A peer whose connection fails is marked unavailable and its traffic
/// is dropped until the process restarts; quorums tolerate F such peers.
struct PeerLinks {
    conf: Configure,
    conns: HashMap<ReplicaId, Arc<Mutex<TcpStream>>>,
    unavailable: Vec<ReplicaId>,
}

impl PeerLinks {
    fn new(conf: Configure) -> Self {
        Self {
            conf,
            conns: HashMap::new(),
            unavailable: Vec::new(),
        }
    }

    /// Deliver `msgs` grouped per destination, preserving the outbox order
    /// within each destination stream. Destinations send concurrently.
    async fn send_all(&mut self, msgs: Vec<Message>) {
        if msgs.is_empty() {
            return;
        }

        let mut outboxes: HashMap<ReplicaId, Vec<Message>> = HashMap::new();
        for m in msgs {
            outboxes.entry(m.to).or_default().push(m);
        }

        let mut jobs = Vec::new();
        for (to, batch) in outboxes {
            if self.unavailable.contains(&to) {
                trace!("dropping {} message(s) for unavailable node {:?}", batch.len(), to);
                continue;
            }
            match self.link(to).await {
                Some(conn) => jobs.push((to, conn, batch)),
                None => self.mark_unavailable(to),
            }
        }

        let cnt = jobs.len();
        let failed: Vec<ReplicaId> = stream::iter(jobs)
            .map(|(to, conn, batch)| async move {
                for m in batch {
                    let frame = Frame::Protocol(m);
                    if let Err(e) = util::send_frame_arc(&conn, &frame).await {
                        warn!("send to node {:?} failed, {}", to, e);
                        return Some(to);
                    }
                }
                None
            })
            .buffer_unordered(cnt.max(1))
            .filter_map(|failure| async move { failure })
            .collect()
            .await;
        for to in failed {
            self.mark_unavailable(to);
        }
    }

    async fn link(&mut self, to: ReplicaId) -> Option<Arc<Mutex<TcpStream>>> {
        let addr = self
            .conf
            .peer_addr(*to)
            .unwrap_or_else(|| panic!("message found with unknown destination: {:?}", to));
        if let Some(conn) = self.conns.get(&to) {
            return Some(conn.clone());
        }
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let conn = Arc::new(Mutex::new(stream));
                self.conns.insert(to, conn.clone());
                Some(conn)
            }
            Err(e) => {
                warn!("connect to node {:?} at {} failed, {}", to, addr, e);
                None
            }
        }
    }

    fn mark_unavailable(&mut self, to: ReplicaId) {
        if !self.unavailable.contains(&to) {
            warn!("detected node {:?} unavailable", to);
            self.unavailable.push(to);
        }
        self.conns.remove(&to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecuteError;
    use crate::types::MockCommandExecutor;

    #[tokio::test]
    async fn apply_executed_answers_the_waiting_client() {
        let mut exe = MockCommandExecutor::new();
        exe.expect_execute()
            .times(2)
            .returning(|cmd: &Command| Ok(cmd.data.clone()));

        let (tx, mut rx) = mpsc::channel(1);
        let mut pending = HashMap::new();
        pending.insert(
            Key::from("a"),
            PendingRequest {
                cmd_id: "req-1".to_owned(),
                resp: tx,
            },
        );

        // A command we led: the waiter gets the result.
        apply_executed(&mut exe, &mut pending, Command::write(1, "a", "1")).await;
        let resp = rx.recv().await.unwrap();
        assert_eq!(resp.cmd_id, "req-1");
        assert_eq!(
            resp.result,
            Ok(CommandResult {
                key: Key::from("a"),
                value: b"1".to_vec(),
            })
        );

        // A command some other replica led: applied, nobody to answer.
        apply_executed(&mut exe, &mut pending, Command::write(2, "b", "2")).await;
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn apply_executed_reports_application_errors() {
        let mut exe = MockCommandExecutor::new();
        exe.expect_execute()
            .times(1)
            .returning(|cmd: &Command| Err(ExecuteError::InvalidCommand(cmd.to_string())));

        let (tx, mut rx) = mpsc::channel(1);
        let mut pending = HashMap::new();
        pending.insert(
            Key::from("a"),
            PendingRequest {
                cmd_id: "req-2".to_owned(),
                resp: tx,
            },
        );

        apply_executed(&mut exe, &mut pending, Command::read(3, "a")).await;
        let resp = rx.recv().await.unwrap();
        assert!(resp.result.is_err());
    }
}
