//! IPC server implementation

use homegate_api::{
    ClientInfo, ClientRole, Command, ErrorCode, ErrorInfo, Event, Request, Response,
};
use homegate_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Capacity of the event fan-out channel; slow subscribers skip what they miss
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Message from the IPC layer to the service
#[derive(Debug)]
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

type ClientMap = Arc<RwLock<HashMap<ClientId, ClientHandle>>>;

/// IPC Server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: ClientMap,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    info: ClientInfo,
    response_tx: mpsc::UnboundedSender<String>,
    subscribed: bool,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one left by a previous run
    pub async fn start(&mut self) -> IpcResult<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner and group only: agents run in the family group
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    /// Take the receiver for server messages; only the first call gets it
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections until the listener fails
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        let server_uid = nix::unistd::getuid().as_raw();

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = ClientId::new();
                    let uid = get_peer_uid(&stream);
                    let role = role_for_uid(uid, server_uid);

                    let mut info = ClientInfo::new(role);
                    info.client_id = client_id.clone();
                    if let Some(u) = uid {
                        info = info.with_uid(u);
                    }

                    info!(client_id = %client_id, uid = ?uid, role = ?role, "Client connected");

                    self.handle_client(stream, client_id, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId, info: ClientInfo) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<String>();

        self.clients.write().await.insert(
            client_id.clone(),
            ClientHandle {
                info: info.clone(),
                response_tx: response_tx.clone(),
                subscribed: false,
            },
        );

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
            info,
        });

        tokio::spawn(read_requests(
            read_half,
            client_id.clone(),
            self.clients.clone(),
            self.message_tx.clone(),
            response_tx,
        ));

        tokio::spawn(write_outgoing(
            write_half,
            client_id,
            self.clients.clone(),
            self.message_tx.clone(),
            response_rx,
            self.event_tx.subscribe(),
        ));
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Queue an event for one client behind any responses already queued
    pub async fn send_event(&self, client_id: &ClientId, event: Event) -> IpcResult<()> {
        let json = serde_json::to_string(&event)?;

        let clients = self.clients.read().await;
        match clients.get(client_id) {
            Some(handle) => handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed),
            None => Err(IpcError::ConnectionClosed),
        }
    }

    /// Broadcast an event to all subscribed clients
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub async fn get_client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|h| h.info.clone())
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Number of clients currently receiving events
    pub async fn subscriber_count(&self) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|h| h.subscribed)
            .count()
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Map a peer UID to its role: root and the service's own user administer,
/// every other local user is a monitoring agent.
pub fn role_for_uid(peer_uid: Option<u32>, server_uid: u32) -> ClientRole {
    match peer_uid {
        Some(0) => ClientRole::Admin,
        Some(u) if u == server_uid => ClientRole::Admin,
        Some(_) => ClientRole::Agent,
        None => ClientRole::Observer,
    }
}

async fn read_requests(
    read_half: OwnedReadHalf,
    client_id: ClientId,
    clients: ClientMap,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    response_tx: mpsc::UnboundedSender<String>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(client_id = %client_id, "Client disconnected (EOF)");
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<Request>(line) {
                    Ok(request) => {
                        // Flip the flag before the service answers so no event
                        // published after the reply can be missed
                        let subscribed = match request.command {
                            Command::SubscribeEvents => Some(true),
                            Command::UnsubscribeEvents => Some(false),
                            _ => None,
                        };
                        if let Some(subscribed) = subscribed
                            && let Some(handle) = clients.write().await.get_mut(&client_id)
                        {
                            handle.subscribed = subscribed;
                        }

                        let _ = message_tx.send(ServerMessage::Request {
                            client_id: client_id.clone(),
                            request,
                        });
                    }
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Invalid request");
                        let response = Response::error(
                            salvage_request_id(line),
                            ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string()),
                        );
                        if let Ok(json) = serde_json::to_string(&response) {
                            let _ = response_tx.send(json);
                        }
                    }
                }
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Read error");
                break;
            }
        }
    }

    // Dropping the last response sender stops the writer
    clients.write().await.remove(&client_id);
}

async fn write_outgoing(
    mut writer: OwnedWriteHalf,
    client_id: ClientId,
    clients: ClientMap,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    mut response_rx: mpsc::UnboundedReceiver<String>,
    mut event_rx: broadcast::Receiver<Event>,
) {
    loop {
        tokio::select! {
            response = response_rx.recv() => {
                let Some(mut msg) = response else { break };
                msg.push('\n');
                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                    debug!(client_id = %client_id, error = %e, "Write error");
                    break;
                }
            }

            event = event_rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(client_id = %client_id, skipped, "Subscriber lagging, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let is_subscribed = clients
                    .read()
                    .await
                    .get(&client_id)
                    .map(|h| h.subscribed)
                    .unwrap_or(false);
                if !is_subscribed {
                    continue;
                }

                if let Ok(mut msg) = serde_json::to_string(&event) {
                    msg.push('\n');
                    if let Err(e) = writer.write_all(msg.as_bytes()).await {
                        debug!(client_id = %client_id, error = %e, "Event write error");
                        break;
                    }
                }
            }
        }
    }

    let _ = message_tx.send(ServerMessage::ClientDisconnected {
        client_id: client_id.clone(),
    });

    clients.write().await.remove(&client_id);
}

/// Best-effort request id from a line that failed to parse as a request
fn salvage_request_id(line: &str) -> u64 {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("request_id").and_then(|id| id.as_u64()))
        .unwrap_or(0)
}

/// Get peer UID from Unix socket
fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IpcClient;
    use homegate_api::{EventPayload, ResponsePayload, ResponseResult};
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_server_start() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("nested").join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();

        assert!(socket_path.exists());
        let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);

        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn run_requires_start() {
        let dir = tempdir().unwrap();
        let server = IpcServer::new(dir.path().join("test.sock"));
        assert!(matches!(server.run().await, Err(IpcError::ServerError(_))));
    }

    #[test]
    fn roles_from_peer_uid() {
        assert_eq!(role_for_uid(Some(0), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1000), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1001), 1000), ClientRole::Agent);
        assert_eq!(role_for_uid(None, 1000), ClientRole::Observer);
    }

    #[test]
    fn request_id_salvaged_from_bad_command() {
        assert_eq!(
            salvage_request_id(r#"{"request_id":9,"command":{"type":"nope"}}"#),
            9
        );
        assert_eq!(salvage_request_id("not json"), 0);
    }

    async fn started_server(dir: &tempfile::TempDir) -> Arc<IpcServer> {
        let mut server = IpcServer::new(dir.path().join("test.sock"));
        server.start().await.unwrap();
        let server = Arc::new(server);

        let accept = server.clone();
        tokio::spawn(async move {
            let _ = accept.run().await;
        });
        server
    }

    /// Answer every request with Pong or Subscribed until the channel closes
    fn spawn_responder(
        server: Arc<IpcServer>,
        mut messages: mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                if let ServerMessage::Request { client_id, request } = msg {
                    let payload = match request.command {
                        Command::SubscribeEvents => ResponsePayload::Subscribed {
                            client_id: client_id.clone(),
                        },
                        _ => ResponsePayload::Pong,
                    };
                    let _ = server
                        .send_response(&client_id, Response::success(request.request_id, payload))
                        .await;
                }
            }
        });
    }

    #[tokio::test]
    async fn request_response_round_trip() {
        let dir = tempdir().unwrap();
        let server = started_server(&dir).await;
        let mut messages = server.take_message_receiver().await.unwrap();
        assert!(server.take_message_receiver().await.is_none());

        let mut client = IpcClient::connect(server.socket_path()).await.unwrap();

        match messages.recv().await.unwrap() {
            ServerMessage::ClientConnected { info, .. } => {
                // Test process connects as itself
                assert_eq!(info.role, ClientRole::Admin);
                assert_eq!(info.uid, Some(nix::unistd::getuid().as_raw()));
            }
            other => panic!("expected ClientConnected, got {:?}", other),
        }

        spawn_responder(server.clone(), messages);

        let response = client.send(Command::Ping).await.unwrap();
        assert_eq!(response.request_id, 1);
        assert!(matches!(
            response.result,
            ResponseResult::Ok(ResponsePayload::Pong)
        ));

        let response = client.send(Command::GetStatus).await.unwrap();
        assert_eq!(response.request_id, 2);
    }

    #[tokio::test]
    async fn malformed_line_gets_error_response() {
        let dir = tempdir().unwrap();
        let server = started_server(&dir).await;
        let _messages = server.take_message_receiver().await.unwrap();

        let stream = UnixStream::connect(server.socket_path()).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(b"{\"request_id\":4,\"api_version\":1,\"command\":{\"type\":\"launch_rockets\"}}\n")
            .await
            .unwrap();

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: Response = serde_json::from_str(line.trim()).unwrap();

        assert_eq!(response.request_id, 4);
        match response.result {
            ResponseResult::Err(e) => assert_eq!(e.code, ErrorCode::InvalidRequest),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn events_reach_subscribers_only() {
        let dir = tempdir().unwrap();
        let server = started_server(&dir).await;
        let messages = server.take_message_receiver().await.unwrap();
        spawn_responder(server.clone(), messages);

        let mut bystander = IpcClient::connect(server.socket_path()).await.unwrap();
        let subscriber = IpcClient::connect(server.socket_path()).await.unwrap();
        let mut events = subscriber.subscribe().await.unwrap();
        assert_eq!(server.subscriber_count().await, 1);

        server.broadcast_event(Event::new(EventPayload::PresenceChanged { at_home: true }));

        let event = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::PresenceChanged { at_home: true }
        ));

        // The bystander's next line is its own response, not the event
        let response = bystander.send(Command::Ping).await.unwrap();
        assert!(matches!(
            response.result,
            ResponseResult::Ok(ResponsePayload::Pong)
        ));
    }

    #[tokio::test]
    async fn disconnect_is_reported() {
        let dir = tempdir().unwrap();
        let server = started_server(&dir).await;
        let mut messages = server.take_message_receiver().await.unwrap();

        let client = IpcClient::connect(server.socket_path()).await.unwrap();
        let connected_id = match messages.recv().await.unwrap() {
            ServerMessage::ClientConnected { client_id, .. } => client_id,
            other => panic!("expected ClientConnected, got {:?}", other),
        };
        assert_eq!(server.client_count().await, 1);

        drop(client);

        let msg = tokio::time::timeout(Duration::from_secs(2), messages.recv())
            .await
            .unwrap()
            .unwrap();
        match msg {
            ServerMessage::ClientDisconnected { client_id } => assert_eq!(client_id, connected_id),
            other => panic!("expected ClientDisconnected, got {:?}", other),
        }
        assert_eq!(server.client_count().await, 0);
    }
}
