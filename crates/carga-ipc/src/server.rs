//! IPC server implementation

use carga_api::{Channel, ClientInfo, Command, Event, Request, Response};
use carga_util::ClientId;
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Capacity of the event fan-out channel
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Message from client to server
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

type Clients = Arc<RwLock<HashMap<ClientId, ClientHandle>>>;

/// IPC Server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Clients,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    response_tx: mpsc::UnboundedSender<String>,
    channels: HashSet<Channel>,
}

impl ClientHandle {
    /// Channel events go to that channel's subscribers; broadcasts go to
    /// every client with at least one subscription
    fn wants(&self, event: &Event) -> bool {
        match &event.channel {
            Some(channel) => self.channels.contains(channel),
            None => !self.channels.is_empty(),
        }
    }
}

impl IpcServer {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self::with_event_buffer(socket_path, DEFAULT_EVENT_BUFFER)
    }

    pub fn with_event_buffer(socket_path: impl AsRef<Path>, event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer);
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

    /// Start listening
    pub async fn start(&mut self) -> IpcResult<()> {
        // Remove a stale socket from a previous run
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner and group only
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    /// Get receiver for server messages
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let uid = get_peer_uid(&stream);
                    let info = match uid {
                        Some(u) => ClientInfo::new().with_uid(u),
                        None => ClientInfo::new(),
                    };

                    info!(client_id = %info.client_id, uid = ?uid, "Client connected");

                    self.handle_client(stream, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, info: ClientInfo) {
        let client_id = info.client_id.clone();
        let (read_half, write_half) = stream.into_split();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<String>();

        {
            let mut clients = self.clients.write().await;
            clients.insert(
                client_id.clone(),
                ClientHandle {
                    response_tx,
                    channels: HashSet::new(),
                },
            );
        }

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
            info,
        });

        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();
        let reader_id = client_id.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(client_id = %reader_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Request>(line) {
                            Ok(request) => {
                                track_subscription(&clients, &reader_id, &request.command).await;

                                let _ = message_tx.send(ServerMessage::Request {
                                    client_id: reader_id.clone(),
                                    request,
                                });
                            }
                            Err(e) => {
                                warn!(client_id = %reader_id, error = %e, "Invalid request");
                            }
                        }
                    }
                    Err(e) => {
                        debug!(client_id = %reader_id, error = %e, "Read error");
                        break;
                    }
                }
            }

            disconnect(&clients, &message_tx, &reader_id).await;
        });

        let event_rx = self.event_tx.subscribe();
        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();

        tokio::spawn(async move {
            write_loop(write_half, response_rx, event_rx, &clients, &client_id).await;
            disconnect(&clients, &message_tx, &client_id).await;
        });
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

    /// Fan an event out to subscribed clients
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
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

async fn track_subscription(clients: &Clients, client_id: &ClientId, command: &Command) {
    let mut clients = clients.write().await;
    let Some(handle) = clients.get_mut(client_id) else {
        return;
    };

    match command {
        Command::Subscribe { channel } => {
            handle.channels.insert(channel.clone());
        }
        Command::Unsubscribe { channel } => {
            handle.channels.remove(channel);
        }
        _ => {}
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut response_rx: mpsc::UnboundedReceiver<String>,
    mut event_rx: broadcast::Receiver<Event>,
    clients: &Clients,
    client_id: &ClientId,
) {
    loop {
        let line = tokio::select! {
            response = response_rx.recv() => match response {
                Some(response) => response,
                // Handle removed, client is gone
                None => break,
            },
            event = event_rx.recv() => match event {
                Ok(event) => {
                    let wanted = {
                        let clients = clients.read().await;
                        clients.get(client_id).is_some_and(|h| h.wants(&event))
                    };
                    if !wanted {
                        continue;
                    }
                    match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode event");
                            continue;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client_id = %client_id, skipped, "Client lagged, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let mut msg = line;
        msg.push('\n');
        if let Err(e) = writer.write_all(msg.as_bytes()).await {
            debug!(client_id = %client_id, error = %e, "Write error");
            break;
        }
    }
}

/// Remove a client once; the first caller reports the disconnect
async fn disconnect(
    clients: &Clients,
    message_tx: &mpsc::UnboundedSender<ServerMessage>,
    client_id: &ClientId,
) {
    let removed = clients.write().await.remove(client_id).is_some();
    if removed {
        let _ = message_tx.send(ServerMessage::ClientDisconnected {
            client_id: client_id.clone(),
        });
    }
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
    use carga_api::EventPayload;
    use carga_util::ShipmentId;
    use tempfile::tempdir;

    fn handle(channels: &[Channel]) -> ClientHandle {
        let (response_tx, _) = mpsc::unbounded_channel();
        ClientHandle {
            response_tx,
            channels: channels.iter().cloned().collect(),
        }
    }

    #[tokio::test]
    async fn test_server_start() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();

        assert!(socket_path.exists());
        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_run_requires_start() {
        let dir = tempdir().unwrap();
        let server = IpcServer::new(dir.path().join("test.sock"));
        assert!(matches!(server.run().await, Err(IpcError::ServerError(_))));
    }

    #[test]
    fn test_channel_routing() {
        let tracking = Channel::Tracking(ShipmentId::new("S1"));
        let other = Channel::Tracking(ShipmentId::new("S2"));
        let subscribed = handle(&[tracking.clone()]);
        let idle = handle(&[]);

        let event = Event::new(Some(tracking), EventPayload::Shutdown);
        assert!(subscribed.wants(&event));
        assert!(!idle.wants(&event));

        let elsewhere = Event::new(Some(other), EventPayload::Shutdown);
        assert!(!subscribed.wants(&elsewhere));

        let broadcast = Event::broadcast(EventPayload::Shutdown);
        assert!(subscribed.wants(&broadcast));
        assert!(!idle.wants(&broadcast));
    }
}
