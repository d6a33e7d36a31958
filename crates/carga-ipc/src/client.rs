//! IPC client implementation

use carga_api::{Channel, Command, Event, Request, Response, ResponseResult};
use std::collections::VecDeque;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::{IpcError, IpcResult};

/// A line from the server: responses carry a `request_id`, events don't
enum Incoming {
    Response(Response),
    Event(Event),
}

fn parse_line(line: &str) -> IpcResult<Incoming> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    if value.get("request_id").is_some() {
        Ok(Incoming::Response(serde_json::from_value(value)?))
    } else {
        Ok(Incoming::Event(serde_json::from_value(value)?))
    }
}

/// IPC Client for connecting to cargad
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
    /// Events that arrived while waiting for a response
    pending: VecDeque<Event>,
}

impl IpcClient {
    /// Connect to cargad
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
            pending: VecDeque::new(),
        })
    }

    /// Send a command and wait for its response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;

        loop {
            match read_incoming(&mut self.reader).await? {
                Incoming::Response(response) if response.request_id == request_id => {
                    return Ok(response);
                }
                Incoming::Response(response) => {
                    return Err(IpcError::ServerError(format!(
                        "Response for request {} while waiting for {}",
                        response.request_id, request_id
                    )));
                }
                Incoming::Event(event) => self.pending.push_back(event),
            }
        }
    }

    /// Subscribe to channels and consume this client to return an event stream
    pub async fn subscribe(mut self, channels: &[Channel]) -> IpcResult<EventStream> {
        for channel in channels {
            let response = self
                .send(Command::Subscribe {
                    channel: channel.clone(),
                })
                .await?;

            if let ResponseResult::Err(e) = response.result {
                return Err(IpcError::ServerError(e.message));
            }
        }

        Ok(EventStream {
            reader: self.reader,
            pending: self.pending,
        })
    }
}

async fn read_incoming(reader: &mut BufReader<OwnedReadHalf>) -> IpcResult<Incoming> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(IpcError::ConnectionClosed);
    }
    parse_line(line.trim())
}

/// Stream of events from cargad
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
    pending: VecDeque<Event>,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }

        loop {
            match read_incoming(&mut self.reader).await? {
                Incoming::Event(event) => return Ok(event),
                // No requests are outstanding once streaming
                Incoming::Response(_) => continue,
            }
        }
    }
}
