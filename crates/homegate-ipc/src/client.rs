//! IPC client implementation

use homegate_api::{
    Command, Event, Request, Response, ResponsePayload, ResponseResult, API_VERSION,
};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// IPC client for connecting to homegated
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    /// Connect to homegated
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
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

        let line = read_line(&mut self.reader).await?;
        let response: Response = serde_json::from_str(&line)?;
        check_version(response.api_version)?;

        Ok(response)
    }

    /// Send a command and unwrap the payload, turning protocol errors into
    /// [`IpcError::ServerError`]
    pub async fn request(&mut self, command: Command) -> IpcResult<ResponsePayload> {
        match self.send(command).await?.result {
            ResponseResult::Ok(payload) => Ok(payload),
            ResponseResult::Err(e) => Err(IpcError::ServerError(format!(
                "{:?}: {}",
                e.code, e.message
            ))),
        }
    }

    /// Subscribe to events and consume this client to return an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        self.request(Command::SubscribeEvents).await?;

        Ok(EventStream {
            reader: self.reader,
            _writer: self.writer,
        })
    }
}

/// Stream of events from homegated
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
    // Held so the daemon does not see a half-closed connection
    _writer: OwnedWriteHalf,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        let line = read_line(&mut self.reader).await?;
        let event: Event = serde_json::from_str(&line)?;
        check_version(event.api_version)?;
        Ok(event)
    }
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> IpcResult<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(IpcError::ConnectionClosed);
    }
    Ok(line.trim().to_string())
}

fn check_version(actual: u32) -> IpcResult<()> {
    if actual != API_VERSION {
        return Err(IpcError::VersionMismatch {
            expected: API_VERSION,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn connect_without_daemon_is_disconnect() {
        let dir = tempdir().unwrap();
        let err = IpcClient::connect(dir.path().join("missing.sock"))
            .await
            .err()
            .unwrap();
        assert!(err.is_disconnect());
    }

    #[test]
    fn version_check() {
        assert!(check_version(API_VERSION).is_ok());
        assert!(matches!(
            check_version(API_VERSION + 1),
            Err(IpcError::VersionMismatch { .. })
        ));
    }
}
