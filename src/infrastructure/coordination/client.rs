use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tracing::debug;

use super::{decode_frame, encode_frame};
use crate::domain::entities::{HintSender, HostEvent, UiMessage};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// UI side of the coordination channel.
#[derive(Debug, Clone)]
pub struct CoordinationClient {
    addr: SocketAddr,
    connect_timeout: Duration,
}

impl CoordinationClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn connect(&self) -> io::Result<TcpStream> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.addr)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no host answered on {}", self.addr),
            )),
        }
    }

    /// Sends one message and hangs up.
    pub async fn post(&self, message: &UiMessage) -> io::Result<()> {
        let mut stream = self.connect().await?;
        let bytes = encode_frame(message)?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        stream.shutdown().await
    }

    /// Opens a long-lived connection that yields host events, starting with the current status.
    pub async fn subscribe(&self) -> io::Result<EventStream> {
        let stream = self.connect().await?;
        let (reader, writer) = stream.into_split();
        Ok(EventStream {
            lines: BufReader::new(reader).lines(),
            _writer: writer,
        })
    }
}

#[async_trait]
impl HintSender for CoordinationClient {
    async fn send_hint(&self, message: UiMessage) -> bool {
        match self.post(&message).await {
            Ok(()) => true,
            Err(e) => {
                // The host re-reads the store on start, so nothing is lost.
                debug!("Host not reachable on {} ({}); hint {:?} dropped", self.addr, e, message);
                false
            }
        }
    }
}

pub struct EventStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
    // Held so the host does not see the connection as closed.
    _writer: tokio::net::tcp::OwnedWriteHalf,
}

impl EventStream {
    /// Next event, or `None` once the host closes the connection. Malformed frames are skipped.
    pub async fn next(&mut self) -> io::Result<Option<HostEvent>> {
        while let Some(line) = self.lines.next_line().await? {
            match decode_frame(&line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => debug!("Skipping malformed host frame: {}", e),
            }
        }
        Ok(None)
    }
}
