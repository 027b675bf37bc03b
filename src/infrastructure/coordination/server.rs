use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MAX_FRAME_SIZE, decode_frame, encode_frame};
use crate::domain::entities::{HostEvent, HostState, HostStatus, UiMessage};

/// Host side of the coordination channel.
///
/// Forwards every well-formed [`UiMessage`] into the host's wake channel and streams
/// [`HostEvent`]s to every connected client.
pub struct CoordinationServer {
    listener: TcpListener,
    hints: mpsc::UnboundedSender<UiMessage>,
    events: broadcast::Sender<HostEvent>,
    state: watch::Receiver<HostState>,
}

impl CoordinationServer {
    pub async fn bind(
        addr: SocketAddr,
        hints: mpsc::UnboundedSender<UiMessage>,
        events: broadcast::Sender<HostEvent>,
        state: watch::Receiver<HostState>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            hints,
            events,
            state,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Coordination channel listening on {}", addr),
            Err(e) => warn!("Coordination channel listening on unknown address: {}", e),
        }

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!("Coordination client connected from {}", peer);
                            let connection = Connection {
                                hints: self.hints.clone(),
                                events: self.events.subscribe(),
                                status: HostStatus::from(*self.state.borrow()),
                            };
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = connection.serve(stream, shutdown).await {
                                    debug!("Coordination client {} dropped: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => warn!("Coordination accept error: {}", e),
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!("Coordination channel shutting down");
                    break;
                }
            }
        }
    }
}

struct Connection {
    hints: mpsc::UnboundedSender<UiMessage>,
    events: broadcast::Receiver<HostEvent>,
    status: HostStatus,
}

impl Connection {
    async fn serve(mut self, stream: TcpStream, shutdown: CancellationToken) -> io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        // A client that only posts a hint may already be gone; keep reading its frame anyway.
        let greeting = encode_frame(&HostEvent::HostStatus {
            status: self.status,
        })?;
        let mut writer_open = writer.write_all(&greeting).await.is_ok();

        loop {
            tokio::select! {
                result = read_frame(&mut reader, &mut line) => {
                    let read = result?;
                    if line.len() > MAX_FRAME_SIZE && !line.ends_with('\n') {
                        warn!("Closing coordination connection after an oversized frame");
                        break;
                    }
                    if read == 0 {
                        break;
                    }
                    forward_frame(&self.hints, &line);
                    line.clear();
                }
                event = self.events.recv(), if writer_open => {
                    match event {
                        Ok(event) => {
                            let bytes = encode_frame(&event)?;
                            writer_open = writer.write_all(&bytes).await.is_ok();
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Coordination client lagged, {} events skipped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = shutdown.cancelled() => {
                    if writer_open {
                        let bye = encode_frame(&HostEvent::HostStatus { status: HostStatus::Stopped })?;
                        let _ = writer.write_all(&bye).await;
                    }
                    break;
                }
            }
        }

        Ok(())
    }
}

/// `read_line` that stops buffering one byte past `MAX_FRAME_SIZE`.
///
/// A cancelled read leaves its partial bytes in `line`, so the budget counts them.
async fn read_frame<R>(reader: &mut R, line: &mut String) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let budget = (MAX_FRAME_SIZE + 1).saturating_sub(line.len()) as u64;
    let mut limited = reader.take(budget);
    limited.read_line(line).await
}

fn forward_frame(hints: &mpsc::UnboundedSender<UiMessage>, line: &str) {
    if line.len() > MAX_FRAME_SIZE {
        warn!("Dropping oversized coordination frame ({} bytes)", line.len());
        return;
    }
    if line.trim().is_empty() {
        return;
    }
    match decode_frame::<UiMessage>(line) {
        Ok(message) => {
            debug!("Coordination hint received: {:?}", message);
            if hints.send(message).is_err() {
                debug!("Execution loop is not listening; hint dropped");
            }
        }
        Err(e) => warn!("Ignoring malformed coordination frame: {}", e),
    }
}
