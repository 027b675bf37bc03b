use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use bgtask::domain::{HintSender, HostEvent, HostState, HostStatus, UiMessage};
use bgtask::infrastructure::coordination::{CoordinationClient, CoordinationServer};

const PATIENCE: Duration = Duration::from_secs(5);

struct Harness {
    addr: SocketAddr,
    hints: mpsc::UnboundedReceiver<UiMessage>,
    events: broadcast::Sender<HostEvent>,
    shutdown: CancellationToken,
    _state: watch::Sender<HostState>,
}

async fn serve() -> Harness {
    let (hint_tx, hints) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(16);
    let (state, state_rx) = watch::channel(HostState::Running);

    let server = CoordinationServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        hint_tx,
        events.clone(),
        state_rx,
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(shutdown.clone()));

    Harness {
        addr,
        hints,
        events,
        shutdown,
        _state: state,
    }
}

#[tokio::test]
async fn posted_hints_reach_the_host() {
    let mut harness = serve().await;
    let client = CoordinationClient::new(harness.addr);

    assert!(client.send_hint(UiMessage::TaskCreated { id: 12 }).await);
    client.post(&UiMessage::StopAlarm).await.unwrap();

    // Each post is its own connection, so arrival order is not guaranteed.
    let mut received = Vec::new();
    for _ in 0..2 {
        let hint = tokio::time::timeout(PATIENCE, harness.hints.recv()).await.unwrap();
        received.push(hint.unwrap());
    }
    assert!(received.contains(&UiMessage::TaskCreated { id: 12 }));
    assert!(received.contains(&UiMessage::StopAlarm));

    harness.shutdown.cancel();
}

#[tokio::test]
async fn subscribers_get_status_then_deliveries() {
    let harness = serve().await;
    let client = CoordinationClient::new(harness.addr);
    let mut stream = client.subscribe().await.unwrap();

    let greeting = tokio::time::timeout(PATIENCE, stream.next()).await.unwrap().unwrap();
    assert_eq!(
        greeting,
        Some(HostEvent::HostStatus {
            status: HostStatus::Running
        })
    );

    harness.events.send(HostEvent::TaskDelivered { id: 3 }).unwrap();
    let delivered = tokio::time::timeout(PATIENCE, stream.next()).await.unwrap().unwrap();
    assert_eq!(delivered, Some(HostEvent::TaskDelivered { id: 3 }));

    harness.shutdown.cancel();
    let bye = tokio::time::timeout(PATIENCE, stream.next()).await.unwrap().unwrap();
    assert_eq!(
        bye,
        Some(HostEvent::HostStatus {
            status: HostStatus::Stopped
        })
    );
    assert_eq!(tokio::time::timeout(PATIENCE, stream.next()).await.unwrap().unwrap(), None);
}

#[tokio::test]
async fn hints_to_an_absent_host_are_dropped() {
    // Grab a free port and release it so nothing listens there.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let client = CoordinationClient::new(addr).with_connect_timeout(Duration::from_millis(200));
    assert!(!client.send_hint(UiMessage::TaskCancelled { id: 1 }).await);
    assert!(client.subscribe().await.is_err());
}

#[tokio::test]
async fn garbage_frames_are_ignored() {
    use tokio::io::AsyncWriteExt;

    let mut harness = serve().await;
    let mut raw = tokio::net::TcpStream::connect(harness.addr).await.unwrap();
    raw.write_all(b"not json\n{\"type\":\"task_edited\",\"id\":8}\n").await.unwrap();
    raw.shutdown().await.unwrap();

    let hint = tokio::time::timeout(PATIENCE, harness.hints.recv()).await.unwrap();
    assert_eq!(hint, Some(UiMessage::TaskEdited { id: 8 }));
    harness.shutdown.cancel();
}

#[tokio::test]
async fn oversized_frames_close_the_connection_without_buffering_them() {
    use bgtask::infrastructure::coordination::MAX_FRAME_SIZE;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut harness = serve().await;
    let mut raw = tokio::net::TcpStream::connect(harness.addr).await.unwrap();
    let flood = vec![b'a'; MAX_FRAME_SIZE * 4];
    // The server may hang up mid-write.
    let _ = tokio::time::timeout(PATIENCE, raw.write_all(&flood)).await;

    let mut seen = Vec::new();
    let closed = tokio::time::timeout(PATIENCE, raw.read_to_end(&mut seen)).await;
    assert!(closed.is_ok(), "server kept an endless frame open");
    assert!(harness.hints.try_recv().is_err());

    // Other clients are unaffected.
    let client = CoordinationClient::new(harness.addr);
    assert!(client.send_hint(UiMessage::TaskEdited { id: 4 }).await);
    let hint = tokio::time::timeout(PATIENCE, harness.hints.recv()).await.unwrap();
    assert_eq!(hint, Some(UiMessage::TaskEdited { id: 4 }));
    harness.shutdown.cancel();
}
