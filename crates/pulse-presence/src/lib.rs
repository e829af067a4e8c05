//! Live agent-presence channel.
//!
//! One background task owns exactly one WebSocket connection and at most
//! one pending reconnect delay at a time; every new connection attempt
//! supersedes whatever came before it. Faults never propagate to the
//! caller: a dead channel degrades to a one-shot REST pull and a scheduled
//! reconnect, and the published count keeps its last-known-good value
//! through any failure.

use futures_util::{SinkExt, StreamExt};
use pulse_client::ApiClient;
use pulse_core::presence::count_from_frame;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    ClosedClean,
    ClosedError,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub ws_url: Url,
    pub reconnect_delay: Duration,
}

impl PresenceConfig {
    pub fn new(ws_url: Url) -> Self {
        Self {
            ws_url,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

#[derive(Debug)]
enum Command {
    Refresh,
    Teardown,
}

/// Handle to the channel task. Dropping it (or calling [`teardown`]) shuts
/// the task down cleanly; both are safe at any time and any state.
///
/// [`teardown`]: PresenceChannel::teardown
pub struct PresenceChannel {
    cmd_tx: mpsc::Sender<Command>,
    count_rx: watch::Receiver<u64>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl PresenceChannel {
    /// Spawn the channel task and start connecting immediately.
    pub fn connect(config: PresenceConfig, fallback: ApiClient) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (count_tx, count_rx) = watch::channel(0);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(channel_loop(config, fallback, cmd_rx, count_tx, state_tx));
        Self {
            cmd_tx,
            count_rx,
            state_rx,
        }
    }

    /// Observe the online-agent count. Last-known-good: the value only
    /// changes on a successfully decoded frame or fallback pull.
    pub fn counts(&self) -> watch::Receiver<u64> {
        self.count_rx.clone()
    }

    pub fn count(&self) -> u64 {
        *self.count_rx.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn states(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Ask for a fresh count: forces a request over the open channel, or
    /// short-circuits a pending reconnect delay when the channel is down.
    pub async fn refresh(&self) {
        let _ = self.cmd_tx.send(Command::Refresh).await;
    }

    /// Clean shutdown. Cancels any pending reconnect, closes the socket
    /// with a normal close, and ends the task. Safe to call repeatedly.
    pub async fn teardown(&self) {
        let _ = self.cmd_tx.send(Command::Teardown).await;
    }
}

async fn channel_loop(
    config: PresenceConfig,
    fallback: ApiClient,
    mut cmd_rx: mpsc::Receiver<Command>,
    count_tx: watch::Sender<u64>,
    state_tx: watch::Sender<ConnectionState>,
) {
    loop {
        state_tx.send_replace(ConnectionState::Connecting);
        let mut socket = match connect_async(config.ws_url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(err) => {
                warn!("presence_connect_error: {err}");
                state_tx.send_replace(ConnectionState::ClosedError);
                pull_count(&fallback, &count_tx).await;
                if !wait_reconnect(&mut cmd_rx, config.reconnect_delay).await {
                    state_tx.send_replace(ConnectionState::ClosedClean);
                    return;
                }
                continue;
            }
        };

        debug!("presence_connected");
        state_tx.send_replace(ConnectionState::Open);
        if send_count_request(&mut socket, false).await.is_err() {
            warn!("presence_request_error");
            let _ = socket.close(None).await;
            state_tx.send_replace(ConnectionState::ClosedError);
            pull_count(&fallback, &count_tx).await;
            if !wait_reconnect(&mut cmd_rx, config.reconnect_delay).await {
                state_tx.send_replace(ConnectionState::ClosedClean);
                return;
            }
            continue;
        }

        match drive_socket(&mut socket, &mut cmd_rx, &fallback, &count_tx).await {
            Disposition::Teardown => {
                let _ = socket
                    .close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client teardown".into(),
                    }))
                    .await;
                info!("presence_closed: teardown");
                state_tx.send_replace(ConnectionState::ClosedClean);
                return;
            }
            Disposition::RemoteClean => {
                info!("presence_closed: remote clean close");
                state_tx.send_replace(ConnectionState::ClosedClean);
                // No automatic reconnection after a clean close; an
                // explicit refresh starts over from scratch.
                if !wait_refresh(&mut cmd_rx).await {
                    return;
                }
            }
            Disposition::Lost => {
                warn!("presence_connection_lost");
                state_tx.send_replace(ConnectionState::ClosedError);
                pull_count(&fallback, &count_tx).await;
                if !wait_reconnect(&mut cmd_rx, config.reconnect_delay).await {
                    state_tx.send_replace(ConnectionState::ClosedClean);
                    return;
                }
            }
        }
    }
}

enum Disposition {
    Teardown,
    RemoteClean,
    Lost,
}

async fn drive_socket(
    socket: &mut Socket,
    cmd_rx: &mut mpsc::Receiver<Command>,
    fallback: &ApiClient,
    count_tx: &watch::Sender<u64>,
) -> Disposition {
    loop {
        tokio::select! {
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&text, fallback, count_tx).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    return if is_clean_close(frame.as_ref()) {
                        Disposition::RemoteClean
                    } else {
                        Disposition::Lost
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("presence_socket_error: {err}");
                    return Disposition::Lost;
                }
                None => return Disposition::Lost,
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Refresh) => {
                    if send_count_request(socket, true).await.is_err() {
                        return Disposition::Lost;
                    }
                }
                Some(Command::Teardown) | None => return Disposition::Teardown,
            },
        }
    }
}

async fn handle_frame(text: &str, fallback: &ApiClient, count_tx: &watch::Sender<u64>) {
    match count_from_frame(text) {
        Some(count) => {
            debug!("presence_count: {count}");
            count_tx.send_replace(count);
        }
        None => {
            warn!("presence_frame_undecodable");
            pull_count(fallback, count_tx).await;
        }
    }
}

/// Park until an explicit refresh asks for a new connection; `false` on
/// teardown or a dropped handle.
async fn wait_refresh(cmd_rx: &mut mpsc::Receiver<Command>) -> bool {
    matches!(cmd_rx.recv().await, Some(Command::Refresh))
}

/// Returns `true` when the delay elapsed (or a refresh cut it short) and a
/// reconnect should happen; `false` on teardown or a dropped handle.
async fn wait_reconnect(cmd_rx: &mut mpsc::Receiver<Command>, delay: Duration) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    tokio::select! {
        _ = &mut sleep => true,
        cmd = cmd_rx.recv() => matches!(cmd, Some(Command::Refresh)),
    }
}

async fn send_count_request(socket: &mut Socket, refresh: bool) -> Result<(), ()> {
    let request = if refresh {
        json!({"action": "get_online_count", "type": "online_agents", "refresh": true})
    } else {
        json!({"action": "get_online_count", "type": "online_agents"})
    };
    socket
        .send(Message::Text(request.to_string()))
        .await
        .map_err(|_| ())
}

fn is_clean_close(frame: Option<&CloseFrame>) -> bool {
    matches!(frame, Some(frame) if frame.code == CloseCode::Normal)
}

async fn pull_count(fallback: &ApiClient, count_tx: &watch::Sender<u64>) {
    match fallback.agent_count().await {
        Ok(count) => {
            debug!("presence_pull_count: {count}");
            count_tx.send_replace(count);
        }
        Err(err) => {
            // Keep the last-known-good value on a failed pull.
            warn!("presence_pull_error: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_client::Session;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    const WAIT: Duration = Duration::from_secs(2);

    /// Fallback client pointed at a dead port so pulls fail fast and the
    /// last-known-good policy is what keeps the count stable.
    fn dead_fallback() -> ApiClient {
        let base = Url::parse("http://127.0.0.1:9/api/").expect("test url");
        ApiClient::new(base, Session::new())
    }

    fn config(addr: std::net::SocketAddr, reconnect_delay: Duration) -> PresenceConfig {
        PresenceConfig {
            ws_url: Url::parse(&format!("ws://{addr}/onlineag")).expect("test url"),
            reconnect_delay,
        }
    }

    async fn bind() -> (TcpListener, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        (listener, addr)
    }

    #[tokio::test]
    async fn counts_flow_and_refresh_is_forwarded() {
        let (listener, addr) = bind().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut socket = accept_async(stream).await.expect("handshake");

            // The channel asks for the count right after opening.
            let first = socket.next().await.expect("first frame").expect("ws frame");
            let request: serde_json::Value =
                serde_json::from_str(first.to_text().expect("text frame")).expect("json");
            assert_eq!(request["action"], "get_online_count");
            assert_eq!(request["type"], "online_agents");
            assert!(request.get("refresh").is_none());

            socket
                .send(Message::Text(r#"{"online_count": 7}"#.to_string()))
                .await
                .expect("send count");

            // A refresh arrives with the force flag set.
            let second = socket.next().await.expect("second frame").expect("ws frame");
            let request: serde_json::Value =
                serde_json::from_str(second.to_text().expect("text frame")).expect("json");
            assert_eq!(request["refresh"], true);

            socket
                .send(Message::Text("5".to_string()))
                .await
                .expect("send bare count");

            // Hold the socket open until the client tears down.
            while let Some(frame) = socket.next().await {
                if frame.is_err() {
                    break;
                }
            }
        });

        let channel = PresenceChannel::connect(
            config(addr, Duration::from_millis(100)),
            dead_fallback(),
        );
        let mut counts = channel.counts();

        timeout(WAIT, counts.changed()).await.expect("count in time").expect("sender alive");
        assert_eq!(*counts.borrow(), 7);

        channel.refresh().await;
        timeout(WAIT, counts.changed()).await.expect("count in time").expect("sender alive");
        assert_eq!(*counts.borrow(), 5);

        channel.teardown().await;
        timeout(WAIT, server).await.expect("server done").expect("server task");
        assert_eq!(channel.count(), 5);
    }

    #[tokio::test]
    async fn unclean_close_schedules_exactly_one_reconnect() {
        let (listener, addr) = bind().await;
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = connections.clone();

        let server = tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.expect("accept");
                let mut socket = accept_async(stream).await.expect("handshake");
                seen.fetch_add(1, Ordering::SeqCst);
                // Swallow the count request, then drop the connection
                // without a clean close.
                let _ = socket.next().await;
                drop(socket);
            }
        });

        let channel = PresenceChannel::connect(
            config(addr, Duration::from_millis(100)),
            dead_fallback(),
        );

        tokio::time::sleep(Duration::from_millis(450)).await;
        let reconnects = connections.load(Ordering::SeqCst);
        assert!(
            reconnects >= 2,
            "expected at least one reconnect, saw {reconnects} connections"
        );

        channel.teardown().await;
        server.abort();
    }

    #[tokio::test]
    async fn teardown_during_the_delay_cancels_the_reconnect() {
        let (listener, addr) = bind().await;
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = connections.clone();

        let server = tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.expect("accept");
                let mut socket = accept_async(stream).await.expect("handshake");
                seen.fetch_add(1, Ordering::SeqCst);
                let _ = socket.next().await;
                drop(socket);
            }
        });

        let channel = PresenceChannel::connect(
            config(addr, Duration::from_millis(300)),
            dead_fallback(),
        );

        // Let the first connection rise and fall, then tear down while the
        // reconnect delay is still pending.
        tokio::time::sleep(Duration::from_millis(150)).await;
        channel.teardown().await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(connections.load(Ordering::SeqCst), 1);
        let mut states = channel.states();
        timeout(WAIT, states.wait_for(|state| *state == ConnectionState::ClosedClean))
            .await
            .expect("state in time")
            .expect("sender alive");

        // A second teardown is a no-op.
        channel.teardown().await;
        server.abort();
    }

    #[tokio::test]
    async fn remote_clean_close_does_not_reconnect() {
        let (listener, addr) = bind().await;
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = connections.clone();

        let server = tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.expect("accept");
                let mut socket = accept_async(stream).await.expect("handshake");
                seen.fetch_add(1, Ordering::SeqCst);
                let _ = socket.next().await;
                let _ = socket
                    .close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "going away".into(),
                    }))
                    .await;
            }
        });

        let channel = PresenceChannel::connect(
            config(addr, Duration::from_millis(100)),
            dead_fallback(),
        );

        let mut states = channel.states();
        timeout(WAIT, states.wait_for(|state| *state == ConnectionState::ClosedClean))
            .await
            .expect("state in time")
            .expect("sender alive");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(connections.load(Ordering::SeqCst), 1);

        // An explicit refresh reconnects from scratch.
        channel.refresh().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(connections.load(Ordering::SeqCst), 2);

        channel.teardown().await;
        server.abort();
    }

    #[tokio::test]
    async fn undecodable_frame_keeps_last_known_good_count() {
        let (listener, addr) = bind().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut socket = accept_async(stream).await.expect("handshake");
            let _ = socket.next().await;
            socket
                .send(Message::Text("9".to_string()))
                .await
                .expect("send count");
            socket
                .send(Message::Text("no agents yet".to_string()))
                .await
                .expect("send garbage");
            while let Some(frame) = socket.next().await {
                if frame.is_err() {
                    break;
                }
            }
        });

        let channel = PresenceChannel::connect(
            config(addr, Duration::from_millis(100)),
            dead_fallback(),
        );
        let mut counts = channel.counts();
        timeout(WAIT, counts.changed()).await.expect("count in time").expect("sender alive");
        assert_eq!(*counts.borrow(), 9);

        // The garbage frame triggers the (failing) fallback pull; the
        // displayed count must not move.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(channel.count(), 9);

        channel.teardown().await;
        timeout(WAIT, server).await.expect("server done").expect("server task");
    }
}
