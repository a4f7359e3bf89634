use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taptop_core::config::TaptopConfig;
use taptop_core::{Clock, SystemClock, TapError};
use taptop_engine::NeighborSet;
use taptop_observability::MetricsCollector;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::controller::{CLOSE_ABNORMAL, StreamLifecycleController};
use crate::status::TapStatus;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake in flight. Dropping it abandons the connection attempt.
type PendingConnect = Pin<Box<dyn Future<Output = Result<WsStream, String>> + Send>>;

/// Close code when the peer sends a close frame without a status.
const CLOSE_NO_STATUS: u16 = 1005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapCommand {
    Start,
    Stop,
    Shutdown,
}

/// Cheap, cloneable access to a running tap driver.
#[derive(Clone)]
pub struct TapHandle {
    commands: mpsc::Sender<TapCommand>,
    status: watch::Receiver<TapStatus>,
}

impl TapHandle {
    pub fn new(commands: mpsc::Sender<TapCommand>, status: watch::Receiver<TapStatus>) -> Self {
        Self { commands, status }
    }

    pub async fn send(&self, command: TapCommand) -> Result<(), TapError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TapError::Connection("tap driver is not running".into()))
    }

    pub async fn start(&self) -> Result<(), TapError> {
        self.send(TapCommand::Start).await
    }

    pub async fn stop(&self) -> Result<(), TapError> {
        self.send(TapCommand::Stop).await
    }

    pub async fn shutdown(&self) -> Result<(), TapError> {
        self.send(TapCommand::Shutdown).await
    }

    /// Latest published status.
    pub fn status(&self) -> TapStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TapStatus> {
        self.status.clone()
    }
}

/// Spawn the driver on the current runtime.
pub fn spawn_tap(config: &TaptopConfig, metrics: Arc<MetricsCollector>) -> (TapHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (status_tx, status_rx) = watch::channel(TapStatus::idle(&config.tap));
    let driver = TapDriver::new(config, Arc::new(SystemClock), metrics, command_rx, status_tx);
    let task = tokio::spawn(driver.run());
    (TapHandle::new(command_tx, status_rx), task)
}

/// Owns the controller and the socket. Runs until shut down.
pub struct TapDriver {
    controller: StreamLifecycleController<NeighborSet>,
    url: String,
    connect_timeout: Duration,
    commands: mpsc::Receiver<TapCommand>,
    status: watch::Sender<TapStatus>,
}

impl TapDriver {
    pub fn new(
        config: &TaptopConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
        commands: mpsc::Receiver<TapCommand>,
        status: watch::Sender<TapStatus>,
    ) -> Self {
        let controller = StreamLifecycleController::new(
            config.tap.clone(),
            config.top.clone(),
            clock,
            metrics,
            NeighborSet::new(),
        );
        Self {
            controller,
            url: config.tap.url.clone(),
            connect_timeout: Duration::from_millis(config.tap.connect_timeout_ms),
            commands,
            status,
        }
    }

    pub async fn run(mut self) {
        let mut socket: Option<WsStream> = None;
        let mut connecting: Option<PendingConnect> = None;
        loop {
            let deadline = self.controller.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(TapCommand::Start) => {
                        if self.controller.start() {
                            self.publish_status();
                            info!(url = %self.url, "Connecting to tap stream");
                            let url = self.url.clone();
                            connecting = Some(Box::pin(open_socket(url, self.connect_timeout)));
                        }
                    }
                    Some(TapCommand::Stop) => {
                        connecting = None;
                        self.stop(&mut socket).await;
                    }
                    Some(TapCommand::Shutdown) | None => {
                        connecting = None;
                        self.stop(&mut socket).await;
                        break;
                    }
                },
                result = finish_connect(&mut connecting) => {
                    connecting = None;
                    socket = self.on_connected(result).await;
                }
                frame = next_frame(&mut socket) => self.on_frame(frame, &mut socket),
                _ = sleep_until(deadline) => {
                    if self.controller.poll_publish().is_some() {
                        self.publish_status();
                    }
                }
            }
        }
        info!("Tap driver stopped");
    }

    /// Handshake finished. Sends the subscription on success.
    async fn on_connected(&mut self, result: Result<WsStream, String>) -> Option<WsStream> {
        let mut ws = match result {
            Ok(ws) => ws,
            Err(message) => {
                self.fail(&message);
                return None;
            }
        };

        if let Some(request) = self.controller.on_open() {
            if let Err(e) = ws.send(Message::Text(request)).await {
                self.fail(&e.to_string());
                return None;
            }
            debug!("Tap subscription sent");
        }
        self.publish_status();
        Some(ws)
    }

    fn on_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        socket: &mut Option<WsStream>,
    ) {
        match frame {
            Some(Ok(Message::Text(text))) => self.controller.on_message(&text),
            Some(Ok(Message::Binary(bytes))) => {
                self.controller.on_message(&String::from_utf8_lossy(&bytes))
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason, was_clean) = close_details(frame);
                self.controller.on_close(code, &reason, was_clean);
                *socket = None;
                self.publish_status();
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                *socket = None;
                self.fail(&e.to_string());
            }
            None => {
                *socket = None;
                self.controller.on_close(CLOSE_ABNORMAL, "", false);
                self.publish_status();
            }
        }
    }

    /// Transport failure: record the error and close uncleanly.
    fn fail(&mut self, message: &str) {
        self.controller.on_error(message);
        self.controller.on_close(CLOSE_ABNORMAL, "", false);
        self.publish_status();
    }

    async fn stop(&mut self, socket: &mut Option<WsStream>) {
        let send_close = self.controller.stop();
        if let Some(mut ws) = socket.take()
            && send_close
        {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            if let Err(e) = ws.close(Some(frame)).await {
                warn!(error = %e, "Failed to send close frame");
            }
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status.send_replace(self.controller.status());
    }
}

async fn open_socket(url: String, timeout: Duration) -> Result<WsStream, String> {
    match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("connect timed out after {}ms", timeout.as_millis())),
    }
}

/// Code, reason and cleanliness of a received close frame. A frame without
/// a status still completes the closing handshake, so it counts as clean.
fn close_details(frame: Option<CloseFrame<'_>>) -> (u16, String, bool) {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            (code, frame.reason.into_owned(), matches!(code, 1000 | 1001))
        }
        None => (CLOSE_NO_STATUS, String::new(), true),
    }
}

async fn finish_connect(connecting: &mut Option<PendingConnect>) -> Result<WsStream, String> {
    match connecting {
        Some(pending) => pending.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
