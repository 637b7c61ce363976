use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use shared::protocol::{decode_stream_frame, StreamFrame, TrafficUpdate};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::ClientSettings,
    error::{ChannelError, ConfigError},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Disconnected -> Connecting -> Connected -> Disconnected, plus the
    /// failed-handshake edge Connecting -> Disconnected.
    pub fn permits(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::Disconnected)
                | (Self::Connected, Self::Disconnected)
        )
    }
}

/// What the channel hands to its consumer, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    StateChanged(ConnectionState),
    Update(TrafficUpdate),
    Error(ChannelError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub url: Url,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl ChannelConfig {
    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            url: settings.websocket_url()?,
            reconnect_initial_delay: settings.reconnect_initial_delay,
            reconnect_max_delay: settings.reconnect_max_delay,
        })
    }
}

pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// One persistent websocket connection with reconnect. Runs on its own task;
/// nothing here blocks the caller.
pub struct LiveUpdateChannel {
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveUpdateChannel {
    pub fn start(config: ChannelConfig, events: mpsc::Sender<ChannelEvent>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = ConnectionDriver {
            config,
            events,
            state: state_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(driver.run());
        Self {
            state: state_rx,
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Closes the connection and waits for the driver to finish. Safe to call
    /// any number of times, connected or not.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "live channel: driver task ended abnormally");
            }
        }
    }
}

impl Drop for LiveUpdateChannel {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

enum PumpExit {
    Stopped,
    ConsumerGone,
    Lost(ChannelError),
}

struct ConnectionDriver {
    config: ChannelConfig,
    events: mpsc::Sender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionDriver {
    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Applies `next` if `permits` allows it; other edges are refused and
    /// leave the state untouched. Returns false once nobody is listening any
    /// more.
    async fn transition(&self, next: ConnectionState) -> bool {
        let prev = *self.state.borrow();
        if prev == next {
            return true;
        }
        if !prev.permits(next) {
            warn!(from = ?prev, to = ?next, "live channel: refusing state transition");
            return true;
        }
        self.state.send_replace(next);
        info!(from = ?prev, to = ?next, url = %self.config.url, "live channel: state changed");
        self.events
            .send(ChannelEvent::StateChanged(next))
            .await
            .is_ok()
    }

    async fn report(&self, err: ChannelError) -> bool {
        warn!(error = %err, "live channel: error");
        self.events.send(ChannelEvent::Error(err)).await.is_ok()
    }

    async fn run(mut self) {
        let mut delay = self.config.reconnect_initial_delay;
        let mut attempt: u64 = 0;
        loop {
            if self.stopping() || !self.transition(ConnectionState::Connecting).await {
                break;
            }
            attempt += 1;
            debug!(attempt, url = %self.config.url, "live channel: connecting");

            let url = self.config.url.to_string();
            let connected = tokio::select! {
                res = connect_async(url.as_str()) => Some(res),
                _ = self.shutdown.changed() => None,
            };
            let keep_going = match connected {
                None => false,
                Some(Ok((stream, _))) => {
                    delay = self.config.reconnect_initial_delay;
                    attempt = 0;
                    if !self.transition(ConnectionState::Connected).await {
                        break;
                    }
                    match self.pump(stream).await {
                        PumpExit::Stopped => false,
                        PumpExit::ConsumerGone => break,
                        PumpExit::Lost(err) => self.report(err).await,
                    }
                }
                Some(Err(err)) => {
                    self.report(ChannelError::Connect {
                        url: url.clone(),
                        reason: err.to_string(),
                    })
                    .await
                }
            };

            if !self.transition(ConnectionState::Disconnected).await
                || !keep_going
                || self.stopping()
            {
                break;
            }

            debug!(delay_ms = delay.as_millis() as u64, "live channel: waiting before reconnect");
            let stop_requested = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = self.shutdown.changed() => true,
            };
            if stop_requested {
                break;
            }
            delay = next_backoff(delay, self.config.reconnect_max_delay);
        }
        let prev = self.state.send_replace(ConnectionState::Disconnected);
        if prev != ConnectionState::Disconnected {
            let _ = self
                .events
                .try_send(ChannelEvent::StateChanged(ConnectionState::Disconnected));
        }
        debug!(url = %self.config.url, "live channel: driver exited");
    }

    async fn pump(&mut self, mut stream: WsStream) -> PumpExit {
        loop {
            let next = tokio::select! {
                msg = stream.next() => Some(msg),
                _ = self.shutdown.changed() => None,
            };
            let Some(message) = next else {
                if let Err(err) = stream.close(None).await {
                    debug!(error = %err, "live channel: close handshake failed");
                }
                return PumpExit::Stopped;
            };
            match message {
                Some(Ok(Message::Text(text))) => match decode_stream_frame(&text) {
                    Ok(StreamFrame::TrafficUpdate(update)) => {
                        if self.events.send(ChannelEvent::Update(update)).await.is_err() {
                            return PumpExit::ConsumerGone;
                        }
                    }
                    Ok(StreamFrame::Unrecognized { kind }) => {
                        debug!(%kind, "live channel: ignoring frame kind");
                    }
                    Err(err) => {
                        warn!(error = %err, "live channel: dropping frame");
                    }
                },
                Some(Ok(Message::Binary(bytes))) => {
                    warn!(len = bytes.len(), "live channel: dropping binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("closed by server ({}): {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "closed by server".to_string());
                    return PumpExit::Lost(ChannelError::Transport(reason));
                }
                Some(Ok(_)) => {}
                Some(Err(WsError::Protocol(err))) => {
                    return PumpExit::Lost(ChannelError::Protocol(err.to_string()));
                }
                Some(Err(err)) => {
                    return PumpExit::Lost(ChannelError::Transport(err.to_string()));
                }
                None => {
                    return PumpExit::Lost(ChannelError::Transport(
                        "connection ended without close frame".into(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
