//! Persistent push-channel connection with automatic reconnect.
//!
//! DESIGN
//! ======
//! One supervisor task per [`ConnectionManager`] owns the socket. It
//! connects, forwards decoded [`ServerEvent`]s to the caller's channel, and
//! on any drop sleeps for the [`Backoff`] delay before trying again. A
//! successful open resets the attempt counter.
//!
//! Outgoing commands go through an unbounded queue that the supervisor
//! drains into the socket. [`CommandSink::send`] refuses while the socket is
//! not open, and anything still queued when a connection drops is discarded
//! rather than replayed on the next one.
//!
//! ERROR HANDLING
//! ==============
//! Connect failures and socket errors are logged and fed into the backoff
//! loop; they never surface to callers. Frames that fail to decode are
//! logged and skipped without disturbing the connection.

#[cfg(test)]
#[path = "connection_test.rs"]
mod connection_test;

use std::sync::Mutex;

use envelopes::{ClientCommand, ServerEvent, decode_event, encode_command};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::backoff::{Backoff, BackoffPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
}

/// Outbound half of the push channel, as seen by the client orchestrator.
pub trait CommandSink: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queue `command` for the open socket. Returns `false` when there is no
    /// open connection; the caller falls back to REST.
    fn send(&self, command: &ClientCommand) -> bool;
}

pub struct ConnectionManager {
    instance: Uuid,
    commands: mpsc::UnboundedSender<String>,
    status: watch::Receiver<ConnectionStatus>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Start the supervisor for `url` (token already attached). Decoded
    /// events are delivered on `events` in arrival order.
    #[must_use]
    pub fn spawn(url: String, events: mpsc::UnboundedSender<ServerEvent>, policy: BackoffPolicy) -> Self {
        let instance = Uuid::new_v4();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor {
            url,
            events,
            commands: commands_rx,
            status: status_tx,
            shutdown: shutdown_rx,
            backoff: Backoff::new(policy),
        };
        let task = tokio::spawn(supervisor.run().instrument(info_span!("chat_socket", %instance)));

        Self { instance, commands: commands_tx, status: status_rx, shutdown: shutdown_tx, task: Mutex::new(Some(task)) }
    }

    #[must_use]
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status transition.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Stop reconnecting and close the socket. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(instance = %self.instance, %error, "socket supervisor ended abnormally");
            }
        }
    }
}

impl CommandSink for ConnectionManager {
    fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    fn send(&self, command: &ClientCommand) -> bool {
        if !self.is_open() {
            return false;
        }
        match encode_command(command) {
            Ok(text) => self.commands.send(text).is_ok(),
            Err(error) => {
                warn!(instance = %self.instance, %error, "failed to encode command");
                false
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

enum SessionEnd {
    /// Socket closed or errored; reconnect after backoff.
    Dropped,
    /// Shutdown requested or nobody is listening for events anymore.
    Stop,
}

struct Supervisor {
    url: String,
    events: mpsc::UnboundedSender<ServerEvent>,
    commands: mpsc::UnboundedReceiver<String>,
    status: watch::Sender<ConnectionStatus>,
    shutdown: watch::Receiver<bool>,
    backoff: Backoff,
}

impl Supervisor {
    async fn run(mut self) {
        while !*self.shutdown.borrow() {
            self.status.send_replace(ConnectionStatus::Connecting);

            let connected = tokio::select! {
                result = connect_async(self.url.as_str()) => result,
                _ = self.shutdown.changed() => break,
            };

            match connected {
                Ok((stream, _)) => {
                    self.backoff.reset();
                    self.status.send_replace(ConnectionStatus::Open);
                    info!("chat socket open");
                    if matches!(self.run_session(stream).await, SessionEnd::Stop) {
                        break;
                    }
                    info!("chat socket closed");
                }
                Err(error) => {
                    warn!(%error, attempt = self.backoff.attempt(), "chat socket connect failed");
                }
            }

            self.status.send_replace(ConnectionStatus::Closed);
            self.discard_stale_commands();

            let delay = self.backoff.next_delay();
            debug!(delay_ms = delay.as_millis(), "reconnecting after backoff");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.status.send_replace(ConnectionStatus::Closed);
        self.discard_stale_commands();
        debug!("socket supervisor stopped");
    }

    async fn run_session(
        &mut self,
        stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    ) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Stop;
                }
                Some(text) = self.commands.recv() => {
                    if let Err(error) = write.send(Message::Text(text.into())).await {
                        warn!(%error, "chat socket send failed");
                        return SessionEnd::Dropped;
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => match decode_event(&text) {
                        Ok(event) => {
                            if self.events.send(event).is_err() {
                                return SessionEnd::Stop;
                            }
                        }
                        Err(error) => warn!(%error, "skipping malformed chat frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(%error, "chat socket receive failed");
                        return SessionEnd::Dropped;
                    }
                },
            }
        }
    }

    fn discard_stale_commands(&mut self) {
        let mut dropped = 0_usize;
        while self.commands.try_recv().is_ok() {
            dropped = dropped.saturating_add(1);
        }
        if dropped > 0 {
            debug!(dropped, "discarded commands queued for a closed socket");
        }
    }
}
