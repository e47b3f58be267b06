//! Session protocol layer
//!
//! Owns the single connection to the Cloudebug server. Inbound frames are
//! decoded and dispatched, strictly in arrival order, to three audiences:
//!
//! 1. synchronous listeners registered with [`Session::on`] (the cache),
//! 2. one-shot waiters registered with [`Session::wait_for_event`],
//! 3. asynchronous subscribers from [`Session::subscribe`] (UI surfaces).
//!
//! Replies are correlated with commands purely by event kind: the next
//! event of the awaited kind is taken to be the reply. Two in-flight
//! commands of the same type cannot be told apart.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, SubscriptionId};
use crate::config::SessionConfig;
use crate::error::{ClientError, Result};
use crate::model::{Breakpoint, BreakpointId, Hit};
use crate::protocol::{decode_message, Command, ServerMessage};
use crate::transport::{self, Endpoint, WsStream};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Event published by the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The handshake completed
    Connected,
    /// The connection is gone; `expected` is false when the server or the
    /// network closed it without a local [`Session::disconnect`]
    Disconnected { expected: bool },
    /// A protocol error: server-reported failure, malformed frame or
    /// unknown message type. Never fatal to the connection.
    Error(ClientError),
    BreakpointAdded(Breakpoint),
    BreakpointRemoved(BreakpointId),
    /// Live hits, stamped with the time they were received
    HitsRecorded(Vec<Hit>),
    BreakpointList(Vec<Breakpoint>),
    HitHistory {
        breakpoint_id: BreakpointId,
        hits: Vec<Hit>,
    },
}

/// Discriminant of a [`SessionEvent`], used to await replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    Add,
    Remove,
    Hit,
    Breakpoints,
    Hits,
}

impl EventKind {
    /// Event name, matching the wire discriminant where one exists
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Error => "error",
            EventKind::Add => "add",
            EventKind::Remove => "remove",
            EventKind::Hit => "hit",
            EventKind::Breakpoints => "breakpoints",
            EventKind::Hits => "hits",
        }
    }

    /// Kind of the event that answers `command`
    pub fn reply_to(command: &Command) -> Self {
        match command {
            Command::Add { .. } => EventKind::Add,
            Command::Remove { .. } => EventKind::Remove,
            Command::Breakpoints => EventKind::Breakpoints,
            Command::Hits { .. } => EventKind::Hits,
        }
    }
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Connected => EventKind::Connected,
            SessionEvent::Disconnected { .. } => EventKind::Disconnected,
            SessionEvent::Error(_) => EventKind::Error,
            SessionEvent::BreakpointAdded(_) => EventKind::Add,
            SessionEvent::BreakpointRemoved(_) => EventKind::Remove,
            SessionEvent::HitsRecorded(_) => EventKind::Hit,
            SessionEvent::BreakpointList(_) => EventKind::Breakpoints,
            SessionEvent::HitHistory { .. } => EventKind::Hits,
        }
    }

    fn from_message(message: ServerMessage) -> Self {
        match message {
            ServerMessage::Error { message } => SessionEvent::Error(ClientError::Server(message)),
            ServerMessage::Add { breakpoint } => SessionEvent::BreakpointAdded(breakpoint),
            ServerMessage::Remove { id } => SessionEvent::BreakpointRemoved(id),
            ServerMessage::Breakpoints { breakpoints } => SessionEvent::BreakpointList(breakpoints),
            ServerMessage::Hit {
                breakpoint_id,
                hits,
            } => {
                let received_at = Utc::now();
                let hits = hits
                    .into_iter()
                    .filter_map(|hit| {
                        let Some(owner) = hit.breakpoint_id.or(breakpoint_id) else {
                            debug!(hit = hit.id, "Dropping pushed hit without a breakpoint id");
                            return None;
                        };
                        Some(Hit {
                            id: hit.id,
                            breakpoint_id: owner,
                            timestamp: received_at,
                            values: hit.values,
                        })
                    })
                    .collect();
                SessionEvent::HitsRecorded(hits)
            }
            ServerMessage::Hits {
                breakpoint_id,
                hits,
            } => SessionEvent::HitHistory {
                breakpoint_id,
                hits: hits
                    .into_iter()
                    .map(|hit| Hit {
                        id: hit.id,
                        breakpoint_id,
                        timestamp: hit.date,
                        values: hit.values,
                    })
                    .collect(),
            },
        }
    }
}

/// A live connection and the task driving it
struct Connection {
    generation: u64,
    outgoing: mpsc::UnboundedSender<String>,
    expected_close: Arc<AtomicBool>,
    close: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Connection {
    fn request_close(&self) {
        self.expected_close.store(true, Ordering::SeqCst);
        // Stores a permit if the task is busy writing, so the request is not lost.
        self.close.notify_one();
    }
}

struct Slot {
    /// Bumped by every connect and by a disconnect that aborts a handshake
    generation: u64,
    state: SessionState,
    connection: Option<Connection>,
    /// Connections asked to close that may not have finished yet
    closing: Vec<Connection>,
    /// Cancels the handshake of the connect attempt in flight
    attempt: Option<Arc<Notify>>,
}

struct Waiter {
    kind: EventKind,
    reply: oneshot::Sender<Result<SessionEvent>>,
}

struct Shared {
    config: SessionConfig,
    slot: Mutex<Slot>,
    /// Serializes the wind-down of detached connections across connects
    teardown: tokio::sync::Mutex<()>,
    waiters: Mutex<Vec<Waiter>>,
    listeners: EventBus<SessionEvent>,
    broadcaster: broadcast::Sender<SessionEvent>,
}

/// Handle to the single Cloudebug session
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let (broadcaster, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                slot: Mutex::new(Slot {
                    generation: 0,
                    state: SessionState::Disconnected,
                    connection: None,
                    closing: Vec::new(),
                    attempt: None,
                }),
                teardown: tokio::sync::Mutex::new(()),
                waiters: Mutex::new(Vec::new()),
                listeners: EventBus::new(),
                broadcaster,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.slot().state
    }

    pub fn is_connected(&self) -> bool {
        self.shared.slot().connection.is_some()
    }

    /// Connect to the server, replacing any existing connection.
    ///
    /// Resolves to `true` once the handshake completes and `false` if it
    /// fails, times out, or is superseded by another `connect`/`disconnect`.
    pub async fn connect(&self, endpoint: &Endpoint) -> bool {
        self.try_connect(endpoint).await.is_ok()
    }

    /// [`Session::connect`], reporting why the attempt failed
    pub async fn try_connect(&self, endpoint: &Endpoint) -> Result<()> {
        let cancel = Arc::new(Notify::new());
        let (generation, retired) = {
            let mut slot = self.shared.slot();
            slot.generation += 1;
            slot.state = SessionState::Connecting;
            if let Some(pending) = slot.attempt.replace(cancel.clone()) {
                pending.notify_one();
            }
            let mut retired = std::mem::take(&mut slot.closing);
            retired.extend(slot.connection.take());
            (slot.generation, retired)
        };

        {
            // A newer attempt waits here until this one has finished winding down.
            let _teardown = self.shared.teardown.lock().await;
            for connection in retired {
                self.shared.wind_down(connection).await;
            }
        }
        if self.shared.slot().generation != generation {
            debug!("Connect attempt to {} was superseded", endpoint);
            return Err(ClientError::ConnectCancelled);
        }

        info!("Connecting to {}", endpoint.redacted_url());
        let opened = tokio::select! {
            opened = transport::open(endpoint, self.shared.config.handshake_timeout()) => opened,
            _ = cancel.notified() => {
                debug!("Connect attempt to {} was cancelled", endpoint);
                return Err(ClientError::ConnectCancelled);
            }
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to connect to {}: {}", endpoint, e);
                self.shared.handshake_failed(generation);
                return Err(e.into());
            }
        };

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (ready, ready_rx) = oneshot::channel();
        let expected_close = Arc::new(AtomicBool::new(false));
        let close = Arc::new(Notify::new());
        {
            let mut slot = self.shared.slot();
            if slot.generation != generation {
                debug!("Connect attempt to {} was superseded", endpoint);
                drop(slot);
                tokio::spawn(async move {
                    let mut stream = stream;
                    let _ = stream.close(None).await;
                });
                return Err(ClientError::ConnectCancelled);
            }

            let task = tokio::spawn(run_connection(
                self.shared.clone(),
                generation,
                stream,
                outgoing_rx,
                expected_close.clone(),
                close.clone(),
                ready_rx,
            ));
            slot.connection = Some(Connection {
                generation,
                outgoing,
                expected_close,
                close,
                task,
            });
            slot.state = SessionState::Connected;
            slot.attempt = None;
        }

        info!("Connected to {}", endpoint);
        self.shared.dispatch(SessionEvent::Connected);
        // Frames are only read once `Connected` has been published.
        let _ = ready.send(());
        Ok(())
    }

    /// Close the connection, if any, and cancel a pending connect. Idempotent.
    ///
    /// The resulting [`SessionEvent::Disconnected`] is marked expected.
    pub fn disconnect(&self) {
        let (closed, attempt) = {
            let mut slot = self.shared.slot();
            if slot.state == SessionState::Connecting {
                slot.generation += 1;
            }
            slot.state = SessionState::Disconnected;
            let attempt = slot.attempt.take();
            let closed = match slot.connection.take() {
                Some(connection) => {
                    connection.request_close();
                    // Kept so the next connect can bound its wind-down.
                    slot.closing.push(connection);
                    true
                }
                None => false,
            };
            (closed, attempt)
        };

        if let Some(attempt) = attempt {
            debug!("Cancelling the pending connect attempt");
            attempt.notify_one();
        }
        if closed {
            info!("Disconnecting from the Cloudebug server");
        }
    }

    /// Send a command without waiting for its reply
    pub fn send(&self, command: &Command) -> Result<()> {
        let slot = self.shared.slot();
        let connection = slot.connection.as_ref().ok_or(ClientError::NotConnected)?;
        let frame = command.encode()?;
        connection
            .outgoing
            .send(frame)
            .map_err(|_| ClientError::NotConnected)?;
        debug!(command = command.name(), "Sent command");
        Ok(())
    }

    /// Wait for the next event of `kind`.
    ///
    /// The waiter is registered when this is called, not when the returned
    /// future is first polled. It resolves with the next event of `kind`, or
    /// fails with the next protocol error, or with
    /// [`ClientError::ConnectionClosed`] if the connection goes away first.
    pub fn wait_for_event(
        &self,
        kind: EventKind,
    ) -> impl Future<Output = Result<SessionEvent>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        self.shared.waiters().push(Waiter { kind, reply });
        async move { rx.await.unwrap_or(Err(ClientError::ConnectionClosed)) }
    }

    /// Send a command and await the event that answers it
    pub async fn request(&self, command: &Command) -> Result<SessionEvent> {
        let reply = self.wait_for_event(EventKind::reply_to(command));
        self.send(command)?;
        reply.await
    }

    /// Register a synchronous listener, run inline for every event
    pub fn on<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(handler)
    }

    /// Remove a listener registered with [`Session::on`]
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.shared.listeners.unsubscribe(id)
    }

    /// Subscribe to events asynchronously
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.broadcaster.subscribe()
    }

    #[cfg(test)]
    fn inject_frame(&self, text: &str) {
        self.shared.handle_frame(text);
    }
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn waiters(&self) -> MutexGuard<'_, Vec<Waiter>> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle_frame(&self, text: &str) {
        let event = match decode_message(text) {
            Ok(message) => SessionEvent::from_message(message),
            Err(error) => {
                warn!("Rejected frame from server: {:?}", error);
                SessionEvent::Error(error)
            }
        };
        self.dispatch(event);
    }

    fn dispatch(&self, event: SessionEvent) {
        debug!(event = event.kind().name(), "Dispatching session event");
        self.listeners.publish(&event);
        self.settle_waiters(&event);
        // Having no async subscribers is fine.
        let _ = self.broadcaster.send(event);
    }

    fn settle_waiters(&self, event: &SessionEvent) {
        let kind = event.kind();
        let settled = {
            let mut waiters = self.waiters();
            let mut settled = Vec::new();
            for waiter in std::mem::take(&mut *waiters) {
                let outcome = if waiter.kind == kind {
                    Some(Ok(event.clone()))
                } else {
                    match event {
                        SessionEvent::Error(error) => Some(Err(error.clone())),
                        SessionEvent::Disconnected { .. } => Some(Err(ClientError::ConnectionClosed)),
                        _ => None,
                    }
                };

                match outcome {
                    Some(outcome) => settled.push((waiter, outcome)),
                    None if !waiter.reply.is_closed() => waiters.push(waiter),
                    None => {}
                }
            }
            settled
        };

        for (waiter, outcome) in settled {
            let _ = waiter.reply.send(outcome);
        }
    }

    fn handshake_failed(&self, generation: u64) {
        {
            let mut slot = self.slot();
            if slot.generation != generation {
                return;
            }
            slot.state = SessionState::Disconnected;
            slot.attempt = None;
        }
        self.dispatch(SessionEvent::Disconnected { expected: true });
    }

    fn connection_closed(&self, generation: u64, expected: bool) {
        let owns_session = {
            let mut slot = self.slot();
            slot.closing.retain(|c| c.generation != generation);
            match slot.connection.as_ref().map(|c| c.generation) {
                Some(current) if current == generation => {
                    slot.connection = None;
                    slot.state = SessionState::Disconnected;
                    true
                }
                Some(_) => false,
                None => true,
            }
        };
        if !owns_session {
            debug!(generation, "Ignoring close of a replaced connection");
            return;
        }

        if expected {
            info!("Connection closed");
        } else {
            warn!("Cloudebug server unexpectedly closed the connection");
        }
        self.dispatch(SessionEvent::Disconnected { expected });
    }

    /// Close a detached connection and wait for its disconnect to be published
    async fn wind_down(&self, mut connection: Connection) {
        connection.request_close();
        let limit = self.config.close_timeout();
        if tokio::time::timeout(limit, &mut connection.task)
            .await
            .is_ok()
        {
            return;
        }

        warn!("Previous connection did not close within {:?}, aborting it", limit);
        connection.task.abort();
        // The task publishes its own disconnect unless the abort stopped it first.
        if let Err(e) = (&mut connection.task).await {
            if e.is_cancelled() {
                self.connection_closed(connection.generation, true);
            }
        }
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    generation: u64,
    stream: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    expected_close: Arc<AtomicBool>,
    close: Arc<Notify>,
    ready: oneshot::Receiver<()>,
) {
    let _ = ready.await;
    let (mut sink, mut frames) = stream.split();
    let close_timeout = shared.config.close_timeout();

    loop {
        tokio::select! {
            _ = close.notified() => {
                match tokio::time::timeout(close_timeout, sink.close()).await {
                    Ok(Err(e)) => debug!("Error while closing the connection: {}", e),
                    Err(_) => debug!("Close handshake did not finish within {:?}", close_timeout),
                    Ok(Ok(())) => {}
                }
                break;
            }
            command = outgoing.recv() => match command {
                Some(text) => {
                    // A close request interrupts a write the peer is not draining.
                    tokio::select! {
                        sent = sink.send(Message::Text(text)) => {
                            if let Err(e) = sent {
                                warn!("Failed to send command: {}", e);
                                break;
                            }
                        }
                        _ = close.notified() => break,
                    }
                }
                None => break,
            },
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.handle_frame(&text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => shared.handle_frame(&text),
                    Err(e) => shared.dispatch(SessionEvent::Error(ClientError::Parse(e.to_string()))),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server sent close frame: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    shared.connection_closed(generation, expected_close.load(Ordering::SeqCst));
}
