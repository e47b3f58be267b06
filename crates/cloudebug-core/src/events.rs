//! Event Sink Trait
//!
//! This module provides the EventSink trait for decoupling host notification
//! from any particular UI. Implementations can redraw an editor tree view,
//! write to stdout (CLI), or record for tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::client::DebugClient;
use crate::error::ClientError;
use crate::model::{format_timestamp, Hit};
use crate::session::SessionEvent;
use crate::tree::{BreakpointTree, TreeChange};

/// Shown when the server drops the connection without a local disconnect
pub const UNEXPECTED_DISCONNECT: &str = "Cloudebug server unexpectedly closed the connection.";

/// Event sink for notifying a host UI
///
/// This trait abstracts notification so the client can work with
/// different frontends (editor extension, CLI, tests, etc.)
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emit a connected event
    async fn emit_connected(&self) -> Result<(), String>;

    /// Emit a disconnected event; `expected` is false when the server closed it
    async fn emit_disconnected(&self, expected: bool) -> Result<(), String>;

    /// Emit a protocol or server error
    async fn emit_error(&self, error: &ClientError) -> Result<(), String>;

    /// Emit live hits as they arrive
    async fn emit_hits(&self, hits: &[Hit]) -> Result<(), String>;

    /// Emit a tree change; the host re-queries `tree` for the changed scope
    async fn emit_tree_changed(
        &self,
        change: TreeChange,
        tree: &BreakpointTree,
    ) -> Result<(), String>;

    /// Emit a generic event with custom payload
    async fn emit_custom<T: Serialize + Send + Sync>(
        &self,
        event_name: &str,
        payload: &T,
    ) -> Result<(), String>;
}

/// No-op event sink for testing or CLI mode without event emission
#[derive(Default, Clone)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit_connected(&self) -> Result<(), String> {
        Ok(())
    }

    async fn emit_disconnected(&self, _expected: bool) -> Result<(), String> {
        Ok(())
    }

    async fn emit_error(&self, _error: &ClientError) -> Result<(), String> {
        Ok(())
    }

    async fn emit_hits(&self, _hits: &[Hit]) -> Result<(), String> {
        Ok(())
    }

    async fn emit_tree_changed(
        &self,
        _change: TreeChange,
        _tree: &BreakpointTree,
    ) -> Result<(), String> {
        Ok(())
    }

    async fn emit_custom<T: Serialize + Send + Sync>(
        &self,
        _event_name: &str,
        _payload: &T,
    ) -> Result<(), String> {
        Ok(())
    }
}

/// Stdout event sink for CLI mode - prints events to console
#[derive(Default, Clone)]
pub struct StdoutEventSink {
    /// Whether to print in JSON format
    pub json_output: bool,
}

impl StdoutEventSink {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    fn print_json(&self, value: serde_json::Value) {
        println!("{value}");
    }
}

#[async_trait]
impl EventSink for StdoutEventSink {
    async fn emit_connected(&self) -> Result<(), String> {
        if self.json_output {
            self.print_json(json!({ "event": "connected" }));
        } else {
            println!("Connected to the Cloudebug server.");
        }
        Ok(())
    }

    async fn emit_disconnected(&self, expected: bool) -> Result<(), String> {
        if self.json_output {
            self.print_json(json!({ "event": "disconnected", "expected": expected }));
        } else if expected {
            println!("Disconnected from the Cloudebug server.");
        } else {
            eprintln!("{UNEXPECTED_DISCONNECT}");
        }
        Ok(())
    }

    async fn emit_error(&self, error: &ClientError) -> Result<(), String> {
        if self.json_output {
            self.print_json(json!({ "event": "error", "error": error, "text": error.to_string() }));
        } else {
            eprintln!("{error}");
        }
        Ok(())
    }

    async fn emit_hits(&self, hits: &[Hit]) -> Result<(), String> {
        for hit in hits {
            if self.json_output {
                self.print_json(json!({ "event": "hit", "hit": hit }));
            } else {
                println!(
                    "[{}] hit {} on breakpoint {} [{} values]",
                    format_timestamp(&hit.timestamp),
                    hit.id,
                    hit.breakpoint_id,
                    hit.values.len()
                );
            }
        }
        Ok(())
    }

    async fn emit_tree_changed(
        &self,
        change: TreeChange,
        tree: &BreakpointTree,
    ) -> Result<(), String> {
        if self.json_output {
            self.print_json(json!({
                "event": "tree_changed",
                "change": change,
                "breakpoints": tree.snapshot(),
            }));
        } else {
            print!("{}", tree.outline());
        }
        Ok(())
    }

    async fn emit_custom<T: Serialize + Send + Sync>(
        &self,
        event_name: &str,
        payload: &T,
    ) -> Result<(), String> {
        if self.json_output {
            let payload = serde_json::to_value(payload).map_err(|e| e.to_string())?;
            self.print_json(json!({ "event": event_name, "payload": payload }));
        } else {
            println!("[{event_name}] Custom event");
        }
        Ok(())
    }
}

/// Forwards session and tree notifications to an [`EventSink`]
pub struct EventPump {
    session_events: broadcast::Receiver<SessionEvent>,
    tree_changes: broadcast::Receiver<TreeChange>,
    tree: Arc<BreakpointTree>,
}

impl EventPump {
    /// Subscribe to the client's notifications; nothing before this call is seen
    pub fn new(client: &DebugClient) -> Self {
        Self {
            session_events: client.session().subscribe(),
            tree_changes: client.tree().subscribe(),
            tree: client.tree().clone(),
        }
    }

    /// Forward notifications until the connection goes away.
    ///
    /// Returns whether the disconnect was expected. Sink failures are logged
    /// and do not stop the pump.
    pub async fn run<S: EventSink>(mut self, sink: &S) -> bool {
        loop {
            tokio::select! {
                event = self.session_events.recv() => match event {
                    Ok(SessionEvent::Disconnected { expected }) => {
                        self.flush_tree_changes(sink).await;
                        report(sink.emit_disconnected(expected).await);
                        return expected;
                    }
                    Ok(event) => self.forward(sink, event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event sink lagged, skipped {} session events", skipped);
                    }
                    Err(RecvError::Closed) => return true,
                },
                change = self.tree_changes.recv() => match change {
                    Ok(change) => report(sink.emit_tree_changed(change, &self.tree).await),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event sink lagged, skipped {} tree changes", skipped);
                        report(sink.emit_tree_changed(TreeChange::Root, &self.tree).await);
                    }
                    Err(RecvError::Closed) => return true,
                },
            }
        }
    }

    async fn forward<S: EventSink>(&self, sink: &S, event: SessionEvent) {
        let result = match event {
            SessionEvent::Connected => sink.emit_connected().await,
            SessionEvent::Error(error) => sink.emit_error(&error).await,
            SessionEvent::HitsRecorded(hits) => sink.emit_hits(&hits).await,
            // Reflected through tree changes.
            _ => Ok(()),
        };
        report(result);
    }

    async fn flush_tree_changes<S: EventSink>(&mut self, sink: &S) {
        while let Ok(change) = self.tree_changes.try_recv() {
            report(sink.emit_tree_changed(change, &self.tree).await);
        }
    }
}

fn report(result: Result<(), String>) {
    if let Err(e) = result {
        warn!("Failed to emit event: {}", e);
    }
}
