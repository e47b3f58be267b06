//! Debug client
//!
//! Wires the [`Session`] into the [`BreakpointCache`] and the
//! [`BreakpointTree`], and exposes the command flows a host UI issues.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bus::SubscriptionId;
use crate::cache::BreakpointCache;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::model::{Breakpoint, BreakpointId, Hit};
use crate::protocol::{BreakpointRequest, Command};
use crate::session::{Session, SessionEvent};
use crate::transport::Endpoint;
use crate::tree::{BreakpointTree, ExpandOutcome, TreeNode};

/// Editor-style marker for a breakpoint line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GutterMarker {
    pub breakpoint_id: BreakpointId,
    /// Zero-based line
    pub line: u32,
    pub hover: String,
}

/// What a toggle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggled {
    Added(Breakpoint),
    Removed(BreakpointId),
}

pub struct DebugClient {
    config: ClientConfig,
    session: Session,
    cache: Arc<BreakpointCache>,
    tree: Arc<BreakpointTree>,
    cache_feed: SubscriptionId,
}

impl DebugClient {
    pub fn new(config: ClientConfig) -> Self {
        let session = Session::new(config.session.clone());
        let cache = Arc::new(BreakpointCache::new());
        let tree = BreakpointTree::attach(cache.clone(), session.clone());

        let target = cache.clone();
        let cache_feed = session.on(move |event| apply_to_cache(&target, event));

        Self {
            config,
            session,
            cache,
            tree,
            cache_feed,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn cache(&self) -> &Arc<BreakpointCache> {
        &self.cache
    }

    pub fn tree(&self) -> &Arc<BreakpointTree> {
        &self.tree
    }

    /// Connect and request the server's breakpoint list.
    ///
    /// A blank `address` falls back to the configured default.
    pub async fn connect(&self, address: Option<&str>, password: &str) -> bool {
        self.try_connect(address, password).await.is_ok()
    }

    /// [`DebugClient::connect`], reporting why the connection failed
    pub async fn try_connect(&self, address: Option<&str>, password: &str) -> Result<()> {
        let address = self.config.session.resolve_address(address);
        let endpoint = Endpoint::new(address, password);
        self.session.try_connect(&endpoint).await?;

        // The reply repopulates the cache through the session listener.
        if let Err(e) = self.session.send(&Command::Breakpoints) {
            warn!("Failed to request the breakpoint list: {}", e);
        }
        Ok(())
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// Re-query the server's breakpoints and wait until they are cached
    pub async fn refresh(&self) -> Result<Vec<Breakpoint>> {
        match self.session.request(&Command::Breakpoints).await? {
            SessionEvent::BreakpointList(_) => Ok(self.cache.breakpoints()),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Create a breakpoint and wait for the server to confirm it
    pub async fn add_breakpoint(&self, request: BreakpointRequest) -> Result<Breakpoint> {
        info!("Adding breakpoint at {}:{}", request.file, request.line);
        match self.session.request(&Command::from(request)).await? {
            SessionEvent::BreakpointAdded(breakpoint) => Ok(breakpoint),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Remove a breakpoint and wait for the server to confirm it
    pub async fn remove_breakpoint(&self, id: BreakpointId) -> Result<BreakpointId> {
        info!("Removing breakpoint {}", id);
        match self.session.request(&Command::Remove { id }).await? {
            SessionEvent::BreakpointRemoved(removed) => Ok(removed),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Remove the breakpoint on the request's line, or add one if there is none
    pub async fn toggle_breakpoint(&self, request: BreakpointRequest) -> Result<Toggled> {
        match self.breakpoint_on_line(&request.file, request.line) {
            Some(existing) => self.remove_breakpoint(existing.id).await.map(Toggled::Removed),
            None => self.add_breakpoint(request).await.map(Toggled::Added),
        }
    }

    pub fn breakpoint_on_line(&self, file: &str, line: u32) -> Option<Breakpoint> {
        self.cache.breakpoint_on_line(file, line)
    }

    pub fn breakpoints_in_file(&self, file: &str) -> Vec<Breakpoint> {
        self.cache.get_breakpoints_in_file(file)
    }

    /// Markers for every breakpoint in `file`
    pub fn gutter_markers(&self, file: &str) -> Vec<GutterMarker> {
        self.breakpoints_in_file(file)
            .into_iter()
            .map(|breakpoint| GutterMarker {
                breakpoint_id: breakpoint.id,
                line: breakpoint.line.saturating_sub(1),
                hover: format!("Breakpoint ID {}", breakpoint.id),
            })
            .collect()
    }

    /// Expand a breakpoint node, fetching its history on first use
    pub async fn expand(&self, id: BreakpointId) -> Result<ExpandOutcome> {
        self.tree.expand(id).await
    }

    /// Hits of a breakpoint, fetching the history if none are loaded yet
    pub async fn hits(&self, id: BreakpointId) -> Result<Vec<Hit>> {
        let outcome = self.expand(id).await?;
        debug!(breakpoint = id, ?outcome, "Expanded breakpoint");
        Ok(self.cache.hits(id))
    }

    /// Locate and expand the breakpoint node on a line
    pub async fn reveal(&self, file: &str, line: u32) -> Result<Option<TreeNode>> {
        let Some(breakpoint) = self.breakpoint_on_line(file, line) else {
            return Ok(None);
        };
        let Some(node) = self.tree.find_breakpoint(breakpoint.id) else {
            return Ok(None);
        };
        self.tree.resolve(&node).await?;
        Ok(Some(node))
    }
}

impl Drop for DebugClient {
    fn drop(&mut self) {
        // Session clones may outlive the client; stop feeding its cache.
        self.session.off(self.cache_feed);
    }
}

/// Keep the cache in step with the session, in dispatch order
fn apply_to_cache(cache: &BreakpointCache, event: &SessionEvent) {
    match event {
        SessionEvent::BreakpointAdded(breakpoint) => {
            cache.add_breakpoints(vec![breakpoint.clone()]);
        }
        SessionEvent::BreakpointRemoved(id) => {
            cache.remove_breakpoints(&[*id]);
        }
        SessionEvent::BreakpointList(breakpoints) => {
            cache.add_breakpoints(breakpoints.clone());
        }
        SessionEvent::HitsRecorded(hits) | SessionEvent::HitHistory { hits, .. } => {
            cache.add_hits(hits.clone());
        }
        SessionEvent::Disconnected { .. } => {
            cache.clear();
        }
        SessionEvent::Connected | SessionEvent::Error(_) => {}
    }
}

fn unexpected_reply(event: &SessionEvent) -> ClientError {
    ClientError::UnknownMessage(event.kind().name().to_string())
}
