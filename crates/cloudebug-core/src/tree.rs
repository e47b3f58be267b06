//! Lazy breakpoint tree
//!
//! Three levels derived from the [`BreakpointCache`]:
//!
//! ```text
//! breakpoint            always materialized, mirrors cache add/remove
//! └── hit               pushed incrementally, or fetched on first expansion
//!     └── expression    built once per hit by zipping values with expressions
//! ```
//!
//! The tree never holds a node whose breakpoint the cache has dropped.
//! Hosts subscribe to [`TreeChange`]s and re-query children on change.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::bus::SubscriptionId;
use crate::cache::{BreakpointCache, CacheEvent};
use crate::error::Result;
use crate::model::{
    format_timestamp, zip_expression_values, Breakpoint, BreakpointId, ExpressionValue, Hit, HitId,
};
use crate::protocol::Command;
use crate::session::{Session, SessionEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointNode {
    pub breakpoint: Breakpoint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HitNode {
    pub hit: Hit,
    pub parent: Arc<BreakpointNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionValueNode {
    pub expression: String,
    pub value: String,
    pub parent: Arc<HitNode>,
}

/// A node of the tree
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Breakpoint(Arc<BreakpointNode>),
    Hit(Arc<HitNode>),
    ExpressionValue(Arc<ExpressionValueNode>),
}

/// Whether a node can be expanded by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Collapsible {
    None,
    Collapsed,
}

/// Everything a host needs to render one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeItem {
    pub label: String,
    pub description: String,
    pub tooltip: String,
    pub context_value: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
    pub collapsible: Collapsible,
}

impl TreeNode {
    /// Owning node; breakpoints sit at the root and have none
    pub fn parent(&self) -> Option<TreeNode> {
        match self {
            TreeNode::Breakpoint(_) => None,
            TreeNode::Hit(node) => Some(TreeNode::Breakpoint(node.parent.clone())),
            TreeNode::ExpressionValue(node) => Some(TreeNode::Hit(node.parent.clone())),
        }
    }

    /// Id of the breakpoint this node belongs to
    pub fn breakpoint_id(&self) -> BreakpointId {
        match self {
            TreeNode::Breakpoint(node) => node.breakpoint.id,
            TreeNode::Hit(node) => node.parent.breakpoint.id,
            TreeNode::ExpressionValue(node) => node.parent.parent.breakpoint.id,
        }
    }

    pub fn tree_item(&self) -> TreeItem {
        match self {
            TreeNode::Breakpoint(node) => {
                let breakpoint = &node.breakpoint;
                TreeItem {
                    label: breakpoint.id.to_string(),
                    description: format!("{}:{}", breakpoint.file, breakpoint.line),
                    tooltip: format!(
                        "Breakpoint ID {} in file {} at line {} with {}",
                        breakpoint.id,
                        breakpoint.file,
                        breakpoint.line,
                        breakpoint.condition_text()
                    ),
                    context_value: "breakpoint",
                    icon: Some("debug-breakpoint"),
                    collapsible: Collapsible::Collapsed,
                }
            }
            TreeNode::Hit(node) => {
                let hit = &node.hit;
                let date = format_timestamp(&hit.timestamp);
                TreeItem {
                    label: hit.id.to_string(),
                    description: format!("{date} [{} values]", hit.values.len()),
                    tooltip: format!(
                        "Hit ID {} of the breakpoint {} on date {date} with {} evaluated expressions.",
                        hit.id,
                        hit.breakpoint_id,
                        hit.values.len()
                    ),
                    context_value: "breakpoint-hit",
                    icon: Some("check"),
                    collapsible: if hit.values.is_empty() {
                        Collapsible::None
                    } else {
                        Collapsible::Collapsed
                    },
                }
            }
            TreeNode::ExpressionValue(node) => TreeItem {
                label: format!("{}:", node.expression),
                description: node.value.clone(),
                tooltip: node.value.clone(),
                context_value: "expression-value",
                icon: None,
                collapsible: Collapsible::None,
            },
        }
    }
}

/// Which part of the tree must be re-rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "breakpoint_id", rename_all = "lowercase")]
pub enum TreeChange {
    Root,
    Breakpoint(BreakpointId),
}

/// Result of asking the tree to expand a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandOutcome {
    /// History was fetched and the node's hits materialized
    Fetched,
    /// Hits were already present; no command was sent
    AlreadyLoaded,
    /// A fetch for this breakpoint is already in flight
    Pending,
    /// No connection; nothing was sent
    Offline,
    /// The reply was for another breakpoint, or the breakpoint was removed
    /// while the fetch was in flight
    Discarded,
    /// Only breakpoint nodes expand lazily
    NotExpandable,
    /// The tree holds no breakpoint with that id
    Unknown,
}

/// Serializable view of a breakpoint and its materialized hits
#[derive(Debug, Clone, Serialize)]
pub struct BreakpointView {
    #[serde(flatten)]
    pub breakpoint: Breakpoint,
    /// `None` until the hits have been pushed or fetched
    pub hits: Option<Vec<HitView>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HitView {
    pub id: HitId,
    pub timestamp: DateTime<Utc>,
    pub values: Vec<ExpressionValue>,
}

#[derive(Default)]
struct TreeState {
    breakpoints: Vec<Arc<BreakpointNode>>,
    /// An entry exists once the breakpoint's hits are materialized, even if empty
    hits: HashMap<BreakpointId, Vec<Arc<HitNode>>>,
    expression_values: HashMap<(BreakpointId, HitId), Vec<Arc<ExpressionValueNode>>>,
    pending_fetches: HashSet<BreakpointId>,
}

impl TreeState {
    fn find(&self, id: BreakpointId) -> Option<&Arc<BreakpointNode>> {
        self.breakpoints.iter().find(|node| node.breakpoint.id == id)
    }

    fn register_hit(&mut self, parent: Arc<BreakpointNode>, hit: Hit) {
        let breakpoint_id = parent.breakpoint.id;
        let node = Arc::new(HitNode { hit, parent });
        let values = zip_expression_values(&node.parent.breakpoint.expressions, &node.hit.values)
            .into_iter()
            .map(|pair| {
                Arc::new(ExpressionValueNode {
                    expression: pair.expression,
                    value: pair.value,
                    parent: node.clone(),
                })
            })
            .collect();
        self.expression_values
            .insert((breakpoint_id, node.hit.id), values);
        self.hits.entry(breakpoint_id).or_default().push(node);
    }
}

pub struct BreakpointTree {
    state: Mutex<TreeState>,
    cache: Arc<BreakpointCache>,
    subscription: SubscriptionId,
    session: Session,
    changes: broadcast::Sender<TreeChange>,
}

impl BreakpointTree {
    /// Build a tree over `cache` and keep it in sync with every cache change
    pub fn attach(cache: Arc<BreakpointCache>, session: Session) -> Arc<Self> {
        let (changes, _) = broadcast::channel(session.config().event_capacity.max(1));
        let state = TreeState {
            breakpoints: cache
                .breakpoints()
                .into_iter()
                .map(|breakpoint| Arc::new(BreakpointNode { breakpoint }))
                .collect(),
            ..Default::default()
        };

        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let subscription = cache.on(move |event| {
                if let Some(tree) = weak.upgrade() {
                    tree.apply(event);
                }
            });
            Self {
                state: Mutex::new(state),
                cache,
                subscription,
                session,
                changes,
            }
        })
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<TreeChange> {
        self.changes.subscribe()
    }

    /// Children of `node`, or the root breakpoints when `node` is `None`
    pub fn get_children(&self, node: Option<&TreeNode>) -> Vec<TreeNode> {
        let state = self.state();
        match node {
            None => state
                .breakpoints
                .iter()
                .cloned()
                .map(TreeNode::Breakpoint)
                .collect(),
            Some(TreeNode::Breakpoint(node)) => state
                .hits
                .get(&node.breakpoint.id)
                .map(|hits| hits.iter().cloned().map(TreeNode::Hit).collect())
                .unwrap_or_default(),
            Some(TreeNode::Hit(node)) => state
                .expression_values
                .get(&(node.parent.breakpoint.id, node.hit.id))
                .map(|values| values.iter().cloned().map(TreeNode::ExpressionValue).collect())
                .unwrap_or_default(),
            Some(TreeNode::ExpressionValue(_)) => Vec::new(),
        }
    }

    pub fn get_parent(&self, node: &TreeNode) -> Option<TreeNode> {
        node.parent()
    }

    pub fn find_breakpoint(&self, id: BreakpointId) -> Option<TreeNode> {
        self.state().find(id).cloned().map(TreeNode::Breakpoint)
    }

    /// Whether the hits of a breakpoint have been pushed or fetched
    pub fn is_loaded(&self, id: BreakpointId) -> bool {
        self.state().hits.contains_key(&id)
    }

    /// Lazily resolve a node the host is about to show
    pub async fn resolve(&self, node: &TreeNode) -> Result<ExpandOutcome> {
        match node {
            TreeNode::Breakpoint(node) => self.expand(node.breakpoint.id).await,
            _ => Ok(ExpandOutcome::NotExpandable),
        }
    }

    /// Materialize a breakpoint's hits, fetching the history on first use.
    ///
    /// Expanding a breakpoint whose hits are already present (pushed or
    /// fetched) sends nothing. A failed fetch leaves the breakpoint
    /// unexpanded so the next expansion retries.
    pub async fn expand(&self, id: BreakpointId) -> Result<ExpandOutcome> {
        let connected = self.session.is_connected();
        {
            let mut state = self.state();
            if state.find(id).is_none() {
                return Ok(ExpandOutcome::Unknown);
            }
            if state.hits.contains_key(&id) {
                return Ok(ExpandOutcome::AlreadyLoaded);
            }
            if !connected {
                return Ok(ExpandOutcome::Offline);
            }
            if !state.pending_fetches.insert(id) {
                return Ok(ExpandOutcome::Pending);
            }
        }

        debug!(breakpoint = id, "Fetching hit history");
        let reply = self.session.request(&Command::Hits { id }).await;
        self.state().pending_fetches.remove(&id);

        match reply? {
            SessionEvent::HitHistory { breakpoint_id, .. } if breakpoint_id == id => {}
            other => {
                debug!(breakpoint = id, reply = ?other.kind(), "History reply was for another breakpoint");
                return Ok(ExpandOutcome::Discarded);
            }
        }

        // The history itself reached the cache (and so this tree) when the
        // frame was dispatched; only the breakpoint's liveness is left to check.
        let held = self.cache.contains(id);
        {
            let mut state = self.state();
            if !held || state.find(id).is_none() {
                debug!(breakpoint = id, "Discarding history of a removed breakpoint");
                return Ok(ExpandOutcome::Discarded);
            }
            state.hits.entry(id).or_default();
        }

        self.notify(TreeChange::Breakpoint(id));
        Ok(ExpandOutcome::Fetched)
    }

    /// Serializable snapshot of the whole tree
    pub fn snapshot(&self) -> Vec<BreakpointView> {
        let state = self.state();
        state
            .breakpoints
            .iter()
            .map(|node| BreakpointView {
                breakpoint: node.breakpoint.clone(),
                hits: state.hits.get(&node.breakpoint.id).map(|hits| {
                    hits.iter()
                        .map(|hit| HitView {
                            id: hit.hit.id,
                            timestamp: hit.hit.timestamp,
                            values: zip_expression_values(
                                &node.breakpoint.expressions,
                                &hit.hit.values,
                            ),
                        })
                        .collect()
                }),
            })
            .collect()
    }

    /// Plain-text rendering of the materialized tree
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for breakpoint in self.get_children(None) {
            self.write_node(&mut out, &breakpoint, 0);
        }
        out
    }

    /// Plain-text rendering of one node and its materialized descendants
    pub fn outline_of(&self, node: &TreeNode) -> String {
        let mut out = String::new();
        self.write_node(&mut out, node, 0);
        out
    }

    fn write_node(&self, out: &mut String, node: &TreeNode, depth: usize) {
        let item = node.tree_item();
        let _ = writeln!(
            out,
            "{:indent$}{} {}",
            "",
            item.label,
            item.description,
            indent = depth * 2
        );
        for child in self.get_children(Some(node)) {
            self.write_node(out, &child, depth + 1);
        }
    }

    fn apply(&self, event: &CacheEvent) {
        match event {
            CacheEvent::Added(breakpoints) if breakpoints.is_empty() => {}
            CacheEvent::Removed(ids) if ids.is_empty() => {}
            CacheEvent::Added(breakpoints) => {
                self.state().breakpoints.extend(
                    breakpoints
                        .iter()
                        .cloned()
                        .map(|breakpoint| Arc::new(BreakpointNode { breakpoint })),
                );
                self.notify(TreeChange::Root);
            }
            CacheEvent::Removed(ids) => {
                {
                    let mut state = self.state();
                    state
                        .breakpoints
                        .retain(|node| !ids.contains(&node.breakpoint.id));
                    for id in ids {
                        if let Some(hits) = state.hits.remove(id) {
                            for hit in hits {
                                state.expression_values.remove(&(*id, hit.hit.id));
                            }
                        }
                    }
                }
                self.notify(TreeChange::Root);
            }
            CacheEvent::Hits(hits) => {
                let mut touched: Vec<BreakpointId> = Vec::new();
                {
                    let mut state = self.state();
                    for hit in hits {
                        let Some(parent) = state.find(hit.breakpoint_id).cloned() else {
                            debug!(
                                breakpoint = hit.breakpoint_id,
                                hit = hit.id,
                                "Dropping hit for a breakpoint not in the tree"
                            );
                            continue;
                        };
                        state.register_hit(parent, hit.clone());
                        if !touched.contains(&hit.breakpoint_id) {
                            touched.push(hit.breakpoint_id);
                        }
                    }
                }
                for id in touched {
                    self.notify(TreeChange::Breakpoint(id));
                }
            }
        }
    }

    fn notify(&self, change: TreeChange) {
        // Having no subscribers is fine.
        let _ = self.changes.send(change);
    }

    fn state(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for BreakpointTree {
    fn drop(&mut self) {
        self.cache.off(self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use chrono::TimeZone;

    fn breakpoint(id: BreakpointId, expressions: &[&str]) -> Breakpoint {
        Breakpoint {
            id,
            file: "a.py".to_string(),
            line: 10,
            condition: None,
            expressions: expressions.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn hit(id: HitId, breakpoint_id: BreakpointId, values: &[&str]) -> Hit {
        Hit {
            id,
            breakpoint_id,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn setup() -> (Arc<BreakpointCache>, Arc<BreakpointTree>) {
        let cache = Arc::new(BreakpointCache::new());
        let tree = BreakpointTree::attach(cache.clone(), Session::new(SessionConfig::default()));
        (cache, tree)
    }

    fn drain(rx: &mut broadcast::Receiver<TreeChange>) -> Vec<TreeChange> {
        let mut changes = Vec::new();
        while let Ok(change) = rx.try_recv() {
            changes.push(change);
        }
        changes
    }

    #[test]
    fn test_root_mirrors_cache() {
        let (cache, tree) = setup();
        let mut changes = tree.subscribe();

        cache.add_breakpoints(vec![breakpoint(1, &["x"]), breakpoint(2, &[])]);
        assert_eq!(tree.get_children(None).len(), 2);

        cache.remove_breakpoints(&[1]);
        let roots = tree.get_children(None);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].breakpoint_id(), 2);

        assert_eq!(drain(&mut changes), vec![TreeChange::Root, TreeChange::Root]);
    }

    #[test]
    fn test_attach_seeds_existing_breakpoints() {
        let cache = Arc::new(BreakpointCache::new());
        cache.add_breakpoints(vec![breakpoint(4, &[])]);

        let tree = BreakpointTree::attach(cache, Session::new(SessionConfig::default()));
        assert_eq!(tree.get_children(None)[0].breakpoint_id(), 4);
    }

    #[test]
    fn test_dropping_tree_unsubscribes_from_cache() {
        let (cache, tree) = setup();
        let subscription = tree.subscription;
        drop(tree);

        assert!(!cache.off(subscription));
        cache.add_breakpoints(vec![breakpoint(1, &[])]);
        assert_eq!(cache.breakpoints().len(), 1);
    }

    #[test]
    fn test_pushed_hits_build_expression_values() {
        let (cache, tree) = setup();
        cache.add_breakpoints(vec![breakpoint(1, &["x", "y"])]);
        let mut changes = tree.subscribe();

        cache.add_hits(vec![hit(5, 1, &["42", "7", "extra"])]);

        let node = tree.find_breakpoint(1).unwrap();
        let hits = tree.get_children(Some(&node));
        assert_eq!(hits.len(), 1);

        let values = tree.get_children(Some(&hits[0]));
        let rendered: Vec<(String, String)> = values
            .iter()
            .map(|v| {
                let item = v.tree_item();
                (item.label, item.description)
            })
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("x:".to_string(), "42".to_string()),
                ("y:".to_string(), "7".to_string())
            ]
        );
        assert_eq!(drain(&mut changes), vec![TreeChange::Breakpoint(1)]);
    }

    #[test]
    fn test_hit_batch_notifies_each_breakpoint_once() {
        let (cache, tree) = setup();
        cache.add_breakpoints(vec![breakpoint(1, &[]), breakpoint(2, &[])]);
        let mut changes = tree.subscribe();

        cache.add_hits(vec![hit(1, 1, &[]), hit(2, 2, &[]), hit(3, 1, &[])]);

        assert_eq!(
            drain(&mut changes),
            vec![TreeChange::Breakpoint(1), TreeChange::Breakpoint(2)]
        );
        let node = tree.find_breakpoint(1).unwrap();
        assert_eq!(tree.get_children(Some(&node)).len(), 2);
    }

    #[test]
    fn test_remove_cascades_and_late_hit_is_dropped() {
        let (cache, tree) = setup();
        cache.add_breakpoints(vec![breakpoint(1, &["x"])]);
        cache.add_hits(vec![hit(5, 1, &["42"])]);
        let stale_hit = tree.get_children(tree.find_breakpoint(1).as_ref())[0].clone();

        cache.remove_breakpoints(&[1]);

        assert!(tree.find_breakpoint(1).is_none());
        assert!(!tree.is_loaded(1));
        assert!(tree.get_children(Some(&stale_hit)).is_empty());

        let mut changes = tree.subscribe();
        cache.add_hits(vec![hit(6, 1, &["1"])]);
        assert!(tree.find_breakpoint(1).is_none());
        assert!(drain(&mut changes).is_empty());
    }

    #[test]
    fn test_parent_navigation() {
        let (cache, tree) = setup();
        cache.add_breakpoints(vec![breakpoint(1, &["x"])]);
        cache.add_hits(vec![hit(5, 1, &["42"])]);

        let root = tree.find_breakpoint(1).unwrap();
        let hit_node = tree.get_children(Some(&root))[0].clone();
        let value_node = tree.get_children(Some(&hit_node))[0].clone();

        assert_eq!(tree.get_parent(&root), None);
        assert_eq!(tree.get_parent(&hit_node), Some(root.clone()));
        assert_eq!(tree.get_parent(&value_node), Some(hit_node));
        assert_eq!(value_node.breakpoint_id(), 1);
    }

    #[test]
    fn test_tree_items() {
        let (cache, tree) = setup();
        let mut conditional = breakpoint(1, &["x"]);
        conditional.condition = Some("x > 1".to_string());
        cache.add_breakpoints(vec![conditional]);
        cache.add_hits(vec![hit(5, 1, &["42"]), hit(6, 1, &[])]);

        let root = tree.find_breakpoint(1).unwrap();
        let item = root.tree_item();
        assert_eq!(item.label, "1");
        assert_eq!(item.description, "a.py:10");
        assert_eq!(
            item.tooltip,
            "Breakpoint ID 1 in file a.py at line 10 with the condition of \"x > 1\""
        );
        assert_eq!(item.collapsible, Collapsible::Collapsed);

        let hits = tree.get_children(Some(&root));
        let with_values = hits[0].tree_item();
        assert_eq!(with_values.description, "2024-01-02T03:04:05.000Z [1 values]");
        assert_eq!(with_values.context_value, "breakpoint-hit");
        assert_eq!(with_values.collapsible, Collapsible::Collapsed);

        let leaf = hits[1].tree_item();
        assert_eq!(leaf.collapsible, Collapsible::None);
        assert!(tree.get_children(Some(&hits[1])).is_empty());
    }

    #[tokio::test]
    async fn test_expand_offline_and_loaded() {
        let (cache, tree) = setup();
        cache.add_breakpoints(vec![breakpoint(1, &[]), breakpoint(2, &[])]);
        cache.add_hits(vec![hit(1, 2, &[])]);

        assert_eq!(tree.expand(1).await, Ok(ExpandOutcome::Offline));
        assert!(!tree.is_loaded(1));
        assert_eq!(tree.expand(2).await, Ok(ExpandOutcome::AlreadyLoaded));
        assert_eq!(tree.expand(9).await, Ok(ExpandOutcome::Unknown));

        let hit_node = tree.get_children(tree.find_breakpoint(2).as_ref())[0].clone();
        assert_eq!(tree.resolve(&hit_node).await, Ok(ExpandOutcome::NotExpandable));
    }

    #[test]
    fn test_snapshot_and_outline() {
        let (cache, tree) = setup();
        cache.add_breakpoints(vec![breakpoint(1, &["x"]), breakpoint(2, &[])]);
        cache.add_hits(vec![hit(5, 1, &["42"])]);

        let snapshot = tree.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].hits.as_ref().unwrap()[0].values[0].value, "42");
        assert!(snapshot[1].hits.is_none());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json[0]["id"], 1);
        assert_eq!(json[0]["file"], "a.py");

        let hit_node = tree.get_children(tree.find_breakpoint(1).as_ref())[0].clone();
        assert_eq!(
            tree.outline_of(&hit_node),
            "5 2024-01-02T03:04:05.000Z [1 values]\n  x: 42\n"
        );

        let outline = tree.outline();
        assert_eq!(
            outline,
            "1 a.py:10\n  5 2024-01-02T03:04:05.000Z [1 values]\n    x: 42\n2 a.py:10\n"
        );
    }
}
