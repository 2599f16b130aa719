// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Tree store management and manipulation.
//!
//! Muno keeps every node it has discovered so far in the __tree store__. The
//! tree store is addressed by logical path, e.g., "/team/backend", and only
//! ever holds nodes whose parent has been expanded. A deeply nested
//! declaration that nobody has navigated to yet is simply not in the store.
//!
//! # Tree State Layout
//!
//! The tree store persists itself at the top-level of the workspace root in
//! a file named ".muno-tree.toml". Nodes are stored as a flat listing of
//! records in pre-order, such that every parent record comes before the
//! records of its children. The root node is implicit.

use crate::path::tree_path;

use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Name of tree state file at workspace root.
pub const TREE_STATE_FILE_NAME: &str = ".muno-tree.toml";

/// Materialized node of the workspace tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Name of node, last segment of its path.
    pub name: String,

    /// Canonical logical path.
    pub path: String,

    /// What the node is.
    pub kind: NodeKind,

    /// Ordered child nodes discovered so far.
    pub children: Vec<NodeInfo>,

    /// Advisory flag reflecting repository dirtiness.
    pub has_local_changes: bool,
}

/// Variant of a tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Git repository, possibly not cloned yet.
    GitRepository {
        url: String,
        lazy: bool,
        cloned: bool,
    },

    /// Reference to another workspace definition.
    ConfigReference { source: String },

    /// Parent of other nodes without content of its own.
    Aggregate,
}

impl NodeInfo {
    /// Construct the root node.
    pub fn root() -> Self {
        Self::new("/", NodeKind::Aggregate)
    }

    /// Construct repository node.
    pub fn repository(path: impl Into<String>, url: impl Into<String>, lazy: bool, cloned: bool) -> Self {
        Self::new(
            path,
            NodeKind::GitRepository {
                url: url.into(),
                // INVARIANT: A cloned repository is never lazy.
                lazy: lazy && !cloned,
                cloned,
            },
        )
    }

    /// Construct workspace definition reference node.
    pub fn config_reference(path: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(
            path,
            NodeKind::ConfigReference {
                source: source.into(),
            },
        )
    }

    fn new(path: impl Into<String>, kind: NodeKind) -> Self {
        let path = path.into();
        Self {
            name: tree_path::name(&path).to_string(),
            path,
            kind,
            children: Vec::new(),
            has_local_changes: false,
        }
    }

    /// Check if node is a repository that has been cloned.
    pub fn is_cloned(&self) -> bool {
        matches!(self.kind, NodeKind::GitRepository { cloned: true, .. })
    }

    /// Check if node is a repository waiting for first use.
    pub fn is_lazy(&self) -> bool {
        matches!(self.kind, NodeKind::GitRepository { lazy: true, .. })
    }

    /// Check if node is the root.
    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Mark repository node as cloned.
    pub fn mark_cloned(&mut self) {
        if let NodeKind::GitRepository { lazy, cloned, .. } = &mut self.kind {
            *lazy = false;
            *cloned = true;
        }
    }

    /// Find direct child by name.
    pub fn child(&self, name: &str) -> Option<&NodeInfo> {
        self.children.iter().find(|child| child.name == name)
    }

    /// List this node and all its descendants in pre-order.
    pub fn descendants(&self) -> Vec<&NodeInfo> {
        let mut nodes = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            nodes.push(node);
            stack.extend(node.children.iter().rev());
        }

        nodes
    }

    fn find(&self, path: &str) -> Option<&NodeInfo> {
        let mut node = self;
        for segment in tree_path::segments(path) {
            node = node.child(segment)?;
        }

        Some(node)
    }

    fn find_mut(&mut self, path: &str) -> Option<&mut NodeInfo> {
        let mut node = self;
        for segment in tree_path::segments(path) {
            node = node.children.iter_mut().find(|child| child.name == segment)?;
        }

        Some(node)
    }
}

/// Registry of materialized nodes keyed by logical path.
pub trait TreeStore {
    /// Lookup node by logical path.
    fn get(&self, path: &str) -> Option<&NodeInfo>;

    /// Insert node under its parent.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::MissingParent`] if parent is not in the store.
    /// - Return [`StoreError::DuplicateNode`] if node already exists.
    fn add(&mut self, node: NodeInfo) -> Result<()>;

    /// Remove node along with its entire subtree.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NodeNotFound`] if node is not in the store.
    fn remove(&mut self, path: &str) -> Result<NodeInfo>;

    /// Replace node state, keeping its children.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NodeNotFound`] if node is not in the store.
    fn update(&mut self, node: &NodeInfo) -> Result<()>;

    /// Whole tree starting at root.
    fn tree(&self) -> &NodeInfo;

    /// Current navigation position.
    fn current(&self) -> &str;

    /// Set current navigation position.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NodeNotFound`] if node is not in the store.
    fn set_current(&mut self, path: &str) -> Result<()>;

    /// Make the children of parent follow its current declarations.
    ///
    /// Children are rebuilt in declaration order. A redeclared child keeps
    /// its materialization state and known children, unless its kind or
    /// source changed, in which case the declared node replaces it. Children
    /// no longer declared are dropped along with their subtrees.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NodeNotFound`] if parent is not in the store.
    fn reconcile_children(&mut self, parent: &str, declared: Vec<NodeInfo>) -> Result<()>;

    /// Persist store state.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::WriteState`] if state cannot be saved.
    fn persist(&self) -> Result<()>;
}

/// Tree store persisted to a TOML state file.
#[derive(Debug, Clone)]
pub struct FileTreeStore {
    state_path: PathBuf,
    root: NodeInfo,
    current: String,
}

impl FileTreeStore {
    /// Construct empty tree store backed by state file.
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            root: NodeInfo::root(),
            current: "/".into(),
        }
    }

    /// Load tree store from state file, reconciled with root declarations.
    ///
    /// The `declared` listing holds the nodes the root workspace definition
    /// currently declares, see [`TreeStore::reconcile_children`]. Without a
    /// state file, the tree is simply built from the declared nodes.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadState`] if state file cannot be read.
    /// - Return [`StoreError::ParseState`] if state file is malformed.
    pub fn load_from_config(state_path: impl Into<PathBuf>, declared: Vec<NodeInfo>) -> Result<Self> {
        let mut store = Self::open(state_path)?;
        store.reconcile_children("/", declared)?;

        Ok(store)
    }

    /// Open tree store from state file, or construct empty one if missing.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadState`] if state file cannot be read.
    /// - Return [`StoreError::ParseState`] if state file is malformed.
    pub fn open(state_path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::new(state_path);
        if !store.state_path.exists() {
            return Ok(store);
        }

        let content = read_to_string(&store.state_path).map_err(|err| StoreError::ReadState {
            source: err,
            state_path: store.state_path.clone(),
        })?;
        let snapshot: TreeSnapshot =
            toml::from_str(&content).map_err(|err| StoreError::ParseState {
                source: err,
                state_path: store.state_path.clone(),
            })?;

        for record in snapshot.nodes {
            let path = record.path.clone();
            if let Err(err) = store.add(record.into()) {
                warn!("skip tree state record {path:?}: {err}");
            }
        }
        store.current = snapshot.current;

        Ok(store)
    }

    /// Path to backing state file.
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }
}

impl TreeStore for FileTreeStore {
    fn get(&self, path: &str) -> Option<&NodeInfo> {
        self.root.find(path)
    }

    fn add(&mut self, node: NodeInfo) -> Result<()> {
        let parent_path = tree_path::parent(&node.path)
            .ok_or_else(|| StoreError::DuplicateNode(node.path.clone()))?;
        let parent = self
            .root
            .find_mut(&parent_path)
            .ok_or_else(|| StoreError::MissingParent(node.path.clone()))?;

        if parent.child(&node.name).is_some() {
            return Err(StoreError::DuplicateNode(node.path));
        }

        parent.children.push(node);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<NodeInfo> {
        let parent_path =
            tree_path::parent(path).ok_or_else(|| StoreError::NodeNotFound(path.into()))?;
        let name = tree_path::name(path);
        let parent = self
            .root
            .find_mut(&parent_path)
            .ok_or_else(|| StoreError::NodeNotFound(path.into()))?;
        let index = parent
            .children
            .iter()
            .position(|child| child.name == name)
            .ok_or_else(|| StoreError::NodeNotFound(path.into()))?;

        // INVARIANT: Current position never points into a removed subtree.
        if tree_path::is_within(&self.current, path) {
            self.current = parent_path;
        }

        Ok(parent.children.remove(index))
    }

    fn update(&mut self, node: &NodeInfo) -> Result<()> {
        let existing = self
            .root
            .find_mut(&node.path)
            .ok_or_else(|| StoreError::NodeNotFound(node.path.clone()))?;
        existing.kind = node.kind.clone();
        existing.has_local_changes = node.has_local_changes;

        Ok(())
    }

    fn tree(&self) -> &NodeInfo {
        &self.root
    }

    fn current(&self) -> &str {
        &self.current
    }

    fn set_current(&mut self, path: &str) -> Result<()> {
        if self.root.find(path).is_none() {
            return Err(StoreError::NodeNotFound(path.into()));
        }

        self.current = path.into();
        Ok(())
    }

    fn reconcile_children(&mut self, parent: &str, declared: Vec<NodeInfo>) -> Result<()> {
        let node = self
            .root
            .find_mut(parent)
            .ok_or_else(|| StoreError::NodeNotFound(parent.into()))?;
        let mut previous = std::mem::take(&mut node.children);

        for declared in declared {
            let kept = previous
                .iter()
                .position(|old| old.name == declared.name)
                .map(|index| previous.remove(index));

            node.children.push(match kept {
                Some(old) => reconcile(old, declared),
                None => declared,
            });
        }

        for dropped in previous {
            debug!("drop undeclared node {:?} from tree state", dropped.path);
        }

        // INVARIANT: Current position never points into a dropped subtree.
        while self.root.find(&self.current).is_none() {
            self.current = tree_path::parent(&self.current).unwrap_or_else(|| "/".into());
        }

        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let snapshot = TreeSnapshot {
            current: self.current.clone(),
            nodes: self
                .root
                .descendants()
                .into_iter()
                .filter(|node| !node.is_root())
                .map(NodeRecord::from)
                .collect(),
        };

        let content = toml::to_string(&snapshot).map_err(StoreError::SerializeState)?;
        write(&self.state_path, content).map_err(|err| StoreError::WriteState {
            source: err,
            state_path: self.state_path.clone(),
        })
    }
}

/// Keep materialization state of a previously stored node for a redeclared
/// node of the same kind and source.
fn reconcile(old: NodeInfo, declared: NodeInfo) -> NodeInfo {
    let same_source = match (&old.kind, &declared.kind) {
        (NodeKind::GitRepository { url: was, .. }, NodeKind::GitRepository { url: now, .. }) => {
            was == now
        }
        (NodeKind::ConfigReference { source: was }, NodeKind::ConfigReference { source: now }) => {
            was == now
        }
        (NodeKind::Aggregate, NodeKind::Aggregate) => true,
        _ => false,
    };

    if !same_source {
        debug!("replace redeclared node {:?}", declared.path);
        return declared;
    }

    let was_cloned = old.is_cloned();
    let mut node = NodeInfo {
        children: old.children,
        has_local_changes: old.has_local_changes,
        ..declared
    };
    if was_cloned {
        node.mark_cloned();
    }

    node
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TreeSnapshot {
    current: String,

    #[serde(default, rename = "node")]
    nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum RecordKind {
    Repository,
    Config,
    Aggregate,
}

#[derive(Debug, Deserialize, Serialize)]
struct NodeRecord {
    path: String,
    kind: RecordKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,

    #[serde(default)]
    lazy: bool,

    #[serde(default)]
    cloned: bool,

    #[serde(default)]
    local_changes: bool,
}

impl From<&NodeInfo> for NodeRecord {
    fn from(node: &NodeInfo) -> Self {
        let mut record = Self {
            path: node.path.clone(),
            kind: RecordKind::Aggregate,
            url: None,
            source: None,
            lazy: false,
            cloned: false,
            local_changes: node.has_local_changes,
        };

        match &node.kind {
            NodeKind::GitRepository { url, lazy, cloned } => {
                record.kind = RecordKind::Repository;
                record.url = Some(url.clone());
                record.lazy = *lazy;
                record.cloned = *cloned;
            }
            NodeKind::ConfigReference { source } => {
                record.kind = RecordKind::Config;
                record.source = Some(source.clone());
            }
            NodeKind::Aggregate => {}
        }

        record
    }
}

impl From<NodeRecord> for NodeInfo {
    fn from(record: NodeRecord) -> Self {
        let mut node = match record.kind {
            RecordKind::Repository => NodeInfo::repository(
                record.path,
                record.url.unwrap_or_default(),
                record.lazy,
                record.cloned,
            ),
            RecordKind::Config => {
                NodeInfo::config_reference(record.path, record.source.unwrap_or_default())
            }
            RecordKind::Aggregate => NodeInfo::new(record.path, NodeKind::Aggregate),
        };
        node.has_local_changes = record.local_changes;

        node
    }
}

/// All possible error types for tree store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Node is not in the store.
    #[error("node {0:?} not found in tree")]
    NodeNotFound(String),

    /// Node is already in the store.
    #[error("node {0:?} already exists in tree")]
    DuplicateNode(String),

    /// Parent of node is not in the store.
    #[error("parent of node {0:?} not found in tree")]
    MissingParent(String),

    /// Tree state file cannot be read.
    #[error("failed to read tree state at {:?}", state_path.display())]
    ReadState {
        #[source]
        source: std::io::Error,
        state_path: PathBuf,
    },

    /// Tree state file is malformed.
    #[error("failed to parse tree state at {:?}", state_path.display())]
    ParseState {
        #[source]
        source: toml::de::Error,
        state_path: PathBuf,
    },

    /// Tree state cannot be serialized.
    #[error(transparent)]
    SerializeState(#[from] toml::ser::Error),

    /// Tree state file cannot be written.
    #[error("failed to write tree state at {:?}", state_path.display())]
    WriteState {
        #[source]
        source: std::io::Error,
        state_path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
