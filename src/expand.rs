// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Recursive expansion and materialization of the workspace tree.
//!
//! The expander walks the tree depth-first. For every node it visits it
//! makes sure the node's directory exists, gives the node its content, i.e.,
//! clones a repository or links a referenced workspace definition, and then
//! discovers the children of the node by reading whatever workspace
//! definition the content provides.
//!
//! # Best Effort
//!
//! A walk never aborts because a single node misbehaves. Failing clones,
//! broken links, and malformed definitions are logged as warnings and
//! recorded in the [`WalkReport`] of the walk, and the walk moves on to the
//! next sibling. Each visit returns its own report, which the caller merges
//! into its own.
//!
//! # Convergence
//!
//! Every mutation is persisted to the tree store as soon as it happens, and
//! nothing that is already materialized is redone. Re-running an interrupted
//! walk picks up where the previous one stopped.

use crate::{
    config::{NodeDeclaration, NodeSource, WorkspaceConfig, CONFIG_FILE_NAME},
    git::{CloneOptions, GitOps, PullOptions},
    path::{has_repository_marker, tree_path, PathTranslator},
    reference::{context_dir, dereference, resolve_config_reference, ConfigLocation},
    store::{NodeInfo, NodeKind, StoreError, TreeStore},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Knobs of a walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    /// Descend below the direct children of the target.
    pub recursive: bool,

    /// Materialize lazy repositories too.
    pub include_lazy: bool,
}

impl WalkOptions {
    /// Construct new walk options.
    pub fn new(recursive: bool, include_lazy: bool) -> Self {
        Self {
            recursive,
            include_lazy,
        }
    }
}

/// What a walk does to repositories that are already cloned.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WalkMode {
    Clone,
    Pull(PullOptions),
}

/// Outcome of a walk, listing logical paths by what happened to them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkReport {
    pub cloned: Vec<String>,
    pub pulled: Vec<String>,
    pub pushed: Vec<String>,
    pub linked: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<WalkFailure>,
}

impl WalkReport {
    /// Absorb report of a nested walk.
    pub fn merge(&mut self, other: WalkReport) {
        self.cloned.extend(other.cloned);
        self.pulled.extend(other.pulled);
        self.pushed.extend(other.pushed);
        self.linked.extend(other.linked);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }

    /// Check if no node failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn fail(&mut self, path: &str, kind: FailureKind, error: impl Display) {
        warn!("{kind} failed for {path:?}: {error}");
        self.failed.push(WalkFailure {
            path: path.into(),
            kind,
            message: error.to_string(),
        });
    }
}

impl Display for WalkReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} cloned, {} pulled, {} pushed, {} linked, {} skipped, {} failed",
            self.cloned.len(),
            self.pulled.len(),
            self.pushed.len(),
            self.linked.len(),
            self.skipped.len(),
            self.failed.len()
        )
    }
}

/// Single node that could not be handled during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkFailure {
    pub path: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Step of a walk that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Directory,
    Link,
    Clone,
    Pull,
    Push,
    Config,
    Status,
}

impl Display for FailureKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Self::Directory => "directory creation",
            Self::Link => "definition link",
            Self::Clone => "clone",
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Config => "definition load",
            Self::Status => "status",
        };
        fmt.write_str(label)
    }
}

/// Status of a single cloned repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub branch: String,
    pub dirty: bool,
}

/// Depth-first walker over the workspace tree.
#[derive(Debug)]
pub struct Expander<'a, G, S>
where
    G: GitOps + ?Sized,
    S: TreeStore + ?Sized,
{
    root: &'a Path,
    git: &'a G,
    store: &'a mut S,
    clone_options: CloneOptions,
}

impl<'a, G, S> Expander<'a, G, S>
where
    G: GitOps + ?Sized,
    S: TreeStore + ?Sized,
{
    /// Construct new expander for workspace root.
    pub fn new(root: &'a Path, git: &'a G, store: &'a mut S, clone_options: CloneOptions) -> Self {
        Self {
            root,
            git,
            store,
            clone_options,
        }
    }

    /// Clone everything below target.
    ///
    /// The target and its children are materialized according to `options`.
    /// A lazy target that is not included is skipped along with its
    /// children.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NodeNotFound`] if target is not in the store.
    pub fn clone_all(&mut self, target: &str, options: WalkOptions) -> Result<WalkReport> {
        self.run(target, options, &WalkMode::Clone, options.include_lazy)
    }

    /// Pull everything below target.
    ///
    /// Repositories that are not cloned yet are cloned instead of pulled.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NodeNotFound`] if target is not in the store.
    pub fn pull_all(
        &mut self,
        target: &str,
        options: WalkOptions,
        pull: PullOptions,
    ) -> Result<WalkReport> {
        self.run(target, options, &WalkMode::Pull(pull), options.include_lazy)
    }

    /// Expand target by one level.
    ///
    /// Materializes the target, even if it is lazy, and registers its
    /// declared children. Eager children are cloned, lazy ones only
    /// registered.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NodeNotFound`] if target is not in the store.
    pub fn expand(&mut self, target: &str) -> Result<WalkReport> {
        self.run(target, WalkOptions::new(false, false), &WalkMode::Clone, true)
    }

    /// Materialize a single node without looking at its children.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NodeNotFound`] if node is not in the store.
    pub fn ensure(&mut self, path: &str) -> Result<WalkReport> {
        let node = self.node(path)?;
        let physical = self.physical_path(path);
        let mut report = WalkReport::default();
        self.materialize(&node, &physical, true, &WalkMode::Clone, &mut report);

        Ok(report)
    }

    /// List nodes that a clone walk would clone, without touching anything.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NodeNotFound`] if target is not in the store.
    pub fn collect(&self, target: &str, options: WalkOptions) -> Result<Vec<NodeInfo>> {
        let node = self.node(target)?;
        let physical = self.physical_path(target);

        Ok(self.collect_node(node, physical, options, true))
    }

    /// Push every cloned repository in the known subtree of target.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NodeNotFound`] if target is not in the store.
    #[instrument(skip(self), level = "debug")]
    pub fn push_all(&mut self, target: &str) -> Result<WalkReport> {
        let mut report = WalkReport::default();
        for (path, physical) in self.cloned_repositories(target)? {
            match self.git.push(&physical) {
                Ok(()) => report.pushed.push(path),
                Err(err) => report.fail(&path, FailureKind::Push, err),
            }
        }

        info!("push {target:?}: {report}");
        Ok(report)
    }

    /// Query status of every cloned repository in the known subtree of
    /// target, recording dirtiness in the tree store.
    ///
    /// Repositories whose status cannot be queried are logged and left out.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NodeNotFound`] if target is not in the store.
    #[instrument(skip(self), level = "debug")]
    pub fn status_all(&mut self, target: &str) -> Result<Vec<StatusEntry>> {
        let mut entries = Vec::new();
        for (path, physical) in self.cloned_repositories(target)? {
            let status = match self.git.status(&physical) {
                Ok(status) => status,
                Err(err) => {
                    warn!("{} failed for {path:?}: {err}", FailureKind::Status);
                    continue;
                }
            };

            if let Some(mut node) = self.store.get(&path).cloned() {
                node.has_local_changes = status.dirty;
                self.store.update(&node)?;
            }

            entries.push(StatusEntry {
                path,
                branch: status.branch,
                dirty: status.dirty,
            });
        }
        self.persist();

        Ok(entries)
    }

    fn run(
        &mut self,
        target: &str,
        options: WalkOptions,
        mode: &WalkMode,
        include_lazy_target: bool,
    ) -> Result<WalkReport> {
        let node = self.node(target)?;
        let physical = self.physical_path(target);
        let mut report = WalkReport::default();

        if self.materialize(&node, &physical, include_lazy_target, mode, &mut report) {
            report.merge(self.expand_children(&node, &physical, options, mode));
        }

        info!("walk {target:?}: {report}");
        Ok(report)
    }

    #[instrument(skip(self, physical, mode), level = "debug")]
    fn visit(
        &mut self,
        path: &str,
        physical: &Path,
        options: WalkOptions,
        mode: &WalkMode,
    ) -> WalkReport {
        let mut report = WalkReport::default();
        let Some(node) = self.store.get(path).cloned() else {
            warn!("skip {path:?}: not in tree");
            return report;
        };

        if !self.materialize(&node, physical, options.include_lazy, mode, &mut report) {
            return report;
        }

        if !options.recursive {
            return report;
        }

        report.merge(self.expand_children(&node, physical, options, mode));
        report
    }

    /// Give node its content. Returns whether the node has content worth
    /// looking into for children.
    fn materialize(
        &mut self,
        node: &NodeInfo,
        physical: &Path,
        include_lazy: bool,
        mode: &WalkMode,
        report: &mut WalkReport,
    ) -> bool {
        if let Err(err) = mkdirp::mkdirp(physical) {
            report.fail(&node.path, FailureKind::Directory, err);
            return false;
        }

        match &node.kind {
            NodeKind::Aggregate => true,
            NodeKind::ConfigReference { source } => match ConfigLocation::parse(source) {
                ConfigLocation::Local(source) => match place_config_link(&source, physical) {
                    Ok(()) => {
                        report.linked.push(node.path.clone());
                        true
                    }
                    Err(err) => {
                        report.fail(&node.path, FailureKind::Link, err);
                        debug!("no content for {:?}", node.path);
                        false
                    }
                },
                ConfigLocation::Remote(url) => {
                    info!("remote definition {url} of {:?} is not fetched, no content", node.path);
                    report.skipped.push(node.path.clone());
                    false
                }
            },
            NodeKind::GitRepository { url, .. } => {
                if node.is_cloned() || has_repository_marker(physical) {
                    if !node.is_cloned() {
                        self.record_cloned(node);
                    }

                    if let WalkMode::Pull(pull) = mode {
                        match self.git.pull(physical, pull) {
                            Ok(()) => report.pulled.push(node.path.clone()),
                            Err(err) => report.fail(&node.path, FailureKind::Pull, err),
                        }
                    }

                    return true;
                }

                if node.is_lazy() && !include_lazy {
                    debug!("skip lazy repository {:?}", node.path);
                    report.skipped.push(node.path.clone());
                    return false;
                }

                match self.git.clone_repo(url, physical, &self.clone_options) {
                    Ok(()) => {
                        self.record_cloned(node);
                        report.cloned.push(node.path.clone());
                        true
                    }
                    Err(err) => {
                        report.fail(&node.path, FailureKind::Clone, err);
                        false
                    }
                }
            }
        }
    }

    /// Discover declared children of node, reconcile them with the tree
    /// store, and visit all of them.
    fn expand_children(
        &mut self,
        node: &NodeInfo,
        physical: &Path,
        options: WalkOptions,
        mode: &WalkMode,
    ) -> WalkReport {
        let mut report = WalkReport::default();
        let path = node.path.as_str();
        let Some(config_file) = governing_config_file(node, physical) else {
            return report;
        };

        let config = match WorkspaceConfig::load(&config_file) {
            Ok(config) => config,
            Err(err) => {
                report.fail(path, FailureKind::Config, err);
                return report;
            }
        };
        let context = context_dir(&config_file);
        let child_root = physical.join(config.repos_dir());

        let mut declared = Vec::new();
        let mut children = Vec::new();
        for declaration in &config.nodes {
            let child_path = tree_path::join(path, &declaration.name);
            let child_physical = child_root.join(&declaration.name);

            match node_from_declaration(&child_path, declaration, &context, &child_physical) {
                Ok(child) => {
                    declared.push(child);
                    children.push((child_path, child_physical));
                }
                Err(err) => report.fail(&child_path, FailureKind::Config, err),
            }
        }

        if let Err(err) = self.store.reconcile_children(path, declared) {
            report.fail(path, FailureKind::Config, err);
            return report;
        }
        self.persist();

        for (child_path, child_physical) in children {
            report.merge(self.visit(&child_path, &child_physical, options, mode));
        }

        report
    }

    fn collect_node(
        &self,
        node: NodeInfo,
        physical: PathBuf,
        options: WalkOptions,
        is_target: bool,
    ) -> Vec<NodeInfo> {
        let mut planned = Vec::new();
        if let NodeKind::GitRepository { .. } = node.kind {
            if !node.is_cloned() && !has_repository_marker(&physical) {
                if !node.is_lazy() || options.include_lazy {
                    planned.push(node);
                }

                // INVARIANT: Children of uncloned repositories are unknowable.
                return planned;
            }
        }

        if !is_target && !options.recursive {
            return planned;
        }

        let Some(config_file) = governing_config_file(&node, &physical) else {
            return planned;
        };
        let config = match WorkspaceConfig::load(&config_file) {
            Ok(config) => config,
            Err(err) => {
                warn!("cannot preview children of {:?}: {err}", node.path);
                return planned;
            }
        };
        let context = context_dir(&config_file);

        for declaration in &config.nodes {
            let child_path = tree_path::join(&node.path, &declaration.name);
            let child_physical = physical.join(config.repos_dir()).join(&declaration.name);
            let child = match self.store.get(&child_path) {
                Some(child) => child.clone(),
                None => match node_from_declaration(&child_path, declaration, &context, &child_physical) {
                    Ok(child) => child,
                    Err(err) => {
                        warn!("cannot preview {child_path:?}: {err}");
                        continue;
                    }
                },
            };

            planned.extend(self.collect_node(child, child_physical, options, false));
        }

        planned
    }

    fn cloned_repositories(&self, target: &str) -> Result<Vec<(String, PathBuf)>> {
        let node = self
            .store
            .get(target)
            .ok_or_else(|| StoreError::NodeNotFound(target.into()))?;
        let translator = PathTranslator::new(self.root, &*self.store);

        Ok(node
            .descendants()
            .into_iter()
            .filter(|node| node.is_cloned())
            .map(|node| (node.path.clone(), translator.compute_filesystem_path(&node.path)))
            .collect())
    }

    fn record_cloned(&mut self, node: &NodeInfo) {
        let mut node = node.clone();
        node.mark_cloned();
        if let Err(err) = self.store.update(&node) {
            warn!("cannot record clone of {:?}: {err}", node.path);
        }
        self.persist();
    }

    fn persist(&self) {
        if let Err(err) = self.store.persist() {
            warn!("cannot persist tree state: {err}");
        }
    }

    fn node(&self, path: &str) -> Result<NodeInfo> {
        self.store
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NodeNotFound(path.into()))
    }

    fn physical_path(&self, path: &str) -> PathBuf {
        PathTranslator::new(self.root, &*self.store).compute_filesystem_path(path)
    }
}

/// Turn declaration into tree node at logical path.
///
/// Repositories count as cloned if their directory already holds a
/// repository. Definition references are resolved against `context`.
///
/// # Errors
///
/// - Return [`ConfigError`](crate::config::ConfigError) if a definition
///   reference cannot be resolved.
pub fn node_from_declaration(
    path: &str,
    declaration: &NodeDeclaration,
    context: &Path,
    physical: &Path,
) -> std::result::Result<NodeInfo, crate::config::ConfigError> {
    match &declaration.source {
        NodeSource::Repository { url, .. } => Ok(NodeInfo::repository(
            path,
            url,
            declaration.is_lazy(),
            has_repository_marker(physical),
        )),
        NodeSource::Config { file } => {
            let location = resolve_config_reference(file, context)?;
            Ok(NodeInfo::config_reference(path, location.to_string()))
        }
    }
}

/// Real location of the workspace definition that declares the children of a
/// node, if it has any.
fn governing_config_file(node: &NodeInfo, physical: &Path) -> Option<PathBuf> {
    let candidate = match &node.kind {
        NodeKind::ConfigReference { source } => match ConfigLocation::parse(source) {
            ConfigLocation::Local(source) => source,
            ConfigLocation::Remote(_) => return None,
        },
        _ => physical.join(CONFIG_FILE_NAME),
    };

    // INVARIANT: Relative references resolve against the real file.
    let real = dereference(candidate);
    real.is_file().then_some(real)
}

/// Link referenced definition into node directory.
///
/// Keeps a correct link as-is. Anything else in the way is replaced. Falls
/// back to copying when links cannot be created.
fn place_config_link(source: &Path, directory: &Path) -> io::Result<()> {
    if !source.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("referenced definition {:?} does not exist", source.display()),
        ));
    }

    let link = directory.join(CONFIG_FILE_NAME);
    match fs::symlink_metadata(&link) {
        // INVARIANT: A copy placed by an earlier fallback is kept while current.
        Ok(meta) if meta.is_file() && fs::read(&link)? == fs::read(source)? => return Ok(()),
        Ok(meta) if meta.file_type().is_symlink() => {
            if fs::read_link(&link)? == source {
                return Ok(());
            }
            debug!("replace stale link {:?}", link.display());
            fs::remove_file(&link)?;
        }
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&link)?,
        Ok(_) => fs::remove_file(&link)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    if let Err(err) = symlink_file(source, &link) {
        debug!("cannot link {:?}, copy instead: {err}", link.display());
        fs::copy(source, &link)?;
    }

    Ok(())
}

#[cfg(unix)]
fn symlink_file(source: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(windows)]
fn symlink_file(source: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(source, link)
}

/// Friendly result alias :3
type Result<T, E = StoreError> = std::result::Result<T, E>;
