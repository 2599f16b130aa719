// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workspace navigation and mutation.
//!
//! A __workspace__ is a directory holding a root `muno.yaml` definition, the
//! tree state file, and the materialized nodes of the workspace tree below
//! the root's child directory. The [`Workspace`] type ties together the
//! definition, the tree store, path translation, and the expander, and is
//! the entry point for everything the command line does.
//!
//! # Governing Definitions
//!
//! Adding or removing a node edits the definition that declares the
//! children of the current position:
//!
//! - The root position edits the root definition.
//! - A definition reference edits the real referenced file. Remote
//!   references cannot be edited.
//! - A cloned repository edits its own `muno.yaml`, which is created on
//!   demand.

use crate::{
    config::{
        repo_name_from_url, validate_node_name, ConfigError, FetchMode, NodeDeclaration,
        WorkspaceConfig, CONFIG_FILE_NAME,
    },
    expand::{node_from_declaration, Expander, StatusEntry, WalkOptions, WalkReport},
    git::{CloneOptions, Git2Ops, GitError, GitOps, PullOptions},
    path::{canonicalize_lenient, has_repository_marker, tree_path, PathError, PathTranslator},
    reference::{context_dir, dereference, ConfigLocation},
    store::{FileTreeStore, NodeInfo, NodeKind, StoreError, TreeStore, TREE_STATE_FILE_NAME},
    ui::{Confirm, InquireConfirm},
};

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Options for adding a repository.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddOptions {
    /// Node name, derived from URL if absent.
    pub name: Option<String>,

    /// When to clone the repository.
    pub fetch: FetchMode,
}

/// Outcome of resolving a navigation target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub logical: String,
    pub physical: PathBuf,
    pub node: NodeInfo,
}

/// A workspace tree rooted at a directory.
#[derive(Debug)]
pub struct Workspace<G = Git2Ops, U = InquireConfirm>
where
    G: GitOps,
    U: Confirm,
{
    root: PathBuf,
    git: G,
    ui: U,
    loaded: Option<Loaded>,
}

#[derive(Debug)]
struct Loaded {
    config: WorkspaceConfig,
    store: FileTreeStore,
}

impl<G, U> Workspace<G, U>
where
    G: GitOps,
    U: Confirm,
{
    /// Construct new unloaded workspace at root directory.
    pub fn new(root: impl Into<PathBuf>, git: G, ui: U) -> Self {
        Self {
            root: root.into(),
            git,
            ui,
            loaded: None,
        }
    }

    /// Construct and load workspace at root directory.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NotInitialized`] if root has no definition.
    /// - Return [`WorkspaceError::ConfigLoad`] if definition is malformed.
    pub fn open(root: impl Into<PathBuf>, git: G, ui: U) -> Result<Self> {
        let mut workspace = Self::new(root, git, ui);
        workspace.load()?;

        Ok(workspace)
    }

    /// Initialize new workspace at root, then load it.
    ///
    /// Keeps an existing root definition intact.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::Io`] if directories cannot be created.
    /// - Return [`WorkspaceError::Config`] if definition cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn init(&mut self, name: &str) -> Result<()> {
        mkdirp::mkdirp(&self.root)?;
        let config_path = self.root.join(CONFIG_FILE_NAME);
        let config = if WorkspaceConfig::exists(&config_path) {
            info!("keep existing definition at {:?}", config_path.display());
            WorkspaceConfig::load(&config_path).map_err(|source| WorkspaceError::ConfigLoad {
                source,
                path: config_path.clone(),
            })?
        } else {
            let config = WorkspaceConfig::new(name);
            config.save(&config_path)?;
            info!("initialized workspace {name:?} at {:?}", self.root.display());
            config
        };
        mkdirp::mkdirp(self.root.join(config.repos_dir()))?;

        self.load()?;
        self.loaded()?.store.persist()?;

        Ok(())
    }

    /// Load root definition and tree state.
    ///
    /// Top-level declarations of the root definition are reconciled with the
    /// tree state, so edits to the root definition take effect right away.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NotInitialized`] if root has no definition.
    /// - Return [`WorkspaceError::ConfigLoad`] if definition is malformed.
    /// - Return [`WorkspaceError::Store`] if tree state is malformed.
    #[instrument(skip(self), level = "debug")]
    pub fn load(&mut self) -> Result<()> {
        self.root = canonicalize_lenient(&self.root)?;
        let config_path = self.root.join(CONFIG_FILE_NAME);
        if !config_path.is_file() {
            return Err(WorkspaceError::NotInitialized(self.root.clone()));
        }

        let config = WorkspaceConfig::load(&config_path).map_err(|source| {
            WorkspaceError::ConfigLoad {
                source,
                path: config_path.clone(),
            }
        })?;

        let context = context_dir(dereference(&config_path));
        let child_root = self.root.join(config.repos_dir());
        let declared = config
            .nodes
            .iter()
            .map(|declaration| {
                node_from_declaration(
                    &tree_path::join("/", &declaration.name),
                    declaration,
                    &context,
                    &child_root.join(&declaration.name),
                )
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let store = FileTreeStore::load_from_config(self.root.join(TREE_STATE_FILE_NAME), declared)?;
        debug!("loaded workspace {:?}", config.workspace.name);
        self.loaded = Some(Loaded { config, store });

        Ok(())
    }

    /// Path to workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root workspace definition.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NotInitialized`] if not loaded.
    pub fn config(&self) -> Result<&WorkspaceConfig> {
        Ok(&self.loaded()?.config)
    }

    /// Whole known tree.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NotInitialized`] if not loaded.
    pub fn tree(&self) -> Result<&NodeInfo> {
        Ok(self.loaded()?.store.tree())
    }

    /// Compute physical path of logical path.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NotInitialized`] if not loaded.
    pub fn compute_filesystem_path(&self, logical: &str) -> Result<PathBuf> {
        let loaded = self.loaded()?;
        Ok(PathTranslator::new(&self.root, &loaded.store).compute_filesystem_path(logical))
    }

    /// Resolve logical path of physical path.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NotInitialized`] if not loaded.
    /// - Return [`WorkspaceError::PathOutsideWorkspace`] if path is not
    ///   inside the workspace.
    pub fn resolve_tree_path(&self, physical: impl AsRef<Path>) -> Result<String> {
        let loaded = self.loaded()?;
        Ok(PathTranslator::new(&self.root, &loaded.store).resolve_tree_path(physical)?)
    }

    /// Current logical position.
    ///
    /// Derived from the working directory when it lies inside the workspace,
    /// otherwise taken from the tree state.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NotInitialized`] if not loaded.
    /// - Return [`WorkspaceError::Io`] if working directory is unavailable.
    pub fn current_path(&self) -> Result<String> {
        let loaded = self.loaded()?;
        let cwd = canonicalize_lenient(std::env::current_dir()?)?;
        if cwd.starts_with(&self.root) {
            return self.resolve_tree_path(cwd);
        }

        Ok(loaded.store.current().to_string())
    }

    /// Set current logical position.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NodeNotFound`] if node is unknown.
    pub fn set_current(&mut self, logical: &str) -> Result<()> {
        let store = &mut self.loaded_mut()?.store;
        store.set_current(logical)?;
        store.persist()?;

        Ok(())
    }

    /// Lookup known node relative to current position without expanding
    /// anything.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NodeNotFound`] if node is unknown.
    pub fn node(&self, target: &str) -> Result<NodeInfo> {
        let logical = tree_path::navigate(&self.current_path()?, target);
        self.loaded()?
            .store
            .get(&logical)
            .cloned()
            .ok_or(WorkspaceError::NodeNotFound(logical))
    }

    /// Add repository as child of current position.
    ///
    /// The declaration is appended to the governing definition first. Eager
    /// repositories are cloned right away.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NodeExists`] if name is taken.
    /// - Return [`WorkspaceError::NotMaterialized`] if current position has no
    ///   content that could hold a definition.
    /// - Return [`WorkspaceError::CloneFailure`] if eager clone fails. The
    ///   node stays declared, a later clone walk picks it up.
    #[instrument(skip(self, options), level = "debug")]
    pub fn add(&mut self, url: &str, options: AddOptions) -> Result<NodeInfo> {
        let name = options.name.unwrap_or_else(|| repo_name_from_url(url));
        validate_node_name(&name)?;

        let parent = self.current_path()?;
        let path = tree_path::join(&parent, &name);
        if self.loaded()?.store.get(&path).is_some() {
            return Err(WorkspaceError::NodeExists(path));
        }

        let (config_path, mut config) = self.governing_config(&parent)?;
        let declaration = NodeDeclaration::repository(&name, url, options.fetch);
        let lazy = declaration.is_lazy();
        config.add_node(declaration).map_err(|err| match err {
            ConfigError::DuplicateNode(_) => WorkspaceError::NodeExists(path.clone()),
            err => err.into(),
        })?;
        self.save_config(&config_path, config)?;

        let physical = self.compute_filesystem_path(&path)?;
        let node = NodeInfo::repository(&path, url, lazy, has_repository_marker(&physical));
        let store = &mut self.loaded_mut()?.store;
        store.add(node.clone())?;
        store.persist()?;
        info!("added {path:?}");

        if lazy || node.is_cloned() {
            return Ok(node);
        }

        let report = self.expander()?.ensure(&path)?;
        if let Some(failure) = report.failed.into_iter().next() {
            return Err(WorkspaceError::CloneFailure {
                path,
                message: failure.message,
            });
        }

        self.node(&path)
    }

    /// Remove child of current position after user confirmation.
    ///
    /// Returns whether the node was removed.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NodeNotFound`] if no such child exists.
    /// - Return [`WorkspaceError::Io`] if files cannot be deleted.
    #[instrument(skip(self), level = "debug")]
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        let parent = self.current_path()?;
        let path = tree_path::join(&parent, name);
        if self.loaded()?.store.get(&path).is_none() {
            return Err(WorkspaceError::NodeNotFound(path));
        }

        if !self
            .ui
            .confirm(&format!("Remove {path} and delete its files?"))
        {
            info!("keep {path:?}");
            return Ok(false);
        }

        let (config_path, mut config) = self.governing_config(&parent)?;
        let physical = self.compute_filesystem_path(&path)?;
        if config.remove_node(name).is_none() {
            warn!("{path:?} was not declared in {:?}", config_path.display());
        }
        self.save_config(&config_path, config)?;

        let store = &mut self.loaded_mut()?.store;
        store.remove(&path)?;
        store.persist()?;

        // INVARIANT: Files are deleted only after the node is undeclared.
        if fs::symlink_metadata(&physical).is_ok() {
            debug!("delete {:?}", physical.display());
            fs::remove_dir_all(&physical)?;
        }
        info!("removed {path:?}");

        Ok(true)
    }

    /// Resolve navigation target into a known node, and make it the current
    /// position.
    ///
    /// Targets that are declared but not discovered yet are found by
    /// expanding their nearest known ancestor. With `ensure`, the node itself
    /// is materialized, even if it is lazy.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NodeNotFound`] if target is not declared.
    /// - Return [`WorkspaceError::CloneFailure`] if materialization fails.
    #[instrument(skip(self), level = "debug")]
    pub fn resolve_path(&mut self, target: &str, ensure: bool) -> Result<ResolvedPath> {
        let logical = self.locate(target)?;

        if ensure {
            let report = self.expander()?.ensure(&logical)?;
            if let Some(failure) = report.failed.into_iter().next() {
                return Err(WorkspaceError::CloneFailure {
                    path: logical,
                    message: failure.message,
                });
            }
        }

        self.set_current(&logical)?;
        Ok(ResolvedPath {
            physical: self.compute_filesystem_path(&logical)?,
            node: self
                .loaded()?
                .store
                .get(&logical)
                .cloned()
                .ok_or_else(|| WorkspaceError::NodeNotFound(logical.clone()))?,
            logical,
        })
    }

    /// Clone everything below target.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NodeNotFound`] if target is not declared.
    pub fn clone_all(&mut self, target: &str, options: WalkOptions) -> Result<WalkReport> {
        let logical = self.locate(target)?;
        Ok(self.expander()?.clone_all(&logical, options)?)
    }

    /// List what cloning everything below target would clone.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NodeNotFound`] if target is not known.
    pub fn preview(&self, target: &str, options: WalkOptions) -> Result<Vec<NodeInfo>> {
        let logical = self.node(target)?.path;
        let loaded = self.loaded()?;
        let mut store = loaded.store.clone();
        let expander = Expander::new(
            &self.root,
            &self.git,
            &mut store,
            CloneOptions::from_config(&loaded.config),
        );

        Ok(expander.collect(&logical, options)?)
    }

    /// Pull everything below target.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NodeNotFound`] if target is not declared.
    pub fn pull_all(
        &mut self,
        target: &str,
        options: WalkOptions,
        pull: PullOptions,
    ) -> Result<WalkReport> {
        let logical = self.locate(target)?;
        Ok(self.expander()?.pull_all(&logical, options, pull)?)
    }

    /// Push every cloned repository below target.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NodeNotFound`] if target is not known.
    pub fn push_all(&mut self, target: &str) -> Result<WalkReport> {
        let logical = self.node(target)?.path;
        Ok(self.expander()?.push_all(&logical)?)
    }

    /// Query status of every cloned repository below target.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::NodeNotFound`] if target is not known.
    pub fn status_all(&mut self, target: &str) -> Result<Vec<StatusEntry>> {
        let logical = self.node(target)?.path;
        Ok(self.expander()?.status_all(&logical)?)
    }

    /// Turn navigation target into logical path of a known node, expanding
    /// ancestors as needed.
    fn locate(&mut self, target: &str) -> Result<String> {
        let logical = tree_path::navigate(&self.current_path()?, target);

        loop {
            let store = &self.loaded()?.store;
            if store.get(&logical).is_some() {
                return Ok(logical);
            }

            let mut ancestor = tree_path::parent(&logical).unwrap_or_else(|| "/".into());
            while store.get(&ancestor).is_none() {
                ancestor = tree_path::parent(&ancestor).unwrap_or_else(|| "/".into());
            }

            // INVARIANT: Root declarations are always known after load.
            if ancestor == "/" {
                return Err(WorkspaceError::NodeNotFound(logical));
            }

            let next = tree_path::segments(&logical)
                .nth(tree_path::segments(&ancestor).count())
                .map(|name| tree_path::join(&ancestor, name))
                .ok_or_else(|| WorkspaceError::NodeNotFound(logical.clone()))?;

            debug!("expand {ancestor:?} to find {logical:?}");
            self.expander()?.expand(&ancestor)?;
            if self.loaded()?.store.get(&next).is_none() {
                return Err(WorkspaceError::NodeNotFound(logical));
            }
        }
    }

    /// Definition declaring the children of a node, with its real location.
    fn governing_config(&self, logical: &str) -> Result<(PathBuf, WorkspaceConfig)> {
        let node = self
            .loaded()?
            .store
            .get(logical)
            .ok_or_else(|| WorkspaceError::NodeNotFound(logical.into()))?;

        let config_path = match &node.kind {
            _ if node.is_root() => self.root.join(CONFIG_FILE_NAME),
            NodeKind::ConfigReference { source } => match ConfigLocation::parse(source) {
                ConfigLocation::Local(path) => dereference(path),
                ConfigLocation::Remote(url) => return Err(ConfigError::Remote(url).into()),
            },
            NodeKind::GitRepository { .. } if !node.is_cloned() => {
                return Err(WorkspaceError::NotMaterialized(logical.into()))
            }
            _ => dereference(self.compute_filesystem_path(logical)?.join(CONFIG_FILE_NAME)),
        };

        if !WorkspaceConfig::exists(&config_path) && !node.is_root() {
            debug!("start new definition at {:?}", config_path.display());
            return Ok((config_path, WorkspaceConfig::new(node.name.clone())));
        }

        let config = WorkspaceConfig::load(&config_path).map_err(|source| {
            WorkspaceError::ConfigLoad {
                source,
                path: config_path.clone(),
            }
        })?;

        Ok((config_path, config))
    }

    fn save_config(&mut self, config_path: &Path, config: WorkspaceConfig) -> Result<()> {
        config.save(config_path)?;
        if config_path == self.root.join(CONFIG_FILE_NAME) {
            self.loaded_mut()?.config = config;
        }

        Ok(())
    }

    fn expander(&mut self) -> Result<Expander<'_, G, FileTreeStore>> {
        let Some(loaded) = self.loaded.as_mut() else {
            return Err(WorkspaceError::NotInitialized(self.root.clone()));
        };

        Ok(Expander::new(
            &self.root,
            &self.git,
            &mut loaded.store,
            CloneOptions::from_config(&loaded.config),
        ))
    }

    fn loaded(&self) -> Result<&Loaded> {
        self.loaded
            .as_ref()
            .ok_or_else(|| WorkspaceError::NotInitialized(self.root.clone()))
    }

    fn loaded_mut(&mut self) -> Result<&mut Loaded> {
        self.loaded
            .as_mut()
            .ok_or_else(|| WorkspaceError::NotInitialized(self.root.clone()))
    }
}

/// All possible error types for workspace interaction.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Workspace has not been initialized or loaded.
    #[error("no workspace loaded at {:?}, run init first", .0.display())]
    NotInitialized(PathBuf),

    /// Node cannot be established as a declared node.
    #[error("node {0:?} not found")]
    NodeNotFound(String),

    /// Node already exists.
    #[error("node {0:?} already exists")]
    NodeExists(String),

    /// Node has no content that could hold a definition yet.
    #[error("node {0:?} is not cloned yet")]
    NotMaterialized(String),

    /// Workspace definition cannot be loaded.
    #[error("failed to load workspace definition at {:?}", path.display())]
    ConfigLoad {
        #[source]
        source: ConfigError,
        path: PathBuf,
    },

    /// Repository cannot be cloned.
    #[error("failed to clone {path:?}: {message}")]
    CloneFailure { path: String, message: String },

    /// Repositories cannot be pulled.
    #[error("failed to pull {}", paths.join(", "))]
    PullFailure { paths: Vec<String> },

    /// Physical path is not inside the workspace.
    #[error("path {:?} is outside of workspace {:?}", path.display(), root.display())]
    PathOutsideWorkspace { path: PathBuf, root: PathBuf },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Path(PathError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<PathError> for WorkspaceError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::OutsideWorkspace { path, root } => Self::PathOutsideWorkspace { path, root },
            err => Self::Path(err),
        }
    }
}

impl From<StoreError> for WorkspaceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NodeNotFound(path) => Self::NodeNotFound(path),
            StoreError::DuplicateNode(path) => Self::NodeExists(path),
            err => Self::Store(err),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = WorkspaceError> = std::result::Result<T, E>;
