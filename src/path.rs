// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Translate between __logical__ tree paths, e.g., "/team/backend", and the
//! __physical__ paths of the directories that hold those nodes on disk.
//!
//! # Physical Layout
//!
//! Children of a node never live directly inside the node's directory.
//! Instead they live inside a child directory whose name is given by the
//! `repos_dir` setting of whatever workspace definition governs the node.
//! Every node can override this name, so the physical layout is not
//! uniform:
//!
//! ```text
//! <root>/repos/team/custom-repos/service
//!        ^^^^^      ^^^^^^^^^^^^
//!        root's     team's repos_dir
//! ```
//!
//! The override of a node is only discoverable by reading its definition.
//! Thus, every translation re-reads definitions from disk. Nothing is cached
//! across calls, because any definition may change in between.

use crate::{
    config::{WorkspaceConfig, CONFIG_FILE_NAME, DEFAULT_REPOS_DIR},
    reference::ConfigLocation,
    store::{NodeKind, TreeStore, TREE_STATE_FILE_NAME},
};

use std::{
    ffi::OsString,
    io,
    path::{Component, Path, PathBuf},
};
use tracing::debug;

/// Name of marker directory of a Git repository.
pub const REPOSITORY_MARKER: &str = ".git";

/// Bidirectional mapping between logical and physical paths.
#[derive(Debug)]
pub struct PathTranslator<'a, S>
where
    S: TreeStore + ?Sized,
{
    root: &'a Path,
    store: &'a S,
}

impl<'a, S> PathTranslator<'a, S>
where
    S: TreeStore + ?Sized,
{
    /// Construct new path translator for workspace root.
    pub fn new(root: &'a Path, store: &'a S) -> Self {
        Self { root, store }
    }

    /// Compute physical path of logical path.
    ///
    /// Does not check if the path returned actually exists.
    pub fn compute_filesystem_path(&self, logical: &str) -> PathBuf {
        let mut physical = self.root.to_path_buf();
        let mut current = String::from("/");

        for segment in tree_path::segments(logical) {
            if let Some(child_dir) = self.child_directory(&current, &physical) {
                physical.push(child_dir);
            }
            physical.push(segment);
            current = tree_path::join(&current, segment);
        }

        physical
    }

    /// Resolve logical path of physical path.
    ///
    /// Symlinks are followed, so a link resolves to the logical path of its
    /// target. The physical path does not need to exist. A path that lies
    /// inside the content of a node, e.g., a source file of a repository,
    /// resolves to that node.
    ///
    /// # Errors
    ///
    /// - Return [`PathError::OutsideWorkspace`] if path is not inside the
    ///   workspace root.
    /// - Return [`PathError::Canonicalize`] if path cannot be made absolute.
    pub fn resolve_tree_path(&self, physical: impl AsRef<Path>) -> Result<String> {
        let root = canonicalize_lenient(self.root)?;
        let target = canonicalize_lenient(physical.as_ref())?;
        let relative = target
            .strip_prefix(&root)
            .map_err(|_| PathError::OutsideWorkspace {
                path: target.clone(),
                root: root.clone(),
            })?;

        let mut components = relative.components().filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        });

        let mut logical = String::from("/");
        let mut current = root;
        while let Some(component) = components.next() {
            match self.child_directory(&logical, &current) {
                Some(child_dir) => {
                    // INVARIANT: Anything other than the child directory is
                    // content of the current node.
                    if component != child_dir {
                        break;
                    }
                    current.push(&child_dir);

                    let Some(name) = components.next() else {
                        break;
                    };
                    current.push(&name);
                    logical = tree_path::join(&logical, &name);
                }
                None => {
                    current.push(&component);
                    logical = tree_path::join(&logical, &component);
                }
            }
        }

        Ok(logical)
    }

    /// Determine name of directory that holds children of a node.
    ///
    /// Returns `None` if children are placed directly inside the node's
    /// directory.
    pub fn child_directory(&self, logical: &str, physical: &Path) -> Option<String> {
        if let Some(NodeKind::ConfigReference { source }) =
            self.store.get(logical).map(|node| &node.kind)
        {
            match ConfigLocation::parse(source).load() {
                Ok(config) => return Some(config.repos_dir().to_string()),
                Err(err) => debug!("cannot load definition of {logical:?}: {err}"),
            }
        }

        let config_path = physical.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            return match WorkspaceConfig::load(&config_path) {
                Ok(config) => Some(config.repos_dir().to_string()),
                Err(err) => {
                    debug!("cannot load definition at {:?}: {err}", config_path.display());
                    Some(DEFAULT_REPOS_DIR.to_string())
                }
            };
        }

        if has_repository_marker(physical) {
            return Some(DEFAULT_REPOS_DIR.to_string());
        }

        None
    }
}

/// Check if directory contains a Git repository.
pub fn has_repository_marker(path: impl AsRef<Path>) -> bool {
    path.as_ref().join(REPOSITORY_MARKER).exists()
}

/// Make path absolute and resolve symlinks as far as the path exists.
///
/// The longest existing ancestor of the path is canonicalized, and the
/// remaining components that do not exist yet are appended as-is.
///
/// # Errors
///
/// - Return [`PathError::Canonicalize`] if no ancestor of path can be
///   canonicalized.
pub fn canonicalize_lenient(path: impl AsRef<Path>) -> Result<PathBuf> {
    let absolute = std::path::absolute(path.as_ref()).map_err(|err| PathError::Canonicalize {
        source: err,
        path: path.as_ref().to_path_buf(),
    })?;

    let mut existing = absolute.as_path();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(mut real) => {
                real.extend(missing.iter().rev());
                return Ok(real);
            }
            Err(err) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => {
                    return Err(PathError::Canonicalize {
                        source: err,
                        path: absolute.clone(),
                    })
                }
            },
        }
    }
}

/// Find workspace root starting from a directory.
///
/// Walks upward from start directory. The nearest directory holding a tree
/// state file wins. Otherwise, the nearest directory holding a workspace
/// definition is used.
///
/// # Errors
///
/// - Return [`PathError::NoWorkspace`] if no ancestor is a workspace root.
pub fn find_workspace_root(start: impl AsRef<Path>) -> Result<PathBuf> {
    let start = canonicalize_lenient(start)?;

    if let Some(root) = start
        .ancestors()
        .find(|dir| dir.join(TREE_STATE_FILE_NAME).is_file())
    {
        return Ok(root.to_path_buf());
    }

    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE_NAME).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| PathError::NoWorkspace(start.clone()))
}

/// Logical tree path helpers.
///
/// Logical paths are absolute, '/' separated, and never end in a slash
/// except for the root "/".
pub mod tree_path {
    /// Join child name onto parent path without doubling the root slash.
    pub fn join(parent: &str, name: &str) -> String {
        if parent == "/" || parent.is_empty() {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }

    /// Parent of path, or `None` for the root.
    pub fn parent(path: &str) -> Option<String> {
        if path == "/" || path.is_empty() {
            return None;
        }

        match path.rfind('/') {
            Some(0) | None => Some("/".into()),
            Some(index) => Some(path[..index].into()),
        }
    }

    /// Last segment of path. The root is named "/".
    pub fn name(path: &str) -> &str {
        if path == "/" {
            return path;
        }

        path.rsplit('/').next().unwrap_or(path)
    }

    /// Iterate over segments of path.
    pub fn segments(path: &str) -> impl Iterator<Item = &str> {
        path.split('/').filter(|segment| !segment.is_empty())
    }

    /// Check if path equals or lies below ancestor.
    pub fn is_within(path: &str, ancestor: &str) -> bool {
        if ancestor == "/" {
            return true;
        }

        path == ancestor
            || path
                .strip_prefix(ancestor)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Interpret navigation target against current position.
    ///
    /// Understands ".", "..", absolute paths, "~" for the root, and relative
    /// paths. Going above the root stays at the root.
    pub fn navigate(current: &str, target: &str) -> String {
        let target = target.trim();
        let (mut stack, rest): (Vec<&str>, &str) = if target == "~" {
            (Vec::new(), "")
        } else if let Some(rest) = target.strip_prefix("~/") {
            (Vec::new(), rest)
        } else if target.starts_with('/') {
            (Vec::new(), target)
        } else {
            (segments(current).collect(), target)
        };

        for part in rest.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    stack.pop();
                }
                other => stack.push(other),
            }
        }

        if stack.is_empty() {
            "/".into()
        } else {
            format!("/{}", stack.join("/"))
        }
    }
}

/// Path resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Physical path is not inside the workspace root.
    #[error("path {:?} is outside of workspace {:?}", path.display(), root.display())]
    OutsideWorkspace { path: PathBuf, root: PathBuf },

    /// Path cannot be made absolute.
    #[error("failed to resolve path {:?}", path.display())]
    Canonicalize {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// No workspace root found.
    #[error("no workspace found at or above {:?}", .0.display())]
    NoWorkspace(PathBuf),
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;
