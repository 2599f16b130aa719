// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workspace definition references.
//!
//! A node can declare `file: <reference>` to pull in another workspace
//! definition, possibly owned by a different team. References come in three
//! flavors:
//!
//! 1. Absolute paths, used as-is.
//! 2. Remote URLs, e.g., "https://example.org/muno.yaml", used as-is.
//!    Muno recognizes them, but does not fetch them.
//! 3. Relative paths, resolved against a __context directory__, which is
//!    the real directory of the definition that declared the reference.
//!
//! Relative references are first tried against the context directory, and
//! then against its parent to support sibling team layouts. When neither
//! candidate exists, the context relative candidate is used.
//!
//! # Symlinks
//!
//! Materialized definition references are symlinks into the node's
//! directory. A relative reference inside such a definition must be
//! resolved against the directory of the real file, not against the
//! directory of the link. Thus, callers always [`dereference`] the
//! definition file first, and only then resolve its references against the
//! resulting [`context_dir`].

use crate::config::{ConfigError, WorkspaceConfig};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// URL schemes treated as remote definitions.
const REMOTE_SCHEMES: &[&str] = &["http://", "https://"];

/// Concrete location of a workspace definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Definition on local file system.
    Local(PathBuf),

    /// Definition behind a remote URL.
    Remote(String),
}

impl ConfigLocation {
    /// Classify stored location string.
    pub fn parse(location: &str) -> Self {
        if is_remote(location) {
            Self::Remote(location.to_string())
        } else {
            Self::Local(PathBuf::from(location))
        }
    }

    /// Local path of definition, if any.
    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path.as_path()),
            Self::Remote(_) => None,
        }
    }

    /// Load definition from location.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Remote`] for remote locations.
    /// - Return [`ConfigError`] if local definition cannot be loaded.
    pub fn load(&self) -> Result<WorkspaceConfig, ConfigError> {
        match self {
            Self::Local(path) => WorkspaceConfig::load(path),
            Self::Remote(url) => Err(ConfigError::Remote(url.clone())),
        }
    }
}

impl Display for ConfigLocation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Local(path) => fmt.write_str(path.to_string_lossy().as_ref()),
            Self::Remote(url) => fmt.write_str(url),
        }
    }
}

/// Resolve a definition reference into a concrete location.
///
/// Performs shell expansion on the reference first, e.g., "~/team.yaml" or
/// "$TEAM_DIR/muno.yaml".
///
/// # Errors
///
/// - Return [`ConfigError::ShellExpansion`] if shell expansion fails.
pub fn resolve_config_reference(
    reference: &str,
    context: impl AsRef<Path>,
) -> Result<ConfigLocation, ConfigError> {
    if is_remote(reference) {
        return Ok(ConfigLocation::Remote(reference.to_string()));
    }

    let expanded = shellexpand::full(reference)?.into_owned();
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        return Ok(ConfigLocation::Local(path));
    }

    let context = context.as_ref();
    let primary = context.join(&path);
    if primary.is_file() {
        return Ok(ConfigLocation::Local(primary));
    }

    if let Some(sibling) = context.parent().map(|parent| parent.join(&path)) {
        if sibling.is_file() {
            return Ok(ConfigLocation::Local(sibling));
        }
    }

    Ok(ConfigLocation::Local(primary))
}

/// Check if reference points at a remote definition.
pub fn is_remote(reference: &str) -> bool {
    let lowered = reference.trim().to_ascii_lowercase();
    REMOTE_SCHEMES
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
}

/// Follow symlinks to the real location of a file.
///
/// Falls back to the given path if it cannot be canonicalized, e.g., it does
/// not exist.
pub fn dereference(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Directory that relative references of a definition file resolve against.
pub fn context_dir(real_config_file: impl AsRef<Path>) -> PathBuf {
    real_config_file
        .as_ref()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}
