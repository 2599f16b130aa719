// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workspace definition layout.
//!
//! Specify the layout of the `muno.yaml` workspace definition file. Every
//! node of the workspace tree that defines children carries one of these
//! files, either directly in its directory, or through a link to an
//! externally owned definition.
//!
//! # General Layout
//!
//! ```yaml
//! workspace:
//!   name: platform
//!   repos_dir: repos
//!   overrides:
//!     transport: ssh
//! nodes:
//!   - name: backend
//!     url: https://example.org/backend.git
//!     fetch: lazy
//!   - name: team
//!     file: ../team/muno.yaml
//! ```
//!
//! Each node declaration is either a repository reference (`url`), or a
//! reference to another workspace definition (`file`). Never both, and never
//! neither.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Conventional file name of a workspace definition.
pub const CONFIG_FILE_NAME: &str = "muno.yaml";

/// Child directory name used when a definition does not override it.
pub const DEFAULT_REPOS_DIR: &str = "repos";

/// Name suffixes that mark a repository as an aggregation repository.
///
/// Aggregation repositories are eagerly fetched under [`FetchMode::Auto`],
/// everything else stays lazy.
const AGGREGATION_SUFFIXES: &[&str] = &[
    "-repo",
    "-monorepo",
    "-platform",
    "-workspace",
    "-root",
    "-meta",
];

/// Workspace definition layout.
#[derive(Default, Debug, PartialEq, Clone, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    /// Settings of the workspace itself.
    pub workspace: WorkspaceSettings,

    /// Ordered listing of child node declarations.
    #[serde(default)]
    pub nodes: Vec<NodeDeclaration>,
}

impl WorkspaceConfig {
    /// Construct new empty definition with a display name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            workspace: WorkspaceSettings {
                name: name.into(),
                ..Default::default()
            },
            nodes: Vec::new(),
        }
    }

    /// Load definition from file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = read_to_string(path).map_err(|err| ConfigError::Read {
            source: err,
            path: path.to_path_buf(),
        })?;

        content.parse()
    }

    /// Save definition to file, replacing previous content.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Write`] if file cannot be written.
    /// - Return [`ConfigError::Serialize`] if serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).map_err(ConfigError::Serialize)?;
        write(path, content).map_err(|err| ConfigError::Write {
            source: err,
            path: path.to_path_buf(),
        })
    }

    /// Check if a definition file exists at path.
    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().is_file()
    }

    /// Effective name of the directory holding child nodes.
    pub fn repos_dir(&self) -> &str {
        self.workspace
            .repos_dir
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .unwrap_or(DEFAULT_REPOS_DIR)
    }

    /// Lookup string value of an override setting.
    pub fn override_str(&self, key: &str) -> Option<&str> {
        self.workspace
            .overrides
            .get(key)
            .and_then(serde_yaml::Value::as_str)
    }

    /// Find node declaration by name.
    pub fn find_node(&self, name: &str) -> Option<&NodeDeclaration> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Append node declaration.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::DuplicateNode`] if name is already declared.
    pub fn add_node(&mut self, declaration: NodeDeclaration) -> Result<()> {
        if self.find_node(&declaration.name).is_some() {
            return Err(ConfigError::DuplicateNode(declaration.name));
        }

        self.nodes.push(declaration);
        Ok(())
    }

    /// Remove node declaration by name, returning it if it was declared.
    pub fn remove_node(&mut self, name: &str) -> Option<NodeDeclaration> {
        let index = self.nodes.iter().position(|node| node.name == name)?;
        Some(self.nodes.remove(index))
    }
}

impl FromStr for WorkspaceConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let config: WorkspaceConfig = serde_yaml::from_str(data)?;

        // INVARIANT: Node names are unique within one definition.
        let mut seen = std::collections::HashSet::new();
        for node in &config.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(ConfigError::DuplicateNode(node.name.clone()));
            }
        }

        Ok(config)
    }
}

impl Display for WorkspaceConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            serde_yaml::to_string(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Workspace settings.
#[derive(Default, Debug, PartialEq, Clone, Deserialize, Serialize)]
pub struct WorkspaceSettings {
    /// Display label of the workspace.
    #[serde(default)]
    pub name: String,

    /// Name of subdirectory that holds child nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repos_dir: Option<String>,

    /// Free-form settings, e.g., preferred clone transport.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, serde_yaml::Value>,
}

/// Declaration of a child node.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(try_from = "RawNodeDeclaration", into = "RawNodeDeclaration")]
pub struct NodeDeclaration {
    /// Name of node, also the name of its directory.
    pub name: String,

    /// What the node points at.
    pub source: NodeSource,
}

impl NodeDeclaration {
    /// Construct new repository reference.
    pub fn repository(name: impl Into<String>, url: impl Into<String>, fetch: FetchMode) -> Self {
        Self {
            name: name.into(),
            source: NodeSource::Repository {
                url: url.into(),
                fetch,
            },
        }
    }

    /// Construct new workspace definition reference.
    pub fn config(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: NodeSource::Config { file: file.into() },
        }
    }

    /// Check if declaration should be lazily materialized.
    ///
    /// Only repository references can be lazy. The "auto" mode judges the
    /// repository name of the URL, not the node name.
    pub fn is_lazy(&self) -> bool {
        match &self.source {
            NodeSource::Repository { url, fetch } => fetch.is_lazy(&repo_name_from_url(url)),
            NodeSource::Config { .. } => false,
        }
    }
}

/// Source of a declared node.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum NodeSource {
    /// Git repository to clone.
    Repository { url: String, fetch: FetchMode },

    /// Another workspace definition, local or remote.
    Config { file: String },
}

/// When to materialize a repository.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Clone as soon as parent is expanded.
    Eager,

    /// Clone on first use only.
    Lazy,

    /// Decide by repository name.
    #[default]
    Auto,
}

impl FetchMode {
    /// Resolve fetch mode into laziness for a repository name.
    pub fn is_lazy(self, name: &str) -> bool {
        match self {
            Self::Eager => false,
            Self::Lazy => true,
            Self::Auto => !is_aggregation_name(name),
        }
    }
}

impl FromStr for FetchMode {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data.to_ascii_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "lazy" => Ok(Self::Lazy),
            "auto" => Ok(Self::Auto),
            other => Err(ConfigError::InvalidFetchMode(other.into())),
        }
    }
}

/// Check if repository name follows aggregation repository convention.
pub fn is_aggregation_name(name: &str) -> bool {
    let name = name.trim_end_matches(".git").to_ascii_lowercase();
    AGGREGATION_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// Derive node name from repository URL.
///
/// Takes last path segment of URL without any ".git" extension, e.g.,
/// `git@host:team/backend.git` becomes "backend".
pub fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed);
    last.trim_end_matches(".git").to_string()
}

/// Validate name of a node.
///
/// # Errors
///
/// - Return [`ConfigError::InvalidName`] if name is empty, a navigation
///   token, or contains a path separator.
pub fn validate_node_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ConfigError::InvalidName(name.into()));
    }

    Ok(())
}

/// On-disk form of a node declaration.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
struct RawNodeDeclaration {
    name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    fetch: Option<FetchMode>,
}

impl TryFrom<RawNodeDeclaration> for NodeDeclaration {
    type Error = ConfigError;

    fn try_from(raw: RawNodeDeclaration) -> Result<Self, Self::Error> {
        validate_node_name(&raw.name)?;
        let url = raw.url.filter(|url| !url.trim().is_empty());
        let file = raw.file.filter(|file| !file.trim().is_empty());

        let source = match (url, file) {
            (Some(url), None) => NodeSource::Repository {
                url,
                fetch: raw.fetch.unwrap_or_default(),
            },
            (None, Some(file)) => NodeSource::Config { file },
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousNode(raw.name)),
            (None, None) => return Err(ConfigError::EmptyNode(raw.name)),
        };

        Ok(Self {
            name: raw.name,
            source,
        })
    }
}

impl From<NodeDeclaration> for RawNodeDeclaration {
    fn from(declaration: NodeDeclaration) -> Self {
        match declaration.source {
            NodeSource::Repository { url, fetch } => Self {
                name: declaration.name,
                url: Some(url),
                // Auto is implied when absent.
                fetch: (fetch != FetchMode::Auto).then_some(fetch),
                ..Default::default()
            },
            NodeSource::Config { file } => Self {
                name: declaration.name,
                file: Some(file),
                ..Default::default()
            },
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize definition.
    #[error(transparent)]
    Deserialize(#[from] serde_yaml::Error),

    /// Failed to serialize definition.
    #[error("failed to serialize workspace definition")]
    Serialize(#[source] serde_yaml::Error),

    /// Definition file cannot be read.
    #[error("failed to read workspace definition at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Definition file cannot be written.
    #[error("failed to write workspace definition at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Node declares neither a url nor a file.
    #[error("node {0:?} must declare either a url or a file")]
    EmptyNode(String),

    /// Node declares both a url and a file.
    #[error("node {0:?} cannot declare both a url and a file")]
    AmbiguousNode(String),

    /// Node name is declared more than once.
    #[error("node {0:?} is declared more than once")]
    DuplicateNode(String),

    /// Node name cannot be used as a path segment.
    #[error("invalid node name {0:?}")]
    InvalidName(String),

    /// Unknown fetch mode.
    #[error("invalid fetch mode {0:?}, expected eager, lazy, or auto")]
    InvalidFetchMode(String),

    /// Remote definitions cannot be loaded locally.
    #[error("cannot load remote workspace definition {0:?}")]
    Remote(String),

    /// Failed to perform shell expansion on reference.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
