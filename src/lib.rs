// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workspace tree of many independent Git repositories.
//!
//! A muno __workspace__ arranges repositories as a navigable tree. Any node
//! of the tree may point at another, externally owned workspace definition,
//! so larger workspaces are composed out of smaller ones. Repositories are
//! not all cloned up front. Nodes can be __lazy__, and are only materialized
//! on first use.
//!
//! Three views of the workspace are kept consistent:
//!
//! 1. The __logical__ tree of slash separated paths, e.g., "/team/service".
//! 2. The __declared__ tree of `muno.yaml` definitions, see [`config`].
//! 3. The __physical__ tree of directories, clones, and links on disk, see
//!    [`path`].
//!
//! The [`Workspace`] type is the entry point. It discovers nodes through the
//! [`expand`] module and records them in the tree [`store`].

pub mod config;
pub mod expand;
pub mod git;
pub mod path;
pub mod reference;
pub mod store;
pub mod ui;
pub mod workspace;

#[doc(inline)]
pub use config::{FetchMode, NodeDeclaration, WorkspaceConfig};

#[doc(inline)]
pub use expand::{WalkOptions, WalkReport};

#[doc(inline)]
pub use git::{Git2Ops, GitOps, PullOptions};

#[doc(inline)]
pub use store::{NodeInfo, NodeKind, TreeStore};

#[doc(inline)]
pub use ui::{AssumeYes, Confirm, InquireConfirm};

#[doc(inline)]
pub use workspace::{AddOptions, ResolvedPath, Workspace, WorkspaceError};
