// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use muno::{
    expand::FailureKind,
    path::find_workspace_root,
    workspace::WorkspaceError,
    AddOptions, AssumeYes, Confirm, FetchMode, Git2Ops, InquireConfirm, NodeInfo, NodeKind,
    PullOptions, WalkOptions, WalkReport, Workspace,
};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "muno [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to workspace root, discovered from working directory if absent.
    #[arg(long, global = true, env = "MUNO_ROOT", value_name = "path")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let root = self.root;
        match self.command {
            Command::Init(opts) => run_init(root, opts),
            Command::Add(opts) => run_add(root, opts),
            Command::Remove(opts) => run_remove(root, opts),
            Command::Clone(opts) => run_clone(root, opts),
            Command::Pull(opts) => run_pull(root, opts),
            Command::Push(opts) => run_push(root, opts),
            Command::Status(opts) => run_status(root, opts),
            Command::Tree(opts) => run_tree(root, opts),
            Command::Path(opts) => run_path(root, opts),
            Command::Current => run_current(root),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Initialize new workspace.
    #[command(override_usage = "muno init [options] [name]")]
    Init(InitOptions),

    /// Add repository below current position.
    #[command(override_usage = "muno add [options] <url>")]
    Add(AddCmdOptions),

    /// Remove node below current position.
    #[command(override_usage = "muno remove [options] <name>")]
    Remove(RemoveOptions),

    /// Clone repositories below target.
    #[command(override_usage = "muno clone [options] [target]")]
    Clone(CloneOptions),

    /// Pull repositories below target.
    #[command(override_usage = "muno pull [options] [target]")]
    Pull(PullCmdOptions),

    /// Push cloned repositories below target.
    #[command(override_usage = "muno push [options] [target]")]
    Push(TargetOptions),

    /// Show branch and changes of cloned repositories below target.
    #[command(override_usage = "muno status [options] [target]")]
    Status(TargetOptions),

    /// Show known tree below target.
    #[command(override_usage = "muno tree [options] [target]")]
    Tree(TargetOptions),

    /// Resolve target, make it the current position, and print its path.
    #[command(override_usage = "muno path [options] <target>")]
    Path(PathOptions),

    /// Show current position.
    Current,
}

#[derive(Args, Clone, Debug)]
struct InitOptions {
    /// Display name of workspace, defaults to name of root directory.
    #[arg(value_name = "name")]
    pub name: Option<String>,
}

#[derive(Args, Clone, Debug)]
struct AddCmdOptions {
    /// URL of repository to add.
    #[arg(required = true, value_name = "url")]
    pub url: String,

    /// Node name to use instead of the one derived from URL.
    #[arg(short, long, value_name = "name")]
    pub name: Option<String>,

    /// When to clone the repository: eager, lazy, or auto.
    #[arg(short, long, value_name = "mode", default_value = "auto")]
    pub fetch: FetchMode,
}

#[derive(Args, Clone, Debug)]
struct RemoveOptions {
    /// Name of node to remove.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Clone, Debug)]
struct WalkArgs {
    /// Target node, defaults to current position.
    #[arg(value_name = "target", default_value = ".")]
    pub target: String,

    /// Descend below direct children of target.
    #[arg(short, long)]
    pub recursive: bool,

    /// Include lazy repositories.
    #[arg(short, long)]
    pub include_lazy: bool,
}

impl WalkArgs {
    fn options(&self) -> WalkOptions {
        WalkOptions::new(self.recursive, self.include_lazy)
    }
}

#[derive(Args, Clone, Debug)]
struct CloneOptions {
    #[command(flatten)]
    pub walk: WalkArgs,

    /// Only list what would be cloned.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Args, Clone, Debug)]
struct PullCmdOptions {
    #[command(flatten)]
    pub walk: WalkArgs,

    /// Rebase local commits instead of fast-forward only.
    #[arg(long)]
    pub rebase: bool,
}

#[derive(Args, Clone, Debug)]
struct TargetOptions {
    /// Target node, defaults to current position.
    #[arg(value_name = "target", default_value = ".")]
    pub target: String,
}

#[derive(Args, Clone, Debug)]
struct PathOptions {
    /// Navigation target, e.g., "..", "/team", or "service".
    #[arg(required = true, value_name = "target")]
    pub target: String,

    /// Clone target if it is not materialized yet.
    #[arg(short, long)]
    pub ensure: bool,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn open<U: Confirm>(root: Option<PathBuf>, ui: U) -> Result<Workspace<Git2Ops, U>> {
    let root = match root {
        Some(root) => root,
        None => find_workspace_root(std::env::current_dir()?)?,
    };

    Ok(Workspace::open(root, Git2Ops::new(true), ui)?)
}

fn run_init(root: Option<PathBuf>, opts: InitOptions) -> Result<()> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let name = match opts.name {
        Some(name) => name,
        None => root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".into()),
    };

    let mut workspace = Workspace::new(root, Git2Ops::new(true), InquireConfirm);
    workspace.init(&name)?;

    Ok(())
}

fn run_add(root: Option<PathBuf>, opts: AddCmdOptions) -> Result<()> {
    let mut workspace = open(root, InquireConfirm)?;
    let node = workspace.add(
        &opts.url,
        AddOptions {
            name: opts.name,
            fetch: opts.fetch,
        },
    )?;
    println!("{}", render_node(&node));

    Ok(())
}

fn run_remove(root: Option<PathBuf>, opts: RemoveOptions) -> Result<()> {
    let removed = if opts.yes {
        open(root, AssumeYes)?.remove(&opts.name)?
    } else {
        open(root, InquireConfirm)?.remove(&opts.name)?
    };

    if !removed {
        info!("nothing removed");
    }

    Ok(())
}

fn run_clone(root: Option<PathBuf>, opts: CloneOptions) -> Result<()> {
    let mut workspace = open(root, InquireConfirm)?;
    if opts.dry_run {
        for node in workspace.preview(&opts.walk.target, opts.walk.options())? {
            println!("{}", node.path);
        }
        return Ok(());
    }

    let report = workspace.clone_all(&opts.walk.target, opts.walk.options())?;
    finish(report)
}

fn run_pull(root: Option<PathBuf>, opts: PullCmdOptions) -> Result<()> {
    let mut workspace = open(root, InquireConfirm)?;
    let report = workspace.pull_all(
        &opts.walk.target,
        opts.walk.options(),
        PullOptions {
            rebase: opts.rebase,
        },
    )?;

    let paths: Vec<String> = report
        .failed
        .iter()
        .filter(|failure| failure.kind == FailureKind::Pull)
        .map(|failure| failure.path.clone())
        .collect();
    if !paths.is_empty() {
        return Err(WorkspaceError::PullFailure { paths }.into());
    }

    finish(report)
}

fn run_push(root: Option<PathBuf>, opts: TargetOptions) -> Result<()> {
    let report = open(root, InquireConfirm)?.push_all(&opts.target)?;
    finish(report)
}

fn run_status(root: Option<PathBuf>, opts: TargetOptions) -> Result<()> {
    let entries = open(root, InquireConfirm)?.status_all(&opts.target)?;
    for entry in entries {
        let marker = if entry.dirty { "*" } else { " " };
        println!("{marker} {} [{}]", entry.path, entry.branch);
    }

    Ok(())
}

fn run_tree(root: Option<PathBuf>, opts: TargetOptions) -> Result<()> {
    let workspace = open(root, InquireConfirm)?;
    let node = workspace.node(&opts.target)?;
    print_tree(&node, 0);

    Ok(())
}

fn run_path(root: Option<PathBuf>, opts: PathOptions) -> Result<()> {
    let mut workspace = open(root, InquireConfirm)?;
    let resolved = workspace.resolve_path(&opts.target, opts.ensure)?;
    println!("{}", resolved.physical.display());

    Ok(())
}

fn run_current(root: Option<PathBuf>) -> Result<()> {
    let workspace = open(root, InquireConfirm)?;
    println!("{}", workspace.current_path()?);

    Ok(())
}

fn finish(report: WalkReport) -> Result<()> {
    for failure in &report.failed {
        warn!("{}: {} failed: {}", failure.path, failure.kind, failure.message);
    }

    if !report.is_success() {
        bail!("{report}");
    }

    info!("{report}");
    Ok(())
}

fn print_tree(node: &NodeInfo, depth: usize) {
    println!("{}{}", "  ".repeat(depth), render_node(node));
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

fn render_node(node: &NodeInfo) -> String {
    let state = match &node.kind {
        NodeKind::GitRepository { cloned: true, .. } => "cloned",
        NodeKind::GitRepository { lazy: true, .. } => "lazy",
        NodeKind::GitRepository { .. } => "pending",
        NodeKind::ConfigReference { .. } => "config",
        NodeKind::Aggregate => "group",
    };
    let changes = if node.has_local_changes { " *" } else { "" };

    format!("{} ({state}){changes}", node.name)
}
