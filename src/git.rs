// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control access.
//!
//! Muno never mutates repositories by itself. Every clone, pull, push, and
//! status query goes through the [`GitOps`] trait, so that the tree engine
//! stays a pure resolution layer on top of Git.
//!
//! The default [`Git2Ops`] implementation clones and inspects repositories
//! through libgit2. Pulls and pushes are delegated to the Git binary, because
//! they need the user's full Git configuration, e.g., hooks, merge settings,
//! and credential helpers.

use crate::config::WorkspaceConfig;

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::RepoBuilder, Config, ErrorCode, FetchOptions, RemoteCallbacks, Repository,
    StatusOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    ffi::OsStr,
    path::Path,
    process::Command,
    str::FromStr,
    time,
};
use tracing::{debug, info, instrument};

/// Layer of indirection for version control access.
pub trait GitOps {
    /// Clone repository at URL into destination directory.
    fn clone_repo(&self, url: &str, destination: &Path, options: &CloneOptions) -> Result<()>;

    /// Pull upstream changes into repository.
    fn pull(&self, path: &Path, options: &PullOptions) -> Result<()>;

    /// Push local commits of repository upstream.
    fn push(&self, path: &Path) -> Result<()>;

    /// Query branch and dirtiness of repository.
    fn status(&self, path: &Path) -> Result<RepoStatus>;

    /// Name of currently checked out branch.
    fn current_branch(&self, path: &Path) -> Result<String>;

    /// URL of "origin" remote, if any.
    fn remote_url(&self, path: &Path) -> Result<Option<String>>;
}

/// Options for cloning.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloneOptions {
    /// Preferred transport, rewrites URL before cloning.
    pub transport: Option<Transport>,

    /// Branch to check out instead of remote HEAD.
    pub branch: Option<String>,
}

impl CloneOptions {
    /// Extract clone options from overrides of a workspace definition.
    ///
    /// Reads "transport" and "default_branch" settings. Unknown transports
    /// are ignored.
    pub fn from_config(config: &WorkspaceConfig) -> Self {
        let transport = config.override_str("transport").and_then(|value| {
            value
                .parse()
                .map_err(|err| debug!("ignore transport override: {err}"))
                .ok()
        });
        let branch = config.override_str("default_branch").map(str::to_owned);

        Self { transport, branch }
    }

    /// Apply transport preference to URL.
    pub fn effective_url(&self, url: &str) -> String {
        match self.transport {
            Some(transport) => transport.rewrite(url),
            None => url.to_string(),
        }
    }
}

/// Options for pulling.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PullOptions {
    /// Rebase local commits instead of fast-forward only.
    pub rebase: bool,
}

/// Preferred clone transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Https,
    Ssh,
}

impl Transport {
    /// Rewrite remote URL to use this transport.
    ///
    /// Translates between "https://host/path" and "git@host:path" forms.
    /// Anything else, e.g., local paths, is left untouched.
    pub fn rewrite(self, url: &str) -> String {
        match self {
            Self::Ssh => url
                .strip_prefix("https://")
                .and_then(|rest| rest.split_once('/'))
                .map(|(host, path)| format!("git@{host}:{path}"))
                .unwrap_or_else(|| url.to_string()),
            Self::Https => url
                .strip_prefix("git@")
                .and_then(|rest| rest.split_once(':'))
                .map(|(host, path)| format!("https://{host}/{path}"))
                .unwrap_or_else(|| url.to_string()),
        }
    }
}

impl FromStr for Transport {
    type Err = GitError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data.to_ascii_lowercase().as_str() {
            "https" | "http" => Ok(Self::Https),
            "ssh" => Ok(Self::Ssh),
            other => Err(GitError::UnknownTransport(other.into())),
        }
    }
}

/// Status information of a repository.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    /// Currently checked out branch.
    pub branch: String,

    /// Whether working tree or index has changes.
    pub dirty: bool,
}

/// Version control access through libgit2 and the Git binary.
#[derive(Debug, Default, Clone)]
pub struct Git2Ops {
    progress: bool,
}

impl Git2Ops {
    /// Construct new Git access, optionally drawing clone progress bars.
    pub fn new(progress: bool) -> Self {
        Self { progress }
    }
}

impl GitOps for Git2Ops {
    /// Clone repository at URL into destination directory.
    ///
    /// The progress of the clone is displayed through a progress bar. If any
    /// credentials are required for the clone to continue, then the user will
    /// be prompted for that information accordingly. The progress bar will be
    /// blocked for user input.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Git2`] if libgit2 operations fail.
    /// - Return [`GitError::IndicatifStyleTemplate`] if progress bar cannot
    ///   be styled.
    #[instrument(skip(self, options), level = "debug")]
    fn clone_repo(&self, url: &str, destination: &Path, options: &CloneOptions) -> Result<()> {
        let url = options.effective_url(url);
        info!("clone {url} into {:?}", destination.display());

        let bar = if self.progress {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(url.clone());
        bar.enable_steady_tick(time::Duration::from_millis(100));

        let prompter = IndicatifPrompter::new(bar);
        let authenticator = GitAuthenticator::default().set_prompter(prompter.clone());
        let config = Config::open_default()?;

        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|progress| {
            let stats = progress.to_owned();
            let bar_size = stats.total_objects() as u64;
            let bar_pos = stats.received_objects() as u64;
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                prompter.bar.set_length(bar_size);
                prompter.bar.set_position(bar_pos);
            }
            true
        });

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fo);
        if let Some(branch) = &options.branch {
            builder.branch(branch);
        }

        let result = builder.clone(&url, destination);
        prompter.bar.finish_and_clear();
        result?;

        Ok(())
    }

    #[instrument(skip(self, options), level = "debug")]
    fn pull(&self, path: &Path, options: &PullOptions) -> Result<()> {
        let mode = if options.rebase { "--rebase" } else { "--ff-only" };
        let output = syscall_non_interactive(
            "git",
            [
                OsStr::new("-C"),
                path.as_os_str(),
                OsStr::new("pull"),
                OsStr::new(mode),
            ],
        )?;
        debug!("{output}");

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn push(&self, path: &Path) -> Result<()> {
        let output = syscall_non_interactive(
            "git",
            [OsStr::new("-C"), path.as_os_str(), OsStr::new("push")],
        )?;
        debug!("{output}");

        Ok(())
    }

    fn status(&self, path: &Path) -> Result<RepoStatus> {
        let repository = Repository::open(path)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        let dirty = !repository.statuses(Some(&mut opts))?.is_empty();

        Ok(RepoStatus {
            branch: head_branch(&repository)?,
            dirty,
        })
    }

    fn current_branch(&self, path: &Path) -> Result<String> {
        head_branch(&Repository::open(path)?)
    }

    fn remote_url(&self, path: &Path) -> Result<Option<String>> {
        let repository = Repository::open(path)?;
        let url = match repository.find_remote("origin") {
            Ok(remote) => remote.url().map(str::to_owned),
            Err(err) if err.code() == ErrorCode::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        Ok(url)
    }
}

fn head_branch(repository: &Repository) -> Result<String> {
    match repository.head() {
        Ok(head) => Ok(head.shorthand().unwrap_or("HEAD").to_string()),
        // INVARIANT: Fresh repositories have no commits, but HEAD still names a branch.
        Err(err) if err.code() == ErrorCode::UnbornBranch => {
            let head = repository.find_reference("HEAD")?;
            Ok(head
                .symbolic_target()
                .map(|target| target.trim_start_matches("refs/heads/").to_string())
                .unwrap_or_else(|| "HEAD".into()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let output = Command::new(cmd.as_ref()).args(args).output()?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(format!("stdout: {stdout}").as_str());
    }

    if !stderr.is_empty() {
        message.push_str(format!("stderr: {stderr}").as_str());
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message);

    if !output.status.success() {
        return Err(GitError::Syscall(std::io::Error::other(format!(
            "command {:?} failed:\n{message}",
            cmd.as_ref()
        ))));
    }

    Ok(message)
}

/// Version control error types.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Git binary fails or cannot be executed.
    #[error(transparent)]
    Syscall(#[from] std::io::Error),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Transport override names no known transport.
    #[error("unknown transport {0:?}, expected https or ssh")]
    UnknownTransport(String),
}

/// Friendly result alias :3
pub type Result<T, E = GitError> = std::result::Result<T, E>;
