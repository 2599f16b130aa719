// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod git_ops;
mod walk;

use muno::{
    git::{CloneOptions, GitError, PullOptions, RepoStatus},
    GitOps,
};

use anyhow::Result;
use git2::{IndexEntry, IndexTime, Repository, RepositoryInitOptions};
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

pub(crate) struct RepoFixture {
    repo: Repository,
}

impl RepoFixture {
    pub(crate) fn new(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(path.as_ref(), &opts)?;

        // INVARIANT: Always provide valid name and email.
        //   - Git will complain if this is not set in CI/CD environments.
        let mut config = repo.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;

        Ok(Self { repo })
    }

    pub(crate) fn stage_and_commit(
        &self,
        filename: impl AsRef<Path>,
        contents: impl AsRef<str>,
    ) -> Result<()> {
        let entry = IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: 0o100644,
            uid: 0,
            gid: 0,
            file_size: contents.as_ref().len() as u32,
            id: self.repo.blob(contents.as_ref().as_bytes())?,
            flags: 0,
            flags_extended: 0,
            path: filename
                .as_ref()
                .to_string_lossy()
                .into_owned()
                .into_bytes(),
        };

        // INVARIANT: Always use new tree produced by index after staging new entry.
        let mut index = self.repo.index()?;
        index.add_frombuffer(&entry, contents.as_ref().as_bytes())?;
        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        let signature = self.repo.signature()?;
        let mut parents = Vec::new();
        if let Some(parent) = self.repo.head().ok().and_then(|head| head.target()) {
            parents.push(self.repo.find_commit(parent)?);
        }
        let parents = parents.iter().collect::<Vec<_>>();

        self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            format!("chore: add {:?}", filename.as_ref()).as_ref(),
            &tree,
            &parents,
        )?;

        // INVARIANT: Keep working tree in sync with the new commit.
        self.repo
            .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;

        Ok(())
    }
}

/// Version control double that records what it was asked to do.
///
/// Cloning creates a ".git" marker directory, plus whatever files were
/// registered for the URL through [`RecordingGit::with_content`].
#[derive(Debug, Default, Clone)]
pub(crate) struct RecordingGit {
    log: Rc<RefCell<GitLog>>,
    content: Rc<RefCell<HashMap<String, Vec<(String, String)>>>>,
    failing: Rc<RefCell<HashSet<String>>>,
}

#[derive(Debug, Default)]
pub(crate) struct GitLog {
    pub(crate) clones: Vec<String>,
    pub(crate) pulls: Vec<PathBuf>,
    pub(crate) pushes: Vec<PathBuf>,
}

impl RecordingGit {
    pub(crate) fn with_content(self, url: &str, file: &str, data: &str) -> Self {
        self.content
            .borrow_mut()
            .entry(url.into())
            .or_default()
            .push((file.into(), data.into()));
        self
    }

    pub(crate) fn failing(self, url: &str) -> Self {
        self.failing.borrow_mut().insert(url.into());
        self
    }

    pub(crate) fn clones(&self) -> Vec<String> {
        self.log.borrow().clones.clone()
    }

    pub(crate) fn pulled_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .log
            .borrow()
            .pulls
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub(crate) fn pushes(&self) -> usize {
        self.log.borrow().pushes.len()
    }
}

impl GitOps for RecordingGit {
    fn clone_repo(
        &self,
        url: &str,
        destination: &Path,
        _options: &CloneOptions,
    ) -> muno::git::Result<()> {
        if self.failing.borrow().contains(url) {
            return Err(GitError::Syscall(std::io::Error::other(format!(
                "remote {url} unreachable"
            ))));
        }

        fs::create_dir_all(destination.join(".git"))?;
        if let Some(files) = self.content.borrow().get(url) {
            for (file, data) in files {
                fs::write(destination.join(file), data)?;
            }
        }
        self.log.borrow_mut().clones.push(url.into());

        Ok(())
    }

    fn pull(&self, path: &Path, _options: &PullOptions) -> muno::git::Result<()> {
        self.log.borrow_mut().pulls.push(path.to_path_buf());
        Ok(())
    }

    fn push(&self, path: &Path) -> muno::git::Result<()> {
        self.log.borrow_mut().pushes.push(path.to_path_buf());
        Ok(())
    }

    fn status(&self, path: &Path) -> muno::git::Result<RepoStatus> {
        Ok(RepoStatus {
            branch: "main".into(),
            dirty: path.join("DIRTY").exists(),
        })
    }

    fn current_branch(&self, _path: &Path) -> muno::git::Result<String> {
        Ok("main".into())
    }

    fn remote_url(&self, _path: &Path) -> muno::git::Result<Option<String>> {
        Ok(None)
    }
}

/// Write file relative to current directory, creating parents.
pub(crate) fn write_file(path: impl AsRef<Path>, contents: &str) -> Result<PathBuf> {
    let path = std::env::current_dir()?.join(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, contents)?;

    Ok(path)
}
