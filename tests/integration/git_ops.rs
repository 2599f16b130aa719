// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{write_file, RepoFixture};

use muno::{
    git::CloneOptions, AssumeYes, Git2Ops, GitOps, WalkOptions, Workspace,
};

use anyhow::Result;
use indoc::formatdoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::fs;

#[sealed_test]
fn clone_and_inspect_local_repository() -> Result<()> {
    let remote = std::env::current_dir()?.join("remote");
    let fixture = RepoFixture::new(&remote)?;
    fixture.stage_and_commit("README.md", "hello")?;

    let git = Git2Ops::new(false);
    let local = std::env::current_dir()?.join("local");
    let url = remote.to_string_lossy().into_owned();
    git.clone_repo(&url, &local, &CloneOptions::default())?;

    assert_eq!(fs::read_to_string(local.join("README.md"))?, "hello");
    assert_eq!(git.current_branch(&local)?, "main");
    assert_eq!(git.remote_url(&local)?, Some(url));

    let status = git.status(&local)?;
    assert_eq!(status.branch, "main");
    assert!(!status.dirty);

    fs::write(local.join("scratch.txt"), "wip")?;
    assert!(git.status(&local)?.dirty);

    Ok(())
}

#[sealed_test]
fn unborn_branch_is_reported() -> Result<()> {
    let path = std::env::current_dir()?.join("fresh");
    RepoFixture::new(&path)?;

    let git = Git2Ops::new(false);
    assert_eq!(git.current_branch(&path)?, "main");
    assert_eq!(git.remote_url(&path)?, None);

    Ok(())
}

#[sealed_test]
fn workspace_clones_real_repository() -> Result<()> {
    let remote = std::env::current_dir()?.join("remote/tools-repo");
    let fixture = RepoFixture::new(&remote)?;
    fixture.stage_and_commit("muno.yaml", "workspace:\n  name: tools\n")?;

    write_file(
        "ws/muno.yaml",
        &formatdoc! {r#"
            workspace:
              name: root
            nodes:
              - name: tools-repo
                url: {url}
        "#, url = remote.display()},
    )?;

    let mut workspace = Workspace::open("ws", Git2Ops::new(false), AssumeYes)?;
    let report = workspace.clone_all("/", WalkOptions::new(true, false))?;

    assert_eq!(report.cloned, vec!["/tools-repo"]);
    assert!(workspace.node("/tools-repo")?.is_cloned());
    assert!(workspace
        .root()
        .join("repos/tools-repo/muno.yaml")
        .is_file());

    Ok(())
}
