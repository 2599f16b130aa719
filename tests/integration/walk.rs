// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{write_file, RecordingGit};

use muno::{
    AssumeYes, NodeKind, PullOptions, WalkOptions, Workspace, WorkspaceConfig, WorkspaceError,
};

use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::fs;

/// Root declares "team" through a definition file that overrides its child
/// directory and declares an eager "svc" repository.
fn team_workspace() -> Result<()> {
    write_file(
        "ws/muno.yaml",
        indoc! {r#"
            workspace:
              name: root
            nodes:
              - name: team
                file: team.yaml
        "#},
    )?;
    write_file(
        "ws/team.yaml",
        indoc! {r#"
            workspace:
              name: team
              repos_dir: services
            nodes:
              - name: svc
                url: https://x/svc.git
                fetch: eager
        "#},
    )?;

    Ok(())
}

#[sealed_test]
fn nested_reference_links_definition_and_clones_eager_repo() -> Result<()> {
    team_workspace()?;
    let git = RecordingGit::default();
    let mut workspace = Workspace::open("ws", git.clone(), AssumeYes)?;

    let report = workspace.clone_all("/team", WalkOptions::new(true, false))?;
    let root = workspace.root().to_path_buf();

    assert!(report.is_success());
    assert!(root.join("repos/team/muno.yaml").is_file());
    assert!(root.join("repos/team/services/svc/.git").is_dir());
    assert_eq!(git.clones(), vec!["https://x/svc.git".to_string()]);
    assert_eq!(
        workspace.compute_filesystem_path("/team/svc")?,
        root.join("repos/team/services/svc")
    );
    assert_eq!(
        workspace.resolve_tree_path(root.join("repos/team/services/svc/src/lib.rs"))?,
        "/team/svc"
    );

    // State survives reopening.
    let reopened = Workspace::open("ws", git, AssumeYes)?;
    assert!(reopened.node("/team/svc")?.is_cloned());

    Ok(())
}

#[sealed_test]
fn lazy_repository_needs_include_lazy() -> Result<()> {
    write_file(
        "ws/muno.yaml",
        indoc! {r#"
            workspace:
              name: root
            nodes:
              - name: lazy-service
                url: https://x/lazy-service.git
                fetch: lazy
        "#},
    )?;
    let git = RecordingGit::default();
    let mut workspace = Workspace::open("ws", git.clone(), AssumeYes)?;

    let report = workspace.clone_all("/", WalkOptions::new(false, false))?;
    assert_eq!(report.skipped, vec!["/lazy-service".to_string()]);
    assert!(git.clones().is_empty());
    assert!(!workspace.node("/lazy-service")?.is_cloned());

    let report = workspace.clone_all("/", WalkOptions::new(false, true))?;
    assert_eq!(report.cloned, vec!["/lazy-service".to_string()]);
    let node = workspace.node("/lazy-service")?;
    assert!(node.is_cloned());
    assert!(!node.is_lazy());
    assert!(workspace.root().join("repos/lazy-service/.git").is_dir());

    Ok(())
}

/// Parent "platform" mixing eager repositories with a nested definition.
fn platform_workspace() -> Result<()> {
    write_file(
        "ws/muno.yaml",
        indoc! {r#"
            workspace:
              name: root
            nodes:
              - name: platform
                file: teams/platform.yaml
        "#},
    )?;
    write_file(
        "ws/teams/platform.yaml",
        indoc! {r#"
            workspace:
              name: platform
            nodes:
              - name: repo1
                url: https://x/repo1.git
                fetch: eager
              - name: subteam
                file: subteam.yaml
              - name: repo2
                url: https://x/repo2.git
                fetch: eager
        "#},
    )?;
    write_file(
        "ws/teams/subteam.yaml",
        indoc! {r#"
            workspace:
              name: subteam
            nodes:
              - name: repo3
                url: https://x/repo3.git
                fetch: eager
        "#},
    )?;

    Ok(())
}

#[sealed_test]
fn recursive_pull_touches_each_leaf_once() -> Result<()> {
    platform_workspace()?;
    let git = RecordingGit::default();
    let mut workspace = Workspace::open("ws", git.clone(), AssumeYes)?;

    let report = workspace.clone_all("/", WalkOptions::new(true, false))?;
    assert!(report.is_success());
    assert_eq!(git.clones().len(), 3);

    let report = workspace.pull_all("/", WalkOptions::new(true, false), PullOptions::default())?;
    assert!(report.is_success());
    assert_eq!(git.pulled_names(), vec!["repo1", "repo2", "repo3"]);
    assert_eq!(
        report.pulled,
        vec!["/platform/repo1", "/platform/subteam/repo3", "/platform/repo2"]
    );
    assert_eq!(git.clones().len(), 3);

    Ok(())
}

#[sealed_test]
fn materialization_is_idempotent() -> Result<()> {
    platform_workspace()?;
    let git = RecordingGit::default();
    let mut workspace = Workspace::open("ws", git.clone(), AssumeYes)?;

    workspace.clone_all("/", WalkOptions::new(true, false))?;
    let first: Vec<_> = workspace
        .tree()?
        .descendants()
        .into_iter()
        .map(|node| node.path.clone())
        .collect();

    let report = workspace.clone_all("/", WalkOptions::new(true, false))?;
    let second: Vec<_> = workspace
        .tree()?
        .descendants()
        .into_iter()
        .map(|node| node.path.clone())
        .collect();

    assert!(report.cloned.is_empty());
    assert_eq!(first, second);
    assert_eq!(git.clones().len(), 3);

    Ok(())
}

#[cfg(unix)]
#[sealed_test]
fn broken_definition_link_is_repaired() -> Result<()> {
    team_workspace()?;
    let mut workspace = Workspace::open("ws", RecordingGit::default(), AssumeYes)?;
    workspace.clone_all("/team", WalkOptions::new(false, false))?;

    let root = workspace.root().to_path_buf();
    let link = root.join("repos/team/muno.yaml");
    let stray = write_file("stray.yaml", "workspace:\n  name: stray\n")?;
    fs::remove_file(&link)?;
    std::os::unix::fs::symlink(&stray, &link)?;

    workspace.clone_all("/team", WalkOptions::new(false, false))?;
    assert_eq!(fs::read_link(&link)?, root.join("team.yaml"));

    Ok(())
}

#[sealed_test]
fn failing_clone_does_not_stop_siblings() -> Result<()> {
    platform_workspace()?;
    let git = RecordingGit::default().failing("https://x/repo1.git");
    let mut workspace = Workspace::open("ws", git.clone(), AssumeYes)?;

    let report = workspace.clone_all("/", WalkOptions::new(true, false))?;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, "/platform/repo1");
    assert_eq!(
        git.clones(),
        vec!["https://x/repo3.git".to_string(), "https://x/repo2.git".to_string()]
    );
    assert!(!workspace.node("/platform/repo1")?.is_cloned());

    Ok(())
}

#[sealed_test]
fn malformed_nested_definition_is_a_leaf() -> Result<()> {
    team_workspace()?;
    write_file("ws/team.yaml", "nodes: [ {name: broken} ]\n")?;
    let mut workspace = Workspace::open("ws", RecordingGit::default(), AssumeYes)?;

    let report = workspace.clone_all("/", WalkOptions::new(true, false))?;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, "/team");
    assert!(workspace.node("/team")?.children.is_empty());

    Ok(())
}

#[sealed_test]
fn cloned_repository_contributes_children() -> Result<()> {
    write_file(
        "ws/muno.yaml",
        indoc! {r#"
            workspace:
              name: root
            nodes:
              - name: backend-monorepo
                url: https://x/backend-monorepo.git
        "#},
    )?;
    let git = RecordingGit::default().with_content(
        "https://x/backend-monorepo.git",
        "muno.yaml",
        indoc! {r#"
            workspace:
              name: backend
            nodes:
              - name: api
                url: https://x/api.git
              - name: core-meta
                url: https://x/core-meta.git
        "#},
    );
    let mut workspace = Workspace::open("ws", git.clone(), AssumeYes)?;

    let planned: Vec<_> = workspace
        .preview("/", WalkOptions::new(true, false))?
        .into_iter()
        .map(|node| node.path)
        .collect();
    assert_eq!(planned, vec!["/backend-monorepo"]);
    assert!(git.clones().is_empty());

    let report = workspace.clone_all("/", WalkOptions::new(true, false))?;
    // Auto fetch clones aggregation repositories and leaves the rest lazy.
    assert_eq!(report.cloned, vec!["/backend-monorepo", "/backend-monorepo/core-meta"]);
    assert_eq!(report.skipped, vec!["/backend-monorepo/api"]);
    assert!(workspace
        .root()
        .join("repos/backend-monorepo/repos/core-meta/.git")
        .is_dir());

    Ok(())
}

#[sealed_test]
fn push_and_status_cover_cloned_repositories() -> Result<()> {
    platform_workspace()?;
    let git = RecordingGit::default();
    let mut workspace = Workspace::open("ws", git.clone(), AssumeYes)?;
    workspace.clone_all("/", WalkOptions::new(true, false))?;
    fs::write(
        workspace.compute_filesystem_path("/platform/repo2")?.join("DIRTY"),
        "",
    )?;

    let report = workspace.push_all("/platform")?;
    assert_eq!(report.pushed.len(), 3);
    assert_eq!(git.pushes(), 3);

    let entries = workspace.status_all("/")?;
    let dirty: Vec<_> = entries
        .iter()
        .filter(|entry| entry.dirty)
        .map(|entry| entry.path.as_str())
        .collect();
    assert_eq!(dirty, vec!["/platform/repo2"]);
    assert!(workspace.node("/platform/repo2")?.has_local_changes);

    Ok(())
}

#[sealed_test]
fn remote_reference_has_no_content() -> Result<()> {
    write_file(
        "ws/muno.yaml",
        indoc! {r#"
            workspace:
              name: root
            nodes:
              - name: shared
                file: https://example.org/muno.yaml
        "#},
    )?;
    let mut workspace = Workspace::open("ws", RecordingGit::default(), AssumeYes)?;

    let report = workspace.clone_all("/", WalkOptions::new(true, true))?;
    assert!(report.is_success());
    assert_eq!(report.skipped, vec!["/shared"]);
    assert!(workspace.root().join("repos/shared").is_dir());
    assert!(!workspace.root().join("repos/shared/muno.yaml").exists());

    Ok(())
}

#[sealed_test]
fn lazy_target_is_gated_like_any_node() -> Result<()> {
    write_file(
        "ws/muno.yaml",
        indoc! {r#"
            workspace:
              name: root
            nodes:
              - name: lazy-service
                url: https://x/lazy-service.git
                fetch: lazy
        "#},
    )?;
    let git = RecordingGit::default();
    let mut workspace = Workspace::open("ws", git.clone(), AssumeYes)?;

    for recursive in [false, true] {
        let options = WalkOptions::new(recursive, false);
        assert!(workspace.preview("/lazy-service", options)?.is_empty());

        let report = workspace.clone_all("/lazy-service", options)?;
        assert_eq!(report.skipped, vec!["/lazy-service"]);
        assert!(report.cloned.is_empty());

        let report = workspace.pull_all("/lazy-service", options, PullOptions::default())?;
        assert!(report.cloned.is_empty());
    }
    assert!(git.clones().is_empty());
    assert!(!workspace.node("/lazy-service")?.is_cloned());

    let report = workspace.clone_all("/lazy-service", WalkOptions::new(false, true))?;
    assert_eq!(report.cloned, vec!["/lazy-service"]);

    Ok(())
}

/// Team definition declaring a nested definition and a lazy repository.
fn team_with_nested_definition(sub: &str, with_old: bool) -> Result<()> {
    let old = if with_old {
        "  - name: old\n    url: https://x/old.git\n    fetch: lazy\n"
    } else {
        ""
    };
    write_file(
        "ws/team.yaml",
        &format!("workspace:\n  name: team\nnodes:\n  - name: sub\n    file: {sub}\n{old}"),
    )?;

    Ok(())
}

#[sealed_test]
fn nested_redeclarations_are_reconciled() -> Result<()> {
    write_file(
        "ws/muno.yaml",
        indoc! {r#"
            workspace:
              name: root
            nodes:
              - name: team
                file: team.yaml
        "#},
    )?;
    write_file("ws/sub-a.yaml", "workspace:\n  name: a\n")?;
    write_file(
        "ws/sub-b.yaml",
        indoc! {r#"
            workspace:
              name: b
            nodes:
              - name: svc
                url: https://x/svc.git
                fetch: eager
        "#},
    )?;
    team_with_nested_definition("sub-a.yaml", true)?;

    let git = RecordingGit::default();
    let mut workspace = Workspace::open("ws", git.clone(), AssumeYes)?;
    workspace.clone_all("/", WalkOptions::new(true, false))?;
    assert!(workspace.node("/team/old")?.is_lazy());
    workspace.resolve_path("/team/old", false)?;

    team_with_nested_definition("sub-b.yaml", false)?;
    let report = workspace.clone_all("/", WalkOptions::new(true, false))?;
    assert!(report.is_success());

    let root = workspace.root().to_path_buf();
    let link = root.join("repos/team/repos/sub/muno.yaml");
    assert_eq!(WorkspaceConfig::load(&link)?.workspace.name, "b");
    #[cfg(unix)]
    assert_eq!(fs::read_link(&link)?, root.join("sub-b.yaml"));
    assert!(workspace.node("/team/sub/svc")?.is_cloned());
    assert_eq!(git.clones(), vec!["https://x/svc.git".to_string()]);

    // Undeclared nodes are gone for good.
    assert!(workspace.node("/team/old").is_err());
    assert!(matches!(
        workspace.resolve_path("/team/old", false),
        Err(WorkspaceError::NodeNotFound(_))
    ));
    assert_eq!(workspace.current_path()?, "/team");

    let reopened = Workspace::open("ws", git, AssumeYes)?;
    assert!(reopened.node("/team/old").is_err());

    Ok(())
}

#[sealed_test]
fn changed_node_kind_replaces_node() -> Result<()> {
    write_file(
        "ws/muno.yaml",
        indoc! {r#"
            workspace:
              name: root
            nodes:
              - name: team
                file: team.yaml
        "#},
    )?;
    write_file(
        "ws/team.yaml",
        "workspace:\n  name: team\nnodes:\n  - name: svc\n    url: https://x/svc.git\n    fetch: lazy\n",
    )?;
    let mut workspace = Workspace::open("ws", RecordingGit::default(), AssumeYes)?;
    workspace.clone_all("/", WalkOptions::new(true, false))?;

    write_file(
        "ws/team.yaml",
        "workspace:\n  name: team\nnodes:\n  - name: svc\n    file: team.yaml\n",
    )?;
    workspace.clone_all("/team", WalkOptions::new(false, false))?;
    assert!(matches!(
        workspace.node("/team/svc")?.kind,
        NodeKind::ConfigReference { .. }
    ));

    Ok(())
}

#[sealed_test]
fn custom_child_directory_of_cloned_repository_round_trips() -> Result<()> {
    write_file(
        "ws/muno.yaml",
        indoc! {r#"
            workspace:
              name: root
            nodes:
              - name: app-platform
                url: https://x/app-platform.git
        "#},
    )?;
    let git = RecordingGit::default().with_content(
        "https://x/app-platform.git",
        "muno.yaml",
        indoc! {r#"
            workspace:
              name: app
              repos_dir: modules
            nodes:
              - name: lib
                url: https://x/lib-repo.git
        "#},
    );
    let mut workspace = Workspace::open("ws", git, AssumeYes)?;
    let report = workspace.clone_all("/", WalkOptions::new(true, false))?;
    assert_eq!(report.cloned, vec!["/app-platform", "/app-platform/lib"]);

    let physical = workspace.compute_filesystem_path("/app-platform/lib")?;
    assert_eq!(
        physical,
        workspace.root().join("repos/app-platform/modules/lib")
    );
    assert!(physical.join(".git").is_dir());
    assert_eq!(
        workspace.resolve_tree_path(physical.join("src/main.rs"))?,
        "/app-platform/lib"
    );
    assert_eq!(
        workspace.resolve_tree_path(workspace.root().join("repos/app-platform/README.md"))?,
        "/app-platform"
    );

    Ok(())
}
