//! Gathering commits behind issue links, and their file payloads.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracklink_core::links::raw_repo_name;
use tracklink_core::{Commit, Issue, LinkRef, Project};
use tracklink_service::GitHubClient;
use tracklink_store::{
    checkpoint_index, checkpoint_key, commit_dir_key, commit_file_key, list_documents, load_json,
    project_key, save_json, ObjectStore,
};

use crate::pool::WorkerPool;

pub const DEFAULT_SUFFIXES: &[&str] = &[".java"];

/// Fill `issue.commits` from its pull request and commit links.
///
/// Each link is handled on its own: one that cannot be parsed or fetched is
/// logged and skipped.
pub async fn gather_commits_for_issue(client: &GitHubClient, issue: &mut Issue) {
    if !issue.prlinks.is_empty() {
        info!("gathering commits of {} from pull requests", issue.self_url);
    }
    let mut commits = Vec::new();
    for link in issue.prlinks.iter().chain(&issue.commitlinks) {
        match LinkRef::parse(link) {
            Ok(LinkRef::PullRequest { repo, number }) => {
                commits.extend(client.commits_for_pull_request(&repo, number).await);
            }
            Ok(LinkRef::Commit { repo, sha }) => match client.download_commit(&repo, &sha).await {
                Ok(Some(commit)) => commits.push(commit),
                Ok(None) => {}
                Err(e) => error!("downloading {link} of {} failed: {e}", issue.self_url),
            },
            Err(e) => error!("skipping {link} of {}: {e}", issue.self_url),
        }
    }
    issue.commits = Some(commits);
}

/// Store every file of `commit` whose extension is in `suffixes` under
/// `owner/name/[pr/]sha/<flat name>`, and point `commit.path` at that
/// directory. Files already present are not fetched again. Returns
/// the number of files fetched.
pub async fn download_files_for_commit(
    client: &GitHubClient,
    files: &dyn ObjectStore,
    commit: &mut Commit,
    suffixes: &[String],
) -> usize {
    let Some(first) = commit.files.first() else {
        return 0;
    };
    let Some(repo) = first.raw_url.as_deref().and_then(raw_repo_name) else {
        error!("commit {} has no usable raw url, skipping its files", commit.sha);
        return 0;
    };
    info!("downloading files of {repo} commit {}", commit.sha);

    let mut fetched = 0;
    for file in &commit.files {
        if !file.suffix().is_some_and(|s| suffixes.iter().any(|p| p == s)) {
            continue;
        }
        let key = commit_file_key(&repo, commit.pullrequest, &commit.sha, &file.flat_name());
        match files.exists(&key).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                error!("checking {key} failed: {e}");
                continue;
            }
        }
        let Some(url) = file.raw_url.as_deref() else {
            warn!("{} of commit {} has no raw url", file.filename, commit.sha);
            continue;
        };
        let stored = match client.fetch_raw(url).await {
            Ok(body) => files.put(&key, body).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match stored {
            Ok(()) => fetched += 1,
            Err(e) => error!("downloading {} of commit {} failed: {e}", file.filename, commit.sha),
        }
    }
    commit.path = Some(commit_dir_key(&repo, commit.pullrequest, &commit.sha));
    fetched
}

#[derive(Debug, Clone)]
pub struct GatherOptions {
    pub workers: usize,
    /// Write a checkpoint after every this many issues.
    pub save_every: usize,
}

impl Default for GatherOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            save_every: 1000,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GatherReport {
    /// Issues taken over from a saved version.
    pub reused: usize,
    pub gathered: usize,
    /// Issues whose gathering task died; they keep `commits: None`.
    pub failed: usize,
    pub checkpoints: usize,
}

impl GatherReport {
    fn absorb(&mut self, other: &GatherReport) {
        self.reused += other.reused;
        self.gathered += other.gathered;
        self.failed += other.failed;
        self.checkpoints += other.checkpoints;
    }
}

/// Newest `<project>_<index>.json` among `documents`.
pub fn latest_checkpoint<'a>(documents: &'a [String], project: &str) -> Option<&'a str> {
    documents
        .iter()
        .filter_map(|doc| checkpoint_index(doc, project).map(|idx| (idx, doc)))
        .max_by_key(|(idx, _)| *idx)
        .map(|(_, doc)| doc.as_str())
}

/// A previous run's output for `project`: the finished document when there
/// is one, otherwise the newest checkpoint. Unreadable saves are ignored.
pub async fn saved_version(store: &dyn ObjectStore, project: &str) -> Option<Project> {
    let documents = match list_documents(store).await {
        Ok(documents) => documents,
        Err(e) => {
            warn!("listing saved projects failed: {e}");
            return None;
        }
    };
    let finished = project_key(project);
    let key = if documents.contains(&finished) {
        finished.as_str()
    } else {
        latest_checkpoint(&documents, project)?
    };
    match load_json(store, key).await {
        Ok(saved) => Some(saved),
        Err(e) => {
            warn!("ignoring saved version {key}: {e}");
            None
        }
    }
}

/// Gather commits for every issue of `project`, reusing complete issues of
/// the saved version in `out`. Progress is checkpointed to `out` every
/// `save_every` issues.
pub async fn gather_commits_for_project(
    client: Arc<GitHubClient>,
    out: &dyn ObjectStore,
    project: &mut Project,
    options: &GatherOptions,
) -> Result<GatherReport> {
    info!("gathering commits for project {}", project.key);
    let saved = saved_version(out, &project.key).await;
    let issues = std::mem::take(&mut project.issues);
    let total = issues.len();
    let chunk_size = options.save_every.max(1);

    let mut report = GatherReport::default();
    let mut remaining = issues.into_iter();
    loop {
        let chunk: Vec<Issue> = remaining.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        let gathered =
            gather_chunk(&client, chunk, saved.as_ref(), options.workers, &mut report).await;
        project.issues.extend(gathered);

        let done = project.issues.len();
        if done < total {
            let key = checkpoint_key(&project.key, done);
            save_json(out, &key, &*project)
                .await
                .with_context(|| format!("writing checkpoint {key}"))?;
            report.checkpoints += 1;
        }
    }
    let usage = client.usage_snapshot();
    info!("request counters after {}: {usage:?}", project.key);
    Ok(report)
}

async fn gather_chunk(
    client: &Arc<GitHubClient>,
    chunk: Vec<Issue>,
    saved: Option<&Project>,
    workers: usize,
    report: &mut GatherReport,
) -> Vec<Issue> {
    let mut slots = Vec::with_capacity(chunk.len());
    let mut pool = WorkerPool::new(workers);

    for (index, issue) in chunk.into_iter().enumerate() {
        let existing = saved
            .and_then(|p| p.find_issue_by_self(&issue.self_url))
            .filter(|e| !e.needs_commits());
        if let Some(existing) = existing {
            report.reused += 1;
            slots.push(existing.clone());
            continue;
        }
        // A task that dies leaves the original issue in its slot.
        slots.push(issue.clone());
        let client = Arc::clone(client);
        pool.spawn(async move {
            let mut issue = issue;
            gather_commits_for_issue(&client, &mut issue).await;
            (index, issue)
        });
    }

    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok((index, issue)) => {
                slots[index] = issue;
                report.gathered += 1;
            }
            Err(e) => {
                error!("commit gathering task failed: {e}");
                report.failed += 1;
            }
        }
    }
    slots
}

/// Gather commits for every project document in `projects` and write the
/// results to `out` as `<KEY>.json`, removing that project's checkpoints.
pub async fn gather_commits_for_projects(
    client: Arc<GitHubClient>,
    projects: &dyn ObjectStore,
    out: &dyn ObjectStore,
    options: &GatherOptions,
) -> Result<GatherReport> {
    let mut total = GatherReport::default();
    for document in list_documents(projects).await.context("listing projects")? {
        if out.exists(&document).await.unwrap_or(false) {
            info!("{document} already has commits");
            continue;
        }
        let mut project: Project = match load_json(projects, &document).await {
            Ok(project) => project,
            Err(e) => {
                error!("skipping {document}: {e}");
                continue;
            }
        };
        let report =
            gather_commits_for_project(client.clone(), out, &mut project, options).await?;
        total.absorb(&report);

        let key = project_key(&project.key);
        save_json(out, &key, &project)
            .await
            .with_context(|| format!("writing {key}"))?;
        for stale in list_documents(out).await.context("listing checkpoints")? {
            if checkpoint_index(&stale, &project.key).is_some() {
                out.delete(&stale)
                    .await
                    .with_context(|| format!("removing checkpoint {stale}"))?;
            }
        }
        info!(
            "project {}: {} reused, {} gathered, {} failed",
            project.key, report.reused, report.gathered, report.failed
        );
        // Commits are rarely shared across projects; keep memory per project.
        client.clear_caches();
    }
    Ok(total)
}
