//! Fetching pull request commits and their file payloads for connected
//! repositories.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracklink_core::{Commit, Repository};
use tracklink_service::GitHubClient;
use tracklink_store::{list_documents, load_json, save_json, ObjectStore};

use crate::aggregator::{download_files_for_commit, DEFAULT_SUFFIXES};
use crate::pool::WorkerPool;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub workers: usize,
    /// Only pull requests connected to at least one issue.
    pub only_with_issues: bool,
    /// File extensions worth fetching, dot included.
    pub suffixes: Vec<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            only_with_issues: true,
            suffixes: DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub repositories: usize,
    pub skipped: usize,
    pub pulls: usize,
    pub commits: usize,
    pub files: usize,
}

/// Fill `commits` of each selected pull request and fetch the files of
/// every commit into `files`.
pub async fn download_repository(
    client: Arc<GitHubClient>,
    files: Arc<dyn ObjectStore>,
    repository: &mut Repository,
    options: &DownloadOptions,
) -> DownloadReport {
    info!("downloading files of repository {}", repository.full_name);
    let mut report = DownloadReport::default();
    let suffixes = Arc::new(options.suffixes.clone());
    let mut pool = WorkerPool::new(options.workers);

    for (pull_index, pull) in repository.pulls.iter_mut().enumerate() {
        if options.only_with_issues && !pull.has_issue() {
            continue;
        }
        report.pulls += 1;
        let commits = client
            .commits_for_pull_request(&repository.full_name, pull.number)
            .await;
        report.commits += commits.len();
        for (commit_index, commit) in commits.iter().enumerate() {
            let client = Arc::clone(&client);
            let files = Arc::clone(&files);
            let suffixes = Arc::clone(&suffixes);
            let mut commit: Commit = commit.clone();
            pool.spawn(async move {
                let fetched =
                    download_files_for_commit(&client, &*files, &mut commit, &suffixes).await;
                (pull_index, commit_index, commit, fetched)
            });
        }
        pull.commits = Some(commits);
    }

    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok((pull_index, commit_index, commit, fetched)) => {
                report.files += fetched;
                let slot = repository.pulls[pull_index]
                    .commits
                    .as_mut()
                    .and_then(|commits| commits.get_mut(commit_index));
                if let Some(slot) = slot {
                    *slot = commit;
                }
            }
            Err(e) => error!("file download task failed: {e}"),
        }
    }
    report
}

/// Download files for every repository document in `repos` and write the
/// updated repositories to `out`. Repositories already in `out` are skipped.
pub async fn download_repositories(
    client: Arc<GitHubClient>,
    repos: &dyn ObjectStore,
    files: Arc<dyn ObjectStore>,
    out: &dyn ObjectStore,
    options: &DownloadOptions,
) -> Result<DownloadReport> {
    let mut total = DownloadReport::default();
    for document in list_documents(repos).await.context("listing repositories")? {
        if out.exists(&document).await.unwrap_or(false) {
            total.skipped += 1;
            continue;
        }
        let mut repository: Repository = match load_json(repos, &document).await {
            Ok(repository) => repository,
            Err(e) => {
                error!("skipping {document}: {e}");
                continue;
            }
        };
        let report =
            download_repository(client.clone(), files.clone(), &mut repository, options).await;
        save_json(out, &document, &repository)
            .await
            .with_context(|| format!("writing {document}"))?;

        total.repositories += 1;
        total.pulls += report.pulls;
        total.commits += report.commits;
        total.files += report.files;
    }
    info!(
        "downloaded {} files from {} commits of {} repositories, {} skipped",
        total.files, total.commits, total.repositories, total.skipped
    );
    Ok(total)
}
