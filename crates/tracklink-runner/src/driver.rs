//! Connecting pull requests to the issues named in their titles.
//!
//! Each repository document is processed as one unit: every pull request is
//! resolved, then the whole repository is written. A repository whose output
//! already exists is skipped, so an interrupted run resumes where it stopped.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracklink_core::{PullRequest, Repository};
use tracklink_store::{list_documents, load_json, save_json, ObjectStore};

use crate::catalog::Catalog;
use crate::pool::WorkerPool;
use crate::resolver::{ResolveError, Resolution, Resolver};

pub const DEFAULT_CONNECT_WORKERS: usize = 20;

/// Outcome of connecting one pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullState {
    /// At least one candidate key matched an issue.
    Resolved,
    /// No candidates, or every candidate was on the ignore list.
    Skipped,
    /// Candidates existed but none resolved.
    Failed,
}

/// A corrected project token, kept for auditing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub repository: String,
    pub pull: u64,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectReport {
    pub connected: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pulls_resolved: usize,
    pub pulls_skipped: usize,
    pub pulls_failed: usize,
    pub malformed: usize,
    pub project_not_found: usize,
    pub issue_not_found: usize,
    pub load_errors: usize,
    pub renames: Vec<Rename>,
}

impl ConnectReport {
    fn count_pull(&mut self, state: PullState) {
        match state {
            PullState::Resolved => self.pulls_resolved += 1,
            PullState::Failed => self.pulls_failed += 1,
            PullState::Skipped => self.pulls_skipped += 1,
        }
    }

    fn count_error(&mut self, err: &ResolveError) {
        match err {
            ResolveError::Malformed(_) => self.malformed += 1,
            ResolveError::ProjectNotFound(_) => self.project_not_found += 1,
            ResolveError::IssueNotFound(_) => self.issue_not_found += 1,
            ResolveError::Load { .. } => self.load_errors += 1,
        }
    }

    fn absorb(&mut self, other: ConnectReport) {
        self.connected += other.connected;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.pulls_resolved += other.pulls_resolved;
        self.pulls_skipped += other.pulls_skipped;
        self.pulls_failed += other.pulls_failed;
        self.malformed += other.malformed;
        self.project_not_found += other.project_not_found;
        self.issue_not_found += other.issue_not_found;
        self.load_errors += other.load_errors;
        self.renames.extend(other.renames);
    }
}

/// Resolve every candidate key of one pull request into `pull.issue`.
pub async fn connect_pull(
    repository: &str,
    pull: &mut PullRequest,
    catalog: &Catalog,
    resolver: &Resolver,
    report: &mut ConnectReport,
) -> PullState {
    let Some(candidates) = pull.issue_key.clone() else {
        return PullState::Skipped;
    };
    let mut issues = Vec::new();
    let mut failures = 0;
    for raw in &candidates {
        match resolver.resolve(raw, catalog).await {
            Ok(Resolution::Found {
                key,
                issues: found,
                renamed_from,
            }) => {
                if let Some(from) = renamed_from {
                    let to = key.rsplit_once('-').map_or(key.as_str(), |(p, _)| p);
                    report.renames.push(Rename {
                        repository: repository.to_string(),
                        pull: pull.number,
                        from,
                        to: to.to_string(),
                    });
                }
                issues.extend(found);
            }
            Ok(Resolution::Ignored) => {}
            Err(e) => {
                error!("repo: {repository}, pull: {}, key: {raw}. {e}", pull.number);
                report.count_error(&e);
                failures += 1;
            }
        }
    }
    let state = if !issues.is_empty() {
        PullState::Resolved
    } else if failures > 0 {
        PullState::Failed
    } else {
        PullState::Skipped
    };
    pull.issue = Some(issues);
    state
}

/// Connect every pull request of `repository`.
pub async fn connect_repository(
    repository: &mut Repository,
    catalog: &Catalog,
    resolver: &Resolver,
) -> ConnectReport {
    let mut report = ConnectReport::default();
    for pull in &mut repository.pulls {
        let state =
            connect_pull(&repository.full_name, pull, catalog, resolver, &mut report).await;
        report.count_pull(state);
    }
    report
}

/// Connect every repository document in `repos`, writing each finished
/// repository to `out` under the same name. Up to `workers` repositories are
/// processed at once.
pub async fn connect_repositories(
    repos: Arc<dyn ObjectStore>,
    out: Arc<dyn ObjectStore>,
    catalog: Arc<Catalog>,
    resolver: Arc<Resolver>,
    workers: usize,
) -> Result<ConnectReport> {
    let mut report = ConnectReport::default();
    let mut pool = WorkerPool::new(workers);

    for document in list_documents(repos.as_ref()).await.context("listing repositories")? {
        if out.exists(&document).await.unwrap_or(false) {
            report.skipped += 1;
            continue;
        }
        info!("connecting {document}");
        let repos = Arc::clone(&repos);
        let out = Arc::clone(&out);
        let catalog = Arc::clone(&catalog);
        let resolver = Arc::clone(&resolver);
        pool.spawn(async move {
            let result = connect_document(&document, &*repos, &*out, &catalog, &resolver).await;
            (document, result)
        });
    }

    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok((_, Ok(repo_report))) => {
                report.connected += 1;
                report.absorb(repo_report);
            }
            Ok((document, Err(e))) => {
                error!("connecting {document} failed: {e:#}");
                report.failed += 1;
            }
            Err(e) => {
                error!("connect task failed: {e}");
                report.failed += 1;
            }
        }
    }
    info!(
        "connected {} repositories, skipped {}, failed {}; pulls resolved {}, failed {}",
        report.connected, report.skipped, report.failed, report.pulls_resolved, report.pulls_failed
    );
    Ok(report)
}

async fn connect_document(
    document: &str,
    repos: &dyn ObjectStore,
    out: &dyn ObjectStore,
    catalog: &Catalog,
    resolver: &Resolver,
) -> Result<ConnectReport> {
    let mut repository: Repository = load_json(repos, document)
        .await
        .with_context(|| format!("reading {document}"))?;
    let report = connect_repository(&mut repository, catalog, resolver).await;
    save_json(out, document, &repository)
        .await
        .with_context(|| format!("writing {document}"))?;
    Ok(report)
}
