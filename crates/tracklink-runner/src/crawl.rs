//! Crawling the issue tracker for projects and the code host for pull
//! requests.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracklink_core::{title_keys, ExtractedLinks, Issue, Project};
use tracklink_service::{GitHubClient, ServiceError, TrackedIssue, TrackerClient};
use tracklink_store::{
    list_documents, load_json, project_key, repository_key, save_json, ObjectStore,
};

use crate::pool::WorkerPool;

pub const DEFAULT_ISSUE_PAGE: u64 = 1000;
pub const DEFAULT_PULL_WORKERS: usize = 3;

/// The tracker's test project; crawling it is skipped.
const SKIPPED_PROJECT: &str = "TST";

/// Turn a tracked issue into an [`Issue`] carrying every code-host link
/// found in its document, worklog and comments. Sub-resources that fail to
/// load count as empty.
pub async fn link_issue(tracker: &TrackerClient, tracked: TrackedIssue) -> Issue {
    let worklog = tracker.worklog_text(&tracked).await.unwrap_or_else(|e| {
        warn!("worklog of {} unavailable: {e}", tracked.issue.key);
        String::new()
    });
    let comments = tracker.comments_text(&tracked).await.unwrap_or_else(|e| {
        warn!("comments of {} unavailable: {e}", tracked.issue.key);
        String::new()
    });

    let mut links = ExtractedLinks::new();
    links.scan(&tracked.raw.to_string());
    links.scan(&worklog);
    links.scan(&comments);

    let mut issue = tracked.issue;
    issue.set_links(links);
    issue
}

/// All issues of `project` with their links.
pub async fn crawl_project(
    tracker: &TrackerClient,
    mut project: Project,
    page_size: u64,
) -> Result<Project, ServiceError> {
    let tracked = tracker.issues(&project.key, page_size).await?;
    let mut issues = Vec::with_capacity(tracked.len());
    for t in tracked {
        issues.push(link_issue(tracker, t).await);
    }
    project.issues = issues;
    Ok(project)
}

/// Crawl every tracker project (or just `only`) into `out` as `<KEY>.json`.
/// Projects already present in `out` are skipped. Returns the number written.
pub async fn crawl_projects(
    tracker: &TrackerClient,
    out: &dyn ObjectStore,
    only: &[String],
    page_size: u64,
) -> Result<usize> {
    let projects = tracker.projects().await.context("listing tracker projects")?;
    let mut written = 0;
    for project in projects {
        if project.key == SKIPPED_PROJECT {
            continue;
        }
        if !only.is_empty() && !only.contains(&project.key) {
            continue;
        }
        let key = project_key(&project.key);
        if out.exists(&key).await.unwrap_or(false) {
            info!("project {} already crawled", project.key);
            continue;
        }
        let name = project.key.clone();
        match crawl_project(tracker, project, page_size).await {
            Ok(project) => {
                save_json(out, &key, &project)
                    .await
                    .with_context(|| format!("writing {key}"))?;
                written += 1;
            }
            Err(e) => error!("project {name} not found: {e}"),
        }
    }
    Ok(written)
}

/// Append the tracker's issues that `project` does not have yet, matched by
/// `self` URL. Returns how many were added.
pub async fn expand_project(
    tracker: &TrackerClient,
    project: &mut Project,
    page_size: u64,
) -> Result<usize, ServiceError> {
    let tracked = tracker.issues(&project.key, page_size).await?;
    let mut added = 0;
    for t in tracked {
        if project.find_issue_by_self(&t.issue.self_url).is_some() {
            continue;
        }
        let issue = link_issue(tracker, t).await;
        project.issues.push(issue);
        added += 1;
    }
    Ok(added)
}

/// [`expand_project`] for every project document in `projects`, written to
/// `out` under the same name.
pub async fn expand_projects(
    tracker: &TrackerClient,
    projects: &dyn ObjectStore,
    out: &dyn ObjectStore,
    page_size: u64,
) -> Result<usize> {
    let mut total = 0;
    for document in list_documents(projects).await.context("listing projects")? {
        let mut project: Project = match load_json(projects, &document).await {
            Ok(project) => project,
            Err(e) => {
                error!("skipping {document}: {e}");
                continue;
            }
        };
        match expand_project(tracker, &mut project, page_size).await {
            Ok(added) => {
                info!("project {}: {added} issues added", project.key);
                total += added;
            }
            Err(e) => error!("expanding {} failed: {e}", project.key),
        }
        save_json(out, &document, &project)
            .await
            .with_context(|| format!("writing {document}"))?;
    }
    Ok(total)
}

/// List every pull request of `full_name` with title keys and store it as
/// `<name>.json`. Returns `false` when the repository was already stored.
pub async fn gather_pulls(
    client: &GitHubClient,
    full_name: &str,
    out: &dyn ObjectStore,
) -> Result<bool> {
    let Some((_, name)) = full_name.split_once('/') else {
        anyhow::bail!("{full_name} is not an owner/name pair");
    };
    let key = repository_key(name);
    if out.exists(&key).await.unwrap_or(false) {
        info!("repo {full_name} skipped");
        return Ok(false);
    }
    info!("gathering pull requests of {full_name}");
    let mut repository = client
        .repository(full_name)
        .await
        .with_context(|| format!("repo {full_name} unavailable"))?;
    let mut pulls = client
        .pull_requests(full_name)
        .await
        .with_context(|| format!("listing pulls of {full_name}"))?;
    for pull in &mut pulls {
        pull.issue_key = pull.title.as_deref().and_then(title_keys);
    }
    repository.pulls = pulls;
    save_json(out, &key, &repository)
        .await
        .with_context(|| format!("writing {key}"))?;
    Ok(true)
}

/// [`gather_pulls`] for many repositories, `workers` at a time. Returns the
/// number of repositories written.
pub async fn gather_all_pulls(
    client: Arc<GitHubClient>,
    repositories: Vec<String>,
    out: Arc<dyn ObjectStore>,
    workers: usize,
) -> usize {
    let mut pool = WorkerPool::new(workers);
    for full_name in repositories {
        let client = Arc::clone(&client);
        let out = Arc::clone(&out);
        pool.spawn(async move {
            let result = gather_pulls(&client, &full_name, &*out).await;
            (full_name, result)
        });
    }

    let mut written = 0;
    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok((_, Ok(true))) => written += 1,
            Ok((_, Ok(false))) => {}
            Ok((full_name, Err(e))) => error!("gathering pulls of {full_name} failed: {e:#}"),
            Err(e) => error!("pull gathering task failed: {e}"),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tracklink_core::Repository;
    use tracklink_service::mock::MockTransport;
    use tracklink_service::{Credential, QuotaPolicy};
    use tracklink_store::LocalStore;

    use super::*;

    const JIRA: &str = "http://jira.test/rest/api/2";
    const API: &str = "http://gh.test";
    const FIELDS: &str = "description,comment,status,issuetype,created,updated,resolutiondate,worklog";

    fn search(mock: &MockTransport, key: &str, issues: Vec<serde_json::Value>) {
        let base = format!("{JIRA}/search?jql=project=\"{key}\"");
        let total = issues.len();
        mock.respond(
            &format!("{base}&maxResults=0&startAt=0"),
            200,
            json!({ "total": total, "issues": [] }),
        );
        mock.respond(
            &format!("{base}&maxResults=1000&startAt=0&fields={FIELDS}"),
            200,
            json!({ "total": total, "issues": issues }),
        );
    }

    fn raw_issue(key: &str, n: u64, description: &str) -> serde_json::Value {
        json!({
            "self": format!("{JIRA}/issue/{key}{n}"),
            "id": n.to_string(),
            "key": format!("{key}-{n}"),
            "fields": { "description": description }
        })
    }

    #[tokio::test]
    async fn crawl_extracts_links_and_skips_test_project() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            &format!("{JIRA}/project"),
            200,
            json!([
                { "self": "p1", "id": "1", "key": "FLINK", "name": "Flink" },
                { "self": "p2", "id": "2", "key": "TST", "name": "Test" },
            ]),
        );
        search(
            &mock,
            "FLINK",
            vec![raw_issue(
                "FLINK",
                1,
                "fixed in https://github.com/apache/flink/pull/12 and github.com/apache/flink/commit/abc123",
            )],
        );
        let tracker = TrackerClient::new(mock.clone(), JIRA, None);
        let dir = tempfile::tempdir().unwrap();
        let out = LocalStore::new(dir.path());

        assert_eq!(crawl_projects(&tracker, &out, &[], DEFAULT_ISSUE_PAGE).await.unwrap(), 1);
        assert!(!dir.path().join("TST.json").exists());

        let project: Project = load_json(&out, "FLINK.json").await.unwrap();
        let issue = &project.issues[0];
        assert!(issue.prlinks.contains("https://github.com/apache/flink/pull/12"));
        assert!(issue.commitlinks.contains("github.com/apache/flink/commit/abc123"));
        assert!(issue.commits.is_none());

        // Already crawled.
        assert_eq!(crawl_projects(&tracker, &out, &[], DEFAULT_ISSUE_PAGE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expand_adds_only_missing_issues() {
        let mock = Arc::new(MockTransport::new());
        search(
            &mock,
            "FLINK",
            vec![
                raw_issue("FLINK", 1, ""),
                raw_issue("FLINK", 2, "github.com/apache/flink/pull/3"),
            ],
        );
        let tracker = TrackerClient::new(mock, JIRA, None);
        let mut project = crate::catalog::tests::project("FLINK", &[]);
        project.issues = vec![Issue::new(format!("{JIRA}/issue/FLINK1"), "1", "FLINK-1")];

        let added = expand_project(&tracker, &mut project, DEFAULT_ISSUE_PAGE).await.unwrap();

        assert_eq!(added, 1);
        assert_eq!(project.issues.len(), 2);
        assert_eq!(project.issues[1].key, "FLINK-2");
        assert_eq!(project.issues[1].prlinks.len(), 1);
    }

    #[tokio::test]
    async fn pulls_carry_title_keys_and_are_not_regathered() {
        let mock = Arc::new(MockTransport::new());
        mock.with_rate_limit(API, 1, 5000, 0);
        mock.respond(
            &format!("{API}/repos/apache/flink"),
            200,
            json!({ "full_name": "apache/flink", "name": "flink", "description": null,
                    "id": 99, "url": format!("{API}/repos/apache/flink") }),
        );
        mock.respond(
            &format!("{API}/repos/apache/flink/pulls?state=all&per_page=100&page=1"),
            200,
            json!([
                { "url": "u1", "number": 1, "title": "[FLINK-7][runtime] Fix FLINK-8" },
                { "url": "u2", "number": 2, "title": "Bump deps" },
            ]),
        );
        let client = Arc::new(
            GitHubClient::connect(
                mock.clone(),
                API,
                vec![Credential::new("alice", "t")],
                QuotaPolicy::default(),
            )
            .await
            .unwrap(),
        );
        let dir = tempfile::tempdir().unwrap();
        let out: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path()));

        let repos = vec!["apache/flink".to_string(), "not-a-pair".to_string()];
        assert_eq!(gather_all_pulls(client.clone(), repos.clone(), out.clone(), 3).await, 1);

        let repo: Repository = load_json(out.as_ref(), "flink.json").await.unwrap();
        assert_eq!(
            repo.pulls[0].issue_key,
            Some(vec!["FLINK-7".to_string(), "FLINK-8".to_string()])
        );
        assert_eq!(repo.pulls[1].issue_key, None);

        assert_eq!(gather_all_pulls(client, repos, out, 3).await, 0);
    }
}
