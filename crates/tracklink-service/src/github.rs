use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde::Deserialize;
use tracing::{error, info, warn};
use tracklink_core::{Commit, File, PullRequest, RateLimit, Repository};

use crate::quota::{CredentialUsage, QuotaPolicy, UsageTable};
use crate::{Credential, Request, Response, ServiceError, Transport};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Page size for every paged listing. A shorter page ends the listing.
pub const PAGE_SIZE: usize = 100;

/// Quota-aware client for the code host's REST API.
///
/// Requests rotate over a credential pool. Fetched commits are cached by
/// sha and pull request commit lists by `(repo, number)` for the lifetime
/// of the client.
pub struct GitHubClient {
    transport: Arc<dyn Transport>,
    api_base: String,
    policy: QuotaPolicy,
    usage: UsageTable,
    commits: Mutex<HashMap<String, Commit>>,
    pull_commits: Mutex<HashMap<(String, u64), Vec<Commit>>>,
}

impl GitHubClient {
    /// Build a client and seed every credential's usage from the quota
    /// endpoint.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        api_base: &str,
        credentials: Vec<Credential>,
        policy: QuotaPolicy,
    ) -> Result<Self, ServiceError> {
        if credentials.is_empty() {
            return Err(ServiceError::NoCredentials);
        }
        let client = Self {
            transport,
            api_base: api_base.trim_end_matches('/').to_string(),
            policy,
            usage: UsageTable::new(credentials),
            commits: Mutex::new(HashMap::new()),
            pull_commits: Mutex::new(HashMap::new()),
        };
        for usage in client.usage.iter() {
            let limit = client.rate_limit(&usage.credential).await?;
            usage.reconcile(limit);
            info!(
                "credential {}: {}/{} requests used, window resets at {}",
                usage.credential.username,
                limit.used,
                limit.limit,
                format_timestamp(limit.reset)
            );
        }
        Ok(client)
    }

    /// Current quota for one credential.
    pub async fn rate_limit(&self, credential: &Credential) -> Result<RateLimit, ServiceError> {
        let url = format!("{}/rate_limit", self.api_base);
        let request = Request::get(&url).auth(Some(credential.clone()));
        let body: RateLimitResponse = self.transport.get(&request).await?.into_json(&url)?;
        Ok(body.resources.core)
    }

    async fn refresh(&self, usage: &CredentialUsage) {
        match self.rate_limit(&usage.credential).await {
            Ok(limit) => usage.reconcile(limit),
            Err(e) => warn!(
                "rate limit refresh for {} failed, keeping local count: {e}",
                usage.credential.username
            ),
        }
    }

    /// Pick a credential for the next request and account for it. Sleeps
    /// when the picked credential is about to exhaust its quota.
    pub async fn select_credential(&self) -> Result<Credential, ServiceError> {
        let usage = self.usage.pick().ok_or(ServiceError::NoCredentials)?;

        if self.policy.needs_refresh(usage.used()) {
            self.refresh(usage).await;
        }
        let used = usage.record();
        if self.policy.over_soft_limit(used) {
            self.refresh(usage).await;
            let snapshot = usage.snapshot();
            let now = chrono::Utc::now().timestamp();
            if let Some(wait) = self.policy.backoff(usage.used(), &snapshot, now) {
                info!(
                    "credential {} is near its quota, waiting until {}",
                    usage.credential.username,
                    format_timestamp(now + wait.as_secs() as i64)
                );
                tokio::time::sleep(wait).await;
            }
        }
        Ok(usage.credential.clone())
    }

    async fn get(&self, request: Request) -> Result<Response, ServiceError> {
        let credential = self.select_credential().await?;
        self.transport.get(&request.auth(Some(credential))).await
    }

    fn cached_commit(&self, sha: &str) -> Option<Commit> {
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sha)
            .cloned()
    }

    /// Fetch one commit. A sha seen before is served from the cache without
    /// a request. A non-success response yields `Ok(None)`.
    pub async fn download_commit(
        &self,
        repo: &str,
        sha: &str,
    ) -> Result<Option<Commit>, ServiceError> {
        if let Some(commit) = self.cached_commit(sha) {
            info!("commit {sha} of {repo} already downloaded");
            return Ok(Some(commit));
        }

        let url = format!("{}/repos/{repo}/commits/{sha}", self.api_base);
        let resp = self.get(Request::get(&url)).await?;
        if !resp.is_success() {
            error!(
                "downloading commit {sha} of {repo} failed with status {}",
                resp.status
            );
            return Ok(None);
        }

        let commit = resp.json::<CommitResponse>()?.into_commit();
        {
            let mut cache = self.commits.lock().unwrap_or_else(PoisonError::into_inner);
            cache.insert(sha.to_string(), commit.clone());
            if commit.sha != sha {
                cache.insert(commit.sha.clone(), commit.clone());
            }
        }
        info!("commit {sha} of {repo} downloaded");
        Ok(Some(commit))
    }

    /// All commits of a pull request, each tagged with `number`.
    ///
    /// Pages of [`PAGE_SIZE`] are fetched until a short page arrives. A
    /// failed page stops paging and returns what was gathered so far; such a
    /// partial list is not cached. Commits that fail to download leave a gap.
    pub async fn commits_for_pull_request(&self, repo: &str, number: u64) -> Vec<Commit> {
        let cache_key = (repo.to_string(), number);
        let cached = self
            .pull_commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key)
            .cloned();
        if let Some(commits) = cached {
            info!("commits of {repo}#{number} already downloaded");
            return commits;
        }

        let url = format!("{}/repos/{repo}/pulls/{number}/commits", self.api_base);
        let mut commits = Vec::new();
        let mut page = 1;
        loop {
            info!("downloading commits of {repo}#{number}, per_page: {PAGE_SIZE}, page: {page}");
            let request = Request::get(&url)
                .query("per_page", PAGE_SIZE)
                .query("page", page);
            let entries: Vec<CommitRef> = match self.get(request).await {
                Ok(resp) if resp.is_success() => match resp.json() {
                    Ok(entries) => entries,
                    Err(e) => {
                        error!("commit page {page} of {repo}#{number} is unreadable: {e}");
                        return commits;
                    }
                },
                Ok(resp) => {
                    error!(
                        "commit page {page} of {repo}#{number} failed with status {}",
                        resp.status
                    );
                    return commits;
                }
                Err(e) => {
                    error!("commit page {page} of {repo}#{number} failed: {e}");
                    return commits;
                }
            };

            let count = entries.len();
            for entry in entries {
                match self.download_commit(repo, &entry.sha).await {
                    Ok(Some(commit)) => commits.push(commit.owned_by(number)),
                    Ok(None) => {}
                    Err(e) => error!("commit {} of {repo}#{number} failed: {e}", entry.sha),
                }
            }
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        self.pull_commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cache_key, commits.clone());
        commits
    }

    /// Repository metadata, without pull requests.
    pub async fn repository(&self, full_name: &str) -> Result<Repository, ServiceError> {
        let url = format!("{}/repos/{full_name}", self.api_base);
        let repo: RepoResponse = self.get(Request::get(&url)).await?.into_json(&url)?;
        Ok(Repository {
            full_name: repo.full_name,
            name: repo.name,
            description: repo.description,
            id: repo.id,
            url: repo.url,
            pulls: Vec::new(),
        })
    }

    /// Every pull request of a repository, open or closed.
    pub async fn pull_requests(&self, full_name: &str) -> Result<Vec<PullRequest>, ServiceError> {
        let url = format!("{}/repos/{full_name}/pulls", self.api_base);
        let mut pulls = Vec::new();
        let mut page = 1;
        loop {
            let request = Request::get(&url)
                .query("state", "all")
                .query("per_page", PAGE_SIZE)
                .query("page", page);
            let entries: Vec<PullResponse> = self.get(request).await?.into_json(&url)?;
            let count = entries.len();
            pulls.extend(entries.into_iter().map(|p| PullRequest {
                url: p.url,
                number: p.number,
                title: p.title,
                issue_key: None,
                issue: None,
                commits: None,
            }));
            if count < PAGE_SIZE {
                return Ok(pulls);
            }
            page += 1;
        }
    }

    /// Raw file content. Raw downloads do not count against the API quota.
    pub async fn fetch_raw(&self, url: &str) -> Result<Bytes, ServiceError> {
        let resp = self.transport.get(&Request::get(url)).await?;
        if !resp.is_success() {
            return Err(ServiceError::Status {
                status: resp.status,
                url: url.to_string(),
            });
        }
        Ok(resp.body)
    }

    /// `(username, requests used)` for every credential.
    pub fn usage_snapshot(&self) -> Vec<(String, u64)> {
        self.usage
            .iter()
            .map(|u| (u.credential.username.clone(), u.used()))
            .collect()
    }

    /// Forget every fetched commit and pull request commit list.
    pub fn clear_caches(&self) {
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.pull_commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

// -- API response shapes --

#[derive(Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Deserialize)]
struct RateLimitResources {
    core: RateLimit,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
    #[serde(default)]
    files: Vec<FileResponse>,
}

#[derive(Deserialize)]
struct CommitDetail {
    message: String,
}

#[derive(Deserialize)]
struct FileResponse {
    #[serde(default)]
    sha: Option<String>,
    filename: String,
    status: String,
    #[serde(default)]
    contents_url: Option<String>,
    #[serde(default)]
    raw_url: Option<String>,
}

impl CommitResponse {
    fn into_commit(self) -> Commit {
        let files = self
            .files
            .into_iter()
            .map(|f| File {
                sha: f.sha.unwrap_or_default(),
                filename: f.filename,
                status: f.status,
                contents_url: f.contents_url.unwrap_or_default(),
                raw_url: f.raw_url,
            })
            .collect();
        Commit::new(self.sha, self.commit.message, files)
    }
}

#[derive(Deserialize)]
struct PullResponse {
    url: String,
    number: u64,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct RepoResponse {
    full_name: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    id: u64,
    url: String,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::*;
    use crate::mock::MockTransport;

    const API: &str = "http://gh.test";

    fn commit_body(sha: &str) -> Value {
        json!({
            "sha": sha,
            "commit": { "message": format!("commit {sha}") },
            "files": [{
                "sha": "f1",
                "filename": "src/Main.java",
                "status": "modified",
                "contents_url": "c",
                "raw_url": format!("https://github.com/apache/flink/raw/{sha}/src/Main.java"),
            }]
        })
    }

    fn page_url(repo: &str, number: u64, page: u64) -> String {
        format!("{API}/repos/{repo}/pulls/{number}/commits?per_page=100&page={page}")
    }

    fn serve_page(mock: &MockTransport, repo: &str, number: u64, page: u64, shas: &[String]) {
        let entries: Vec<Value> = shas.iter().map(|s| json!({ "sha": s })).collect();
        mock.respond(&page_url(repo, number, page), 200, Value::Array(entries));
        for sha in shas {
            mock.respond(&format!("{API}/repos/{repo}/commits/{sha}"), 200, commit_body(sha));
        }
    }

    async fn client(mock: &Arc<MockTransport>) -> GitHubClient {
        mock.with_rate_limit(API, 10, 5000, chrono::Utc::now().timestamp() + 3600);
        GitHubClient::connect(
            mock.clone(),
            API,
            vec![Credential::new("alice", "t1"), Credential::new("bob", "t2")],
            QuotaPolicy::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn connect_seeds_usage_from_quota_endpoint() {
        let mock = Arc::new(MockTransport::new());
        let client = client(&mock).await;
        assert_eq!(mock.calls_to(&format!("{API}/rate_limit")), 2);
        let mut usage = client.usage_snapshot();
        usage.sort();
        assert_eq!(usage, vec![("alice".into(), 10), ("bob".into(), 10)]);
    }

    #[tokio::test]
    async fn connect_requires_credentials() {
        let mock = Arc::new(MockTransport::new());
        let err = GitHubClient::connect(mock, API, vec![], QuotaPolicy::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::NoCredentials));
    }

    #[tokio::test]
    async fn download_commit_hits_the_network_once_per_sha() {
        let mock = Arc::new(MockTransport::new());
        let client = client(&mock).await;
        let url = format!("{API}/repos/apache/flink/commits/abc");
        mock.respond(&url, 200, commit_body("abc"));

        let first = client.download_commit("apache/flink", "abc").await.unwrap();
        let second = client.download_commit("apache/flink", "abc").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.calls_to(&url), 1);
        let commit = first.unwrap();
        assert_eq!(commit.message, "commit abc");
        assert_eq!(commit.files.len(), 1);
        assert_eq!(commit.pullrequest, None);
    }

    #[tokio::test]
    async fn failed_commit_download_is_absent_and_not_cached() {
        let mock = Arc::new(MockTransport::new());
        let client = client(&mock).await;
        let url = format!("{API}/repos/apache/flink/commits/dead");

        assert!(client.download_commit("apache/flink", "dead").await.unwrap().is_none());
        assert!(client.download_commit("apache/flink", "dead").await.unwrap().is_none());
        assert_eq!(mock.calls_to(&url), 2);
    }

    #[tokio::test]
    async fn full_page_then_empty_page_yields_each_commit_once() {
        let mock = Arc::new(MockTransport::new());
        let client = client(&mock).await;
        let shas: Vec<String> = (0..100).map(|i| format!("sha{i}")).collect();
        serve_page(&mock, "apache/flink", 7, 1, &shas);
        serve_page(&mock, "apache/flink", 7, 2, &[]);

        let commits = client.commits_for_pull_request("apache/flink", 7).await;

        assert_eq!(commits.len(), 100);
        assert!(commits.iter().all(|c| c.pullrequest == Some(7)));
        assert_eq!(
            mock.calls_to(&format!("{API}/repos/apache/flink/pulls/7/commits")),
            2
        );
    }

    #[tokio::test]
    async fn short_page_stops_paging_and_list_is_cached() {
        let mock = Arc::new(MockTransport::new());
        let client = client(&mock).await;
        let shas = vec!["a1".to_string(), "b2".to_string(), "c3".to_string()];
        serve_page(&mock, "apache/kafka", 3, 1, &shas);

        let commits = client.commits_for_pull_request("apache/kafka", 3).await;
        assert_eq!(commits.len(), 3);
        let before = mock.call_count();

        let again = client.commits_for_pull_request("apache/kafka", 3).await;
        assert_eq!(again, commits);
        assert_eq!(mock.call_count(), before);
        assert_eq!(mock.calls_to(&page_url("apache/kafka", 3, 2)), 0);
    }

    #[tokio::test]
    async fn failed_page_returns_partial_list_without_caching() {
        let mock = Arc::new(MockTransport::new());
        let client = client(&mock).await;
        let shas: Vec<String> = (0..100).map(|i| format!("p{i}")).collect();
        serve_page(&mock, "apache/hudi", 9, 1, &shas);
        mock.respond(&page_url("apache/hudi", 9, 2), 502, json!({}));

        let commits = client.commits_for_pull_request("apache/hudi", 9).await;
        assert_eq!(commits.len(), 100);

        client.commits_for_pull_request("apache/hudi", 9).await;
        assert_eq!(mock.calls_to(&page_url("apache/hudi", 9, 1)), 2);
    }

    #[tokio::test]
    async fn shared_commit_is_tagged_per_pull_request() {
        let mock = Arc::new(MockTransport::new());
        let client = client(&mock).await;
        let shared = vec!["shared".to_string()];
        serve_page(&mock, "apache/flink", 1, 1, &shared);
        serve_page(&mock, "apache/flink", 2, 1, &shared);

        let first = client.commits_for_pull_request("apache/flink", 1).await;
        let second = client.commits_for_pull_request("apache/flink", 2).await;

        assert_eq!(first[0].pullrequest, Some(1));
        assert_eq!(second[0].pullrequest, Some(2));
        assert_eq!(mock.calls_to(&format!("{API}/repos/apache/flink/commits/shared")), 1);
        let cached = client.download_commit("apache/flink", "shared").await.unwrap();
        assert_eq!(cached.unwrap().pullrequest, None);
    }

    #[tokio::test]
    async fn usage_refreshes_on_boundary() {
        let mock = Arc::new(MockTransport::new());
        mock.with_rate_limit(API, 999, 5000, 0);
        let client = GitHubClient::connect(
            mock.clone(),
            API,
            vec![Credential::new("alice", "t1")],
            QuotaPolicy::default(),
        )
        .await
        .unwrap();

        client.select_credential().await.unwrap();
        assert_eq!(client.usage_snapshot(), vec![("alice".into(), 1000)]);
        client.select_credential().await.unwrap();

        // One seed, one refresh when the counter sat on 1000.
        assert_eq!(mock.calls_to(&format!("{API}/rate_limit")), 2);
        assert_eq!(client.usage_snapshot(), vec![("alice".into(), 1000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn near_quota_credential_waits_for_reset() {
        let mock = Arc::new(MockTransport::new());
        let reset = chrono::Utc::now().timestamp() + 30;
        mock.with_rate_limit(API, 4960, 5000, reset);
        let client = GitHubClient::connect(
            mock.clone(),
            API,
            vec![Credential::new("alice", "t1")],
            QuotaPolicy::default(),
        )
        .await
        .unwrap();

        let start = tokio::time::Instant::now();
        client.select_credential().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn past_reset_does_not_wait() {
        let mock = Arc::new(MockTransport::new());
        mock.with_rate_limit(API, 4960, 5000, chrono::Utc::now().timestamp() - 600);
        let client = GitHubClient::connect(
            mock.clone(),
            API,
            vec![Credential::new("alice", "t1")],
            QuotaPolicy::default(),
        )
        .await
        .unwrap();

        let start = tokio::time::Instant::now();
        client.select_credential().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn pull_requests_page_through_listing() {
        let mock = Arc::new(MockTransport::new());
        let client = client(&mock).await;
        let pulls: Vec<Value> = (1..=100)
            .map(|n| json!({ "url": format!("u{n}"), "number": n, "title": format!("[FLINK-{n}] x") }))
            .collect();
        mock.respond(
            &format!("{API}/repos/apache/flink/pulls?state=all&per_page=100&page=1"),
            200,
            Value::Array(pulls),
        );
        mock.respond(
            &format!("{API}/repos/apache/flink/pulls?state=all&per_page=100&page=2"),
            200,
            json!([{ "url": "u101", "number": 101, "title": null }]),
        );

        let pulls = client.pull_requests("apache/flink").await.unwrap();
        assert_eq!(pulls.len(), 101);
        assert_eq!(pulls[100].title, None);
    }

    #[tokio::test]
    async fn missing_repository_is_a_status_error() {
        let mock = Arc::new(MockTransport::new());
        let client = client(&mock).await;
        let err = client.repository("apache/gone").await.unwrap_err();
        assert!(matches!(err, ServiceError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn clear_caches_forces_refetch() {
        let mock = Arc::new(MockTransport::new());
        let client = client(&mock).await;
        let url = format!("{API}/repos/apache/flink/commits/abc");
        mock.respond(&url, 200, commit_body("abc"));

        client.download_commit("apache/flink", "abc").await.unwrap();
        client.clear_caches();
        client.download_commit("apache/flink", "abc").await.unwrap();
        assert_eq!(mock.calls_to(&url), 2);
    }
}
