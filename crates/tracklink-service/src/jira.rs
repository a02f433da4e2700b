use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use tracklink_core::{Issue, IssueStatus, IssueType, Project};

use crate::{Credential, Request, ServiceError, Transport};

pub const DEFAULT_TRACKER_API: &str = "https://issues.apache.org/jira/rest/api/2";

const ISSUE_FIELDS: &str =
    "description,comment,status,issuetype,created,updated,resolutiondate,worklog";

/// Comment pages are fetched in steps of this size until one comes back empty.
const COMMENT_PAGE: usize = 50;

/// An issue as listed by the tracker, together with its raw document.
#[derive(Debug, Clone)]
pub struct TrackedIssue {
    pub issue: Issue,
    pub raw: Value,
}

/// Client for the issue tracker's search, worklog and comment resources.
pub struct TrackerClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    auth: Option<Credential>,
}

impl TrackerClient {
    pub fn new(transport: Arc<dyn Transport>, base_url: &str, auth: Option<Credential>) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: Request,
    ) -> Result<T, ServiceError> {
        let url = request.url.clone();
        self.transport
            .get(&request.auth(self.auth.clone()))
            .await?
            .into_json(&url)
    }

    fn search(&self, project: &str, start_at: u64, max_results: u64) -> Request {
        Request::get(format!("{}/search", self.base_url))
            .query("jql", format!("project=\"{project}\""))
            .query("maxResults", max_results)
            .query("startAt", start_at)
    }

    /// Number of issues in a project. A missing project is a status error.
    pub async fn issue_total(&self, project: &str) -> Result<u64, ServiceError> {
        let page: SearchPage = self.get_json(self.search(project, 0, 0)).await?;
        Ok(page.total)
    }

    /// Every issue of a project, paged `page_size` at a time.
    pub async fn issues(
        &self,
        project: &str,
        page_size: u64,
    ) -> Result<Vec<TrackedIssue>, ServiceError> {
        let total = self.issue_total(project).await?;
        info!("downloading issues of {project}: total {total}, page size {page_size}");

        let mut issues = Vec::new();
        let mut start_at = 0;
        while start_at < total {
            info!(
                "downloading issues of {project} from {start_at}, {:.2}% done",
                100.0 * start_at as f64 / total as f64
            );
            let request = self
                .search(project, start_at, page_size)
                .query("fields", ISSUE_FIELDS);
            let page: SearchPage = self.get_json(request).await?;
            if page.issues.is_empty() {
                break;
            }
            for raw in page.issues {
                match issue_from_value(&raw) {
                    Ok(issue) => issues.push(TrackedIssue { issue, raw }),
                    Err(e) => warn!("skipping unreadable issue in {project}: {e}"),
                }
            }
            start_at += page_size;
        }
        info!("downloaded all issues of {project}");
        Ok(issues)
    }

    /// Full worklog text, fetched only when the embedded worklog was cut short.
    pub async fn worklog_text(&self, tracked: &TrackedIssue) -> Result<String, ServiceError> {
        if !truncated(&tracked.raw["fields"]["worklog"]) {
            return Ok(String::new());
        }
        let url = format!("{}/worklog", tracked.issue.self_url);
        let value: Value = self.get_json(Request::get(url)).await?;
        Ok(value.to_string())
    }

    /// Full comment text, fetched only when the embedded comments were cut
    /// short.
    pub async fn comments_text(&self, tracked: &TrackedIssue) -> Result<String, ServiceError> {
        if !truncated(&tracked.raw["fields"]["comment"]) {
            return Ok(String::new());
        }
        let url = format!("{}/comment", tracked.issue.self_url);
        let mut pages = Vec::new();
        let mut start_at = 0;
        loop {
            let value: Value = self
                .get_json(Request::get(&url).query("startAt", start_at))
                .await?;
            let done = value["comments"].as_array().map_or(true, |c| c.is_empty());
            pages.push(value.to_string());
            if done {
                break;
            }
            start_at += COMMENT_PAGE;
        }
        Ok(pages.join(" "))
    }

    /// Every project the tracker knows about, without issues.
    pub async fn projects(&self) -> Result<Vec<Project>, ServiceError> {
        let projects: Vec<ProjectResponse> = self
            .get_json(Request::get(format!("{}/project", self.base_url)))
            .await?;
        Ok(projects.into_iter().map(ProjectResponse::into_project).collect())
    }
}

fn truncated(section: &Value) -> bool {
    match (section["maxResults"].as_u64(), section["total"].as_u64()) {
        (Some(max), Some(total)) => max < total,
        _ => false,
    }
}

// -- API response shapes --

#[derive(Deserialize)]
struct SearchPage {
    total: u64,
    #[serde(default)]
    issues: Vec<Value>,
}

#[derive(Deserialize)]
struct IssueResponse {
    #[serde(rename = "self")]
    self_url: String,
    id: String,
    key: String,
    #[serde(default)]
    fields: IssueFields,
}

#[derive(Default, Deserialize)]
struct IssueFields {
    #[serde(default)]
    issuetype: Option<NamedRef>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<NamedRef>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    resolutiondate: Option<String>,
}

#[derive(Deserialize)]
struct NamedRef {
    #[serde(rename = "self")]
    self_url: String,
    name: String,
}

fn issue_from_value(raw: &Value) -> Result<Issue, ServiceError> {
    let resp = IssueResponse::deserialize(raw).map_err(|e| ServiceError::Decode(e.to_string()))?;
    let mut issue = Issue::new(resp.self_url, resp.id, resp.key);
    let fields = resp.fields;
    issue.issuetype = fields.issuetype.map(|t| IssueType {
        self_url: t.self_url,
        name: t.name,
    });
    issue.status = fields.status.map(|s| IssueStatus {
        self_url: s.self_url,
        name: s.name,
    });
    issue.description = fields.description;
    issue.created = fields.created;
    issue.updated = fields.updated;
    issue.resolved = fields.resolutiondate;
    Ok(issue)
}

#[derive(Deserialize)]
struct ProjectResponse {
    #[serde(rename = "self")]
    self_url: String,
    id: String,
    key: String,
    name: String,
    #[serde(default)]
    url: Option<String>,
}

impl ProjectResponse {
    fn into_project(self) -> Project {
        Project {
            self_url: self.self_url,
            id: self.id,
            key: self.key,
            name: self.name,
            url: self.url,
            repo_url: None,
            issues: Vec::new(),
            reponames: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mock::MockTransport;

    const BASE: &str = "http://jira.test/rest/api/2";

    fn search_url(start_at: u64, max: u64, with_fields: bool) -> String {
        let mut url =
            format!("{BASE}/search?jql=project=\"FLINK\"&maxResults={max}&startAt={start_at}");
        if with_fields {
            url.push_str(&format!("&fields={ISSUE_FIELDS}"));
        }
        url
    }

    fn raw_issue(n: u64, comment: Value) -> Value {
        json!({
            "self": format!("{BASE}/issue/{n}"),
            "id": n.to_string(),
            "key": format!("FLINK-{n}"),
            "fields": {
                "issuetype": { "self": "t", "name": "Bug" },
                "status": { "self": "s", "name": "Resolved" },
                "description": "see https://github.com/apache/flink/pull/1",
                "created": "2022-01-01T00:00:00.000+0000",
                "resolutiondate": null,
                "comment": comment,
                "worklog": { "maxResults": 20, "total": 0, "worklogs": [] },
            }
        })
    }

    #[tokio::test]
    async fn issues_page_until_total() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(&search_url(0, 0, false), 200, json!({ "total": 3, "issues": [] }));
        mock.respond(
            &search_url(0, 2, true),
            200,
            json!({ "total": 3, "issues": [raw_issue(1, json!({})), raw_issue(2, json!({}))] }),
        );
        mock.respond(
            &search_url(2, 2, true),
            200,
            json!({ "total": 3, "issues": [raw_issue(3, json!({}))] }),
        );
        let client = TrackerClient::new(mock.clone(), BASE, None);

        let issues = client.issues("FLINK", 2).await.unwrap();

        assert_eq!(issues.len(), 3);
        let first = &issues[0].issue;
        assert_eq!(first.key, "FLINK-1");
        assert_eq!(first.status.as_ref().map(|s| s.name.as_str()), Some("Resolved"));
        assert_eq!(first.issuetype.as_ref().map(|t| t.name.as_str()), Some("Bug"));
        assert!(first.resolved.is_none());
        assert!(first.commits.is_none());
    }

    #[tokio::test]
    async fn missing_project_is_an_error() {
        let mock = Arc::new(MockTransport::new());
        let client = TrackerClient::new(mock, BASE, None);
        let err = client.issues("FLINK", 100).await.unwrap_err();
        assert!(matches!(err, ServiceError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn comments_are_paged_only_when_truncated() {
        let mock = Arc::new(MockTransport::new());
        let client = TrackerClient::new(mock.clone(), BASE, None);

        let complete = TrackedIssue {
            issue: Issue::new(format!("{BASE}/issue/1"), "1", "FLINK-1"),
            raw: raw_issue(1, json!({ "maxResults": 5, "total": 2, "comments": [] })),
        };
        assert_eq!(client.comments_text(&complete).await.unwrap(), "");
        assert_eq!(mock.call_count(), 0);

        let truncated = TrackedIssue {
            issue: Issue::new(format!("{BASE}/issue/2"), "2", "FLINK-2"),
            raw: raw_issue(2, json!({ "maxResults": 1, "total": 2, "comments": [] })),
        };
        mock.respond(
            &format!("{BASE}/issue/2/comment?startAt=0"),
            200,
            json!({ "comments": [{ "body": "https://github.com/apache/flink/commit/abc" }] }),
        );
        mock.respond(
            &format!("{BASE}/issue/2/comment?startAt=50"),
            200,
            json!({ "comments": [] }),
        );

        let text = client.comments_text(&truncated).await.unwrap();
        assert!(text.contains("github.com/apache/flink/commit/abc"));
        assert_eq!(mock.calls_to(&format!("{BASE}/issue/2/comment")), 2);
    }

    #[tokio::test]
    async fn worklog_fetched_when_truncated() {
        let mock = Arc::new(MockTransport::new());
        let client = TrackerClient::new(mock.clone(), BASE, None);
        let mut raw = raw_issue(4, json!({}));
        raw["fields"]["worklog"] = json!({ "maxResults": 20, "total": 21 });
        let tracked = TrackedIssue {
            issue: Issue::new(format!("{BASE}/issue/4"), "4", "FLINK-4"),
            raw,
        };
        mock.respond(
            &format!("{BASE}/issue/4/worklog"),
            200,
            json!({ "worklogs": [{ "comment": "github.com/apache/flink/pull/9" }] }),
        );

        let text = client.worklog_text(&tracked).await.unwrap();
        assert!(text.contains("github.com/apache/flink/pull/9"));
    }

    #[tokio::test]
    async fn projects_are_listed_without_issues() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            &format!("{BASE}/project"),
            200,
            json!([{ "self": "p", "id": "10", "key": "FLINK", "name": "Flink" }]),
        );
        let client = TrackerClient::new(mock, BASE, None);

        let projects = client.projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].key, "FLINK");
        assert!(projects[0].issues.is_empty());
    }
}
