use serde::{Deserialize, Serialize};

use crate::issue::Issue;
use crate::links::api_repo_name;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "self")]
    pub self_url: String,
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    /// API URL of the project's official repository, when known.
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default, deserialize_with = "crate::nullable::or_default")]
    pub issues: Vec<Issue>,
    #[serde(default, deserialize_with = "crate::nullable::or_default")]
    pub reponames: Vec<String>,
}

impl Project {
    /// All issues whose key equals `key`. More than one match means the
    /// stored data holds duplicates; callers keep them all.
    pub fn find_issues(&self, key: &str) -> Vec<Issue> {
        self.issues.iter().filter(|i| i.key == key).cloned().collect()
    }

    pub fn find_issue_by_self(&self, self_url: &str) -> Option<&Issue> {
        self.issues.iter().find(|i| i.self_url == self_url)
    }

    /// `owner/name` of the official repository.
    pub fn repo_name(&self) -> Option<String> {
        self.repo_url.as_deref().and_then(api_repo_name)
    }

    /// Copy of the project metadata without issues.
    pub fn header(&self) -> Self {
        Self {
            issues: Vec::new(),
            ..self.clone()
        }
    }

    pub fn has_no_links(&self) -> bool {
        self.issues.iter().all(|i| !i.has_links())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project {
            self_url: "https://tracker/rest/api/2/project/1".into(),
            id: "1".into(),
            key: "FLINK".into(),
            name: "Flink".into(),
            url: None,
            repo_url: Some("https://api.github.com/repos/apache/flink".into()),
            issues: vec![
                Issue::new("u1", "1", "FLINK-1"),
                Issue::new("u2", "2", "FLINK-2"),
                Issue::new("u3", "3", "FLINK-2"),
            ],
            reponames: vec![],
        }
    }

    #[test]
    fn find_issues_keeps_duplicates() {
        let project = project();
        assert_eq!(project.find_issues("FLINK-2").len(), 2);
        assert!(project.find_issues("FLINK-9").is_empty());
        assert_eq!(project.find_issue_by_self("u1").map(|i| i.key.as_str()), Some("FLINK-1"));
    }

    #[test]
    fn repo_name_comes_from_api_url() {
        assert_eq!(project().repo_name().as_deref(), Some("apache/flink"));
    }

    #[test]
    fn header_drops_issues() {
        let header = project().header();
        assert!(header.issues.is_empty());
        assert_eq!(header.key, "FLINK");
        assert!(project().has_no_links());
    }
}
