use serde::{Deserialize, Serialize};

use crate::commit::Commit;
use crate::issue::Issue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub url: String,
    pub number: u64,
    #[serde(default)]
    pub title: Option<String>,
    /// Identifier candidates parsed from the title.
    #[serde(default)]
    pub issue_key: Option<Vec<String>>,
    /// Issues the candidates resolved to. `None` until resolution ran.
    #[serde(default)]
    pub issue: Option<Vec<Issue>>,
    #[serde(default)]
    pub commits: Option<Vec<Commit>>,
}

impl PullRequest {
    pub fn has_issue(&self) -> bool {
        self.issue.as_ref().is_some_and(|issues| !issues.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub id: u64,
    pub url: String,
    #[serde(default, deserialize_with = "crate::nullable::or_default")]
    pub pulls: Vec<PullRequest>,
}
