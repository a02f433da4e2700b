use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::commit::Commit;
use crate::key::IssueKey;
use crate::links::{ExtractedLinks, LinkRef};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueType {
    #[serde(rename = "self")]
    pub self_url: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStatus {
    #[serde(rename = "self")]
    pub self_url: String,
    pub name: String,
}

/// A tracker issue with the code-host links found in its text and, once
/// gathered, the commits behind them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "self")]
    pub self_url: String,
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub issuetype: Option<IssueType>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<IssueStatus>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub resolved: Option<String>,
    #[serde(default, deserialize_with = "crate::nullable::or_default")]
    pub prlinks: BTreeSet<String>,
    #[serde(default, deserialize_with = "crate::nullable::or_default")]
    pub commitlinks: BTreeSet<String>,
    /// `None` until commits have been gathered for this issue.
    #[serde(default)]
    pub commits: Option<Vec<Commit>>,
}

impl Issue {
    pub fn new(self_url: impl Into<String>, id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            self_url: self_url.into(),
            id: id.into(),
            key: key.into(),
            issuetype: None,
            description: None,
            status: None,
            created: None,
            updated: None,
            resolved: None,
            prlinks: BTreeSet::new(),
            commitlinks: BTreeSet::new(),
            commits: None,
        }
    }

    pub fn issue_key(&self) -> Option<IssueKey> {
        IssueKey::parse(&self.key).ok()
    }

    pub fn has_links(&self) -> bool {
        !self.prlinks.is_empty() || !self.commitlinks.is_empty()
    }

    pub fn set_links(&mut self, links: ExtractedLinks) {
        self.prlinks = links.prlinks;
        self.commitlinks = links.commitlinks;
    }

    /// Whether a previously saved copy of this issue still has to be
    /// gathered: commits were never fetched, or came back empty although
    /// the issue links somewhere.
    pub fn needs_commits(&self) -> bool {
        match &self.commits {
            None => true,
            Some(commits) => commits.is_empty() && self.has_links(),
        }
    }

    /// Drop every link that points outside `repo`. Links that cannot be
    /// parsed are dropped too. Returns whether anything was removed.
    pub fn retain_links_for_repo(&mut self, repo: &str) -> bool {
        let before = self.prlinks.len() + self.commitlinks.len();
        let keep = |link: &String| {
            LinkRef::parse(link)
                .map(|parsed| parsed.repo() == repo)
                .unwrap_or(false)
        };
        self.prlinks.retain(keep);
        self.commitlinks.retain(keep);
        self.prlinks.len() + self.commitlinks.len() < before
    }
}
