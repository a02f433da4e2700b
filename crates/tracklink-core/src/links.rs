//! Extraction of code-host pull request and commit links from free text.
//!
//! The extractor is a pure function of its input: feeding the same text
//! twice, or several texts in any order, into the same [`ExtractedLinks`]
//! produces the same sets.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{Result, TracklinkError};

// Repository paths may carry letters, digits, `-`, `_` and a bounded set of
// URL punctuation. The host token is mandatory, the scheme optional.
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://)?github\.com/(?P<repo>[-a-zA-Z0-9()@_+.~?&/=]*)/(?:pull/(?P<number>[0-9]*)|commit/(?P<sha>[a-zA-Z0-9]*))")
        .expect("valid link pattern")
});
static API_REPO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?api\.github\.com/repos/(?P<repo>[-a-zA-Z0-9()@:%_+.~?&/=]*)")
        .expect("valid link pattern")
});
static RAW_REPO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://)?github\.com/(?P<repo>[-a-zA-Z0-9()@:%_+.~?&/=]*)/raw")
        .expect("valid link pattern")
});

/// Pull request and commit links found in one or more texts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedLinks {
    pub prlinks: BTreeSet<String>,
    pub commitlinks: BTreeSet<String>,
}

impl ExtractedLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `text` and add every match to the matching set.
    pub fn scan(&mut self, text: &str) {
        for caps in LINK_RE.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if caps.name("sha").is_some() {
                self.commitlinks.insert(whole.as_str().to_string());
            } else {
                self.prlinks.insert(whole.as_str().to_string());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prlinks.is_empty() && self.commitlinks.is_empty()
    }
}

/// Extract all links from a single text.
pub fn extract_links(text: &str) -> ExtractedLinks {
    let mut links = ExtractedLinks::new();
    links.scan(text);
    links
}

/// A single stored link, parsed back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRef {
    PullRequest { repo: String, number: u64 },
    Commit { repo: String, sha: String },
}

impl LinkRef {
    pub fn parse(link: &str) -> Result<Self> {
        let caps = LINK_RE
            .captures(link)
            .ok_or_else(|| TracklinkError::MalformedLink(link.to_string()))?;
        let repo = capture(&caps, "repo")
            .filter(|r| !r.is_empty())
            .ok_or_else(|| TracklinkError::MalformedLink(link.to_string()))?;

        if let Some(sha) = capture(&caps, "sha") {
            if sha.is_empty() {
                return Err(TracklinkError::MalformedLink(link.to_string()));
            }
            return Ok(LinkRef::Commit {
                repo: repo.to_string(),
                sha: sha.to_string(),
            });
        }

        let number = capture(&caps, "number")
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| TracklinkError::MalformedLink(link.to_string()))?;
        Ok(LinkRef::PullRequest {
            repo: repo.to_string(),
            number,
        })
    }

    /// The repository path embedded in the link, as written.
    pub fn repo(&self) -> &str {
        match self {
            LinkRef::PullRequest { repo, .. } | LinkRef::Commit { repo, .. } => repo,
        }
    }

    /// `owner/name`, the first two segments of the repository path.
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        let mut parts = self.repo().split('/');
        let owner = parts.next().filter(|s| !s.is_empty())?;
        let name = parts.next().filter(|s| !s.is_empty())?;
        Some((owner, name))
    }
}

fn capture<'t>(caps: &Captures<'t>, name: &str) -> Option<&'t str> {
    caps.name(name).map(|m| m.as_str())
}

/// Repository path of an API repository URL
/// (`https://api.github.com/repos/owner/name`).
pub fn api_repo_name(url: &str) -> Option<String> {
    API_REPO_RE
        .captures(url)
        .and_then(|caps| capture(&caps, "repo").map(|s| s.trim_end_matches('/').to_string()))
        .filter(|s| !s.is_empty())
}

/// Repository path of a raw-content URL
/// (`https://github.com/owner/name/raw/<sha>/<path>`).
pub fn raw_repo_name(url: &str) -> Option<String> {
    RAW_REPO_RE
        .captures(url)
        .and_then(|caps| capture(&caps, "repo").map(str::to_string))
        .filter(|s| !s.is_empty())
}
