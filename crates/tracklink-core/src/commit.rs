use serde::{Deserialize, Serialize};

/// A file touched by a commit, as reported by the code host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub sha: String,
    pub filename: String,
    pub status: String,
    pub contents_url: String,
    #[serde(default)]
    pub raw_url: Option<String>,
}

impl File {
    /// File extension including the leading dot, e.g. `.java`.
    pub fn suffix(&self) -> Option<&str> {
        let name = self.filename.rsplit('/').next().unwrap_or(&self.filename);
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx..]),
        }
    }

    /// Flat file name used when materializing the payload on disk.
    pub fn flat_name(&self) -> String {
        self.filename.replace('/', "_")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    #[serde(default, deserialize_with = "crate::nullable::or_default")]
    pub files: Vec<File>,
    /// Pull request the commit was fetched through.
    #[serde(default)]
    pub pullrequest: Option<u64>,
    /// Local directory holding the downloaded file payloads.
    #[serde(default)]
    pub path: Option<String>,
}

impl Commit {
    pub fn new(sha: impl Into<String>, message: impl Into<String>, files: Vec<File>) -> Self {
        Self {
            sha: sha.into(),
            message: message.into(),
            files,
            pullrequest: None,
            path: None,
        }
    }

    /// A copy of this commit owned by the given pull request.
    pub fn owned_by(&self, pullrequest: u64) -> Self {
        Self {
            pullrequest: Some(pullrequest),
            ..self.clone()
        }
    }
}
