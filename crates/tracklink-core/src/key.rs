use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, TracklinkError};

static TITLE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]+-[0-9]+").expect("valid title key pattern"));

/// A tracker issue identifier such as `FLINK-7`, split into project token
/// and sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueKey {
    pub project: String,
    pub number: u64,
}

impl IssueKey {
    pub fn new(project: impl Into<String>, number: u64) -> Self {
        Self {
            project: project.into(),
            number,
        }
    }

    /// Parse `PROJECT-NUMBER`, splitting on the last hyphen so that
    /// hyphenated project tokens keep their full prefix.
    pub fn parse(raw: &str) -> Result<Self> {
        let (project, number) = raw
            .rsplit_once('-')
            .ok_or_else(|| TracklinkError::MalformedKey(raw.to_string()))?;
        if project.is_empty() {
            return Err(TracklinkError::MalformedKey(raw.to_string()));
        }
        let number = number
            .parse::<u64>()
            .map_err(|_| TracklinkError::MalformedKey(raw.to_string()))?;
        Ok(Self::new(project, number))
    }

    /// Same sequence number under another project token.
    pub fn with_project(&self, project: &str) -> Self {
        Self::new(project, self.number)
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.project, self.number)
    }
}

/// Every identifier-looking token in a pull request title, in order of
/// appearance. `None` when the title carries none.
pub fn title_keys(title: &str) -> Option<Vec<String>> {
    let keys: Vec<String> = TITLE_KEY_RE
        .find_iter(title)
        .map(|m| m.as_str().to_string())
        .collect();
    if keys.is_empty() {
        None
    } else {
        Some(keys)
    }
}
