pub mod commit;
pub mod error;
pub mod issue;
pub mod key;
pub mod links;
mod nullable;
pub mod project;
pub mod rate_limit;
pub mod repository;

pub use commit::{Commit, File};
pub use error::{Result, TracklinkError};
pub use issue::{Issue, IssueStatus, IssueType};
pub use key::{title_keys, IssueKey};
pub use links::{extract_links, ExtractedLinks, LinkRef};
pub use project::Project;
pub use rate_limit::RateLimit;
pub use repository::{PullRequest, Repository};
