pub mod github;
mod http;
pub mod jira;
pub mod mock;
pub mod quota;
mod traits;

pub use github::{GitHubClient, DEFAULT_API_BASE, PAGE_SIZE};
pub use http::HttpTransport;
pub use jira::{TrackedIssue, TrackerClient, DEFAULT_TRACKER_API};
pub use quota::QuotaPolicy;
pub use traits::{Credential, Request, Response, ServiceError, Transport};
