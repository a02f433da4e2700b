use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracklink_service::{Credential, QuotaPolicy, DEFAULT_API_BASE, DEFAULT_TRACKER_API};

use crate::resolver::{ResolverConfig, DEFAULT_THRESHOLD};

#[derive(Debug, Parser)]
#[command(
    name = "tracklink",
    about = "Link issue tracker entries with code host pull requests and commits"
)]
pub struct Cli {
    /// Directory for the error log
    #[arg(long, env = "TRACKLINK_LOG_DIR", default_value = "log", global = true)]
    pub log_dir: PathBuf,

    /// Code host API base URL
    #[arg(long, env = "TRACKLINK_GITHUB_API", default_value = DEFAULT_API_BASE, global = true)]
    pub github_api: String,

    /// Issue tracker REST API base URL
    #[arg(long, env = "TRACKLINK_TRACKER_API", default_value = DEFAULT_TRACKER_API, global = true)]
    pub tracker_api: String,

    /// Code host credentials as comma-separated `user:token` pairs
    #[arg(long, env = "TRACKLINK_GITHUB_CREDENTIALS", hide_env_values = true, global = true)]
    pub github_credentials: Option<String>,

    /// Issue tracker credentials as `user:token`
    #[arg(long, env = "TRACKLINK_TRACKER_CREDENTIALS", hide_env_values = true, global = true)]
    pub tracker_credentials: Option<String>,

    /// Requests per credential above which every request re-reads the quota
    #[arg(long, env = "TRACKLINK_SOFT_LIMIT", default_value = "4900", global = true)]
    pub soft_limit: u64,

    /// Requests per credential above which requests wait for the quota reset
    #[arg(long, env = "TRACKLINK_HARD_LIMIT", default_value = "4950", global = true)]
    pub hard_limit: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch pull request commits and their files for connected repositories
    Download {
        /// Directory of repository documents
        repositories_dir: PathBuf,
        /// Root directory for downloaded files
        files_root: PathBuf,
        /// Directory for the updated repository documents
        output_dir: PathBuf,
        /// Include pull requests without a connected issue
        #[arg(long)]
        all_pulls: bool,
        /// File extension to download, dot included (repeatable)
        #[arg(long = "suffix", default_value = ".java")]
        suffixes: Vec<String>,
        #[arg(long, default_value = "10")]
        workers: usize,
    },
    /// Connect pull requests with the issues named in their titles
    Connect {
        /// Directory of repository documents
        repositories_dir: PathBuf,
        /// Directory of project documents
        projects_dir: PathBuf,
        /// Directory for the connected repository documents
        output_dir: PathBuf,
        #[arg(long, default_value = "20")]
        workers: usize,
        /// JSON object mapping misspelt project tokens to project keys;
        /// replaces the built-in table
        #[arg(long)]
        overrides: Option<PathBuf>,
        /// Minimum similarity for correcting an unknown project token
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
    },
    /// Gather the commits behind every issue link of every project
    Commits {
        /// Directory of project documents
        projects_dir: PathBuf,
        /// Directory for projects with commits; also holds checkpoints
        output_dir: PathBuf,
        #[arg(long, default_value = "10")]
        workers: usize,
        /// Checkpoint after this many issues
        #[arg(long, default_value = "1000")]
        save_every: usize,
    },
    /// Collect the repositories linked from each project's issues
    Discover {
        /// Directory of project documents
        projects_dir: PathBuf,
        /// Directory for the project list and repository list
        output_dir: PathBuf,
        /// Only keep repositories of this owner (repeatable)
        #[arg(long = "owner")]
        owners: Vec<String>,
        #[arg(long, default_value = "projects.json")]
        projects_file: String,
        #[arg(long, default_value = "repos.json")]
        repos_file: String,
    },
    /// Keep only links into each project's own repository
    Filter {
        /// Directory of project documents
        projects_dir: PathBuf,
        /// Directory of repository documents used to find each project's repository
        repositories_dir: PathBuf,
        /// Directory for the filtered project documents
        output_dir: PathBuf,
    },
    /// Crawl tracker projects with their issue links
    Issues {
        /// Directory for project documents
        output_dir: PathBuf,
        /// Project key to crawl (repeatable); all projects when omitted
        #[arg(long = "project")]
        projects: Vec<String>,
        #[arg(long, default_value = "1000")]
        page_size: u64,
    },
    /// Add issues the tracker has gained since the projects were crawled
    Expand {
        /// Directory of project documents
        projects_dir: PathBuf,
        /// Directory for the expanded project documents
        output_dir: PathBuf,
        #[arg(long, default_value = "1000")]
        page_size: u64,
    },
    /// List the pull requests of repositories
    Pulls {
        /// JSON array of `owner/name` repository names
        repos_file: PathBuf,
        /// Directory for repository documents
        output_dir: PathBuf,
        #[arg(long, default_value = "3")]
        workers: usize,
    },
}

impl Cli {
    pub fn quota_policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            soft_limit: self.soft_limit,
            hard_limit: self.hard_limit,
            ..QuotaPolicy::default()
        }
    }

    pub fn github_credentials(&self) -> Result<Vec<Credential>> {
        let raw = self
            .github_credentials
            .as_deref()
            .context("TRACKLINK_GITHUB_CREDENTIALS is not set")?;
        Ok(Credential::parse_list(raw)?)
    }

    pub fn tracker_credential(&self) -> Result<Option<Credential>> {
        self.tracker_credentials
            .as_deref()
            .map(|raw| raw.parse::<Credential>())
            .transpose()
            .context("parsing TRACKLINK_TRACKER_CREDENTIALS")
    }
}

/// Resolver settings, with the rename table read from `overrides` when given.
pub fn resolver_config(overrides: Option<&PathBuf>, threshold: f64) -> Result<ResolverConfig> {
    let config = ResolverConfig::default().with_threshold(threshold);
    let Some(path) = overrides else {
        return Ok(config);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let table: BTreeMap<String, String> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(config.with_overrides(table))
}
