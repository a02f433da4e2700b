use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracklink_runner::aggregator::{gather_commits_for_projects, GatherOptions};
use tracklink_runner::catalog::Catalog;
use tracklink_runner::config::{resolver_config, Cli, Command};
use tracklink_runner::download::{download_repositories, DownloadOptions};
use tracklink_runner::resolver::Resolver;
use tracklink_runner::{crawl, discovery, driver, logging};
use tracklink_service::{GitHubClient, HttpTransport, TrackerClient, Transport};
use tracklink_store::{LocalStore, ObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log = logging::init(Some(cli.log_dir.as_path()))?;
    info!("tracklink starting");

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);

    match &cli.command {
        Command::Download {
            repositories_dir,
            files_root,
            output_dir,
            all_pulls,
            suffixes,
            workers,
        } => {
            let client = github(&cli, transport).await?;
            let options = DownloadOptions {
                workers: *workers,
                only_with_issues: !all_pulls,
                suffixes: suffixes.clone(),
            };
            let files: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(files_root));
            download_repositories(
                client.clone(),
                &LocalStore::new(repositories_dir),
                files,
                &LocalStore::new(output_dir),
                &options,
            )
            .await?;
            log_usage(&client);
        }
        Command::Connect {
            repositories_dir,
            projects_dir,
            output_dir,
            workers,
            overrides,
            threshold,
        } => {
            let resolver = Resolver::new(resolver_config(overrides.as_ref(), *threshold)?);
            let projects: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(projects_dir));
            let catalog = Catalog::from_store(projects)
                .await
                .context("reading the project catalog")?;
            info!("catalog holds {} projects", catalog.keys().len());
            let report = driver::connect_repositories(
                Arc::new(LocalStore::new(repositories_dir)),
                Arc::new(LocalStore::new(output_dir)),
                Arc::new(catalog),
                Arc::new(resolver),
                *workers,
            )
            .await?;
            for rename in &report.renames {
                info!(
                    "repo: {}, pull: {}, {} read as {}",
                    rename.repository, rename.pull, rename.from, rename.to
                );
            }
        }
        Command::Commits {
            projects_dir,
            output_dir,
            workers,
            save_every,
        } => {
            let client = github(&cli, transport).await?;
            let options = GatherOptions {
                workers: *workers,
                save_every: *save_every,
            };
            let report = gather_commits_for_projects(
                client.clone(),
                &LocalStore::new(projects_dir),
                &LocalStore::new(output_dir),
                &options,
            )
            .await?;
            info!(
                "commits gathered for {} issues, {} reused, {} failed",
                report.gathered, report.reused, report.failed
            );
            log_usage(&client);
        }
        Command::Discover {
            projects_dir,
            output_dir,
            owners,
            projects_file,
            repos_file,
        } => {
            let owners: BTreeSet<String> = owners.iter().cloned().collect();
            let repos = discovery::discover_repositories(
                &LocalStore::new(projects_dir),
                &LocalStore::new(output_dir),
                projects_file,
                repos_file,
                (!owners.is_empty()).then_some(&owners),
            )
            .await?;
            info!("{} repositories discovered", repos.len());
        }
        Command::Filter {
            projects_dir,
            repositories_dir,
            output_dir,
        } => {
            let modified = discovery::filter_projects(
                &LocalStore::new(projects_dir),
                &LocalStore::new(repositories_dir),
                &LocalStore::new(output_dir),
            )
            .await?;
            info!("{modified} projects had foreign links removed");
        }
        Command::Issues {
            output_dir,
            projects,
            page_size,
        } => {
            let tracker =
                TrackerClient::new(transport, &cli.tracker_api, cli.tracker_credential()?);
            let written =
                crawl::crawl_projects(&tracker, &LocalStore::new(output_dir), projects, *page_size)
                    .await?;
            info!("{written} projects crawled");
        }
        Command::Expand {
            projects_dir,
            output_dir,
            page_size,
        } => {
            let tracker =
                TrackerClient::new(transport, &cli.tracker_api, cli.tracker_credential()?);
            let added = crawl::expand_projects(
                &tracker,
                &LocalStore::new(projects_dir),
                &LocalStore::new(output_dir),
                *page_size,
            )
            .await?;
            info!("{added} issues added");
        }
        Command::Pulls {
            repos_file,
            output_dir,
            workers,
        } => {
            let raw = tokio::fs::read_to_string(repos_file)
                .await
                .with_context(|| format!("reading {}", repos_file.display()))?;
            let repositories: Vec<String> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", repos_file.display()))?;
            let client = github(&cli, transport).await?;
            let written = crawl::gather_all_pulls(
                client.clone(),
                repositories,
                Arc::new(LocalStore::new(output_dir)),
                *workers,
            )
            .await;
            info!("{written} repositories written");
            log_usage(&client);
        }
    }
    Ok(())
}

async fn github(cli: &Cli, transport: Arc<dyn Transport>) -> Result<Arc<GitHubClient>> {
    let client = GitHubClient::connect(
        transport,
        &cli.github_api,
        cli.github_credentials()?,
        cli.quota_policy(),
    )
    .await
    .context("connecting to the code host")?;
    Ok(Arc::new(client))
}

fn log_usage(client: &GitHubClient) {
    for (user, used) in client.usage_snapshot() {
        info!("{user}: {used} requests used");
    }
}
