//! Finding the repositories a project's issues point at.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracklink_core::{LinkRef, Project, Repository};
use tracklink_store::{list_documents, load_json, save_json, ObjectStore};

/// Wrapper written as the discovery projects file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectList {
    pub projects: Vec<Project>,
}

/// Record the `owner/name` of every repository linked from `project`'s
/// issues in `project.reponames`, then drop the issues. With
/// `permitted_owners`, repositories of other owners are left out.
pub fn collect_project_repos(
    project: &mut Project,
    permitted_owners: Option<&BTreeSet<String>>,
) -> BTreeSet<String> {
    let mut repos = BTreeSet::new();
    for issue in &project.issues {
        for link in issue.prlinks.iter().chain(&issue.commitlinks) {
            let parsed = match LinkRef::parse(link) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("skipping {link} of {}: {e}", issue.self_url);
                    continue;
                }
            };
            let Some((owner, name)) = parsed.owner_and_name() else {
                continue;
            };
            if permitted_owners.is_some_and(|owners| !owners.contains(owner)) {
                continue;
            }
            repos.insert(format!("{owner}/{name}"));
        }
    }
    project.reponames = repos.iter().cloned().collect();
    project.issues.clear();
    repos
}

/// [`collect_project_repos`] over many projects; returns the union.
pub fn collect_repos(
    projects: &mut [Project],
    permitted_owners: Option<&BTreeSet<String>>,
) -> BTreeSet<String> {
    projects
        .iter_mut()
        .flat_map(|p| collect_project_repos(p, permitted_owners))
        .collect()
}

/// Read every project in `projects`, collect their repositories and write
/// the project list to `projects_key` and the sorted repository names to
/// `repos_key` in `out`.
pub async fn discover_repositories(
    projects: &dyn ObjectStore,
    out: &dyn ObjectStore,
    projects_key: &str,
    repos_key: &str,
    permitted_owners: Option<&BTreeSet<String>>,
) -> Result<BTreeSet<String>> {
    let mut loaded = Vec::new();
    for document in list_documents(projects).await.context("listing projects")? {
        match load_json::<Project>(projects, &document).await {
            Ok(project) => loaded.push(project),
            Err(e) => error!("skipping {document}: {e}"),
        }
    }
    let repos = collect_repos(&mut loaded, permitted_owners);
    info!("{} projects link to {} repositories", loaded.len(), repos.len());

    save_json(out, projects_key, &ProjectList { projects: loaded })
        .await
        .with_context(|| format!("writing {projects_key}"))?;
    save_json(out, repos_key, &repos)
        .await
        .with_context(|| format!("writing {repos_key}"))?;
    Ok(repos)
}

/// Point each project's `repo_url` at the first repository whose full name
/// or description mentions the project key or name, case-insensitively.
/// Returns the keys of projects left without a match.
pub fn assign_repo_urls(projects: &mut [Project], repos: &[Repository]) -> Vec<String> {
    let mut unmatched = Vec::new();
    for project in projects.iter_mut() {
        let key = project.key.to_lowercase();
        let name = project.name.to_lowercase();
        let mentions = |text: &str| {
            let text = text.to_lowercase();
            text.contains(&key) || text.contains(&name)
        };
        let found = repos
            .iter()
            .find(|r| mentions(&r.full_name) || r.description.as_deref().is_some_and(mentions));
        match found {
            Some(repo) => project.repo_url = Some(repo.url.clone()),
            None => unmatched.push(project.key.clone()),
        }
    }
    unmatched
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFilter {
    /// The project has no official repository; nothing was filtered.
    pub no_repo: bool,
    /// At least one link was dropped.
    pub modified: bool,
}

/// Keep only links into the project's official repository.
pub fn filter_links_by_repo(project: &mut Project) -> LinkFilter {
    let Some(repo) = project.repo_name() else {
        return LinkFilter {
            no_repo: true,
            modified: false,
        };
    };
    let mut modified = false;
    for issue in &mut project.issues {
        modified |= issue.retain_links_for_repo(&repo);
    }
    LinkFilter {
        no_repo: false,
        modified,
    }
}

/// Assign repository URLs from the repository documents in `repos`, filter
/// each project's links down to its own repository and write the result
/// to `out`.
pub async fn filter_projects(
    projects: &dyn ObjectStore,
    repos: &dyn ObjectStore,
    out: &dyn ObjectStore,
) -> Result<usize> {
    let mut repositories = Vec::new();
    for document in list_documents(repos).await.context("listing repositories")? {
        match load_json::<Repository>(repos, &document).await {
            Ok(repo) => repositories.push(repo),
            Err(e) => error!("skipping {document}: {e}"),
        }
    }

    let mut modified = 0;
    for document in list_documents(projects).await.context("listing projects")? {
        let mut project: Project = match load_json(projects, &document).await {
            Ok(project) => project,
            Err(e) => {
                error!("skipping {document}: {e}");
                continue;
            }
        };
        if project.repo_url.is_none() {
            for key in assign_repo_urls(std::slice::from_mut(&mut project), &repositories) {
                warn!("no repository found for project {key}");
            }
        }
        let filter = filter_links_by_repo(&mut project);
        if filter.modified {
            modified += 1;
        }
        save_json(out, &document, &project)
            .await
            .with_context(|| format!("writing {document}"))?;
    }
    Ok(modified)
}

#[cfg(test)]
mod tests {
    use tracklink_core::Issue;
    use tracklink_store::LocalStore;

    use super::*;
    use crate::catalog::tests::project;

    fn linked_issue(links: &[&str]) -> Issue {
        let mut issue = Issue::new("https://tracker/issue/1", "1", "FLINK-1");
        for link in links {
            if link.contains("/commit/") {
                issue.commitlinks.insert(link.to_string());
            } else {
                issue.prlinks.insert(link.to_string());
            }
        }
        issue
    }

    fn repo(full_name: &str, description: Option<&str>) -> Repository {
        Repository {
            full_name: full_name.into(),
            name: full_name.rsplit('/').next().unwrap_or(full_name).into(),
            description: description.map(str::to_string),
            id: 1,
            url: format!("https://api.github.com/repos/{full_name}"),
            pulls: vec![],
        }
    }

    #[test]
    fn repos_are_collected_per_owner() {
        let mut flink = project("FLINK", &[]);
        flink.issues = vec![linked_issue(&[
            "https://github.com/apache/flink/pull/1",
            "https://github.com/apache/flink/commit/abc",
            "https://github.com/someone/flink-fork/pull/2",
        ])];
        let mut hive = project("HIVE", &[]);
        hive.issues = vec![linked_issue(&["https://github.com/apache/hive/pull/3"])];
        let mut projects = vec![flink, hive];

        let owners: BTreeSet<String> = ["apache".to_string()].into();
        let all = collect_repos(&mut projects, Some(&owners));

        assert_eq!(all.into_iter().collect::<Vec<_>>(), vec!["apache/flink", "apache/hive"]);
        assert_eq!(projects[0].reponames, vec!["apache/flink"]);
        assert!(projects.iter().all(|p| p.issues.is_empty()));
    }

    #[test]
    fn repo_urls_match_name_or_description() {
        let mut projects = vec![project("FLINK", &[]), project("ZOOKEEPER", &[])];
        projects[1].name = "Apache ZooKeeper".into();
        let repos = vec![
            repo("apache/hive", None),
            repo("apache/coordination", Some("Mirror of Apache ZooKeeper")),
            repo("apache/flink", Some("Stream processing")),
        ];

        let unmatched = assign_repo_urls(&mut projects, &repos);

        assert!(unmatched.is_empty());
        assert_eq!(
            projects[0].repo_url.as_deref(),
            Some("https://api.github.com/repos/apache/flink")
        );
        assert_eq!(
            projects[1].repo_url.as_deref(),
            Some("https://api.github.com/repos/apache/coordination")
        );
    }

    #[test]
    fn links_outside_the_official_repo_are_dropped() {
        let mut flink = project("FLINK", &[]);
        flink.issues = vec![linked_issue(&[
            "https://github.com/apache/flink/pull/1",
            "https://github.com/someone/flink/commit/abc",
        ])];
        assert_eq!(
            filter_links_by_repo(&mut flink.clone()),
            LinkFilter {
                no_repo: true,
                modified: false
            }
        );

        flink.repo_url = Some("https://api.github.com/repos/apache/flink".into());
        let filter = filter_links_by_repo(&mut flink);
        assert!(filter.modified);
        assert!(!filter.no_repo);
        assert_eq!(flink.issues[0].prlinks.len(), 1);
        assert!(flink.issues[0].commitlinks.is_empty());
    }

    #[tokio::test]
    async fn discovery_writes_project_list_and_repo_names() {
        let input_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let input = LocalStore::new(input_dir.path());
        let out = LocalStore::new(out_dir.path());
        let mut flink = project("FLINK", &[]);
        flink.issues = vec![linked_issue(&["https://github.com/apache/flink/pull/1"])];
        save_json(&input, "FLINK.json", &flink).await.unwrap();

        discover_repositories(&input, &out, "projects.json", "repos.json", None)
            .await
            .unwrap();

        let repos: Vec<String> = load_json(&out, "repos.json").await.unwrap();
        assert_eq!(repos, vec!["apache/flink"]);
        let list: ProjectList = load_json(&out, "projects.json").await.unwrap();
        assert_eq!(list.projects[0].reponames, vec!["apache/flink"]);
    }
}
