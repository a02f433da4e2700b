//! Issue key resolution.
//!
//! Pull request titles carry free-form keys like `APEX-42` or `FLNK-7`.
//! A key is split into its project token and number, screened against an
//! ignore list, corrected through a curated rename table and, failing an
//! exact catalog match, by string similarity against every known project.
//! The corrected key is then looked up in the project's issues.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::info;
use tracklink_core::{Issue, IssueKey};

use crate::catalog::{Catalog, CatalogError};

/// Tokens that look like issue keys but never are (`UTF-8`, `JDK-11`, ...).
const IGNORED: &[&str] = &[
    "UTF", "CVE", "JDK", "RFC", "AIP", "BACKPORT", "BP", "BZ", "PEP", "SHA", "AR", "GMT",
];

/// Known misspellings and retired names. `FLNK` is left to similarity
/// matching.
const OVERRIDES: &[(&str, &str)] = &[
    ("APEX", "APEXCORE"),
    ("AMABRI", "AMBARI"),
    ("GUACAOMLE", "GUACAMOLE"),
    ("GUACMAOLE", "GUACAMOLE"),
    ("GUACOMOLE", "GUACAMOLE"),
    ("GUAC", "GUACAMOLE"),
    ("TRAFDOION", "TRAFODION"),
    ("TRAFIDION", "TRAFODION"),
    ("TRAFOFION", "TRAFODION"),
    ("FODION:", "TRAFODION"),
    ("YUNIKONR", "YUNIKORN"),
    ("YINIKORN", "YUNIKORN"),
    ("THIRFT", "THRIFT"),
    ("TINEKRPOP", "TINKERPOP"),
    ("TEHPRA", "TEPHRA"),
    ("CACLITE", "CALCITE"),
    ("FINEARCT", "FINERACT"),
    ("FINERCAT", "FINERACT"),
    ("FILNK", "FLINK"),
    ("FINK", "FLINK"),
    ("FLIN", "FLINK"),
    ("FLI", "FLINK"),
    ("INK", "FLINK"),
    ("IGNTIE", "IGNITE"),
    ("INGITE", "IGNITE"),
    ("IGNITW", "IGNITE"),
    ("FACLON", "FALCON"),
    ("ARAI", "ARIA"),
    ("ATLS", "ATLAS"),
    ("HUID", "HUDI"),
    ("MIME", "MIME4J"),
    ("MLHR", "APEXMALHAR"),
    ("PLSR", "PULSAR"),
    ("HBAE", "HABSE"),
    ("STROM", "STORM"),
    ("COUCH", "COUCHDB"),
    ("COBBLIN", "GOBBLIN"),
    ("SUBMAEINE", "SUBMARINE"),
    ("SUBAMRINE", "SUBMARINE"),
    ("AIFRLOW", "AIRFLOW"),
    ("AIRLFOW", "AIRFLOW"),
    ("GOEDO", "GEODE"),
    ("GOEDE", "GEODE"),
    ("GEOE", "GEODE"),
    ("GEDOE", "GEODE"),
    ("KAFA", "KAFKA"),
    ("KAFAK", "KAFKA"),
    ("KAKFA", "KAFKA"),
    ("KFKA", "KAFKA"),
    ("KYILN", "KYLIN"),
    ("IOTFB", "IOTDB"),
    ("SIGNA", "SINGA"),
    ("VY", "LIVY"),
    ("NIIFI", "NIFI"),
    ("NUTH", "NUTCH"),
    ("SYSTEML", "SYSTEMML"),
    ("NLP", "OPENNLP"),
    ("JAME", "JAMES"),
    ("PARUQET", "PARQUET"),
    ("PARQURT", "PARQUET"),
    ("INLONF", "INLONG"),
];

pub const DEFAULT_THRESHOLD: f64 = 0.9;

/// Scores how alike two project tokens are, in `0.0..=1.0`.
pub trait Similarity: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinkler;

impl Similarity for JaroWinkler {
    fn score(&self, a: &str, b: &str) -> f64 {
        strsim::jaro_winkler(a, b)
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub ignore: BTreeSet<String>,
    pub overrides: BTreeMap<String, String>,
    pub threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ignore: IGNORED.iter().map(|t| t.to_string()).collect(),
            overrides: OVERRIDES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl ResolverConfig {
    /// Replace the rename table.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.overrides = overrides
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found {
        /// Canonical `PROJECT-number` key.
        key: String,
        /// Every issue in the project carrying `key`.
        issues: Vec<Issue>,
        /// Project token as written, when it had to be corrected.
        renamed_from: Option<String>,
    },
    Ignored,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed key {0:?}")]
    Malformed(String),

    #[error("project {0} not found")]
    ProjectNotFound(String),

    #[error("issue {0} not found in the project")]
    IssueNotFound(String),

    #[error("loading project {key}: {message}")]
    Load { key: String, message: String },
}

pub struct Resolver {
    config: ResolverConfig,
    similarity: Box<dyn Similarity>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            similarity: Box::new(JaroWinkler),
        }
    }

    pub fn with_similarity(mut self, similarity: impl Similarity + 'static) -> Self {
        self.similarity = Box::new(similarity);
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Canonical project token for `token`, or `None` when the token is on
    /// the ignore list.
    pub fn canonical_project(&self, token: &str, known: &[String]) -> Option<String> {
        if self.config.ignore.contains(token) {
            return None;
        }
        let token = self
            .config
            .overrides
            .get(token)
            .map(String::as_str)
            .unwrap_or(token);
        if known.iter().any(|k| k == token) {
            return Some(token.to_string());
        }
        Some(self.closest(token, known).unwrap_or(token).to_string())
    }

    /// Best-scoring known key at or above the threshold. Ties keep the
    /// earlier key.
    fn closest<'a>(&self, token: &str, known: &'a [String]) -> Option<&'a str> {
        let mut best: Option<(&'a str, f64)> = None;
        for key in known {
            let score = self.similarity.score(token, key);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((key.as_str(), score));
            }
        }
        best.filter(|(_, score)| *score >= self.config.threshold)
            .map(|(key, _)| key)
    }

    pub async fn resolve(
        &self,
        raw: &str,
        catalog: &Catalog,
    ) -> Result<Resolution, ResolveError> {
        let parsed =
            IssueKey::parse(raw).map_err(|_| ResolveError::Malformed(raw.to_string()))?;
        let Some(project_key) = self.canonical_project(&parsed.project, catalog.keys()) else {
            return Ok(Resolution::Ignored);
        };

        let project = catalog.project(&project_key).await.map_err(|e| match e {
            CatalogError::NotFound(key) => ResolveError::ProjectNotFound(key),
            CatalogError::Load { key, message } => ResolveError::Load { key, message },
        })?;

        let key = parsed.with_project(&project_key).to_string();
        let issues = project.find_issues(&key);
        if issues.is_empty() {
            return Err(ResolveError::IssueNotFound(key));
        }

        let renamed_from = (project_key != parsed.project).then(|| {
            info!("{} key replaced with {project_key}", parsed.project);
            parsed.project.clone()
        });
        Ok(Resolution::Found {
            key,
            issues,
            renamed_from,
        })
    }
}
