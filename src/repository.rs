//! Repository registry.
//!
//! Maps SWE-bench instance IDs to repository-specific configuration:
//! the official test runner, example invocations, test filename
//! patterns, and exploration thresholds. Unknown repositories always
//! get a usable generic fallback; validation warns and never fails.

use serde::{Deserialize, Serialize};

/// How the repository organises its test suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    Django,
    Pytest,
    Tox,
    Custom,
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Django => write!(f, "django"),
            Self::Pytest => write!(f, "pytest"),
            Self::Tox => write!(f, "tox"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Per-repository configuration. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// `org/name` identifier, e.g. `django/django`.
    pub repo: String,
    pub project_type: ProjectType,
    /// Official test-runner command for this repository.
    pub test_runner: String,
    /// Example invocations of the runner against real suites.
    pub examples: Vec<String>,
    /// Filename patterns that identify test files.
    pub test_patterns: Vec<String>,
    /// File reads expected before modification counts as informed.
    pub min_read_calls: u32,
    /// Test executions expected before completion counts as verified.
    pub min_test_calls: u32,
    /// Whether exploration gates should be worded as hard requirements.
    pub strict_exploration: bool,
    /// Extra testing guidance rendered into phase prompts.
    pub guidance: Option<String>,
}

impl RepositoryConfig {
    /// Generic fallback for repositories not in the table.
    pub fn generic(repo: &str) -> Self {
        Self {
            repo: repo.to_string(),
            project_type: ProjectType::Custom,
            test_runner: "auto-detect".to_string(),
            examples: Vec::new(),
            test_patterns: vec![r"test_.*\.py$".to_string(), r".*_test\.py$".to_string()],
            min_read_calls: 5,
            min_test_calls: 2,
            strict_exploration: false,
            guidance: None,
        }
    }
}

/// Extract the `org/name` repository identifier from an instance ID.
///
/// `django__django-12325` becomes `django/django`: split on the first
/// double underscore, rejoin with `/`, drop the numeric suffix after
/// the final hyphen.
pub fn repo_from_instance_id(instance_id: &str) -> Option<String> {
    let (org, rest) = instance_id.split_once("__")?;
    if org.is_empty() || rest.is_empty() {
        return None;
    }
    let name = match rest.rsplit_once('-') {
        Some((base, suffix))
            if !base.is_empty()
                && !suffix.is_empty()
                && suffix.chars().all(|c| c.is_ascii_digit()) =>
        {
            base
        }
        _ => rest,
    };
    Some(format!("{}/{}", org, name))
}

/// Look up the configuration for an instance ID.
///
/// Unknown repositories and unparseable IDs produce the generic
/// fallback with a warning; the caller always receives a usable config.
pub fn get_repository_config(instance_id: &str) -> RepositoryConfig {
    let repo = match repo_from_instance_id(instance_id) {
        Some(repo) => repo,
        None => {
            tracing::warn!(instance_id, "unparseable instance id, using generic config");
            return RepositoryConfig::generic("unknown");
        }
    };
    let config = match known_config(&repo) {
        Some(config) => config,
        None => {
            tracing::warn!(%repo, "unknown repository, using generic config");
            RepositoryConfig::generic(&repo)
        }
    };
    for warning in validate_config(&config) {
        tracing::warn!(%repo, warning = %warning, "repository config validation");
    }
    config
}

/// Check the config for missing fields. Returns warnings, never fails.
pub fn validate_config(config: &RepositoryConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.test_runner.is_empty() {
        warnings.push("test_runner is empty".to_string());
    }
    if config.examples.is_empty() && config.test_runner != "auto-detect" {
        warnings.push("no example invocations configured".to_string());
    }
    if config.test_patterns.is_empty() {
        warnings.push("no test filename patterns configured".to_string());
    }
    warnings
}

const DJANGO_GUIDANCE: &str = "\
This repo uses Django's internal test runner (unittest-based): ./tests/runtests.py.\n\
Prefer running a single test by dotted label (package/module/class/method), e.g.\n\
app.tests.Module.TestCase.test_method. If a FAIL_TO_PASS entry reads\n\
`test_name (module.Class)`, do not grep for test_name; run module.Class.test_name.\n\
If the method-level label fails, fall back to class-level, then module-level.";

fn pytest_config(repo: &str, min_read_calls: u32, examples: Vec<String>) -> RepositoryConfig {
    RepositoryConfig {
        repo: repo.to_string(),
        project_type: ProjectType::Pytest,
        test_runner: "python -m pytest".to_string(),
        examples,
        test_patterns: vec![r"test_.*\.py$".to_string(), r".*_test\.py$".to_string()],
        min_read_calls,
        min_test_calls: 2,
        strict_exploration: false,
        guidance: None,
    }
}

/// Compile-time table of the SWE-bench Verified repositories.
fn known_config(repo: &str) -> Option<RepositoryConfig> {
    let config = match repo {
        "django/django" => RepositoryConfig {
            repo: repo.to_string(),
            project_type: ProjectType::Django,
            test_runner:
                "./tests/runtests.py --verbosity 2 --settings=test_sqlite --parallel 1".to_string(),
            examples: vec![
                "./tests/runtests.py --verbosity 2 --settings=test_sqlite --parallel 1 \
                 urlpatterns.tests"
                    .to_string(),
                "./tests/runtests.py --verbosity 2 --settings=test_sqlite --parallel 1 \
                 auth_tests.test_views.LoginTest.test_login_form"
                    .to_string(),
            ],
            test_patterns: vec![r"tests/.*\.py$".to_string(), r"test_.*\.py$".to_string()],
            min_read_calls: 6,
            min_test_calls: 3,
            strict_exploration: true,
            guidance: Some(DJANGO_GUIDANCE.to_string()),
        },
        "astropy/astropy" => pytest_config(
            repo,
            5,
            vec!["python -m pytest astropy/io/fits/tests/test_header.py -x".to_string()],
        ),
        "scikit-learn/scikit-learn" => pytest_config(
            repo,
            5,
            vec!["python -m pytest sklearn/linear_model/tests/test_ridge.py".to_string()],
        ),
        "matplotlib/matplotlib" => pytest_config(
            repo,
            5,
            vec!["python -m pytest lib/matplotlib/tests/test_axes.py -k test_label".to_string()],
        ),
        "sympy/sympy" => RepositoryConfig {
            repo: repo.to_string(),
            project_type: ProjectType::Custom,
            test_runner: "python -m pytest".to_string(),
            examples: vec![
                "python -m pytest sympy/core/tests/test_basic.py".to_string(),
                "bin/test sympy/core/tests/test_basic.py".to_string(),
            ],
            test_patterns: vec![r"test_.*\.py$".to_string()],
            min_read_calls: 5,
            min_test_calls: 2,
            strict_exploration: false,
            guidance: Some(
                "sympy ships its own bin/test wrapper; plain pytest also works for most suites."
                    .to_string(),
            ),
        },
        "pytest-dev/pytest" => pytest_config(
            repo,
            5,
            vec!["python -m pytest testing/test_assertion.py".to_string()],
        ),
        "sphinx-doc/sphinx" => RepositoryConfig {
            repo: repo.to_string(),
            project_type: ProjectType::Tox,
            test_runner: "python -m pytest".to_string(),
            examples: vec![
                "python -m pytest tests/test_build_html.py".to_string(),
                "tox -e py -- tests/test_build_html.py".to_string(),
            ],
            test_patterns: vec![r"tests/test_.*\.py$".to_string()],
            min_read_calls: 5,
            min_test_calls: 2,
            strict_exploration: false,
            guidance: None,
        },
        "pylint-dev/pylint" => pytest_config(
            repo,
            5,
            vec!["python -m pytest tests/test_self.py".to_string()],
        ),
        "psf/requests" => pytest_config(
            repo,
            4,
            vec!["python -m pytest tests/test_requests.py".to_string()],
        ),
        "mwaskom/seaborn" => pytest_config(
            repo,
            4,
            vec!["python -m pytest tests/test_relational.py".to_string()],
        ),
        "pallets/flask" => pytest_config(
            repo,
            4,
            vec!["python -m pytest tests/test_basic.py".to_string()],
        ),
        "pydata/xarray" => pytest_config(
            repo,
            5,
            vec!["python -m pytest xarray/tests/test_dataset.py".to_string()],
        ),
        _ => return None,
    };
    Some(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_from_instance_id() {
        assert_eq!(
            repo_from_instance_id("django__django-12325").as_deref(),
            Some("django/django")
        );
        assert_eq!(
            repo_from_instance_id("scikit-learn__scikit-learn-13241").as_deref(),
            Some("scikit-learn/scikit-learn")
        );
        assert_eq!(
            repo_from_instance_id("pytest-dev__pytest-5692").as_deref(),
            Some("pytest-dev/pytest")
        );
    }

    #[test]
    fn test_repo_from_instance_id_no_numeric_suffix() {
        // No trailing numeric issue number: keep the whole name.
        assert_eq!(
            repo_from_instance_id("org__some-repo").as_deref(),
            Some("org/some-repo")
        );
    }

    #[test]
    fn test_repo_from_instance_id_malformed() {
        assert_eq!(repo_from_instance_id("no-double-underscore"), None);
        assert_eq!(repo_from_instance_id("__x"), None);
        assert_eq!(repo_from_instance_id("x__"), None);
    }

    #[test]
    fn test_known_repository() {
        let config = get_repository_config("django__django-12325");
        assert_eq!(config.repo, "django/django");
        assert_eq!(config.project_type, ProjectType::Django);
        assert!(config.test_runner.contains("runtests.py"));
        assert!(config.strict_exploration);
        assert!(config.guidance.is_some());
    }

    #[test]
    fn test_unknown_repository_falls_back() {
        let config = get_repository_config("someorg__someproj-1");
        assert_eq!(config.repo, "someorg/someproj");
        assert_eq!(config.test_runner, "auto-detect");
        assert_eq!(config.project_type, ProjectType::Custom);
    }

    #[test]
    fn test_unparseable_instance_falls_back() {
        let config = get_repository_config("garbage");
        assert_eq!(config.repo, "unknown");
        assert_eq!(config.test_runner, "auto-detect");
    }

    #[test]
    fn test_all_table_entries_validate_clean() {
        for repo in [
            "django/django",
            "astropy/astropy",
            "scikit-learn/scikit-learn",
            "matplotlib/matplotlib",
            "sympy/sympy",
            "pytest-dev/pytest",
            "sphinx-doc/sphinx",
            "pylint-dev/pylint",
            "psf/requests",
            "mwaskom/seaborn",
            "pallets/flask",
            "pydata/xarray",
        ] {
            let config = known_config(repo).expect("table entry should exist");
            assert!(
                validate_config(&config).is_empty(),
                "warnings for {}: {:?}",
                repo,
                validate_config(&config)
            );
        }
    }

    #[test]
    fn test_validation_warns_on_missing_fields() {
        let mut config = RepositoryConfig::generic("x/y");
        config.test_runner = String::new();
        config.test_patterns.clear();
        let warnings = validate_config(&config);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = get_repository_config("django__django-12325");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RepositoryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
