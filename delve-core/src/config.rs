//! Configuration system for Delve.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/delve/config.toml` and/or `.delve/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration for Delve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelveConfig {
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub web: WebConfig,
}

impl DelveConfig {
    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

/// How deep a research run should go.
///
/// Each depth is a preset for the iteration and refinement budgets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    /// Single pass, no refinement.
    Quick,
    /// A few passes with a small refinement budget.
    #[default]
    Detailed,
    /// Many passes with a generous refinement budget.
    Comprehensive,
}

impl ResearchDepth {
    /// `(max_iterations, max_refinements)` for this depth.
    pub fn budgets(self) -> (u32, u32) {
        match self {
            ResearchDepth::Quick => (1, 0),
            ResearchDepth::Detailed => (5, 2),
            ResearchDepth::Comprehensive => (8, 4),
        }
    }
}

impl std::str::FromStr for ResearchDepth {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(ResearchDepth::Quick),
            "detailed" => Ok(ResearchDepth::Detailed),
            "comprehensive" => Ok(ResearchDepth::Comprehensive),
            other => Err(ConfigError::Invalid {
                message: format!("unknown research depth '{other}'"),
            }),
        }
    }
}

/// Budgets and limits for the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Maximum number of Executor+Auditor passes per session.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Maximum refinement cycles per vector.
    #[serde(default = "default_max_refinements")]
    pub max_refinements: u32,
    /// Evidence chunks a vector needs before it is verified.
    #[serde(default = "default_sufficiency_threshold")]
    pub sufficiency_threshold: usize,
    /// Minimum knowledge-store score for a chunk to count as relevant.
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
    /// Also require the knowledge store to return `sufficiency_threshold`
    /// relevant chunks before verifying.
    #[serde(default)]
    pub require_store_corroboration: bool,
    /// Vectors processed concurrently within one Executor batch.
    #[serde(default = "default_max_concurrent_vectors")]
    pub max_concurrent_vectors: usize,
    /// Searches and page pipelines in flight per vector.
    #[serde(default = "default_max_parallel_queries")]
    pub max_parallel_queries: usize,
    /// Top-ranked search results fetched per query.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,
    /// Timeout applied to every individual collaborator call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Evidence chunks used when writing one report section.
    #[serde(default = "default_evidence_per_section")]
    pub evidence_per_section: usize,
    /// Directory finished sessions are persisted to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_dir: Option<PathBuf>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_refinements: default_max_refinements(),
            sufficiency_threshold: default_sufficiency_threshold(),
            min_relevance: default_min_relevance(),
            require_store_corroboration: false,
            max_concurrent_vectors: default_max_concurrent_vectors(),
            max_parallel_queries: default_max_parallel_queries(),
            results_per_query: default_results_per_query(),
            call_timeout_secs: default_call_timeout_secs(),
            evidence_per_section: default_evidence_per_section(),
            session_dir: None,
        }
    }
}

impl ResearchConfig {
    /// Apply a depth preset to the iteration and refinement budgets.
    pub fn with_depth(mut self, depth: ResearchDepth) -> Self {
        let (max_iterations, max_refinements) = depth.budgets();
        self.max_iterations = max_iterations;
        self.max_refinements = max_refinements;
        self
    }

    /// Per-call timeout as a `Duration`.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Reject budgets that would make a session meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &str); 6] = [
            (self.max_iterations == 0, "max_iterations must be at least 1"),
            (
                self.sufficiency_threshold == 0,
                "sufficiency_threshold must be at least 1",
            ),
            (
                self.max_concurrent_vectors == 0,
                "max_concurrent_vectors must be at least 1",
            ),
            (
                self.max_parallel_queries == 0,
                "max_parallel_queries must be at least 1",
            ),
            (
                self.results_per_query == 0,
                "results_per_query must be at least 1",
            ),
            (
                self.call_timeout_secs == 0,
                "call_timeout_secs must be at least 1",
            ),
        ];
        for (failed, message) in checks {
            if failed {
                return Err(ConfigError::Invalid {
                    message: message.to_string(),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.min_relevance) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "min_relevance must be within 0.0..=1.0, got {}",
                    self.min_relevance
                ),
            });
        }
        Ok(())
    }
}

fn default_max_iterations() -> u32 {
    5
}

fn default_max_refinements() -> u32 {
    2
}

fn default_sufficiency_threshold() -> usize {
    3
}

fn default_min_relevance() -> f32 {
    0.1
}

fn default_max_concurrent_vectors() -> usize {
    5
}

fn default_max_parallel_queries() -> usize {
    3
}

fn default_results_per_query() -> usize {
    3
}

fn default_call_timeout_secs() -> u64 {
    20
}

fn default_evidence_per_section() -> usize {
    5
}

/// Settings for the HTTP search and fetch adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Instant-answer search endpoint.
    #[serde(default = "default_search_endpoint")]
    pub search_endpoint: String,
    /// Pages larger than this are truncated before parsing.
    #[serde(default = "default_max_page_bytes")]
    pub max_page_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            search_endpoint: default_search_endpoint(),
            max_page_bytes: default_max_page_bytes(),
        }
    }
}

fn default_user_agent() -> String {
    "Delve/0.3".to_string()
}

fn default_search_endpoint() -> String {
    "https://api.duckduckgo.com/".to_string()
}

fn default_max_page_bytes() -> usize {
    512 * 1024
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DELVE_`)
/// 3. Workspace-local config (`.delve/config.toml`)
/// 4. User config (`~/.config/delve/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DelveConfig>,
) -> Result<DelveConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DelveConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "delve", "delve") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".delve").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DELVE_RESEARCH__MAX_ITERATIONS, DELVE_WEB__USER_AGENT, etc.
    figment = figment.merge(Env::prefixed("DELVE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Default data directory for persisted sessions and logs.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "delve", "delve")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".delve"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ResearchConfig::default();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.max_refinements, 2);
        assert_eq!(config.sufficiency_threshold, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_depth_presets() {
        let quick = ResearchConfig::default().with_depth(ResearchDepth::Quick);
        assert_eq!((quick.max_iterations, quick.max_refinements), (1, 0));

        let deep = ResearchConfig::default().with_depth(ResearchDepth::Comprehensive);
        assert_eq!((deep.max_iterations, deep.max_refinements), (8, 4));
    }

    #[test]
    fn test_depth_from_str() {
        assert_eq!(
            "Comprehensive".parse::<ResearchDepth>().unwrap(),
            ResearchDepth::Comprehensive
        );
        assert!("bottomless".parse::<ResearchDepth>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let config = ResearchConfig {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ResearchConfig {
            max_concurrent_vectors: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ResearchConfig {
            min_relevance: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DelveConfig = toml::from_str(
            r#"
            [research]
            max_iterations = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.research.max_iterations, 2);
        assert_eq!(config.research.sufficiency_threshold, 3);
        assert_eq!(config.web.user_agent, "Delve/0.3");
    }

    #[test]
    fn test_load_config_workspace_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".delve");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            "[research]\nmax_refinements = 4\nresults_per_query = 1\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.research.max_refinements, 4);
        assert_eq!(config.research.results_per_query, 1);
    }

    #[test]
    fn test_to_toml_roundtrips_budgets() {
        let config = DelveConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("max_iterations = 5"));
    }
}
