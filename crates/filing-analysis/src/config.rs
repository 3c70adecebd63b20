//! Configuration for the filing analysis pipeline

use crate::error::{FilingError, Result};
use crate::model::FilingType;
use crate::validation::ValidationConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default identifying header for SEC requests
pub const DEFAULT_SEC_USER_AGENT: &str = "filing-analysis research@example.com";

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory of the snapshot cache
    pub cache_dir: PathBuf,

    /// Age after which cache entries are stale
    pub cache_ttl: Duration,

    /// Parent directory of per-session artifact directories
    pub session_root: PathBuf,

    /// Filing form to analyze
    pub filing_type: FilingType,

    /// Fewest line items a statement may have before it counts as incomplete
    pub min_line_items: usize,

    /// Share of line items that must have both periods
    pub period_coverage_threshold: f64,

    /// Relative tolerance of the balance identity
    pub balance_tolerance: f64,

    /// Relative tolerance of calculation-linkbase checks
    pub linkbase_tolerance: f64,

    /// Limit for each gather branch (filing, context)
    pub gather_timeout: Duration,

    /// Limit for each analysis task, collaborator call included
    pub task_timeout: Duration,

    /// Limit for each sub-fetch inside a task
    pub sub_fetch_timeout: Duration,

    /// User-Agent sent to SEC EDGAR ("name email")
    pub sec_user_agent: String,

    /// Model used by the LLM collaborator
    pub model: String,

    pub max_tokens: usize,

    pub temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".filing-cache"),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            session_root: PathBuf::from("sessions"),
            filing_type: FilingType::Form10Q,
            min_line_items: 15,
            period_coverage_threshold: 0.8,
            balance_tolerance: 0.005,
            linkbase_tolerance: 0.005,
            gather_timeout: Duration::from_secs(60),
            task_timeout: Duration::from_secs(120),
            sub_fetch_timeout: Duration::from_secs(20),
            sec_user_agent: DEFAULT_SEC_USER_AGENT.to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

fn config_error(message: impl Into<String>) -> FilingError {
    FilingError::Config(message.into())
}

impl PipelineConfig {
    /// Create a new configuration builder
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Override fields from `SEC_USER_AGENT`, `FILING_CACHE_DIR`,
    /// `FILING_SESSION_DIR`, `FILING_CACHE_TTL_SECS` and `FILING_MODEL`
    pub fn with_env(self) -> Result<Self> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary variable lookup
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(agent) = var("SEC_USER_AGENT") {
            self.sec_user_agent = agent;
        }
        if let Some(dir) = var("FILING_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("FILING_SESSION_DIR") {
            self.session_root = PathBuf::from(dir);
        }
        if let Some(secs) = var("FILING_CACHE_TTL_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| config_error(format!("FILING_CACHE_TTL_SECS is not a number: '{secs}'")))?;
            self.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(model) = var("FILING_MODEL") {
            self.model = model;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.min_line_items == 0 {
            return Err(config_error("min_line_items must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.period_coverage_threshold) {
            return Err(config_error("period_coverage_threshold must be between 0 and 1"));
        }
        for (name, tolerance) in [
            ("balance_tolerance", self.balance_tolerance),
            ("linkbase_tolerance", self.linkbase_tolerance),
        ] {
            if !(0.0..1.0).contains(&tolerance) {
                return Err(config_error(format!("{name} must be in [0, 1)")));
            }
        }
        for (name, timeout) in [
            ("cache_ttl", self.cache_ttl),
            ("gather_timeout", self.gather_timeout),
            ("task_timeout", self.task_timeout),
            ("sub_fetch_timeout", self.sub_fetch_timeout),
        ] {
            if timeout.is_zero() {
                return Err(config_error(format!("{name} must be greater than 0")));
            }
        }
        // SEC asks for "Sample Company Name AdminContact@example.com".
        if !self.sec_user_agent.contains('@') {
            return Err(config_error("sec_user_agent must include a contact email"));
        }
        if self.max_tokens == 0 {
            return Err(config_error("max_tokens must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(config_error("temperature must be between 0 and 2"));
        }
        Ok(())
    }

    /// Thresholds for the validation engine
    pub fn validation(&self) -> ValidationConfig {
        ValidationConfig {
            min_line_items: self.min_line_items,
            period_coverage_threshold: self.period_coverage_threshold,
            balance_tolerance: self.balance_tolerance,
            linkbase_tolerance: self.linkbase_tolerance,
        }
    }
}

/// Builder for PipelineConfig
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: Option<PipelineConfig>,
}

macro_rules! builder_setters {
    ($($field:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $field(mut self, value: impl Into<$ty>) -> Self {
                self.config_mut().$field = value.into();
                self
            }
        )*
    };
}

impl PipelineConfigBuilder {
    fn config_mut(&mut self) -> &mut PipelineConfig {
        self.config.get_or_insert_with(PipelineConfig::default)
    }

    builder_setters! {
        cache_dir: PathBuf,
        cache_ttl: Duration,
        session_root: PathBuf,
        filing_type: FilingType,
        min_line_items: usize,
        period_coverage_threshold: f64,
        balance_tolerance: f64,
        linkbase_tolerance: f64,
        gather_timeout: Duration,
        task_timeout: Duration,
        sub_fetch_timeout: Duration,
        sec_user_agent: String,
        model: String,
        max_tokens: usize,
        temperature: f32,
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<PipelineConfig> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(86_400));
        assert_eq!(config.filing_type, FilingType::Form10Q);
        assert_eq!(config.min_line_items, 15);
        assert!(config.validate().is_ok());
        assert_eq!(config.validation(), ValidationConfig::default());
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::builder()
            .filing_type(FilingType::Form10K)
            .min_line_items(10_usize)
            .task_timeout(Duration::from_secs(5))
            .sec_user_agent("Acme Research ops@acme.test")
            .build()
            .unwrap();

        assert_eq!(config.filing_type, FilingType::Form10K);
        assert_eq!(config.min_line_items, 10);
        assert_eq!(config.task_timeout, Duration::from_secs(5));
        assert_eq!(config.validation().min_line_items, 10);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(PipelineConfig::builder().min_line_items(0_usize).build().is_err());
        assert!(PipelineConfig::builder().period_coverage_threshold(1.5).build().is_err());
        assert!(PipelineConfig::builder().gather_timeout(Duration::ZERO).build().is_err());
        assert!(PipelineConfig::builder().sec_user_agent("no contact").build().is_err());

        let err = PipelineConfig::builder().balance_tolerance(1.0).build().unwrap_err();
        assert_eq!(err.to_string(), "configuration error: balance_tolerance must be in [0, 1)");
    }

    #[test]
    fn test_apply_env() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FILING_CACHE_DIR", "/tmp/filings"),
            ("FILING_CACHE_TTL_SECS", "3600"),
            ("FILING_MODEL", "  gpt-4o  "),
            ("SEC_USER_AGENT", ""),
        ]);
        let config = PipelineConfig::default()
            .apply_env(|key| vars.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.cache_dir, PathBuf::from("/tmp/filings"));
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.sec_user_agent, DEFAULT_SEC_USER_AGENT);
    }

    #[test]
    fn test_apply_env_rejects_bad_ttl() {
        let result = PipelineConfig::default().apply_env(|key| (key == "FILING_CACHE_TTL_SECS").then(|| "soon".to_string()));
        assert!(matches!(result, Err(FilingError::Config(_))));
    }
}
