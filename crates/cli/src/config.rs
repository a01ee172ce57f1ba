//! `.inkworks/config.toml` loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, Local, Offset};
use directories::ProjectDirs;
use llm::AnthropicConfig;
use nodes::{PassTemperatures, PipelineConfig};
use pipeline::{DetectionScore, RateLimitPolicy};
use serde::Deserialize;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = ".inkworks/config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub backend: BackendSection,
    pub pipeline: PipelineSection,
    pub rate_limit: RateLimitSection,
    pub storage: StorageSection,
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSection {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: llm::DEFAULT_BASE_URL.to_string(),
            model: llm::DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            request_timeout_secs: 120,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    pub call_timeout_secs: u64,
    pub detection_threshold: f64,
    pub draft_temperature: f64,
    pub critique_temperature: f64,
    pub rewrite_temperature: f64,
    pub refinement_temperature: f64,
    pub checkpoint_ttl_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let temps = PassTemperatures::default();
        Self {
            call_timeout_secs: nodes::DEFAULT_CALL_TIMEOUT.as_secs(),
            detection_threshold: pipeline::DEFAULT_DETECTION_THRESHOLD,
            draft_temperature: temps.draft,
            critique_temperature: temps.critique,
            rewrite_temperature: temps.rewrite,
            refinement_temperature: temps.refinement,
            checkpoint_ttl_secs: pipeline::DEFAULT_CHECKPOINT_TTL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSection {
    pub cooldown_secs: u64,
    pub soft_cap: u32,
    pub escalation_threshold: u32,
    pub hard_cap: u32,
    /// Offset from UTC, in minutes, that decides where a day starts.
    /// Defaults to the host's current local offset.
    pub utc_offset_minutes: Option<i32>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let policy = RateLimitPolicy::default();
        Self {
            cooldown_secs: policy.cooldown.as_secs(),
            soft_cap: policy.soft_cap,
            escalation_threshold: policy.escalation_threshold,
            hard_cap: policy.hard_cap,
            utc_offset_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    /// Directory for checkpoints and counters. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySection {
    pub format: LogFormat,
    /// OTLP gRPC endpoint; spans are exported only when set.
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Loads `path`, or [`DEFAULT_CONFIG_PATH`] if it exists, or the defaults.
    ///
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_toml(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        } else if required {
            bail!("Config file {} does not exist", path.display());
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config")
    }

    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limit;
        if rl.soft_cap >= rl.hard_cap {
            bail!(
                "rate_limit.soft_cap ({}) must be below rate_limit.hard_cap ({})",
                rl.soft_cap,
                rl.hard_cap
            );
        }
        if rl.escalation_threshold < rl.soft_cap || rl.escalation_threshold >= rl.hard_cap {
            bail!(
                "rate_limit.escalation_threshold ({}) must lie in [soft_cap, hard_cap)",
                rl.escalation_threshold
            );
        }
        if let Some(minutes) = rl.utc_offset_minutes {
            if FixedOffset::east_opt(minutes * 60).is_none() {
                bail!("rate_limit.utc_offset_minutes ({minutes}) is out of range");
            }
        }

        let p = &self.pipeline;
        if DetectionScore::new(p.detection_threshold).is_none() {
            bail!(
                "pipeline.detection_threshold ({}) must be within 0..=10",
                p.detection_threshold
            );
        }
        for (name, t) in [
            ("draft_temperature", p.draft_temperature),
            ("critique_temperature", p.critique_temperature),
            ("rewrite_temperature", p.rewrite_temperature),
            ("refinement_temperature", p.refinement_temperature),
        ] {
            if !(0.0..=1.0).contains(&t) {
                bail!("pipeline.{name} ({t}) must be within 0.0..=1.0");
            }
        }
        if p.call_timeout_secs == 0 {
            bail!("pipeline.call_timeout_secs must be positive");
        }
        if p.checkpoint_ttl_secs == 0 {
            bail!("pipeline.checkpoint_ttl_secs must be positive");
        }

        let b = &self.backend;
        if b.max_tokens == 0 {
            bail!("backend.max_tokens must be positive");
        }
        if b.api_key_env.trim().is_empty() {
            bail!("backend.api_key_env must name an environment variable");
        }
        Ok(())
    }

    pub fn anthropic(&self) -> AnthropicConfig {
        AnthropicConfig {
            base_url: self.backend.base_url.clone(),
            model: self.backend.model.clone(),
            max_tokens: self.backend.max_tokens,
            request_timeout: Duration::from_secs(self.backend.request_timeout_secs),
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        let p = &self.pipeline;
        PipelineConfig {
            call_timeout: Duration::from_secs(p.call_timeout_secs),
            detection_threshold: p.detection_threshold,
            temperatures: PassTemperatures {
                draft: p.draft_temperature,
                critique: p.critique_temperature,
                rewrite: p.rewrite_temperature,
                refinement: p.refinement_temperature,
            },
        }
    }

    pub fn checkpoint_ttl(&self) -> Duration {
        Duration::from_secs(self.pipeline.checkpoint_ttl_secs)
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        let rl = &self.rate_limit;
        let utc_offset = rl
            .utc_offset_minutes
            .and_then(|m| FixedOffset::east_opt(m * 60))
            .unwrap_or_else(|| Local::now().offset().fix());
        RateLimitPolicy {
            cooldown: Duration::from_secs(rl.cooldown_secs),
            soft_cap: rl.soft_cap,
            escalation_threshold: rl.escalation_threshold,
            hard_cap: rl.hard_cap,
            utc_offset,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(|| {
            ProjectDirs::from("", "", "inkworks")
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".inkworks").join("data"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.backend.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.pipeline.detection_threshold, 3.0);
        assert_eq!(config.rate_limit.hard_cap, 100);
        assert_eq!(config.telemetry.format, LogFormat::Pretty);
        assert_eq!(config.pipeline(), PipelineConfig::default());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = Config::from_toml(
            r#"
            [rate_limit]
            cooldown_secs = 30
            utc_offset_minutes = 60

            [telemetry]
            format = "json"
            otlp_endpoint = "http://localhost:4317"
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        let policy = config.rate_limit_policy();
        assert_eq!(policy.cooldown, Duration::from_secs(30));
        assert_eq!(policy.soft_cap, 30);
        assert_eq!(policy.utc_offset.local_minus_utc(), 3600);
        assert_eq!(config.telemetry.format, LogFormat::Json);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml("[backend]\napi_key = \"sk-oops\"\n").is_err());
    }

    #[test]
    fn soft_cap_must_be_below_hard_cap() {
        let config = Config::from_toml("[rate_limit]\nsoft_cap = 100\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_outside_score_range_is_rejected() {
        let config = Config::from_toml("[pipeline]\ndetection_threshold = 11.0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        assert!(Config::load(Some(Path::new("/definitely/not/here.toml"))).is_err());
    }

    #[test]
    fn configured_data_dir_wins() {
        let config = Config::from_toml("[storage]\ndata_dir = \"/tmp/ink\"\n").unwrap();
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/ink"));
    }
}
