use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TaleConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
    pub memory: MemoryConfig,
    pub relations: RelationsConfig,
    pub generation: GenerationConfig,
    pub voices: VoiceConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// Entity resolution policy.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConfig {
    /// Normalized name similarity at or above which a mention merges into an
    /// existing entity.
    pub similarity_threshold: f64,
    /// Upper bound on `character`-role entities.
    pub max_characters: usize,
    /// Voices assigned round-robin to characters created during play.
    pub voice_pool: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// Memories per character included verbatim in a prompt.
    pub window: usize,
    pub summary_every_turns: u32,
    pub summary_max_age_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RelationsConfig {
    pub strength_step: f64,
    /// Multiplier applied by `apply_decay`; 1.0 disables decay.
    pub decay_factor: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub attempts: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VoiceConfig {
    pub narrator: String,
    pub player: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_tale_dir()
            .join("story.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            max_characters: 50,
            voice_pool: vec!["default".into()],
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window: 5,
            summary_every_turns: 5,
            summary_max_age_secs: 900,
        }
    }
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self {
            strength_step: 1.0,
            decay_factor: 1.0,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".into(),
            model: "local-model".into(),
            api_key: String::new(),
            temperature: 0.7,
            max_tokens: 1000,
            attempts: 3,
            timeout_secs: 30,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            narrator: "narrator".into(),
            player: "player".into(),
        }
    }
}

/// Returns `~/.taleweaver/`
pub fn default_tale_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".taleweaver")
}

/// Returns the default config file path: `~/.taleweaver/config.toml`
pub fn default_config_path() -> PathBuf {
    default_tale_dir().join("config.toml")
}

impl TaleConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides and validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            TaleConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (TALEWEAVER_DB, TALEWEAVER_LOG_LEVEL,
    /// TALEWEAVER_MODEL_URL, TALEWEAVER_API_KEY).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TALEWEAVER_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("TALEWEAVER_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("TALEWEAVER_MODEL_URL") {
            self.generation.base_url = val;
        }
        if let Ok(val) = std::env::var("TALEWEAVER_API_KEY") {
            self.generation.api_key = val;
        }
    }

    /// Reject policy values the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.registry.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            bail!("registry.similarity_threshold must be in (0, 1], got {threshold}");
        }
        if self.registry.voice_pool.is_empty() {
            bail!("registry.voice_pool must name at least one voice");
        }
        if self.memory.window == 0 {
            bail!("memory.window must be at least 1");
        }
        if self.generation.attempts == 0 {
            bail!("generation.attempts must be at least 1");
        }
        if self.relations.strength_step <= 0.0 {
            bail!("relations.strength_step must be positive");
        }
        if !(0.0..=1.0).contains(&self.relations.decay_factor) {
            bail!("relations.decay_factor must be in [0, 1]");
        }
        if !self.generation.base_url.starts_with("http://")
            && !self.generation.base_url.starts_with("https://")
        {
            bail!("generation.base_url must start with http:// or https://");
        }
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TaleConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.memory.window, 5);
        assert!((config.registry.similarity_threshold - 0.8).abs() < f64::EPSILON);
        assert!(config.storage.db_path.ends_with("story.db"));
        config.validate().unwrap();
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[logging]
level = "debug"

[storage]
db_path = "/tmp/test.db"

[memory]
window = 8
"#;
        let config: TaleConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.memory.window, 8);
        // defaults still apply for unset fields
        assert_eq!(config.memory.summary_every_turns, 5);
        assert_eq!(config.generation.attempts, 3);
    }

    #[test]
    fn validate_rejects_bad_policy() {
        let mut config = TaleConfig::default();
        config.registry.similarity_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = TaleConfig::default();
        config.memory.window = 0;
        assert!(config.validate().is_err());

        let mut config = TaleConfig::default();
        config.generation.base_url = "localhost:1234".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = TaleConfig::default();
        std::env::set_var("TALEWEAVER_DB", "/tmp/override.db");
        std::env::set_var("TALEWEAVER_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.logging.level, "trace");

        // Clean up
        std::env::remove_var("TALEWEAVER_DB");
        std::env::remove_var("TALEWEAVER_LOG_LEVEL");
    }
}
