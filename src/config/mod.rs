use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_DATABASE: &str = "CAPSULE_MEMORY_DB";
pub const ENV_LOG_LEVEL: &str = "CAPSULE_MEMORY_LOG";
pub const ENV_TOKEN_BUDGET: &str = "CAPSULE_MEMORY_TOKEN_BUDGET";

const CONFIG_DIR: &str = ".capsule-memory";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Token budget for `recall`; unset means unlimited.
    #[serde(default)]
    pub token_budget: Option<usize>,
}

fn default_max_candidates() -> usize {
    crate::search::DEFAULT_MAX_RESULTS
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            token_budget: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub include_redacted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub config_path: PathBuf,
    /// May start with `~`.
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

fn default_database_path() -> String {
    format!("~/{CONFIG_DIR}/memory.db")
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            database_path: default_database_path(),
            log_level: default_log_level(),
            retrieval: RetrievalConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl Config {
    /// Load `~/.capsule-memory/config.toml`, writing defaults on first run,
    /// then apply environment overrides.
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let mut config = Self::load_or_init_at(&home.join(CONFIG_DIR).join("config.toml"))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_or_init_at(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents =
                fs::read_to_string(config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.to_path_buf();
            Ok(config)
        } else {
            if let Some(dir) = config_path.parent() {
                fs::create_dir_all(dir).context("Failed to create config directory")?;
            }
            let config = Self {
                config_path: config_path.to_path_buf(),
                ..Self::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Empty values are ignored, as is an unparseable token budget.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(path) = get(ENV_DATABASE) {
            self.database_path = path;
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(budget) = get(ENV_TOKEN_BUDGET) {
            match budget.trim().parse::<usize>() {
                Ok(budget) => self.retrieval.token_budget = Some(budget),
                Err(_) => tracing::warn!(value = %budget, "ignoring non-numeric {ENV_TOKEN_BUDGET}"),
            }
        }
    }

    /// `database_path` with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }
}
