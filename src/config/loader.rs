use crate::config::schema::{ObserverConfig, PipelineConfig};
use crate::error::{Error, Result};
use crate::output::{
    ObserverSet, console::ConsoleObserver, csv::CsvObserver, json::JsonObserver,
    sqlite::SqliteObserver,
};
use config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

pub const ENV_PREFIX: &str = "REELBOT";

/// The keys one source actually sets. Files and `REELBOT_*` environment
/// variables are both read into this shape and applied over the defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigOverlay {
    hourly_cap: Option<u32>,
    daily_cap: Option<u32>,
    min_delay_secs: Option<u64>,
    concurrency: Option<usize>,
    fetch_timeout_secs: Option<u64>,
    dedupe_window_secs: Option<u64>,
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    max_retry_wait_secs: Option<u64>,
    queue_capacity: Option<usize>,
    stats_path: Option<PathBuf>,
    download_dir: Option<PathBuf>,
    recent_activity_limit: Option<usize>,
    acknowledge: Option<bool>,
    user_agent: Option<String>,
    observers: Option<Vec<ObserverConfig>>,
    extends: Option<String>,
}

macro_rules! overlay {
    ($config:ident, $overlay:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $overlay.$field {
                $config.$field = value;
            }
        )+
    };
}

impl ConfigOverlay {
    fn apply(self, config: &mut PipelineConfig) {
        let overlay = self;
        overlay!(
            config,
            overlay,
            hourly_cap,
            daily_cap,
            min_delay_secs,
            concurrency,
            fetch_timeout_secs,
            dedupe_window_secs,
            max_attempts,
            backoff_base_ms,
            max_retry_wait_secs,
            queue_capacity,
            stats_path,
            download_dir,
            recent_activity_limit,
            acknowledge,
            user_agent,
            observers,
        );
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path` (or the defaults when absent) with `REELBOT_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<PipelineConfig> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    /// Loads `path` (or the defaults when absent), applies environment
    /// overrides from `env`, then validates the result.
    pub fn load_with_env(path: Option<&Path>, env: Environment) -> Result<PipelineConfig> {
        let mut config = match path {
            Some(path) => {
                let mut visited = HashSet::new();
                Self::load_with_inheritance(path, &mut visited)?
            }
            None => PipelineConfig::default(),
        };

        Self::apply_env(&mut config, env)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves the `extends` chain root first; every file applies exactly
    /// the keys it sets over what its parent produced.
    fn load_with_inheritance(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<PipelineConfig> {
        let path = fs::canonicalize(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        if visited.contains(&path) {
            return Err(Error::Config(format!(
                "Circular inheritance detected involving {}",
                path.display()
            )));
        }
        visited.insert(path.clone());

        let overlay = Self::load_file(&path)?;

        let mut config = match &overlay.extends {
            Some(parent_path_str) => {
                let parent_path = path
                    .parent()
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "Cannot determine parent directory for {}",
                            path.display()
                        ))
                    })?
                    .join(parent_path_str);
                Self::load_with_inheritance(&parent_path, visited)?
            }
            None => PipelineConfig::default(),
        };

        overlay.apply(&mut config);
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<ConfigOverlay> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            Some("toml") => Ok(toml::from_str(&content)?),
            _ => Err(Error::Config(format!(
                "Unsupported file extension: {}",
                path.display()
            ))),
        }
    }

    fn apply_env(config: &mut PipelineConfig, env: Environment) -> Result<()> {
        let mut overrides: ConfigOverlay = Config::builder()
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;

        // Observer lists and inheritance only come from files.
        overrides.observers = None;
        overrides.extends = None;
        overrides.apply(config);
        Ok(())
    }

    pub async fn create_observers(
        config: &PipelineConfig,
        multi: Option<Arc<indicatif::MultiProgress>>,
    ) -> Result<ObserverSet> {
        let mut set = ObserverSet::default();

        for observer in &config.observers {
            match observer {
                ObserverConfig::Console => {
                    set.register(Arc::new(ConsoleObserver::new(multi.clone())))
                }
                ObserverConfig::Json { path } => {
                    set.register(Arc::new(JsonObserver::new(PathBuf::from(path))?))
                }
                ObserverConfig::Csv { path } => {
                    set.register(Arc::new(CsvObserver::new(PathBuf::from(path))?))
                }
                ObserverConfig::Sqlite { path, table } => set.register(Arc::new(
                    SqliteObserver::new(PathBuf::from(path), table.clone()).await?,
                )),
            }
        }

        Ok(set)
    }
}
