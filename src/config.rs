use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::access::Caller;
use crate::host::HostConfig;
use crate::jobs::{JobScheduler, QueueJobScheduler, ThreadJobScheduler};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
    pub storage: StorageConfig,
    pub jobs: JobsConfig,
    pub worker: WorkerConfig,
    pub access: Caller,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("revgen")
                .join("revgen.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobsBackend {
    #[default]
    Queue,
    Thread,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub backend: JobsBackend,

    #[serde(rename = "default-queue")]
    pub default_queue: String,

    #[serde(rename = "delayed-queue")]
    pub delayed_queue: String,

    /// Queue name -> worker count
    pub queues: BTreeMap<String, usize>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            backend: JobsBackend::Queue,
            default_queue: "default".to_string(),
            delayed_queue: "delayed".to_string(),
            queues: BTreeMap::from([("default".to_string(), 2), ("delayed".to_string(), 1)]),
        }
    }
}

impl JobsConfig {
    /// Build the configured backend. Must run inside a tokio runtime.
    pub fn build(&self) -> Result<Arc<dyn JobScheduler>> {
        let scheduler: Arc<dyn JobScheduler> = match self.backend {
            JobsBackend::Queue => Arc::new(
                QueueJobScheduler::new(&self.default_queue, &self.queues)
                    .context("Failed to start queue backend")?,
            ),
            JobsBackend::Thread => {
                Arc::new(ThreadJobScheduler::new().context("Failed to start thread backend")?)
            }
        };
        Ok(scheduler)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause between iterations of a started reviewer
    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            storage: StorageConfig::default(),
            jobs: JobsConfig::default(),
            worker: WorkerConfig::default(),
            access: Caller::owner(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Working directory first: ./<project>.yml
        let local_config = PathBuf::from(format!("{}.yml", project_name));
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Then ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject settings the backends cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.interval_ms == 0 {
            eyre::bail!("worker.interval-ms must be greater than zero");
        }
        if let Some((name, _)) = self.jobs.queues.iter().find(|(_, count)| **count == 0) {
            eyre::bail!("jobs.queues.{} needs at least one worker", name);
        }
        for (key, queue) in [
            ("default-queue", &self.jobs.default_queue),
            ("delayed-queue", &self.jobs.delayed_queue),
        ] {
            if !self.jobs.queues.contains_key(queue) {
                eyre::bail!("jobs.{} '{}' is not listed in jobs.queues", key, queue);
            }
        }
        Ok(())
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            delayed_queue: self.jobs.delayed_queue.clone(),
            worker_interval: Duration::from_millis(self.worker.interval_ms),
        }
    }
}
