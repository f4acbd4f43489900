//! 引擎配置加载
//!
//! 支持 YAML 文件和环境变量两种来源。环境变量格式：
//! ```text
//! TASK_DISPATCH_LEASE_SECS=1800
//! TASK_DISPATCH_FAILURE_POLICY=block          # block | retry
//! TASK_DISPATCH_GRIDLOCK_WINDOW_SECS=300
//! TASK_DISPATCH_GRIDLOCK_THRESHOLD=3
//! TASK_DISPATCH_GRIDLOCK_COOLDOWN_SECS=600
//! TASK_DISPATCH_GRIDLOCK_MAX_IN_PROGRESS=1
//! ```
//! 未设置的项保持默认值。

use crate::error::{ConfigError, EngineError, Result};
use crate::scheduler::gridlock::GridlockConfig;
use crate::scheduler::{FailurePolicy, SchedulerConfig};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const ENV_PREFIX: &str = "TASK_DISPATCH_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub gridlock: GridlockConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease_secs(mut self, secs: u64) -> Self {
        self.scheduler.lease_duration_secs = secs;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.scheduler.failure_policy = policy;
        self
    }

    pub fn with_gridlock_window(mut self, secs: u64) -> Self {
        self.gridlock.window_secs = secs;
        self
    }

    pub fn with_gridlock_threshold(mut self, threshold: usize) -> Self {
        self.gridlock.threshold = threshold;
        self
    }

    pub fn with_alert_cooldown(mut self, secs: u64) -> Self {
        self.gridlock.alert_cooldown_secs = secs;
        self
    }

    pub fn with_max_in_progress(mut self, max: usize) -> Self {
        self.gridlock.max_in_progress = max;
        self
    }

    /// 从 YAML 文件加载
    pub fn load(path: &str) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        let config: EngineConfig = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// 从环境变量（及 `.env` 文件）加载
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// 从键值对加载，只读取带 `TASK_DISPATCH_` 前缀的项
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match field {
                "LEASE_SECS" => config.scheduler.lease_duration_secs = parse(&key, &value)?,
                "FAILURE_POLICY" => config.scheduler.failure_policy = parse(&key, &value)?,
                "GRIDLOCK_WINDOW_SECS" => config.gridlock.window_secs = parse(&key, &value)?,
                "GRIDLOCK_THRESHOLD" => config.gridlock.threshold = parse(&key, &value)?,
                "GRIDLOCK_COOLDOWN_SECS" => {
                    config.gridlock.alert_cooldown_secs = parse(&key, &value)?
                }
                "GRIDLOCK_MAX_IN_PROGRESS" => {
                    config.gridlock.max_in_progress = parse(&key, &value)?
                }
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.lease_duration_secs == 0 {
            return Err(invalid("scheduler.lease_duration_secs", "must be greater than 0"));
        }
        if self.gridlock.threshold == 0 {
            return Err(invalid("gridlock.threshold", "must be greater than 0"));
        }
        if self.gridlock.window_secs == 0 {
            return Err(invalid("gridlock.window_secs", "must be greater than 0"));
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        EngineError::Config(ConfigError::InvalidValue {
            field: key.to_string(),
            message: e.to_string(),
        })
    })
}

fn invalid(field: &str, message: &str) -> EngineError {
    EngineError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    })
}
