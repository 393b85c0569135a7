use std::env;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::AppError;
use crate::judgment::ResultQuality;
use crate::scheduler::SchedulerLimits;

/// Engine configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub limits: LimitsConfig,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Workflow limits and thresholds
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub max_generation_attempts: u32,
    pub quality_threshold: ResultQuality,
    pub max_workflow_steps: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let quality_threshold = match env::var("QUALITY_THRESHOLD") {
            Ok(value) => value.parse().map_err(|e: String| AppError::Config {
                message: format!("QUALITY_THRESHOLD: {}", e),
            })?,
            Err(_) => ResultQuality::Good,
        };

        let limits = LimitsConfig {
            max_generation_attempts: env::var("MAX_GENERATION_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            quality_threshold,
            max_workflow_steps: env::var("MAX_WORKFLOW_STEPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50),
        };

        Ok(Config { logging, limits })
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_generation_attempts: 3,
            quality_threshold: ResultQuality::Good,
            max_workflow_steps: 50,
        }
    }
}

impl LimitsConfig {
    /// The subset of limits the scheduler judges against.
    pub fn scheduler_limits(&self) -> SchedulerLimits {
        SchedulerLimits {
            quality_threshold: self.quality_threshold,
            max_generation_attempts: self.max_generation_attempts,
        }
    }
}

/// Initialize tracing for embedding applications without their own
/// subscriber. Safe to call more than once; later calls are ignored.
pub fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let result = match config.logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    // A subscriber installed by the host application wins.
    let _ = result;
}
