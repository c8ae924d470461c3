use crate::error::EngineError;
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub blob_root: String,
    pub worker_pool: WorkerPoolConfig,
    pub rate: RateConfig,
    pub smtp: SmtpConfig,
    /// How long finished campaigns and their attempt ledgers stay around.
    pub cleanup_retention: Duration,
}

/// Settings for one dispatch worker invocation loop.
#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    /// Receive batch size; the queue caps this at 10 per receive call.
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    /// Wall-clock budget for a single batch invocation.
    pub batch_budget: Duration,
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            batch_size: 10,
            visibility_timeout: Duration::from_secs(300),
            batch_budget: Duration::from_secs(900),
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Adaptive send-delay settings, applied per worker invocation.
#[derive(Clone, Debug)]
pub struct RateConfig {
    pub base_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub throttle_recovery_period: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(5),
            throttle_recovery_period: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub enum SmtpSecurity {
    None,
    Tls,
    Ssl,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        let database_url = env::var("MF_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:data/mailfan.db?mode=rwc".to_string());

        let blob_root = env::var("MF_BLOB_ROOT").unwrap_or_else(|_| "data/blobs".to_string());

        let worker_count = env::var("MF_WORKER_COUNT")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| EngineError::Config("Invalid MF_WORKER_COUNT value".to_string()))?;

        let batch_size: usize = env::var("MF_BATCH_SIZE")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| EngineError::Config("Invalid MF_BATCH_SIZE value".to_string()))?;
        if batch_size == 0 || batch_size > 10 {
            return Err(EngineError::Config(
                "MF_BATCH_SIZE must be between 1 and 10".to_string(),
            ));
        }

        let visibility_timeout_seconds: u64 = env::var("MF_VISIBILITY_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .map_err(|_| {
                EngineError::Config("Invalid MF_VISIBILITY_TIMEOUT_SECONDS value".to_string())
            })?;

        let batch_budget_seconds: u64 = env::var("MF_BATCH_BUDGET_SECONDS")
            .unwrap_or_else(|_| "900".to_string())
            .parse()
            .map_err(|_| EngineError::Config("Invalid MF_BATCH_BUDGET_SECONDS value".to_string()))?;

        let poll_interval_ms: u64 = env::var("MF_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| EngineError::Config("Invalid MF_POLL_INTERVAL_MS value".to_string()))?;

        let worker_pool = WorkerPoolConfig {
            worker_count,
            batch_size,
            visibility_timeout: Duration::from_secs(visibility_timeout_seconds),
            batch_budget: Duration::from_secs(batch_budget_seconds),
            poll_interval: Duration::from_millis(poll_interval_ms),
        };

        let rate = RateConfig {
            base_delay: parse_delay("MF_BASE_DELAY_SECONDS", "0.1")?,
            min_delay: parse_delay("MF_MIN_DELAY_SECONDS", "0.01")?,
            max_delay: parse_delay("MF_MAX_DELAY_SECONDS", "5.0")?,
            throttle_recovery_period: parse_delay("MF_THROTTLE_RECOVERY_SECONDS", "60")?,
        };
        if rate.min_delay > rate.max_delay {
            return Err(EngineError::Config(
                "MF_MIN_DELAY_SECONDS must not exceed MF_MAX_DELAY_SECONDS".to_string(),
            ));
        }

        let cleanup_retention_days: u64 = env::var("MF_CLEANUP_RETENTION_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                EngineError::Config("Invalid MF_CLEANUP_RETENTION_DAYS value".to_string())
            })?;

        let smtp = Self::load_smtp_config()?;

        // The store and blob reads expect their directories to exist
        if let Some(db_path_str) = database_url.strip_prefix("sqlite:") {
            if let Some(db_path) = db_path_str.split('?').next() {
                if db_path != ":memory:" {
                    if let Some(parent) = std::path::Path::new(db_path).parent() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            EngineError::Config(format!("Failed to create data directory: {e}"))
                        })?;
                    }
                }
            }
        }

        Ok(Config {
            database_url,
            blob_root,
            worker_pool,
            rate,
            smtp,
            cleanup_retention: Duration::from_secs(cleanup_retention_days * 24 * 60 * 60),
        })
    }

    fn load_smtp_config() -> Result<SmtpConfig, EngineError> {
        let host = env::var("SMTP_HOST").map_err(|_| {
            EngineError::Config("SMTP_HOST environment variable not set".to_string())
        })?;

        tracing::info!("SMTP config loaded: host={}", host);

        Ok(SmtpConfig {
            host,
            port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid SMTP_PORT".to_string()))?,
            security: match env::var("SMTP_SECURITY")
                .unwrap_or_else(|_| "tls".to_string())
                .to_lowercase()
                .as_str()
            {
                "none" => SmtpSecurity::None,
                "tls" => SmtpSecurity::Tls,
                "ssl" => SmtpSecurity::Ssl,
                _ => {
                    return Err(EngineError::Config(
                        "Invalid SMTP_SECURITY value. Use: none, tls, or ssl".to_string(),
                    ))
                }
            },
            username: env::var("SMTP_USERNAME").ok(),
            password: env::var("SMTP_PASSWORD").ok(),
            timeout_seconds: env::var("SMTP_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
        })
    }
}

fn parse_delay(key: &str, default: &str) -> Result<Duration, EngineError> {
    let seconds: f64 = env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| EngineError::Config(format!("Invalid {key} value")))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(EngineError::Config(format!("{key} must be non-negative")));
    }
    Ok(Duration::from_secs_f64(seconds))
}
