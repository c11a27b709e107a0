use std::env::var;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use thiserror::Error;

use crate::{
    application::{
        handlers::relay_worker::RelayConfig,
        services::{backoff::Backoff, circuit_breaker::CircuitBreakerConfig},
    },
    infrastructure::messaging::jetstream::JetstreamConfig,
    telemetry::LogFormat,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env param {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for env param {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub jetstream: JetstreamConfig,
    pub relay: RelayConfig,
    pub breaker: CircuitBreakerConfig,
    pub log_format: LogFormat,
    pub shutdown_grace: Duration,
}

impl Config {
    /// Reads the process environment, after loading `.env` when present.
    pub fn try_parse() -> Result<Config, ConfigError> {
        let _ = dotenv();
        Self::from_lookup(|key| var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let store_timeout = env.millis("STORE_TIMEOUT_MS", 5_000)?;
        let publish_timeout = env.millis("PUBLISH_TIMEOUT_MS", 5_000)?;

        let jitter: f64 = env.parse_or("RELAY_BACKOFF_JITTER", 0.2)?;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::Invalid {
                key: "RELAY_BACKOFF_JITTER",
                value: jitter.to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        let backoff = Backoff::new(
            env.millis("RELAY_BACKOFF_BASE_MS", 500)?,
            env.millis("RELAY_BACKOFF_MAX_MS", 300_000)?,
            jitter,
        );
        if backoff.base > backoff.max {
            return Err(ConfigError::Inconsistent(
                "RELAY_BACKOFF_BASE_MS exceeds RELAY_BACKOFF_MAX_MS".to_string(),
            ));
        }

        let relay = RelayConfig {
            batch_size: env.positive("RELAY_BATCH_SIZE", 100)?,
            max_attempts: env.positive("RELAY_MAX_ATTEMPTS", 5)?,
            backoff,
            stale_after: env.secs("RELAY_STALE_AFTER_SECS", 300)?,
            breaker_skip_delay: Duration::from_millis(
                env.positive("RELAY_BREAKER_SKIP_DELAY_MS", 1_000u64)?,
            ),
            store_timeout,
            publish_timeout,
            poll_interval: env.millis("RELAY_POLL_INTERVAL_MS", 1_000)?,
            workers: env.positive("RELAY_WORKERS", 1)?,
        };
        if relay.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "RELAY_POLL_INTERVAL_MS",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        // a slow publish must not look abandoned to other workers
        if relay.stale_after <= publish_timeout + store_timeout {
            return Err(ConfigError::Inconsistent(
                "RELAY_STALE_AFTER_SECS must exceed PUBLISH_TIMEOUT_MS + STORE_TIMEOUT_MS"
                    .to_string(),
            ));
        }

        let breaker = CircuitBreakerConfig {
            failure_threshold: env.positive("BREAKER_FAILURE_THRESHOLD", 5)?,
            failure_window: env.secs("BREAKER_FAILURE_WINDOW_SECS", 60)?,
            cooldown: env.secs("BREAKER_COOLDOWN_SECS", 30)?,
            half_open_max_trials: env.positive("BREAKER_HALF_OPEN_TRIALS", 1)?,
            success_threshold: env.positive("BREAKER_SUCCESS_THRESHOLD", 1)?,
        };
        breaker.validate().map_err(ConfigError::Inconsistent)?;

        let jetstream = JetstreamConfig {
            url: env.string_or("NATS_URL", "nats://127.0.0.1:4222"),
            stream: env.string_or("NATS_STREAM", "OUTBOX"),
            subject_prefix: env.string_or("NATS_SUBJECT_PREFIX", "outbox"),
            duplicate_window: env.secs("NATS_DUPLICATE_WINDOW_SECS", 120)?,
            connect_timeout: env.secs("NATS_CONNECT_TIMEOUT_SECS", 10)?,
            max_payload_bytes: env.positive("MAX_PAYLOAD_BYTES", 1_048_576)?,
        };

        let log_format = match lookup("LOG_FORMAT") {
            None => LogFormat::default(),
            Some(value) => LogFormat::parse(&value).ok_or_else(|| ConfigError::Invalid {
                key: "LOG_FORMAT",
                value,
                reason: "expected json or pretty".to_string(),
            })?,
        };

        Ok(Config {
            database: DatabaseConfig {
                url: env.required("DATABASE_URL")?,
                max_connections: env.positive("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            http: HttpConfig {
                host: env.string_or("HTTP_HOST", "0.0.0.0"),
                port: env.parse_or("HTTP_PORT", 8080)?,
            },
            jetstream,
            relay,
            breaker,
            log_format,
            shutdown_grace: env.secs("SHUTDOWN_GRACE_SECS", 30)?,
        })
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(err) => Err(ConfigError::Invalid {
                key,
                reason: err.to_string(),
                value,
            }),
        }
    }

    fn positive<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default + Display,
        T::Err: Display,
    {
        let value = self.parse_or(key, default)?;
        if value == T::default() {
            return Err(ConfigError::Invalid {
                key,
                value: value.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(value)
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse_or(key, default).map(Duration::from_millis)
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse_or(key, default).map(Duration::from_secs)
    }
}
