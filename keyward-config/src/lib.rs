//! Configuration management for Keyward services
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use config::ConfigError;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Message bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MessageBusConfig {
    pub url: String,
    pub stream_name: Option<String>,
    pub subject_prefix: Option<String>,
}

/// Key storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KeyStorageConfig {
    pub path: String,
    /// Hex encoded 32-byte key or a passphrase
    pub master_key: Option<String>,
}

/// Rotation orchestrator settings
#[derive(Debug, Clone, Deserialize)]
pub struct RotationSettings {
    pub max_concurrent_jobs: usize,
    pub scheduler_interval_secs: u64,
    pub job_retention_secs: u64,
    pub fetch_max_attempts: u32,
    pub fetch_retry_delay_ms: u64,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            scheduler_interval_secs: 3600,
            job_retention_secs: 300,
            fetch_max_attempts: 3,
            fetch_retry_delay_ms: 500,
        }
    }
}

/// Audit engine settings
#[derive(Debug, Clone, Deserialize)]
pub struct AuditSettings {
    pub buffer_capacity: usize,
    pub flush_interval_secs: u64,
    pub retention_days: u32,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 100,
            flush_interval_secs: 5,
            // Seven years
            retention_days: 2555,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Console,
    Json,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub message_bus: MessageBusConfig,
    pub database_url: Option<String>,
    pub key_storage: KeyStorageConfig,
    pub rotation: RotationSettings,
    pub audit: AuditSettings,
    pub log_level: Option<String>,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let message_bus_url = lookup("MESSAGE_BUS_URL")
            .unwrap_or_else(|| "nats://localhost:4222".to_string());

        let rotation_defaults = RotationSettings::default();
        let rotation = RotationSettings {
            max_concurrent_jobs: parse_or(
                &lookup,
                "ROTATION_MAX_CONCURRENT_JOBS",
                rotation_defaults.max_concurrent_jobs,
            )?,
            scheduler_interval_secs: parse_or(
                &lookup,
                "ROTATION_SCHEDULER_INTERVAL_SECS",
                rotation_defaults.scheduler_interval_secs,
            )?,
            job_retention_secs: parse_or(
                &lookup,
                "ROTATION_JOB_RETENTION_SECS",
                rotation_defaults.job_retention_secs,
            )?,
            fetch_max_attempts: parse_or(
                &lookup,
                "ROTATION_FETCH_MAX_ATTEMPTS",
                rotation_defaults.fetch_max_attempts,
            )?,
            fetch_retry_delay_ms: parse_or(
                &lookup,
                "ROTATION_FETCH_RETRY_DELAY_MS",
                rotation_defaults.fetch_retry_delay_ms,
            )?,
        };

        if rotation.max_concurrent_jobs == 0 {
            return Err(ConfigError::Message(
                "ROTATION_MAX_CONCURRENT_JOBS must be at least 1".to_string(),
            ));
        }

        let audit_defaults = AuditSettings::default();
        let audit = AuditSettings {
            buffer_capacity: parse_or(
                &lookup,
                "AUDIT_BUFFER_CAPACITY",
                audit_defaults.buffer_capacity,
            )?,
            flush_interval_secs: parse_or(
                &lookup,
                "AUDIT_FLUSH_INTERVAL_SECS",
                audit_defaults.flush_interval_secs,
            )?,
            retention_days: parse_or(
                &lookup,
                "AUDIT_RETENTION_DAYS",
                audit_defaults.retention_days,
            )?,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("console") => LogFormat::Console,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Message(format!(
                    "LOG_FORMAT must be 'console' or 'json', got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            message_bus: MessageBusConfig {
                url: message_bus_url,
                stream_name: lookup("MESSAGE_BUS_STREAM_NAME"),
                subject_prefix: Some(
                    lookup("MESSAGE_BUS_SUBJECT_PREFIX").unwrap_or_else(|| "keyward".to_string()),
                ),
            },
            database_url: lookup("DATABASE_URL"),
            key_storage: KeyStorageConfig {
                path: lookup("KEY_STORAGE_PATH").unwrap_or_else(|| "./keys".to_string()),
                master_key: lookup("KEYWARD_MASTER_KEY"),
            },
            rotation,
            audit,
            log_level: Some(lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string())),
            log_format,
        })
    }

    /// Get message bus URL
    pub fn message_bus_url(&self) -> &str {
        &self.message_bus.url
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            ConfigError::Message(format!("Invalid value for {}: '{}' ({})", name, raw, e))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.message_bus_url(), "nats://localhost:4222");
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.log_format, LogFormat::Console);
        assert_eq!(config.rotation.max_concurrent_jobs, 3);
        assert_eq!(config.rotation.fetch_max_attempts, 3);
        assert_eq!(config.audit.buffer_capacity, 100);
        assert_eq!(config.audit.flush_interval_secs, 5);
        assert_eq!(config.key_storage.path, "./keys");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_config_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("ROTATION_MAX_CONCURRENT_JOBS", "8"),
            ("AUDIT_BUFFER_CAPACITY", "250"),
            ("LOG_FORMAT", "json"),
            ("DATABASE_URL", "postgres://localhost/keyward"),
        ]))
        .unwrap();

        assert_eq!(config.rotation.max_concurrent_jobs, 8);
        assert_eq!(config.audit.buffer_capacity, 250);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/keyward")
        );
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = AppConfig::from_lookup(lookup_from(&[("AUDIT_FLUSH_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("AUDIT_FLUSH_INTERVAL_SECS"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("ROTATION_MAX_CONCURRENT_JOBS", "0")])).is_err());
    }
}
