// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for autoseq-server.
//!
//! Config is loaded from the `[autoseq-server]` section of `autoseq.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./autoseq.toml`
//! 3. `~/.config/autoseq/autoseq.toml`
//! 4. `/etc/autoseq/autoseq.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use autoseq_app::{ConfigError, ConfigFile};
use autoseq_core::controller::StageTimings;
use autoseq_core::AutomationState;
use serde::{Deserialize, Serialize};

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Nominal stage durations
    pub timings: TimingsConfig,
    /// Error recovery behavior
    pub recovery: RecoveryConfig,
    /// HTTP data source for the DataUpdate stage
    pub data: DataConfig,
    /// Run control
    pub run: RunConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
    /// Print every automation event as a JSON line on stdout
    pub json_events: bool,
}

/// Stage durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    pub idle_wait_ms: u64,
    pub initialize_ms: u64,
    pub data_update_ms: u64,
    pub start_process_ms: u64,
    pub processing_ms: u64,
    pub quality_check_ms: u64,
    pub data_report_ms: u64,
    pub complete_ms: u64,
    pub error_ms: u64,
    pub emergency_ms: u64,
    /// Pause between two dispatch cycles
    pub cycle_pause_ms: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self::from_stage_timings(&StageTimings::default())
    }
}

impl TimingsConfig {
    fn from_stage_timings(timings: &StageTimings) -> Self {
        let ms = |state| timings.stage(state).as_millis() as u64;
        Self {
            idle_wait_ms: ms(AutomationState::Idle),
            initialize_ms: ms(AutomationState::Initialize),
            data_update_ms: ms(AutomationState::DataUpdate),
            start_process_ms: ms(AutomationState::StartProcess),
            processing_ms: ms(AutomationState::Processing),
            quality_check_ms: ms(AutomationState::QualityCheck),
            data_report_ms: ms(AutomationState::DataReport),
            complete_ms: ms(AutomationState::Complete),
            error_ms: ms(AutomationState::Error),
            emergency_ms: ms(AutomationState::Emergency),
            cycle_pause_ms: timings.cycle_pause().as_millis() as u64,
        }
    }

    pub fn to_stage_timings(&self) -> StageTimings {
        [
            (AutomationState::Idle, self.idle_wait_ms),
            (AutomationState::Initialize, self.initialize_ms),
            (AutomationState::DataUpdate, self.data_update_ms),
            (AutomationState::StartProcess, self.start_process_ms),
            (AutomationState::Processing, self.processing_ms),
            (AutomationState::QualityCheck, self.quality_check_ms),
            (AutomationState::DataReport, self.data_report_ms),
            (AutomationState::Complete, self.complete_ms),
            (AutomationState::Error, self.error_ms),
            (AutomationState::Emergency, self.emergency_ms),
        ]
        .into_iter()
        .fold(
            StageTimings::default().with_cycle_pause(Duration::from_millis(self.cycle_pause_ms)),
            |timings, (state, ms)| timings.with_stage(state, Duration::from_millis(ms)),
        )
    }
}

/// Error recovery configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Recoveries allowed per run (0 = never recover)
    pub max_attempts: u32,
}

/// HTTP data source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Whether DataUpdate fetches from `url`
    pub enabled: bool,
    /// JSON document URL (http or https)
    pub url: Option<String>,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            timeout_ms: 10_000,
        }
    }
}

/// Run control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Start the automation as soon as the daemon is up
    pub auto_start: bool,
    /// Stop after this many completed cycles (0 = unlimited)
    pub max_cycles: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            max_cycles: 0,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.timings.cycle_pause_ms == 0 {
            return Err("[timings].cycle_pause_ms must be > 0".to_string());
        }

        if self.data.enabled {
            validate_url(self.data.url.as_deref())?;
            if self.data.timeout_ms == 0 {
                return Err("[data].timeout_ms must be > 0 when data is enabled".to_string());
            }
        }
        Ok(())
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        <Self as ConfigFile>::load_from_file(path)
    }

    /// Load configuration from the default search paths.
    /// Returns default config if no config file is found.
    pub fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        <Self as ConfigFile>::load_from_default_paths()
    }

    /// Generate an example configuration wrapped under the `[autoseq-server]`
    /// section header, suitable for use in a combined `autoseq.toml` file.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "autoseq-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
                json_events: false,
            },
            timings: TimingsConfig::default(),
            recovery: RecoveryConfig { max_attempts: 3 },
            data: DataConfig {
                enabled: false,
                url: Some("http://127.0.0.1:8080/setpoints.json".to_string()),
                timeout_ms: 10_000,
            },
            run: RunConfig::default(),
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

fn validate_url(url: Option<&str>) -> Result<(), String> {
    let url = url.unwrap_or("").trim();
    if url.is_empty() {
        return Err("[data].url must be set when data is enabled".to_string());
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(format!(
            "[data].url '{}' is invalid (expected an http:// or https:// URL)",
            url
        ));
    }
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "autoseq-server"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.general.log_level, None);
        assert!(!config.general.json_events);
        assert_eq!(config.timings.cycle_pause_ms, 50);
        assert_eq!(config.timings.idle_wait_ms, 100);
        assert_eq!(config.timings.processing_ms, 1000);
        assert_eq!(config.recovery.max_attempts, 0);
        assert!(!config.data.enabled);
        assert_eq!(config.data.timeout_ms, 10_000);
        assert!(config.run.auto_start);
        assert_eq!(config.run.max_cycles, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_timings_match_core() {
        assert_eq!(
            TimingsConfig::default().to_stage_timings(),
            StageTimings::default()
        );
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[timings]
processing_ms = 5000

[run]
max_cycles = 3
"#;

        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.timings.processing_ms, 5000);
        assert_eq!(config.timings.initialize_ms, 500);
        assert_eq!(config.run.max_cycles, 3);
        assert!(config.run.auto_start);

        let timings = config.timings.to_stage_timings();
        assert_eq!(
            timings.stage(AutomationState::Processing),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_parse_full_section() {
        let toml_str = r#"
[autoseq-server.general]
log_level = "debug"
json_events = true

[autoseq-server.timings]
cycle_pause_ms = 10
idle_wait_ms = 250

[autoseq-server.recovery]
max_attempts = 2

[autoseq-server.data]
enabled = true
url = "https://plant.example/setpoints"
timeout_ms = 1500

[autoseq-server.run]
auto_start = false
"#;

        let config = <ServerConfig as ConfigFile>::load_from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
        assert!(config.general.json_events);
        assert_eq!(config.timings.cycle_pause_ms, 10);
        assert_eq!(config.timings.idle_wait_ms, 250);
        assert_eq!(config.recovery.max_attempts, 2);
        assert!(config.data.enabled);
        assert_eq!(config.data.timeout_ms, 1500);
        assert!(!config.run.auto_start);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_combined_toml_parses() {
        let example = ServerConfig::example_combined_toml();
        assert!(example.contains("autoseq-server"));
        let config = <ServerConfig as ConfigFile>::load_from_str(&example).unwrap();
        assert_eq!(config.recovery.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = ServerConfig::default();
        config.general.log_level = Some("loud".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_cycle_pause() {
        let mut config = ServerConfig::default();
        config.timings.cycle_pause_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_data_source() {
        let mut config = ServerConfig::default();
        config.data.enabled = true;
        assert!(config.validate().is_err());

        config.data.url = Some("ftp://plant.example/setpoints".to_string());
        assert!(config.validate().is_err());

        config.data.url = Some("http://plant.example/setpoints".to_string());
        assert!(config.validate().is_ok());

        config.data.timeout_ms = 0;
        assert!(config.validate().is_err());

        config.data.enabled = false;
        assert!(config.validate().is_ok());
    }
}
