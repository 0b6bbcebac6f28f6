//! Runtime configuration, read from `SLOTWISE_*` environment variables.
//!
//! | variable | default |
//! |---|---|
//! | `SLOTWISE_DATA_DIR` | `./data` |
//! | `SLOTWISE_UTC_OFFSET_MINUTES` | `540` (UTC+09:00) |
//! | `SLOTWISE_BUSINESS_OPEN` / `SLOTWISE_BUSINESS_CLOSE` | `09:00` / `18:00` |
//! | `SLOTWISE_GRANULARITY_MINUTES` | `10` |
//! | `SLOTWISE_MIN_DURATION_MINUTES` / `SLOTWISE_MAX_DURATION_MINUTES` | `60` / `540` |
//! | `SLOTWISE_MAX_CAPACITY` | `3` |
//! | `SLOTWISE_COUNT_CANCELLED` | `true` |
//! | `SLOTWISE_COMPACT_THRESHOLD` | `1000` |
//! | `SLOTWISE_REMINDER_INTERVAL_SECS` | `60` |
//! | `SLOTWISE_METRICS_PORT` | unset (exporter off) |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::ScheduleError;
use crate::policy::SchedulePolicy;
use crate::time::{parse_time, BusinessHours, OperatingZone};

const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
const DEFAULT_REMINDER_INTERVAL_SECS: u64 = 60;
const COMPACT_CHECK_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}")]
    Parse { key: &'static str, value: String },
    #[error("{key}: {source}")]
    Schedule {
        key: &'static str,
        #[source]
        source: ScheduleError,
    },
    #[error("{key}: must be greater than zero")]
    Zero { key: &'static str },
    #[error("duration bounds: minimum {min} exceeds maximum {max}")]
    DurationBounds { min: u32, max: u32 },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub policy: SchedulePolicy,
    pub compact_threshold: u64,
    pub compact_check_period: Duration,
    pub reminder_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            policy: SchedulePolicy::default(),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            compact_check_period: COMPACT_CHECK_PERIOD,
            reminder_interval: Duration::from_secs(DEFAULT_REMINDER_INTERVAL_SECS),
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();
        let policy = &mut config.policy;

        if let Some(dir) = get("SLOTWISE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(minutes) = parsed::<i32>(&get, "SLOTWISE_UTC_OFFSET_MINUTES")? {
            policy.zone = OperatingZone::from_offset_minutes(minutes).map_err(|source| {
                ConfigError::Schedule {
                    key: "SLOTWISE_UTC_OFFSET_MINUTES",
                    source,
                }
            })?;
        }

        let open = time_of(&get, "SLOTWISE_BUSINESS_OPEN")?;
        let close = time_of(&get, "SLOTWISE_BUSINESS_CLOSE")?;
        if open.is_some() || close.is_some() {
            let open = open.unwrap_or(policy.hours.open_minute());
            let close = close.unwrap_or(policy.hours.close_minute());
            policy.hours = BusinessHours::from_minutes(open, close).map_err(|source| {
                ConfigError::Schedule {
                    key: "SLOTWISE_BUSINESS_CLOSE",
                    source,
                }
            })?;
        }

        if let Some(v) = positive(&get, "SLOTWISE_GRANULARITY_MINUTES")? {
            policy.granularity_minutes = v;
        }
        if let Some(v) = positive(&get, "SLOTWISE_MIN_DURATION_MINUTES")? {
            policy.min_duration_minutes = v;
        }
        if let Some(v) = positive(&get, "SLOTWISE_MAX_DURATION_MINUTES")? {
            policy.max_duration_minutes = v;
        }
        if policy.min_duration_minutes > policy.max_duration_minutes {
            return Err(ConfigError::DurationBounds {
                min: policy.min_duration_minutes,
                max: policy.max_duration_minutes,
            });
        }
        if let Some(v) = positive(&get, "SLOTWISE_MAX_CAPACITY")? {
            policy.max_capacity = v;
        }
        if let Some(v) = get("SLOTWISE_COUNT_CANCELLED") {
            policy.count_cancelled_toward_capacity = parse_flag(&v).ok_or(ConfigError::Parse {
                key: "SLOTWISE_COUNT_CANCELLED",
                value: v,
            })?;
        }

        if let Some(v) = parsed(&get, "SLOTWISE_COMPACT_THRESHOLD")? {
            config.compact_threshold = v;
        }
        if let Some(secs) = parsed::<u64>(&get, "SLOTWISE_REMINDER_INTERVAL_SECS")? {
            if secs == 0 {
                return Err(ConfigError::Zero {
                    key: "SLOTWISE_REMINDER_INTERVAL_SECS",
                });
            }
            config.reminder_interval = Duration::from_secs(secs);
        }
        config.metrics_port = parsed(&get, "SLOTWISE_METRICS_PORT")?;

        Ok(config)
    }
}

fn parsed<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(key)
        .map(|v| v.trim().parse().map_err(|_| ConfigError::Parse { key, value: v }))
        .transpose()
}

fn positive(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u32>, ConfigError> {
    match parsed::<u32>(get, key)? {
        Some(0) => Err(ConfigError::Zero { key }),
        other => Ok(other),
    }
}

/// `HH:MM` as minutes after midnight; `24:00` is accepted as a closing time.
fn time_of(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u32>, ConfigError> {
    let Some(v) = get(key) else { return Ok(None) };
    if v.trim() == "24:00" {
        return Ok(Some(24 * 60));
    }
    let t = parse_time(&v).map_err(|source| ConfigError::Schedule { key, source })?;
    Ok(Some(chrono::Timelike::hour(&t) * 60 + chrono::Timelike::minute(&t)))
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
