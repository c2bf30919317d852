//! Environment-driven engine configuration
//!
//! Values are read from `KUMO_*` variables (a `.env` file is honoured through
//! dotenvy). Anything unset falls back to the defaults below; anything set but
//! unparsable is a configuration error and aborts startup.

use crate::shared::errors::{AppError, AppResult};
use chrono_tz::Tz;
use std::str::FromStr;
use std::time::Duration;

/// Cron expressions for the recurring background units
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    pub library_refresh: String,
    pub maintenance: String,
    pub statistics: String,
    pub external_sync: String,
    pub timezone: Tz,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            library_refresh: "0 */6 * * *".to_string(),
            maintenance: "0 3 * * *".to_string(),
            statistics: "*/30 * * * *".to_string(),
            external_sync: "*/15 * * * *".to_string(),
            timezone: Tz::UTC,
        }
    }
}

/// Base URLs of the shipped agents
#[derive(Debug, Clone, PartialEq)]
pub struct AgentHosts {
    pub mangadex: String,
    pub anilist: String,
    pub mangaupdates: String,
    pub kitsu: String,
}

impl Default for AgentHosts {
    fn default() -> Self {
        Self {
            mangadex: "https://api.mangadex.org".to_string(),
            anilist: "https://graphql.anilist.co".to_string(),
            mangaupdates: "https://api.mangaupdates.com/v1".to_string(),
            kitsu: "https://kitsu.io/api/edge".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Lane engine tick period
    pub queue_tick_interval: Duration,
    /// Max finished jobs kept in a queue's completed/errors lanes
    pub finished_lane_retention: usize,
    /// Pause before the single retry of a failed agent call
    pub fanout_retry_delay: Duration,
    /// TTL for cached agent responses
    pub agent_cache_ttl: Duration,
    pub breaker_window: Duration,
    pub breaker_threshold: usize,
    pub breaker_cooldown: Duration,
    /// Finished job records older than this are pruned by the maintenance sweep
    pub job_retention: chrono::Duration,
    /// Agent ids to register; empty means all shipped agents
    pub enabled_agents: Vec<String>,
    pub hosts: AgentHosts,
    /// Token for pushing reading progress to AniList; scrobbling is off without it
    pub anilist_token: Option<String>,
    pub schedules: ScheduleConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_tick_interval: Duration::from_secs(5),
            finished_lane_retention: 500,
            fanout_retry_delay: Duration::from_millis(500),
            agent_cache_ttl: Duration::from_secs(3600),
            breaker_window: Duration::from_secs(600),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(600),
            job_retention: chrono::Duration::days(14),
            enabled_agents: Vec::new(),
            hosts: AgentHosts::default(),
            anilist_token: None,
            schedules: ScheduleConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment (and `.env` if present)
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (used by tests)
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let millis = |key: &str, default: Duration| -> AppResult<Duration> {
            parse_or(&lookup, key, default.as_millis() as u64).map(Duration::from_millis)
        };
        let secs = |key: &str, default: Duration| -> AppResult<Duration> {
            parse_or(&lookup, key, default.as_secs()).map(Duration::from_secs)
        };
        let text = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let timezone = match lookup("KUMO_SCHEDULER_TZ") {
            Some(raw) => Tz::from_str(raw.trim()).map_err(|e| {
                AppError::ConfigError(format!("KUMO_SCHEDULER_TZ '{}': {}", raw, e))
            })?,
            None => defaults.schedules.timezone,
        };

        let retention_days: i64 = parse_or(
            &lookup,
            "KUMO_JOB_RETENTION_DAYS",
            defaults.job_retention.num_days(),
        )?;

        let enabled_agents = lookup("KUMO_AGENTS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            queue_tick_interval: millis("KUMO_QUEUE_TICK_MS", defaults.queue_tick_interval)?,
            finished_lane_retention: parse_or(
                &lookup,
                "KUMO_QUEUE_RETENTION",
                defaults.finished_lane_retention,
            )?,
            fanout_retry_delay: millis("KUMO_FANOUT_RETRY_DELAY_MS", defaults.fanout_retry_delay)?,
            agent_cache_ttl: secs("KUMO_AGENT_CACHE_TTL_SECS", defaults.agent_cache_ttl)?,
            breaker_window: secs("KUMO_BREAKER_WINDOW_SECS", defaults.breaker_window)?,
            breaker_threshold: parse_or(
                &lookup,
                "KUMO_BREAKER_THRESHOLD",
                defaults.breaker_threshold,
            )?,
            breaker_cooldown: secs("KUMO_BREAKER_COOLDOWN_SECS", defaults.breaker_cooldown)?,
            job_retention: chrono::Duration::days(retention_days),
            enabled_agents,
            hosts: AgentHosts {
                mangadex: text("KUMO_MANGADEX_HOST", &defaults.hosts.mangadex),
                anilist: text("KUMO_ANILIST_HOST", &defaults.hosts.anilist),
                mangaupdates: text("KUMO_MANGAUPDATES_HOST", &defaults.hosts.mangaupdates),
                kitsu: text("KUMO_KITSU_HOST", &defaults.hosts.kitsu),
            },
            anilist_token: lookup("KUMO_ANILIST_TOKEN")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            schedules: ScheduleConfig {
                library_refresh: text("KUMO_CRON_LIBRARY_REFRESH", &defaults.schedules.library_refresh),
                maintenance: text("KUMO_CRON_MAINTENANCE", &defaults.schedules.maintenance),
                statistics: text("KUMO_CRON_STATISTICS", &defaults.schedules.statistics),
                external_sync: text("KUMO_CRON_EXTERNAL_SYNC", &defaults.schedules.external_sync),
                timezone,
            },
        })
    }

    /// Whether the given agent should be registered
    pub fn agent_enabled(&self, agent_id: &str) -> bool {
        self.enabled_agents.is_empty() || self.enabled_agents.iter().any(|a| a == agent_id)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| AppError::ConfigError(format!("{} '{}': {}", key, raw, e))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.queue_tick_interval, Duration::from_secs(5));
        assert_eq!(config.breaker_threshold, 5);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("KUMO_QUEUE_TICK_MS", "250"),
            ("KUMO_AGENTS", "MangaDex, anilist"),
            ("KUMO_SCHEDULER_TZ", "Europe/Rome"),
            ("KUMO_CRON_MAINTENANCE", "0 4 * * *"),
        ]))
        .unwrap();

        assert_eq!(config.queue_tick_interval, Duration::from_millis(250));
        assert!(config.agent_enabled("mangadex"));
        assert!(config.agent_enabled("anilist"));
        assert!(!config.agent_enabled("kitsu"));
        assert_eq!(config.schedules.timezone, chrono_tz::Europe::Rome);
        assert_eq!(config.schedules.maintenance, "0 4 * * *");
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let result = EngineConfig::from_lookup(lookup_from(&[("KUMO_QUEUE_TICK_MS", "soon")]));
        assert!(matches!(result, Err(AppError::ConfigError(_))));

        let result = EngineConfig::from_lookup(lookup_from(&[("KUMO_SCHEDULER_TZ", "Mars/Olympus")]));
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
