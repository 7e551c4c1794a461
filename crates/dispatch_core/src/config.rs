//! Engine configuration.
//!
//! Defaults come from [`DispatchConfig::default`]; a YAML or TOML file and
//! `DISPATCH_`-prefixed environment variables are merged on top by
//! [`DispatchConfig::from_path`].

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::UserId;
use crate::routing::RouteProviderKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Sleep between dispatch loop ticks.
    pub tick_interval_ms: u64,
    /// Waypoints consumed per unit per tick.
    pub speed_factor: usize,
    /// Units farther than this from an incident are never matched to it.
    pub dispatch_radius_km: f64,
    /// Concurrent per-type matching passes.
    pub match_workers: usize,
    /// User recorded on assignments made by the matcher.
    pub dispatcher_user_id: UserId,
    pub commit_attempts: u32,
    /// First retry delay; doubles on every further retry.
    pub commit_backoff_ms: u64,
    /// Simulated on-scene work is drawn uniformly from `[work_min_ms, work_max_ms]`.
    pub work_min_ms: u64,
    pub work_max_ms: u64,
    pub escalation_interval_ms: u64,
    /// Pending incidents older than this are escalated.
    pub overdue_threshold_ms: u64,
    pub escalation_enabled: bool,
    pub location_broadcast_interval_ms: u64,
    /// Fast locations older than this fall back to the stored position. Unset
    /// means fast locations are always trusted.
    pub location_max_age_ms: Option<u64>,
    pub seed: Option<u64>,
    pub route_provider: RouteProviderKind,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            speed_factor: 5,
            dispatch_radius_km: 50.0,
            match_workers: 3,
            dispatcher_user_id: UserId(1),
            commit_attempts: 3,
            commit_backoff_ms: 100,
            work_min_ms: 1_000,
            work_max_ms: 5_000,
            escalation_interval_ms: 10_000,
            overdue_threshold_ms: 120_000,
            escalation_enabled: true,
            location_broadcast_interval_ms: 1_000,
            location_max_age_ms: None,
            seed: None,
            route_provider: RouteProviderKind::default(),
        }
    }
}

impl DispatchConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let figment = Figment::from(Serialized::defaults(DispatchConfig::default()));
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => figment.merge(Toml::file(path)),
            _ => figment.merge(Yaml::file(path)),
        };
        let config: DispatchConfig = figment
            .merge(Env::prefixed("DISPATCH_"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be positive");
        }
        if self.speed_factor == 0 {
            return invalid("speed_factor must be at least 1");
        }
        if !(self.dispatch_radius_km.is_finite() && self.dispatch_radius_km > 0.0) {
            return invalid("dispatch_radius_km must be a positive number");
        }
        if self.match_workers == 0 {
            return invalid("match_workers must be at least 1");
        }
        if self.commit_attempts == 0 {
            return invalid("commit_attempts must be at least 1");
        }
        if self.work_min_ms > self.work_max_ms {
            return Err(ConfigError::Invalid(format!(
                "work_min_ms ({}) exceeds work_max_ms ({})",
                self.work_min_ms, self.work_max_ms
            )));
        }
        if self.escalation_interval_ms == 0 || self.location_broadcast_interval_ms == 0 {
            return invalid("periodic task intervals must be positive");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn commit_backoff(&self) -> Duration {
        Duration::from_millis(self.commit_backoff_ms)
    }

    pub fn escalation_interval(&self) -> Duration {
        Duration::from_millis(self.escalation_interval_ms)
    }

    pub fn location_broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.location_broadcast_interval_ms)
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_speed_factor(mut self, speed_factor: usize) -> Self {
        self.speed_factor = speed_factor;
        self
    }

    pub fn with_dispatch_radius_km(mut self, radius_km: f64) -> Self {
        self.dispatch_radius_km = radius_km;
        self
    }

    pub fn with_match_workers(mut self, workers: usize) -> Self {
        self.match_workers = workers;
        self
    }

    pub fn with_dispatcher_user(mut self, user_id: UserId) -> Self {
        self.dispatcher_user_id = user_id;
        self
    }

    /// Retry policy for assignment commits.
    pub fn with_commit_retry(mut self, attempts: u32, initial_backoff: Duration) -> Self {
        self.commit_attempts = attempts;
        self.commit_backoff_ms = initial_backoff.as_millis() as u64;
        self
    }

    /// Simulated on-scene work window.
    pub fn with_work_duration(mut self, min: Duration, max: Duration) -> Self {
        self.work_min_ms = min.as_millis() as u64;
        self.work_max_ms = max.as_millis() as u64;
        self
    }

    pub fn with_escalation(mut self, interval: Duration, overdue_threshold: Duration) -> Self {
        self.escalation_interval_ms = interval.as_millis() as u64;
        self.overdue_threshold_ms = overdue_threshold.as_millis() as u64;
        self
    }

    pub fn with_escalation_enabled(mut self, enabled: bool) -> Self {
        self.escalation_enabled = enabled;
        self
    }

    pub fn with_location_broadcast_interval(mut self, interval: Duration) -> Self {
        self.location_broadcast_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_location_max_age(mut self, max_age: Duration) -> Self {
        self.location_max_age_ms = Some(max_age.as_millis() as u64);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_route_provider(mut self, kind: RouteProviderKind) -> Self {
        self.route_provider = kind;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = DispatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.speed_factor, 5);
        assert_eq!(config.overdue_threshold_ms, 120_000);
        assert!(config.location_max_age_ms.is_none());
    }

    #[test]
    fn inverted_work_window_is_rejected() {
        let config = DispatchConfig::default()
            .with_work_duration(Duration::from_secs(5), Duration::from_secs(1));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("tempfile");
        writeln!(file, "tick_interval_ms: 250\nspeed_factor: 2\nlocation_max_age_ms: 3000")
            .expect("write");

        let config = DispatchConfig::from_path(file.path()).expect("load");
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.speed_factor, 2);
        assert_eq!(config.location_max_age_ms, Some(3_000));
        assert_eq!(config.match_workers, 3);
    }

    #[test]
    fn toml_file_is_validated() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(file, "match_workers = 0").expect("write");

        let err = DispatchConfig::from_path(file.path()).expect_err("invalid");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
