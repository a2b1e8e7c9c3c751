use std::time::Duration;

use madsea_backend::poller::PollConfig;
use madsea_core::broadcast::OverridePolicy;

/// A configuration variable was present but unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} is required")]
    Missing(&'static str),
}

/// Session configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local backend.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend base URL (default: `http://localhost:5000/api`).
    pub api_url: String,
    /// Interval between status polls (default: 2s).
    pub poll_interval: Duration,
    /// Consecutive failed polls before a job is abandoned (default: `10`).
    pub poll_max_failures: u32,
    /// Ceiling for the backoff between failed polls (default: 30s).
    pub poll_max_backoff: Duration,
    /// Per-request HTTP timeout (default: 30s).
    pub request_timeout: Duration,
    /// Project sent with generation and autosave requests.
    pub project_id: Option<String>,
    /// How broadcasts treat per-scene edits (default: `broadcast_wins`).
    pub override_policy: OverridePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".into(),
            poll_interval: Duration::from_millis(2000),
            poll_max_failures: 10,
            poll_max_backoff: Duration::from_millis(30_000),
            request_timeout: Duration::from_secs(30),
            project_id: None,
            override_policy: OverridePolicy::BroadcastWins,
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                     |
    /// |-------------------------------|-----------------------------|
    /// | `MADSEA_API_URL`              | `http://localhost:5000/api` |
    /// | `MADSEA_POLL_INTERVAL_MS`     | `2000`                      |
    /// | `MADSEA_POLL_MAX_FAILURES`    | `10`                        |
    /// | `MADSEA_POLL_MAX_BACKOFF_MS`  | `30000`                     |
    /// | `MADSEA_REQUEST_TIMEOUT_SECS` | `30`                        |
    /// | `MADSEA_PROJECT_ID`           | unset                       |
    /// | `MADSEA_OVERRIDE_POLICY`      | `broadcast_wins`            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = var("MADSEA_API_URL").unwrap_or(defaults.api_url);

        let poll_interval = match var("MADSEA_POLL_INTERVAL_MS") {
            Some(v) => Duration::from_millis(parse_positive("MADSEA_POLL_INTERVAL_MS", &v)?),
            None => defaults.poll_interval,
        };

        let poll_max_failures = match var("MADSEA_POLL_MAX_FAILURES") {
            Some(v) => parse_positive("MADSEA_POLL_MAX_FAILURES", &v)? as u32,
            None => defaults.poll_max_failures,
        };

        let poll_max_backoff = match var("MADSEA_POLL_MAX_BACKOFF_MS") {
            Some(v) => Duration::from_millis(parse_positive("MADSEA_POLL_MAX_BACKOFF_MS", &v)?),
            None => defaults.poll_max_backoff,
        };

        let request_timeout = match var("MADSEA_REQUEST_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_positive("MADSEA_REQUEST_TIMEOUT_SECS", &v)?),
            None => defaults.request_timeout,
        };

        let override_policy = match var("MADSEA_OVERRIDE_POLICY").as_deref() {
            None | Some("broadcast_wins") => OverridePolicy::BroadcastWins,
            Some("preserve_overrides") => OverridePolicy::PreserveOverrides,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "MADSEA_OVERRIDE_POLICY",
                    expected: "broadcast_wins or preserve_overrides",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            api_url,
            poll_interval,
            poll_max_failures,
            poll_max_backoff,
            request_timeout,
            project_id: var("MADSEA_PROJECT_ID"),
            override_policy,
        })
    }

    /// Poller settings derived from this config.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            max_consecutive_failures: self.poll_max_failures,
            max_backoff: self.poll_max_backoff.max(self.poll_interval),
            ..PollConfig::default()
        }
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 && n <= u64::from(u32::MAX) => Ok(n),
        _ => Err(ConfigError::Invalid {
            var,
            expected: "a positive integer",
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<SessionConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SessionConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api_url, "http://localhost:5000/api");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.poll_max_failures, 10);
        assert_eq!(config.override_policy, OverridePolicy::BroadcastWins);
        assert!(config.project_id.is_none());
    }

    #[test]
    fn overrides_are_read() {
        let config = load(&[
            ("MADSEA_API_URL", "http://gpu-box:7801/api"),
            ("MADSEA_POLL_INTERVAL_MS", "500"),
            ("MADSEA_PROJECT_ID", "proj-7"),
            ("MADSEA_OVERRIDE_POLICY", "preserve_overrides"),
        ])
        .unwrap();
        assert_eq!(config.api_url, "http://gpu-box:7801/api");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.project_id.as_deref(), Some("proj-7"));
        assert_eq!(config.override_policy, OverridePolicy::PreserveOverrides);
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = load(&[("MADSEA_PROJECT_ID", ""), ("MADSEA_POLL_MAX_FAILURES", " ")]).unwrap();
        assert!(config.project_id.is_none());
        assert_eq!(config.poll_max_failures, 10);
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = load(&[("MADSEA_POLL_INTERVAL_MS", "fast")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "MADSEA_POLL_INTERVAL_MS", .. });

        let err = load(&[("MADSEA_POLL_MAX_FAILURES", "0")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { .. });
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = load(&[("MADSEA_OVERRIDE_POLICY", "merge")]).unwrap_err();
        assert!(err.to_string().contains("preserve_overrides"));
    }

    #[test]
    fn poll_config_backoff_never_below_interval() {
        let config = load(&[
            ("MADSEA_POLL_INTERVAL_MS", "5000"),
            ("MADSEA_POLL_MAX_BACKOFF_MS", "1000"),
        ])
        .unwrap();
        assert_eq!(config.poll_config().max_backoff, Duration::from_secs(5));
    }
}
