use std::path::PathBuf;
use std::time::Duration;

use unsub_core::retry::RetryPolicy;

use crate::executor::AcquirePolicy;

/// An environment variable held a value that could not be used.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("{name} is invalid: {reason}")]
pub struct ConfigError {
    pub name: &'static str,
    pub reason: String,
}

/// Orchestrator, executor and background-loop settings.
///
/// Shared by the API server and the worker so both run the same policy
/// against the same store.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub retry: RetryPolicy,
    /// Automation session slots (default: `4`).
    pub automation_pool_size: usize,
    pub automation_acquire: AcquirePolicy,
    /// Wall-clock limit per automation attempt (default: 120s).
    pub automation_timeout: Duration,
    pub provider_api_base_url: String,
    pub provider_api_timeout: Duration,
    /// How often an open status stream re-reads the store (default: 2s).
    pub stream_poll_interval: Duration,
    /// `in_progress` requests untouched for this long are reaped (default: 15 min).
    pub stale_after: Duration,
    /// Pending-request dispatcher interval (default: 5s).
    pub dispatch_interval: Duration,
    /// JSON file seeding the subscription catalog; empty catalog when unset.
    pub catalog_path: Option<PathBuf>,
    /// How long a stopping process waits for each background loop (default: 30s).
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            automation_pool_size: 4,
            automation_acquire: AcquirePolicy::Wait(Duration::from_secs(30)),
            automation_timeout: Duration::from_secs(120),
            provider_api_base_url: "http://localhost:4010".to_string(),
            provider_api_timeout: Duration::from_secs(15),
            stream_poll_interval: Duration::from_millis(2000),
            stale_after: Duration::from_secs(900),
            dispatch_interval: Duration::from_secs(5),
            catalog_path: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                            | Default                 |
    /// |------------------------------------|-------------------------|
    /// | `CANCEL_MAX_ATTEMPTS`              | `3`                     |
    /// | `CANCEL_RETRY_INITIAL_MS`          | `1000`                  |
    /// | `CANCEL_RETRY_MAX_MS`              | `30000`                 |
    /// | `CANCEL_SESSION_RETRY_MS`          | `5000`                  |
    /// | `AUTOMATION_POOL_SIZE`             | `4`                     |
    /// | `AUTOMATION_ACQUIRE_POLICY`        | `wait`                  |
    /// | `AUTOMATION_ACQUIRE_TIMEOUT_SECS`  | `30`                    |
    /// | `AUTOMATION_TIMEOUT_SECS`          | `120`                   |
    /// | `PROVIDER_API_BASE_URL`            | `http://localhost:4010` |
    /// | `PROVIDER_API_TIMEOUT_SECS`        | `15`                    |
    /// | `STREAM_POLL_INTERVAL_MS`          | `2000`                  |
    /// | `STALE_AFTER_SECS`                 | `900`                   |
    /// | `DISPATCH_INTERVAL_SECS`           | `5`                     |
    /// | `SUBSCRIPTION_CATALOG_PATH`        | unset                   |
    /// | `SHUTDOWN_TIMEOUT_SECS`            | `30`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env(&lookup);

        let max_attempts: u32 = env.parse("CANCEL_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError {
                name: "CANCEL_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        let retry = RetryPolicy {
            max_attempts,
            initial_delay: env.millis("CANCEL_RETRY_INITIAL_MS", defaults.retry.initial_delay)?,
            max_delay: env.millis("CANCEL_RETRY_MAX_MS", defaults.retry.max_delay)?,
            session_retry_delay: env
                .millis("CANCEL_SESSION_RETRY_MS", defaults.retry.session_retry_delay)?,
            ..defaults.retry
        };

        let automation_pool_size: usize =
            env.parse("AUTOMATION_POOL_SIZE", defaults.automation_pool_size)?;
        if automation_pool_size == 0 {
            return Err(ConfigError {
                name: "AUTOMATION_POOL_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }

        let acquire_timeout = env.secs("AUTOMATION_ACQUIRE_TIMEOUT_SECS", Duration::from_secs(30))?;
        let automation_acquire = match lookup("AUTOMATION_ACQUIRE_POLICY").as_deref() {
            None | Some("wait") => AcquirePolicy::Wait(acquire_timeout),
            Some("fail_fast") => AcquirePolicy::FailFast,
            Some(other) => {
                return Err(ConfigError {
                    name: "AUTOMATION_ACQUIRE_POLICY",
                    reason: format!("expected 'wait' or 'fail_fast', got '{other}'"),
                })
            }
        };

        let stream_poll_interval =
            env.millis("STREAM_POLL_INTERVAL_MS", defaults.stream_poll_interval)?;
        let dispatch_interval = env.secs("DISPATCH_INTERVAL_SECS", defaults.dispatch_interval)?;
        for (name, value) in [
            ("STREAM_POLL_INTERVAL_MS", stream_poll_interval),
            ("DISPATCH_INTERVAL_SECS", dispatch_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError {
                    name,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        // A live attempt can go this long without touching its row.
        let automation_timeout = env.secs("AUTOMATION_TIMEOUT_SECS", defaults.automation_timeout)?;
        let session_wait = match automation_acquire {
            AcquirePolicy::Wait(wait) => wait,
            AcquirePolicy::FailFast => Duration::ZERO,
        };
        let longest_quiet = automation_timeout
            + session_wait
            + retry.max_delay.max(retry.session_retry_delay);
        let stale_after = env.secs("STALE_AFTER_SECS", defaults.stale_after)?;
        if stale_after <= longest_quiet {
            return Err(ConfigError {
                name: "STALE_AFTER_SECS",
                reason: format!(
                    "must exceed the automation timeout plus session wait and maximum backoff ({}s)",
                    longest_quiet.as_secs()
                ),
            });
        }

        Ok(Self {
            retry,
            automation_pool_size,
            automation_acquire,
            automation_timeout,
            provider_api_base_url: lookup("PROVIDER_API_BASE_URL")
                .unwrap_or(defaults.provider_api_base_url),
            provider_api_timeout: env
                .secs("PROVIDER_API_TIMEOUT_SECS", defaults.provider_api_timeout)?,
            stream_poll_interval,
            stale_after,
            dispatch_interval,
            catalog_path: lookup("SUBSCRIPTION_CATALOG_PATH").map(PathBuf::from),
            shutdown_timeout: env.secs("SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout)?,
        })
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
                name,
                reason: e.to_string(),
            }),
        }
    }

    fn millis(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let ms = self.parse(name, default.as_millis() as u64)?;
        Ok(Duration::from_millis(ms))
    }

    fn secs(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.parse(name, default.as_secs())?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<OrchestratorConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OrchestratorConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.automation_pool_size, 4);
        assert_eq!(
            config.automation_acquire,
            AcquirePolicy::Wait(Duration::from_secs(30))
        );
        assert_eq!(config.stream_poll_interval, Duration::from_secs(2));
        assert_eq!(config.stale_after, Duration::from_secs(900));
        assert!(config.catalog_path.is_none());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("CANCEL_MAX_ATTEMPTS", "5"),
            ("CANCEL_RETRY_INITIAL_MS", "250"),
            ("AUTOMATION_ACQUIRE_POLICY", "fail_fast"),
            ("STREAM_POLL_INTERVAL_MS", "500"),
            ("PROVIDER_API_BASE_URL", "https://provider.test"),
            ("SHUTDOWN_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.automation_acquire, AcquirePolicy::FailFast);
        assert_eq!(config.stream_poll_interval, Duration::from_millis(500));
        assert_eq!(config.provider_api_base_url, "https://provider.test");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = load(&[("AUTOMATION_POOL_SIZE", "many")]).unwrap_err();
        assert_eq!(err.name, "AUTOMATION_POOL_SIZE");

        let err = load(&[("CANCEL_MAX_ATTEMPTS", "0")]).unwrap_err();
        assert_eq!(err.name, "CANCEL_MAX_ATTEMPTS");

        let err = load(&[("STREAM_POLL_INTERVAL_MS", "0")]).unwrap_err();
        assert_eq!(err.name, "STREAM_POLL_INTERVAL_MS");

        let err = load(&[("AUTOMATION_ACQUIRE_POLICY", "sometimes")]).unwrap_err();
        assert_eq!(err.name, "AUTOMATION_ACQUIRE_POLICY");
    }

    #[test]
    fn stale_after_must_outlast_a_live_attempt() {
        // 120s timeout + 30s session wait + 30s max backoff.
        let err = load(&[("STALE_AFTER_SECS", "180")]).unwrap_err();
        assert_eq!(err.name, "STALE_AFTER_SECS");
        assert!(err.reason.contains("180s"), "{}", err.reason);

        let err = load(&[("STALE_AFTER_SECS", "300"), ("AUTOMATION_TIMEOUT_SECS", "400")])
            .unwrap_err();
        assert_eq!(err.name, "STALE_AFTER_SECS");

        let config = load(&[("STALE_AFTER_SECS", "181")]).unwrap();
        assert_eq!(config.stale_after, Duration::from_secs(181));

        // Without a session wait the bound drops by 30s.
        let config = load(&[
            ("STALE_AFTER_SECS", "151"),
            ("AUTOMATION_ACQUIRE_POLICY", "fail_fast"),
        ])
        .unwrap();
        assert_eq!(config.stale_after, Duration::from_secs(151));
    }
}
