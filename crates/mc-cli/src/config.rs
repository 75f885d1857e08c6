use std::env;
use std::time::Duration;

use mc_client::ControllerSettings;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_root: String,
    pub csrf_token: String,
    pub session_cookie: Option<String>,
    pub poll_delay: Duration,
    pub tick_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };
        let millis = |name: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match lookup(name) {
                None => Ok(Duration::from_millis(default)),
                Some(value) => match value.trim().parse::<u64>() {
                    Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
                    _ => Err(ConfigError::Invalid {
                        name,
                        expected: "a positive number of milliseconds",
                        value,
                    }),
                },
            }
        };

        Ok(Self {
            api_root: required("MACHINES_API_ROOT")?,
            csrf_token: required("MACHINES_CSRF_TOKEN")?,
            session_cookie: lookup("MACHINES_SESSION_COOKIE").filter(|v| !v.is_empty()),
            poll_delay: millis("MACHINES_POLL_DELAY_MS", 5000)?,
            tick_interval: millis("MACHINES_TICK_INTERVAL_MS", 300)?,
        })
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            poll_delay: self.poll_delay,
            tick_interval: self.tick_interval,
        }
    }
}
