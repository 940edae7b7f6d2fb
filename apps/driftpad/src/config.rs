use std::time::Duration;

use crate::session::SessionTuning;

pub const DEFAULT_PORT: u16 = 9355;
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 4000;
/// Oldest host protocol revision this build still speaks.
pub const MIN_HOST_REVISION: u32 = 1;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: Option<String>,
    pub port: u16,
    pub connect_attempts: u32,
    pub connect_timeout: Duration,
    pub min_host_revision: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env_string("DRIFTPAD_HOST"),
            port: env_parsed("DRIFTPAD_PORT").unwrap_or(DEFAULT_PORT),
            connect_attempts: env_parsed("DRIFTPAD_CONNECT_ATTEMPTS")
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_CONNECT_ATTEMPTS),
            connect_timeout: Duration::from_millis(
                env_parsed("DRIFTPAD_CONNECT_TIMEOUT_MS").unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            min_host_revision: env_parsed("DRIFTPAD_MIN_HOST_REVISION")
                .unwrap_or(MIN_HOST_REVISION),
        }
    }

    pub fn session_tuning(&self) -> SessionTuning {
        SessionTuning {
            connect_attempts: self.connect_attempts,
            connect_timeout: self.connect_timeout,
        }
    }
}

fn env_string(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(var: &str) -> Option<T> {
    env_string(var).and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn unset_variables_fall_back_to_defaults() {
        assert_eq!(env_string("DRIFTPAD_TEST_UNSET_VAR"), None);
        assert_eq!(env_parsed::<u16>("DRIFTPAD_TEST_UNSET_VAR"), None);
        let config = Config::from_env();
        assert!(config.connect_attempts >= 1);
        assert!(config.connect_timeout > Duration::ZERO);
    }
}
