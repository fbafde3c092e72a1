use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::api::auth::REFRESH_PATH;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_refresh_path() -> String {
    REFRESH_PATH.to_string()
}

fn default_login_route() -> String {
    DEFAULT_LOGIN_ROUTE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Upper bound on a single call, refresh included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Where the UI goes after the session is torn down.
    #[serde(default = "default_login_route")]
    pub login_route: String,
    /// Credential file; in-memory store when absent.
    #[serde(default)]
    pub credential_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            refresh_path: default_refresh_path(),
            login_route: default_login_route(),
            credential_file: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let cfg: Config = serde_json::from_str(&raw).context("parsing JSON")?;
        cfg.validated()
    }

    /// `ARKIVE_API_URL`, `ARKIVE_TIMEOUT_SECS`, `ARKIVE_REFRESH_PATH`,
    /// `ARKIVE_LOGIN_ROUTE`, `ARKIVE_CREDENTIALS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        if let Some(url) = lookup("ARKIVE_API_URL") {
            cfg.api_url = url;
        }
        if let Some(secs) = lookup("ARKIVE_TIMEOUT_SECS") {
            cfg.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("ARKIVE_TIMEOUT_SECS is not a number: {}", secs))?;
        }
        if let Some(path) = lookup("ARKIVE_REFRESH_PATH") {
            cfg.refresh_path = path;
        }
        if let Some(route) = lookup("ARKIVE_LOGIN_ROUTE") {
            cfg.login_route = route;
        }
        cfg.credential_file = lookup("ARKIVE_CREDENTIALS").filter(|p| !p.trim().is_empty());
        cfg.validated()
    }

    fn validated(self) -> Result<Self> {
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be greater than zero");
        }
        if !self.refresh_path.starts_with('/') {
            anyhow::bail!("refresh_path must start with '/': {}", self.refresh_path);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_config_parsing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "api_url": "https://arkive.example.com/api",
                "timeout_secs": 10,
                "credential_file": "/tmp/arkive.json"
            }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.api_url, "https://arkive.example.com/api");
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.refresh_path, "/auth/refresh");
        assert_eq!(config.login_route, "/login");
        assert_eq!(config.credential_file.as_deref(), Some("/tmp/arkive.json"));
    }

    #[test]
    fn test_config_missing_file() {
        let result = Config::from_file("/nonexistent/path/config.json");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{invalid json").unwrap();

        let result = Config::from_file(file.path().to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"timeout_secs": 0}}"#).unwrap();

        assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_env_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("ARKIVE_API_URL", "http://api.test"),
            ("ARKIVE_TIMEOUT_SECS", " 5 "),
            ("ARKIVE_REFRESH_PATH", "/session/refresh"),
            ("ARKIVE_LOGIN_ROUTE", "/signin"),
            ("ARKIVE_CREDENTIALS", "creds.json"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "http://api.test");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.refresh_path, "/session/refresh");
        assert_eq!(config.login_route, "/signin");
        assert_eq!(config.credential_file.as_deref(), Some("creds.json"));
    }

    #[test]
    fn test_env_bad_timeout() {
        let result = Config::from_lookup(lookup_from(&[("ARKIVE_TIMEOUT_SECS", "soon")]));
        assert!(result.is_err());
    }
}
