// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Runtime configuration, taken from the process environment.
//!
//! The configuration is read once, when the default collaborators are constructed. Changing the
//! environment afterwards has no effect on keys that are already loaded.

use std::fmt;
use std::time::Duration;

/// Environment variable holding a ready-made bearer token, typically obtained with
/// `az account get-access-token`. When set, the managed identity endpoint is not contacted.
pub const ACCESS_TOKEN_VAR: &str = "AZURE_CLI_ACCESS_TOKEN";

/// Environment variable that overrides the managed identity token endpoint.
pub const IDENTITY_ENDPOINT_VAR: &str = "IDENTITY_ENDPOINT";

/// Environment variable that overrides the vault REST API version.
pub const API_VERSION_VAR: &str = "AKV_API_VERSION";

/// Environment variable that overrides the HTTP timeout, in whole seconds.
pub const HTTP_TIMEOUT_VAR: &str = "AKV_HTTP_TIMEOUT_SECS";

/// The Azure Instance Metadata Service token endpoint.
pub const DEFAULT_IDENTITY_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

pub const DEFAULT_API_VERSION: &str = "7.4";

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for the default credential provider and vault client.
#[derive(Clone)]
pub struct EngineConfig {
    pub access_token_override: Option<String>,
    pub identity_endpoint: String,
    pub api_version: String,
    pub http_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            access_token_override: None,
            identity_endpoint: String::from(DEFAULT_IDENTITY_ENDPOINT),
            api_version: String::from(DEFAULT_API_VERSION),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Reads the configuration from the process environment. Unset or empty variables fall back
    /// to the defaults.
    pub fn from_env() -> EngineConfig {
        EngineConfig::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> EngineConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let defaults = EngineConfig::default();

        let http_timeout = match get(HTTP_TIMEOUT_VAR) {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    log::warn!(
                        "Ignoring {}={:?}, using {} seconds.",
                        HTTP_TIMEOUT_VAR,
                        value,
                        defaults.http_timeout.as_secs()
                    );
                    defaults.http_timeout
                }
            },
            None => defaults.http_timeout,
        };

        EngineConfig {
            access_token_override: get(ACCESS_TOKEN_VAR),
            identity_endpoint: get(IDENTITY_ENDPOINT_VAR).unwrap_or(defaults.identity_endpoint),
            api_version: get(API_VERSION_VAR).unwrap_or(defaults.api_version),
            http_timeout,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field(
                "access_token_override",
                &self.access_token_override.as_ref().map(|_| "<redacted>"),
            )
            .field("identity_endpoint", &self.identity_endpoint)
            .field("api_version", &self.api_version)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> EngineConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert!(config.access_token_override.is_none());
        assert_eq!(config.identity_endpoint, DEFAULT_IDENTITY_ENDPOINT);
        assert_eq!(config.api_version, "7.4");
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            (ACCESS_TOKEN_VAR, "token"),
            (IDENTITY_ENDPOINT_VAR, "http://localhost:40342/metadata/identity/oauth2/token"),
            (API_VERSION_VAR, "7.3"),
            (HTTP_TIMEOUT_VAR, "5"),
        ]);
        assert_eq!(config.access_token_override.as_deref(), Some("token"));
        assert_eq!(
            config.identity_endpoint,
            "http://localhost:40342/metadata/identity/oauth2/token"
        );
        assert_eq!(config.api_version, "7.3");
        assert_eq!(config.http_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_empty_and_invalid_values_fall_back() {
        let config = config_from(&[(ACCESS_TOKEN_VAR, "  "), (HTTP_TIMEOUT_VAR, "soon")]);
        assert!(config.access_token_override.is_none());
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);

        let config = config_from(&[(HTTP_TIMEOUT_VAR, "0")]);
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
    }

    #[test]
    fn test_debug_hides_token() {
        let config = config_from(&[(ACCESS_TOKEN_VAR, "super-secret")]);
        assert!(!format!("{:?}", config).contains("super-secret"));
    }
}
