//! Session configuration and its TOML file form.
//!
//! [`SessionConfig`] is what a session runs with. [`FileConfig`] is the
//! optional on-disk layer the CLI reads before applying command-line flags.
//!
//! ```toml
//! request_timeout_secs = 30
//! resource_timeout_secs = 3600
//!
//! [headers]
//! user-agent = "netsession/0.1"
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use thiserror::Error;

use crate::transport::Timeouts;

/// Default idle timeout for a request (60 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default upper bound for a whole resource transfer (7 days).
pub const DEFAULT_RESOURCE_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Maximum accepted `request_timeout_secs` in a config file.
const MAX_REQUEST_TIMEOUT_SECS: u64 = 3600;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file is not valid TOML or has unknown/mistyped keys.
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A timeout value is out of range.
    #[error("invalid config value for `{field}`: {value}. Expected range: 1..={max}")]
    InvalidTimeout {
        field: &'static str,
        value: u64,
        max: u64,
    },

    /// A default header has an invalid name or value.
    #[error("invalid default header `{name}`")]
    InvalidHeader { name: String },
}

/// Configuration shared by every task a session creates.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle timeout handed to the transport for each request.
    pub request_timeout: Duration,
    /// Total time budget handed to the transport for each request.
    pub resource_timeout: Duration,
    /// Headers merged into every request, overriding same-named request headers.
    pub additional_headers: HeaderMap,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            resource_timeout: Duration::from_secs(DEFAULT_RESOURCE_TIMEOUT_SECS),
            additional_headers: HeaderMap::new(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_resource_timeout(mut self, timeout: Duration) -> Self {
        self.resource_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.additional_headers.insert(name, value);
        self
    }

    /// The timeouts passed to the transport with each request.
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            request: self.request_timeout,
            resource: self.resource_timeout,
        }
    }
}

/// TOML-backed configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Idle request timeout in seconds (1..=3600).
    pub request_timeout_secs: Option<u64>,
    /// Whole-transfer timeout in seconds (1..=604800).
    pub resource_timeout_secs: Option<u64>,
    /// Default headers added to every request.
    pub headers: BTreeMap<String, String>,
}

impl FileConfig {
    /// Parses and validates a config file's contents.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for malformed TOML or out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates values against their accepted ranges.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_secs(
            "request_timeout_secs",
            self.request_timeout_secs,
            MAX_REQUEST_TIMEOUT_SECS,
        )?;
        validate_timeout_secs(
            "resource_timeout_secs",
            self.resource_timeout_secs,
            DEFAULT_RESOURCE_TIMEOUT_SECS,
        )?;
        self.header_map().map(|_| ())
    }

    /// Overlays this file's values onto `base`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHeader`] for unusable header entries.
    pub fn apply_to(&self, mut base: SessionConfig) -> Result<SessionConfig, ConfigError> {
        if let Some(secs) = self.request_timeout_secs {
            base.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.resource_timeout_secs {
            base.resource_timeout = Duration::from_secs(secs);
        }
        for (name, value) in self.header_map()? {
            if let Some(name) = name {
                base.additional_headers.insert(name, value);
            }
        }
        Ok(base)
    }

    fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let invalid = || ConfigError::InvalidHeader { name: name.clone() };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

fn validate_timeout_secs(field: &'static str, value: Option<u64>, max: u64) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=max).contains(&value) {
        return Err(ConfigError::InvalidTimeout { field, value, max });
    }
    Ok(())
}
