//! Configuration for hosting clients.
//!
//! Clients are usually configured from a TOML file holding a `[hosting]`
//! table:
//!
//! ```toml
//! [hosting]
//! uri = "https://rpc.ote.gandi.net/xmlrpc/"
//! key = "0123456789abcdef"
//! ```
//!
//! `uri` falls back to [`DEFAULT_ENDPOINT`]. Without `key` no client can be
//! built from the file. Other tables are kept and can be read back with
//! [`HostingConfig::get_option`].

use crate::client::{DEFAULT_ENDPOINT, DEFAULT_TIMEOUT};
use crate::Error;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Name of the table holding client settings.
pub const HOSTING_SECTION: &str = "hosting";

/// Settings as they appear in the `[hosting]` table.
#[derive(Debug, Default, Deserialize)]
struct HostingSection {
    uri: Option<String>,
    key: Option<String>,
    timeout_secs: Option<u64>,
}

/// Configuration for a hosting client instance.
#[derive(Debug, Validate)]
pub struct HostingConfig {
    /// XML-RPC endpoint URL
    #[validate(url)]
    uri: String,

    /// API key injected in every call
    key: Option<SecretString>,

    /// Request timeout in seconds
    #[validate(range(min = 1, max = 300))]
    timeout_secs: u64,

    /// The whole parsed file
    table: toml::Table,
}

impl HostingConfig {
    /// Create a configuration for the default endpoint with the given key.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn new(key: impl Into<String>) -> Result<Self, Error> {
        let config = Self {
            uri: DEFAULT_ENDPOINT.to_string(),
            key: Some(SecretString::from(key.into())),
            timeout_secs: DEFAULT_TIMEOUT,
            table: toml::Table::new(),
        };

        config
            .validate()
            .map_err(|e| Error::ConfigError(format!("Invalid configuration: {e}")))?;

        Ok(config)
    }

    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML, the `[hosting]` table
    /// has the wrong shape or validation fails.
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let table: toml::Table = toml::from_str(text)?;

        let section = match table.get(HOSTING_SECTION) {
            Some(value) => value.clone().try_into::<HostingSection>()?,
            None => HostingSection::default(),
        };

        let config = Self {
            uri: section.uri.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            key: section.key.map(SecretString::from),
            timeout_secs: section.timeout_secs.unwrap_or(DEFAULT_TIMEOUT),
            table,
        };

        config
            .validate()
            .map_err(|e| Error::ConfigError(format!("Invalid configuration: {e}")))?;

        Ok(config)
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Override the endpoint.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Set request timeout in seconds.
    #[must_use]
    pub const fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }

    /// Endpoint URL as configured.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// API key, if configured.
    #[must_use]
    pub const fn key(&self) -> Option<&SecretString> {
        self.key.as_ref()
    }

    /// API key, failing when it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] when the file has no `hosting.key`.
    pub fn require_key(&self) -> Result<&SecretString, Error> {
        self.key.as_ref().ok_or_else(|| {
            Error::ConfigError(format!("missing `{HOSTING_SECTION}.key` option"))
        })
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Parse the endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn parse_uri(&self) -> Result<Url, Error> {
        Url::parse(&self.uri).map_err(|e| Error::ConfigError(format!("Invalid hosting URI: {e}")))
    }

    /// Look up any option of the file, `None` when the table or key is absent.
    #[must_use]
    pub fn get_option(&self, section: &str, option: &str) -> Option<&toml::Value> {
        self.table
            .get(section)
            .and_then(toml::Value::as_table)
            .and_then(|table| table.get(option))
    }
}
