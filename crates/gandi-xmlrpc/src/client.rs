//! Asynchronous XML-RPC client for the hosting endpoint.

use crate::codec::{decode_response, encode_call};
use crate::gateway::Gateway;
use crate::Result;
use async_trait::async_trait;
use gandi_core::client::{ClientConfig, DEFAULT_ENDPOINT};
use gandi_core::config::HostingConfig;
use gandi_core::{Error, Value};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("gandi-xmlrpc/", env!("CARGO_PKG_VERSION"));

/// Builder for [`XmlRpcClient`].
#[derive(Debug)]
pub struct XmlRpcClientBuilder {
    endpoint: Url,
    api_key: SecretString,
    http_config: ClientConfig,
    user_agent: String,
}

impl XmlRpcClientBuilder {
    /// Create a builder for the given endpoint and API key.
    pub fn new(endpoint: impl AsRef<str>, api_key: impl Into<String>) -> Result<Self> {
        let url = Url::parse(endpoint.as_ref()).map_err(|err| {
            Error::ConfigError(format!(
                "Invalid hosting endpoint `{}`: {err}",
                endpoint.as_ref()
            ))
        })?;

        Ok(Self {
            endpoint: url,
            api_key: SecretString::from(api_key.into()),
            http_config: ClientConfig::new(),
            user_agent: USER_AGENT.to_string(),
        })
    }

    /// Create a builder for the default endpoint.
    pub fn with_default_endpoint(api_key: impl Into<String>) -> Result<Self> {
        Self::new(DEFAULT_ENDPOINT, api_key)
    }

    /// Create a builder from a loaded configuration file.
    ///
    /// Fails when the configuration has no API key.
    pub fn from_config(config: &HostingConfig) -> Result<Self> {
        let key = config.require_key()?.expose_secret().to_string();
        let builder = Self::new(config.uri(), key)?;
        let http_config = builder.http_config.clone().with_timeout(config.timeout());
        Ok(builder.with_http_config(http_config))
    }

    /// Override the HTTP client configuration.
    #[must_use]
    pub fn with_http_config(mut self, config: ClientConfig) -> Self {
        self.http_config = config;
        self
    }

    /// Override the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<XmlRpcClient> {
        let mut builder = ClientBuilder::new()
            .timeout(self.http_config.timeout)
            .user_agent(self.user_agent)
            .pool_idle_timeout(self.http_config.pool_idle_timeout)
            .pool_max_idle_per_host(self.http_config.pool_max_idle_per_host)
            .connect_timeout(self.http_config.connect_timeout);

        if !self.http_config.enable_compression {
            builder = builder.no_gzip();
        }

        let http = builder.build().map_err(|err| {
            Error::ConfigError(format!("Failed to build hosting HTTP client: {err}"))
        })?;

        Ok(XmlRpcClient {
            http,
            endpoint: self.endpoint,
            api_key: self.api_key,
        })
    }
}

/// XML-RPC client that authenticates every call with the API key.
pub struct XmlRpcClient {
    http: Client,
    endpoint: Url,
    api_key: SecretString,
}

impl XmlRpcClient {
    /// Construct directly from an endpoint and API key.
    pub fn new(endpoint: impl AsRef<str>, api_key: impl Into<String>) -> Result<Self> {
        XmlRpcClientBuilder::new(endpoint, api_key)?.build()
    }

    /// Access the endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Gateway for XmlRpcClient {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(Value::String(self.api_key.expose_secret().to_string()));
        params.extend(args);

        debug!(method, "hosting call");

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "text/xml")
            .body(encode_call(method, &params))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.map_err(|err| {
            Error::HttpError(format!("Failed to read response to `{method}`: {err}"))
        })?;

        if !status.is_success() {
            return Err(map_status_to_error(status, text));
        }

        decode_response(&text)
    }
}

fn map_status_to_error(status: StatusCode, text: String) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(text),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::InvalidRequest(format!("Hosting authentication failed: {text}"))
        }
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => {
            Error::ServiceUnavailable(format!("Hosting API temporarily unavailable: {text}"))
        }
        status if status.is_server_error() => {
            Error::ServiceUnavailable(format!("Hosting API server error {status}: {text}"))
        }
        _ => Error::HttpError(format!("Hosting API error {status}: {text}")),
    }
}
