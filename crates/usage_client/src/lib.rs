/*
Copyright 2024 The Spice.ai OSS Authors

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

     https://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! reqwest transport for the usage collector.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde_json::Value;
use snafu::prelude::*;
use url::Url;
use usage_reporter::{BoxError, RequestKind, UsageClient, UsageConfig};

mod schema_reporter;

pub use schema_reporter::SchemaReporter;

pub const USAGE_API_VERSION: &str = "2";
pub const CLIENT_NAME: &str = "usage-reporter";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid usage endpoint {endpoint}: {source}"))]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },

    #[snafu(display("Invalid value for header {name}: {source}"))]
    InvalidHeader {
        name: String,
        source: reqwest::header::InvalidHeaderValue,
    },

    #[snafu(display("Unable to build HTTP client: {source}"))]
    UnableToBuildClient { source: reqwest::Error },

    #[snafu(display("{source}"))]
    ReqwestInternal { source: reqwest::Error },

    #[snafu(display("HTTP {status}: {message}"))]
    InvalidReqwestStatus {
        status: reqwest::StatusCode,
        message: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Posts usage reports and schema publishes to the collector.
#[derive(Debug, Clone)]
pub struct UsageApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl UsageApiClient {
    /// # Errors
    ///
    /// Returns an error if the endpoint or token cannot be used to build requests.
    pub fn new(config: &UsageConfig) -> Result<Self> {
        let base_url = base_url(&config.endpoint, config.port)?;
        let client = reqwest::Client::builder()
            .default_headers(default_headers(config.token.as_deref())?)
            .build()
            .context(UnableToBuildClientSnafu)?;

        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// POSTs `body` as JSON to `path` relative to the collector.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReqwestStatus` for any non-2xx response.
    pub async fn post(&self, path: &str, body: &Value) -> Result<()> {
        let url = self.base_url.join(path).context(InvalidEndpointSnafu {
            endpoint: format!("{}{path}", self.base_url),
        })?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context(ReqwestInternalSnafu)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return InvalidReqwestStatusSnafu { status, message }.fail();
        }

        Ok(())
    }
}

#[async_trait]
impl UsageClient for UsageApiClient {
    async fn send(
        &self,
        path: &str,
        body: Value,
        kind: RequestKind,
    ) -> std::result::Result<(), BoxError> {
        tracing::debug!("Sending {kind} request to {path}");
        self.post(path, &body).await?;
        Ok(())
    }
}

/// The collector is reached over TLS only on port 443.
fn base_url(endpoint: &str, port: u16) -> Result<Url> {
    let scheme = if port == 443 { "https" } else { "http" };
    let url = format!("{scheme}://{endpoint}:{port}");
    Url::parse(&url).context(InvalidEndpointSnafu { endpoint: url })
}

fn default_headers(token: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    if let Some(token) = token {
        headers.insert(
            AUTHORIZATION,
            header_value("authorization", &format!("Bearer {token}"))?,
        );
    }
    headers.insert(
        "x-usage-api-version",
        HeaderValue::from_static(USAGE_API_VERSION),
    );
    headers.insert(
        USER_AGENT,
        header_value("user-agent", &format!("{CLIENT_NAME}/{CLIENT_VERSION}"))?,
    );
    headers.insert("graphql-client-name", HeaderValue::from_static(CLIENT_NAME));
    headers.insert(
        "graphql-client-version",
        HeaderValue::from_static(CLIENT_VERSION),
    );

    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).context(InvalidHeaderSnafu { name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_scheme_follows_port() {
        assert_eq!(
            base_url("app.graphql-hive.com", 443)
                .expect("valid url")
                .as_str(),
            "https://app.graphql-hive.com/"
        );
        assert_eq!(
            base_url("localhost", 8080).expect("valid url").as_str(),
            "http://localhost:8080/"
        );
        assert!(base_url("bad host", 80).is_err());
    }

    #[test]
    fn test_default_headers() {
        let headers = default_headers(Some("secret")).expect("valid headers");
        assert_eq!(headers[AUTHORIZATION], "Bearer secret");
        assert_eq!(headers["x-usage-api-version"], "2");
        assert_eq!(headers["graphql-client-name"], CLIENT_NAME);
        assert_eq!(headers["graphql-client-version"], CLIENT_VERSION);
        assert!(headers[USER_AGENT]
            .to_str()
            .expect("ascii")
            .starts_with("usage-reporter/"));

        let anonymous = default_headers(None).expect("valid headers");
        assert!(anonymous.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_token_with_newline_is_rejected() {
        assert!(matches!(
            default_headers(Some("bad\ntoken")),
            Err(Error::InvalidHeader { .. })
        ));
    }
}
