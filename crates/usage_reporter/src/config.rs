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

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::{Result, UnableToParseConfigSnafu};

pub const DEFAULT_ENDPOINT: &str = "app.graphql-hive.com";
pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_BUFFER_SIZE: usize = 50;
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub collect_usage: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Sampled operations per report.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Operations waiting to be sampled before new ones are dropped.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub at_least_once: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tracked_operations: Option<u64>,
    /// Keep operations whose sampling failed instead of discarding the buffer.
    #[serde(default)]
    pub fail_open: bool,
    #[serde(default = "default_true")]
    pub report_schema: bool,
    #[serde(default)]
    pub reporting: SchemaReporting,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaReporting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
}

const fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

const fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collect_usage: true,
            token: None,
            endpoint: default_endpoint(),
            port: DEFAULT_PORT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            queue_size: DEFAULT_QUEUE_SIZE,
            sample_rate: None,
            at_least_once: false,
            max_tracked_operations: None,
            fail_open: false,
            report_schema: true,
            reporting: SchemaReporting::default(),
        }
    }
}

impl UsageConfig {
    /// # Errors
    ///
    /// Returns `UnableToParseConfig` if `yaml` does not describe a valid configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context(UnableToParseConfigSnafu)
    }

    /// Turns off whatever cannot work with the given settings.
    #[must_use]
    pub fn validate(mut self) -> Self {
        if self.enabled && self.token.as_deref().map_or(true, str::is_empty) {
            tracing::warn!("Usage reporting token is missing. Disabling reporting.");
            self.enabled = false;
            self.report_schema = false;
        }

        if self.report_schema
            && (self.reporting.author.is_none() || self.reporting.commit.is_none())
        {
            tracing::warn!(
                "Schema reporting requires `author` and `commit`. Disabling schema reporting."
            );
            self.report_schema = false;
        }

        self
    }

    /// Whether operations should be collected at all.
    #[must_use]
    pub fn collects_usage(&self) -> bool {
        self.enabled && self.collect_usage
    }
}
