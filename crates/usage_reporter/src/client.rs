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

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

pub const USAGE_PATH: &str = "/usage";
pub const REGISTRY_PATH: &str = "/registry";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Usage,
    ReportSchema,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Usage => write!(f, "usage"),
            RequestKind::ReportSchema => write!(f, "report-schema"),
        }
    }
}

/// Transport to the usage collector.
///
/// Implementations report delivery failures through the returned error; the reporter logs them
/// and never retries.
#[async_trait]
pub trait UsageClient: Send + Sync {
    async fn send(&self, path: &str, body: Value, kind: RequestKind) -> Result<(), BoxError>;
}
