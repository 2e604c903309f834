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

use std::sync::Arc;

use serde_json::{json, Value};
use usage_reporter::{BoxError, RequestKind, SchemaReporting, UsageClient, REGISTRY_PATH};

const SCHEMA_PUBLISH_MUTATION: &str = r"mutation schemaPublish($input: SchemaPublishInput!) {
  schemaPublish(input: $input) {
    __typename
  }
}";

/// Publishes the service schema to the registry.
pub struct SchemaReporter {
    client: Arc<dyn UsageClient>,
    reporting: SchemaReporting,
}

impl SchemaReporter {
    #[must_use]
    pub fn new(client: Arc<dyn UsageClient>, reporting: SchemaReporting) -> Self {
        Self { client, reporting }
    }

    #[must_use]
    pub fn body(&self, sdl: &str) -> Value {
        json!({
            "query": SCHEMA_PUBLISH_MUTATION,
            "operationName": "schemaPublish",
            "variables": {
                "input": {
                    "sdl": sdl,
                    "author": self.reporting.author,
                    "commit": self.reporting.commit,
                    "service": self.reporting.service_name,
                    "url": self.reporting.service_url,
                    "force": true,
                }
            }
        })
    }

    /// # Errors
    ///
    /// Returns the transport error if the registry rejects the publish.
    pub async fn report(&self, sdl: &str) -> Result<(), BoxError> {
        tracing::info!("Publishing schema to the registry");
        self.client
            .send(REGISTRY_PATH, self.body(sdl), RequestKind::ReportSchema)
            .await
    }
}
