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

//! The usage report payload and the logic that aggregates operations into it.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;

use crate::{
    analyzer,
    operation::{Context, Operation},
    printer, Result, UnableToSerializeReportSnafu,
};

/// Derives client identity from an execution context.
pub type ClientInfoFn = Arc<dyn Fn(&Context) -> Option<ClientInfo> + Send + Sync>;

/// Lower-case hex MD5 of a canonical document.
#[must_use]
pub fn fingerprint(canonical: &str) -> String {
    format!("{:x}", Md5::digest(canonical.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMapRecord {
    pub fields: Vec<String>,
    pub operation_name: String,
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub ok: bool,
    pub duration: i64,
    pub errors_total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub client: ClientInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub operation_map_key: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub execution: Execution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// One batch of usage, keyed by operation fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub size: usize,
    pub map: BTreeMap<String, OperationMapRecord>,
    pub operations: Vec<ExecutionRecord>,
}

impl Report {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn build(operations: &[Operation], client_info: Option<&ClientInfoFn>) -> Self {
        let mut report = Self::new();
        for operation in operations {
            report.add(operation, client_info);
        }
        report
    }

    pub fn add(&mut self, operation: &Operation, client_info: Option<&ClientInfoFn>) {
        let mut fields = BTreeSet::new();
        let mut canonical = Vec::with_capacity(operation.queries.len());
        for query in &operation.queries {
            fields.extend(analyzer::analyze(query));
            canonical.push(printer::print(query.document()));
        }
        let canonical = canonical.join("\n");
        let key = fingerprint(&canonical);

        let errors_total = operation.errors_total();
        let metadata = match (client_info, operation.result_context()) {
            (Some(client_info), Some(context)) => {
                client_info(context).map(|client| Metadata { client })
            }
            _ => None,
        };

        self.operations.push(ExecutionRecord {
            operation_map_key: key.clone(),
            timestamp: operation.timestamp / 1000,
            execution: Execution {
                ok: errors_total == 0,
                duration: operation.duration,
                errors_total,
            },
            metadata,
        });

        self.map
            .entry(key)
            .or_insert_with(|| OperationMapRecord {
                fields: fields.into_iter().collect(),
                operation_name: operation.operation_name(),
                operation: canonical,
            });
        self.size += 1;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// # Errors
    ///
    /// Returns `UnableToSerializeReport` if the report cannot be serialized.
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self).context(UnableToSerializeReportSnafu)
    }
}
