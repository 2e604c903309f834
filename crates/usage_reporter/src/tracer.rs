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

use std::{
    future::Future,
    time::{Duration, Instant},
};

use crate::{
    config::UsageConfig,
    operation::{ExecutionResult, Operation, ParsedQuery},
    reporter::UsageReporter,
};

/// Wraps query execution so that every executed batch is handed to the reporter.
#[derive(Clone)]
pub struct UsageTracer {
    reporter: UsageReporter,
    enabled: bool,
}

impl UsageTracer {
    #[must_use]
    pub fn new(reporter: UsageReporter, config: &UsageConfig) -> Self {
        Self {
            reporter,
            enabled: config.collects_usage(),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Runs `execute`, times it and records the batch. The results are returned untouched.
    pub async fn trace<F, Fut>(&self, queries: Vec<ParsedQuery>, execute: F) -> Vec<ExecutionResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<ExecutionResult>>,
    {
        if !self.enabled {
            return execute().await;
        }

        let started = Instant::now();
        let results = execute().await;
        let elapsed = started.elapsed();

        self.reporter
            .add_operation(recorded_operation(queries, &results, elapsed));
        results
    }
}

/// The reporter only counts errors, so response data stays with the caller.
fn recorded_operation(
    queries: Vec<ParsedQuery>,
    results: &[ExecutionResult],
    elapsed: Duration,
) -> Operation {
    let results = results.iter().map(ExecutionResult::errors_only).collect();
    Operation::new(queries, results, elapsed)
}
