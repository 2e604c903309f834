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

//! Collects GraphQL operation usage, samples it, and ships batched usage reports.
//!
//! The engine integration hands every executed [`Operation`] to a [`UsageReporter`] (directly or
//! through a [`UsageTracer`]). The reporter never blocks the caller: operations land in a bounded
//! queue and a background processor samples them, buffers them and sends [`Report`]s through a
//! [`UsageClient`].

use std::any::Any;

use snafu::prelude::*;

pub mod analyzer;
pub mod client;
pub mod config;
pub mod operation;
pub mod printer;
mod processor;
pub mod queue;
pub mod report;
pub mod reporter;
pub mod sampler;
pub mod schema;
pub mod tracer;

pub use client::{BoxError, RequestKind, UsageClient, REGISTRY_PATH, USAGE_PATH};
pub use config::{SchemaReporting, UsageConfig};
pub use operation::{Context, ExecutionResult, Operation, ParsedQuery};
pub use report::{ClientInfo, Report};
pub use reporter::{UsageReporter, UsageReporterBuilder};
pub use sampler::{SampleContext, Sampler};
pub use schema::Schema;
pub use tracer::UsageTracer;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Unable to parse GraphQL schema: {source}"))]
    UnableToParseSchema {
        source: graphql_parser::schema::ParseError,
    },

    #[snafu(display("Unable to parse GraphQL operation: {source}"))]
    UnableToParseQuery {
        source: graphql_parser::query::ParseError,
    },

    #[snafu(display("Invalid sample rate `{rate}`, the sampler must return a number"))]
    InvalidSampleRate { rate: f64 },

    #[snafu(display("Sampler panicked: {message}"))]
    SamplerPanicked { message: String },

    #[snafu(display("Unable to serialize usage report: {source}"))]
    UnableToSerializeReport { source: serde_json::Error },

    #[snafu(display("Unable to parse usage configuration: {source}"))]
    UnableToParseConfig { source: serde_yaml::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
