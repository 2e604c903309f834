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
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;
use snafu::prelude::*;
use usage_client::{SchemaReporter, UsageApiClient};
use usage_reporter::{
    BoxError, ExecutionResult, ParsedQuery, RequestKind, Schema, UsageClient, UsageConfig,
    UsageReporter, UsageTracer,
};

#[derive(Parser, Debug)]
#[clap(about = "Replays GraphQL operations through the usage reporter")]
pub struct Args {
    /// Usage reporting configuration (YAML).
    #[arg(long, value_name = "FILE", default_value = "usage.yaml")]
    pub config: PathBuf,

    /// Schema definition (SDL) the operations run against.
    #[arg(long, value_name = "FILE")]
    pub schema: PathBuf,

    /// Executable documents, separated by lines containing only `---`.
    #[arg(long, value_name = "FILE")]
    pub operations: PathBuf,

    /// How many times every operation is replayed.
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,

    /// Log reports instead of sending them.
    #[arg(long)]
    pub dry_run: bool,

    /// Serve the reporter counters in Prometheus format on this address.
    #[arg(long, value_name = "BIND_ADDRESS")]
    pub metrics: Option<SocketAddr>,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Unable to read {}: {source}", path.display()))]
    UnableToReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to load configuration: {source}"))]
    UnableToLoadConfig { source: usage_reporter::Error },

    #[snafu(display("Unable to load schema: {source}"))]
    UnableToLoadSchema { source: usage_reporter::Error },

    #[snafu(display("Unable to parse operation #{index}: {source}"))]
    UnableToParseOperation {
        index: usize,
        source: usage_reporter::Error,
    },

    #[snafu(display("Unable to create usage client: {source}"))]
    UnableToCreateClient { source: usage_client::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Prints reports to the log instead of sending them.
struct LoggingClient;

#[async_trait]
impl UsageClient for LoggingClient {
    async fn send(
        &self,
        path: &str,
        body: Value,
        kind: RequestKind,
    ) -> std::result::Result<(), BoxError> {
        tracing::info!("{kind} request to {path}: {body}");
        Ok(())
    }
}

pub async fn run(args: Args) -> Result<()> {
    let config = UsageConfig::from_yaml(&read(&args.config)?).context(UnableToLoadConfigSnafu)?;
    // A dry run never talks to the collector, so it does not need a token.
    let config = if args.dry_run {
        config
    } else {
        config.validate()
    };

    let sdl = read(&args.schema)?;
    let schema = Arc::new(Schema::parse(&sdl).context(UnableToLoadSchemaSnafu)?);
    let queries = split_operations(&read(&args.operations)?)
        .iter()
        .enumerate()
        .map(|(index, source)| {
            ParsedQuery::parse(Arc::clone(&schema), source)
                .context(UnableToParseOperationSnafu { index })
        })
        .collect::<Result<Vec<_>>>()?;

    let client: Arc<dyn UsageClient> = if args.dry_run {
        Arc::new(LoggingClient)
    } else {
        Arc::new(UsageApiClient::new(&config).context(UnableToCreateClientSnafu)?)
    };

    if config.report_schema {
        let reporter = SchemaReporter::new(Arc::clone(&client), config.reporting.clone());
        if let Err(err) = reporter.report(&sdl).await {
            tracing::error!("Failed to publish schema: {err}");
        }
    }

    if !config.collects_usage() {
        tracing::warn!("Usage collection is disabled, nothing to replay");
        return Ok(());
    }

    let reporter = UsageReporter::new(&config, client);
    let tracer = UsageTracer::new(reporter.clone(), &config);

    reporter.start().await;
    for _ in 0..args.repeat {
        for query in &queries {
            tracer
                .trace(vec![query.clone()], || async {
                    vec![ExecutionResult::default()]
                })
                .await;
        }
    }
    reporter.stop().await;

    tracing::info!(
        "Replayed {} operations, {} dropped",
        queries.len() * args.repeat,
        reporter.dropped_operations()
    );
    Ok(())
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).context(UnableToReadFileSnafu { path })
}

/// Splits a file into documents on lines that contain only `---`. Blank documents are skipped.
#[must_use]
pub fn split_operations(source: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();

    for line in source.lines() {
        if line.trim() == "---" {
            push_document(&mut documents, &mut current);
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_document(&mut documents, &mut current);

    documents
}

fn push_document(documents: &mut Vec<String>, current: &mut String) {
    let document = current.trim();
    if !document.is_empty() {
        documents.push(document.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_operations() {
        let documents = split_operations(
            "query A { a }\n---\n\n---\nquery B {\n  b\n}\n  ---  \nfragment F on Query { a }\n",
        );
        assert_eq!(
            documents,
            vec![
                "query A { a }".to_string(),
                "query B {\n  b\n}".to_string(),
                "fragment F on Query { a }".to_string(),
            ]
        );
        assert!(split_operations("").is_empty());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "usage_replay",
            "--schema",
            "schema.graphql",
            "--operations",
            "ops.graphql",
            "--repeat",
            "3",
            "--dry-run",
        ]);
        assert_eq!(args.config, PathBuf::from("usage.yaml"));
        assert_eq!(args.repeat, 3);
        assert!(args.dry_run);
        assert!(args.metrics.is_none());
    }

    #[test]
    fn test_args_parse_metrics_address() {
        let args = Args::parse_from([
            "usage_replay",
            "--schema",
            "schema.graphql",
            "--operations",
            "ops.graphql",
            "--metrics",
            "127.0.0.1:9091",
        ]);
        assert_eq!(args.metrics, Some(SocketAddr::from(([127, 0, 0, 1], 9091))));
    }

    #[tokio::test]
    async fn test_dry_run_replays_operations() {
        let dir = std::env::temp_dir().join(format!("usage_replay_{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let config = dir.join("usage.yaml");
        let schema = dir.join("schema.graphql");
        let operations = dir.join("ops.graphql");
        fs::write(&config, "buffer_size: 2\nreport_schema: false\n").expect("write config");
        fs::write(&schema, "type Query { a: Int b: Int }").expect("write schema");
        fs::write(&operations, "query A { a }\n---\nquery B { b }\n").expect("write ops");

        let result = run(Args {
            config,
            schema,
            operations: operations.clone(),
            repeat: 2,
            dry_run: true,
            metrics: None,
        })
        .await;
        assert!(result.is_ok(), "{result:?}");

        fs::write(&operations, "query {").expect("write ops");
        let result = run(Args {
            config: dir.join("usage.yaml"),
            schema: dir.join("schema.graphql"),
            operations,
            repeat: 1,
            dry_run: true,
            metrics: None,
        })
        .await;
        assert!(matches!(
            result,
            Err(Error::UnableToParseOperation { index: 0, .. })
        ));

        let _ = fs::remove_dir_all(dir);
    }
}
