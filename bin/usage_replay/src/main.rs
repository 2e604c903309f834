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

use std::net::SocketAddr;

use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};
use tokio::runtime::{Handle, Runtime};
use tracing_subscriber::EnvFilter;

fn main() {
    let args = usage_replay::Args::parse();

    if let Err(err) = init_tracing() {
        eprintln!("Unable to initialize tracing: {err}");
        std::process::exit(1);
    }

    let tokio_runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!("Unable to start Tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = tokio_runtime.block_on(start_replay(args)) {
        tracing::error!("Usage replay error: {err}");
        std::process::exit(1);
    }
}

async fn start_replay(args: usage_replay::Args) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(metrics_socket) = args.metrics {
        init_metrics(metrics_socket)?;
    }
    usage_replay::run(args).await?;
    Ok(())
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = if let Ok(env_log) = std::env::var("USAGE_REPORTER_LOG") {
        EnvFilter::new(env_log)
    } else {
        EnvFilter::new("usage_replay=INFO,usage_reporter=INFO,usage_client=INFO")
    };

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn init_metrics(socket_addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    metrics::set_global_recorder(init_prometheus(socket_addr)?)?;
    tracing::info!("Metrics listening on {socket_addr}");

    Ok(())
}

// Must run inside a Tokio runtime.
fn init_prometheus(
    socket_addr: SocketAddr,
) -> Result<PrometheusRecorder, Box<dyn std::error::Error>> {
    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .build()?;

    std::mem::drop(Handle::try_current()?.spawn(exporter));
    Ok(recorder)
}
