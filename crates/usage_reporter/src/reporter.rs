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
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    client::UsageClient,
    config::UsageConfig,
    operation::Operation,
    processor::Processor,
    queue::BoundedQueue,
    report::ClientInfoFn,
    sampler::{SampleKeyFn, SampleRateFn, Sampler},
};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RESTARTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Stopped,
}

struct Lifecycle {
    state: State,
    monitor: Option<JoinHandle<()>>,
}

struct Inner {
    queue: BoundedQueue<Operation>,
    processor: Arc<Mutex<Processor>>,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    processor_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
    restarts: AtomicUsize,
    shutdown_timeout: Duration,
    monitor_interval: Duration,
    max_restarts: usize,
}

/// Accepts executed operations without blocking and reports them in the background.
///
/// Cloning returns another handle to the same reporter. [`UsageReporter::start`] spawns the
/// processing and monitor tasks on the current tokio runtime; [`UsageReporter::stop`] drains the
/// queue and sends the last report.
#[derive(Clone)]
pub struct UsageReporter {
    inner: Arc<Inner>,
}

impl UsageReporter {
    #[must_use]
    pub fn new(config: &UsageConfig, client: Arc<dyn UsageClient>) -> Self {
        Self::builder(config, client).build()
    }

    #[must_use]
    pub fn builder(config: &UsageConfig, client: Arc<dyn UsageClient>) -> UsageReporterBuilder {
        UsageReporterBuilder::new(config.clone(), client)
    }

    /// Queues an operation for reporting. Never blocks and never fails; operations that do not
    /// fit are dropped and counted.
    pub fn add_operation(&self, operation: Operation) {
        if let Err(err) = self.inner.queue.push(operation) {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("usage_operations_dropped").increment(1);
            tracing::warn!("Dropping usage operation: {err}");
        }
    }

    /// Starts the processing and monitor tasks. Calling it again while running does nothing.
    pub async fn start(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        match lifecycle.state {
            State::Idle => {}
            State::Running if self.is_running() => {
                tracing::debug!("Usage reporter is already running");
                return;
            }
            State::Running | State::Stopped => {
                tracing::warn!("Usage reporter was stopped and cannot be started again");
                return;
            }
        }

        self.inner.running.store(true, Ordering::SeqCst);
        Inner::spawn_processor(&self.inner);
        lifecycle.monitor = Some(tokio::spawn(monitor(Arc::clone(&self.inner))));
        lifecycle.state = State::Running;
        tracing::debug!("Usage reporter started");
    }

    /// Stops accepting operations, waits up to the shutdown timeout for the queue to drain and
    /// the final report to be sent, then aborts the processing task.
    ///
    /// Does nothing if the reporter is not running.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.state != State::Running {
            return;
        }
        lifecycle.state = State::Stopped;
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(monitor) = lifecycle.monitor.take() {
            monitor.abort();
            // Make sure the monitor cannot restart the processor after this point.
            let _ = monitor.await;
        }

        self.inner.queue.close();

        let Some(mut task) = self.inner.take_processor_task() else {
            return;
        };
        match tokio::time::timeout(self.inner.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => tracing::debug!("Usage reporter stopped"),
            Ok(Err(err)) => tracing::error!("Usage processor failed while stopping: {err}"),
            Err(_) => {
                tracing::warn!("Force stopping processor task");
                task.abort();
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Operations rejected because the queue was full or closed.
    #[must_use]
    pub fn dropped_operations(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Times the monitor restarted a dead processing task.
    #[must_use]
    pub fn restarts(&self) -> usize {
        self.inner.restarts.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn spawn_processor(inner: &Arc<Self>) {
        let processor = Arc::clone(&inner.processor);
        let handle = tokio::spawn(async move {
            let mut processor = processor.lock().await;
            processor.process_queue().await;
        });

        if let Ok(mut task) = inner.processor_task.lock() {
            *task = Some(handle);
        }
    }

    fn take_processor_task(&self) -> Option<JoinHandle<()>> {
        self.processor_task.lock().ok().and_then(|mut task| task.take())
    }

    fn processor_finished(&self) -> bool {
        self.processor_task
            .lock()
            .ok()
            .and_then(|task| task.as_ref().map(JoinHandle::is_finished))
            .unwrap_or(false)
    }
}

/// Restarts the processing task if it dies while the reporter is running.
async fn monitor(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.monitor_interval);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;

        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        if !inner.processor_finished() {
            continue;
        }

        let restarts = inner.restarts.load(Ordering::SeqCst);
        if restarts >= inner.max_restarts {
            inner.running.store(false, Ordering::SeqCst);
            inner.queue.close();
            tracing::error!(
                "Usage processor crashed {} times, usage reporting is stopped",
                restarts + 1
            );
            break;
        }

        inner.restarts.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("usage_processor_restarts").increment(1);
        tracing::warn!(
            "Usage processor stopped unexpectedly, restarting ({}/{})",
            restarts + 1,
            inner.max_restarts
        );
        Inner::spawn_processor(&inner);
    }
}

/// Configures a [`UsageReporter`] beyond what [`UsageConfig`] carries: sampling and client info
/// callbacks, and lifecycle timings.
pub struct UsageReporterBuilder {
    config: UsageConfig,
    client: Arc<dyn UsageClient>,
    sampler: Option<SampleRateFn>,
    key_generator: Option<SampleKeyFn>,
    client_info: Option<ClientInfoFn>,
    shutdown_timeout: Duration,
    monitor_interval: Duration,
    max_restarts: usize,
}

impl UsageReporterBuilder {
    #[must_use]
    pub fn new(config: UsageConfig, client: Arc<dyn UsageClient>) -> Self {
        Self {
            config,
            client,
            sampler: None,
            key_generator: None,
            client_info: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            max_restarts: DEFAULT_MAX_RESTARTS,
        }
    }

    /// Uses a dynamic sample rate instead of the configured fixed one.
    #[must_use]
    pub fn sampler(mut self, sampler: SampleRateFn) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Sets the at-least-once key generator. Implies at-least-once sampling.
    #[must_use]
    pub fn key_generator(mut self, key_generator: SampleKeyFn) -> Self {
        self.key_generator = Some(key_generator);
        self
    }

    #[must_use]
    pub fn client_info(mut self, client_info: ClientInfoFn) -> Self {
        self.client_info = Some(client_info);
        self
    }

    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    #[must_use]
    pub fn max_restarts(mut self, max_restarts: usize) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    #[must_use]
    pub fn build(self) -> UsageReporter {
        let mut sampler = match self.sampler {
            Some(sampler) => Sampler::dynamic(sampler),
            None => Sampler::fixed(self.config.sample_rate),
        };
        if self.config.at_least_once || self.key_generator.is_some() {
            sampler =
                sampler.with_at_least_once(self.key_generator, self.config.max_tracked_operations);
        }

        let (queue, receiver) = BoundedQueue::new(self.config.queue_size);
        let processor = Processor::new(
            receiver,
            sampler,
            self.client,
            self.config.buffer_size,
            self.client_info,
            self.config.fail_open,
        );

        UsageReporter {
            inner: Arc::new(Inner {
                queue,
                processor: Arc::new(Mutex::new(processor)),
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle {
                    state: State::Idle,
                    monitor: None,
                }),
                processor_task: std::sync::Mutex::new(None),
                dropped: AtomicU64::new(0),
                restarts: AtomicUsize::new(0),
                shutdown_timeout: self.shutdown_timeout,
                // tokio intervals panic on a zero period.
                monitor_interval: self.monitor_interval.max(Duration::from_millis(1)),
                max_restarts: self.max_restarts,
            }),
        }
    }
}
