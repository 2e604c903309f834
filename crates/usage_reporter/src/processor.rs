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
    mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crate::{
    client::{RequestKind, UsageClient, USAGE_PATH},
    operation::Operation,
    panic_message,
    queue::QueueReceiver,
    report::{ClientInfoFn, Report},
    sampler::Sampler,
    Result, SamplerPanickedSnafu,
};

/// State of the processing task. Only that task touches it, so the sampler and buffer need no
/// locking.
pub(crate) struct Processor {
    receiver: QueueReceiver<Operation>,
    sampler: Sampler,
    client: Arc<dyn UsageClient>,
    buffer: Vec<Operation>,
    buffer_size: usize,
    client_info: Option<ClientInfoFn>,
    fail_open: bool,
}

impl Processor {
    pub(crate) fn new(
        receiver: QueueReceiver<Operation>,
        sampler: Sampler,
        client: Arc<dyn UsageClient>,
        buffer_size: usize,
        client_info: Option<ClientInfoFn>,
        fail_open: bool,
    ) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            receiver,
            sampler,
            client,
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            client_info,
            fail_open,
        }
    }

    /// Runs until the queue is closed and drained, then flushes whatever is buffered.
    ///
    /// A restarted processor resumes with the buffer left behind by the previous run.
    pub(crate) async fn process_queue(&mut self) {
        while let Some(operation) = self.receiver.pop().await {
            tracing::trace!(
                "Processing operation {} from queue",
                operation.operation_name()
            );

            match self.sample(&operation) {
                Ok(true) => {
                    metrics::counter!("usage_operations_sampled").increment(1);
                    self.buffer.push(operation);
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::error!("Failed to process operation: {err}");
                    if self.fail_open {
                        self.buffer.push(operation);
                    } else {
                        self.buffer.clear();
                        continue;
                    }
                }
            }

            if self.buffer.len() >= self.buffer_size {
                tracing::debug!("Buffer is full, sending report");
                self.flush().await;
            }
        }

        if !self.buffer.is_empty() {
            self.flush().await;
        }
        tracing::debug!("Usage queue drained");
    }

    fn sample(&mut self, operation: &Operation) -> Result<bool> {
        let sampler = &mut self.sampler;
        match panic::catch_unwind(AssertUnwindSafe(|| sampler.sample(operation))) {
            Ok(decision) => decision,
            Err(payload) => SamplerPanickedSnafu {
                message: panic_message(payload.as_ref()),
            }
            .fail(),
        }
    }

    async fn flush(&mut self) {
        let operations = mem::take(&mut self.buffer);
        let report = Report::build(&operations, self.client_info.as_ref());

        let body = match report.to_json() {
            Ok(body) => body,
            Err(err) => {
                metrics::counter!("usage_reports_failed").increment(1);
                tracing::error!("{err}");
                return;
            }
        };

        match self.client.send(USAGE_PATH, body, RequestKind::Usage).await {
            Ok(()) => {
                metrics::counter!("usage_reports_sent").increment(1);
                tracing::debug!("Sent usage report with {} operations", report.size);
            }
            Err(err) => {
                metrics::counter!("usage_reports_failed").increment(1);
                tracing::error!("Failed to send usage report: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Mutex;

    use super::*;
    use crate::{
        client::BoxError, queue::BoundedQueue, sampler::SampleContext, ExecutionResult,
        ParsedQuery, Schema,
    };

    #[derive(Default)]
    struct RecordingClient {
        reports: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl UsageClient for RecordingClient {
        async fn send(&self, path: &str, body: Value, kind: RequestKind) -> Result<(), BoxError> {
            assert_eq!(path, USAGE_PATH);
            assert_eq!(kind, RequestKind::Usage);
            self.reports.lock().await.push(body);
            Ok(())
        }
    }

    fn operation(name: &str) -> Operation {
        let schema = Arc::new(Schema::parse("type Query { a: Int }").expect("valid schema"));
        let query =
            ParsedQuery::parse(schema, &format!("query {name} {{ a }}")).expect("valid query");
        Operation::new(
            vec![query],
            vec![ExecutionResult::default()],
            Duration::from_millis(1),
        )
    }

    fn report_sizes(reports: &[Value]) -> Vec<u64> {
        reports
            .iter()
            .map(|report| report["size"].as_u64().unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn test_flushes_full_buffers_and_remainder() {
        let client = Arc::new(RecordingClient::default());
        let (queue, receiver) = BoundedQueue::new(10);
        let mut processor = Processor::new(
            receiver,
            Sampler::default(),
            Arc::clone(&client) as Arc<dyn UsageClient>,
            2,
            None,
            false,
        );

        for name in ["A", "B", "C"] {
            queue.push(operation(name)).expect("push");
        }
        queue.close();
        processor.process_queue().await;

        assert_eq!(report_sizes(&client.reports.lock().await), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_sampling_failure_discards_buffer() {
        let client = Arc::new(RecordingClient::default());
        let (queue, receiver) = BoundedQueue::new(10);
        let sampler = Sampler::dynamic(Arc::new(|context: &SampleContext<'_>| {
            if context.operation_name == "Bad" {
                f64::NAN
            } else {
                1.0
            }
        }));
        let mut processor = Processor::new(
            receiver,
            sampler,
            Arc::clone(&client) as Arc<dyn UsageClient>,
            10,
            None,
            false,
        );

        for name in ["A", "Bad", "C"] {
            queue.push(operation(name)).expect("push");
        }
        queue.close();
        processor.process_queue().await;

        let reports = client.reports.lock().await;
        assert_eq!(report_sizes(&reports), vec![1]);
    }

    #[tokio::test]
    async fn test_sampler_panic_is_contained() {
        let client = Arc::new(RecordingClient::default());
        let (queue, receiver) = BoundedQueue::new(10);
        let sampler = Sampler::dynamic(Arc::new(|context: &SampleContext<'_>| {
            assert_ne!(context.operation_name, "Bad", "sampler blew up");
            1.0
        }));
        let mut processor = Processor::new(
            receiver,
            sampler,
            Arc::clone(&client) as Arc<dyn UsageClient>,
            10,
            None,
            true,
        );

        for name in ["A", "Bad", "C"] {
            queue.push(operation(name)).expect("push");
        }
        queue.close();
        processor.process_queue().await;

        // Fail-open keeps every operation.
        assert_eq!(report_sizes(&client.reports.lock().await), vec![3]);
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom")).expect_err("panics");
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }
}
