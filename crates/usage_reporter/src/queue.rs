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

use std::sync::Mutex;

use snafu::prelude::*;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum PushError {
    #[snafu(display("Queue full (size: {size}/{capacity})"))]
    Full { size: usize, capacity: usize },

    #[snafu(display("Queue closed"))]
    Closed,
}

/// Multi-producer bounded queue with a non-blocking push.
///
/// Closing drops the only sender, so the receiver drains what is left and then sees the end of
/// the stream.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    sender: Mutex<Option<mpsc::Sender<T>>>,
    capacity: usize,
}

#[derive(Debug)]
pub struct QueueReceiver<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> (Self, QueueReceiver<T>) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender: Mutex::new(Some(sender)),
                capacity,
            },
            QueueReceiver { receiver },
        )
    }

    /// Pushes without waiting.
    ///
    /// # Errors
    ///
    /// Returns `PushError::Full` when the queue is at capacity and `PushError::Closed` once the
    /// queue was closed.
    pub fn push(&self, item: T) -> Result<(), PushError> {
        let Some(sender) = self.sender() else {
            return ClosedSnafu.fail();
        };

        match sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => FullSnafu {
                size: self.capacity - sender.capacity(),
                capacity: self.capacity,
            }
            .fail(),
            Err(TrySendError::Closed(_)) => ClosedSnafu.fail(),
        }
    }

    /// Stops accepting new items. Items already queued can still be popped.
    pub fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender().map_or(true, |sender| sender.is_closed())
    }

    /// Number of queued items, or zero once closed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sender()
            .map_or(0, |sender| self.capacity - sender.capacity())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn sender(&self) -> Option<mpsc::Sender<T>> {
        self.sender.lock().ok().and_then(|sender| sender.clone())
    }
}

impl<T> QueueReceiver<T> {
    /// Waits for the next item. Returns `None` once the queue is closed and drained.
    pub async fn pop(&mut self) -> Option<T> {
        self.receiver.recv().await
    }
}
