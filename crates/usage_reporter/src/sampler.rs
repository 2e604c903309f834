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

//! Decides which operations end up in a usage report.

use std::{collections::HashSet, fmt, sync::Arc};

use moka::sync::Cache;
use snafu::prelude::*;

use crate::{operation::Operation, InvalidSampleRateSnafu, Result};

mod context;

pub use context::SampleContext;

/// Computes a sample rate in `[0, 1]` for an operation.
pub type SampleRateFn = Arc<dyn Fn(&SampleContext<'_>) -> f64 + Send + Sync>;

/// Computes the at-least-once tracking key for an operation.
pub type SampleKeyFn = Arc<dyn Fn(&SampleContext<'_>) -> String + Send + Sync>;

#[derive(Clone)]
pub enum SamplingStrategy {
    Fixed(f64),
    Dynamic(SampleRateFn),
}

impl fmt::Debug for SamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingStrategy::Fixed(rate) => f.debug_tuple("Fixed").field(rate).finish(),
            SamplingStrategy::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

enum TrackedKeys {
    Unbounded(HashSet<String>),
    Bounded(Cache<String, ()>),
}

impl TrackedKeys {
    /// Returns true if the key was not seen before.
    fn insert(&mut self, key: String) -> bool {
        match self {
            TrackedKeys::Unbounded(keys) => keys.insert(key),
            TrackedKeys::Bounded(keys) => {
                if keys.contains_key(&key) {
                    return false;
                }
                keys.insert(key, ());
                true
            }
        }
    }
}

struct OperationTracker {
    key_generator: SampleKeyFn,
    keys: TrackedKeys,
}

/// Samples operations at a fixed or dynamic rate, optionally guaranteeing that every distinct
/// operation is reported at least once.
///
/// The sampler is owned by the processing task, so tracking state needs no locking.
pub struct Sampler {
    strategy: SamplingStrategy,
    tracker: Option<OperationTracker>,
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler")
            .field("strategy", &self.strategy)
            .field("at_least_once", &self.tracker.is_some())
            .finish()
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::fixed(None)
    }
}

impl Sampler {
    /// A fixed-rate sampler. A missing or non-finite rate samples everything.
    #[must_use]
    pub fn fixed(rate: Option<f64>) -> Self {
        let rate = rate.filter(|rate| rate.is_finite()).unwrap_or(1.0);
        Self {
            strategy: SamplingStrategy::Fixed(rate),
            tracker: None,
        }
    }

    #[must_use]
    pub fn dynamic(sampler: SampleRateFn) -> Self {
        Self {
            strategy: SamplingStrategy::Dynamic(sampler),
            tracker: None,
        }
    }

    /// Enables at-least-once sampling. Without a key generator operations are keyed by the
    /// fingerprint of their canonical document.
    ///
    /// `max_tracked` caps the number of remembered keys with a `moka` cache, which admits and
    /// evicts by TinyLFU rather than recency. Once the cache is full a new key may not be
    /// admitted, and such a key is sampled again on every repeat until it is. A key is always
    /// sampled the first time it is seen.
    #[must_use]
    pub fn with_at_least_once(
        mut self,
        key_generator: Option<SampleKeyFn>,
        max_tracked: Option<u64>,
    ) -> Self {
        let key_generator: SampleKeyFn = match key_generator {
            Some(key_generator) => key_generator,
            None => Arc::new(|context: &SampleContext<'_>| context.fingerprint()),
        };
        let keys = match max_tracked {
            Some(capacity) => TrackedKeys::Bounded(Cache::new(capacity)),
            None => TrackedKeys::Unbounded(HashSet::new()),
        };

        self.tracker = Some(OperationTracker {
            key_generator,
            keys,
        });
        self
    }

    #[must_use]
    pub fn strategy(&self) -> &SamplingStrategy {
        &self.strategy
    }

    #[must_use]
    pub fn is_at_least_once(&self) -> bool {
        self.tracker.is_some()
    }

    /// Decides whether `operation` is reported.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSampleRate` if a dynamic sampler returns a non-finite rate.
    pub fn sample(&mut self, operation: &Operation) -> Result<bool> {
        if let (SamplingStrategy::Fixed(rate), None) = (&self.strategy, &self.tracker) {
            return Ok(draw(*rate));
        }

        let context = SampleContext::from_operation(operation);

        if let Some(tracker) = &mut self.tracker {
            let key = (tracker.key_generator)(&context);
            if tracker.keys.insert(key) {
                return Ok(true);
            }
        }

        let rate = match &self.strategy {
            SamplingStrategy::Fixed(rate) => *rate,
            SamplingStrategy::Dynamic(sampler) => {
                let rate = sampler(&context);
                ensure!(rate.is_finite(), InvalidSampleRateSnafu { rate });
                rate
            }
        };

        Ok(draw(rate))
    }
}

fn draw(rate: f64) -> bool {
    rand::random::<f64>() <= rate
}
