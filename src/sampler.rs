// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The periodic sampler feeding the current scope of every tracked thread.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tokio::{sync::mpsc, time::MissedTickBehavior};

use crate::{
    metadata::ReportMetadata,
    provider::{NoOpStackProvider, ThreadStackProvider},
    registry::ThreadScopeMapper,
    reporter::Reporter,
    scope::FinishedScope,
};

const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_MAX_STACK_DEPTH: usize = 512;

/// Errors building [`SamplerOptions`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SamplerOptionsError {
    /// The sampling interval was zero.
    #[error("sampling interval must be greater than zero")]
    ZeroInterval,
    /// The JSON options could not be parsed.
    #[error("invalid sampler options: {0}")]
    Json(#[from] serde_json::Error),
}

/// Sampling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerOptions {
    sampling_interval: Duration,
    max_stack_depth: usize,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        SamplerOptions {
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SamplerOptionsJson {
    sampling_interval_ms: Option<u64>,
    max_stack_depth: Option<usize>,
}

impl SamplerOptions {
    /// Time between two samples.
    pub fn sampling_interval(&self) -> Duration {
        self.sampling_interval
    }

    /// Maximum number of frames recorded per sample.
    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    /// Parses options such as `{"sampling_interval_ms": 20, "max_stack_depth": 64}`.
    /// Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self, SamplerOptionsError> {
        let parsed: SamplerOptionsJson = serde_json::from_str(json)?;
        let mut builder = SamplerOptionsBuilder::default();
        if let Some(ms) = parsed.sampling_interval_ms {
            builder = builder.with_sampling_interval(Duration::from_millis(ms));
        }
        if let Some(depth) = parsed.max_stack_depth {
            builder = builder.with_max_stack_depth(depth);
        }
        builder.build()
    }
}

/// Builds [`SamplerOptions`].
#[derive(Debug, Default)]
pub struct SamplerOptionsBuilder {
    sampling_interval: Option<Duration>,
    max_stack_depth: Option<usize>,
}

impl SamplerOptionsBuilder {
    /// Sets the sampling interval. Defaults to 10ms.
    pub fn with_sampling_interval(mut self, i: Duration) -> SamplerOptionsBuilder {
        self.sampling_interval = Some(i);
        self
    }

    /// Sets the maximum recorded stack depth. Defaults to 512 frames.
    pub fn with_max_stack_depth(mut self, depth: usize) -> SamplerOptionsBuilder {
        self.max_stack_depth = Some(depth);
        self
    }

    /// Validates and builds the options.
    pub fn build(self) -> Result<SamplerOptions, SamplerOptionsError> {
        let sampling_interval = self.sampling_interval.unwrap_or(DEFAULT_SAMPLING_INTERVAL);
        if sampling_interval.is_zero() {
            return Err(SamplerOptionsError::ZeroInterval);
        }
        Ok(SamplerOptions {
            sampling_interval,
            max_stack_depth: self.max_stack_depth.unwrap_or(DEFAULT_MAX_STACK_DEPTH),
        })
    }
}

/// Builds a [`Sampler`].
#[derive(Debug, Default)]
pub struct SamplerBuilder {
    options: SamplerOptions,
    provider: Option<Box<dyn ThreadStackProvider + Send + Sync>>,
    reporter: Option<Box<dyn Reporter + Send + Sync>>,
}

impl SamplerBuilder {
    /// Sets the sampling options.
    pub fn with_options(mut self, options: SamplerOptions) -> SamplerBuilder {
        self.options = options;
        self
    }

    /// Sets the source of thread stacks. Defaults to [`NoOpStackProvider`].
    pub fn with_provider(mut self, p: impl ThreadStackProvider + Send + Sync + 'static) -> SamplerBuilder {
        self.provider = Some(Box::new(p));
        self
    }

    /// Sets the reporter that receives the chunk of every ended scope.
    pub fn with_reporter(mut self, r: impl Reporter + Send + Sync + 'static) -> SamplerBuilder {
        self.reporter = Some(Box::new(r));
        self
    }

    /// Turn this builder into a sampler.
    pub fn build(self) -> Sampler {
        Sampler {
            options: self.options,
            provider: self.provider.unwrap_or_else(|| Box::new(NoOpStackProvider)),
            reporter: self.reporter,
        }
    }
}

/// Samples the threads of a [`ThreadScopeMapper`] at a fixed interval.
pub struct Sampler {
    options: SamplerOptions,
    provider: Box<dyn ThreadStackProvider + Send + Sync>,
    reporter: Option<Box<dyn Reporter + Send + Sync>>,
}

impl Sampler {
    /// Start sampling in a tokio task. The task stops once `mapper` is dropped.
    ///
    /// With a reporter configured, every scope of `mapper` that ends from now
    /// on is reported from a second task, so a slow reporter never delays a
    /// sample. That task runs until no scope of `mapper` can end anymore.
    pub fn spawn(self, mapper: Arc<ThreadScopeMapper>) -> tokio::task::JoinHandle<()> {
        let Sampler {
            options,
            provider,
            reporter,
        } = self;
        if let Some(reporter) = reporter {
            let (sink, finished) = mpsc::unbounded_channel();
            mapper.install_sink(sink);
            tokio::spawn(report_scopes(reporter, finished));
        }
        let mapper = Arc::downgrade(&mapper);
        let mut sampling_ticker = tokio::time::interval(options.sampling_interval);
        sampling_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            interval = ?options.sampling_interval,
            max_stack_depth = options.max_stack_depth,
            "starting sampler"
        );

        tokio::spawn(async move {
            loop {
                sampling_ticker.tick().await;
                let Some(mapper) = Weak::upgrade(&mapper) else {
                    break;
                };
                sample_tick(&mapper, &*provider, options.max_stack_depth);
            }
            tracing::info!("sampler finished");
        })
    }
}

async fn report_scopes(
    reporter: Box<dyn Reporter + Send + Sync>,
    mut finished: mpsc::UnboundedReceiver<FinishedScope>,
) {
    while let Some(scope) = finished.recv().await {
        report_scope(&*reporter, scope).await;
    }
    tracing::debug!("no scope left to report");
}

async fn report_scope(reporter: &(dyn Reporter + Send + Sync), scope: FinishedScope) {
    let metadata = ReportMetadata {
        scope_id: &scope.scope_id,
        thread_id: scope.thread_id,
        thread_name: &scope.thread_name,
        start: scope.start,
        duration: scope.duration,
    };
    if let Err(err) = reporter.report(scope.chunk, &metadata).await {
        // don't stop on reporting errors
        tracing::error!(?err, scope_id = %scope.scope_id, "error reporting scope, continuing");
    }
}

/// Records one sample for every tracked thread that has a current scope.
/// Returns the number of recorded samples.
///
/// The provider is asked for one thread at a time, so a provider panicking
/// on one thread only costs that thread its sample.
pub(crate) fn sample_tick(
    mapper: &ThreadScopeMapper,
    provider: &(dyn ThreadStackProvider + Send + Sync),
    max_stack_depth: usize,
) -> usize {
    let tracked = mapper.tracked_threads();
    let mut sampled = 0;
    for &thread_id in tracked.iter() {
        let Some(scope) = mapper.current_scope(thread_id) else {
            continue;
        };
        let infos = match panic::catch_unwind(AssertUnwindSafe(|| {
            provider.thread_infos(&[thread_id], max_stack_depth)
        })) {
            Ok(infos) => infos,
            Err(_) => {
                tracing::error!(
                    thread_id,
                    scope_id = scope.scope_id(),
                    "stack provider panicked, continuing"
                );
                continue;
            }
        };
        if let Some(mut info) = infos.into_iter().find(|info| info.thread_id == thread_id) {
            info.frames.truncate(max_stack_depth);
            scope.collect(&info.frames);
            sampled += 1;
        }
    }
    if !tracked.is_empty() {
        tracing::debug!(threads = tracked.len(), sampled, "sampler tick");
    }
    sampled
}
