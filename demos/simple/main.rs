// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use mlt_agent::{
    provider::PublishedStackProvider,
    registry::ThreadScopeMapper,
    reporter::{local::LocalReporter, multi::MultiReporter},
    sampler::{SamplerBuilder, SamplerOptionsBuilder},
};
use std::{sync::Arc, time::Duration};

use clap::Parser;

mod workload;

pub fn set_up_tracing() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    let format = tracing_subscriber::fmt::layer().pretty();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(format)
        .with(filter)
        .init();
}

/// Simple program to test the scope sampler
#[derive(Parser, Debug)]
struct Args {
    /// Directory the chunks of ended scopes are written to
    #[arg(long)]
    local: String,
    /// Second directory receiving a copy of every chunk
    #[arg(long)]
    mirror: Option<String>,
    #[arg(long)]
    #[clap(value_parser = humantime::parse_duration)]
    duration: Option<Duration>,
    #[arg(long, default_value = "10ms")]
    #[clap(value_parser = humantime::parse_duration)]
    sampling_interval: Duration,
    #[arg(long)]
    max_stack_depth: Option<usize>,
    #[arg(long, default_value = "4")]
    workers: u64,
    #[arg(long)]
    worker_threads: Option<usize>,
}

pub fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut rt: tokio::runtime::Builder = tokio::runtime::Builder::new_multi_thread();
    rt.enable_all();
    if let Some(worker_threads) = args.worker_threads {
        rt.worker_threads(worker_threads);
    }
    let rt = rt.build()?;
    rt.block_on(main_internal(args))
}

async fn main_internal(args: Args) -> Result<(), anyhow::Error> {
    set_up_tracing();
    tracing::info!("main started");

    let mut options = SamplerOptionsBuilder::default().with_sampling_interval(args.sampling_interval);
    if let Some(depth) = args.max_stack_depth {
        options = options.with_max_stack_depth(depth);
    }

    let mut reporter = MultiReporter::default().with_reporter(LocalReporter::new(args.local));
    if let Some(mirror) = args.mirror {
        reporter = reporter.with_reporter(LocalReporter::new(mirror));
    }

    let mapper = Arc::new(ThreadScopeMapper::new());
    let provider = Arc::new(PublishedStackProvider::new());
    let sampler = SamplerBuilder::default()
        .with_options(options.build()?)
        .with_provider(provider.clone())
        .with_reporter(reporter)
        .build();

    tracing::info!("starting sampler");
    sampler.spawn(mapper.clone());
    tracing::info!("sampler started");

    let workload = workload::run(mapper, provider, args.workers);
    if let Some(timeout) = args.duration {
        tokio::time::timeout(timeout, workload).await.unwrap_err();
    } else {
        workload.await;
    }

    Ok(())
}
