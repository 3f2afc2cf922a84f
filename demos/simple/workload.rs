// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, time::Duration};

use mlt_agent::{frame::StackFrame, provider::PublishedStackProvider, registry::ThreadScopeMapper};

fn frames(leaf: &str, line: i32) -> Vec<StackFrame> {
    vec![
        StackFrame::new("Worker", leaf, line),
        StackFrame::new("Worker", "handle", 40),
        StackFrame::new("Worker", "run", 12),
    ]
}

async fn accidentally_slow(provider: &PublishedStackProvider, worker: u64, name: &str) {
    provider.publish(worker, name, frames("accidentally_slow", 7));
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn short_sleep(provider: &PublishedStackProvider, worker: u64, name: &str) {
    provider.publish(worker, name, frames("short_sleep", 21));
    tokio::time::sleep(Duration::from_millis(2)).await;
}

/// Runs `workers` logical workers forever. Every worker handles requests in a
/// loop, each request in its own scope, and publishes the stack it is in.
pub async fn run(mapper: Arc<ThreadScopeMapper>, provider: Arc<PublishedStackProvider>, workers: u64) {
    let mut ts: Vec<tokio::task::JoinHandle<()>> = vec![];
    for worker in 0..workers {
        let mapper = mapper.clone();
        let provider = provider.clone();
        ts.push(tokio::task::spawn(async move {
            let name = format!("worker-{worker}");
            for request in 0u64.. {
                let scope = mapper.start_scope(worker, &name, &format!("request-{request}"));
                for _ in 0..10 {
                    // most time is spent in `short_sleep`, but
                    // `accidentally_slow` makes some requests long
                    if rand::random::<f64>() < 0.05 {
                        accidentally_slow(&provider, worker, &name).await;
                    } else {
                        short_sleep(&provider, worker, &name).await;
                    }
                }
                provider.clear(worker);
                scope.end();
            }
        }));
    }
    for t in ts {
        t.await.ok();
    }
}
