// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sources of thread stacks for the sampler.

use std::{fmt, sync::Arc};

use dashmap::DashMap;

use crate::frame::StackFrame;

/// The stack of one thread at sampling time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Id of the sampled thread.
    pub thread_id: u64,
    /// Name of the sampled thread.
    pub thread_name: String,
    /// Captured frames, innermost first.
    pub frames: Vec<StackFrame>,
}

/// Captures the current stacks of a set of threads.
///
/// The [`Sampler`] asks for a single thread per call and isolates panics per
/// call, so a provider failing for one thread does not cost the others their
/// sample.
///
/// [`Sampler`]: crate::sampler::Sampler
pub trait ThreadStackProvider: fmt::Debug {
    /// Returns the stacks of those `thread_ids` that could be captured, each
    /// at most `max_depth` frames deep. Threads that are gone are skipped.
    fn thread_infos(&self, thread_ids: &[u64], max_depth: usize) -> Vec<ThreadInfo>;
}

impl<T: ThreadStackProvider + ?Sized> ThreadStackProvider for Arc<T> {
    fn thread_infos(&self, thread_ids: &[u64], max_depth: usize) -> Vec<ThreadInfo> {
        (**self).thread_infos(thread_ids, max_depth)
    }
}

/// A provider that never returns any stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpStackProvider;

impl ThreadStackProvider for NoOpStackProvider {
    fn thread_infos(&self, _thread_ids: &[u64], _max_depth: usize) -> Vec<ThreadInfo> {
        Vec::new()
    }
}

/// A provider fed by the sampled threads themselves.
///
/// Instrumented code publishes its current logical stack whenever it changes
/// and the sampler picks up whatever was published last.
#[derive(Debug, Default)]
pub struct PublishedStackProvider {
    stacks: DashMap<u64, ThreadInfo>,
}

impl PublishedStackProvider {
    /// A provider with nothing published.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the published stack of `thread_id`.
    pub fn publish(&self, thread_id: u64, thread_name: &str, frames: Vec<StackFrame>) {
        self.stacks.insert(
            thread_id,
            ThreadInfo {
                thread_id,
                thread_name: thread_name.to_owned(),
                frames,
            },
        );
    }

    /// Withdraws the published stack of `thread_id`.
    pub fn clear(&self, thread_id: u64) {
        self.stacks.remove(&thread_id);
    }
}

impl ThreadStackProvider for PublishedStackProvider {
    fn thread_infos(&self, thread_ids: &[u64], max_depth: usize) -> Vec<ThreadInfo> {
        thread_ids
            .iter()
            .filter_map(|id| {
                let published = self.stacks.get(id)?;
                let mut info = published.value().clone();
                info.frames.truncate(max_depth);
                Some(info)
            })
            .collect()
    }
}
