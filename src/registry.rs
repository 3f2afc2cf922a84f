// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide mapping from thread ids to their [`ThreadScopeManager`].

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::{manager::ThreadScopeManager, scope::FinishedScope, scope::ScopeStackCollector};

/// Copy-on-write set of the thread ids that currently have open scopes.
#[derive(Debug, Default)]
pub(crate) struct TrackedThreads {
    ids: ArcSwap<Vec<u64>>,
}

impl TrackedThreads {
    pub(crate) fn add(&self, thread_id: u64) {
        self.ids.rcu(|ids| {
            if ids.contains(&thread_id) {
                Arc::clone(ids)
            } else {
                let mut ids = Vec::clone(ids);
                ids.push(thread_id);
                Arc::new(ids)
            }
        });
    }

    pub(crate) fn remove(&self, thread_id: u64) {
        self.ids.rcu(|ids| {
            if ids.contains(&thread_id) {
                Arc::new(ids.iter().copied().filter(|id| *id != thread_id).collect())
            } else {
                Arc::clone(ids)
            }
        });
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<u64>> {
        self.ids.load_full()
    }
}

/// State shared between a mapper and all of its managers.
#[derive(Debug, Default)]
pub(crate) struct MapperShared {
    pub(crate) tracked: TrackedThreads,
    sink: ArcSwapOption<mpsc::UnboundedSender<FinishedScope>>,
}

impl MapperShared {
    pub(crate) fn install_sink(&self, sink: mpsc::UnboundedSender<FinishedScope>) {
        self.sink.store(Some(Arc::new(sink)));
    }

    pub(crate) fn submit(&self, scope: FinishedScope) {
        if let Some(sink) = self.sink.load().as_ref() {
            if let Err(err) = sink.send(scope) {
                tracing::debug!(scope_id = %err.0.scope_id, "sampler is gone, not reporting scope");
            }
        }
    }
}

/// Registry of the per-thread scope managers.
///
/// Managers are created on first use; concurrent first uses for the same
/// thread id observe a single manager.
#[derive(Debug, Default)]
pub struct ThreadScopeMapper {
    managers: DashMap<u64, Arc<ThreadScopeManager>>,
    shared: Arc<MapperShared>,
}

impl ThreadScopeMapper {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The manager for `thread_id`, created with `thread_name` if absent.
    pub fn manager(&self, thread_id: u64, thread_name: &str) -> Arc<ThreadScopeManager> {
        let manager = self.managers.entry(thread_id).or_insert_with(|| {
            tracing::debug!(thread_id, thread_name, "registering thread");
            ThreadScopeManager::with_shared(thread_id, thread_name, Arc::clone(&self.shared))
        });
        Arc::clone(manager.value())
    }

    /// Opens a scope on `thread_id`, registering the thread if needed.
    pub fn start_scope(&self, thread_id: u64, thread_name: &str, scope_id: &str) -> Arc<ScopeStackCollector> {
        self.manager(thread_id, thread_name).start_scope(scope_id)
    }

    /// The manager for `thread_id`, if registered.
    pub fn get(&self, thread_id: u64) -> Option<Arc<ThreadScopeManager>> {
        self.managers.get(&thread_id).map(|manager| Arc::clone(manager.value()))
    }

    /// The innermost open scope of `thread_id`.
    pub fn current_scope(&self, thread_id: u64) -> Option<Arc<ScopeStackCollector>> {
        self.get(thread_id)?.current_scope()
    }

    /// Ids of the threads with at least one open scope.
    pub fn tracked_threads(&self) -> Arc<Vec<u64>> {
        self.shared.tracked.snapshot()
    }

    /// Forgets a thread, dropping its pools. Scopes still held elsewhere keep
    /// working but no longer get sampled.
    pub fn remove_thread(&self, thread_id: u64) -> bool {
        self.shared.tracked.remove(thread_id);
        self.managers.remove(&thread_id).is_some()
    }

    pub(crate) fn install_sink(&self, sink: mpsc::UnboundedSender<FinishedScope>) {
        self.shared.install_sink(sink);
    }
}
