// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The stack of open scopes of one thread.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, Weak},
};

use arc_swap::ArcSwapOption;

use crate::{
    registry::MapperShared,
    scope::{lock, FinishedScope, ScopeStackCollector},
    stack::StackPools,
};

/// Owns the pools of one thread and the scopes currently open on it.
///
/// Scopes nest: the most recently started one that has not ended yet is the
/// current scope and receives the thread's samples. The current scope is
/// published atomically so the sampler can read it without taking a lock.
#[derive(Debug)]
pub struct ThreadScopeManager {
    thread_id: u64,
    thread_name: String,
    pools: Arc<Mutex<StackPools>>,
    scopes: Mutex<VecDeque<Arc<ScopeStackCollector>>>,
    current: ArcSwapOption<ScopeStackCollector>,
    shared: Arc<MapperShared>,
    this: Weak<ThreadScopeManager>,
}

impl ThreadScopeManager {
    /// A manager that is not part of any [`ThreadScopeMapper`].
    ///
    /// [`ThreadScopeMapper`]: crate::registry::ThreadScopeMapper
    pub fn new(thread_id: u64, thread_name: &str) -> Arc<Self> {
        Self::with_shared(thread_id, thread_name, Arc::default())
    }

    pub(crate) fn with_shared(thread_id: u64, thread_name: &str, shared: Arc<MapperShared>) -> Arc<Self> {
        Arc::new_cyclic(|this| ThreadScopeManager {
            thread_id,
            thread_name: thread_name.to_owned(),
            pools: Arc::new(Mutex::new(StackPools::new(thread_name))),
            scopes: Mutex::new(VecDeque::new()),
            current: ArcSwapOption::empty(),
            shared,
            this: this.clone(),
        })
    }

    /// Id of the managed thread.
    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    /// Name of the managed thread.
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Opens a new innermost scope.
    pub fn start_scope(&self, scope_id: &str) -> Arc<ScopeStackCollector> {
        let collector = Arc::new(ScopeStackCollector::new(
            scope_id.to_owned(),
            self.thread_id,
            self.thread_name.clone(),
            Arc::clone(&self.pools),
            self.this.clone(),
        ));
        let mut scopes = lock(&self.scopes);
        if scopes.is_empty() {
            self.shared.tracked.add(self.thread_id);
        }
        scopes.push_back(Arc::clone(&collector));
        self.current.store(Some(Arc::clone(&collector)));
        tracing::debug!(thread_id = self.thread_id, scope_id, depth = scopes.len(), "started scope");
        collector
    }

    /// The innermost open scope.
    pub fn current_scope(&self) -> Option<Arc<ScopeStackCollector>> {
        self.current.load_full()
    }

    /// Removes `target` from the open scopes. Scopes may end out of order;
    /// returns false, with a warning, if `target` is not open on this thread.
    pub fn end_scope(&self, target: &ScopeStackCollector) -> bool {
        let mut scopes = lock(&self.scopes);
        let Some(position) = scopes
            .iter()
            .rposition(|scope| std::ptr::eq(Arc::as_ptr(scope), target))
        else {
            tracing::warn!(
                thread_id = self.thread_id,
                scope_id = target.scope_id(),
                "ending a scope that is not open on this thread"
            );
            return false;
        };
        scopes.remove(position);
        self.current.store(scopes.back().cloned());
        if scopes.is_empty() {
            self.shared.tracked.remove(self.thread_id);
        }
        true
    }

    /// Number of scopes currently open.
    pub fn open_scopes(&self) -> usize {
        lock(&self.scopes).len()
    }

    /// Runs `f` with the thread's pools locked.
    pub fn with_pools<R>(&self, f: impl FnOnce(&StackPools) -> R) -> R {
        f(&lock(&self.pools))
    }

    pub(crate) fn submit(&self, scope: FinishedScope) {
        self.shared.submit(scope);
    }
}
