// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Recording of the stack samples taken while one scope is active on one
//! thread.

use std::{
    collections::BTreeSet,
    io,
    path::Path,
    sync::{Arc, LazyLock, Mutex, MutexGuard, Weak},
    time::{Duration, Instant},
};

use crate::{
    chunk::{ChunkHeader, ChunkWriter, VERSION},
    frame::StackFrame,
    manager::ThreadScopeManager,
    stack::StackPools,
};

static PROCESS_START: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Nanoseconds elapsed on the monotonic clock since the first call in this
/// process.
pub(crate) fn monotonic_nanos() -> i64 {
    PROCESS_START.elapsed().as_nanos() as i64
}

/// Locks `mutex`, recovering the data if a previous holder panicked. Pools and
/// sample sequences are only ever appended to, so they stay consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A serialized scope on its way to a reporter.
#[derive(Debug)]
pub(crate) struct FinishedScope {
    pub(crate) scope_id: String,
    pub(crate) thread_id: u64,
    pub(crate) thread_name: String,
    pub(crate) start: Duration,
    pub(crate) duration: Duration,
    pub(crate) chunk: Vec<u8>,
}

/// Appends `ptr` to a run-length encoded sample sequence.
///
/// A negative entry `-n` repeats the pointer before it `n` more times. The
/// count stops growing before it can overflow; the next sample then starts a
/// fresh run.
pub(crate) fn append_compressed(samples: &mut Vec<i32>, ptr: i32) {
    let len = samples.len();
    match samples[..] {
        [.., run_ptr, count] if count < 0 && run_ptr == ptr && count > i32::MIN + 2 => {
            samples[len - 1] = count - 1;
        }
        [.., last] if last == ptr => samples.push(-1),
        _ => samples.push(ptr),
    }
}

#[derive(Debug, Default)]
struct SampleState {
    samples: Vec<i32>,
    terminated: bool,
}

/// Records the stacks sampled on one thread while one scope is open.
///
/// Samples are fed by the sampler through [`collect`]; the owning thread ends
/// the scope with [`end`], which yields a self-contained MLT chunk. The
/// collector shares its thread's pools with every other scope of that thread.
///
/// [`collect`]: ScopeStackCollector::collect
/// [`end`]: ScopeStackCollector::end
#[derive(Debug)]
pub struct ScopeStackCollector {
    scope_id: String,
    thread_id: u64,
    thread_name: String,
    start_nanos: i64,
    pools: Arc<Mutex<StackPools>>,
    state: Mutex<SampleState>,
    manager: Weak<ThreadScopeManager>,
}

impl ScopeStackCollector {
    pub(crate) fn new(
        scope_id: String,
        thread_id: u64,
        thread_name: String,
        pools: Arc<Mutex<StackPools>>,
        manager: Weak<ThreadScopeManager>,
    ) -> Self {
        ScopeStackCollector {
            scope_id,
            thread_id,
            thread_name,
            start_nanos: monotonic_nanos(),
            pools,
            state: Mutex::new(SampleState::default()),
            manager,
        }
    }

    /// The scope identifier.
    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    /// Id of the thread this scope belongs to.
    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    /// Scope start in monotonic nanoseconds.
    pub fn start_nanos(&self) -> i64 {
        self.start_nanos
    }

    /// Returns true once the scope was serialized.
    pub fn is_terminated(&self) -> bool {
        lock(&self.state).terminated
    }

    /// A copy of the compressed sample sequence recorded so far.
    pub fn encoded_samples(&self) -> Vec<i32> {
        lock(&self.state).samples.clone()
    }

    /// Records one captured stack, innermost frame first.
    ///
    /// Empty captures are dropped, as are samples arriving after the scope
    /// was serialized.
    pub fn collect(&self, frames: &[StackFrame]) {
        if frames.is_empty() {
            return;
        }
        let Some(ptr) = lock(&self.pools).intern_stack(frames) else {
            return;
        };
        let mut state = lock(&self.state);
        if state.terminated {
            tracing::trace!(scope_id = %self.scope_id, "dropping sample for a terminated scope");
            return;
        }
        append_compressed(&mut state.samples, ptr);
    }

    /// Serializes the scope into a self-contained chunk and terminates it.
    ///
    /// Only the pool entries reachable from the recorded samples are written,
    /// even though the pools are shared with the thread's other scopes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut state = lock(&self.state);
        state.terminated = true;
        let header = ChunkHeader {
            version: VERSION,
            start_nanos: self.start_nanos,
            duration_nanos: (monotonic_nanos() - self.start_nanos).max(0),
            thread_id: self.thread_id,
        };
        let pools = lock(&self.pools);

        let mut writer = ChunkWriter::new(&header);
        let mut stacks = BTreeSet::new();
        let mut frames = BTreeSet::new();
        let mut strings = BTreeSet::from([0]);
        for &sample in &state.samples {
            writer.write_sample(sample);
            if sample < 0 {
                continue;
            }
            let mut next = Some(sample);
            while let Some(ptr) = next {
                if !stacks.insert(ptr) {
                    // the rest of this chain was already walked
                    break;
                }
                next = pools.stacks().lookup(ptr).and_then(|node| {
                    frames.insert(node.head());
                    node.subtree()
                });
            }
        }
        for &frame in &frames {
            if let Some(frame) = pools.frames().lookup(frame) {
                strings.insert(frame.owner_ptr());
                strings.insert(frame.method_ptr());
            }
        }

        writer.begin_constant_pools();
        let string_entries: Vec<(i32, &str)> = strings
            .iter()
            .filter_map(|&index| Some((index, pools.strings().lookup(index)?.as_str())))
            .collect();
        writer.write_string_pool(string_entries.into_iter());
        let frame_entries: Vec<_> = frames
            .iter()
            .filter_map(|&index| Some((index, *pools.frames().lookup(index)?)))
            .collect();
        writer.write_frame_pool(frame_entries.into_iter());
        let stack_entries: Vec<_> = stacks
            .iter()
            .filter_map(|&index| Some((index, *pools.stacks().lookup(index)?)))
            .collect();
        writer.write_stack_pool(stack_entries.into_iter());
        let chunk = writer.finish();

        tracing::debug!(
            scope_id = %self.scope_id,
            thread_id = self.thread_id,
            samples = state.samples.len(),
            stacks = stacks.len(),
            frames = frames.len(),
            bytes = chunk.len(),
            "serialized scope"
        );
        chunk
    }

    /// Ends the scope: removes it from its thread's open scopes, serializes
    /// it and hands the chunk to the reporter of a running sampler, if any.
    ///
    /// Only the call that actually closes the scope reports it. Ending a
    /// scope that is no longer open still returns its chunk.
    pub fn end(self: &Arc<Self>) -> Vec<u8> {
        let manager = self
            .manager
            .upgrade()
            .filter(|manager| manager.end_scope(self));
        let chunk = self.serialize();
        if let Some(manager) = &manager {
            let duration_nanos = (monotonic_nanos() - self.start_nanos).max(0) as u64;
            manager.submit(FinishedScope {
                scope_id: self.scope_id.clone(),
                thread_id: self.thread_id,
                thread_name: self.thread_name.clone(),
                start: Duration::from_nanos(self.start_nanos.max(0) as u64),
                duration: Duration::from_nanos(duration_nanos),
                chunk: chunk.clone(),
            });
        }
        chunk
    }

    /// Writes the serialized scope verbatim to `path`.
    pub fn dump(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::{
        reader::{read_mlt, StackPtrs},
        registry::ThreadScopeMapper,
    };

    fn stack(entries: &[(&str, &str, i32)]) -> Vec<StackFrame> {
        entries.iter()
            .map(|(owner, method, line)| StackFrame::new(*owner, *method, *line))
            .collect()
    }

    #[test]
    fn test_append_compressed() {
        let mut samples = vec![];
        for ptr in [4, 4, 4, 2, 4, 2, 2] {
            append_compressed(&mut samples, ptr);
        }
        assert_eq!(samples, vec![4, -2, 2, 4, 2, -1]);
    }

    #[test]
    fn test_append_compressed_overflow_guard() {
        let mut samples = vec![7, i32::MIN + 3];
        append_compressed(&mut samples, 7);
        assert_eq!(samples, vec![7, i32::MIN + 2]);
        append_compressed(&mut samples, 7);
        assert_eq!(samples, vec![7, i32::MIN + 2, 7]);
        append_compressed(&mut samples, 7);
        assert_eq!(samples, vec![7, i32::MIN + 2, 7, -1]);
    }

    #[test_case(1; "single")]
    #[test_case(2; "pair")]
    #[test_case(3; "triple")]
    #[test_case(1000; "thousand")]
    fn test_repeated_stack_expands_to_count(n: usize) {
        let manager = ThreadScopeManager::new(1, "main");
        let scope = manager.start_scope("repeat");
        let captured = stack(&[("Foo", "bar", 10), ("Main", "run", 5)]);
        for _ in 0..n {
            scope.collect(&captured);
        }
        let encoded = scope.encoded_samples();
        assert!(encoded.len() <= 2);
        assert_eq!(StackPtrs::new(&encoded).count(), n);
    }

    #[test]
    fn test_empty_capture_is_ignored() {
        let manager = ThreadScopeManager::new(1, "main");
        let scope = manager.start_scope("empty");
        scope.collect(&[]);
        assert!(scope.encoded_samples().is_empty());
        let chunks = read_mlt(&scope.end()).unwrap();
        assert_eq!(chunks[0].sample_count(), 0);
        assert_eq!(chunks[0].pools().strings().len(), 1);
    }

    #[test]
    fn test_collect_after_serialize_is_dropped() {
        let manager = ThreadScopeManager::new(1, "main");
        let scope = manager.start_scope("late");
        let captured = stack(&[("Foo", "bar", 10)]);
        scope.collect(&captured);
        let first = scope.serialize();
        assert!(scope.is_terminated());
        scope.collect(&captured);
        assert_eq!(scope.encoded_samples().len(), 1);
        let chunks = read_mlt(&first).unwrap();
        assert_eq!(chunks[0].sample_count(), 1);
    }

    #[test]
    fn test_dump_writes_serialized_chunk() {
        let manager = ThreadScopeManager::new(9, "io");
        let scope = manager.start_scope("dump");
        scope.collect(&stack(&[("Foo", "bar", 10)]));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scope.mlt");
        scope.dump(&path).unwrap();
        let chunks = read_mlt(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(chunks[0].thread_id(), 9);
        assert_eq!(chunks[0].resolved_samples(), vec![stack(&[("Foo", "bar", 10)])]);
    }

    #[test]
    fn test_scope_is_reported_once() {
        let mapper = ThreadScopeMapper::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        mapper.install_sink(tx);
        let scope = mapper.start_scope(1, "worker", "request");
        scope.collect(&stack(&[("Foo", "bar", 10)]));

        let first = scope.end();
        let second = scope.end();
        assert_eq!(read_mlt(&second).unwrap()[0].sample_count(), 1);

        let reported = rx.try_recv().unwrap();
        assert_eq!(reported.scope_id, "request");
        assert_eq!(reported.chunk, first);
        assert!(rx.try_recv().is_err());
    }
}
