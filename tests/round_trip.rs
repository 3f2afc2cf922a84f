// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;

use mlt_agent::{
    frame::StackFrame,
    manager::ThreadScopeManager,
    reader::{read_mlt, MltChunk},
    registry::ThreadScopeMapper,
};

fn stack(entries: &[(&str, &str, i32)]) -> Vec<StackFrame> {
    entries.iter()
        .map(|(owner, method, line)| StackFrame::new(*owner, *method, *line))
        .collect()
}

fn single_chunk(bytes: &[u8]) -> MltChunk {
    let mut chunks = read_mlt(bytes).unwrap();
    assert_eq!(chunks.len(), 1);
    chunks.remove(0)
}

#[test]
fn test_repeated_and_branching_stacks() {
    let manager = ThreadScopeManager::new(17, "main-thread");
    let scope = manager.start_scope("scenario");
    let a = stack(&[("Foo", "bar", 10), ("Main", "run", 5)]);
    let b = stack(&[("Baz", "qux", 20), ("Main", "run", 5)]);
    scope.collect(&a);
    scope.collect(&a);
    scope.collect(&b);

    let chunk = single_chunk(&scope.end());
    assert_eq!(chunk.encoded_samples(), &[1, -1, 2]);
    assert_eq!(chunk.resolved_samples(), vec![a.clone(), a, b]);

    let strings: BTreeSet<&str> = chunk
        .pools()
        .strings()
        .iter()
        .map(|(_, value)| value.as_str())
        .collect();
    assert_eq!(
        strings,
        BTreeSet::from(["Foo", "bar", "Main", "run", "Baz", "qux", "main-thread"])
    );
    assert_eq!(chunk.pools().strings().lookup(0).map(String::as_str), Some("main-thread"));

    let stacks = chunk.pools().stacks();
    assert_eq!(stacks.len(), 3);
    let shared = stacks.lookup(0).unwrap();
    assert!(shared.is_single_frame());
    assert_eq!(stacks.lookup(1).unwrap().subtree(), Some(0));
    assert_eq!(stacks.lookup(2).unwrap().subtree(), Some(0));
}

#[test]
fn test_round_trip_preserves_order_and_multiplicity() {
    let manager = ThreadScopeManager::new(3, "worker");
    let scope = manager.start_scope("round-trip");
    let suffix = [("Svc", "handle", 40), ("Loop", "poll", 30), ("Main", "run", 5)];
    let mut deep = stack(&[("Db", "query", 90), ("Repo", "load", 70)]);
    deep.extend(stack(&suffix));
    let mut shallow = stack(&[("Cache", "get", 12)]);
    shallow.extend(stack(&suffix));
    let other = stack(&[("Gc", "collect", 1)]);

    let captured = vec![
        deep.clone(),
        deep.clone(),
        deep.clone(),
        shallow.clone(),
        deep.clone(),
        other.clone(),
        other.clone(),
        shallow.clone(),
    ];
    for frames in &captured {
        scope.collect(frames);
    }

    let bytes = scope.end();
    let chunk = single_chunk(&bytes);
    assert_eq!(chunk.thread_id(), 3);
    assert_eq!(chunk.thread_name(), Some("worker"));
    assert_eq!(chunk.sample_count(), captured.len());
    assert_eq!(chunk.resolved_samples(), captured);
    assert_eq!(chunk.to_bytes(), bytes);

    let mut ptrs = chunk.stack_ptrs();
    let deep_ptr = ptrs.next().unwrap();
    let shallow_ptr = ptrs.nth(2).unwrap();
    let suffix_of = |ptr: i32, skip: usize| {
        let mut ptr = ptr;
        for _ in 0..skip {
            ptr = chunk.pools().stacks().lookup(ptr).unwrap().subtree().unwrap();
        }
        ptr
    };
    assert_eq!(suffix_of(deep_ptr, 2), suffix_of(shallow_ptr, 1));
    assert_eq!(chunk.pools().stacks().lookup(deep_ptr).unwrap().depth(), 5);
}

#[test]
fn test_chunk_only_carries_reachable_entries() {
    let mapper = ThreadScopeMapper::new();
    let manager = mapper.manager(8, "shared");

    let earlier = manager.start_scope("earlier");
    earlier.collect(&stack(&[("Unused", "first", 1), ("Unused", "root", 2)]));
    earlier.end();

    let scope = manager.start_scope("later");
    let used = stack(&[("Foo", "bar", 10), ("Main", "run", 5)]);
    scope.collect(&used);
    scope.collect(&stack(&[("Main", "run", 5)]));
    // frames interned into the shared pools but never sampled by this scope
    let bystander = manager.start_scope("bystander");
    bystander.collect(&stack(&[("Other", "work", 3), ("Main", "run", 5)]));
    manager.end_scope(&bystander);

    manager.with_pools(|pools| {
        assert_eq!(pools.frames().len(), 5);
        assert_eq!(pools.stacks().len(), 5);
    });

    let chunk = single_chunk(&scope.end());
    let pools = chunk.pools();
    assert_eq!(pools.frames().len(), 2);
    assert_eq!(pools.stacks().len(), 2);
    let strings: BTreeSet<&str> = pools.strings().iter().map(|(_, s)| s.as_str()).collect();
    assert_eq!(strings, BTreeSet::from(["shared", "Foo", "bar", "Main", "run"]));
    assert_eq!(
        chunk.resolved_samples(),
        vec![used, stack(&[("Main", "run", 5)])]
    );
}

#[test]
fn test_scopes_are_independent_chunks() {
    let mapper = ThreadScopeMapper::new();
    let first = mapper.start_scope(1, "one", "first");
    let second = mapper.start_scope(2, "two", "second");
    first.collect(&stack(&[("A", "a", 1)]));
    second.collect(&stack(&[("B", "b", 2)]));

    let mut bytes = second.end();
    bytes.extend(first.end());
    let chunks = read_mlt(&bytes).unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].thread_name(), Some("two"));
    assert_eq!(chunks[0].resolved_samples(), vec![stack(&[("B", "b", 2)])]);
    assert_eq!(chunks[1].thread_name(), Some("one"));
    assert_eq!(chunks[1].resolved_samples(), vec![stack(&[("A", "a", 1)])]);
}
