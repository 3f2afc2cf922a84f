// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A bidirectional, deduplicating value table.

use std::{
    borrow::Borrow,
    collections::{BTreeMap, HashMap},
    hash::Hash,
};

/// Maps values to small non-negative indices and back.
///
/// Indices are handed out in insertion order, starting at the pool's offset,
/// and stay valid for the lifetime of the pool. The pool only ever grows.
#[derive(Debug, Clone)]
pub struct ConstantPool<T> {
    offset: i32,
    next_index: i32,
    forward: HashMap<T, i32>,
    reverse: BTreeMap<i32, T>,
}

impl<T> Default for ConstantPool<T> {
    fn default() -> Self {
        Self::with_offset(0)
    }
}

impl<T> ConstantPool<T> {
    /// A pool whose first interned value gets index 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool whose first interned value gets index `offset`.
    pub fn with_offset(offset: i32) -> Self {
        ConstantPool {
            offset,
            next_index: offset,
            forward: HashMap::new(),
            reverse: BTreeMap::new(),
        }
    }

    /// Index assigned to the first interned value.
    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Number of distinct entries.
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    /// Returns true if nothing was interned or inserted yet.
    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    /// Returns the value stored at `index`, if any.
    pub fn lookup(&self, index: i32) -> Option<&T> {
        if index < 0 {
            return None;
        }
        self.reverse.get(&index)
    }

    /// Iterates over `(index, value)` pairs in ascending index order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (i32, &T)> + '_ {
        self.reverse.iter().map(|(index, value)| (*index, value))
    }
}

impl<T: Hash + Eq + Clone> ConstantPool<T> {
    /// Returns the index of `value`, assigning the next free one if the value
    /// was never seen before.
    pub fn intern<Q>(&mut self, value: &Q) -> i32
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = T> + ?Sized,
    {
        if let Some(index) = self.forward.get(value) {
            return *index;
        }
        let index = self.next_index;
        self.next_index += 1;
        let owned = value.to_owned();
        self.forward.insert(owned.clone(), index);
        self.reverse.insert(index, owned);
        index
    }

    /// Returns the index of `value` without interning it.
    pub fn index_of<Q>(&self, value: &Q) -> Option<i32>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.forward.get(value).copied()
    }

    /// Stores `value` at an explicit index.
    ///
    /// Used when rebuilding a pool from serialized entries, which may be
    /// sparse and arrive in any order. Subsequent calls to [`intern`] never
    /// hand out an index that was taken here.
    ///
    /// [`intern`]: ConstantPool::intern
    pub fn insert(&mut self, value: T, index: i32) {
        if let Some(previous) = self.reverse.insert(index, value.clone()) {
            if self.forward.get(&previous) == Some(&index) {
                self.forward.remove(&previous);
            }
        }
        self.forward.entry(value).or_insert(index);
        if index >= self.next_index {
            self.next_index = index + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_round_trip() {
        let mut pool = ConstantPool::<String>::new();
        let foo = pool.intern("foo");
        let bar = pool.intern("bar");
        assert_ne!(foo, bar);
        assert_eq!(pool.lookup(foo).map(String::as_str), Some("foo"));
        assert_eq!(pool.lookup(bar).map(String::as_str), Some("bar"));
        assert_eq!(pool.intern("foo"), foo);
        assert_eq!(pool.intern("foo"), foo);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_indices_follow_insertion_order() {
        let mut pool = ConstantPool::<String>::with_offset(3);
        assert_eq!(pool.intern("a"), 3);
        assert_eq!(pool.intern("b"), 4);
        assert_eq!(pool.intern("a"), 3);
        assert_eq!(pool.intern("c"), 5);
        assert_eq!(pool.offset(), 3);
    }

    #[test]
    fn test_lookup_unknown() {
        let mut pool = ConstantPool::<u64>::new();
        pool.intern(&7u64);
        assert_eq!(pool.lookup(-1), None);
        assert_eq!(pool.lookup(1), None);
        assert_eq!(pool.lookup(0), Some(&7u64));
    }

    #[test]
    fn test_insert_sparse_out_of_order() {
        let mut pool = ConstantPool::<String>::new();
        pool.insert("late".to_owned(), 12);
        pool.insert("early".to_owned(), 2);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.lookup(12).map(String::as_str), Some("late"));
        assert_eq!(pool.index_of("early"), Some(2));
        let order: Vec<i32> = pool.iter().map(|(index, _)| index).collect();
        assert_eq!(order, vec![2, 12]);
        // interning after explicit inserts must not collide
        assert_eq!(pool.intern("fresh"), 13);
        assert_eq!(pool.intern("early"), 2);
    }
}
