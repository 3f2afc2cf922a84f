// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Call stacks as chains of pooled frame nodes.
//!
//! A stack node holds its innermost frame plus a pointer to the node for the
//! rest of the stack (its callers). Nodes live in a [`ConstantPool`], so two
//! stacks with a common caller suffix share the pooled nodes for that suffix
//! and a whole stack is identified by a single integer.

use crate::{
    frame::{FrameElement, StackFrame},
    pool::ConstantPool,
};

/// Subtree pointer of a node that has no callers.
pub const NO_SUBTREE: i32 = -1;

/// A stack node: the innermost frame plus the pooled node of its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackElement {
    head: i32,
    subtree: i32,
    depth: i32,
}

impl StackElement {
    /// The stack with no frames.
    pub const EMPTY: StackElement = StackElement {
        head: -1,
        subtree: NO_SUBTREE,
        depth: 0,
    };

    /// Builds the node for `head_frame_ptr` on top of `subtree`, given as the
    /// subtree's pool index together with its node.
    pub fn new_tree(head_frame_ptr: i32, subtree: Option<(i32, &StackElement)>) -> Self {
        match subtree {
            Some((ptr, node)) if !node.is_empty() => StackElement {
                head: head_frame_ptr,
                subtree: ptr,
                depth: node.depth + 1,
            },
            _ => StackElement {
                head: head_frame_ptr,
                subtree: NO_SUBTREE,
                depth: 1,
            },
        }
    }

    pub(crate) fn from_parts(head: i32, subtree: i32, depth: i32) -> Self {
        StackElement {
            head,
            subtree,
            depth,
        }
    }

    /// Frame-pool index of the innermost frame.
    pub fn head(&self) -> i32 {
        self.head
    }

    /// Stack-pool index of the caller chain, if any.
    pub fn subtree(&self) -> Option<i32> {
        (self.subtree >= 0).then_some(self.subtree)
    }

    /// Raw subtree pointer, [`NO_SUBTREE`] for single-frame nodes.
    pub fn subtree_ptr(&self) -> i32 {
        self.subtree
    }

    /// Number of frames in this stack.
    pub fn depth(&self) -> i32 {
        self.depth
    }

    /// Returns true for the empty stack.
    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    /// Returns true for a node without callers.
    pub fn is_single_frame(&self) -> bool {
        self.depth == 1
    }
}

/// The string, frame and stack pools of one thread.
///
/// String index 0 is always the thread name.
#[derive(Debug, Clone)]
pub struct StackPools {
    strings: ConstantPool<String>,
    frames: ConstantPool<FrameElement>,
    stacks: ConstantPool<StackElement>,
}

impl StackPools {
    /// Fresh pools for the thread called `thread_name`.
    pub fn new(thread_name: &str) -> Self {
        let mut strings = ConstantPool::<String>::new();
        strings.intern(thread_name);
        StackPools {
            strings,
            frames: ConstantPool::new(),
            stacks: ConstantPool::new(),
        }
    }

    pub(crate) fn from_parts(
        strings: ConstantPool<String>,
        frames: ConstantPool<FrameElement>,
        stacks: ConstantPool<StackElement>,
    ) -> Self {
        StackPools {
            strings,
            frames,
            stacks,
        }
    }

    /// The thread name stored at string index 0.
    pub fn thread_name(&self) -> Option<&str> {
        self.strings.lookup(0).map(String::as_str)
    }

    /// String pool.
    pub fn strings(&self) -> &ConstantPool<String> {
        &self.strings
    }

    /// Frame pool.
    pub fn frames(&self) -> &ConstantPool<FrameElement> {
        &self.frames
    }

    /// Stack-node pool.
    pub fn stacks(&self) -> &ConstantPool<StackElement> {
        &self.stacks
    }

    /// Interns a captured frame, returning its frame-pool index.
    pub fn intern_frame(&mut self, frame: &StackFrame) -> i32 {
        let element = FrameElement::new(&frame.owner, &frame.method, frame.line, &mut self.strings);
        self.frames.intern(&element)
    }

    /// Interns the node for `frame_ptr` on top of `subtree`, returning its
    /// stack-pool index.
    pub fn new_tree(&mut self, frame_ptr: i32, subtree: Option<i32>) -> i32 {
        let subtree = subtree.and_then(|ptr| self.stacks.lookup(ptr).map(|node| (ptr, node)));
        let node = StackElement::new_tree(frame_ptr, subtree);
        self.stacks.intern(&node)
    }

    /// Interns a whole captured stack, innermost frame first, and returns the
    /// stack-pool index of its top node. Returns `None` for an empty capture.
    ///
    /// Folding starts at the outermost caller, so walking the result yields
    /// the frames in the order they were captured.
    pub fn intern_stack(&mut self, frames: &[StackFrame]) -> Option<i32> {
        let mut subtree = None;
        for frame in frames.iter().rev() {
            let frame_ptr = self.intern_frame(frame);
            subtree = Some(self.new_tree(frame_ptr, subtree));
        }
        subtree
    }

    /// Walks the frames of the stack at `ptr`, innermost first.
    pub fn walk(&self, ptr: i32) -> StackWalk<'_> {
        StackWalk {
            pools: self,
            next: Some(ptr),
        }
    }

    /// Resolves the stack at `ptr` back into captured frames. Returns `None`
    /// if any node, frame or string along the way is missing.
    pub fn resolve(&self, ptr: i32) -> Option<Vec<StackFrame>> {
        let mut resolved = Vec::new();
        let mut next = Some(ptr);
        while let Some(ptr) = next {
            let node = self.stacks.lookup(ptr)?;
            let frame = self.frames.lookup(node.head())?;
            resolved.push(frame.resolve(&self.strings)?);
            next = node.subtree();
        }
        Some(resolved)
    }
}

/// Iterator over the frames of a pooled stack, innermost first.
#[derive(Debug)]
pub struct StackWalk<'a> {
    pools: &'a StackPools,
    next: Option<i32>,
}

impl Iterator for StackWalk<'_> {
    type Item = FrameElement;

    fn next(&mut self) -> Option<FrameElement> {
        let node = self.pools.stacks.lookup(self.next?)?;
        self.next = node.subtree();
        self.pools.frames.lookup(node.head()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(entries: &[(&str, &str, i32)]) -> Vec<StackFrame> {
        entries.iter()
            .map(|(owner, method, line)| StackFrame::new(*owner, *method, *line))
            .collect()
    }

    #[test]
    fn test_new_tree_depth() {
        let leaf = StackElement::new_tree(3, None);
        assert!(leaf.is_single_frame());
        assert_eq!(leaf.subtree(), None);
        let node = StackElement::new_tree(4, Some((0, &leaf)));
        assert_eq!(node.depth(), 2);
        assert_eq!(node.subtree(), Some(0));
        assert_eq!(node.head(), 4);
        let on_empty = StackElement::new_tree(5, Some((9, &StackElement::EMPTY)));
        assert!(on_empty.is_single_frame());
        assert!(StackElement::EMPTY.is_empty());
    }

    #[test]
    fn test_intern_stack_preserves_order() {
        let mut pools = StackPools::new("main");
        let captured = frames(&[("Foo", "bar", 10), ("Main", "run", 5), ("Thread", "start", 1)]);
        let ptr = pools.intern_stack(&captured).unwrap();
        assert_eq!(pools.stacks().lookup(ptr).unwrap().depth(), 3);
        assert_eq!(pools.resolve(ptr), Some(captured.clone()));
        let walked: Vec<i32> = pools.walk(ptr).map(|f| f.line()).collect();
        assert_eq!(walked, vec![10, 5, 1]);
        assert_eq!(pools.intern_stack(&captured), Some(ptr));
        assert_eq!(pools.intern_stack(&[]), None);
    }

    #[test]
    fn test_shared_suffix() {
        let mut pools = StackPools::new("worker-1");
        let suffix = [("Svc", "handle", 40), ("Loop", "poll", 30), ("Main", "run", 5)];
        let mut a = frames(&[("Foo", "bar", 10), ("Foo", "baz", 11)]);
        a.extend(frames(&suffix));
        let mut b = frames(&[("Baz", "qux", 20)]);
        b.extend(frames(&suffix));

        let a_ptr = pools.intern_stack(&a).unwrap();
        let b_ptr = pools.intern_stack(&b).unwrap();
        assert_ne!(a_ptr, b_ptr);

        let suffix_node = |mut ptr: i32| {
            loop {
                let node = *pools.stacks().lookup(ptr).unwrap();
                if node.depth() == suffix.len() as i32 {
                    return ptr;
                }
                ptr = node.subtree().unwrap();
            }
        };
        assert_eq!(suffix_node(a_ptr), suffix_node(b_ptr));
        // 3 shared suffix nodes + 2 for a + 1 for b
        assert_eq!(pools.stacks().len(), 6);
        assert_eq!(pools.thread_name(), Some("worker-1"));
    }
}
