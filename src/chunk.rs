// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Layout of a serialized MLT chunk.
//!
//! ```text
//! offset 0:  magic 'D','D',0,9
//! offset 4:  version
//! offset 5:  chunk size (raw i32, back-patched)
//! offset 9:  constant pool offset from chunk start (raw i32, back-patched)
//! offset 13: start timestamp in nanos (raw i64)
//! offset 21: duration in nanos (raw i64)
//! offset 29: thread id (raw i64)
//! offset 37: sample sequence (varints up to the constant pool offset)
//! then:      string pool, frame pool, stack pool
//! ```
//!
//! Every pool section is a varint count followed by entries that start with
//! their pool index. Strings are `(index, utf)`, frames are
//! `(index, owner, method, line)`, stacks are `(index, head, subtree)`.

use crate::{frame::FrameElement, leb128::Leb128Writer, stack::StackElement};

/// Magic bytes at the start of every chunk.
pub const MAGIC: [u8; 4] = [b'D', b'D', 0, 9];
/// Format version written by this crate.
pub const VERSION: u8 = 1;

pub(crate) const SIZE_OFFSET: usize = 5;
pub(crate) const POOL_OFFSET_OFFSET: usize = 9;
pub(crate) const HEADER_LEN: usize = 37;

/// Fixed header values of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Format version.
    pub version: u8,
    /// Scope start, in monotonic nanoseconds.
    pub start_nanos: i64,
    /// Scope duration, in nanoseconds.
    pub duration_nanos: i64,
    /// Id of the sampled thread.
    pub thread_id: u64,
}

/// Streams one chunk, back-patching the offsets that are only known at the
/// end.
#[derive(Debug)]
pub(crate) struct ChunkWriter {
    out: Leb128Writer,
}

impl ChunkWriter {
    /// Writes the header with placeholder size and pool offset.
    pub(crate) fn new(header: &ChunkHeader) -> Self {
        let mut out = Leb128Writer::new();
        out.write_bytes(&MAGIC)
            .write_byte(header.version)
            .write_int_raw(0)
            .write_int_raw(0)
            .write_long_raw(header.start_nanos)
            .write_long_raw(header.duration_nanos)
            .write_long_raw(header.thread_id as i64);
        debug_assert_eq!(out.position(), HEADER_LEN);
        ChunkWriter { out }
    }

    pub(crate) fn write_sample(&mut self, value: i32) {
        self.out.write_int(value);
    }

    /// Ends the sample sequence; the pool sections follow.
    pub(crate) fn begin_constant_pools(&mut self) {
        let offset = self.out.position() as i32;
        self.out.patch_int_raw(POOL_OFFSET_OFFSET, offset);
    }

    pub(crate) fn write_string_pool<'a>(&mut self, entries: impl ExactSizeIterator<Item = (i32, &'a str)>) {
        self.out.write_int(entries.len() as i32);
        for (index, value) in entries {
            self.out.write_int(index).write_utf(value);
        }
    }

    pub(crate) fn write_frame_pool(&mut self, entries: impl ExactSizeIterator<Item = (i32, FrameElement)>) {
        self.out.write_int(entries.len() as i32);
        for (index, frame) in entries {
            self.out
                .write_int(index)
                .write_int(frame.owner_ptr())
                .write_int(frame.method_ptr())
                .write_int(frame.line());
        }
    }

    pub(crate) fn write_stack_pool(&mut self, entries: impl ExactSizeIterator<Item = (i32, StackElement)>) {
        self.out.write_int(entries.len() as i32);
        for (index, stack) in entries {
            self.out
                .write_int(index)
                .write_int(stack.head())
                .write_int(stack.subtree_ptr());
        }
    }

    /// Back-patches the chunk size and returns the bytes.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        let size = self.out.position() as i32;
        self.out.patch_int_raw(SIZE_OFFSET, size);
        self.out.into_inner()
    }
}
