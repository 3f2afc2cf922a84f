// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Decoder for buffers of serialized MLT chunks.
//!
//! ```
//! # use mlt_agent::{manager::ThreadScopeManager, frame::StackFrame};
//! let manager = ThreadScopeManager::new(1, "main");
//! let scope = manager.start_scope("request");
//! scope.collect(&[StackFrame::new("Foo", "bar", 10), StackFrame::new("Main", "run", 5)]);
//! let bytes = scope.end();
//!
//! let chunks = mlt_agent::reader::read_mlt(&bytes).unwrap();
//! assert_eq!(chunks[0].thread_name(), Some("main"));
//! assert_eq!(chunks[0].resolved_samples().len(), 1);
//! ```

use std::collections::HashMap;

use thiserror::Error;

use crate::{
    chunk::{ChunkHeader, ChunkWriter, HEADER_LEN, MAGIC},
    frame::{FrameElement, StackFrame},
    leb128::Leb128Reader,
    pool::ConstantPool,
    stack::{StackElement, StackPools, NO_SUBTREE},
};

/// Errors decoding an MLT buffer. Any error aborts decoding of the whole buffer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MltReadError {
    /// A chunk does not start with the magic bytes.
    #[error("invalid magic {found:?} at offset {offset}")]
    InvalidMagic {
        /// Start of the chunk.
        offset: usize,
        /// The bytes found instead.
        found: [u8; 4],
    },
    /// The data ends in the middle of a value.
    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEof {
        /// Position of the truncated value.
        offset: usize,
    },
    /// A varint is longer than its type allows.
    #[error("malformed varint at offset {offset}")]
    MalformedVarint {
        /// Position of the varint.
        offset: usize,
    },
    /// The declared chunk size is smaller than a header or exceeds the data.
    #[error("invalid chunk size {size} for chunk at offset {offset}")]
    InvalidChunkSize {
        /// Start of the chunk.
        offset: usize,
        /// The declared size.
        size: i32,
    },
    /// The declared constant pool offset lies outside the chunk.
    #[error("invalid constant pool offset {pool_offset} for chunk at offset {offset}")]
    InvalidPoolOffset {
        /// Start of the chunk.
        offset: usize,
        /// The declared offset.
        pool_offset: i32,
    },
    /// A pooled string is not valid UTF-8.
    #[error("invalid utf-8 string at offset {offset}: {source}")]
    InvalidUtf8 {
        /// Position of the string.
        offset: usize,
        /// The decoding error.
        #[source]
        source: std::string::FromUtf8Error,
    },
    /// A pool declares more entries than the rest of the chunk can hold.
    #[error("invalid pool entry count {count} at offset {offset}")]
    InvalidPoolCount {
        /// Position of the count.
        offset: usize,
        /// The declared count.
        count: i32,
    },
    /// A sample or pool entry references a missing or cyclic pool entry.
    #[error("unresolved {kind} reference {index}")]
    DanglingReference {
        /// The referenced pool: `string`, `frame` or `stack`.
        kind: &'static str,
        /// The referenced index.
        index: i32,
    },
    /// A repeat count is not preceded by a stack pointer.
    #[error("repeat count without a preceding stack pointer at offset {offset}")]
    OrphanRepeat {
        /// Position of the repeat count.
        offset: usize,
    },
    /// The last sample runs past the constant pool offset.
    #[error("sample sequence overruns the constant pool at offset {offset}")]
    SampleOverrun {
        /// Position where the sample sequence ended.
        offset: usize,
    },
}

/// One decoded chunk: header values, its own pools and the sample sequence.
#[derive(Debug, Clone)]
pub struct MltChunk {
    header: ChunkHeader,
    pools: StackPools,
    samples: Vec<i32>,
}

impl MltChunk {
    /// Header values.
    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// Format version.
    pub fn version(&self) -> u8 {
        self.header.version
    }

    /// Scope start in monotonic nanoseconds.
    pub fn start_nanos(&self) -> i64 {
        self.header.start_nanos
    }

    /// Scope duration in nanoseconds.
    pub fn duration_nanos(&self) -> i64 {
        self.header.duration_nanos
    }

    /// Id of the sampled thread.
    pub fn thread_id(&self) -> u64 {
        self.header.thread_id
    }

    /// Thread name, stored at string index 0.
    pub fn thread_name(&self) -> Option<&str> {
        self.pools.thread_name()
    }

    /// The chunk's constant pools.
    pub fn pools(&self) -> &StackPools {
        &self.pools
    }

    /// The sample sequence as stored, with repeat counts still compressed.
    pub fn encoded_samples(&self) -> &[i32] {
        &self.samples
    }

    /// The stack pointer of every sample, repeats expanded.
    pub fn stack_ptrs(&self) -> StackPtrs<'_> {
        StackPtrs::new(&self.samples)
    }

    /// Number of samples once repeats are expanded.
    pub fn sample_count(&self) -> usize {
        self.stack_ptrs().count()
    }

    /// Every sample resolved into its frames, innermost first.
    pub fn resolved_samples(&self) -> Vec<Vec<StackFrame>> {
        self.stack_ptrs()
            .map(|ptr| self.pools.resolve(ptr).unwrap_or_default())
            .collect()
    }

    /// Encodes this chunk again. A chunk decoded from a buffer re-encodes to
    /// the same bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ChunkWriter::new(&self.header);
        for sample in &self.samples {
            writer.write_sample(*sample);
        }
        writer.begin_constant_pools();
        writer.write_string_pool(
            self.pools
                .strings()
                .iter()
                .map(|(index, value)| (index, value.as_str())),
        );
        writer.write_frame_pool(self.pools.frames().iter().map(|(index, frame)| (index, *frame)));
        writer.write_stack_pool(self.pools.stacks().iter().map(|(index, stack)| (index, *stack)));
        writer.finish()
    }
}

/// Expands a compressed sample sequence into one stack pointer per sample.
#[derive(Debug, Clone)]
pub struct StackPtrs<'a> {
    encoded: std::slice::Iter<'a, i32>,
    last: Option<i32>,
    pending: u32,
}

impl<'a> StackPtrs<'a> {
    /// Iterates over `encoded`, where a negative value `-n` repeats the
    /// preceding pointer `n` more times.
    pub fn new(encoded: &'a [i32]) -> Self {
        StackPtrs {
            encoded: encoded.iter(),
            last: None,
            pending: 0,
        }
    }
}

impl Iterator for StackPtrs<'_> {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        if self.pending > 0 {
            self.pending -= 1;
            return self.last;
        }
        loop {
            let value = *self.encoded.next()?;
            if value >= 0 {
                self.last = Some(value);
                return Some(value);
            }
            if let Some(last) = self.last {
                self.pending = value.unsigned_abs() - 1;
                return Some(last);
            }
        }
    }
}

/// Decodes every chunk in `data`.
pub fn read_mlt(data: &[u8]) -> Result<Vec<MltChunk>, MltReadError> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (chunk, size) = read_chunk(data, offset)?;
        tracing::trace!(offset, size, samples = chunk.samples.len(), "decoded mlt chunk");
        chunks.push(chunk);
        offset += size;
    }
    Ok(chunks)
}

fn read_chunk(data: &[u8], offset: usize) -> Result<(MltChunk, usize), MltReadError> {
    let mut r = Leb128Reader::new(&data[offset..], offset);
    let found = r.read_array::<4>()?;
    if found != MAGIC {
        return Err(MltReadError::InvalidMagic { offset, found });
    }
    let version = r.read_byte()?;
    let size = r.read_int_raw()?;
    let pool_offset = r.read_int_raw()?;

    let size_usize = usize::try_from(size)
        .ok()
        .filter(|size| *size >= HEADER_LEN && *size <= data.len() - offset)
        .ok_or(MltReadError::InvalidChunkSize { offset, size })?;
    let pool_start = usize::try_from(pool_offset)
        .ok()
        .filter(|start| *start >= HEADER_LEN && *start <= size_usize)
        .ok_or(MltReadError::InvalidPoolOffset {
            offset,
            pool_offset,
        })?;

    let header = ChunkHeader {
        version,
        start_nanos: r.read_long_raw()?,
        duration_nanos: r.read_long_raw()?,
        thread_id: r.read_long_raw()? as u64,
    };
    let samples_start = r.position();

    // everything else is bounded by the declared chunk size
    let mut r = Leb128Reader::new(&data[offset..offset + size_usize], offset);
    r.seek(pool_start);
    let pools = read_pools(&mut r)?;

    r.seek(samples_start);
    let mut samples = Vec::new();
    while r.position() < pool_start {
        let at = r.absolute_position();
        let value = r.read_int()?;
        if value < 0 {
            if samples.is_empty() {
                return Err(MltReadError::OrphanRepeat { offset: at });
            }
        } else if pools.stacks().lookup(value).is_none() {
            return Err(MltReadError::DanglingReference {
                kind: "stack",
                index: value,
            });
        }
        samples.push(value);
    }
    if r.position() != pool_start {
        return Err(MltReadError::SampleOverrun {
            offset: r.absolute_position(),
        });
    }

    Ok((
        MltChunk {
            header,
            pools,
            samples,
        },
        size_usize,
    ))
}

fn read_pools(r: &mut Leb128Reader<'_>) -> Result<StackPools, MltReadError> {
    let mut strings = ConstantPool::<String>::new();
    for _ in 0..read_count(r, MIN_STRING_ENTRY_LEN)? {
        let index = r.read_int()?;
        let value = r.read_utf()?;
        strings.insert(value, index);
    }

    let mut frames = ConstantPool::<FrameElement>::new();
    for _ in 0..read_count(r, MIN_FRAME_ENTRY_LEN)? {
        let index = r.read_int()?;
        let owner = r.read_int()?;
        let method = r.read_int()?;
        let line = r.read_int()?;
        for ptr in [owner, method] {
            if strings.lookup(ptr).is_none() {
                return Err(MltReadError::DanglingReference {
                    kind: "string",
                    index: ptr,
                });
            }
        }
        frames.insert(FrameElement::from_ptrs(owner, method, line), index);
    }

    let count = read_count(r, MIN_STACK_ENTRY_LEN)?;
    let mut raw = HashMap::with_capacity(count);
    let mut order = Vec::with_capacity(count);
    for _ in 0..count {
        let index = r.read_int()?;
        let head = r.read_int()?;
        let subtree = r.read_int()?;
        if frames.lookup(head).is_none() {
            return Err(MltReadError::DanglingReference {
                kind: "frame",
                index: head,
            });
        }
        raw.insert(index, (head, subtree));
        order.push(index);
    }
    let depths = resolve_depths(&raw)?;
    let mut stacks = ConstantPool::<StackElement>::new();
    for index in order {
        let (head, subtree) = raw[&index];
        let subtree = if subtree < 0 { NO_SUBTREE } else { subtree };
        stacks.insert(StackElement::from_parts(head, subtree, depths[&index]), index);
    }

    Ok(StackPools::from_parts(strings, frames, stacks))
}

// smallest encoding of one entry: one byte per varint, empty strings
const MIN_STRING_ENTRY_LEN: usize = 2;
const MIN_FRAME_ENTRY_LEN: usize = 4;
const MIN_STACK_ENTRY_LEN: usize = 3;

/// Reads a pool entry count no larger than the rest of the chunk can hold.
fn read_count(r: &mut Leb128Reader<'_>, min_entry_len: usize) -> Result<usize, MltReadError> {
    let offset = r.absolute_position();
    let count = r.read_int()?;
    usize::try_from(count)
        .ok()
        .filter(|n| *n <= r.remaining() / min_entry_len)
        .ok_or(MltReadError::InvalidPoolCount { offset, count })
}

/// Computes the depth of every stack entry. Entries may reference subtrees
/// that appear later in the pool; missing or cyclic references are errors.
fn resolve_depths(raw: &HashMap<i32, (i32, i32)>) -> Result<HashMap<i32, i32>, MltReadError> {
    let mut depths: HashMap<i32, i32> = HashMap::with_capacity(raw.len());
    for &start in raw.keys() {
        let mut chain = Vec::new();
        let mut cursor = start;
        let mut base = loop {
            if let Some(depth) = depths.get(&cursor) {
                break *depth;
            }
            if chain.len() > raw.len() {
                return Err(MltReadError::DanglingReference {
                    kind: "stack",
                    index: cursor,
                });
            }
            let (_, subtree) = raw.get(&cursor).ok_or(MltReadError::DanglingReference {
                kind: "stack",
                index: cursor,
            })?;
            chain.push(cursor);
            if *subtree < 0 {
                break 0;
            }
            cursor = *subtree;
        };
        for index in chain.into_iter().rev() {
            base += 1;
            depths.insert(index, base);
        }
    }
    Ok(depths)
}
