// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::pool::ConstantPool;

/// A captured stack frame, as reported by a thread-introspection source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Name of the type declaring the method.
    pub owner: String,
    /// Method name.
    pub method: String,
    /// Source line, or a negative value when unknown.
    pub line: i32,
}

impl StackFrame {
    /// Creates a new captured frame.
    pub fn new(owner: impl Into<String>, method: impl Into<String>, line: i32) -> Self {
        StackFrame {
            owner: owner.into(),
            method: method.into(),
            line,
        }
    }
}

/// One stack frame stored as two string-pool indices plus a line number.
///
/// Equality is over the pool indices, so two frames are only equal when their
/// names were interned into the same string pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameElement {
    owner_ptr: i32,
    method_ptr: i32,
    line: i32,
}

impl FrameElement {
    /// Interns `owner` and `method` into `strings` and builds the frame.
    pub fn new(owner: &str, method: &str, line: i32, strings: &mut ConstantPool<String>) -> Self {
        FrameElement {
            owner_ptr: strings.intern(owner),
            method_ptr: strings.intern(method),
            line,
        }
    }

    /// Builds a frame from already resolved string-pool indices.
    pub fn from_ptrs(owner_ptr: i32, method_ptr: i32, line: i32) -> Self {
        FrameElement {
            owner_ptr,
            method_ptr,
            line,
        }
    }

    /// String-pool index of the owner type name.
    pub fn owner_ptr(&self) -> i32 {
        self.owner_ptr
    }

    /// String-pool index of the method name.
    pub fn method_ptr(&self) -> i32 {
        self.method_ptr
    }

    /// Source line number.
    pub fn line(&self) -> i32 {
        self.line
    }

    /// Resolves the owner type name.
    pub fn owner<'a>(&self, strings: &'a ConstantPool<String>) -> Option<&'a str> {
        strings.lookup(self.owner_ptr).map(String::as_str)
    }

    /// Resolves the method name.
    pub fn method<'a>(&self, strings: &'a ConstantPool<String>) -> Option<&'a str> {
        strings.lookup(self.method_ptr).map(String::as_str)
    }

    /// Resolves both names back into a [`StackFrame`].
    pub fn resolve(&self, strings: &ConstantPool<String>) -> Option<StackFrame> {
        Some(StackFrame::new(
            self.owner(strings)?,
            self.method(strings)?,
            self.line,
        ))
    }
}
