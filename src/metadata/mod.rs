// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Metadata handed to reporters together with each chunk.

pub use std::time::Duration;

/// Describes the scope a reported chunk was recorded for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMetadata<'a> {
    /// The scope identifier.
    pub scope_id: &'a str,
    /// Id of the sampled thread.
    pub thread_id: u64,
    /// Name of the sampled thread.
    pub thread_name: &'a str,
    /// Scope start on the process-local monotonic clock.
    pub start: Duration,
    /// How long the scope was open.
    pub duration: Duration,
}

#[cfg(test)]
pub(crate) const DUMMY_METADATA: ReportMetadata<'static> = ReportMetadata {
    scope_id: "dummy-scope",
    thread_id: 1,
    thread_name: "main",
    start: Duration::from_secs(1),
    duration: Duration::from_millis(250),
};
