// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Destinations for the chunks of ended scopes.

use std::fmt;

use async_trait::async_trait;

use crate::metadata::ReportMetadata;

pub mod local;
pub mod multi;

/// Abstraction around reporting serialized scopes.
#[async_trait]
pub trait Reporter: fmt::Debug {
    /// Reports one MLT chunk.
    async fn report(
        &self,
        chunk: Vec<u8>,
        metadata: &ReportMetadata,
    ) -> Result<(), Box<dyn std::error::Error + Send>>;
}
